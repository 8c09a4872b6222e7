use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Placeholder stored when a listing was reached but its description could
/// not be read. Treated as empty by the merge store.
pub const EMPTY_DESCRIPTION: &str = "(description unavailable)";

/// Placeholder for optional fields a source did not provide.
pub const NOT_SPECIFIED: &str = "Not specified";

/// Unvalidated listing produced by a source adapter during one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingCandidate {
    pub title: String,
    pub company: Option<String>,
    pub raw_text: String,
    pub source_url: String,
    /// The source could not confirm that title and company belong to
    /// `source_url`.
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>, // "static", "browser", "synthetic"
    // Fields written by newer versions or other tools; kept on save.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Listing {
    pub fn from_candidate(candidate: ListingCandidate, source: &str, now: DateTime<Utc>) -> Self {
        Self {
            url: candidate.source_url,
            title: candidate.title.trim().to_string(),
            company: candidate
                .company
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| NOT_SPECIFIED.to_string()),
            description: candidate.raw_text.trim().to_string(),
            last_updated: now,
            first_seen: Some(now),
            source: Some(source.to_string()),
            extra: Map::new(),
        }
    }

    /// True when the description carries real text rather than nothing or
    /// the unavailable placeholder.
    pub fn has_description(&self) -> bool {
        let d = self.description.trim();
        !d.is_empty() && d != EMPTY_DESCRIPTION
    }
}

/// One of the five scoring factors, in scoring order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Factor {
    Role,
    Skill,
    Salary,
    Experience,
    Benefit,
}

impl Factor {
    pub const ALL: [Factor; 5] = [
        Factor::Role,
        Factor::Skill,
        Factor::Salary,
        Factor::Experience,
        Factor::Benefit,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "role" | "roles" | "title" => Some(Factor::Role),
            "skill" | "skills" => Some(Factor::Skill),
            "salary" | "pay" => Some(Factor::Salary),
            "experience" | "exp" => Some(Factor::Experience),
            "benefit" | "benefits" => Some(Factor::Benefit),
            _ => None,
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Factor::Role => "role",
            Factor::Skill => "skill",
            Factor::Salary => "salary",
            Factor::Experience => "experience",
            Factor::Benefit => "benefit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactorScore {
    pub factor: Factor,
    pub score: i64,
    pub rationale: String,
}

/// Derived on demand from a listing and the current profile, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreResult {
    pub listing_url: String,
    pub total_score: i64,
    pub role: FactorScore,
    pub skill: FactorScore,
    pub salary: FactorScore,
    pub experience: FactorScore,
    pub benefit: FactorScore,
    pub matched_skills: Vec<String>,
    pub matched_benefits: Vec<String>,
    pub flags: Vec<String>,
}

impl ScoreResult {
    pub fn factors(&self) -> [&FactorScore; 5] {
        [&self.role, &self.skill, &self.salary, &self.experience, &self.benefit]
    }

    pub fn sub_score_sum(&self) -> i64 {
        self.factors().iter().map(|f| f.score).sum()
    }
}
