use serde::Serialize;
use std::collections::HashMap;

use crate::extract::extract_salary;
use crate::models::Listing;
use crate::profile::DEFAULT_SKILLS;

/// Skills counted on top of the default profile skills.
const EXTRA_SKILLS: &[&str] = &[
    "SQL", "Go", "Rust", "C#", ".NET", "Node.js", "Vue", "Spark", "Airflow",
    "Kafka", "Terraform", "Azure", "Linux", "GraphQL", "Redis", "Scala",
    "Power BI", "Excel", "Tableau", "dbt", "Snowflake",
];

/// Frequency counter that remembers first-seen order for tie-breaks.
#[derive(Debug, Default, Clone)]
struct Counter {
    counts: HashMap<String, (usize, usize)>, // key -> (count, first seen)
}

impl Counter {
    fn add(&mut self, key: &str) {
        let next = self.counts.len();
        self.counts.entry(key.to_string()).or_insert((0, next)).0 += 1;
    }

    fn ranked(&self) -> Vec<(String, usize)> {
        let mut entries: Vec<_> = self.counts.iter().collect();
        entries.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));
        entries.into_iter().map(|(k, (c, _))| (k.clone(), *c)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalaryStats {
    pub count: usize,
    pub coverage_pct: f64,
    pub mean: f64,
    pub min: i64,
    pub max: i64,
}

/// Market statistics over the whole merged listing set.
#[derive(Debug, Clone, Serialize)]
pub struct IndustryStats {
    pub total_listings: usize,
    /// Listings mentioning each known skill, most common first.
    pub skill_counts: Vec<(String, usize)>,
    pub title_counts: Vec<(String, usize)>,
    pub company_counts: Vec<(String, usize)>,
    pub salary: Option<SalaryStats>,
}

fn vocabulary() -> Vec<&'static str> {
    let mut vocab: Vec<&'static str> = DEFAULT_SKILLS.to_vec();
    for skill in EXTRA_SKILLS {
        if !vocab.iter().any(|v| v.eq_ignore_ascii_case(skill)) {
            vocab.push(skill);
        }
    }
    vocab
}

/// True when `needle` appears in `haystack` not glued to other letters, so
/// that short names like "C" or "Go" are not found inside every word.
fn mentions(haystack: &str, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    let bytes = haystack.as_bytes();
    haystack.match_indices(&needle).any(|(start, m)| {
        let end = start + m.len();
        let before_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let after_ok = end >= bytes.len() || !bytes[end].is_ascii_alphanumeric();
        before_ok && after_ok
    })
}

impl IndustryStats {
    pub fn compute(listings: &[Listing]) -> Self {
        let vocab = vocabulary();
        let mut skills = Counter::default();
        let mut titles = Counter::default();
        let mut companies = Counter::default();
        let mut salaries = Vec::new();

        for listing in listings {
            let text = format!("{} {}", listing.title, listing.description).to_lowercase();
            for skill in &vocab {
                if mentions(&text, skill) {
                    skills.add(skill);
                }
            }

            let title = listing.title.trim();
            if !title.is_empty() {
                titles.add(title);
            }
            let company = listing.company.trim();
            if !company.is_empty() {
                companies.add(company);
            }

            if let Some(amount) = extract_salary(&listing.description) {
                salaries.push(amount);
            }
        }

        let salary = if salaries.is_empty() {
            None
        } else {
            let count = salaries.len();
            let sum: i64 = salaries.iter().sum();
            Some(SalaryStats {
                count,
                coverage_pct: count as f64 * 100.0 / listings.len() as f64,
                mean: sum as f64 / count as f64,
                min: salaries.iter().copied().min().unwrap_or_default(),
                max: salaries.iter().copied().max().unwrap_or_default(),
            })
        };

        Self {
            total_listings: listings.len(),
            skill_counts: skills.ranked(),
            title_counts: titles.ranked(),
            company_counts: companies.ranked(),
            salary,
        }
    }

    pub fn top_skills(&self, n: usize) -> &[(String, usize)] {
        &self.skill_counts[..n.min(self.skill_counts.len())]
    }

    pub fn top_titles(&self, n: usize) -> &[(String, usize)] {
        &self.title_counts[..n.min(self.title_counts.len())]
    }

    pub fn top_companies(&self, n: usize) -> &[(String, usize)] {
        &self.company_counts[..n.min(self.company_counts.len())]
    }
}
