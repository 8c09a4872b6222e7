//! Weighted multi-factor scoring of a listing against a profile.
//!
//! Every sub-score is a pure function of the listing and the profile, so a
//! "re-analyze" is just calling [`score`] again.

use crate::extract::{extract_experience, extract_salary, seniority, Seniority};
use crate::models::{Factor, FactorScore, Listing, ScoreResult};
use crate::profile::Profile;

/// Weight of the entry at `index` in an ordered list: earlier entries count
/// more.
fn position_weight(len: usize, index: usize) -> i64 {
    (len - index) as i64
}

fn factor(factor: Factor, score: i64, rationale: String) -> FactorScore {
    FactorScore {
        factor,
        score: score.max(0),
        rationale,
    }
}

fn score_role(title: &str, profile: &Profile) -> FactorScore {
    let title_lower = title.to_lowercase();
    let len = profile.roles.len();
    let hit = profile
        .roles
        .iter()
        .enumerate()
        .find(|(_, role)| !role.trim().is_empty() && title_lower.contains(&role.to_lowercase()));

    match hit {
        Some((i, role)) => {
            let weight = position_weight(len, i);
            let score = 10 * weight * profile.priority(Factor::Role) / 5;
            factor(
                Factor::Role,
                score,
                format!("matches role '{}' (#{} of {})", role, i + 1, len),
            )
        }
        None => factor(Factor::Role, 0, "no target role in title".to_string()),
    }
}

/// Shared by skills and benefits: position-weighted hits scaled by priority.
fn score_terms(
    kind: Factor,
    terms: &[String],
    description: &str,
    priority: i64,
) -> (FactorScore, Vec<String>) {
    let text = description.to_lowercase();
    let len = terms.len();
    let mut raw = 0;
    let mut hits = Vec::new();

    for (i, term) in terms.iter().enumerate() {
        if !term.trim().is_empty() && text.contains(&term.to_lowercase()) {
            raw += 10 * position_weight(len, i);
            hits.push(term.clone());
        }
    }

    let score = raw * priority / 5;
    let rationale = if hits.is_empty() {
        format!("no {}s mentioned", kind)
    } else {
        format!("{} of {} {}s: {}", hits.len(), len, kind, hits.join(", "))
    };
    (factor(kind, score, rationale), hits)
}

fn score_salary(description: &str, profile: &Profile) -> FactorScore {
    let priority = profile.priority(Factor::Salary);
    let range = profile.salary;
    match extract_salary(description) {
        None => factor(Factor::Salary, 0, "not specified".to_string()),
        Some(amount) if range.contains(amount) => factor(
            Factor::Salary,
            50 * priority,
            format!("{} within {}-{}", amount, range.min, range.max),
        ),
        Some(amount) if amount < range.min => factor(
            Factor::Salary,
            0,
            format!("{} below minimum {}", amount, range.min),
        ),
        Some(amount) => factor(
            Factor::Salary,
            10 * priority,
            format!("{} above maximum {}", amount, range.max),
        ),
    }
}

fn score_experience(description: &str, profile: &Profile) -> FactorScore {
    let priority = profile.priority(Factor::Experience);
    let range = profile.experience;
    match extract_experience(description) {
        None => factor(Factor::Experience, 0, "not specified".to_string()),
        Some(years) => {
            let distance = range.distance(years);
            let score = 20 * priority - 5 * distance;
            let rationale = if distance == 0 {
                format!("{} years within {}-{}", years, range.min, range.max)
            } else {
                format!(
                    "{} years, {} outside {}-{}",
                    years, distance, range.min, range.max
                )
            };
            factor(Factor::Experience, score, rationale)
        }
    }
}

/// Advisory hints shown next to a score. They never change it.
fn flags(listing: &Listing, profile: &Profile) -> Vec<String> {
    let mut flags = Vec::new();
    match seniority(&listing.title) {
        Seniority::Senior => flags.push("SENIOR".to_string()),
        Seniority::Junior => flags.push("JUNIOR".to_string()),
        Seniority::Unspecified => {}
    }
    if let Some(years) = extract_experience(&listing.description) {
        if years > profile.experience.max {
            flags.push(format!("{} YEARS", years));
        }
    }
    if !listing.has_description() {
        flags.push("NO DESCRIPTION".to_string());
    }
    flags
}

pub fn score(listing: &Listing, profile: &Profile) -> ScoreResult {
    // The unavailable placeholder must not match skills like "C".
    let description = if listing.has_description() {
        listing.description.as_str()
    } else {
        ""
    };
    let role = score_role(&listing.title, profile);
    let (skill, matched_skills) = score_terms(
        Factor::Skill,
        &profile.skills,
        description,
        profile.priority(Factor::Skill),
    );
    let salary = score_salary(description, profile);
    let experience = score_experience(description, profile);
    let (benefit, matched_benefits) = score_terms(
        Factor::Benefit,
        &profile.benefits,
        description,
        profile.priority(Factor::Benefit),
    );

    let total_score = role.score + skill.score + salary.score + experience.score + benefit.score;

    ScoreResult {
        listing_url: listing.url.clone(),
        total_score,
        role,
        skill,
        salary,
        experience,
        benefit,
        matched_skills,
        matched_benefits,
        flags: flags(listing, profile),
    }
}

/// Scores every listing, best first. Ties keep the input order.
pub fn score_all(listings: &[Listing], profile: &Profile) -> Vec<ScoreResult> {
    let mut results: Vec<ScoreResult> = listings.iter().map(|l| score(l, profile)).collect();
    results.sort_by(|a, b| b.total_score.cmp(&a.total_score));
    results
}
