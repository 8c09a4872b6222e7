use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{BatchConstraints, FetchOutcome, SearchQuery, SourceAdapter};
use crate::models::ListingCandidate;

const ROLES: &[&str] = &[
    "Backend Developer",
    "Data Engineer",
    "Full-stack Software Developer",
    "Frontend Developer",
    "DevOps Engineer",
    "QA Analyst",
    "Data Analyst",
    "Mobile Developer",
];

const LEVELS: &[&str] = &["", "", "Junior ", "Senior ", "Sr ", "Lead "];

const COMPANIES: &[&str] = &[
    "Andes Digital",
    "Pacífico Labs",
    "Copper Cloud",
    "Kuntur Software",
    "Austral Data",
    "Valpo Systems",
];

const SKILLS: &[&str] = &[
    "Python", "SQL", "Java", "TypeScript", "React", "Docker", "Kubernetes",
    "AWS", "PostgreSQL", "Django", "Spring", "Git", "Airflow", "Go",
];

const BENEFITS: &[&str] = &[
    "Remoto",
    "Seguro complementario",
    "Flexible",
    "Bono anual",
    "Gimnasio",
];

const SALARY_TIERS: &[i64] = &[900_000, 1_200_000, 1_500_000, 2_000_000, 2_500_000, 3_500_000];

/// Generates plausible listings from fixed pools, for demos and tests.
///
/// The candidate at a given index depends only on the seed, the query and
/// the index, so windows can be requested in any order.
pub struct SyntheticAdapter {
    seed: u64,
    count: usize,
}

impl SyntheticAdapter {
    pub fn new(seed: u64, count: usize) -> Self {
        Self { seed, count }
    }

    fn rng_for(&self, query: &SearchQuery, index: usize) -> StdRng {
        // FNV-1a over the query so the sequence is stable across builds.
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in query.key().bytes() {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        StdRng::seed_from_u64(self.seed ^ h ^ (index as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }

    fn candidate(&self, query: &SearchQuery, index: usize) -> ListingCandidate {
        let mut rng = self.rng_for(query, index);

        let role = if !query.query.is_empty() && rng.gen_bool(0.5) {
            query.query.as_str()
        } else {
            ROLES[rng.gen_range(0..ROLES.len())]
        };
        let level = LEVELS[rng.gen_range(0..LEVELS.len())];
        let title = format!("{}{}", level, role);
        let company = if rng.gen_bool(0.9) {
            COMPANIES.choose(&mut rng).map(|c| c.to_string())
        } else {
            None
        };

        let n_skills = rng.gen_range(2..=5);
        let skills: Vec<&str> = SKILLS.choose_multiple(&mut rng, n_skills).copied().collect();
        let n_benefits = rng.gen_range(0..=2);
        let benefits: Vec<&str> = BENEFITS.choose_multiple(&mut rng, n_benefits).copied().collect();

        let mut text = format!(
            "{} en {}. Buscamos a alguien con {}.",
            title,
            company.as_deref().unwrap_or("empresa confidencial"),
            skills.join(", ")
        );
        let years = rng.gen_range(0..=7);
        if rng.gen_bool(0.5) {
            text.push_str(&format!(" Requisito: {} años de experiencia.", years));
        } else {
            text.push_str(&format!(" {} years of experience required.", years));
        }
        let tier = SALARY_TIERS[rng.gen_range(0..SALARY_TIERS.len())];
        match rng.gen_range(0..4) {
            0 => text.push_str(&format!(" Renta líquida ${}.", group_thousands(tier))),
            1 => text.push_str(&format!(" Sueldo ${} mil.", group_thousands(tier / 1000))),
            2 => text.push_str(&format!(" Sueldo {}.", tier)),
            _ => {}
        }
        if !benefits.is_empty() {
            text.push_str(&format!(" Beneficios: {}.", benefits.join(", ")));
        }

        ListingCandidate {
            title,
            company,
            raw_text: text,
            source_url: format!("synthetic://{}/{}", slug(&query.key()), index),
            degraded: false,
        }
    }
}

fn group_thousands(n: i64) -> String {
    let digits = n.to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}

fn slug(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

impl SourceAdapter for SyntheticAdapter {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(
        &mut self,
        query: &SearchQuery,
        constraints: &BatchConstraints,
    ) -> Result<FetchOutcome> {
        let mut outcome = FetchOutcome {
            total_known: Some(self.count),
            ..FetchOutcome::default()
        };
        let end = constraints.window.end.min(self.count);
        for index in constraints.window.start..end {
            if constraints.cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            outcome.candidates.push(self.candidate(query, index));
            outcome.processed += 1;
        }
        debug!(count = outcome.candidates.len(), "generated synthetic listings");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{extract_experience, extract_salary};
    use crate::sources::CancelFlag;

    fn constraints(window: std::ops::Range<usize>) -> BatchConstraints {
        BatchConstraints {
            window,
            cancel: CancelFlag::new(),
        }
    }

    #[test]
    fn test_same_seed_same_candidates() {
        let q = SearchQuery::new("Backend Developer", "Chile");
        let a = SyntheticAdapter::new(7, 10).fetch(&q, &constraints(0..5)).unwrap();
        let b = SyntheticAdapter::new(7, 10).fetch(&q, &constraints(0..5)).unwrap();
        assert_eq!(a.candidates, b.candidates);

        let c = SyntheticAdapter::new(8, 10).fetch(&q, &constraints(0..5)).unwrap();
        assert_ne!(a.candidates, c.candidates);
    }

    #[test]
    fn test_windows_are_consistent() {
        let q = SearchQuery::new("Data", "Chile");
        let mut adapter = SyntheticAdapter::new(1, 10);
        let whole = adapter.fetch(&q, &constraints(0..6)).unwrap();
        let tail = adapter.fetch(&q, &constraints(3..6)).unwrap();
        assert_eq!(whole.candidates[3..], tail.candidates[..]);
    }

    #[test]
    fn test_window_is_clamped_to_count() {
        let q = SearchQuery::new("Data", "Chile");
        let out = SyntheticAdapter::new(1, 4).fetch(&q, &constraints(3..9)).unwrap();
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.processed, 1);
        assert_eq!(out.total_known, Some(4));
    }

    #[test]
    fn test_generated_text_is_extractable() {
        let q = SearchQuery::new("", "Chile");
        let out = SyntheticAdapter::new(42, 30).fetch(&q, &constraints(0..30)).unwrap();
        assert!(out.candidates.iter().all(|c| extract_experience(&c.raw_text).is_some()));
        assert!(out.candidates.iter().any(|c| extract_salary(&c.raw_text).is_some()));
        assert!(out.candidates.iter().all(|c| c.source_url.starts_with("synthetic://")));
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(1_200_000), "1.200.000");
        assert_eq!(group_thousands(1_500), "1.500");
        assert_eq!(group_thousands(900), "900");
    }
}
