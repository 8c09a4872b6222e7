//! Numeric facts pulled out of free-form listing text.
//!
//! Salary patterns are tried in a fixed priority order and the first pattern
//! that matches anywhere in the text wins, even if a lower-priority pattern
//! matches earlier in the text.

use regex::Regex;
use std::sync::LazyLock;

// "1.200.000" / "1,200,000"
static SALARY_GROUPED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}[.,]\d{3}[.,]\d{3}\b").ok());

// "1.500 mil", "800k", "90 thousand"
static SALARY_THOUSANDS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,3}(?:[.,]\d{3})?)\s*(?:mil|k|thousand)\b").ok()
});

// "2500000"
static SALARY_BARE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b\d{6,8}\b").ok());

static EXPERIENCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s*\+?\s*(?:años|año|anos|ano|years|year|yrs|yr)\b").ok()
});

static SENIOR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:senior|sr|lead|principal|staff)\b").ok());

static JUNIOR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:junior|jr|trainee)\b").ok());

fn digits_to_int(s: &str) -> Option<i64> {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Extracts a salary figure from a description.
pub fn extract_salary(text: &str) -> Option<i64> {
    if let Some(m) = SALARY_GROUPED.as_ref()?.find(text) {
        return digits_to_int(m.as_str());
    }

    if let Some(caps) = SALARY_THOUSANDS.as_ref()?.captures(text) {
        return digits_to_int(caps.get(1)?.as_str()).map(|n| n * 1000);
    }

    SALARY_BARE
        .as_ref()?
        .find(text)
        .and_then(|m| digits_to_int(m.as_str()))
}

/// Extracts the first "N years" requirement.
pub fn extract_experience(text: &str) -> Option<i64> {
    let caps = EXPERIENCE.as_ref()?.captures(text)?;
    caps.get(1)?.as_str().parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seniority {
    Senior,
    Junior,
    Unspecified,
}

/// Classifies a title by seniority keywords. Senior wins when both appear.
pub fn seniority(title: &str) -> Seniority {
    let is_match = |re: &LazyLock<Option<Regex>>| re.as_ref().is_some_and(|r| r.is_match(title));
    if is_match(&SENIOR) {
        Seniority::Senior
    } else if is_match(&JUNIOR) {
        Seniority::Junior
    } else {
        Seniority::Unspecified
    }
}
