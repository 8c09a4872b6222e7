use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::ScoutError;
use crate::models::Factor;
use crate::store::{backup_path, write_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: i64,
    pub max: i64,
}

impl ValueRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Distance from `value` to the nearest bound, 0 inside the range.
    pub fn distance(&self, value: i64) -> i64 {
        if value < self.min {
            self.min - value
        } else if value > self.max {
            value - self.max
        } else {
            0
        }
    }
}

/// Weight of each factor, 1 to 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Priorities {
    pub role: u8,
    pub skill: u8,
    pub salary: u8,
    pub experience: u8,
    pub benefit: u8,
}

impl Default for Priorities {
    fn default() -> Self {
        Self {
            role: 5,
            skill: 5,
            salary: 5,
            experience: 5,
            benefit: 5,
        }
    }
}

impl Priorities {
    pub fn get(&self, factor: Factor) -> u8 {
        match factor {
            Factor::Role => self.role,
            Factor::Skill => self.skill,
            Factor::Salary => self.salary,
            Factor::Experience => self.experience,
            Factor::Benefit => self.benefit,
        }
    }

    fn slot(&mut self, factor: Factor) -> &mut u8 {
        match factor {
            Factor::Role => &mut self.role,
            Factor::Skill => &mut self.skill,
            Factor::Salary => &mut self.salary,
            Factor::Experience => &mut self.experience,
            Factor::Benefit => &mut self.benefit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub roles: Vec<String>,
    pub skills: Vec<String>,
    pub benefits: Vec<String>,
    pub salary: ValueRange,
    pub experience: ValueRange,
    pub priorities: Priorities,
    pub location: String,
}

pub const DEFAULT_SKILLS: &[&str] = &[
    "Python", "JavaScript", "Java", "TypeScript", "PHP", "HTML5", "CSS3", "C",
    "MySQL", "MongoDB", "PostgreSQL", "React", "React Native", "Next.js",
    "Flask", "Django", "Spring", "Express.js", "Angular", "Git", "Docker",
    "Kubernetes", "REST APIs", "Google Cloud", "AWS", "SCRUM", "Jira",
];

impl Default for Profile {
    fn default() -> Self {
        Self {
            roles: vec![
                "Data Engineer".to_string(),
                "Back End Developer".to_string(),
                "Full-stack Software Developer".to_string(),
            ],
            skills: DEFAULT_SKILLS.iter().map(|s| s.to_string()).collect(),
            benefits: vec![
                "Remoto".to_string(),
                "Seguro complementario".to_string(),
                "Flexible".to_string(),
            ],
            salary: ValueRange::new(1_200_000, 3_000_000),
            experience: ValueRange::new(0, 4),
            priorities: Priorities::default(),
            location: "Chile".to_string(),
        }
    }
}

/// Which ordered list of the profile an edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Roles,
    Skills,
    Benefits,
}

impl Profile {
    pub fn priority(&self, factor: Factor) -> i64 {
        i64::from(self.priorities.get(factor))
    }

    /// Rejects configurations the scorer cannot interpret.
    pub fn validate(&self) -> Result<(), ScoutError> {
        match self.problems().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Every invariant the profile currently breaks.
    pub fn problems(&self) -> Vec<ScoutError> {
        let mut problems = Vec::new();
        for factor in Factor::ALL {
            let weight = self.priorities.get(factor);
            if !(1..=10).contains(&weight) {
                problems.push(ScoutError::Invariant(format!(
                    "{} priority must be between 1 and 10, got {}",
                    factor, weight
                )));
            }
        }
        if self.salary.min > self.salary.max {
            problems.push(ScoutError::Invariant(format!(
                "salary range min {} exceeds max {}",
                self.salary.min, self.salary.max
            )));
        }
        if self.experience.min > self.experience.max {
            problems.push(ScoutError::Invariant(format!(
                "experience range min {} exceeds max {}",
                self.experience.min, self.experience.max
            )));
        }
        problems
    }

    pub fn list(&self, kind: ListKind) -> &[String] {
        match kind {
            ListKind::Roles => &self.roles,
            ListKind::Skills => &self.skills,
            ListKind::Benefits => &self.benefits,
        }
    }

    fn list_mut(&mut self, kind: ListKind) -> &mut Vec<String> {
        match kind {
            ListKind::Roles => &mut self.roles,
            ListKind::Skills => &mut self.skills,
            ListKind::Benefits => &mut self.benefits,
        }
    }

    /// Appends an entry. Returns false for blanks and case-insensitive
    /// duplicates.
    pub fn append(&mut self, kind: ListKind, entry: &str) -> bool {
        let entry = entry.trim();
        if entry.is_empty() {
            return false;
        }
        let list = self.list_mut(kind);
        let lower = entry.to_lowercase();
        if list.iter().any(|e| e.to_lowercase() == lower) {
            return false;
        }
        list.push(entry.to_string());
        true
    }

    /// Removes an entry by case-insensitive name.
    pub fn remove(&mut self, kind: ListKind, entry: &str) -> bool {
        let lower = entry.trim().to_lowercase();
        let list = self.list_mut(kind);
        let before = list.len();
        list.retain(|e| e.to_lowercase() != lower);
        list.len() != before
    }

    /// Moves the entry at `from` to position `to` (clamped to the end).
    pub fn reorder(&mut self, kind: ListKind, from: usize, to: usize) -> bool {
        let list = self.list_mut(kind);
        if from >= list.len() {
            return false;
        }
        let item = list.remove(from);
        let to = to.min(list.len());
        list.insert(to, item);
        true
    }

    pub fn set_salary_range(&mut self, min: i64, max: i64) -> Result<(), ScoutError> {
        if min > max {
            return Err(ScoutError::Invariant(format!(
                "salary range min {} exceeds max {}",
                min, max
            )));
        }
        self.salary = ValueRange::new(min, max);
        Ok(())
    }

    pub fn set_experience_range(&mut self, min: i64, max: i64) -> Result<(), ScoutError> {
        if min < 0 || min > max {
            return Err(ScoutError::Invariant(format!("invalid experience range {}-{}", min, max)));
        }
        self.experience = ValueRange::new(min, max);
        Ok(())
    }

    pub fn set_priority(&mut self, factor: Factor, weight: u8) -> Result<(), ScoutError> {
        if !(1..=10).contains(&weight) {
            return Err(ScoutError::Invariant(format!(
                "{} priority must be between 1 and 10, got {}",
                factor, weight
            )));
        }
        *self.priorities.slot(factor) = weight;
        Ok(())
    }
}

/// Owns the single live profile and persists it after every mutation.
pub struct ProfileStore {
    path: PathBuf,
    profile: Profile,
}

impl ProfileStore {
    /// Loads the profile and rejects one that breaks an invariant.
    pub fn open(path: &Path) -> Result<Self> {
        let store = Self::load(path)?;
        store.profile.validate()?;
        Ok(store)
    }

    /// Loads the profile without validating it, so a broken one can still
    /// be repaired through `edit`.
    ///
    /// Every readable field of the file is laid over the defaults, down to
    /// single range bounds and weights. Fields that do not fit are dropped:
    /// the original file is copied aside and replaced by the repaired one.
    /// A file that is not a JSON object is moved aside and the defaults are
    /// used.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no profile yet, using defaults");
                return Ok(Self {
                    path: path.to_path_buf(),
                    profile: Profile::default(),
                });
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let profile = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(fields)) => {
                let (profile, dropped) = overlay_defaults(fields)?;
                if !dropped.is_empty() {
                    let backup = backup_path(path);
                    warn!(
                        fields = %dropped.join(", "),
                        backup = %backup.display(),
                        "ignoring unreadable profile fields"
                    );
                    std::fs::copy(path, &backup)
                        .with_context(|| format!("Failed to copy aside {}", path.display()))?;
                    let json = serde_json::to_string_pretty(&profile)?;
                    write_atomic(path, json.as_bytes())
                        .with_context(|| format!("Failed to rewrite {}", path.display()))?;
                }
                profile
            }
            other => {
                let err = match other {
                    Ok(_) => ScoutError::data_shape(path.display().to_string(), "not an object"),
                    Err(e) => ScoutError::data_shape(path.display().to_string(), e),
                };
                let backup = backup_path(path);
                warn!(error = %err, backup = %backup.display(), "using default profile");
                std::fs::rename(path, &backup)
                    .with_context(|| format!("Failed to move aside {}", path.display()))?;
                Profile::default()
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            profile,
        })
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `f` to a copy of the profile; the copy replaces the live
    /// profile and is saved only if it validates, or at least breaks fewer
    /// invariants than the live one.
    pub fn edit<T>(&mut self, f: impl FnOnce(&mut Profile) -> Result<T, ScoutError>) -> Result<T> {
        let mut draft = self.profile.clone();
        let out = f(&mut draft)?;
        let remaining = draft.problems();
        if remaining.len() >= self.profile.problems().len() {
            if let Some(err) = remaining.into_iter().next() {
                return Err(err.into());
            }
        }
        self.profile = draft;
        self.save()?;
        Ok(out)
    }

    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.profile)?;
        write_atomic(&self.path, json.as_bytes())
            .with_context(|| format!("Failed to save profile to {}", self.path.display()))
    }
}

/// Lays every leaf of `fields` over the default profile, keeping only the
/// leaves that still deserialize. Returns the dotted paths of the rest.
fn overlay_defaults(fields: Map<String, Value>) -> Result<(Profile, Vec<String>)> {
    let mut merged = serde_json::to_value(Profile::default())?;
    let mut leaves = Vec::new();
    collect_leaves(Value::Object(fields), &mut Vec::new(), &mut leaves);

    let mut dropped = Vec::new();
    for (path, value) in leaves {
        let mut attempt = merged.clone();
        if set_at(&mut attempt, &path, value)
            && serde_json::from_value::<Profile>(attempt.clone()).is_ok()
        {
            merged = attempt;
        } else {
            dropped.push(path.join("."));
        }
    }
    Ok((serde_json::from_value(merged)?, dropped))
}

fn collect_leaves(value: Value, path: &mut Vec<String>, out: &mut Vec<(Vec<String>, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key);
                collect_leaves(child, path, out);
                path.pop();
            }
        }
        leaf => out.push((path.clone(), leaf)),
    }
}

fn set_at(root: &mut Value, path: &[String], value: Value) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };
    let mut node = root;
    for key in parents {
        node = match node.get_mut(key.as_str()) {
            Some(child) => child,
            None => return false,
        };
    }
    match node.as_object_mut() {
        Some(map) => {
            map.insert(last.clone(), value);
            true
        }
        None => false,
    }
}
