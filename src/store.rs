use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::ScoutError;
use crate::models::{Listing, NOT_SPECIFIED};

/// On-disk layout of the listing file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreFile {
    #[serde(default)]
    last_batch_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    listings: Map<String, Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Canonical `url -> Listing` mapping, accumulated across runs.
///
/// Entries are only ever added or improved. Insertion order is kept in
/// memory and on disk.
#[derive(Debug, Default)]
pub struct MergeStore {
    path: Option<PathBuf>,
    listings: Vec<Listing>,
    index: HashMap<String, usize>,
    last_batch: Option<DateTime<Utc>>,
    extra: Map<String, Value>,
    // Entries that failed to parse. Written back untouched.
    unreadable: Map<String, Value>,
}

impl MergeStore {
    /// An empty store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the store at `path`. A missing file yields an empty store; a
    /// malformed one is moved aside and the store starts empty.
    pub fn open(path: &Path) -> Result<Self> {
        let mut store = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(store),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let file: StoreFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                let err = ScoutError::data_shape(path.display().to_string(), e);
                let backup = backup_path(path);
                warn!(
                    error = %err,
                    backup = %backup.display(),
                    "listing file unreadable, starting empty"
                );
                std::fs::rename(path, &backup)
                    .with_context(|| format!("Failed to move aside {}", path.display()))?;
                return Ok(store);
            }
        };

        store.last_batch = file.last_batch_timestamp;
        store.extra = file.extra;
        for (url, value) in file.listings {
            match serde_json::from_value::<Listing>(value.clone()) {
                Ok(mut listing) => {
                    if listing.url.is_empty() {
                        listing.url = url.clone();
                    }
                    store.insert_new(listing);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "skipping unreadable listing");
                    store.unreadable.insert(url, value);
                }
            }
        }
        debug!(count = store.listings.len(), "loaded listings");
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<&Listing> {
        self.index.get(url).map(|&i| &self.listings[i])
    }

    pub fn get_all(&self) -> &[Listing] {
        &self.listings
    }

    /// Owned copy for readers that must not observe later writes.
    pub fn snapshot(&self) -> Vec<Listing> {
        self.listings.clone()
    }

    pub fn last_batch_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_batch
    }

    pub fn mark_batch(&mut self, at: DateTime<Utc>) {
        self.last_batch = Some(at);
    }

    fn insert_new(&mut self, listing: Listing) {
        self.index.insert(listing.url.clone(), self.listings.len());
        self.listings.push(listing);
    }

    /// Inserts an unknown listing or improves a known one. A non-empty
    /// description is never replaced by an empty one; `last_updated` is
    /// always refreshed.
    pub fn upsert(&mut self, incoming: Listing) -> UpsertOutcome {
        let Some(&i) = self.index.get(&incoming.url) else {
            self.unreadable.remove(&incoming.url);
            let mut incoming = incoming;
            incoming.first_seen.get_or_insert(incoming.last_updated);
            self.insert_new(incoming);
            return UpsertOutcome::Inserted;
        };

        let has_title = !incoming.title.trim().is_empty();
        let company_known =
            !incoming.company.trim().is_empty() && incoming.company != NOT_SPECIFIED;
        let has_description = incoming.has_description();

        let existing = &mut self.listings[i];
        let before = existing.clone();

        if has_title {
            existing.title = incoming.title;
        }
        if company_known || existing.company.trim().is_empty() {
            existing.company = incoming.company;
        }
        if has_description || existing.description.trim().is_empty() {
            existing.description = incoming.description;
        }
        if incoming.source.is_some() {
            existing.source = incoming.source;
        }
        if existing.first_seen.is_none() {
            existing.first_seen = incoming.first_seen;
        }
        for (key, value) in incoming.extra {
            existing.extra.insert(key, value);
        }

        let changed = *existing != before;
        existing.last_updated = incoming.last_updated;

        if changed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Unchanged
        }
    }

    /// Drops every listing. Only reached through an explicit user command.
    pub fn clear(&mut self) {
        self.listings.clear();
        self.index.clear();
        self.unreadable.clear();
    }

    /// Writes the store atomically. In-memory stores are a no-op.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut listings = Map::new();
        for listing in &self.listings {
            listings.insert(listing.url.clone(), serde_json::to_value(listing)?);
        }
        for (url, value) in &self.unreadable {
            listings.entry(url.clone()).or_insert_with(|| value.clone());
        }

        let file = StoreFile {
            last_batch_timestamp: self.last_batch,
            listings,
            extra: self.extra.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        write_atomic(path, json.as_bytes())
            .with_context(|| format!("Failed to save listings to {}", path.display()))
    }
}

/// Sibling path an unreadable file is moved or copied to.
pub fn backup_path(path: &Path) -> PathBuf {
    path.with_extension(format!("bad-{}", Utc::now().format("%Y%m%d%H%M%S")))
}

/// Writes `bytes` to a sibling temp file and renames it over `path`, so a
/// crash leaves either the old or the new file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
