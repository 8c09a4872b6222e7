//! One query at a time: window -> fetch -> merge -> persist.

use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::batch::BatchController;
use crate::config::Settings;
use crate::matching;
use crate::models::{Listing, ScoreResult};
use crate::profile::Profile;
use crate::sources::{BatchConstraints, CancelFlag, FetchOutcome, SearchQuery, SourceAdapter};
use crate::stats::IndustryStats;
use crate::store::{MergeStore, UpsertOutcome};

/// What one `run_batch` call did.
#[derive(Debug, Default)]
pub struct RunReport {
    pub source: String,
    /// Merged records for the items recorded in this batch.
    pub listings: Vec<Listing>,
    pub recorded: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub updated: usize,
    pub degraded: Vec<String>,
    /// Every known result of the query has been processed.
    pub exhausted: bool,
    pub cancelled: bool,
}

pub struct Pipeline {
    store: MergeStore,
    adapter: Box<dyn SourceAdapter>,
    controller: BatchController,
    cursor_path: Option<PathBuf>,
    cancel: CancelFlag,
}

impl Pipeline {
    /// The cursor is persisted next to the listings only when the store
    /// itself is backed by a file.
    pub fn new(
        store: MergeStore,
        adapter: Box<dyn SourceAdapter>,
        controller: BatchController,
        settings: &Settings,
    ) -> Self {
        let cursor_path = store.path().map(|_| settings.cursor_path());
        Self {
            store,
            adapter,
            controller,
            cursor_path,
            cancel: CancelFlag::new(),
        }
    }

    /// Flag checked between items; clones share state with the pipeline.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn store(&self) -> &MergeStore {
        &self.store
    }

    pub fn controller(&self) -> &BatchController {
        &self.controller
    }

    /// Forgets the saved position so the next batch starts at index zero.
    pub fn reset_cursor(&mut self) -> Result<()> {
        self.controller.reset();
        self.save_cursor()
    }

    pub fn run_batch(&mut self, query: &str, location: &str) -> Result<RunReport> {
        let query = SearchQuery::new(query, location);
        let mut report = RunReport {
            source: self.adapter.name().to_string(),
            ..RunReport::default()
        };

        let Some(window) = self.controller.next_window(&query.key()) else {
            info!(query = %query.query, "no more results for this query");
            report.exhausted = true;
            return Ok(report);
        };
        info!(
            source = %report.source,
            query = %query.query,
            location = %query.location,
            start = window.start,
            end = window.end,
            "running batch"
        );

        let constraints = BatchConstraints {
            window: window.clone(),
            cancel: self.cancel.clone(),
        };
        let mut outcome = match self.adapter.fetch(&query, &constraints) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "source failed, batch left for a later run");
                FetchOutcome {
                    degraded: vec![format!("{:#}", e)],
                    ..FetchOutcome::default()
                }
            }
        };

        // A clean pass that produced nothing means the results ended here.
        if outcome.processed == 0
            && outcome.total_known.is_none()
            && outcome.degraded.is_empty()
            && !outcome.cancelled
        {
            outcome.total_known = Some(window.start);
        }

        let now = Utc::now();
        let source = report.source.clone();
        for mut candidate in std::mem::take(&mut outcome.candidates) {
            if candidate.source_url.trim().is_empty() {
                warn!(title = %candidate.title, "candidate without url dropped");
                continue;
            }
            let url = candidate.source_url.clone();
            if candidate.degraded && self.store.contains(&url) {
                // Only the description may improve a known listing.
                candidate.title.clear();
                candidate.company = None;
            }
            match self.store.upsert(Listing::from_candidate(candidate, &source, now)) {
                UpsertOutcome::Inserted => report.inserted += 1,
                UpsertOutcome::Updated => report.updated += 1,
                UpsertOutcome::Unchanged => {}
            }
            if let Some(listing) = self.store.get(&url) {
                report.listings.push(listing.clone());
            }
        }

        report.recorded = report.listings.len();
        report.skipped = outcome.skipped;
        report.degraded = outcome.degraded;
        report.cancelled = outcome.cancelled;

        self.controller.advance(outcome.processed, outcome.total_known);
        self.store.mark_batch(now);
        self.store.save()?;
        self.save_cursor()?;

        report.exhausted = self.controller.cursor().is_some_and(|c| c.is_exhausted());
        info!(
            recorded = report.recorded,
            skipped = report.skipped,
            inserted = report.inserted,
            updated = report.updated,
            degraded = report.degraded.len(),
            "batch done"
        );
        Ok(report)
    }

    /// One fresh batch per target role, in profile order. Each role is its
    /// own query, so every role starts at index zero. Stops between roles
    /// once cancelled.
    pub fn run_roles(
        &mut self,
        roles: &[String],
        location: &str,
    ) -> Result<Vec<(String, RunReport)>> {
        let mut reports = Vec::new();
        for role in roles.iter().map(|r| r.trim()).filter(|r| !r.is_empty()) {
            if self.cancel.is_cancelled() {
                info!(role, "cancelled before role");
                break;
            }
            self.reset_cursor()?;
            let report = self.run_batch(role, location)?;
            reports.push((role.to_string(), report));
        }
        Ok(reports)
    }

    /// Scores every stored listing, best first.
    pub fn score_all(&self, profile: &Profile) -> Vec<ScoreResult> {
        matching::score_all(self.store.get_all(), profile)
    }

    pub fn snapshot(&self) -> Vec<Listing> {
        self.store.snapshot()
    }

    pub fn stats(&self) -> IndustryStats {
        IndustryStats::compute(self.store.get_all())
    }

    fn save_cursor(&self) -> Result<()> {
        match &self.cursor_path {
            Some(path) => self.controller.save_cursor(path),
            None => Ok(()),
        }
    }
}
