//! Origins of listing candidates. Adapters are the only code allowed to
//! touch the network or a browser.

pub mod rendered;
pub mod static_page;
pub mod synthetic;

use anyhow::Result;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::models::ListingCandidate;

pub use rendered::RenderedAdapter;
pub use static_page::StaticPageAdapter;
pub use synthetic::SyntheticAdapter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    pub location: String,
}

impl SearchQuery {
    pub fn new(query: &str, location: &str) -> Self {
        Self {
            query: query.trim().to_string(),
            location: location.trim().to_string(),
        }
    }

    /// Cursor key: a different location is a different search.
    pub fn key(&self) -> String {
        format!("{}|{}", self.query.to_lowercase(), self.location.to_lowercase())
    }
}

/// External stop request, checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct BatchConstraints {
    /// Result indices to produce, `start..end`.
    pub window: Range<usize>,
    pub cancel: CancelFlag,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub candidates: Vec<ListingCandidate>,
    /// Items that reached a terminal state, including skipped ones.
    pub processed: usize,
    pub skipped: usize,
    pub total_known: Option<usize>,
    /// Pages, queries or items that degraded, human readable.
    pub degraded: Vec<String>,
    pub cancelled: bool,
}

pub trait SourceAdapter {
    /// Short name stored on listings and used in logs.
    fn name(&self) -> &str;

    /// Produces candidates for `constraints.window` of the results for
    /// `query`. Calls are independent of each other.
    fn fetch(
        &mut self,
        query: &SearchQuery,
        constraints: &BatchConstraints,
    ) -> Result<FetchOutcome>;
}
