use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::ScoutError;
use crate::store::write_atomic;

/// Progress through the results of one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationCursor {
    pub query: String,
    pub next_index: usize,
    /// Number of results the source reported so far, if any.
    #[serde(default)]
    pub total_known: Option<usize>,
}

impl PaginationCursor {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            next_index: 0,
            total_known: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.total_known.is_some_and(|total| self.next_index >= total)
    }
}

/// Hands out fixed-size windows of result indices for a query so that
/// "load more" never re-extracts earlier items.
#[derive(Debug, Clone)]
pub struct BatchController {
    batch_size: usize,
    cursor: Option<PaginationCursor>,
}

impl BatchController {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            cursor: None,
        }
    }

    pub fn with_cursor(batch_size: usize, cursor: Option<PaginationCursor>) -> Self {
        Self {
            batch_size: batch_size.max(1),
            cursor,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn cursor(&self) -> Option<&PaginationCursor> {
        self.cursor.as_ref()
    }

    /// Window for the next batch of `query`, or `None` once every known
    /// result has been processed. A different query starts over at zero.
    pub fn next_window(&mut self, query: &str) -> Option<Range<usize>> {
        let cursor = match &mut self.cursor {
            Some(c) if c.query == query => c,
            other => {
                if let Some(old) = other.as_ref() {
                    debug!(old = %old.query, new = %query, "query changed, cursor reset");
                }
                other.insert(PaginationCursor::new(query))
            }
        };

        if cursor.is_exhausted() {
            return None;
        }
        let start = cursor.next_index;
        let mut end = start + self.batch_size;
        if let Some(total) = cursor.total_known {
            end = end.min(total);
        }
        Some(start..end)
    }

    /// Moves past `processed` items (recorded and skipped alike) and records
    /// the source's latest total.
    pub fn advance(&mut self, processed: usize, total_known: Option<usize>) {
        let Some(cursor) = &mut self.cursor else {
            return;
        };
        if total_known.is_some() {
            cursor.total_known = total_known;
        }
        cursor.next_index += processed;
        if let Some(total) = cursor.total_known {
            cursor.next_index = cursor.next_index.min(total);
        }
    }

    pub fn reset(&mut self) {
        self.cursor = None;
    }

    pub fn load_cursor(path: &Path) -> Option<PaginationCursor> {
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(cursor) => Some(cursor),
            Err(e) => {
                let err = ScoutError::data_shape(path.display().to_string(), e);
                warn!(error = %err, "ignoring saved cursor");
                None
            }
        }
    }

    pub fn save_cursor(&self, path: &Path) -> Result<()> {
        match &self.cursor {
            Some(cursor) => {
                let json = serde_json::to_string_pretty(cursor)?;
                write_atomic(path, json.as_bytes())
                    .with_context(|| format!("Failed to save cursor to {}", path.display()))
            }
            None => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cursor_walks_ten_items_in_threes() {
        let mut controller = BatchController::new(3);
        let mut seen = vec![];

        // First window is requested before the total is known.
        let w = controller.next_window("rust").unwrap();
        assert_eq!(w, 0..3);
        controller.advance(w.len(), Some(10));
        seen.push(controller.cursor().unwrap().next_index);

        while let Some(w) = controller.next_window("rust") {
            controller.advance(w.len(), Some(10));
            seen.push(controller.cursor().unwrap().next_index);
        }
        assert_eq!(seen, vec![3, 6, 9, 10]);
        assert!(controller.next_window("rust").is_none());
    }

    #[test]
    fn test_last_window_is_clamped() {
        let mut controller = BatchController::with_cursor(
            3,
            Some(PaginationCursor {
                query: "rust".to_string(),
                next_index: 9,
                total_known: Some(10),
            }),
        );
        assert_eq!(controller.next_window("rust"), Some(9..10));
    }

    #[test]
    fn test_query_change_resets_cursor() {
        let mut controller = BatchController::new(3);
        let w = controller.next_window("rust").unwrap();
        controller.advance(w.len(), Some(10));
        assert_eq!(controller.cursor().unwrap().next_index, 3);

        assert_eq!(controller.next_window("python"), Some(0..3));
        assert_eq!(controller.cursor().unwrap().query, "python");
        assert_eq!(controller.cursor().unwrap().next_index, 0);
    }

    #[test]
    fn test_skipped_items_still_advance() {
        let mut controller = BatchController::new(3);
        controller.next_window("q");
        // Three attempted: one recorded, two skipped.
        controller.advance(3, Some(5));
        assert_eq!(controller.next_window("q"), Some(3..5));
    }

    #[test]
    fn test_cursor_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursor.json");
        let mut controller = BatchController::new(3);
        controller.next_window("data");
        controller.advance(3, Some(7));
        controller.save_cursor(&path).unwrap();

        let mut restored = BatchController::with_cursor(3, BatchController::load_cursor(&path));
        assert_eq!(restored.next_window("data"), Some(3..6));

        restored.reset();
        restored.save_cursor(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_malformed_cursor_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursor.json");
        std::fs::write(&path, "nonsense").unwrap();
        assert!(BatchController::load_cursor(&path).is_none());
    }
}
