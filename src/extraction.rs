//! Per-item extraction protocol for a rendered, asynchronously updating
//! results list with a single shared detail panel.
//!
//! Each item goes through
//! Located -> Activated -> Targeted -> Expanded -> Extracted -> Verified
//! and ends Recorded or Skipped. Items are processed strictly one at a time
//! because every step touches the same panel. No failure inside an item
//! stops the batch.

use anyhow::Result;
use std::collections::HashSet;
use std::ops::Range;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ExtractionSettings;
use crate::error::ScoutError;
use crate::models::EMPTY_DESCRIPTION;
use crate::sources::CancelFlag;

/// What a listing block shows before it is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub title: String,
    pub company: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationTarget {
    /// The block element itself.
    Block,
    /// The first interactive descendant of the block.
    Fallback,
}

/// The capabilities the protocol needs from a rendering surface.
pub trait Panel {
    /// Number of listing blocks currently rendered.
    fn block_count(&mut self) -> Result<usize>;

    /// Summary of the block at `index`, `None` if it is no longer there.
    fn block_summary(&mut self, index: usize) -> Result<Option<BlockSummary>>;

    fn activate(&mut self, index: usize, target: ActivationTarget) -> Result<()>;

    /// Fragment or anchor identifying the item the panel currently shows.
    fn navigable_id(&mut self) -> Result<String>;

    /// Presses a "show full text" control in the page or any embedded
    /// frame. `Ok(false)` when there is none.
    fn expand_full_text(&mut self) -> Result<bool>;

    /// Longest text block of the detail panel, looking in the page first
    /// and then in each embedded frame.
    fn read_detail_text(&mut self) -> Result<Option<String>>;

    /// Canonical listing URL for a navigable identifier.
    fn listing_url(&self, id: &str) -> String;

    fn pause(&mut self, duration: Duration);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedItem {
    pub index: usize,
    pub title: String,
    pub company: Option<String>,
    pub description: String,
    pub url: String,
    /// The identifier never changed after activation.
    pub degraded: bool,
    /// The panel went stale once and the item was extracted a second time.
    pub retried: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    ActivationFailed,
    NoIdentifier,
    /// Activation never moved the panel off an item already recorded.
    StaleIdentifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Recorded(ExtractedItem),
    Skipped { index: usize, reason: SkipReason },
}

#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub outcomes: Vec<ItemOutcome>,
    pub warnings: Vec<String>,
    pub cancelled: bool,
    pub total_blocks: usize,
}

impl ExtractionReport {
    pub fn recorded(&self) -> impl Iterator<Item = &ExtractedItem> {
        self.outcomes.iter().filter_map(|o| match o {
            ItemOutcome::Recorded(item) => Some(item),
            ItemOutcome::Skipped { .. } => None,
        })
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Skipped { .. }))
            .count()
    }

    /// Items that reached a terminal state, recorded or skipped.
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }
}

/// Bounded waits of the protocol, expressed as poll counts.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub poll_interval: Duration,
    pub target_polls: usize,
    pub detail_polls: usize,
    pub expand_wait: Duration,
    pub min_chars: usize,
}

impl Timing {
    pub fn from_settings(settings: &ExtractionSettings) -> Self {
        let interval = settings.poll_interval();
        let polls = |timeout: Duration| {
            let n = timeout.as_millis().div_ceil(interval.as_millis());
            (n as usize).max(1)
        };
        Self {
            poll_interval: interval,
            target_polls: polls(settings.target_timeout()),
            detail_polls: polls(settings.detail_timeout()),
            expand_wait: settings.expand_wait(),
            min_chars: settings.min_description_chars,
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::from_settings(&ExtractionSettings::default())
    }
}

/// Result of one Activated..Extracted pass.
struct Attempt {
    id: String,
    degraded: bool,
    text: Option<String>,
}

pub struct ExtractionMachine {
    timing: Timing,
}

impl ExtractionMachine {
    pub fn new(timing: Timing) -> Self {
        Self { timing }
    }

    /// Extracts items in `window`, clamped to the blocks currently rendered.
    /// Cancellation is honoured between items only.
    pub fn run<P: Panel + ?Sized>(
        &self,
        panel: &mut P,
        window: Range<usize>,
        cancel: &CancelFlag,
    ) -> ExtractionReport {
        let mut report = ExtractionReport::default();

        let total = match panel.block_count() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "could not count listing blocks");
                report.warnings.push(format!("could not count listing blocks: {}", e));
                0
            }
        };
        report.total_blocks = total;

        let end = window.end.min(total);
        let mut recorded_urls = HashSet::new();
        for index in window.start..end {
            if cancel.is_cancelled() {
                debug!(index, "cancelled before item");
                report.cancelled = true;
                break;
            }
            let mut outcome = self.extract_item(panel, index, &mut report.warnings);
            let stale = matches!(
                &outcome,
                ItemOutcome::Recorded(item) if item.degraded && recorded_urls.contains(&item.url)
            );
            if stale {
                self.note(&mut report.warnings, index, "panel still shows an earlier item");
                outcome = ItemOutcome::Skipped {
                    index,
                    reason: SkipReason::StaleIdentifier,
                };
            } else if let ItemOutcome::Recorded(item) = &outcome {
                recorded_urls.insert(item.url.clone());
            }
            report.outcomes.push(outcome);
        }

        report
    }

    fn extract_item<P: Panel + ?Sized>(
        &self,
        panel: &mut P,
        index: usize,
        warnings: &mut Vec<String>,
    ) -> ItemOutcome {
        // Located
        let summary = match panel.block_summary(index) {
            Ok(Some(summary)) => summary,
            Ok(None) | Err(_) => {
                self.note(warnings, index, "block no longer in the list");
                return ItemOutcome::Skipped {
                    index,
                    reason: SkipReason::Missing,
                };
            }
        };

        let Some(first) = self.attempt(panel, index, warnings) else {
            return ItemOutcome::Skipped {
                index,
                reason: SkipReason::ActivationFailed,
            };
        };

        // Verified
        let current = panel.navigable_id().unwrap_or_default();
        let (attempt, retried) = if current == first.id {
            (first, false)
        } else {
            self.note(
                warnings,
                index,
                &format!("panel moved from '{}' to '{}', retrying once", first.id, current),
            );
            match self.attempt(panel, index, warnings) {
                Some(second) => (second, true),
                None => {
                    return ItemOutcome::Skipped {
                        index,
                        reason: SkipReason::ActivationFailed,
                    };
                }
            }
        };

        if attempt.id.trim().is_empty() {
            self.note(warnings, index, "no navigable identifier");
            return ItemOutcome::Skipped {
                index,
                reason: SkipReason::NoIdentifier,
            };
        }

        let description = attempt
            .text
            .unwrap_or_else(|| EMPTY_DESCRIPTION.to_string());

        ItemOutcome::Recorded(ExtractedItem {
            index,
            title: summary.title,
            company: summary.company,
            description,
            url: panel.listing_url(&attempt.id),
            degraded: attempt.degraded,
            retried,
        })
    }

    /// Activated, Targeted, Expanded, Extracted. `None` if the block could
    /// not be activated at all.
    fn attempt<P: Panel + ?Sized>(
        &self,
        panel: &mut P,
        index: usize,
        warnings: &mut Vec<String>,
    ) -> Option<Attempt> {
        let before = panel.navigable_id().unwrap_or_default();

        // Activated
        if let Err(e) = panel.activate(index, ActivationTarget::Block) {
            debug!(index, error = %e, "activation failed, trying fallback target");
            if let Err(e) = panel.activate(index, ActivationTarget::Fallback) {
                self.note(warnings, index, &format!("activation failed: {}", e));
                return None;
            }
        }

        // Targeted
        let mut id = before.clone();
        let mut changed = false;
        for poll in 0..self.timing.target_polls {
            if poll > 0 {
                panel.pause(self.timing.poll_interval);
            }
            if let Ok(now) = panel.navigable_id() {
                id = now;
                if id != before {
                    changed = true;
                    break;
                }
            }
        }
        if !changed {
            self.note(
                warnings,
                index,
                "identifier did not change after activation, using current one",
            );
        }

        // Expanded
        match panel.expand_full_text() {
            Ok(true) => panel.pause(self.timing.expand_wait),
            Ok(false) => debug!(index, "no expand control"),
            Err(e) => debug!(index, error = %e, "expand failed"),
        }

        // Extracted
        let mut text = None;
        for poll in 0..self.timing.detail_polls {
            if poll > 0 {
                panel.pause(self.timing.poll_interval);
            }
            match panel.read_detail_text() {
                Ok(Some(t)) if t.trim().chars().count() > self.timing.min_chars => {
                    text = Some(t.trim().to_string());
                    break;
                }
                Ok(_) => {}
                Err(e) => debug!(index, error = %e, "detail read failed"),
            }
        }
        if text.is_none() {
            self.note(warnings, index, "description below minimum length");
        }

        Some(Attempt {
            id,
            degraded: !changed,
            text,
        })
    }

    fn note(&self, warnings: &mut Vec<String>, index: usize, message: &str) {
        let err = ScoutError::Desync {
            index,
            message: message.to_string(),
        };
        warn!(index, "{}", message);
        warnings.push(err.to_string());
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakePanel;
    use super::*;

    fn machine() -> ExtractionMachine {
        ExtractionMachine::new(Timing {
            poll_interval: Duration::from_millis(1),
            target_polls: 4,
            detail_polls: 3,
            expand_wait: Duration::from_millis(1),
            min_chars: 10,
        })
    }

    fn only_recorded(report: &ExtractionReport) -> Vec<ExtractedItem> {
        report.recorded().cloned().collect()
    }

    #[test]
    fn test_records_every_item_in_window() {
        let mut panel = FakePanel::with_jobs(5);
        let report = machine().run(&mut panel, 1..4, &CancelFlag::new());

        let items = only_recorded(&report);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].url, "https://fake.example/jobs#job-1");
        assert_eq!(items[0].title, "Job 1");
        assert!(items[2].description.contains("job 3"));
        assert!(items.iter().all(|i| !i.degraded && !i.retried));
        assert_eq!(report.total_blocks, 5);
        assert_eq!(report.processed(), 3);
    }

    #[test]
    fn test_identifier_changing_on_second_poll_is_recorded() {
        let mut panel = FakePanel::with_jobs(1);
        panel.delay = 1;
        let report = machine().run(&mut panel, 0..1, &CancelFlag::new());

        let items = only_recorded(&report);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://fake.example/jobs#job-0");
        assert!(!items[0].degraded);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_stale_panel_retries_exactly_once() {
        let mut panel = FakePanel::with_jobs(1);
        panel.jumps.insert("job-0".to_string(), 1);
        let report = machine().run(&mut panel, 0..1, &CancelFlag::new());

        let items = only_recorded(&report);
        assert_eq!(items.len(), 1);
        assert!(items[0].retried);
        assert_eq!(items[0].url, "https://fake.example/jobs#job-0");
        assert!(items[0].description.contains("job 0"));
        assert_eq!(panel.activations.len(), 2);
    }

    #[test]
    fn test_stale_again_is_accepted_after_one_retry() {
        let mut panel = FakePanel::with_jobs(1);
        panel.jumps.insert("job-0".to_string(), 5);
        let report = machine().run(&mut panel, 0..1, &CancelFlag::new());

        assert_eq!(panel.activations.len(), 2);
        let items = only_recorded(&report);
        assert_eq!(items.len(), 1);
        assert!(items[0].retried);
        assert_eq!(items[0].url, "https://fake.example/jobs#job-0");
    }

    #[test]
    fn test_missing_block_is_skipped_and_batch_continues() {
        let mut panel = FakePanel::with_jobs(3);
        panel.blocks[1] = None;
        let report = machine().run(&mut panel, 0..3, &CancelFlag::new());

        assert_eq!(report.processed(), 3);
        assert_eq!(report.skipped(), 1);
        assert_eq!(
            report.outcomes[1],
            ItemOutcome::Skipped {
                index: 1,
                reason: SkipReason::Missing
            }
        );
        assert_eq!(only_recorded(&report).len(), 2);
    }

    #[test]
    fn test_activation_falls_back_once() {
        let mut panel = FakePanel::with_jobs(2);
        panel.fail_block.insert(0);
        panel.fail_block.insert(1);
        panel.fail_fallback.insert(1);
        let report = machine().run(&mut panel, 0..2, &CancelFlag::new());

        assert!(matches!(report.outcomes[0], ItemOutcome::Recorded(_)));
        assert_eq!(
            report.outcomes[1],
            ItemOutcome::Skipped {
                index: 1,
                reason: SkipReason::ActivationFailed
            }
        );
        assert_eq!(
            panel.activations,
            vec![
                (0, ActivationTarget::Block),
                (0, ActivationTarget::Fallback),
                (1, ActivationTarget::Block),
                (1, ActivationTarget::Fallback),
            ]
        );
    }

    #[test]
    fn test_unchanged_identifier_is_degraded_not_fatal() {
        let mut panel = FakePanel::with_jobs(1);
        panel.stuck = true;
        panel.current = "job-0".to_string();
        let report = machine().run(&mut panel, 0..1, &CancelFlag::new());

        let items = only_recorded(&report);
        assert_eq!(items.len(), 1);
        assert!(items[0].degraded);
        assert!(report.warnings.iter().any(|w| w.contains("did not change")));
    }

    #[test]
    fn test_unchanged_identifier_never_reuses_previous_item() {
        let mut panel = FakePanel::with_jobs(3);
        panel.stuck_on.insert(1);
        let report = machine().run(&mut panel, 0..3, &CancelFlag::new());

        assert_eq!(
            report.outcomes[1],
            ItemOutcome::Skipped {
                index: 1,
                reason: SkipReason::StaleIdentifier
            }
        );
        let items = only_recorded(&report);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://fake.example/jobs#job-0");
        assert_eq!(items[0].title, "Job 0");
        assert_eq!(items[1].url, "https://fake.example/jobs#job-2");
        assert_eq!(report.processed(), 3);
    }

    #[test]
    fn test_no_identifier_at_all_is_skipped() {
        let mut panel = FakePanel::with_jobs(1);
        panel.stuck = true;
        let report = machine().run(&mut panel, 0..1, &CancelFlag::new());
        assert_eq!(
            report.outcomes[0],
            ItemOutcome::Skipped {
                index: 0,
                reason: SkipReason::NoIdentifier
            }
        );
    }

    #[test]
    fn test_short_description_gets_placeholder() {
        let mut panel = FakePanel::with_jobs(1);
        panel.texts.insert("job-0".to_string(), "tiny".to_string());
        let report = machine().run(&mut panel, 0..1, &CancelFlag::new());

        let items = only_recorded(&report);
        assert_eq!(items[0].description, EMPTY_DESCRIPTION);
        assert_eq!(items[0].url, "https://fake.example/jobs#job-0");
    }

    #[test]
    fn test_expand_control_is_used_when_present() {
        let mut panel = FakePanel::with_jobs(2);
        panel.has_expand = true;
        machine().run(&mut panel, 0..2, &CancelFlag::new());
        assert_eq!(panel.expands, 2);
    }

    #[test]
    fn test_window_is_clamped_to_rendered_blocks() {
        let mut panel = FakePanel::with_jobs(2);
        let report = machine().run(&mut panel, 1..9, &CancelFlag::new());
        assert_eq!(report.processed(), 1);
    }

    #[test]
    fn test_cancel_stops_between_items() {
        let mut panel = FakePanel::with_jobs(3);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = machine().run(&mut panel, 0..3, &cancel);
        assert!(report.cancelled);
        assert_eq!(report.processed(), 0);
        assert!(panel.activations.is_empty());
    }

    #[test]
    fn test_timing_from_settings_rounds_up() {
        let settings = ExtractionSettings {
            target_timeout_ms: 1000,
            detail_timeout_ms: 10,
            poll_interval_ms: 300,
            ..ExtractionSettings::default()
        };
        let timing = Timing::from_settings(&settings);
        assert_eq!(timing.target_polls, 4);
        assert_eq!(timing.detail_polls, 1);
    }
}
