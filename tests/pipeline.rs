use anyhow::Result;
use std::time::Duration;
use tempfile::TempDir;

use scout::batch::BatchController;
use scout::config::Settings;
use scout::extraction::{
    ActivationTarget, BlockSummary, ExtractionMachine, ItemOutcome, Panel, Timing,
};
use scout::models::{EMPTY_DESCRIPTION, Factor, ListingCandidate};
use scout::profile::{ListKind, Profile};
use scout::sources::{BatchConstraints, FetchOutcome, SearchQuery, SourceAdapter, SyntheticAdapter};
use scout::store::MergeStore;
use scout::Pipeline;

const LONG: &str =
    "Backend Developer to build Python and SQL services. Renta $2.000.000. 3 años de experiencia.";

/// A results list where selecting an item updates the address fragment
/// immediately. `None` entries have vanished from the page.
struct ListPanel {
    items: Vec<Option<(String, String, String)>>,
    current: String,
    /// Item whose panel jumps away once right after being read.
    jumpy: Option<String>,
    /// Block whose activation leaves the previous item on screen.
    stuck: Option<usize>,
}

impl Panel for ListPanel {
    fn block_count(&mut self) -> Result<usize> {
        Ok(self.items.len())
    }

    fn block_summary(&mut self, index: usize) -> Result<Option<BlockSummary>> {
        Ok(self.items.get(index).cloned().flatten().map(|(_, title, _)| BlockSummary {
            title,
            company: Some("Andes Digital".to_string()),
        }))
    }

    fn activate(&mut self, index: usize, _target: ActivationTarget) -> Result<()> {
        if self.stuck == Some(index) {
            return Ok(());
        }
        if let Some(Some((id, _, _))) = self.items.get(index) {
            self.current = id.clone();
        }
        Ok(())
    }

    fn navigable_id(&mut self) -> Result<String> {
        Ok(self.current.clone())
    }

    fn expand_full_text(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn read_detail_text(&mut self) -> Result<Option<String>> {
        let text = self
            .items
            .iter()
            .flatten()
            .find(|(id, _, _)| *id == self.current)
            .map(|(_, _, text)| text.clone());
        if self.jumpy.as_deref() == Some(self.current.as_str()) {
            self.jumpy = None;
            self.current = "somewhere-else".to_string();
        }
        Ok(text)
    }

    fn listing_url(&self, id: &str) -> String {
        format!("https://board.example/search#{}", id)
    }

    fn pause(&mut self, _duration: Duration) {}
}

/// Runs the extraction protocol over a fresh page on every fetch.
#[derive(Default)]
struct PanelSource {
    stuck: Option<usize>,
}

impl PanelSource {
    fn page(&self) -> ListPanel {
        ListPanel {
            items: vec![
                Some(("a1".into(), "Backend Developer".into(), LONG.into())),
                Some(("a2".into(), "Data Engineer".into(), "too short".into())),
                None,
                Some(("a4".into(), "Senior Backend Developer".into(), LONG.into())),
            ],
            current: String::new(),
            jumpy: Some("a4".to_string()),
            stuck: self.stuck,
        }
    }
}

impl SourceAdapter for PanelSource {
    fn name(&self) -> &str {
        "panel"
    }

    fn fetch(
        &mut self,
        _query: &SearchQuery,
        constraints: &BatchConstraints,
    ) -> Result<FetchOutcome> {
        let timing = Timing {
            poll_interval: Duration::from_millis(1),
            target_polls: 2,
            detail_polls: 2,
            expand_wait: Duration::from_millis(1),
            min_chars: 20,
        };
        let mut panel = self.page();
        let window = constraints.window.clone();
        let report = ExtractionMachine::new(timing).run(&mut panel, window, &constraints.cancel);

        let mut outcome = FetchOutcome {
            processed: report.processed(),
            skipped: report.skipped(),
            cancelled: report.cancelled,
            ..FetchOutcome::default()
        };
        if report.total_blocks < constraints.window.end {
            outcome.total_known = Some(report.total_blocks);
        }
        outcome.degraded = report.warnings;
        for item in report.outcomes {
            if let ItemOutcome::Recorded(item) = item {
                outcome.candidates.push(ListingCandidate {
                    title: item.title,
                    company: item.company,
                    raw_text: item.description,
                    source_url: item.url,
                    degraded: item.degraded,
                });
            }
        }
        Ok(outcome)
    }
}

fn settings_in(dir: &TempDir) -> Settings {
    Settings {
        data_dir: Some(dir.path().to_path_buf()),
        ..Settings::default()
    }
}

fn open(settings: &Settings, adapter: Box<dyn SourceAdapter>) -> Pipeline {
    let store = MergeStore::open(&settings.listings_path()).unwrap();
    let cursor = BatchController::load_cursor(&settings.cursor_path());
    Pipeline::new(store, adapter, BatchController::with_cursor(3, cursor), settings)
}

#[test]
fn test_rendered_protocol_feeds_the_store() {
    let dir = TempDir::new().unwrap();
    let settings = settings_in(&dir);
    let mut pipeline = open(&settings, Box::new(PanelSource::default()));

    let first = pipeline.run_batch("backend", "Chile").unwrap();
    assert_eq!(first.recorded, 2);
    assert_eq!(first.skipped, 1);
    assert_eq!(first.listings[0].url, "https://board.example/search#a1");
    assert_eq!(first.listings[1].description, EMPTY_DESCRIPTION);
    assert!(!first.exhausted);

    // The stale panel on a4 costs one retry, not the item.
    let second = pipeline.run_batch("backend", "Chile").unwrap();
    assert_eq!(second.recorded, 1);
    assert_eq!(second.listings[0].url, "https://board.example/search#a4");
    assert!(second.degraded.iter().any(|w| w.contains("retrying once")));
    assert!(second.exhausted);

    assert_eq!(pipeline.snapshot().len(), 3);
    let scores = pipeline.score_all(&Profile::default());
    assert_eq!(scores.len(), 3);
    assert!(scores.iter().all(|s| s.total_score == s.sub_score_sum()));
}

#[test]
fn test_stuck_panel_does_not_rename_the_previous_listing() {
    let mut pipeline = Pipeline::new(
        MergeStore::in_memory(),
        Box::new(PanelSource { stuck: Some(1) }),
        BatchController::new(2),
        &Settings::default(),
    );
    let report = pipeline.run_batch("backend", "Chile").unwrap();

    assert_eq!(report.recorded, 1);
    assert_eq!(report.skipped, 1);
    let a1 = pipeline.store().get("https://board.example/search#a1").unwrap();
    assert_eq!(a1.title, "Backend Developer");
    assert_eq!(pipeline.store().len(), 1);

    assert!(report.degraded.iter().any(|w| w.contains("earlier item")));
}

#[test]
fn test_repeated_runs_never_lose_descriptions() {
    let dir = TempDir::new().unwrap();
    let settings = settings_in(&dir);

    let mut pipeline = open(&settings, Box::new(PanelSource::default()));
    pipeline.run_batch("backend", "Chile").unwrap();
    let url = "https://board.example/search#a1";
    let before = pipeline.store().get(url).unwrap().clone();

    // Same listing again, this time without a readable description.
    struct Degraded;
    impl SourceAdapter for Degraded {
        fn name(&self) -> &str {
            "panel"
        }
        fn fetch(&mut self, _: &SearchQuery, _: &BatchConstraints) -> Result<FetchOutcome> {
            Ok(FetchOutcome {
                candidates: vec![ListingCandidate {
                    title: String::new(),
                    company: None,
                    raw_text: EMPTY_DESCRIPTION.to_string(),
                    source_url: "https://board.example/search#a1".to_string(),
                    degraded: false,
                }],
                processed: 1,
                total_known: Some(1),
                ..FetchOutcome::default()
            })
        }
    }

    let mut again = open(&settings, Box::new(Degraded));
    again.reset_cursor().unwrap();
    let report = again.run_batch("backend", "Chile").unwrap();
    assert_eq!(report.inserted, 0);

    let after = again.store().get(url).unwrap();
    assert_eq!(after.description, before.description);
    assert_eq!(after.title, before.title);
    assert_eq!(after.company, before.company);
    assert_eq!(after.first_seen, before.first_seen);
    assert!(after.last_updated >= before.last_updated);
}

#[test]
fn test_unknown_fields_survive_a_run() {
    let dir = TempDir::new().unwrap();
    let settings = settings_in(&dir);
    std::fs::write(
        settings.listings_path(),
        r#"{
            "lastBatchTimestamp": null,
            "exportedBy": "other-tool",
            "listings": {
                "synthetic://keep/1": {
                    "url": "synthetic://keep/1",
                    "title": "Kept",
                    "company": "Old Co",
                    "description": "kept as is",
                    "lastUpdated": "2024-01-01T00:00:00Z",
                    "starred": true
                }
            }
        }"#,
    )
    .unwrap();

    let mut pipeline = open(&settings, Box::new(SyntheticAdapter::new(1, 6)));
    pipeline.run_batch("Data Engineer", "Chile").unwrap();

    let raw = std::fs::read_to_string(settings.listings_path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["exportedBy"], "other-tool");
    assert_eq!(json["listings"]["synthetic://keep/1"]["starred"], true);
    assert!(json["lastBatchTimestamp"].is_string());
    assert_eq!(json["listings"].as_object().unwrap().len(), 4);
}

#[test]
fn test_load_more_resumes_after_restart() {
    let dir = TempDir::new().unwrap();
    let settings = settings_in(&dir);

    let mut seen = Vec::new();
    for _ in 0..4 {
        let mut pipeline = open(&settings, Box::new(SyntheticAdapter::new(5, 10)));
        let report = pipeline.run_batch("Backend Developer", "Chile").unwrap();
        seen.extend(report.listings.into_iter().map(|l| l.url));
    }
    assert_eq!(seen.len(), 10);
    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 10);

    let mut pipeline = open(&settings, Box::new(SyntheticAdapter::new(5, 10)));
    assert!(pipeline.run_batch("Backend Developer", "Chile").unwrap().exhausted);

    // A different query starts over.
    let report = pipeline.run_batch("Data Engineer", "Chile").unwrap();
    assert_eq!(report.recorded, 3);
}

#[test]
fn test_profile_edits_change_ranking() {
    let mut pipeline = Pipeline::new(
        MergeStore::in_memory(),
        Box::new(PanelSource::default()),
        BatchController::new(4),
        &Settings::default(),
    );
    pipeline.run_batch("any", "").unwrap();

    // Only the role factor can score with this profile.
    let mut profile = Profile {
        roles: vec!["Data Engineer".to_string(), "Backend Developer".to_string()],
        skills: vec![],
        benefits: vec![],
        ..Profile::default()
    };
    profile.set_salary_range(3_000_000, 4_000_000).unwrap();
    profile.set_experience_range(10, 12).unwrap();
    profile.set_priority(Factor::Experience, 1).unwrap();
    profile.set_priority(Factor::Role, 10).unwrap();

    let ranked = pipeline.score_all(&profile);
    assert_eq!(ranked[0].listing_url, "https://board.example/search#a2");
    assert_eq!(ranked[0].total_score, 40);

    profile.reorder(ListKind::Roles, 1, 0);
    let ranked = pipeline.score_all(&profile);
    assert_eq!(ranked[0].listing_url, "https://board.example/search#a1");
    assert_eq!(ranked[0].total_score, 40);
    assert_eq!(ranked[2].listing_url, "https://board.example/search#a2");
    assert!(ranked[1].flags.contains(&"SENIOR".to_string()));
}
