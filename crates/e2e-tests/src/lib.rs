//! End-to-end test infrastructure for the inf index.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering the full notice-to-query pipeline.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use inf_ray::{Engine, SeeReport};
use inf_triples::{Triples, TriplesConfig};
use inf_types::{Bout, Message, Notice, RecordId, Settings};

/// Shared test harness for E2E tests.
///
/// Owns a temp directory with an index and a triples store in it.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Settings rooted in the temp dir
    pub settings: Settings,
    /// Engine over the index
    pub engine: Arc<Engine>,
}

impl TestHarness {
    /// Create a new harness with default settings and unsynced writes.
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    /// Create a new harness, adjusting settings before anything is opened.
    pub fn with_settings(adjust: impl FnOnce(&mut Settings)) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let mut settings = Settings::in_dir(temp_dir.path());
        settings.sync_writes = false;
        adjust(&mut settings);
        let engine = Arc::new(Engine::open(&settings).expect("Failed to open test engine"));
        Self {
            _temp_dir: temp_dir,
            settings,
            engine,
        }
    }

    /// Close the engine and open the index again from disk.
    ///
    /// Panics if another handle to the engine is still alive, since it
    /// would keep holding the draft lock.
    pub fn reopen(self) -> Self {
        let TestHarness {
            _temp_dir,
            settings,
            engine,
        } = self;
        assert_eq!(Arc::strong_count(&engine), 1, "engine still shared");
        drop(engine);
        let engine = Arc::new(Engine::open(&settings).expect("Failed to reopen engine"));
        Self {
            _temp_dir,
            settings,
            engine,
        }
    }

    /// Open the triples store of this harness.
    pub fn triples(&self) -> Triples {
        self.triples_with(TriplesConfig::from(&self.settings.triples))
    }

    /// Open the triples store with explicit tuning.
    pub fn triples_with(&self, config: TriplesConfig) -> Triples {
        let dir = self.settings.expanded_triples_dir();
        std::fs::create_dir_all(&dir).expect("Failed to create triples dir");
        Triples::open(&dir, config).expect("Failed to open triples")
    }

    /// Deliver a notice; panics if any handler failed.
    pub fn see(&self, notice: &Notice) -> SeeReport {
        let report = self.engine.see(notice).expect("Failed to see notice");
        assert!(report.is_ok(), "handlers failed: {:?}", report.errors);
        report
    }

    /// Run a query; panics on errors.
    pub fn find(&self, query: &str) -> Vec<RecordId> {
        self.engine
            .find(query)
            .unwrap_or_else(|e| panic!("query {} failed: {}", query, e))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Base timestamp of generated messages.
pub const BASE_TS_MS: i64 = 1_706_540_400_000;

/// A "message posted" notice for a bout.
pub fn posted(number: RecordId, bout: &Bout, author: &str, text: &str) -> Notice {
    let date: DateTime<Utc> = Utc
        .timestamp_millis_opt(BASE_TS_MS + number as i64 * 1000)
        .single()
        .unwrap_or_else(Utc::now);
    Notice::MessagePosted {
        message: Message::new(number, bout.number, author, text).with_date(date),
        bout: bout.clone(),
    }
}

/// Create N "message posted" notices in one bout, numbered from `first`.
///
/// Authors take turns in the given order.
pub fn create_test_notices(
    bout: &Bout,
    first: RecordId,
    count: usize,
    authors: &[&str],
    base_text: &str,
) -> Vec<Notice> {
    (0..count)
        .map(|i| {
            let number = first + i as RecordId;
            let author = authors[i % authors.len()];
            posted(number, bout, author, &format!("{} (message {})", base_text, i))
        })
        .collect()
}

/// Deliver all notices through the harness.
pub fn post_all(harness: &TestHarness, notices: &[Notice]) {
    for notice in notices {
        harness.see(notice);
    }
}
