//! Engine facade: one index directory, one ray and a functor registry.

use std::sync::Arc;

use tracing::{debug, info};

use inf_storage::{CompactionSummary, Directory, DirectoryStats, StorageOptions};
use inf_types::{Notice, RecordId, Settings};

use crate::error::RayError;
use crate::eval::Matches;
use crate::functor::{Functors, SeeReport};
use crate::index::IndexMap;
use crate::parser::parse;
use crate::ray::Ray;
use crate::term::Term;

/// Query and update entry point.
pub struct Engine {
    dir: Arc<Directory>,
    ray: Ray,
    functors: Functors,
}

impl Engine {
    /// Open the index configured in `settings` with the built-in functors.
    pub fn open(settings: &Settings) -> Result<Self, RayError> {
        Self::with_functors(settings, Functors::standard())
    }

    /// Open the index with a custom functor registry.
    pub fn with_functors(settings: &Settings, functors: Functors) -> Result<Self, RayError> {
        let root = settings.expanded_data_dir();
        let dir = Arc::new(Directory::open(&root, StorageOptions::from(settings))?);
        let ray = Ray::new(Arc::new(IndexMap::with_cache(dir.clone(), settings.cache_size)));
        info!(path = %root.display(), functors = functors.names().len(), "Engine opened");
        Ok(Self { dir, ray, functors })
    }

    /// The ray over the live index.
    pub fn ray(&self) -> &Ray {
        &self.ray
    }

    /// The functor registry.
    pub fn functors(&self) -> &Functors {
        &self.functors
    }

    /// Parse a query and build its term.
    pub fn term(&self, query: &str) -> Result<Term, RayError> {
        let expr = parse(query)?;
        self.functors.build(&self.ray, &expr)
    }

    /// Lazily iterate the records matching a query, newest first.
    pub fn matches(&self, query: &str) -> Result<Matches, RayError> {
        let term = self.term(query)?;
        debug!(term = %term, "Query");
        self.ray.find(&term)
    }

    /// All records matching a query, newest first.
    pub fn find(&self, query: &str) -> Result<Vec<RecordId>, RayError> {
        self.matches(query)?.collect()
    }

    /// Dispatch a notice, then write the resulting changes to the backlog.
    pub fn see(&self, notice: &Notice) -> Result<SeeReport, RayError> {
        let report = self.functors.see(&self.ray, notice);
        self.flush()?;
        Ok(report)
    }

    /// Write pending posting lists to the backlog.
    pub fn flush(&self) -> Result<usize, RayError> {
        self.ray.index().flush()
    }

    /// Flush and fold every draft into a new baseline.
    pub fn compact(&self) -> Result<CompactionSummary, RayError> {
        self.ray.index().baseline()
    }

    /// Renew the draft locks while no notices arrive.
    pub fn heartbeat(&self) -> Result<usize, RayError> {
        Ok(self.dir.touch()?)
    }

    /// Storage statistics.
    pub fn stats(&self) -> Result<DirectoryStats, RayError> {
        Ok(self.dir.stats()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inf_types::{Bout, Message};
    use tempfile::TempDir;

    fn settings(tmp: &TempDir) -> Settings {
        let mut settings = Settings::in_dir(tmp.path());
        settings.sync_writes = false;
        settings
    }

    fn post(engine: &Engine, number: u64, bout: u64, author: &str) {
        let notice = Notice::MessagePosted {
            message: Message::new(number, bout, author, "hello"),
            bout: Bout::new(bout, "talk").with_participants(["alice", "bob"]),
        };
        let report = engine.see(&notice).unwrap();
        assert!(report.is_ok(), "{:?}", report.errors);
    }

    #[test]
    fn test_heartbeat_touches_active_draft() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(&settings(&tmp)).unwrap();
        assert_eq!(engine.heartbeat().unwrap(), 1);
        post(&engine, 1, 1, "alice");
        assert_eq!(engine.heartbeat().unwrap(), 1);
    }

    #[test]
    fn test_query_after_notices() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(&settings(&tmp)).unwrap();
        post(&engine, 1, 1, "alice");
        post(&engine, 2, 1, "bob");
        post(&engine, 3, 2, "alice");

        assert_eq!(engine.find("(equal $author.name 'alice')").unwrap(), vec![3, 1]);
        assert_eq!(
            engine
                .find("(and (talks-with 'bob') (not (equal $bout.number 2)))")
                .unwrap(),
            vec![2, 1]
        );
        assert_eq!(engine.find("(limit 1 (always))").unwrap(), vec![3]);
    }

    #[test]
    fn test_survives_reopen_and_compaction() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = Engine::open(&settings(&tmp)).unwrap();
            post(&engine, 10, 1, "alice");
            post(&engine, 11, 1, "bob");
        }
        {
            let engine = Engine::open(&settings(&tmp)).unwrap();
            assert_eq!(engine.find("(equal $author.name 'bob')").unwrap(), vec![11]);
            let summary = engine.compact().unwrap();
            assert!(summary.from_backlog() > 0);
        }
        let engine = Engine::open(&settings(&tmp)).unwrap();
        assert_eq!(engine.find("(always)").unwrap(), vec![11, 10]);
        let stats = engine.stats().unwrap();
        assert!(stats.attributes.iter().all(|a| a.pending == 0));
    }

    #[test]
    fn test_seen_by() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(&settings(&tmp)).unwrap();
        post(&engine, 1, 1, "alice");
        post(&engine, 2, 1, "alice");
        engine
            .see(&Notice::MessageSeen {
                message: Message::new(1, 1, "alice", "hello"),
                identity: "bob".to_string(),
            })
            .unwrap();

        assert_eq!(engine.find("(seen-by 'bob')").unwrap(), vec![1]);
        assert_eq!(
            engine
                .find("(and (talks-with 'bob') (not (seen-by 'bob')))")
                .unwrap(),
            vec![2]
        );
    }

    #[test]
    fn test_displayed_term_parses_back() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(&settings(&tmp)).unwrap();
        post(&engine, 1, 1, "alice");
        post(&engine, 2, 2, "bob");

        let query = "(and (equal $author.name 'alice') (unique $bout.number (not (equal $seen.by 'x'))))";
        let term = engine.term(query).unwrap();
        let shown = term.to_string();
        assert!(shown.contains("$author.name"), "{}", shown);
        assert_eq!(engine.term(&shown).unwrap(), term);
        assert_eq!(engine.find(&shown).unwrap(), vec![1]);
    }

    #[test]
    fn test_query_errors() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(&settings(&tmp)).unwrap();

        assert!(matches!(engine.find("(equal"), Err(RayError::Syntax(_))));
        assert!(matches!(engine.find("(bogus)"), Err(RayError::UnknownFunctor(_))));
        assert!(engine.find("(always)").unwrap().is_empty());
    }
}
