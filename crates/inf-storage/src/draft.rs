//! Lock-protected staging directory of live writes.
//!
//! Layout: `drafts/<ulid>/<attribute>/{backlog.inf,numbers-*.inf,reverse.log}`
//!
//! A draft collects backlog entries until it is sealed and merged with a
//! source baseline into a destination baseline ("baselining"). Everything
//! written to a draft survives a restart: reopening the directory recovers
//! every entry that was not yet compacted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use inf_types::{Attribute, Precedence};

use crate::backlog::{Backlog, BacklogItem, BACKLOG_FILE};
use crate::baseline::{attributes_in, Baseline, DATA_FILE};
use crate::catalog::{Catalog, CATALOG_FILE};
use crate::data::DataWriter;
use crate::error::StorageError;
use crate::lock::{Lock, LockOptions};
use crate::pipeline::Pipeline;
use crate::reverse::{self, ReverseChange, REVERSE_FILE, REVERSE_LOG};

/// Result of compacting one attribute.
#[derive(Debug, Clone, Serialize)]
pub struct AttributeReport {
    /// The attribute
    pub attribute: String,
    /// Entries in the new catalog
    pub entries: u64,
    /// Entries carried over from the source catalog
    pub from_catalog: u64,
    /// Entries taken from the backlog
    pub from_backlog: u64,
    /// Values present in both sources
    pub ties: u64,
    /// Size of the new data file
    pub bytes: u64,
}

/// Result of merging one draft into a new baseline.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompactionReport {
    /// Version of the baseline produced, 0 when nothing was written
    pub version: u64,
    /// Name of the merged draft
    pub draft: String,
    /// Per-attribute results
    pub attributes: Vec<AttributeReport>,
    /// Wall time spent
    pub elapsed_ms: u64,
}

impl CompactionReport {
    /// Total catalog entries written.
    pub fn entries(&self) -> u64 {
        self.attributes.iter().map(|a| a.entries).sum()
    }

    /// Total backlog entries folded in.
    pub fn from_backlog(&self) -> u64 {
        self.attributes.iter().map(|a| a.from_backlog).sum()
    }

    /// Total bytes written.
    pub fn bytes(&self) -> u64 {
        self.attributes.iter().map(|a| a.bytes).sum()
    }
}

/// One staging directory.
pub struct Draft {
    name: String,
    dir: PathBuf,
    lock: Lock,
    sync: bool,
    backlogs: Mutex<HashMap<Attribute, Arc<Backlog>>>,
}

impl std::fmt::Debug for Draft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Draft").field("dir", &self.dir).finish()
    }
}

impl Draft {
    /// Lock and open the draft in `dir`, creating it if needed.
    pub fn open(dir: &Path, options: &LockOptions, sync: bool) -> Result<Self, StorageError> {
        let lock = Lock::acquire(dir, options)?;
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        debug!(draft = %name, "Draft opened");
        Ok(Self {
            name,
            dir: dir.to_path_buf(),
            lock,
            sync,
            backlogs: Mutex::new(HashMap::new()),
        })
    }

    /// Directory name, a ULID for drafts created by a `Directory`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Draft directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Renew the lock stamp now, whether or not anything was written.
    pub fn touch(&self) -> Result<(), StorageError> {
        self.lock.touch()
    }

    fn attr_dir(&self, attr: &Attribute) -> PathBuf {
        self.dir.join(attr.as_str())
    }

    /// A fresh temporary payload file path for the attribute.
    pub fn numbers(&self, attr: &Attribute) -> Result<PathBuf, StorageError> {
        Ok(self.backlog(attr)?.numbers())
    }

    /// Path of the attribute's reverse change log in this draft.
    pub fn reverse(&self, attr: &Attribute) -> PathBuf {
        self.attr_dir(attr).join(REVERSE_LOG)
    }

    /// Log new value sets of records.
    pub fn append_reverse(
        &self,
        attr: &Attribute,
        changes: &[ReverseChange],
    ) -> Result<(), StorageError> {
        self.lock.refresh()?;
        reverse::append(&self.reverse(attr), changes, self.sync)
    }

    /// Backlog of an attribute, opened (and created) on first use.
    pub fn backlog(&self, attr: &Attribute) -> Result<Arc<Backlog>, StorageError> {
        let mut backlogs = self
            .backlogs
            .lock()
            .map_err(|_| StorageError::Corrupted("draft mutex poisoned".to_string()))?;
        if let Some(backlog) = backlogs.get(attr) {
            return Ok(backlog.clone());
        }
        self.lock.refresh()?;
        let backlog = Arc::new(Backlog::open(&self.attr_dir(attr), self.sync)?);
        backlogs.insert(attr.clone(), backlog.clone());
        Ok(backlog)
    }

    /// Backlog of an attribute if the draft has one, without creating it.
    fn existing_backlog(&self, attr: &Attribute) -> Result<Option<Arc<Backlog>>, StorageError> {
        let cached = self
            .backlogs
            .lock()
            .map_err(|_| StorageError::Corrupted("draft mutex poisoned".to_string()))?
            .get(attr)
            .cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        if self.attr_dir(attr).join(BACKLOG_FILE).exists() {
            return self.backlog(attr).map(Some);
        }
        Ok(None)
    }

    /// Append a pending write for an attribute.
    pub fn append(
        &self,
        attr: &Attribute,
        record: inf_types::RecordId,
        value: &str,
        payload: &[u8],
    ) -> Result<BacklogItem, StorageError> {
        self.lock.refresh()?;
        self.backlog(attr)?.append(record, value, payload)
    }

    /// Attributes this draft has written anything for, sorted.
    pub fn attributes(&self) -> Result<Vec<Attribute>, StorageError> {
        attributes_in(&self.dir)
    }

    /// Whether nothing was written to this draft.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.attributes()?.is_empty())
    }

    /// Payload of the last pending write for a value.
    pub fn latest(&self, attr: &Attribute, value: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.existing_backlog(attr)? {
            Some(backlog) => match backlog.latest(value) {
                Some(item) => Ok(Some(backlog.payload(&item)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Merge `src` with this draft's backlogs into a new baseline at `dest`.
    ///
    /// `dest` must not exist. Attributes without pending writes are carried
    /// forward from `src`. On failure `dest` is left partially written and
    /// must be discarded by the caller; the draft itself is unchanged.
    pub fn baseline(
        &self,
        dest: &Path,
        src: &Baseline,
        precedence: Precedence,
    ) -> Result<CompactionReport, StorageError> {
        self.lock.ensure()?;
        self.lock.touch()?;
        let started = Instant::now();
        fs::create_dir(dest)?;

        let attrs: BTreeSet<Attribute> = self
            .attributes()?
            .into_iter()
            .chain(src.attributes()?)
            .collect();

        let mut report = CompactionReport {
            draft: self.name.clone(),
            ..Default::default()
        };
        for attr in &attrs {
            report
                .attributes
                .push(self.baseline_attribute(dest, src, attr, precedence)?);
        }
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            draft = %self.name,
            src = src.version(),
            attributes = attrs.len(),
            entries = report.entries(),
            elapsed_ms = report.elapsed_ms,
            "Draft baselined"
        );
        Ok(report)
    }

    fn baseline_attribute(
        &self,
        dest: &Path,
        src: &Baseline,
        attr: &Attribute,
        precedence: Precedence,
    ) -> Result<AttributeReport, StorageError> {
        let target = dest.join(attr.as_str());
        fs::create_dir_all(&target)?;

        let log = self.reverse(attr);
        if log.exists() {
            let mut map = reverse::load(&src.reverse(attr))?;
            reverse::replay(&log, &mut map)?;
            reverse::save(&target.join(REVERSE_FILE), &map)?;
        } else {
            reverse::copy(&src.reverse(attr), &target.join(REVERSE_FILE))?;
        }

        // One entry per value, the last one appended wins
        let mut pending: BTreeMap<String, BacklogItem> = BTreeMap::new();
        if let Some(backlog) = self.existing_backlog(attr)? {
            for item in backlog.iter()? {
                let item = item?;
                pending.insert(item.value.clone(), item);
            }
        }

        let catalog = src.catalog(attr)?;
        let mut pipeline = Pipeline::new(
            catalog.iter()?,
            pending.into_values(),
            src.data(attr),
            self.attr_dir(attr),
            DataWriter::create(&target.join(DATA_FILE))?,
            precedence,
        );
        let entries = Catalog::create(&target.join(CATALOG_FILE), pipeline.by_ref())?;
        let stats = pipeline.finish()?;

        debug!(
            attr = %attr,
            entries,
            from_catalog = stats.from_catalog,
            from_backlog = stats.from_backlog,
            ties = stats.ties,
            bytes = stats.bytes,
            "Attribute compacted"
        );
        Ok(AttributeReport {
            attribute: attr.to_string(),
            entries,
            from_catalog: stats.from_catalog,
            from_backlog: stats.from_backlog,
            ties: stats.ties,
            bytes: stats.bytes,
        })
    }

    /// Delete everything written to this draft, keeping the lock.
    pub fn purge(&self) -> Result<(), StorageError> {
        let mut backlogs = self
            .backlogs
            .lock()
            .map_err(|_| StorageError::Corrupted("draft mutex poisoned".to_string()))?;
        backlogs.clear();
        for attr in self.attributes()? {
            fs::remove_dir_all(self.attr_dir(&attr))?;
        }
        debug!(draft = %self.name, "Draft purged");
        Ok(())
    }

    /// Remove the draft directory when it is dropped.
    pub fn expire(&self) {
        self.lock.expire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reverse::ReverseMap;
    use tempfile::TempDir;

    fn author() -> Attribute {
        Attribute::known(Attribute::AUTHOR_NAME)
    }

    fn options() -> LockOptions {
        LockOptions {
            wait: std::time::Duration::from_millis(50),
            ..LockOptions::default()
        }
    }

    /// Publish `draft` on top of `src` as version `src + 1` under `root`.
    fn publish(root: &Path, draft: &Draft, src: &Baseline, precedence: Precedence) -> Baseline {
        let dest = root.join(crate::baseline::version_name(src.version() + 1));
        draft.baseline(&dest, src, precedence).unwrap();
        Baseline::open(&dest).unwrap()
    }

    #[test]
    fn test_alice_and_bob_scenario() {
        let tmp = TempDir::new().unwrap();
        let baselines = tmp.path().join("baselines");
        let empty = Baseline::empty(&baselines, 0).unwrap();

        let first = Draft::open(&tmp.path().join("d1"), &options(), false).unwrap();
        first.append(&author(), 3, "alice", b"alice").unwrap();
        let with_alice = publish(&baselines, &first, &empty, Precedence::Backlog);

        let second = Draft::open(&tmp.path().join("d2"), &options(), false).unwrap();
        second.append(&author(), 7, "bob", b"bob").unwrap();
        let merged = publish(&baselines, &second, &with_alice, Precedence::Backlog);

        let catalog = merged.catalog(&author()).unwrap();
        assert_eq!(catalog.len().unwrap(), 2);
        assert_eq!(merged.payload(&author(), "bob").unwrap(), Some(b"bob".to_vec()));
        assert_eq!(merged.payload(&author(), "alice").unwrap(), Some(b"alice".to_vec()));
        // The source is untouched
        assert_eq!(with_alice.catalog(&author()).unwrap().len().unwrap(), 1);
    }

    #[test]
    fn test_dedup_keeps_last_write() {
        let tmp = TempDir::new().unwrap();
        let baselines = tmp.path().join("baselines");
        let empty = Baseline::empty(&baselines, 0).unwrap();
        let draft = Draft::open(&tmp.path().join("d"), &options(), false).unwrap();

        draft.append(&author(), 1, "alice", b"v1").unwrap();
        draft.append(&author(), 2, "bob", b"b").unwrap();
        draft.append(&author(), 3, "alice", b"v2").unwrap();
        let merged = publish(&baselines, &draft, &empty, Precedence::Backlog);

        let values: Vec<_> = merged
            .catalog(&author())
            .unwrap()
            .iter()
            .unwrap()
            .map(|i| i.unwrap().value)
            .collect();
        assert_eq!(values, vec!["alice", "bob"]);
        assert_eq!(merged.payload(&author(), "alice").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_untouched_attributes_are_carried_forward() {
        let tmp = TempDir::new().unwrap();
        let baselines = tmp.path().join("baselines");
        let empty = Baseline::empty(&baselines, 0).unwrap();
        let text = Attribute::known(Attribute::TEXT);

        let first = Draft::open(&tmp.path().join("d1"), &options(), false).unwrap();
        first.append(&text, 1, "hello", b"1").unwrap();
        let hello = ReverseChange {
            record: 1,
            values: ["hello".to_string()].into_iter().collect(),
        };
        first.append_reverse(&text, &[hello.clone()]).unwrap();
        let mut map = ReverseMap::new();
        map.insert(1, hello.values);
        let v1 = publish(&baselines, &first, &empty, Precedence::Backlog);

        let second = Draft::open(&tmp.path().join("d2"), &options(), false).unwrap();
        second.append(&author(), 1, "alice", b"1").unwrap();
        let v2 = publish(&baselines, &second, &v1, Precedence::Backlog);

        assert_eq!(v2.attributes().unwrap(), vec![author(), text.clone()]);
        assert_eq!(v2.payload(&text, "hello").unwrap(), Some(b"1".to_vec()));
        assert_eq!(reverse::load(&v2.reverse(&text)).unwrap(), map);
    }

    #[test]
    fn test_reopen_recovers_backlog() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("d");
        {
            let draft = Draft::open(&dir, &options(), true).unwrap();
            draft.append(&author(), 7, "bob", b"bob-numbers").unwrap();
        }
        let draft = Draft::open(&dir, &options(), true).unwrap();
        assert_eq!(draft.attributes().unwrap(), vec![author()]);
        assert_eq!(
            draft.latest(&author(), "bob").unwrap(),
            Some(b"bob-numbers".to_vec())
        );
    }

    #[test]
    fn test_second_open_is_locked_out() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("d");
        let _draft = Draft::open(&dir, &options(), false).unwrap();
        assert!(matches!(
            Draft::open(&dir, &options(), false),
            Err(StorageError::LockBusy(_))
        ));
    }

    #[test]
    fn test_latest_does_not_create_dirs() {
        let tmp = TempDir::new().unwrap();
        let draft = Draft::open(&tmp.path().join("d"), &options(), false).unwrap();
        assert_eq!(draft.latest(&author(), "x").unwrap(), None);
        assert!(draft.is_empty().unwrap());
    }

    #[test]
    fn test_numbers_paths_are_fresh() {
        let tmp = TempDir::new().unwrap();
        let draft = Draft::open(&tmp.path().join("d"), &options(), false).unwrap();
        let a = draft.numbers(&author()).unwrap();
        let b = draft.numbers(&author()).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(draft.dir()));
    }

    #[test]
    fn test_purge_and_expire() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("d");
        let draft = Draft::open(&dir, &options(), false).unwrap();
        draft.append(&author(), 1, "alice", b"a").unwrap();

        draft.purge().unwrap();
        assert!(draft.is_empty().unwrap());
        assert_eq!(draft.latest(&author(), "alice").unwrap(), None);

        draft.expire();
        drop(draft);
        assert!(!dir.exists());
    }

    #[test]
    fn test_failed_baseline_leaves_draft_intact() {
        let tmp = TempDir::new().unwrap();
        let baselines = tmp.path().join("baselines");
        let empty = Baseline::empty(&baselines, 0).unwrap();
        let draft = Draft::open(&tmp.path().join("d"), &options(), false).unwrap();
        let item = draft.append(&author(), 1, "alice", b"a").unwrap();
        fs::remove_file(draft.dir().join(author().as_str()).join(&item.path)).unwrap();

        let dest = baselines.join(crate::baseline::version_name(1));
        assert!(draft.baseline(&dest, &empty, Precedence::Backlog).is_err());
        assert_eq!(draft.attributes().unwrap(), vec![author()]);
    }
}
