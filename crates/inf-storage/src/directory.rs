//! The storage context: one published baseline plus a stack of drafts.
//!
//! Layout under the root:
//! - `baselines/<version:020>/`: published baselines, only the newest is kept
//! - `baselines/.tmp-<version:020>/`: baseline being written
//! - `drafts/<ulid>/`: drafts, oldest first; the last one takes new writes
//!
//! Reads consult drafts newest to oldest, then the baseline. Compaction
//! seals the active draft by rotating in a fresh one, merges each sealed
//! draft into a new baseline, publishes it with an atomic rename and retires
//! the old one. Readers holding the old baseline keep it alive.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use inf_types::{Attribute, Precedence, RecordId, Settings};

use crate::backlog::BacklogItem;
use crate::baseline::{version_name, Baseline, BaselineMeta};
use crate::draft::{CompactionReport, Draft};
use crate::error::StorageError;
use crate::lock::LockOptions;
use crate::reverse::{self, ReverseChange, ReverseMap};

const BASELINES: &str = "baselines";
const DRAFTS: &str = "drafts";
const TMP_PREFIX: &str = ".tmp-";

/// Storage options derived from `Settings`.
#[derive(Debug, Clone, Copy)]
pub struct StorageOptions {
    /// Draft lock timing
    pub lock: LockOptions,
    /// Fsync backlog appends
    pub sync_writes: bool,
    /// Tie-break of the compaction merge
    pub precedence: Precedence,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for StorageOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            lock: LockOptions::from(&settings.lock),
            sync_writes: settings.sync_writes,
            precedence: settings.compaction.precedence,
        }
    }
}

struct Layers {
    baseline: Arc<Baseline>,
    drafts: Vec<Arc<Draft>>,
}

impl Layers {
    fn active(&self) -> Result<&Arc<Draft>, StorageError> {
        self.drafts
            .last()
            .ok_or_else(|| StorageError::Corrupted("no active draft".to_string()))
    }
}

/// Summary of one `Directory::compact` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompactionSummary {
    /// One report per baseline published
    pub reports: Vec<CompactionReport>,
    /// Version of the current baseline afterwards
    pub version: u64,
    /// Wall time spent
    pub elapsed_ms: u64,
}

impl CompactionSummary {
    /// Number of backlog entries folded into baselines.
    pub fn from_backlog(&self) -> u64 {
        self.reports.iter().map(|r| r.from_backlog()).sum()
    }
}

/// Per-attribute numbers reported by `Directory::stats`.
#[derive(Debug, Clone, Serialize)]
pub struct AttributeStats {
    /// The attribute
    pub attribute: String,
    /// Entries in the baseline catalog
    pub catalog_entries: usize,
    /// Backlog entries not compacted yet, across all drafts
    pub pending: usize,
}

/// Storage statistics.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryStats {
    /// Current baseline version
    pub version: u64,
    /// Number of drafts, including the active one
    pub drafts: usize,
    /// Per-attribute numbers
    pub attributes: Vec<AttributeStats>,
}

/// Explicit storage context, shared by reference.
pub struct Directory {
    root: PathBuf,
    options: StorageOptions,
    state: RwLock<Layers>,
    compaction: Mutex<()>,
}

impl Directory {
    /// Open the index rooted at `root`, creating it if needed.
    pub fn open(root: &Path, options: StorageOptions) -> Result<Self, StorageError> {
        let baselines = root.join(BASELINES);
        let drafts_dir = root.join(DRAFTS);
        fs::create_dir_all(&baselines)?;
        fs::create_dir_all(&drafts_dir)?;

        let baseline = Self::latest_baseline(&baselines)?;
        let merged = BaselineMeta::load(baseline.dir())?
            .map(|meta| meta.drafts)
            .unwrap_or_default();

        let mut names: Vec<String> = fs::read_dir(&drafts_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();

        let mut drafts = Vec::new();
        for name in names {
            let dir = drafts_dir.join(&name);
            if merged.contains(&name) {
                // Published before the process stopped
                info!(draft = %name, "Removing draft already merged into baseline");
                fs::remove_dir_all(&dir)?;
                continue;
            }
            drafts.push(Arc::new(Draft::open(&dir, &options.lock, options.sync_writes)?));
        }
        if drafts.is_empty() {
            drafts.push(Arc::new(Self::new_draft(&drafts_dir, &options)?));
        }

        info!(
            root = %root.display(),
            version = baseline.version(),
            drafts = drafts.len(),
            "Directory opened"
        );
        Ok(Self {
            root: root.to_path_buf(),
            options,
            state: RwLock::new(Layers {
                baseline: Arc::new(baseline),
                drafts,
            }),
            compaction: Mutex::new(()),
        })
    }

    /// Pick the newest published baseline, removing abandoned and older ones.
    fn latest_baseline(dir: &Path) -> Result<Baseline, StorageError> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(TMP_PREFIX) {
                warn!(dir = %name, "Removing abandoned temporary baseline");
                fs::remove_dir_all(entry.path())?;
                continue;
            }
            if let Ok(version) = name.parse::<u64>() {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        let newest = match versions.pop() {
            Some(version) => version,
            None => return Baseline::empty(dir, 0),
        };
        for old in versions {
            debug!(version = old, "Removing superseded baseline");
            fs::remove_dir_all(dir.join(version_name(old)))?;
        }
        Baseline::open(&dir.join(version_name(newest)))
    }

    fn new_draft(drafts_dir: &Path, options: &StorageOptions) -> Result<Draft, StorageError> {
        Draft::open(
            &drafts_dir.join(Ulid::new().to_string()),
            &options.lock,
            options.sync_writes,
        )
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Layers>, StorageError> {
        self.state
            .read()
            .map_err(|_| StorageError::Corrupted("directory lock poisoned".to_string()))
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The current baseline; holding it keeps it readable after retirement.
    pub fn baseline(&self) -> Result<Arc<Baseline>, StorageError> {
        Ok(self.read()?.baseline.clone())
    }

    /// Newest payload for a value: drafts newest first, then the baseline.
    pub fn payload(&self, attr: &Attribute, value: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let layers = self.read()?;
        for draft in layers.drafts.iter().rev() {
            if let Some(bytes) = draft.latest(attr, value)? {
                return Ok(Some(bytes));
            }
        }
        layers.baseline.payload(attr, value)
    }

    /// Reverse map of an attribute: the baseline's, with every draft's
    /// changes replayed oldest first.
    pub fn reverse(&self, attr: &Attribute) -> Result<ReverseMap, StorageError> {
        let layers = self.read()?;
        let mut map = reverse::load(&layers.baseline.reverse(attr))?;
        for draft in &layers.drafts {
            reverse::replay(&draft.reverse(attr), &mut map)?;
        }
        Ok(map)
    }

    /// Record a pending write in the active draft.
    pub fn append(
        &self,
        attr: &Attribute,
        record: RecordId,
        value: &str,
        payload: &[u8],
    ) -> Result<BacklogItem, StorageError> {
        let layers = self.read()?;
        layers.active()?.append(attr, record, value, payload)
    }

    /// Log new value sets of records in the active draft.
    pub fn append_reverse(
        &self,
        attr: &Attribute,
        changes: &[ReverseChange],
    ) -> Result<(), StorageError> {
        let layers = self.read()?;
        layers.active()?.append_reverse(attr, changes)
    }

    /// Fold all pending writes into a new baseline.
    ///
    /// Concurrent calls run one after another. Reads and writes continue
    /// while the merge runs.
    pub fn compact(&self) -> Result<CompactionSummary, StorageError> {
        let _guard = self
            .compaction
            .lock()
            .map_err(|_| StorageError::Corrupted("compaction lock poisoned".to_string()))?;
        let started = Instant::now();

        let sealed = {
            let mut layers = self
                .state
                .write()
                .map_err(|_| StorageError::Corrupted("directory lock poisoned".to_string()))?;
            if layers.active()?.is_empty()? && layers.drafts.len() == 1 {
                debug!("Nothing to compact");
                return Ok(CompactionSummary {
                    version: layers.baseline.version(),
                    ..Default::default()
                });
            }
            let fresh = Arc::new(Self::new_draft(&self.root.join(DRAFTS), &self.options)?);
            let sealed = layers.drafts.clone();
            layers.drafts.push(fresh);
            sealed
        };

        let mut summary = CompactionSummary::default();
        for draft in sealed {
            if draft.is_empty()? {
                self.drop_draft(&draft)?;
                continue;
            }
            summary.reports.push(self.publish(&draft)?);
        }
        summary.version = self.baseline()?.version();
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            version = summary.version,
            baselines = summary.reports.len(),
            from_backlog = summary.from_backlog(),
            elapsed_ms = summary.elapsed_ms,
            "Compaction complete"
        );
        Ok(summary)
    }

    /// Merge one sealed draft into a new baseline and swap it in.
    fn publish(&self, draft: &Arc<Draft>) -> Result<CompactionReport, StorageError> {
        let src = self.baseline()?;
        let version = src.version() + 1;
        let baselines = self.root.join(BASELINES);
        let tmp = baselines.join(format!("{}{}", TMP_PREFIX, version_name(version)));
        let dest = baselines.join(version_name(version));

        let written = draft
            .baseline(&tmp, &src, self.options.precedence)
            .and_then(|report| {
                BaselineMeta {
                    version,
                    created: Utc::now(),
                    drafts: vec![draft.name().to_string()],
                }
                .save(&tmp)?;
                fs::rename(&tmp, &dest)?;
                Ok(report)
            });
        let mut report = match written {
            Ok(report) => report,
            Err(e) => {
                if tmp.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&tmp) {
                        warn!(error = %cleanup, "Failed to discard partial baseline");
                    }
                }
                return Err(e);
            }
        };
        report.version = version;

        let published = Arc::new(Baseline::open(&dest)?);
        let old = {
            let mut layers = self
                .state
                .write()
                .map_err(|_| StorageError::Corrupted("directory lock poisoned".to_string()))?;
            layers.drafts.retain(|d| !Arc::ptr_eq(d, draft));
            std::mem::replace(&mut layers.baseline, published)
        };
        old.retire();
        draft.purge()?;
        draft.expire();
        debug!(version, draft = %draft.name(), "Baseline published");
        Ok(report)
    }

    fn drop_draft(&self, draft: &Arc<Draft>) -> Result<(), StorageError> {
        let mut layers = self
            .state
            .write()
            .map_err(|_| StorageError::Corrupted("directory lock poisoned".to_string()))?;
        layers.drafts.retain(|d| !Arc::ptr_eq(d, draft));
        draft.expire();
        Ok(())
    }

    /// Renew the lock of every draft; returns how many were touched.
    ///
    /// Writes renew locks on their own. An idle owner must call this more
    /// often than the lock TTL or its drafts are reclaimed by contenders.
    pub fn touch(&self) -> Result<usize, StorageError> {
        let layers = self.read()?;
        for draft in &layers.drafts {
            draft.touch()?;
        }
        Ok(layers.drafts.len())
    }

    /// Current layout and per-attribute numbers.
    pub fn stats(&self) -> Result<DirectoryStats, StorageError> {
        let layers = self.read()?;
        let mut attrs = layers.baseline.attributes()?;
        for draft in &layers.drafts {
            attrs.extend(draft.attributes()?);
        }
        attrs.sort();
        attrs.dedup();

        let mut attributes = Vec::with_capacity(attrs.len());
        for attr in attrs {
            let mut pending = 0;
            for draft in &layers.drafts {
                if draft.attributes()?.contains(&attr) {
                    pending += draft.backlog(&attr)?.len();
                }
            }
            attributes.push(AttributeStats {
                catalog_entries: layers.baseline.catalog(&attr)?.len()?,
                attribute: attr.to_string(),
                pending,
            });
        }
        Ok(DirectoryStats {
            version: layers.baseline.version(),
            drafts: layers.drafts.len(),
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::Lock;
    use std::time::Duration;
    use tempfile::TempDir;

    fn author() -> Attribute {
        Attribute::known(Attribute::AUTHOR_NAME)
    }

    fn options() -> StorageOptions {
        StorageOptions {
            lock: LockOptions {
                wait: Duration::from_millis(50),
                ..LockOptions::default()
            },
            sync_writes: false,
            precedence: Precedence::Backlog,
        }
    }

    #[test]
    fn test_touch_keeps_idle_drafts_owned() {
        let tmp = TempDir::new().unwrap();
        let lock = LockOptions {
            ttl: Duration::from_millis(300),
            wait: Duration::from_millis(50),
            poll: Duration::from_millis(10),
        };
        let dir = Directory::open(tmp.path(), StorageOptions { lock, ..options() }).unwrap();
        let draft_dir = fs::read_dir(tmp.path().join(DRAFTS))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(dir.touch().unwrap(), 1);
        std::thread::sleep(Duration::from_millis(200));

        // Stamp is 200ms old, so a contender still finds it live
        assert!(matches!(
            Lock::acquire(&draft_dir, &lock),
            Err(StorageError::LockBusy(_))
        ));
    }

    #[test]
    fn test_reads_see_pending_writes() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::open(tmp.path(), options()).unwrap();
        assert_eq!(dir.payload(&author(), "bob").unwrap(), None);

        dir.append(&author(), 7, "bob", b"bob").unwrap();
        assert_eq!(dir.payload(&author(), "bob").unwrap(), Some(b"bob".to_vec()));
    }

    #[test]
    fn test_compact_publishes_new_version() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::open(tmp.path(), options()).unwrap();
        dir.append(&author(), 3, "alice", b"alice").unwrap();
        dir.append(&author(), 7, "bob", b"bob").unwrap();

        let summary = dir.compact().unwrap();
        assert_eq!(summary.version, 1);
        assert_eq!(summary.from_backlog(), 2);
        assert_eq!(dir.baseline().unwrap().version(), 1);
        assert_eq!(dir.payload(&author(), "alice").unwrap(), Some(b"alice".to_vec()));

        let stats = dir.stats().unwrap();
        assert_eq!(stats.drafts, 1);
        assert_eq!(stats.attributes[0].catalog_entries, 2);
        assert_eq!(stats.attributes[0].pending, 0);
    }

    #[test]
    fn test_long_values_keep_compaction_going() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::open(tmp.path(), options()).unwrap();
        let text = Attribute::known(Attribute::TEXT);
        let long = "x".repeat(70_000);
        dir.append(&text, 1, &long, b"one").unwrap();
        assert_eq!(dir.compact().unwrap().version, 1);

        dir.append(&text, 2, "short", b"two").unwrap();
        assert_eq!(dir.compact().unwrap().version, 2);
        assert_eq!(dir.payload(&text, &long).unwrap(), Some(b"one".to_vec()));
        assert_eq!(dir.payload(&text, "short").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn test_compact_without_writes_is_noop() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::open(tmp.path(), options()).unwrap();
        let summary = dir.compact().unwrap();
        assert!(summary.reports.is_empty());
        assert_eq!(summary.version, 0);
    }

    #[test]
    fn test_old_baseline_lives_while_referenced() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::open(tmp.path(), options()).unwrap();
        dir.append(&author(), 3, "alice", b"v1").unwrap();
        dir.compact().unwrap();

        let reader = dir.baseline().unwrap();
        dir.append(&author(), 4, "alice", b"v2").unwrap();
        dir.compact().unwrap();

        assert!(reader.dir().exists());
        assert_eq!(reader.payload(&author(), "alice").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(dir.payload(&author(), "alice").unwrap(), Some(b"v2".to_vec()));

        let old = reader.dir().to_path_buf();
        drop(reader);
        assert!(!old.exists());
    }

    #[test]
    fn test_reopen_keeps_uncompacted_writes() {
        let tmp = TempDir::new().unwrap();
        {
            let dir = Directory::open(tmp.path(), options()).unwrap();
            dir.append(&author(), 1, "alice", b"a").unwrap();
            dir.compact().unwrap();
            dir.append(&author(), 2, "bob", b"b").unwrap();
        }
        let dir = Directory::open(tmp.path(), options()).unwrap();
        assert_eq!(dir.baseline().unwrap().version(), 1);
        assert_eq!(dir.payload(&author(), "alice").unwrap(), Some(b"a".to_vec()));
        assert_eq!(dir.payload(&author(), "bob").unwrap(), Some(b"b".to_vec()));

        dir.compact().unwrap();
        assert_eq!(dir.baseline().unwrap().catalog(&author()).unwrap().len().unwrap(), 2);
    }

    #[test]
    fn test_second_process_is_locked_out() {
        let tmp = TempDir::new().unwrap();
        let _first = Directory::open(tmp.path(), options()).unwrap();
        assert!(matches!(
            Directory::open(tmp.path(), options()),
            Err(StorageError::LockBusy(_))
        ));
    }

    #[test]
    fn test_startup_cleans_leftovers() {
        let tmp = TempDir::new().unwrap();
        {
            let dir = Directory::open(tmp.path(), options()).unwrap();
            dir.append(&author(), 1, "alice", b"a").unwrap();
            dir.compact().unwrap();
        }
        let baselines = tmp.path().join(BASELINES);
        fs::create_dir_all(baselines.join(format!("{}{}", TMP_PREFIX, version_name(2)))).unwrap();
        fs::create_dir_all(baselines.join(version_name(0))).unwrap();

        let dir = Directory::open(tmp.path(), options()).unwrap();
        assert_eq!(dir.baseline().unwrap().version(), 1);
        let left: Vec<_> = fs::read_dir(&baselines).unwrap().collect();
        assert_eq!(left.len(), 1);
    }

    #[test]
    fn test_reverse_replays_drafts_over_baseline() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::open(tmp.path(), options()).unwrap();
        let set = |values: &[&str]| values.iter().map(|v| v.to_string()).collect();
        let change = |record, values: &[&str]| ReverseChange {
            record,
            values: set(values),
        };

        dir.append_reverse(&author(), &[change(1, &["alice"]), change(2, &["bob"])])
            .unwrap();
        dir.append(&author(), 1, "alice", b"a").unwrap();
        dir.compact().unwrap();
        assert_eq!(dir.reverse(&author()).unwrap().len(), 2);

        dir.append_reverse(&author(), &[change(2, &[]), change(3, &["carol"])])
            .unwrap();
        let map = dir.reverse(&author()).unwrap();
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(map[&1], set(&["alice"]));

        dir.compact().unwrap();
        assert_eq!(dir.reverse(&author()).unwrap(), map);
        let baseline = dir.baseline().unwrap();
        assert_eq!(reverse::load(&baseline.reverse(&author())).unwrap(), map);
    }


    #[test]
    fn test_random_writes_match_last_payload() {
        use rand::Rng;
        use std::collections::HashMap;

        let tmp = TempDir::new().unwrap();
        let dir = Directory::open(tmp.path(), options()).unwrap();
        let mut rng = rand::rng();
        let mut expected: HashMap<String, Vec<u8>> = HashMap::new();

        for round in 0..4u64 {
            for i in 0..50u64 {
                let value = format!("v{}", rng.random_range(0..30));
                let payload = format!("{}-{}", round, i).into_bytes();
                dir.append(&author(), round * 100 + i, &value, &payload).unwrap();
                expected.insert(value, payload);
            }
            dir.compact().unwrap();
        }

        let baseline = dir.baseline().unwrap();
        let catalog = baseline.catalog(&author()).unwrap();
        assert_eq!(catalog.len().unwrap(), expected.len());
        for (value, payload) in &expected {
            assert_eq!(
                baseline.payload(&author(), value).unwrap().as_ref(),
                Some(payload)
            );
        }
    }

    #[test]
    fn test_concurrent_writes_during_compaction() {
        let tmp = TempDir::new().unwrap();
        let dir = Arc::new(Directory::open(tmp.path(), options()).unwrap());
        for i in 0..20u64 {
            dir.append(&author(), i, &format!("user-{:02}", i), b"x").unwrap();
        }

        let writer = {
            let dir = dir.clone();
            std::thread::spawn(move || {
                for i in 20..40u64 {
                    dir.append(&author(), i, &format!("user-{:02}", i), b"y").unwrap();
                }
            })
        };
        dir.compact().unwrap();
        writer.join().unwrap();
        dir.compact().unwrap();

        let catalog = dir.baseline().unwrap().catalog(&author()).unwrap();
        assert_eq!(catalog.len().unwrap(), 40);
    }
}
