//! RocksDB-backed `(id, relation) -> value` store.
//!
//! Each relation lives in its own three column families (see [`crate::keys`]),
//! created the first time the relation is touched. A row is unique per
//! `(id, value)`; putting it again is a no-op.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rocksdb::{
    BoundColumnFamily, DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options,
    WriteBatch, DEFAULT_COLUMN_FAMILY_NAME,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use inf_types::TriplesSettings;

use crate::error::TriplesError;
use crate::keys;
use crate::results::{Page, ResultSets, Rows};

type Db = DBWithThreadMode<MultiThreaded>;

/// Tuning of the triples store.
#[derive(Debug, Clone)]
pub struct TriplesConfig {
    /// Idle time after which an open result set is closed
    pub grace: Duration,
    /// Rows fetched per page by lazy sequences
    pub page_size: usize,
}

impl Default for TriplesConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            page_size: 64,
        }
    }
}

impl From<&TriplesSettings> for TriplesConfig {
    fn from(settings: &TriplesSettings) -> Self {
        Self {
            grace: Duration::from_secs(settings.grace_secs),
            page_size: settings.page_size.max(1),
        }
    }
}

struct Inner {
    db: Db,
    families: Mutex<BTreeSet<String>>,
    writer: Mutex<()>,
    closed: AtomicBool,
}

impl Inner {
    fn check(&self) -> Result<(), TriplesError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TriplesError::Closed);
        }
        Ok(())
    }

    /// Handle of a column family, creating it on first use.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>, TriplesError> {
        self.check()?;
        if let Some(cf) = self.db.cf_handle(name) {
            return Ok(cf);
        }
        let mut families = self
            .families
            .lock()
            .map_err(|_| TriplesError::Serialization("family registry poisoned".to_string()))?;
        if self.db.cf_handle(name).is_none() {
            self.db.create_cf(name, &Options::default())?;
            families.insert(name.to_string());
            debug!(family = name, "Column family created");
        }
        self.db
            .cf_handle(name)
            .ok_or_else(|| TriplesError::NotFound(format!("column family {}", name)))
    }

    /// Up to `limit` entries whose key starts with `prefix`, from `from` on.
    fn scan(
        &self,
        family: &str,
        prefix: &[u8],
        from: &[u8],
        limit: usize,
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, TriplesError> {
        let cf = self.cf(family)?;
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(from, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) || out.len() == limit {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }
}

/// Prefix scan mapped through a decoder.
struct Scan<T> {
    inner: Arc<Inner>,
    family: String,
    prefix: Vec<u8>,
    resume: Vec<u8>,
    decode: fn(&[u8], &[u8]) -> Result<T, TriplesError>,
}

impl<T> Scan<T> {
    fn new(
        inner: Arc<Inner>,
        family: String,
        prefix: Vec<u8>,
        decode: fn(&[u8], &[u8]) -> Result<T, TriplesError>,
    ) -> Self {
        Self {
            inner,
            family,
            resume: prefix.clone(),
            prefix,
            decode,
        }
    }
}

impl<T: Send> Page<T> for Scan<T> {
    fn fetch(&mut self, limit: usize) -> Result<Vec<T>, TriplesError> {
        let entries = self.inner.scan(&self.family, &self.prefix, &self.resume, limit)?;
        if let Some((last, _)) = entries.last() {
            self.resume = keys::after(last);
        }
        entries
            .iter()
            .map(|(key, value)| (self.decode)(key, value))
            .collect()
    }
}

/// Ids linked through another relation, merged on first fetch.
struct Join {
    inner: Arc<Inner>,
    name: String,
    join: String,
    value: Vec<u8>,
    ids: Option<Vec<u64>>,
}

impl Join {
    fn resolve(&self) -> Result<Vec<u64>, TriplesError> {
        let page = usize::MAX;
        let rev = keys::rev_cf(&self.join);
        let prefix = keys::rev_prefix(&self.value);
        let mut ids = BTreeSet::new();
        for (key, _) in self.inner.scan(&rev, &prefix, &prefix, page)? {
            let link = keys::rev_id(&key)?;
            let lnk = keys::lnk_cf(&self.name);
            let start = keys::lnk_prefix(link);
            for (key, _) in self.inner.scan(&lnk, &start, &start, page)? {
                ids.insert(keys::lnk_id(&key)?);
            }
        }
        Ok(ids.into_iter().rev().collect())
    }
}

impl Page<u64> for Join {
    fn fetch(&mut self, limit: usize) -> Result<Vec<u64>, TriplesError> {
        if self.ids.is_none() {
            self.ids = Some(self.resolve()?);
        }
        let ids = self.ids.get_or_insert_with(Vec::new);
        let take = limit.min(ids.len());
        Ok(ids.drain(..take).collect())
    }
}

fn decode_value<T: DeserializeOwned>(key: &[u8], _value: &[u8]) -> Result<T, TriplesError> {
    Ok(serde_json::from_slice(keys::rel_value(key)?)?)
}

fn decode_rev_id(key: &[u8], _value: &[u8]) -> Result<u64, TriplesError> {
    keys::rev_id(key)
}

/// Relation store.
pub struct Triples {
    inner: Arc<Inner>,
    sets: Arc<ResultSets>,
    config: TriplesConfig,
}

impl Triples {
    /// Open the store in `dir`, creating it if missing.
    pub fn open(dir: &Path, config: TriplesConfig) -> Result<Self, TriplesError> {
        info!(path = %dir.display(), "Opening triples");
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let names = Db::list_cf(&opts, dir)
            .unwrap_or_else(|_| vec![DEFAULT_COLUMN_FAMILY_NAME.to_string()]);
        let db = Db::open_cf(&opts, dir, &names)?;
        let families: BTreeSet<String> = names
            .into_iter()
            .filter(|n| n != DEFAULT_COLUMN_FAMILY_NAME)
            .collect();
        debug!(families = families.len(), "Triples opened");

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                families: Mutex::new(families),
                writer: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
            sets: Arc::new(ResultSets::new(config.grace)),
            config,
        })
    }

    /// The result set tracker.
    pub fn result_sets(&self) -> &Arc<ResultSets> {
        &self.sets
    }

    /// Store a value for a record; returns false when the row already existed.
    pub fn put<T: Serialize + ?Sized>(&self, id: u64, name: &str, value: &T) -> Result<bool, TriplesError> {
        let encoded = keys::encode(value)?;
        let rel = self.inner.cf(&keys::rel_cf(name))?;
        let rev = self.inner.cf(&keys::rev_cf(name))?;
        let lnk = self.inner.cf(&keys::lnk_cf(name))?;
        let rel_key = keys::rel_key(id, &encoded.bytes);

        let _guard = self
            .inner
            .writer
            .lock()
            .map_err(|_| TriplesError::Serialization("writer mutex poisoned".to_string()))?;
        if self.inner.db.get_cf(&rel, &rel_key)?.is_some() {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        batch.put_cf(&rel, &rel_key, encoded.vnum.to_be_bytes());
        batch.put_cf(&rev, keys::rev_key(&encoded.bytes, id), b"");
        batch.put_cf(&lnk, keys::lnk_key(encoded.vnum, id, &encoded.bytes), b"");
        self.inner.db.write(batch)?;
        debug!(id, relation = name, vnum = encoded.vnum, "Triple stored");
        Ok(true)
    }

    /// Whether the record has this value.
    pub fn has<T: Serialize + ?Sized>(&self, id: u64, name: &str, value: &T) -> Result<bool, TriplesError> {
        let encoded = keys::encode(value)?;
        let rel = self.inner.cf(&keys::rel_cf(name))?;
        Ok(self
            .inner
            .db
            .get_cf(&rel, keys::rel_key(id, &encoded.bytes))?
            .is_some())
    }

    /// The first value of the record, by encoded order.
    pub fn get<T: DeserializeOwned>(&self, id: u64, name: &str) -> Result<T, TriplesError> {
        let prefix = keys::rel_prefix(id);
        let found = self.inner.scan(&keys::rel_cf(name), &prefix, &prefix, 1)?;
        match found.first() {
            Some((key, value)) => decode_value(key, value),
            None => Err(TriplesError::NotFound(format!("can't find {} in {}", id, name))),
        }
    }

    /// Every value of the record, lazily.
    pub fn all<T: DeserializeOwned + Send + 'static>(&self, id: u64, name: &str) -> Result<Rows<T>, TriplesError> {
        self.inner.check()?;
        let scan = Scan::new(
            self.inner.clone(),
            keys::rel_cf(name),
            keys::rel_prefix(id),
            decode_value::<T>,
        );
        Ok(Rows::new(Box::new(scan), self.sets.clone(), self.config.page_size))
    }

    /// Records having this value, newest first, lazily.
    pub fn reverse<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<Rows<u64>, TriplesError> {
        self.inner.check()?;
        let encoded = keys::encode(value)?;
        let scan = Scan::new(
            self.inner.clone(),
            keys::rev_cf(name),
            keys::rev_prefix(&encoded.bytes),
            decode_rev_id,
        );
        Ok(Rows::new(Box::new(scan), self.sets.clone(), self.config.page_size))
    }

    /// Records of `name` whose numeric value is a record of `join` having
    /// `value`, newest first.
    pub fn reverse_join<T: Serialize + ?Sized>(
        &self,
        name: &str,
        join: &str,
        value: &T,
    ) -> Result<Rows<u64>, TriplesError> {
        self.inner.check()?;
        let encoded = keys::encode(value)?;
        let source = Join {
            inner: self.inner.clone(),
            name: name.to_string(),
            join: join.to_string(),
            value: encoded.bytes,
            ids: None,
        };
        Ok(Rows::new(Box::new(source), self.sets.clone(), self.config.page_size))
    }

    /// Remove every value of the record; returns how many were removed.
    pub fn clear(&self, id: u64, name: &str) -> Result<usize, TriplesError> {
        let rel = self.inner.cf(&keys::rel_cf(name))?;
        let rev = self.inner.cf(&keys::rev_cf(name))?;
        let lnk = self.inner.cf(&keys::lnk_cf(name))?;
        let prefix = keys::rel_prefix(id);

        let _guard = self
            .inner
            .writer
            .lock()
            .map_err(|_| TriplesError::Serialization("writer mutex poisoned".to_string()))?;
        let rows = self.inner.scan(&keys::rel_cf(name), &prefix, &prefix, usize::MAX)?;
        let mut batch = WriteBatch::default();
        for (key, value) in &rows {
            let bytes = keys::rel_value(key)?;
            let vnum = keys::rel_vnum(value)?;
            batch.delete_cf(&rel, key);
            batch.delete_cf(&rev, keys::rev_key(bytes, id));
            batch.delete_cf(&lnk, keys::lnk_key(vnum, id, bytes));
        }
        self.inner.db.write(batch)?;
        debug!(id, relation = name, removed = rows.len(), "Triples cleared");
        Ok(rows.len())
    }

    /// Relations touched so far, as column family names.
    pub fn families(&self) -> Vec<String> {
        self.inner
            .families
            .lock()
            .map(|f| f.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Flush memtables of every relation to disk.
    pub fn flush(&self) -> Result<(), TriplesError> {
        self.inner.check()?;
        let families = self.families();
        for name in &families {
            if let Some(cf) = self.inner.db.cf_handle(name) {
                self.inner.db.flush_cf(&cf)?;
            }
        }
        debug!(families = families.len(), "Triples flushed");
        Ok(())
    }

    /// Flush, close every open result set and refuse further calls.
    pub fn close(&self) -> Result<(), TriplesError> {
        self.flush()?;
        self.sets.close_all();
        self.inner.closed.store(true, Ordering::SeqCst);
        info!("Triples closed");
        Ok(())
    }
}
