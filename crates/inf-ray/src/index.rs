//! Write-back cache of posting lists over the storage directory.
//!
//! For every attribute the map keeps:
//! - posting lists modified since the last flush, pinned until written
//! - unmodified posting lists in a bounded LRU cache, shared as `Arc<Numbers>`
//! - the reverse map (record -> values), loaded on first use, and the
//!   records whose values changed since the last flush
//!
//! `flush` writes modified posting lists into the active draft's backlog and
//! logs the new value sets of changed records next to them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use tracing::debug;

use inf_storage::{CompactionSummary, Directory, ReverseChange, ReverseMap};
use inf_types::{Attribute, RecordId};

use crate::error::RayError;
use crate::numbers::Numbers;

/// Unmodified posting lists cached per attribute by [`IndexMap::new`].
pub const DEFAULT_CACHE_SIZE: usize = 4096;

struct AttributeIndex {
    /// Value -> (last record that changed it, new list)
    dirty: BTreeMap<String, (RecordId, Arc<Numbers>)>,
    clean: LruCache<String, Arc<Numbers>>,
    reverse: Option<ReverseMap>,
    reverse_dirty: BTreeSet<RecordId>,
}

impl AttributeIndex {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            dirty: BTreeMap::new(),
            clean: LruCache::new(capacity),
            reverse: None,
            reverse_dirty: BTreeSet::new(),
        }
    }
}

/// Posting lists of all attributes.
pub struct IndexMap {
    dir: Arc<Directory>,
    capacity: NonZeroUsize,
    attrs: Mutex<HashMap<Attribute, Arc<Mutex<AttributeIndex>>>>,
}

impl IndexMap {
    /// Create a map over the directory; nothing is loaded yet.
    pub fn new(dir: Arc<Directory>) -> Self {
        Self::with_cache(dir, DEFAULT_CACHE_SIZE)
    }

    /// Create a map caching up to `capacity` unmodified lists per attribute.
    pub fn with_cache(dir: Arc<Directory>, capacity: usize) -> Self {
        Self {
            dir,
            capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            attrs: Mutex::new(HashMap::new()),
        }
    }

    /// The storage directory.
    pub fn directory(&self) -> &Arc<Directory> {
        &self.dir
    }

    fn slot(&self, attr: &Attribute) -> Result<Arc<Mutex<AttributeIndex>>, RayError> {
        let mut attrs = self
            .attrs
            .lock()
            .map_err(|_| RayError::Corrupted("index map mutex poisoned".to_string()))?;
        Ok(attrs
            .entry(attr.clone())
            .or_insert_with(|| Arc::new(Mutex::new(AttributeIndex::new(self.capacity))))
            .clone())
    }

    fn lock(slot: &Mutex<AttributeIndex>) -> Result<MutexGuard<'_, AttributeIndex>, RayError> {
        slot.lock()
            .map_err(|_| RayError::Corrupted("attribute mutex poisoned".to_string()))
    }

    fn load_values(
        &self,
        index: &mut AttributeIndex,
        attr: &Attribute,
        value: &str,
    ) -> Result<Arc<Numbers>, RayError> {
        if let Some((_, numbers)) = index.dirty.get(value) {
            return Ok(numbers.clone());
        }
        if let Some(numbers) = index.clean.get(value) {
            return Ok(numbers.clone());
        }
        let numbers = match self.dir.payload(attr, value)? {
            Some(bytes) => Numbers::from_bytes(&bytes)?,
            None => Numbers::new(),
        };
        let numbers = Arc::new(numbers);
        index.clean.put(value.to_string(), numbers.clone());
        Ok(numbers)
    }

    fn load_reverse<'a>(
        &self,
        index: &'a mut AttributeIndex,
        attr: &Attribute,
    ) -> Result<&'a mut ReverseMap, RayError> {
        if index.reverse.is_none() {
            index.reverse = Some(self.dir.reverse(attr)?);
        }
        Ok(index.reverse.get_or_insert_with(ReverseMap::new))
    }

    fn update<F>(
        &self,
        index: &mut AttributeIndex,
        attr: &Attribute,
        record: RecordId,
        value: &str,
        change: F,
    ) -> Result<bool, RayError>
    where
        F: FnOnce(&mut Numbers) -> bool,
    {
        let mut numbers = self.load_values(index, attr, value)?;
        let changed = change(Arc::make_mut(&mut numbers));
        if changed {
            index.clean.pop(value);
            index.dirty.insert(value.to_string(), (record, numbers));
        }
        Ok(changed)
    }

    /// Posting lists held in memory for an attribute, modified ones included.
    pub fn cached(&self, attr: &Attribute) -> Result<usize, RayError> {
        let slot = self.slot(attr)?;
        let index = Self::lock(&slot)?;
        Ok(index.dirty.len() + index.clean.len())
    }

    /// Records carrying `value`.
    pub fn values(&self, attr: &Attribute, value: &str) -> Result<Arc<Numbers>, RayError> {
        let slot = self.slot(attr)?;
        let mut index = Self::lock(&slot)?;
        self.load_values(&mut index, attr, value)
    }

    /// Values of a record, empty if it has none.
    pub fn attr(&self, attr: &Attribute, record: RecordId) -> Result<BTreeSet<String>, RayError> {
        let slot = self.slot(attr)?;
        let mut index = Self::lock(&slot)?;
        let reverse = self.load_reverse(&mut index, attr)?;
        Ok(reverse.get(&record).cloned().unwrap_or_default())
    }

    /// Make `value` the only value of the record.
    pub fn replace(&self, attr: &Attribute, record: RecordId, value: &str) -> Result<(), RayError> {
        let slot = self.slot(attr)?;
        let mut index = Self::lock(&slot)?;
        let previous = self
            .load_reverse(&mut index, attr)?
            .get(&record)
            .cloned()
            .unwrap_or_default();
        for old in previous.iter().filter(|old| old.as_str() != value) {
            self.update(&mut index, attr, record, old, |n| n.remove(record))?;
        }
        self.update(&mut index, attr, record, value, |n| n.add(record))?;
        let single: BTreeSet<String> = [value.to_string()].into_iter().collect();
        if previous != single {
            self.load_reverse(&mut index, attr)?.insert(record, single);
            index.reverse_dirty.insert(record);
        }
        Ok(())
    }

    /// Add `value` to the values of the record.
    pub fn add(&self, attr: &Attribute, record: RecordId, value: &str) -> Result<(), RayError> {
        let slot = self.slot(attr)?;
        let mut index = Self::lock(&slot)?;
        self.update(&mut index, attr, record, value, |n| n.add(record))?;
        if self
            .load_reverse(&mut index, attr)?
            .entry(record)
            .or_default()
            .insert(value.to_string())
        {
            index.reverse_dirty.insert(record);
        }
        Ok(())
    }

    /// Remove `value` from the values of the record.
    pub fn delete(&self, attr: &Attribute, record: RecordId, value: &str) -> Result<(), RayError> {
        let slot = self.slot(attr)?;
        let mut index = Self::lock(&slot)?;
        self.update(&mut index, attr, record, value, |n| n.remove(record))?;
        let reverse = self.load_reverse(&mut index, attr)?;
        let removed = reverse
            .get_mut(&record)
            .map(|values| values.remove(value))
            .unwrap_or(false);
        if reverse.get(&record).is_some_and(|values| values.is_empty()) {
            reverse.remove(&record);
        }
        if removed {
            index.reverse_dirty.insert(record);
        }
        Ok(())
    }

    /// All indexed records: those that have a message number.
    pub fn records(&self) -> Result<Numbers, RayError> {
        let attr = Attribute::known(Attribute::NUMBER);
        let slot = self.slot(&attr)?;
        let mut index = Self::lock(&slot)?;
        let reverse = self.load_reverse(&mut index, &attr)?;
        Ok(reverse.keys().copied().collect())
    }

    /// Write modified posting lists and reverse changes to the active draft.
    ///
    /// Returns the number of posting lists written. Lists stay modified
    /// until the whole attribute is written, so a failed flush can be retried.
    pub fn flush(&self) -> Result<usize, RayError> {
        let slots: Vec<(Attribute, Arc<Mutex<AttributeIndex>>)> = self
            .attrs
            .lock()
            .map_err(|_| RayError::Corrupted("index map mutex poisoned".to_string()))?
            .iter()
            .map(|(attr, slot)| (attr.clone(), slot.clone()))
            .collect();

        let mut written = 0;
        for (attr, slot) in slots {
            let mut index = Self::lock(&slot)?;
            for (value, (record, numbers)) in &index.dirty {
                self.dir.append(&attr, *record, value, &numbers.to_bytes())?;
            }
            if !index.reverse_dirty.is_empty() {
                let changes: Vec<ReverseChange> = match index.reverse.as_ref() {
                    Some(reverse) => index
                        .reverse_dirty
                        .iter()
                        .map(|record| ReverseChange {
                            record: *record,
                            values: reverse.get(record).cloned().unwrap_or_default(),
                        })
                        .collect(),
                    None => Vec::new(),
                };
                self.dir.append_reverse(&attr, &changes)?;
                index.reverse_dirty.clear();
            }

            let flushed = std::mem::take(&mut index.dirty);
            if !flushed.is_empty() {
                debug!(attr = %attr, values = flushed.len(), "Attribute flushed");
            }
            written += flushed.len();
            for (value, (_, numbers)) in flushed {
                index.clean.put(value, numbers);
            }
        }
        Ok(written)
    }

    /// Flush, then compact the directory into a new baseline.
    pub fn baseline(&self) -> Result<CompactionSummary, RayError> {
        self.flush()?;
        Ok(self.dir.compact()?)
    }
}
