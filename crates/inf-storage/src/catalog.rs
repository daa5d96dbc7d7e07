//! Sorted value -> offset index of one attribute.
//!
//! Entry format: `{len: u32 BE}{value: utf-8}{offset: u64 BE}`
//! - entries are strictly ascending by value (byte order), no duplicates
//! - offset addresses a frame in the companion data file
//!
//! A catalog is written once by `Catalog::create` and never modified.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::StorageError;

/// File name of a catalog inside an attribute directory.
pub const CATALOG_FILE: &str = "catalog.inf";

/// Longest value a catalog entry can hold.
pub const MAX_VALUE_LEN: usize = u32::MAX as usize;

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    /// Indexed value
    pub value: String,
    /// Offset of the payload frame in the data file
    pub offset: u64,
}

impl CatalogItem {
    /// Create an item.
    pub fn new(value: impl Into<String>, offset: u64) -> Self {
        Self {
            value: value.into(),
            offset,
        }
    }
}

/// Read handle of one catalog file.
///
/// A missing file reads as an empty catalog.
pub struct Catalog {
    path: PathBuf,
    index: Mutex<Option<Arc<Vec<CatalogItem>>>>,
}

impl Catalog {
    /// Open the catalog at `path`; nothing is read until first use.
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            index: Mutex::new(None),
        }
    }

    /// Write a new catalog from items that must be strictly ascending.
    ///
    /// Returns the number of entries written. The first failing item aborts
    /// the write and its error is returned; the partial file is left for the
    /// caller to discard.
    pub fn create<I>(path: &Path, items: I) -> Result<u64, StorageError>
    where
        I: IntoIterator<Item = Result<CatalogItem, StorageError>>,
    {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let mut out = BufWriter::new(file);
        let mut previous: Option<String> = None;
        let mut count = 0u64;

        for item in items {
            let item = item?;
            if let Some(prev) = &previous {
                if prev.as_bytes() >= item.value.as_bytes() {
                    return Err(StorageError::Corrupted(format!(
                        "catalog {:?} out of order: {:?} after {:?}",
                        path, item.value, prev
                    )));
                }
            }
            let len = u32::try_from(item.value.len())
                .map_err(|_| StorageError::ValueTooLong(item.value.len()))?;
            out.write_all(&len.to_be_bytes())?;
            out.write_all(item.value.as_bytes())?;
            out.write_all(&item.offset.to_be_bytes())?;
            count += 1;
            previous = Some(item.value);
        }

        out.flush()?;
        out.get_ref().sync_all()?;
        debug!(path = %path.display(), entries = count, "Catalog created");
        Ok(count)
    }

    /// Path of the catalog file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lazily iterate entries in ascending order, reading the file as it goes.
    pub fn iter(&self) -> Result<CatalogIter, StorageError> {
        CatalogIter::open(&self.path)
    }

    /// Iterate entries in descending order.
    pub fn rev(&self) -> Result<impl Iterator<Item = CatalogItem>, StorageError> {
        let index = self.index()?;
        Ok((0..index.len()).rev().map(move |i| index[i].clone()))
    }

    /// Offset of `value`, or `NotFound`.
    pub fn seek(&self, value: &str) -> Result<u64, StorageError> {
        let index = self.index()?;
        index
            .binary_search_by(|item| item.value.as_bytes().cmp(value.as_bytes()))
            .map(|pos| index[pos].offset)
            .map_err(|_| {
                StorageError::NotFound(format!("value {:?} in {}", value, self.path.display()))
            })
    }

    /// Number of entries.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.index()?.len())
    }

    /// Whether the catalog has no entries.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    fn index(&self) -> Result<Arc<Vec<CatalogItem>>, StorageError> {
        let mut slot = self
            .index
            .lock()
            .map_err(|_| StorageError::Corrupted("catalog mutex poisoned".to_string()))?;
        if let Some(index) = slot.as_ref() {
            return Ok(index.clone());
        }
        let items = self.iter()?.collect::<Result<Vec<_>, _>>()?;
        let index = Arc::new(items);
        *slot = Some(index.clone());
        Ok(index)
    }
}

/// Lazy ascending reader over a catalog file.
pub struct CatalogIter {
    path: PathBuf,
    reader: Option<BufReader<File>>,
}

impl CatalogIter {
    fn open(path: &Path) -> Result<Self, StorageError> {
        let reader = match File::open(path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            reader,
        })
    }

    fn read_item(reader: &mut BufReader<File>) -> Result<Option<CatalogItem>, std::io::Error> {
        let mut len = [0u8; 4];
        match reader.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let mut value = vec![0u8; u32::from_be_bytes(len) as usize];
        reader.read_exact(&mut value)?;
        let mut offset = [0u8; 8];
        reader.read_exact(&mut offset)?;
        let value = String::from_utf8(value)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        Ok(Some(CatalogItem {
            value,
            offset: u64::from_be_bytes(offset),
        }))
    }
}

impl Iterator for CatalogIter {
    type Item = Result<CatalogItem, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        match Self::read_item(reader) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.reader = None;
                None
            }
            Err(e) => {
                self.reader = None;
                Some(Err(StorageError::Corrupted(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                ))))
            }
        }
    }
}
