//! Immutable, versioned snapshot of all attribute catalogs.
//!
//! Layout: `baselines/<version:020>/<attribute>/{catalog.inf,data.inf,reverse.inf}`
//! plus `baseline.json` describing how the snapshot was produced.
//!
//! A baseline is published by renaming a fully written temporary directory
//! and is never modified afterwards. Retiring it removes the directory once
//! the last reference is dropped.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use inf_types::Attribute;

use crate::catalog::{Catalog, CATALOG_FILE};
use crate::data::read_frame;
use crate::error::StorageError;
use crate::reverse::REVERSE_FILE;

/// File name of the data file inside an attribute directory.
pub const DATA_FILE: &str = "data.inf";

/// File name of the baseline description.
pub const META_FILE: &str = "baseline.json";

/// Description of how a baseline was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineMeta {
    /// Version number
    pub version: u64,
    /// When it was written
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    /// Drafts merged into it
    #[serde(default)]
    pub drafts: Vec<String>,
}

impl BaselineMeta {
    /// Write the description into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), StorageError> {
        fs::write(dir.join(META_FILE), serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Read the description from `dir`; absent for the empty initial baseline.
    pub fn load(dir: &Path) -> Result<Option<Self>, StorageError> {
        match fs::read(dir.join(META_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Directory name of a baseline version.
pub fn version_name(version: u64) -> String {
    format!("{:020}", version)
}

/// One published baseline.
pub struct Baseline {
    version: u64,
    dir: PathBuf,
    catalogs: Mutex<HashMap<Attribute, Arc<Catalog>>>,
    retired: AtomicBool,
}

impl std::fmt::Debug for Baseline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Baseline")
            .field("version", &self.version)
            .field("dir", &self.dir)
            .finish()
    }
}

impl Baseline {
    /// Open the published baseline in `dir`, whose name is its version.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        let version = dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| {
                StorageError::Corrupted(format!("{} is not a baseline directory", dir.display()))
            })?;
        if !dir.is_dir() {
            return Err(StorageError::NotFound(format!("baseline {}", dir.display())));
        }
        debug!(version, dir = %dir.display(), "Baseline opened");
        Ok(Self {
            version,
            dir: dir.to_path_buf(),
            catalogs: Mutex::new(HashMap::new()),
            retired: AtomicBool::new(false),
        })
    }

    /// Create an empty baseline of the given version under `root`.
    pub fn empty(root: &Path, version: u64) -> Result<Self, StorageError> {
        let dir = root.join(version_name(version));
        fs::create_dir_all(&dir)?;
        Self::open(&dir)
    }

    /// Version number.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Baseline directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory of one attribute.
    pub fn attr_dir(&self, attr: &Attribute) -> PathBuf {
        self.dir.join(attr.as_str())
    }

    /// Catalog of an attribute; empty if the attribute was never compacted.
    pub fn catalog(&self, attr: &Attribute) -> Result<Arc<Catalog>, StorageError> {
        let mut catalogs = self
            .catalogs
            .lock()
            .map_err(|_| StorageError::Corrupted("baseline mutex poisoned".to_string()))?;
        let catalog = catalogs
            .entry(attr.clone())
            .or_insert_with(|| Arc::new(Catalog::open(&self.attr_dir(attr).join(CATALOG_FILE))));
        Ok(catalog.clone())
    }

    /// Path of an attribute's data file.
    pub fn data(&self, attr: &Attribute) -> PathBuf {
        self.attr_dir(attr).join(DATA_FILE)
    }

    /// Path of an attribute's reverse file.
    pub fn reverse(&self, attr: &Attribute) -> PathBuf {
        self.attr_dir(attr).join(REVERSE_FILE)
    }

    /// Payload stored for a value, `None` if the catalog doesn't have it.
    pub fn payload(&self, attr: &Attribute, value: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.catalog(attr)?.seek(value) {
            Ok(offset) => Ok(Some(read_frame(&self.data(attr), offset)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Attributes present in this baseline, sorted.
    pub fn attributes(&self) -> Result<Vec<Attribute>, StorageError> {
        attributes_in(&self.dir)
    }

    /// Schedule the directory for removal once no reference remains.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }
}

impl Drop for Baseline {
    fn drop(&mut self) {
        if !self.retired.load(Ordering::SeqCst) {
            return;
        }
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(version = self.version, "Retired baseline removed"),
            Err(e) => warn!(version = self.version, error = %e, "Failed to remove retired baseline"),
        }
    }
}

/// Attribute subdirectories of `dir`, sorted; other entries are ignored.
pub(crate) fn attributes_in(dir: &Path) -> Result<Vec<Attribute>, StorageError> {
    let mut attrs = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(attrs),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(attr) = entry
            .file_name()
            .to_str()
            .and_then(|name| Attribute::new(name).ok())
        {
            attrs.push(attr);
        }
    }
    attrs.sort();
    Ok(attrs)
}
