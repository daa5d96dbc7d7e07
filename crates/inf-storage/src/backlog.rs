//! Append-only backlog of pending writes for one attribute.
//!
//! Layout inside the attribute directory of a draft:
//! - `backlog.inf`: JSON lines `{"record":7,"value":"bob","path":"numbers-<ulid>.inf"}`
//! - `numbers-<ulid>.inf`: one payload file per entry, never overwritten
//!
//! An entry line is appended with a single `write_all` while holding the
//! backlog mutex, so concurrent appenders never interleave. A torn trailing
//! line left by a crash is skipped on read.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use ulid::Ulid;

use inf_types::RecordId;

use crate::catalog::MAX_VALUE_LEN;
use crate::error::StorageError;

/// File name of the entry log inside an attribute directory.
pub const BACKLOG_FILE: &str = "backlog.inf";

/// One pending write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogItem {
    /// Record whose update produced this entry
    pub record: RecordId,
    /// Indexed value
    pub value: String,
    /// Payload file name, relative to the attribute directory
    pub path: String,
}

struct Appender {
    file: File,
    latest: HashMap<String, BacklogItem>,
    entries: usize,
}

/// Backlog of one attribute inside one draft.
pub struct Backlog {
    dir: PathBuf,
    sync: bool,
    appender: Mutex<Appender>,
}

impl Backlog {
    /// Open the backlog in `dir`, creating the directory if needed.
    ///
    /// Existing entries are scanned once to rebuild the latest-by-value map.
    pub fn open(dir: &Path, sync: bool) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(BACKLOG_FILE);
        let mut latest = HashMap::new();
        let mut entries = 0;
        let mut iter = BacklogIter::open(&path)?;
        for item in iter.by_ref() {
            let item = item?;
            entries += 1;
            latest.insert(item.value.clone(), item);
        }
        if iter.torn {
            // Later appends must start on a fresh line
            OpenOptions::new().write(true).open(&path)?.set_len(iter.consumed)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(dir = %dir.display(), entries, "Backlog opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            sync,
            appender: Mutex::new(Appender {
                file,
                latest,
                entries,
            }),
        })
    }

    /// A fresh, unused payload file path.
    pub fn numbers(&self) -> PathBuf {
        self.dir.join(format!("numbers-{}.inf", Ulid::new()))
    }

    /// Write `payload` to a new file and append an entry pointing at it.
    pub fn append(
        &self,
        record: RecordId,
        value: &str,
        payload: &[u8],
    ) -> Result<BacklogItem, StorageError> {
        let longest = value.len().max(payload.len());
        if longest > MAX_VALUE_LEN {
            return Err(StorageError::ValueTooLong(longest));
        }
        let path = self.numbers();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StorageError::Corrupted(format!("bad payload path {:?}", path)))?;
        {
            let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
            file.write_all(payload)?;
            if self.sync {
                file.sync_all()?;
            }
        }

        let item = BacklogItem {
            record,
            value: value.to_string(),
            path: name,
        };
        let mut line = serde_json::to_vec(&item)?;
        line.push(b'\n');

        let mut appender = self
            .appender
            .lock()
            .map_err(|_| StorageError::Corrupted("backlog mutex poisoned".to_string()))?;
        appender.file.write_all(&line)?;
        if self.sync {
            appender.file.sync_data()?;
        }
        appender.latest.insert(item.value.clone(), item.clone());
        appender.entries += 1;
        debug!(dir = %self.dir.display(), record, value = %value, "Backlog append");
        Ok(item)
    }

    /// Lazily read all entries, in append order.
    ///
    /// Every call opens a new reader.
    pub fn iter(&self) -> Result<BacklogIter, StorageError> {
        BacklogIter::open(&self.dir.join(BACKLOG_FILE))
    }

    /// The last entry appended for `value`.
    pub fn latest(&self, value: &str) -> Option<BacklogItem> {
        self.appender
            .lock()
            .ok()
            .and_then(|appender| appender.latest.get(value).cloned())
    }

    /// Read the payload of an entry.
    pub fn payload(&self, item: &BacklogItem) -> Result<Vec<u8>, StorageError> {
        Ok(fs::read(self.dir.join(&item.path))?)
    }

    /// Number of entries appended, including superseded ones.
    pub fn len(&self) -> usize {
        self.appender.lock().map(|a| a.entries).unwrap_or(0)
    }

    /// Whether nothing was appended yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct values pending.
    pub fn distinct(&self) -> usize {
        self.appender.lock().map(|a| a.latest.len()).unwrap_or(0)
    }
}

/// Lazy reader over a backlog file.
pub struct BacklogIter {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    line: usize,
    consumed: u64,
    torn: bool,
}

impl BacklogIter {
    fn open(path: &Path) -> Result<Self, StorageError> {
        let reader = match File::open(path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            line: 0,
            consumed: 0,
            torn: false,
        })
    }
}

impl Iterator for BacklogIter {
    type Item = Result<BacklogItem, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        let mut buf = String::new();
        match reader.read_line(&mut buf) {
            Ok(0) => {
                self.reader = None;
                None
            }
            Ok(n) => {
                self.line += 1;
                if !buf.ends_with('\n') {
                    warn!(path = %self.path.display(), line = self.line, "Skipping torn backlog line");
                    self.torn = true;
                    self.reader = None;
                    return None;
                }
                match serde_json::from_str::<BacklogItem>(buf.trim_end()) {
                    Ok(item) => {
                        self.consumed += n as u64;
                        Some(Ok(item))
                    }
                    Err(e) => {
                        self.reader = None;
                        Some(Err(StorageError::Corrupted(format!(
                            "{}:{}: {}",
                            self.path.display(),
                            self.line,
                            e
                        ))))
                    }
                }
            }
            Err(e) => {
                self.reader = None;
                Some(Err(e.into()))
            }
        }
    }
}
