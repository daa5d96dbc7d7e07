//! Reverse lookup: record -> values of one attribute.
//!
//! Baselines hold a snapshot, `reverse.inf`, a JSON object keyed by record
//! id and always rewritten wholesale (temp file, then rename). Drafts hold
//! `reverse.log` instead: JSON lines, each giving the full value set of one
//! record, empty when the record lost its last value. Compaction replays a
//! draft's log over the source snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use inf_types::RecordId;

use crate::error::StorageError;

/// File name of the reverse snapshot inside a baseline attribute directory.
pub const REVERSE_FILE: &str = "reverse.inf";

/// File name of the reverse change log inside a draft attribute directory.
pub const REVERSE_LOG: &str = "reverse.log";

/// New value set of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseChange {
    /// The record
    pub record: RecordId,
    /// All of its values after the change
    pub values: BTreeSet<String>,
}

/// Values of one attribute, per record.
pub type ReverseMap = BTreeMap<RecordId, BTreeSet<String>>;

/// Load a reverse map; a missing file is an empty map.
pub fn load(path: &Path) -> Result<ReverseMap, StorageError> {
    match File::open(path) {
        Ok(file) => Ok(serde_json::from_reader(BufReader::new(file))?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(ReverseMap::new()),
        Err(e) => Err(e.into()),
    }
}

/// Replace the reverse file at `path` with `map`.
pub fn save(path: &Path, map: &ReverseMap) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("tmp-{}", ulid::Ulid::new()));
    {
        let mut out = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut out, map)?;
        out.flush()?;
        out.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Append changes to the log at `path`, in one write.
pub fn append(path: &Path, changes: &[ReverseChange], sync: bool) -> Result<(), StorageError> {
    if changes.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;
    let mut buf = Vec::new();
    // A torn tail from a crash gets its own line and is skipped on replay
    if file.metadata()?.len() > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            buf.push(b'\n');
        }
    }
    for change in changes {
        serde_json::to_writer(&mut buf, change)?;
        buf.push(b'\n');
    }
    file.write_all(&buf)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

/// Apply the log at `path` to `map`; returns the number of changes applied.
///
/// A missing log applies nothing. Unreadable lines are skipped.
pub fn replay(path: &Path, map: &mut ReverseMap) -> Result<usize, StorageError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut applied = 0;
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        match serde_json::from_str::<ReverseChange>(&line) {
            Ok(change) if change.values.is_empty() => {
                map.remove(&change.record);
                applied += 1;
            }
            Ok(change) => {
                map.insert(change.record, change.values);
                applied += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), line = number + 1, error = %e, "Skipping torn reverse line");
            }
        }
    }
    Ok(applied)
}

/// Copy a reverse file, if the source exists.
pub fn copy(from: &Path, to: &Path) -> Result<bool, StorageError> {
    match fs::copy(from, to) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
