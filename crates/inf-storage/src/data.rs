//! Flat data files.
//!
//! Frame format: `{len: u32 BE}{bytes}`
//! - offsets address the first byte of a frame
//! - frames are appended, never rewritten
//!
//! A catalog maps every value to the offset of exactly one frame holding
//! the payload written for that value.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Append-only writer of a data file, tracking the running offset.
pub struct DataWriter {
    path: PathBuf,
    out: BufWriter<File>,
    offset: u64,
}

impl DataWriter {
    /// Create a new, empty data file. Fails if the file exists.
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            offset: 0,
        })
    }

    /// Append one frame and return the offset it starts at.
    pub fn write(&mut self, bytes: &[u8]) -> Result<u64, StorageError> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            StorageError::Corrupted(format!(
                "frame of {} bytes doesn't fit into {:?}",
                bytes.len(),
                self.path
            ))
        })?;
        let start = self.offset;
        self.out.write_all(&len.to_be_bytes())?;
        self.out.write_all(bytes)?;
        self.offset += 4 + u64::from(len);
        Ok(start)
    }

    /// Bytes written so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Flush buffers and fsync the file.
    pub fn finish(mut self) -> Result<u64, StorageError> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(self.offset)
    }
}

/// Read the frame starting at `offset`.
pub fn read_frame(path: &Path, offset: u64) -> Result<Vec<u8>, StorageError> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if offset + 4 > size {
        return Err(StorageError::Corrupted(format!(
            "offset {} is beyond the end of {:?} ({} bytes)",
            offset, path, size
        )));
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut len = [0u8; 4];
    file.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len) as u64;
    if offset + 4 + len > size {
        return Err(StorageError::Corrupted(format!(
            "frame at {} of {:?} is truncated",
            offset, path
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    file.read_exact(&mut bytes)?;
    Ok(bytes)
}
