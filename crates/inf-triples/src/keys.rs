//! Key layout of the three column families kept per relation.
//!
//! - `rel:<name>`: `{id:8}{value}` -> `{vnum:8}`
//! - `rev:<name>`: `{len:1}{value}{!id:8}` -> empty
//! - `lnk:<name>`: `{vnum:8}{!id:8}{value}` -> empty
//!
//! Integers are big-endian. Ids are stored inverted where a scan must yield
//! them in descending order.

use serde::Serialize;

use crate::error::TriplesError;

/// Maximum encoded value length.
pub const MAX_VALUE: usize = 255;

/// Column family holding the rows of a relation.
pub fn rel_cf(name: &str) -> String {
    format!("rel:{}", name)
}

/// Column family indexing a relation by value.
pub fn rev_cf(name: &str) -> String {
    format!("rev:{}", name)
}

/// Column family indexing a relation by numeric value.
pub fn lnk_cf(name: &str) -> String {
    format!("lnk:{}", name)
}

/// A value encoded for storage, with its numeric projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// JSON bytes
    pub bytes: Vec<u8>,
    /// The value itself when it is an unsigned integer, else 0
    pub vnum: u64,
}

/// Encode a value as JSON, enforcing the width limit.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Encoded, TriplesError> {
    let json = serde_json::to_value(value)?;
    let vnum = json.as_u64().unwrap_or(0);
    let bytes = serde_json::to_vec(&json)?;
    if bytes.len() > MAX_VALUE {
        return Err(TriplesError::ValueTooLong(bytes.len()));
    }
    Ok(Encoded { bytes, vnum })
}

/// Prefix of all rows of a record.
pub fn rel_prefix(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Row key.
pub fn rel_key(id: u64, value: &[u8]) -> Vec<u8> {
    let mut key = rel_prefix(id);
    key.extend_from_slice(value);
    key
}

/// Prefix of all reverse entries of a value.
pub fn rev_prefix(value: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(value.len() + 9);
    key.push(value.len() as u8);
    key.extend_from_slice(value);
    key
}

/// Reverse entry key.
pub fn rev_key(value: &[u8], id: u64) -> Vec<u8> {
    let mut key = rev_prefix(value);
    key.extend_from_slice(&(!id).to_be_bytes());
    key
}

/// Prefix of all link entries of a numeric value.
pub fn lnk_prefix(vnum: u64) -> Vec<u8> {
    vnum.to_be_bytes().to_vec()
}

/// Link entry key.
pub fn lnk_key(vnum: u64, id: u64, value: &[u8]) -> Vec<u8> {
    let mut key = lnk_prefix(vnum);
    key.extend_from_slice(&(!id).to_be_bytes());
    key.extend_from_slice(value);
    key
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, TriplesError> {
    bytes
        .get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| TriplesError::Serialization(format!("key too short: {} bytes", bytes.len())))
}

/// Value part of a row key.
pub fn rel_value(key: &[u8]) -> Result<&[u8], TriplesError> {
    key.get(8..)
        .ok_or_else(|| TriplesError::Serialization(format!("row key too short: {} bytes", key.len())))
}

/// Numeric value stored in a row.
pub fn rel_vnum(value: &[u8]) -> Result<u64, TriplesError> {
    read_u64(value, 0)
}

/// Record id of a reverse entry.
pub fn rev_id(key: &[u8]) -> Result<u64, TriplesError> {
    let len = *key
        .first()
        .ok_or_else(|| TriplesError::Serialization("empty reverse key".to_string()))?
        as usize;
    read_u64(key, 1 + len).map(|id| !id)
}

/// Record id of a link entry.
pub fn lnk_id(key: &[u8]) -> Result<u64, TriplesError> {
    read_u64(key, 8).map(|id| !id)
}

/// The smallest key strictly greater than `key`, where a scan resumes.
pub fn after(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    next.push(0);
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vnum_only_for_unsigned() {
        assert_eq!(encode(&42u64).unwrap().vnum, 42);
        assert_eq!(encode(&-3i64).unwrap().vnum, 0);
        assert_eq!(encode("7").unwrap().vnum, 0);
        assert_eq!(encode("text").unwrap().bytes, b"\"text\"".to_vec());
    }

    #[test]
    fn test_value_width_limit() {
        assert!(encode(&"x".repeat(253)).is_ok());
        assert!(matches!(
            encode(&"x".repeat(254)),
            Err(TriplesError::ValueTooLong(256))
        ));
    }

    #[test]
    fn test_reverse_keys_sort_descending_by_id() {
        let value = b"\"a\"";
        let newer = rev_key(value, 9);
        let older = rev_key(value, 2);
        assert!(newer < older);
        assert_eq!(rev_id(&newer).unwrap(), 9);
        assert!(newer.starts_with(&rev_prefix(value)));
        assert!(!rev_key(b"\"ab\"", 9).starts_with(&rev_prefix(value)));
    }

    #[test]
    fn test_link_keys() {
        let key = lnk_key(5, 11, b"5");
        assert!(key.starts_with(&lnk_prefix(5)));
        assert_eq!(lnk_id(&key).unwrap(), 11);
        assert!(lnk_key(5, 12, b"5") < key);
    }
}
