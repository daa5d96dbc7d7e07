//! Posting lists.
//!
//! `Numbers` is the payload stored for every value of an attribute: the
//! records carrying that value, kept in descending order so that the newest
//! records come first.
//!
//! Binary format: consecutive `u64 BE`, strictly descending.

use inf_types::RecordId;

use crate::error::RayError;

/// Descending set of record ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Numbers {
    ids: Vec<RecordId>,
}

impl Numbers {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; returns false if it was already present.
    pub fn add(&mut self, id: RecordId) -> bool {
        match self.position(id) {
            Ok(_) => false,
            Err(pos) => {
                self.ids.insert(pos, id);
                true
            }
        }
    }

    /// Remove a record; returns false if it was absent.
    pub fn remove(&mut self, id: RecordId) -> bool {
        match self.position(id) {
            Ok(pos) => {
                self.ids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Whether the record is present.
    pub fn contains(&self, id: RecordId) -> bool {
        self.position(id).is_ok()
    }

    /// The largest record strictly below `cursor`.
    pub fn shift(&self, cursor: RecordId) -> Option<RecordId> {
        let pos = self.ids.partition_point(|&id| id >= cursor);
        self.ids.get(pos).copied()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether there are no records.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Records, newest first.
    pub fn iter(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.ids.iter().copied()
    }

    /// Encode for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.ids.len() * 8);
        for id in &self.ids {
            bytes.extend_from_slice(&id.to_be_bytes());
        }
        bytes
    }

    /// Decode from storage.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RayError> {
        if bytes.len() % 8 != 0 {
            return Err(RayError::Corrupted(format!(
                "posting list of {} bytes is not a multiple of 8",
                bytes.len()
            )));
        }
        let mut ids = Vec::with_capacity(bytes.len() / 8);
        for chunk in bytes.chunks_exact(8) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            let id = u64::from_be_bytes(raw);
            if ids.last().is_some_and(|&prev| prev <= id) {
                return Err(RayError::Corrupted(format!(
                    "posting list is not descending at {}",
                    id
                )));
            }
            ids.push(id);
        }
        Ok(Self { ids })
    }

    fn position(&self, id: RecordId) -> Result<usize, usize> {
        self.ids.binary_search_by(|other| id.cmp(other))
    }
}

impl FromIterator<RecordId> for Numbers {
    fn from_iter<I: IntoIterator<Item = RecordId>>(iter: I) -> Self {
        let mut ids: Vec<RecordId> = iter.into_iter().collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.dedup();
        Self { ids }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kept_descending_and_unique() {
        let mut numbers = Numbers::new();
        assert!(numbers.add(5));
        assert!(numbers.add(9));
        assert!(numbers.add(1));
        assert!(!numbers.add(5));
        assert_eq!(numbers.iter().collect::<Vec<_>>(), vec![9, 5, 1]);

        assert!(numbers.remove(5));
        assert!(!numbers.remove(5));
        assert!(!numbers.contains(5));
        assert_eq!(numbers.len(), 2);
    }

    #[test]
    fn test_shift_is_strictly_below() {
        let numbers: Numbers = [3, 7, 10].into_iter().collect();
        assert_eq!(numbers.shift(u64::MAX), Some(10));
        assert_eq!(numbers.shift(10), Some(7));
        assert_eq!(numbers.shift(8), Some(7));
        assert_eq!(numbers.shift(3), None);
        assert_eq!(Numbers::new().shift(100), None);
    }

    #[test]
    fn test_codec() {
        let numbers: Numbers = [42, 7, 7, 1000].into_iter().collect();
        let decoded = Numbers::from_bytes(&numbers.to_bytes()).unwrap();
        assert_eq!(decoded, numbers);
        assert_eq!(decoded.len(), 3);

        assert!(Numbers::from_bytes(&[0, 1, 2]).is_err());
        let mut ascending = 1u64.to_be_bytes().to_vec();
        ascending.extend_from_slice(&2u64.to_be_bytes());
        assert!(Numbers::from_bytes(&ascending).is_err());
    }
}
