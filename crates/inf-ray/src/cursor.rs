//! Posting updates applied to every record a term matches.

use std::sync::Arc;

use tracing::debug;

use inf_types::{Attribute, RecordId};

use crate::error::RayError;
use crate::eval::{compile, Matches};
use crate::index::IndexMap;
use crate::term::Term;

/// Writes attribute values through the index map.
#[derive(Clone)]
pub struct Cursor {
    index: Arc<IndexMap>,
}

impl Cursor {
    /// Create a cursor over the index.
    pub fn new(index: Arc<IndexMap>) -> Self {
        Self { index }
    }

    fn targets(&self, term: &Term) -> Result<Vec<RecordId>, RayError> {
        // Collected first: the updates below change the postings being read
        Matches::new(compile(term, &self.index)?).collect()
    }

    /// Make `value` the only value of `attr` for every matching record.
    pub fn replace(&self, term: &Term, attr: &Attribute, value: &str) -> Result<usize, RayError> {
        let targets = self.targets(term)?;
        for record in &targets {
            self.index.replace(attr, *record, value)?;
        }
        debug!(attr = %attr, records = targets.len(), "Cursor replace");
        Ok(targets.len())
    }

    /// Add `value` to `attr` of every matching record.
    pub fn add(&self, term: &Term, attr: &Attribute, value: &str) -> Result<usize, RayError> {
        let targets = self.targets(term)?;
        for record in &targets {
            self.index.add(attr, *record, value)?;
        }
        debug!(attr = %attr, records = targets.len(), "Cursor add");
        Ok(targets.len())
    }

    /// Remove `value` from `attr` of every matching record.
    pub fn delete(&self, term: &Term, attr: &Attribute, value: &str) -> Result<usize, RayError> {
        let targets = self.targets(term)?;
        for record in &targets {
            self.index.delete(attr, *record, value)?;
        }
        debug!(attr = %attr, records = targets.len(), "Cursor delete");
        Ok(targets.len())
    }
}
