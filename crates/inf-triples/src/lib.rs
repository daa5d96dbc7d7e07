//! Generic relation store for the inf index.
//!
//! Holds `(record, relation) -> value` rows that don't fit the attribute
//! catalog, with reverse and joined-reverse lookups. Lookups return lazy
//! [`Rows`]; rows left idle past the grace period are reaped.

pub mod error;
pub mod keys;
pub mod results;
pub mod triples;

pub use error::TriplesError;
pub use results::{ResultSets, Rows};
pub use triples::{Triples, TriplesConfig};
