//! Storage engine of the attribute index.
//!
//! Provides filesystem-backed storage with:
//! - Per-attribute catalogs (sorted value -> offset) over flat data files
//! - Append-only backlogs of pending writes inside lock-guarded drafts
//! - Immutable, versioned baselines produced by merging drafts (compaction)
//! - A `Directory` tying the layers together as an explicit storage context

pub mod backlog;
pub mod baseline;
pub mod catalog;
pub mod data;
pub mod directory;
pub mod draft;
pub mod error;
pub mod lock;
mod pipeline;
pub mod reverse;

pub use backlog::{Backlog, BacklogItem};
pub use baseline::Baseline;
pub use catalog::{Catalog, CatalogItem, MAX_VALUE_LEN};
pub use directory::{AttributeStats, CompactionSummary, Directory, DirectoryStats, StorageOptions};
pub use draft::{AttributeReport, CompactionReport, Draft};
pub use error::StorageError;
pub use lock::{Lock, LockOptions};
pub use pipeline::MergeStats;
pub use reverse::{ReverseChange, ReverseMap};
