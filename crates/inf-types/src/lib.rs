//! Shared domain types for the inf attribute index.
//!
//! This crate defines the vocabulary used throughout the system:
//! - Attributes: names of indexed fields, doubling as directory names
//! - Notices: domain events delivered by the write side
//! - Settings: layered configuration

pub mod attribute;
pub mod config;
pub mod error;
pub mod notice;

pub use attribute::{Attribute, RecordId};
pub use config::{CompactionSettings, LockSettings, Precedence, Settings, TriplesSettings};
pub use error::InfError;
pub use notice::{Bout, Message, Notice, NoticeKind};
