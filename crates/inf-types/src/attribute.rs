//! Attribute names.
//!
//! An attribute identifies one indexed field of a record (author name,
//! bout number, text, ...). Attribute names double as directory names
//! inside baselines and drafts, so the accepted alphabet is deliberately
//! narrow: lowercase ASCII letters, digits, `-` and `.`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InfError;

/// Identifier of an indexed record (a message).
pub type RecordId = u64;

/// Name of one indexed field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Attribute(String);

impl Attribute {
    /// Message number
    pub const NUMBER: &'static str = "number";
    /// Number of the bout a message belongs to
    pub const BOUT_NUMBER: &'static str = "bout-number";
    /// Title of the bout a message belongs to
    pub const BOUT_TITLE: &'static str = "bout-title";
    /// Identity name of the message author
    pub const AUTHOR_NAME: &'static str = "author-name";
    /// Message text
    pub const TEXT: &'static str = "text";
    /// Message date, milliseconds since epoch, zero-padded
    pub const DATE: &'static str = "date";
    /// Participants of the bout (multi-valued)
    pub const TALKS_WITH: &'static str = "talks-with";
    /// Identities that have seen the message (multi-valued)
    pub const SEEN_BY: &'static str = "seen-by";

    /// Create an attribute, validating its name.
    pub fn new(name: impl Into<String>) -> Result<Self, InfError> {
        let name = name.into();
        if name.is_empty() || name.len() > 64 {
            return Err(InfError::InvalidInput(format!(
                "attribute name must be 1-64 chars, got {:?}",
                name
            )));
        }
        if name.starts_with('.') {
            return Err(InfError::InvalidInput(format!(
                "attribute name can't start with a dot: {:?}",
                name
            )));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.'))
        {
            return Err(InfError::InvalidInput(format!(
                "invalid character {:?} in attribute name {:?}",
                bad, name
            )));
        }
        Ok(Self(name))
    }

    /// Create one of the well-known attributes declared as constants above,
    /// skipping validation.
    pub fn known(name: &'static str) -> Self {
        Self(name.to_string())
    }

    /// The attribute name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Attribute {
    type Err = InfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Attribute {
    type Error = InfError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Attribute> for String {
    fn from(attr: Attribute) -> Self {
        attr.0
    }
}
