//! Terms: immutable predicate trees.
//!
//! A term says which records match; it holds no data. It is evaluated
//! against the current index every time it is used.

use std::fmt;

use inf_types::{Attribute, RecordId};

use crate::atom::alias;

/// A composed predicate or selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// Every indexed record
    Always,
    /// No record
    Never,
    /// Records whose attribute has the value
    Matcher {
        /// Attribute to look at
        attr: Attribute,
        /// Exact value
        value: String,
    },
    /// Exactly one record, whether indexed or not
    Picker(RecordId),
    /// Records matching every term
    And(Vec<Term>),
    /// Records matching any term
    Or(Vec<Term>),
    /// Indexed records not matching the term
    Not(Box<Term>),
    /// Matches of the term after skipping the newest `offset`
    From {
        /// Number of matches to skip
        offset: usize,
        /// Inner term
        term: Box<Term>,
    },
    /// The newest `count` matches of the term
    Limit {
        /// Maximum number of matches
        count: usize,
        /// Inner term
        term: Box<Term>,
    },
    /// The newest match per distinct value of the attribute
    Unique {
        /// Attribute whose values must be distinct
        attr: Attribute,
        /// Inner term
        term: Box<Term>,
    },
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

fn list(f: &mut fmt::Formatter<'_>, name: &str, terms: &[Term]) -> fmt::Result {
    write!(f, "({}", name)?;
    for term in terms {
        write!(f, " {}", term)?;
    }
    write!(f, ")")
}

/// Renders the term in query-like syntax, for logs.
impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Always => write!(f, "(always)"),
            Term::Never => write!(f, "(never)"),
            Term::Matcher { attr, value } => {
                write!(f, "(equal ${} {})", alias(attr), quote(value))
            }
            Term::Picker(id) => write!(f, "(pick {})", id),
            Term::And(terms) => list(f, "and", terms),
            Term::Or(terms) => list(f, "or", terms),
            Term::Not(term) => write!(f, "(not {})", term),
            Term::From { offset, term } => write!(f, "(from {} {})", offset, term),
            Term::Limit { count, term } => write!(f, "(limit {} {})", count, term),
            Term::Unique { attr, term } => write!(f, "(unique ${} {})", alias(attr), term),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let term = Term::And(vec![
            Term::Matcher {
                attr: Attribute::known(Attribute::AUTHOR_NAME),
                value: "o'neil".to_string(),
            },
            Term::Not(Box::new(Term::Picker(7))),
        ]);
        assert_eq!(
            term.to_string(),
            "(and (equal $author.name 'o\\'neil') (not (pick 7)))"
        );
    }
}
