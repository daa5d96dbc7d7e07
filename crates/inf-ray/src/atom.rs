//! Atoms: the arguments functors are built from.

use std::fmt;

use inf_types::Attribute;

use crate::error::RayError;
use crate::term::Term;

/// One functor argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Atom {
    /// Integer literal
    Number(i64),
    /// Text literal
    Text(String),
    /// Reference to an attribute, written `$name`
    Variable(Attribute),
    /// Nested functor call, already built
    Term(Term),
}

/// Attribute referenced by a query variable name (without the `$`).
pub fn variable(name: &str) -> Option<Attribute> {
    let attr = match name {
        "number" => Attribute::NUMBER,
        "text" => Attribute::TEXT,
        "date" => Attribute::DATE,
        "bout.number" => Attribute::BOUT_NUMBER,
        "bout.title" => Attribute::BOUT_TITLE,
        "author.name" => Attribute::AUTHOR_NAME,
        "talks.with" => Attribute::TALKS_WITH,
        "seen.by" => Attribute::SEEN_BY,
        _ => return None,
    };
    Some(Attribute::known(attr))
}

/// The query variable name of an attribute, the inverse of [`variable`].
///
/// Attributes without a dotted alias are written under their own name.
pub fn alias(attr: &Attribute) -> &str {
    match attr.as_str() {
        Attribute::BOUT_NUMBER => "bout.number",
        Attribute::BOUT_TITLE => "bout.title",
        Attribute::AUTHOR_NAME => "author.name",
        Attribute::TALKS_WITH => "talks.with",
        Attribute::SEEN_BY => "seen.by",
        other => other,
    }
}

impl Atom {
    /// A short name of the atom kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Atom::Number(_) => "number",
            Atom::Text(_) => "text",
            Atom::Variable(_) => "variable",
            Atom::Term(_) => "term",
        }
    }

    /// The literal as an indexed value.
    pub fn value(&self) -> Result<String, RayError> {
        match self {
            Atom::Number(n) => Ok(n.to_string()),
            Atom::Text(s) => Ok(s.clone()),
            other => Err(RayError::Syntax(format!(
                "expected a literal, got a {}",
                other.kind()
            ))),
        }
    }

    /// The attribute of a variable.
    pub fn attribute(&self) -> Result<Attribute, RayError> {
        match self {
            Atom::Variable(attr) => Ok(attr.clone()),
            other => Err(RayError::Syntax(format!(
                "expected a variable, got a {}",
                other.kind()
            ))),
        }
    }

    /// A non-negative integer.
    pub fn count(&self) -> Result<usize, RayError> {
        match self {
            Atom::Number(n) if *n >= 0 => Ok(*n as usize),
            other => Err(RayError::Syntax(format!(
                "expected a non-negative number, got {}",
                other
            ))),
        }
    }

    /// The nested term.
    pub fn term(&self) -> Result<Term, RayError> {
        match self {
            Atom::Term(term) => Ok(term.clone()),
            other => Err(RayError::Syntax(format!(
                "expected a term, got a {}",
                other.kind()
            ))),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Number(n) => write!(f, "{}", n),
            Atom::Text(s) => write!(f, "{:?}", s),
            Atom::Variable(attr) => write!(f, "${}", alias(attr)),
            Atom::Term(term) => write!(f, "{}", term),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_variables() {
        assert_eq!(
            variable("author.name"),
            Some(Attribute::known(Attribute::AUTHOR_NAME))
        );
        assert_eq!(variable("bout.number").unwrap().as_str(), "bout-number");
        assert_eq!(variable("nope"), None);
    }

    #[test]
    fn test_alias_inverts_variable() {
        for name in [
            "number",
            "text",
            "date",
            "bout.number",
            "bout.title",
            "author.name",
            "talks.with",
            "seen.by",
        ] {
            assert_eq!(alias(&variable(name).unwrap()), name);
        }
        assert_eq!(alias(&Attribute::new("mood").unwrap()), "mood");
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Atom::Number(7).value().unwrap(), "7");
        assert_eq!(Atom::Number(7).count().unwrap(), 7);
        assert!(Atom::Number(-1).count().is_err());
        assert!(Atom::Text("x".to_string()).attribute().is_err());
        assert!(Atom::Term(Term::Always).value().is_err());
    }
}
