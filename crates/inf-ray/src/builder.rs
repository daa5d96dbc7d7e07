//! Term factory handed to functors.

use inf_types::{Attribute, RecordId};

use crate::term::Term;

/// Builds terms, folding trivial combinations on the way.
#[derive(Debug, Clone, Copy, Default)]
pub struct Builder;

impl Builder {
    /// Every indexed record.
    pub fn always(&self) -> Term {
        Term::Always
    }

    /// No record.
    pub fn never(&self) -> Term {
        Term::Never
    }

    /// Records whose attribute equals the value.
    pub fn matcher(&self, attr: Attribute, value: impl Into<String>) -> Term {
        Term::Matcher {
            attr,
            value: value.into(),
        }
    }

    /// Exactly the given record.
    pub fn picker(&self, record: RecordId) -> Term {
        Term::Picker(record)
    }

    /// Conjunction; `Never` absorbs, `Always` is dropped.
    pub fn and(&self, terms: Vec<Term>) -> Term {
        if terms.contains(&Term::Never) {
            return Term::Never;
        }
        let mut terms: Vec<Term> = terms.into_iter().filter(|t| *t != Term::Always).collect();
        match terms.len() {
            0 => Term::Always,
            1 => terms.remove(0),
            _ => Term::And(terms),
        }
    }

    /// Disjunction; `Always` absorbs, `Never` is dropped.
    pub fn or(&self, terms: Vec<Term>) -> Term {
        if terms.contains(&Term::Always) {
            return Term::Always;
        }
        let mut terms: Vec<Term> = terms.into_iter().filter(|t| *t != Term::Never).collect();
        match terms.len() {
            0 => Term::Never,
            1 => terms.remove(0),
            _ => Term::Or(terms),
        }
    }

    /// Negation.
    pub fn not(&self, term: Term) -> Term {
        match term {
            Term::Always => Term::Never,
            Term::Never => Term::Always,
            Term::Not(inner) => *inner,
            other => Term::Not(Box::new(other)),
        }
    }

    /// Skip the newest `offset` matches.
    pub fn from(&self, offset: usize, term: Term) -> Term {
        if offset == 0 {
            return term;
        }
        Term::From {
            offset,
            term: Box::new(term),
        }
    }

    /// Keep at most `count` newest matches.
    pub fn limit(&self, count: usize, term: Term) -> Term {
        if count == 0 {
            return Term::Never;
        }
        Term::Limit {
            count,
            term: Box::new(term),
        }
    }

    /// Keep the newest match per value of the attribute.
    pub fn unique(&self, attr: Attribute, term: Term) -> Term {
        Term::Unique {
            attr,
            term: Box::new(term),
        }
    }
}
