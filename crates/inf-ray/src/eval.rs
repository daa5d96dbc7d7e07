//! Lazy evaluation of terms.
//!
//! A term compiles into a tree of nodes. Every node answers
//! `shift(cursor)`: the largest matching record strictly below `cursor`.
//! Records therefore come out newest first, and nothing is materialized
//! beyond the posting lists of the matchers involved.
//!
//! Nodes may keep state, so callers must never pass a cursor larger than
//! one passed before. Repeating the same cursor is allowed.

use std::collections::HashSet;
use std::sync::Arc;

use inf_types::{Attribute, RecordId};

use crate::error::RayError;
use crate::index::IndexMap;
use crate::numbers::Numbers;
use crate::term::Term;

/// Cursor preceding every record.
pub const START: RecordId = RecordId::MAX;

/// One compiled term.
pub trait Node: Send {
    /// The largest matching record strictly below `cursor`.
    fn shift(&mut self, cursor: RecordId) -> Result<Option<RecordId>, RayError>;
}

/// Compile a term against the current state of the index.
pub fn compile(term: &Term, index: &Arc<IndexMap>) -> Result<Box<dyn Node>, RayError> {
    let node: Box<dyn Node> = match term {
        Term::Always => Box::new(Postings(Arc::new(index.records()?))),
        Term::Never => Box::new(Postings(Arc::new(Numbers::new()))),
        Term::Matcher { attr, value } => Box::new(Postings(index.values(attr, value)?)),
        Term::Picker(id) => Box::new(Picker(*id)),
        Term::And(terms) => match terms.len() {
            0 => Box::new(Postings(Arc::new(index.records()?))),
            1 => compile(&terms[0], index)?,
            _ => Box::new(And(compile_all(terms, index)?)),
        },
        Term::Or(terms) => match terms.len() {
            0 => Box::new(Postings(Arc::new(Numbers::new()))),
            1 => compile(&terms[0], index)?,
            _ => Box::new(Or(compile_all(terms, index)?)),
        },
        Term::Not(term) => Box::new(Not {
            universe: Arc::new(index.records()?),
            inner: compile(term, index)?,
        }),
        Term::From { offset, term } => Box::new(Skip {
            walk: Walk::new(compile(term, index)?),
            offset: *offset,
            skipped: 0,
        }),
        Term::Limit { count, term } => Box::new(Limit {
            walk: Walk::new(compile(term, index)?),
            count: *count,
            taken: 0,
        }),
        Term::Unique { attr, term } => Box::new(Unique {
            walk: Walk::new(compile(term, index)?),
            attr: attr.clone(),
            index: index.clone(),
            seen: HashSet::new(),
            verdict: None,
        }),
    };
    Ok(node)
}

fn compile_all(terms: &[Term], index: &Arc<IndexMap>) -> Result<Vec<Box<dyn Node>>, RayError> {
    terms.iter().map(|t| compile(t, index)).collect()
}

struct Postings(Arc<Numbers>);

impl Node for Postings {
    fn shift(&mut self, cursor: RecordId) -> Result<Option<RecordId>, RayError> {
        Ok(self.0.shift(cursor))
    }
}

struct Picker(RecordId);

impl Node for Picker {
    fn shift(&mut self, cursor: RecordId) -> Result<Option<RecordId>, RayError> {
        Ok((self.0 < cursor).then_some(self.0))
    }
}

struct And(Vec<Box<dyn Node>>);

impl Node for And {
    fn shift(&mut self, cursor: RecordId) -> Result<Option<RecordId>, RayError> {
        let mut target = cursor;
        'candidates: loop {
            let Some(candidate) = self.0[0].shift(target)? else {
                return Ok(None);
            };
            for node in self.0[1..].iter_mut() {
                match node.shift(candidate + 1)? {
                    None => return Ok(None),
                    Some(found) if found == candidate => {}
                    Some(found) => {
                        target = found + 1;
                        continue 'candidates;
                    }
                }
            }
            return Ok(Some(candidate));
        }
    }
}

struct Or(Vec<Box<dyn Node>>);

impl Node for Or {
    fn shift(&mut self, cursor: RecordId) -> Result<Option<RecordId>, RayError> {
        let mut best = None;
        for node in self.0.iter_mut() {
            if let Some(found) = node.shift(cursor)? {
                best = best.max(Some(found));
            }
        }
        Ok(best)
    }
}

struct Not {
    universe: Arc<Numbers>,
    inner: Box<dyn Node>,
}

impl Node for Not {
    fn shift(&mut self, cursor: RecordId) -> Result<Option<RecordId>, RayError> {
        let mut next = self.universe.shift(cursor);
        while let Some(candidate) = next {
            if self.inner.shift(candidate + 1)? != Some(candidate) {
                return Ok(Some(candidate));
            }
            next = self.universe.shift(candidate);
        }
        Ok(None)
    }
}

/// Sequential walk over the matches of a node, from the newest.
///
/// The walk only moves forward, so positional nodes can count every match
/// even when their own callers jump ahead.
struct Walk {
    inner: Box<dyn Node>,
    frontier: RecordId,
    peeked: Option<Option<RecordId>>,
}

impl Walk {
    fn new(inner: Box<dyn Node>) -> Self {
        Self {
            inner,
            frontier: START,
            peeked: None,
        }
    }

    fn peek(&mut self) -> Result<Option<RecordId>, RayError> {
        if let Some(peeked) = self.peeked {
            return Ok(peeked);
        }
        let next = self.inner.shift(self.frontier)?;
        self.peeked = Some(next);
        Ok(next)
    }

    fn consume(&mut self, id: RecordId) {
        self.frontier = id;
        self.peeked = None;
    }
}

struct Skip {
    walk: Walk,
    offset: usize,
    skipped: usize,
}

impl Node for Skip {
    fn shift(&mut self, cursor: RecordId) -> Result<Option<RecordId>, RayError> {
        while self.skipped < self.offset {
            match self.walk.peek()? {
                None => return Ok(None),
                Some(id) => {
                    self.walk.consume(id);
                    self.skipped += 1;
                }
            }
        }
        self.walk.inner.shift(cursor.min(self.walk.frontier))
    }
}

struct Limit {
    walk: Walk,
    count: usize,
    taken: usize,
}

impl Node for Limit {
    fn shift(&mut self, cursor: RecordId) -> Result<Option<RecordId>, RayError> {
        while self.taken < self.count {
            match self.walk.peek()? {
                None => return Ok(None),
                Some(id) if id < cursor => return Ok(Some(id)),
                Some(id) => {
                    self.walk.consume(id);
                    self.taken += 1;
                }
            }
        }
        Ok(None)
    }
}

struct Unique {
    walk: Walk,
    attr: Attribute,
    index: Arc<IndexMap>,
    seen: HashSet<String>,
    verdict: Option<(RecordId, bool)>,
}

impl Unique {
    /// Whether `id` is the newest match of its value; decided once per match.
    fn accepted(&mut self, id: RecordId) -> Result<bool, RayError> {
        if let Some((decided, accepted)) = self.verdict {
            if decided == id {
                return Ok(accepted);
            }
        }
        let accepted = match self.index.attr(&self.attr, id)?.into_iter().next() {
            Some(value) => self.seen.insert(value),
            None => true,
        };
        self.verdict = Some((id, accepted));
        Ok(accepted)
    }
}

impl Node for Unique {
    fn shift(&mut self, cursor: RecordId) -> Result<Option<RecordId>, RayError> {
        loop {
            let Some(id) = self.walk.peek()? else {
                return Ok(None);
            };
            if self.accepted(id)? && id < cursor {
                return Ok(Some(id));
            }
            self.walk.consume(id);
        }
    }
}

/// Lazy iterator over the matches of a term, newest first.
pub struct Matches {
    node: Box<dyn Node>,
    cursor: RecordId,
    done: bool,
}

impl Matches {
    /// Iterate a compiled node from the start.
    pub fn new(node: Box<dyn Node>) -> Self {
        Self {
            node,
            cursor: START,
            done: false,
        }
    }
}

impl Iterator for Matches {
    type Item = Result<RecordId, RayError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.node.shift(self.cursor) {
            Ok(Some(id)) => {
                self.cursor = id;
                Some(Ok(id))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
