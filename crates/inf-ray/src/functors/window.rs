//! Paging: `(from n term)` and `(limit n term)`.

use crate::atom::Atom;
use crate::error::RayError;
use crate::functor::{arity, Functor};
use crate::ray::Ray;
use crate::term::Term;

/// Skips the newest `n` matches.
pub struct Offset;

impl Functor for Offset {
    fn name(&self) -> &'static str {
        "from"
    }

    fn build(&self, ray: &Ray, atoms: &[Atom]) -> Result<Term, RayError> {
        arity(atoms, 2, "(from offset term)")?;
        Ok(ray.builder().from(atoms[0].count()?, atoms[1].term()?))
    }
}

/// Keeps the newest `n` matches.
pub struct Limit;

impl Functor for Limit {
    fn name(&self) -> &'static str {
        "limit"
    }

    fn build(&self, ray: &Ray, atoms: &[Atom]) -> Result<Term, RayError> {
        arity(atoms, 2, "(limit count term)")?;
        Ok(ray.builder().limit(atoms[0].count()?, atoms[1].term()?))
    }
}
