//! `(pick n)`: exactly one record.

use crate::atom::Atom;
use crate::error::RayError;
use crate::functor::{arity, Functor};
use crate::ray::Ray;
use crate::term::Term;

/// Selects a record by number.
pub struct Pick;

impl Functor for Pick {
    fn name(&self) -> &'static str {
        "pick"
    }

    fn build(&self, ray: &Ray, atoms: &[Atom]) -> Result<Term, RayError> {
        arity(atoms, 1, "(pick number)")?;
        Ok(ray.builder().picker(atoms[0].count()? as u64))
    }
}
