//! `(unique $attr term)`: newest match per distinct value.

use crate::atom::Atom;
use crate::error::RayError;
use crate::functor::{arity, Functor};
use crate::ray::Ray;
use crate::term::Term;

/// Keeps the newest record per value of an attribute.
pub struct Unique;

impl Functor for Unique {
    fn name(&self) -> &'static str {
        "unique"
    }

    fn build(&self, ray: &Ray, atoms: &[Atom]) -> Result<Term, RayError> {
        arity(atoms, 2, "(unique $attr term)")?;
        Ok(ray.builder().unique(atoms[0].attribute()?, atoms[1].term()?))
    }
}
