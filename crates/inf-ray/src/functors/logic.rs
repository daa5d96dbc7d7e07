//! Boolean combinators: `(always)`, `(never)`, `(and ...)`, `(or ...)`, `(not t)`.

use crate::atom::Atom;
use crate::error::RayError;
use crate::functor::{arity, Functor};
use crate::ray::Ray;
use crate::term::Term;

fn terms(atoms: &[Atom]) -> Result<Vec<Term>, RayError> {
    atoms.iter().map(Atom::term).collect()
}

/// Every indexed record.
pub struct Always;

impl Functor for Always {
    fn name(&self) -> &'static str {
        "always"
    }

    fn build(&self, ray: &Ray, atoms: &[Atom]) -> Result<Term, RayError> {
        arity(atoms, 0, "(always)")?;
        Ok(ray.builder().always())
    }
}

/// No record.
pub struct Never;

impl Functor for Never {
    fn name(&self) -> &'static str {
        "never"
    }

    fn build(&self, ray: &Ray, atoms: &[Atom]) -> Result<Term, RayError> {
        arity(atoms, 0, "(never)")?;
        Ok(ray.builder().never())
    }
}

/// Records matching all arguments.
pub struct And;

impl Functor for And {
    fn name(&self) -> &'static str {
        "and"
    }

    fn build(&self, ray: &Ray, atoms: &[Atom]) -> Result<Term, RayError> {
        Ok(ray.builder().and(terms(atoms)?))
    }
}

/// Records matching any argument.
pub struct Or;

impl Functor for Or {
    fn name(&self) -> &'static str {
        "or"
    }

    fn build(&self, ray: &Ray, atoms: &[Atom]) -> Result<Term, RayError> {
        Ok(ray.builder().or(terms(atoms)?))
    }
}

/// Records not matching the argument.
pub struct Not;

impl Functor for Not {
    fn name(&self) -> &'static str {
        "not"
    }

    fn build(&self, ray: &Ray, atoms: &[Atom]) -> Result<Term, RayError> {
        arity(atoms, 1, "(not term)")?;
        Ok(ray.builder().not(atoms[0].term()?))
    }
}
