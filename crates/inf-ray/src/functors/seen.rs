//! `(seen-by 'identity')`: messages the identity has seen.

use inf_types::{Attribute, Notice, NoticeKind};

use crate::atom::Atom;
use crate::error::RayError;
use crate::functor::{arity, Functor};
use crate::ray::Ray;
use crate::term::Term;

/// Read receipts.
pub struct SeenBy;

impl Functor for SeenBy {
    fn name(&self) -> &'static str {
        "seen-by"
    }

    fn build(&self, ray: &Ray, atoms: &[Atom]) -> Result<Term, RayError> {
        arity(atoms, 1, "(seen-by identity)")?;
        Ok(ray
            .builder()
            .matcher(Attribute::known(Attribute::SEEN_BY), atoms[0].value()?))
    }

    fn notices(&self) -> &'static [NoticeKind] {
        &[NoticeKind::MessageSeen]
    }

    fn see(&self, ray: &Ray, notice: &Notice) -> Result<(), RayError> {
        if let Notice::MessageSeen { message, identity } = notice {
            ray.cursor().add(
                &ray.builder().picker(message.number),
                &Attribute::known(Attribute::SEEN_BY),
                identity,
            )?;
        }
        Ok(())
    }
}
