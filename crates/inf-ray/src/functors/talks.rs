//! `(talks-with 'identity')`: messages of bouts the identity takes part in.

use std::collections::BTreeSet;

use inf_types::{Attribute, Notice, NoticeKind};

use crate::atom::Atom;
use crate::error::RayError;
use crate::functor::{arity, update_each, Functor};
use crate::ray::Ray;
use crate::term::Term;

fn attr() -> Attribute {
    Attribute::known(Attribute::TALKS_WITH)
}

/// Bout participation.
pub struct TalksWith;

impl Functor for TalksWith {
    fn name(&self) -> &'static str {
        "talks-with"
    }

    fn build(&self, ray: &Ray, atoms: &[Atom]) -> Result<Term, RayError> {
        arity(atoms, 1, "(talks-with identity)")?;
        Ok(ray.builder().matcher(attr(), atoms[0].value()?))
    }

    fn notices(&self) -> &'static [NoticeKind] {
        &[
            NoticeKind::MessagePosted,
            NoticeKind::ParticipantJoined,
            NoticeKind::ParticipantKickedOff,
        ]
    }

    fn see(&self, ray: &Ray, notice: &Notice) -> Result<(), RayError> {
        let b = ray.builder();
        let cursor = ray.cursor();
        let bout_messages = |number: u64| {
            b.matcher(Attribute::known(Attribute::BOUT_NUMBER), number.to_string())
        };
        match notice {
            Notice::MessagePosted { message, bout } => {
                let msg = b.picker(message.number);
                let mut who: BTreeSet<&str> =
                    bout.participants.iter().map(String::as_str).collect();
                who.insert(&message.author);
                update_each(
                    who,
                    |identity| identity.to_string(),
                    |identity| cursor.add(&msg, &attr(), identity),
                )?;
            }
            Notice::ParticipantJoined { bout, identity } => {
                cursor.add(&bout_messages(bout.number), &attr(), identity)?;
            }
            Notice::ParticipantKickedOff { bout, identity } => {
                cursor.delete(&bout_messages(bout.number), &attr(), identity)?;
            }
            _ => {}
        }
        Ok(())
    }
}
