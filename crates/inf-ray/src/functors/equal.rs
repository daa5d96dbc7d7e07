//! `(equal $attr value)`: records whose attribute has the value.
//!
//! Also maintains the single-valued message attributes: number, bout
//! number and title, author, text and date.

use inf_types::{Attribute, Notice, NoticeKind};

use crate::atom::Atom;
use crate::error::RayError;
use crate::functor::{arity, update_each, Functor};
use crate::ray::Ray;
use crate::term::Term;

/// Attribute equality.
pub struct Equal;

impl Functor for Equal {
    fn name(&self) -> &'static str {
        "equal"
    }

    fn build(&self, ray: &Ray, atoms: &[Atom]) -> Result<Term, RayError> {
        arity(atoms, 2, "(equal $attr value)")?;
        Ok(ray.builder().matcher(atoms[0].attribute()?, atoms[1].value()?))
    }

    fn notices(&self) -> &'static [NoticeKind] {
        &[NoticeKind::MessagePosted, NoticeKind::BoutRenamed]
    }

    fn see(&self, ray: &Ray, notice: &Notice) -> Result<(), RayError> {
        let b = ray.builder();
        let cursor = ray.cursor();
        match notice {
            Notice::MessagePosted { message, bout } => {
                let msg = b.picker(message.number);
                let date = message.date.timestamp_millis().max(0);
                let values = [
                    (Attribute::NUMBER, message.number.to_string()),
                    (Attribute::BOUT_NUMBER, message.bout.to_string()),
                    (Attribute::BOUT_TITLE, bout.title.clone()),
                    (Attribute::AUTHOR_NAME, message.author.clone()),
                    (Attribute::TEXT, message.text.clone()),
                    (Attribute::DATE, format!("{:020}", date)),
                ];
                update_each(
                    values,
                    |(attr, _)| attr.to_string(),
                    |(attr, value)| cursor.replace(&msg, &Attribute::known(*attr), value),
                )?;
            }
            Notice::BoutRenamed { bout } => {
                let messages = b.matcher(
                    Attribute::known(Attribute::BOUT_NUMBER),
                    bout.number.to_string(),
                );
                cursor.replace(&messages, &Attribute::known(Attribute::BOUT_TITLE), &bout.title)?;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexMap;
    use inf_storage::{Directory, StorageOptions};
    use inf_types::{Bout, Message};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ray(tmp: &TempDir) -> Ray {
        let options = StorageOptions {
            sync_writes: false,
            ..StorageOptions::default()
        };
        let dir = Arc::new(Directory::open(tmp.path(), options).unwrap());
        Ray::new(Arc::new(IndexMap::new(dir)))
    }

    fn post(ray: &Ray, number: u64, bout: u64, author: &str) {
        let notice = Notice::MessagePosted {
            message: Message::new(number, bout, author, format!("message {}", number)),
            bout: Bout::new(bout, "talk"),
        };
        Equal.see(ray, &notice).unwrap();
    }

    #[test]
    fn test_author_equality_over_baseline() {
        let tmp = TempDir::new().unwrap();
        let ray = ray(&tmp);
        post(&ray, 3, 1, "alice");
        post(&ray, 4, 1, "bob");
        ray.index().baseline().unwrap();

        let term = Equal
            .build(
                &ray,
                &[
                    Atom::Variable(Attribute::known(Attribute::AUTHOR_NAME)),
                    Atom::Text("alice".to_string()),
                ],
            )
            .unwrap();
        assert!(ray.matches(&term, 3).unwrap());
        assert!(!ray.matches(&term, 4).unwrap());
    }

    #[test]
    fn test_number_literal_matches_text_value() {
        let tmp = TempDir::new().unwrap();
        let ray = ray(&tmp);
        post(&ray, 7, 12, "carol");

        let term = Equal
            .build(
                &ray,
                &[
                    Atom::Variable(Attribute::known(Attribute::BOUT_NUMBER)),
                    Atom::Number(12),
                ],
            )
            .unwrap();
        let found: Vec<u64> = ray.find(&term).unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(found, vec![7]);
    }

    #[test]
    fn test_bout_renamed_retitles_all_messages() {
        let tmp = TempDir::new().unwrap();
        let ray = ray(&tmp);
        post(&ray, 1, 5, "alice");
        post(&ray, 2, 5, "bob");
        post(&ray, 3, 6, "bob");

        Equal
            .see(
                &ray,
                &Notice::BoutRenamed {
                    bout: Bout::new(5, "renamed"),
                },
            )
            .unwrap();

        let title = Attribute::known(Attribute::BOUT_TITLE);
        let renamed: Vec<u64> = ray
            .find(&ray.builder().matcher(title.clone(), "renamed"))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(renamed, vec![2, 1]);
        assert_eq!(
            ray.index().attr(&title, 3).unwrap().into_iter().collect::<Vec<_>>(),
            vec!["talk".to_string()]
        );
    }

    #[test]
    fn test_failing_attribute_does_not_block_others() {
        let tmp = TempDir::new().unwrap();
        let ray = ray(&tmp);
        let text = Attribute::known(Attribute::TEXT);
        ray.index()
            .directory()
            .append(&text, 1, "hello", &[1, 2, 3])
            .unwrap();

        let notice = Notice::MessagePosted {
            message: Message::new(5, 2, "dave", "hello"),
            bout: Bout::new(2, "talk"),
        };
        match Equal.see(&ray, &notice) {
            Err(RayError::Notice(msg)) => {
                assert!(msg.starts_with("text: "), "{}", msg);
                assert!(!msg.contains(';'), "{}", msg);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let index = ray.index();
        assert_eq!(index.attr(&Attribute::known(Attribute::DATE), 5).unwrap().len(), 1);
        assert!(index
            .values(&Attribute::known(Attribute::AUTHOR_NAME), "dave")
            .unwrap()
            .contains(5));
        assert!(index.attr(&text, 5).unwrap().is_empty());
    }

    #[test]
    fn test_repeated_notice_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let ray = ray(&tmp);
        post(&ray, 9, 1, "alice");
        post(&ray, 9, 1, "alice");

        let all: Vec<u64> = ray
            .find(&ray.builder().always())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(all, vec![9]);
    }
}
