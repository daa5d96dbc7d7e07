//! The query context bound to one live index view.

use std::sync::Arc;

use inf_types::RecordId;

use crate::builder::Builder;
use crate::cursor::Cursor;
use crate::error::RayError;
use crate::eval::{compile, Matches};
use crate::index::IndexMap;
use crate::term::Term;

/// Builder and cursor over one index map.
#[derive(Clone)]
pub struct Ray {
    index: Arc<IndexMap>,
    cursor: Cursor,
}

impl Ray {
    /// Bind a ray to the index.
    pub fn new(index: Arc<IndexMap>) -> Self {
        Self {
            cursor: Cursor::new(index.clone()),
            index,
        }
    }

    /// Term factory.
    pub fn builder(&self) -> Builder {
        Builder
    }

    /// Posting updater.
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// The index map behind this ray.
    pub fn index(&self) -> &Arc<IndexMap> {
        &self.index
    }

    /// Lazily iterate the records matching a term, newest first.
    pub fn find(&self, term: &Term) -> Result<Matches, RayError> {
        Ok(Matches::new(compile(term, &self.index)?))
    }

    /// Whether a record matches a term.
    pub fn matches(&self, term: &Term, record: RecordId) -> Result<bool, RayError> {
        let mut node = compile(term, &self.index)?;
        Ok(node.shift(record.saturating_add(1))? == Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inf_storage::{Directory, StorageOptions};
    use inf_types::Attribute;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn ray(tmp: &TempDir) -> Ray {
        let options = StorageOptions {
            sync_writes: false,
            ..StorageOptions::default()
        };
        let dir = Arc::new(Directory::open(tmp.path(), options).unwrap());
        Ray::new(Arc::new(IndexMap::new(dir)))
    }

    fn number() -> Attribute {
        Attribute::known(Attribute::NUMBER)
    }

    fn author() -> Attribute {
        Attribute::known(Attribute::AUTHOR_NAME)
    }

    fn bout() -> Attribute {
        Attribute::known(Attribute::BOUT_NUMBER)
    }

    /// Messages 1..=10; odd ones by alice, even by bob; bout = id % 3.
    fn seed(ray: &Ray) {
        let b = ray.builder();
        for id in 1..=10u64 {
            let msg = b.picker(id);
            let cursor = ray.cursor();
            cursor.replace(&msg, &number(), &id.to_string()).unwrap();
            let who = if id % 2 == 1 { "alice" } else { "bob" };
            cursor.replace(&msg, &author(), who).unwrap();
            cursor.replace(&msg, &bout(), &(id % 3).to_string()).unwrap();
        }
    }

    fn collect(ray: &Ray, term: &Term) -> Vec<RecordId> {
        ray.find(term).unwrap().collect::<Result<_, _>>().unwrap()
    }

    #[test]
    fn test_matcher_and_always() {
        let tmp = TempDir::new().unwrap();
        let ray = ray(&tmp);
        seed(&ray);
        let b = ray.builder();

        assert_eq!(collect(&ray, &b.matcher(author(), "alice")), vec![9, 7, 5, 3, 1]);
        assert_eq!(collect(&ray, &b.always()).len(), 10);
        assert!(collect(&ray, &b.never()).is_empty());
    }

    #[test]
    fn test_boolean_combinations() {
        let tmp = TempDir::new().unwrap();
        let ray = ray(&tmp);
        seed(&ray);
        let b = ray.builder();

        let alice_in_0 = Term::And(vec![b.matcher(author(), "alice"), b.matcher(bout(), "0")]);
        assert_eq!(collect(&ray, &alice_in_0), vec![9, 3]);

        let either = Term::Or(vec![b.matcher(bout(), "1"), b.picker(2)]);
        assert_eq!(collect(&ray, &either), vec![10, 7, 4, 2, 1]);

        let not_bob = Term::Not(Box::new(b.matcher(author(), "bob")));
        assert_eq!(collect(&ray, &not_bob), vec![9, 7, 5, 3, 1]);
    }

    #[test]
    fn test_positional_terms() {
        let tmp = TempDir::new().unwrap();
        let ray = ray(&tmp);
        seed(&ray);
        let b = ray.builder();

        let page = b.limit(2, b.from(1, b.matcher(author(), "bob")));
        assert_eq!(collect(&ray, &page), vec![8, 6]);

        let newest_per_bout = b.unique(bout(), b.always());
        assert_eq!(collect(&ray, &newest_per_bout), vec![10, 9, 8]);

        // Limit counts its own matches even inside a conjunction
        let top3_alice = Term::And(vec![b.limit(3, b.always()), b.matcher(author(), "alice")]);
        assert_eq!(collect(&ray, &top3_alice), vec![9]);
    }

    #[test]
    fn test_matches_single_record() {
        let tmp = TempDir::new().unwrap();
        let ray = ray(&tmp);
        seed(&ray);
        let b = ray.builder();

        assert!(ray.matches(&b.matcher(author(), "bob"), 4).unwrap());
        assert!(!ray.matches(&b.matcher(author(), "bob"), 5).unwrap());
    }

    #[test]
    fn test_cursor_updates_all_matches() {
        let tmp = TempDir::new().unwrap();
        let ray = ray(&tmp);
        seed(&ray);
        let b = ray.builder();
        let title = Attribute::known(Attribute::BOUT_TITLE);

        let updated = ray
            .cursor()
            .replace(&b.matcher(bout(), "1"), &title, "renamed")
            .unwrap();
        assert_eq!(updated, 4);
        assert_eq!(collect(&ray, &b.matcher(title, "renamed")), vec![10, 7, 4, 1]);
    }
}
