//! Functors and their registry.
//!
//! A functor turns the atoms of one query call into a term, and may
//! subscribe to notice kinds to keep the attributes it queries up to date.
//! The registry resolves calls by exact name and dispatches notices to the
//! subscribers of their kind, in registration order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use inf_types::{Notice, NoticeKind};

use crate::atom::Atom;
use crate::error::RayError;
use crate::functors;
use crate::parser::Expr;
use crate::ray::Ray;
use crate::term::Term;

/// A named term builder, optionally reacting to notices.
pub trait Functor: Send + Sync {
    /// Name used in queries.
    fn name(&self) -> &'static str;

    /// Build a term from the call arguments.
    fn build(&self, ray: &Ray, atoms: &[Atom]) -> Result<Term, RayError>;

    /// Notice kinds this functor wants to see.
    fn notices(&self) -> &'static [NoticeKind] {
        &[]
    }

    /// Update indexed attributes after a notice. Must be idempotent.
    fn see(&self, _ray: &Ray, _notice: &Notice) -> Result<(), RayError> {
        Ok(())
    }
}

/// Check the number of call arguments.
pub(crate) fn arity(atoms: &[Atom], expected: usize, usage: &str) -> Result<(), RayError> {
    if atoms.len() == expected {
        Ok(())
    } else {
        Err(RayError::Syntax(format!(
            "expected {} argument(s), got {}; usage: {}",
            expected,
            atoms.len(),
            usage
        )))
    }
}

/// Apply `update` to every item, even after one fails.
///
/// Failures are joined into one `RayError::Notice`, each prefixed by the
/// item's label.
pub(crate) fn update_each<T, L, F>(
    items: impl IntoIterator<Item = T>,
    label: L,
    mut update: F,
) -> Result<(), RayError>
where
    L: Fn(&T) -> String,
    F: FnMut(&T) -> Result<usize, RayError>,
{
    let failures: Vec<String> = items
        .into_iter()
        .filter_map(|item| {
            update(&item)
                .err()
                .map(|e| format!("{}: {}", label(&item), e))
        })
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(RayError::Notice(failures.join("; ")))
    }
}

/// Outcome of dispatching one notice.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SeeReport {
    /// Handlers that succeeded
    pub handled: usize,
    /// Handler failures, as `functor: error`
    pub errors: Vec<String>,
}

impl SeeReport {
    /// Record a successful handler.
    pub fn record_success(&mut self) {
        self.handled += 1;
    }

    /// Record a failed handler.
    pub fn record_error(&mut self, functor: &str, err: &RayError) {
        self.errors.push(format!("{}: {}", functor, err));
    }

    /// Whether every handler succeeded.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Registry of functors by name and by notice kind.
#[derive(Default)]
pub struct Functors {
    by_name: HashMap<&'static str, Arc<dyn Functor>>,
    by_kind: BTreeMap<NoticeKind, Vec<Arc<dyn Functor>>>,
}

impl Functors {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in functor.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(functors::logic::Always));
        registry.register(Arc::new(functors::logic::Never));
        registry.register(Arc::new(functors::logic::And));
        registry.register(Arc::new(functors::logic::Or));
        registry.register(Arc::new(functors::logic::Not));
        registry.register(Arc::new(functors::equal::Equal));
        registry.register(Arc::new(functors::pick::Pick));
        registry.register(Arc::new(functors::window::Offset));
        registry.register(Arc::new(functors::window::Limit));
        registry.register(Arc::new(functors::unique::Unique));
        registry.register(Arc::new(functors::talks::TalksWith));
        registry.register(Arc::new(functors::seen::SeenBy));
        registry
    }

    /// Register a functor; one with the same name is replaced.
    pub fn register(&mut self, functor: Arc<dyn Functor>) {
        let name = functor.name();
        if self.by_name.insert(name, functor.clone()).is_some() {
            warn!(functor = name, "Functor replaced");
            for handlers in self.by_kind.values_mut() {
                handlers.retain(|f| f.name() != name);
            }
        }
        for kind in functor.notices() {
            self.by_kind.entry(*kind).or_default().push(functor.clone());
        }
        debug!(functor = name, notices = functor.notices().len(), "Functor registered");
    }

    /// Look a functor up by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Functor>> {
        self.by_name.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.by_name.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Turn a parsed query into a term, innermost calls first.
    pub fn build(&self, ray: &Ray, expr: &Expr) -> Result<Term, RayError> {
        let Expr::Call { name, args, pos } = expr else {
            return Err(RayError::Syntax("expected a functor call".to_string()));
        };
        let functor = self
            .get(name)
            .ok_or_else(|| RayError::UnknownFunctor(format!("{} at {}", name, pos)))?;
        let atoms = args
            .iter()
            .map(|arg| match arg {
                Expr::Atom(atom) => Ok(atom.clone()),
                call => self.build(ray, call).map(Atom::Term),
            })
            .collect::<Result<Vec<_>, _>>()?;
        functor.build(ray, &atoms).map_err(|e| match e {
            RayError::Syntax(msg) => RayError::Syntax(format!("({}) at {}: {}", name, pos, msg)),
            other => other,
        })
    }

    /// Dispatch a notice to its subscribers.
    ///
    /// A failing handler is logged and reported; the others still run.
    pub fn see(&self, ray: &Ray, notice: &Notice) -> SeeReport {
        let kind = notice.kind();
        let mut report = SeeReport::default();
        for functor in self.by_kind.get(&kind).into_iter().flatten() {
            match functor.see(ray, notice) {
                Ok(()) => report.record_success(),
                Err(e) => {
                    warn!(functor = functor.name(), kind = %kind, error = %e, "Notice handler failed");
                    report.record_error(functor.name(), &e);
                }
            }
        }
        debug!(kind = %kind, handled = report.handled, failed = report.errors.len(), "Notice dispatched");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexMap;
    use crate::parser::parse;
    use inf_storage::{Directory, StorageOptions};
    use inf_types::{Attribute, Bout, Message};
    use tempfile::TempDir;

    fn ray(tmp: &TempDir) -> Ray {
        let options = StorageOptions {
            sync_writes: false,
            ..StorageOptions::default()
        };
        let dir = Arc::new(Directory::open(tmp.path(), options).unwrap());
        Ray::new(Arc::new(IndexMap::new(dir)))
    }

    struct Broken;

    impl Functor for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn build(&self, _ray: &Ray, _atoms: &[Atom]) -> Result<Term, RayError> {
            Ok(Term::Never)
        }

        fn notices(&self) -> &'static [NoticeKind] {
            &[NoticeKind::MessagePosted]
        }

        fn see(&self, _ray: &Ray, _notice: &Notice) -> Result<(), RayError> {
            Err(RayError::Notice("boom".to_string()))
        }
    }

    #[test]
    fn test_build_nested_query() {
        let tmp = TempDir::new().unwrap();
        let ray = ray(&tmp);
        let functors = Functors::standard();

        let expr = parse("(and (equal $author.name 'alice') (not (pick 3)))").unwrap();
        let term = functors.build(&ray, &expr).unwrap();
        assert_eq!(
            term,
            Term::And(vec![
                Term::Matcher {
                    attr: Attribute::known(Attribute::AUTHOR_NAME),
                    value: "alice".to_string(),
                },
                Term::Not(Box::new(Term::Picker(3))),
            ])
        );
    }

    #[test]
    fn test_unknown_functor_and_bad_arguments() {
        let tmp = TempDir::new().unwrap();
        let ray = ray(&tmp);
        let functors = Functors::standard();

        let err = functors.build(&ray, &parse("(nope 1)").unwrap()).unwrap_err();
        assert!(matches!(err, RayError::UnknownFunctor(_)));

        let err = functors
            .build(&ray, &parse("(equal 'text' 'x')").unwrap())
            .unwrap_err();
        assert!(matches!(err, RayError::Syntax(_)));
        assert!(err.to_string().contains("(equal) at 0"), "{}", err);
    }

    #[test]
    fn test_failing_handler_does_not_stop_others() {
        let tmp = TempDir::new().unwrap();
        let ray = ray(&tmp);
        let mut functors = Functors::new();
        functors.register(Arc::new(Broken));
        functors.register(Arc::new(crate::functors::equal::Equal));

        let notice = Notice::MessagePosted {
            message: Message::new(5, 1, "alice", "hi"),
            bout: Bout::new(1, "first"),
        };
        let report = functors.see(&ray, &notice);
        assert_eq!(report.handled, 1);
        assert_eq!(report.errors, vec!["broken: Notice error: boom".to_string()]);
        assert!(ray
            .matches(
                &Term::Matcher {
                    attr: Attribute::known(Attribute::AUTHOR_NAME),
                    value: "alice".to_string(),
                },
                5
            )
            .unwrap());
    }

    #[test]
    fn test_register_replaces_by_name() {
        let mut functors = Functors::standard();
        let before = functors.names().len();
        functors.register(Arc::new(crate::functors::equal::Equal));
        assert_eq!(functors.names().len(), before);
        assert_eq!(functors.by_kind[&NoticeKind::BoutRenamed].len(), 1);
    }
}
