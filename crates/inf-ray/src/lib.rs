//! Query layer of the inf attribute index.
//!
//! ## Key Components
//!
//! - [`Numbers`]: posting list of one attribute value, newest record first
//! - [`IndexMap`]: write-back cache of posting lists over a storage directory
//! - [`Term`] and [`Atom`]: the query algebra
//! - [`Builder`], [`Cursor`], [`Ray`]: build terms, update postings, evaluate
//! - [`Functor`] and [`Functors`]: named term builders that also react to notices
//! - [`Engine`]: query strings in, record numbers out
//!
//! ## Example
//!
//! ```ignore
//! use inf_ray::Engine;
//!
//! let engine = Engine::open(&settings)?;
//! engine.see(&notice)?;
//! let ids = engine.find("(and (talks-with 'bob') (not (seen-by 'bob')))")?;
//! ```

pub mod atom;
pub mod builder;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod eval;
pub mod functor;
pub mod functors;
pub mod index;
pub mod numbers;
pub mod parser;
pub mod ray;
pub mod term;

pub use atom::Atom;
pub use builder::Builder;
pub use cursor::Cursor;
pub use engine::Engine;
pub use error::RayError;
pub use eval::Matches;
pub use functor::{Functor, Functors, SeeReport};
pub use index::IndexMap;
pub use numbers::Numbers;
pub use parser::{parse, Expr};
pub use ray::Ray;
pub use term::Term;
