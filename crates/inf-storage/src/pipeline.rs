//! Two-source merge of a catalog stream and a backlog stream.
//!
//! Both inputs are ascending by value with no duplicates. The merge is an
//! explicit state machine; each state owns the token it is holding:
//!
//! ```text
//! NeedCatalog(b) --pull catalog--> HaveBoth(c, b)
//! NeedBacklog(c) --pull backlog--> HaveBoth(c, b)
//! HaveBoth(c, b) --emit smaller--> NeedCatalog(b) | NeedBacklog(c)
//! HaveBoth(None, None) ---------> Done
//! ```
//!
//! Equal values emit one entry, chosen by `Precedence`, and both sources
//! advance. Every emitted entry has its bytes copied into the destination
//! data file, and the pipeline yields the resulting catalog entries.

use std::cmp::Ordering;
use std::fs;
use std::mem;
use std::path::PathBuf;

use inf_types::Precedence;

use crate::backlog::BacklogItem;
use crate::catalog::CatalogItem;
use crate::data::{read_frame, DataWriter};
use crate::error::StorageError;

enum State {
    NeedCatalog(Option<BacklogItem>),
    NeedBacklog(Option<CatalogItem>),
    HaveBoth(Option<CatalogItem>, Option<BacklogItem>),
    Done,
}

enum Token {
    Catalog(CatalogItem),
    Backlog(BacklogItem),
}

/// Counters of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Entries carried over from the source catalog
    pub from_catalog: u64,
    /// Entries taken from the backlog
    pub from_backlog: u64,
    /// Values present in both sources
    pub ties: u64,
    /// Bytes written to the destination data file
    pub bytes: u64,
}

/// Lazy merge producing destination catalog entries.
pub(crate) struct Pipeline<C, B> {
    catalog: C,
    backlog: B,
    src_data: PathBuf,
    backlog_dir: PathBuf,
    out: DataWriter,
    precedence: Precedence,
    state: State,
    stats: MergeStats,
}

impl<C, B> Pipeline<C, B>
where
    C: Iterator<Item = Result<CatalogItem, StorageError>>,
    B: Iterator<Item = BacklogItem>,
{
    /// Merge `catalog` (payloads in `src_data`) with `backlog` (payload files
    /// in `backlog_dir`) into `out`.
    pub(crate) fn new(
        catalog: C,
        mut backlog: B,
        src_data: PathBuf,
        backlog_dir: PathBuf,
        out: DataWriter,
        precedence: Precedence,
    ) -> Self {
        let first = backlog.next();
        Self {
            catalog,
            backlog,
            src_data,
            backlog_dir,
            out,
            precedence,
            state: State::NeedCatalog(first),
            stats: MergeStats::default(),
        }
    }

    /// Flush the data file and return the counters.
    pub(crate) fn finish(self) -> Result<MergeStats, StorageError> {
        let mut stats = self.stats;
        stats.bytes = self.out.finish()?;
        Ok(stats)
    }

    fn emit(&mut self, token: Token) -> Result<CatalogItem, StorageError> {
        let (value, bytes) = match token {
            Token::Catalog(item) => {
                self.stats.from_catalog += 1;
                let bytes = read_frame(&self.src_data, item.offset)?;
                (item.value, bytes)
            }
            Token::Backlog(item) => {
                self.stats.from_backlog += 1;
                let bytes = fs::read(self.backlog_dir.join(&item.path))?;
                (item.value, bytes)
            }
        };
        let offset = self.out.write(&bytes)?;
        Ok(CatalogItem { value, offset })
    }
}

impl<C, B> Iterator for Pipeline<C, B>
where
    C: Iterator<Item = Result<CatalogItem, StorageError>>,
    B: Iterator<Item = BacklogItem>,
{
    type Item = Result<CatalogItem, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (token, next) = match mem::replace(&mut self.state, State::Done) {
                State::Done | State::HaveBoth(None, None) => return None,
                State::NeedCatalog(held) => {
                    match self.catalog.next() {
                        Some(Err(e)) => return Some(Err(e)),
                        Some(Ok(item)) => self.state = State::HaveBoth(Some(item), held),
                        None => self.state = State::HaveBoth(None, held),
                    }
                    continue;
                }
                State::NeedBacklog(held) => {
                    self.state = State::HaveBoth(held, self.backlog.next());
                    continue;
                }
                State::HaveBoth(Some(c), None) => (Token::Catalog(c), State::NeedCatalog(None)),
                State::HaveBoth(None, Some(b)) => (Token::Backlog(b), State::NeedBacklog(None)),
                State::HaveBoth(Some(c), Some(b)) => {
                    match c.value.as_bytes().cmp(b.value.as_bytes()) {
                        Ordering::Less => (Token::Catalog(c), State::NeedCatalog(Some(b))),
                        Ordering::Greater => (Token::Backlog(b), State::NeedBacklog(Some(c))),
                        Ordering::Equal => {
                            self.stats.ties += 1;
                            let next = State::NeedCatalog(self.backlog.next());
                            match self.precedence {
                                Precedence::Backlog => (Token::Backlog(b), next),
                                Precedence::Catalog => (Token::Catalog(c), next),
                            }
                        }
                    }
                }
            };
            return match self.emit(token) {
                Ok(item) => {
                    self.state = next;
                    Some(Ok(item))
                }
                Err(e) => Some(Err(e)),
            };
        }
    }
}
