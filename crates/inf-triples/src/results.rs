//! Lazy result sets and their grace-period reaper.
//!
//! Every lazy sequence handed out by the store registers a ticket here.
//! Each page fetch, by any sequence, first sweeps tickets idle for longer
//! than the grace period and closes them, so abandoned sequences never
//! accumulate. A sequence whose ticket was closed reports `CursorExpired`
//! once, then ends.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::TriplesError;

struct Entry {
    touched: Instant,
    closed: Arc<AtomicBool>,
}

/// Tracker of open result sets.
pub struct ResultSets {
    grace: Duration,
    next: AtomicU64,
    open: Mutex<HashMap<u64, Entry>>,
}

/// Registration of one result set.
pub struct Ticket {
    id: u64,
    closed: Arc<AtomicBool>,
}

impl ResultSets {
    /// Tracker closing result sets idle for longer than `grace`.
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            next: AtomicU64::new(0),
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new result set.
    pub fn register(&self) -> Ticket {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        let closed = Arc::new(AtomicBool::new(false));
        if let Ok(mut open) = self.open.lock() {
            open.insert(
                id,
                Entry {
                    touched: Instant::now(),
                    closed: closed.clone(),
                },
            );
        }
        Ticket { id, closed }
    }

    /// Reap idle result sets, then mark this one as used.
    pub fn touch(&self, ticket: &Ticket) {
        let Ok(mut open) = self.open.lock() else {
            return;
        };
        let grace = self.grace;
        open.retain(|id, entry| {
            if entry.touched.elapsed() <= grace {
                return true;
            }
            entry.closed.store(true, Ordering::SeqCst);
            debug!(result_set = id, "Result set reaped");
            false
        });
        if let Some(entry) = open.get_mut(&ticket.id) {
            entry.touched = Instant::now();
        }
    }

    /// Forget a result set that finished or was dropped.
    pub fn release(&self, ticket: &Ticket) {
        if let Ok(mut open) = self.open.lock() {
            open.remove(&ticket.id);
        }
    }

    /// Close every open result set.
    pub fn close_all(&self) {
        if let Ok(mut open) = self.open.lock() {
            for entry in open.values() {
                entry.closed.store(true, Ordering::SeqCst);
            }
            open.clear();
        }
    }

    /// Number of result sets still open.
    pub fn len(&self) -> usize {
        self.open.lock().map(|open| open.len()).unwrap_or(0)
    }

    /// Whether no result set is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Ticket {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Source of the pages of one result set.
pub(crate) trait Page<T>: Send {
    /// Up to `limit` more items; fewer means the source is exhausted.
    fn fetch(&mut self, limit: usize) -> Result<Vec<T>, TriplesError>;
}

/// Lazy sequence of query results, fetched page by page.
pub struct Rows<T> {
    source: Box<dyn Page<T>>,
    sets: Arc<ResultSets>,
    ticket: Ticket,
    page_size: usize,
    buffer: VecDeque<T>,
    exhausted: bool,
    done: bool,
}

impl<T> Rows<T> {
    pub(crate) fn new(source: Box<dyn Page<T>>, sets: Arc<ResultSets>, page_size: usize) -> Self {
        let ticket = sets.register();
        Self {
            source,
            sets,
            ticket,
            page_size,
            buffer: VecDeque::new(),
            exhausted: false,
            done: false,
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.buffer.clear();
        self.sets.release(&self.ticket);
    }
}

impl<T> Iterator for Rows<T> {
    type Item = Result<T, TriplesError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.sets.touch(&self.ticket);
            if !self.ticket.is_closed() {
                match self.source.fetch(self.page_size) {
                    Ok(page) => {
                        self.exhausted = page.len() < self.page_size;
                        self.buffer.extend(page);
                    }
                    Err(e) => {
                        self.finish();
                        return Some(Err(e));
                    }
                }
            }
        }
        if self.ticket.is_closed() {
            self.finish();
            return Some(Err(TriplesError::CursorExpired));
        }
        match self.buffer.pop_front() {
            Some(item) => Some(Ok(item)),
            None => {
                self.finish();
                None
            }
        }
    }
}

impl<T> Drop for Rows<T> {
    fn drop(&mut self) {
        self.sets.release(&self.ticket);
    }
}
