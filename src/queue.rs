//! Priority request queue with FIFO tie-break.
//!
//! Requests are ordered by `(priority, sequence)`: lower priority values are
//! served first, and requests of equal priority are served in the order they
//! were enqueued. The sequence number is assigned by the owning store when the
//! request is created, so the order never depends on how the underlying map
//! happens to iterate.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric request priority. Lower values are more urgent.
///
/// Priorities are integers so that grant order is a total order with no NaN or
/// signed-zero cases. Fractional schemes map onto it by scaling, e.g. a
/// priority of `0.25` at millesimal resolution becomes `250`. The full `i64`
/// range is valid, negative values included.
pub type Priority = i64;

/// Position of a request in grant order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueKey {
    /// Request priority (compared first).
    pub priority: Priority,
    /// Arrival sequence within the owning store (tie-break).
    pub sequence: u64,
}

impl QueueKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(priority: Priority, sequence: u64) -> Self {
        Self { priority, sequence }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}#{}", self.priority, self.sequence)
    }
}

/// Anything that can wait in a [`RequestQueue`].
pub trait Queued {
    /// The request's position in grant order. Must not change while queued.
    fn key(&self) -> QueueKey;
}

/// Pending requests of one kind, kept in grant order.
pub struct RequestQueue<R> {
    entries: BTreeMap<QueueKey, R>,
}

impl<R> Default for RequestQueue<R> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<R> fmt::Debug for RequestQueue<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

impl<R: Queued> RequestQueue<R> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of waiting requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts a request at its `(priority, sequence)` position.
    pub fn enqueue(&mut self, request: R) {
        let key = request.key();
        let previous = self.entries.insert(key, request);
        debug_assert!(previous.is_none(), "duplicate queue key {key}");
    }

    /// The most eligible request, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&R> {
        self.entries.values().next()
    }

    /// Removes and returns the most eligible request.
    pub fn pop(&mut self) -> Option<R> {
        self.entries.pop_first().map(|(_, request)| request)
    }

    /// Detaches a waiting request. Returns `None` if it is not queued.
    pub fn remove(&mut self, key: QueueKey) -> Option<R> {
        self.entries.remove(&key)
    }

    /// Returns true if a request with this key is waiting.
    #[must_use]
    pub fn contains(&self, key: QueueKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Hands up to `available` units to the head of the queue.
    ///
    /// Each popped request is passed to `grant` in order; the callback is
    /// responsible for marking it granted and resolving its handle. Returns the
    /// number of requests granted.
    pub fn grant_eligible(&mut self, mut available: usize, mut grant: impl FnMut(R)) -> usize {
        let mut granted = 0;
        while available > 0 {
            let Some(request) = self.pop() else {
                break;
            };
            grant(request);
            available -= 1;
            granted += 1;
        }
        granted
    }

    /// Iterates waiting requests in grant order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.entries.values()
    }
}
