//! Priority-ordered, capacity-bounded item stores.
//!
//! Two flavours share the queue utility and capacity accounting:
//!
//! - [`ReservablePriorityReqStore`]: reserve a slot or an item first, commit later.
//! - [`PriorityReqStore`]: `put`/`get` are themselves the queued requests.
//!
//! Both are cheap to clone (`Arc` inside) and keep all state behind a single
//! mutex. Operations run to completion under that lock; completion handles are
//! resolved from inside the grant algorithm.

mod direct;
mod reservable;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Capacity;
use crate::error::StoreError;

pub use direct::{GetRequest, PriorityReqStore, PutRequest};
pub use reservable::ReservablePriorityReqStore;

/// Unique identifier for a store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(Uuid);

impl StoreId {
    /// Creates a new random store ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time view of a store's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Configured capacity.
    pub capacity: Capacity,
    /// Items physically present.
    pub held: usize,
    /// Granted, uncommitted put reservations.
    pub reserved_puts: usize,
    /// Granted, uncommitted get reservations.
    pub reserved_gets: usize,
    /// Put requests waiting in the queue.
    pub pending_puts: usize,
    /// Get requests waiting in the queue.
    pub pending_gets: usize,
}

impl StoreStats {
    /// Slots neither filled nor reserved (`None` when unbounded).
    #[must_use]
    pub fn free_slots(&self) -> Option<usize> {
        self.capacity
            .limit()
            .map(|limit| limit.saturating_sub(self.held + self.reserved_puts))
    }

    /// Items present and not promised to a granted get.
    #[must_use]
    pub const fn unreserved_items(&self) -> usize {
        self.held.saturating_sub(self.reserved_gets)
    }

    /// Checks the accounting invariants:
    /// `held ≤ capacity`, `reserved_gets ≤ held`, `reserved_puts ≤ capacity − held`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let within_capacity = self.capacity.limit().map_or(true, |limit| {
            self.held <= limit && self.reserved_puts <= limit - self.held
        });
        within_capacity && self.reserved_gets <= self.held
    }
}

fn lock_err(context: &'static str) -> StoreError {
    StoreError::internal(format!("poisoned lock: {context}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(capacity: usize, held: usize, reserved_puts: usize, reserved_gets: usize) -> StoreStats {
        StoreStats {
            capacity: Capacity::bounded(capacity).unwrap(),
            held,
            reserved_puts,
            reserved_gets,
            pending_puts: 0,
            pending_gets: 0,
        }
    }

    #[test]
    fn test_store_id_unique() {
        assert_ne!(StoreId::new(), StoreId::new());
    }

    #[test]
    fn test_stats_consistency() {
        assert!(stats(3, 1, 2, 1).is_consistent());
        assert!(!stats(3, 4, 0, 0).is_consistent());
        assert!(!stats(3, 2, 2, 0).is_consistent());
        assert!(!stats(3, 1, 0, 2).is_consistent());
    }

    #[test]
    fn test_stats_derived_counts() {
        let s = stats(5, 2, 1, 1);
        assert_eq!(s.free_slots(), Some(2));
        assert_eq!(s.unreserved_items(), 1);

        let unbounded = StoreStats {
            capacity: Capacity::Unbounded,
            ..s
        };
        assert_eq!(unbounded.free_slots(), None);
        assert!(unbounded.is_consistent());
    }
}
