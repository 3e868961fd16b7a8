//! # priostore - Priority request stores for discrete-event simulation
//!
//! priostore models buffers, inventories and machine input/output staging as
//! capacity-bounded item stores whose requests are served in priority order.
//! It owns request queueing, capacity accounting, the grant algorithm and
//! cancellation; the host simulation kernel owns time and task scheduling.
//!
//! ## Core Concepts
//!
//! - **Reservation**: an accepted intent to put or get, resolved when a capacity unit is granted
//! - **Grant**: assigning a free slot (put) or an available item (get) to the most eligible request
//! - **Commit**: exercising a granted reservation with `put`/`get`
//! - **Priority**: lower values are served first; ties are served in arrival order
//!
//! ## Usage
//!
//! ```rust,ignore
//! use priostore::{Capacity, ReservablePriorityReqStore, Resolution};
//!
//! let buffer = ReservablePriorityReqStore::new(Capacity::bounded(1)?);
//!
//! // Producer: reserve a slot, wait for the grant, then commit.
//! let slot = buffer.reserve_put(0)?;
//! assert_eq!(slot.clone().await, Resolution::Granted);
//! buffer.put(&slot, "part-17")?;
//!
//! // Consumer: same dance on the other side.
//! let part = buffer.reserve_get(0)?;
//! part.clone().await;
//! assert_eq!(buffer.get(&part)?, "part-17");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod event;
pub mod monitor;
pub mod queue;
pub mod reservation;
pub mod store;

// Re-export primary types at crate root for convenience
pub use config::{Capacity, MonitorConfig, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use event::Event;
pub use monitor::{RequestInfo, StoreEvent, StoreEvents};
pub use queue::{Priority, QueueKey, Queued, RequestQueue};
pub use reservation::{RequestKind, Reservation, ReservationId, ReservationStatus, Resolution};
pub use store::{
    GetRequest, PriorityReqStore, PutRequest, ReservablePriorityReqStore, StoreId, StoreStats,
};
