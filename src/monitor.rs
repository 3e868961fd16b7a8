//! Store lifecycle monitoring.
//!
//! A store publishes a [`StoreEvent`] whenever a request is created, granted,
//! committed or cancelled. Subscribers receive them through a bounded channel;
//! publishing never blocks the store. When a subscriber's buffer is full the
//! event is dropped and counted, and disconnected subscribers are pruned on the
//! next publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::MonitorConfig;
use crate::queue::Priority;
use crate::reservation::{RequestKind, ReservationId};
use crate::store::StoreId;

/// Identity of the request an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Issuing store.
    pub store: StoreId,
    /// Request id.
    pub id: ReservationId,
    /// Put or get.
    pub kind: RequestKind,
    /// Request priority.
    pub priority: Priority,
    /// Arrival sequence within the store.
    pub sequence: u64,
}

/// Lifecycle event emitted by a store.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A request was created and enqueued.
    Requested { request: RequestInfo },
    /// A reservation was assigned a capacity unit.
    Granted { request: RequestInfo },
    /// A request took effect on the pool.
    Committed { request: RequestInfo },
    /// A request was cancelled. `was_granted` is true if it released a unit.
    Cancelled { request: RequestInfo, was_granted: bool },
}

impl StoreEvent {
    /// The request this event is about.
    #[must_use]
    pub const fn request(&self) -> &RequestInfo {
        match self {
            Self::Requested { request }
            | Self::Granted { request }
            | Self::Committed { request }
            | Self::Cancelled { request, .. } => request,
        }
    }
}

/// Fan-out of store events to subscribers.
#[derive(Debug)]
pub(crate) struct Publisher {
    config: MonitorConfig,
    subscribers: Vec<Sender<StoreEvent>>,
    dropped: Arc<AtomicU64>,
}

impl Publisher {
    pub(crate) fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            subscribers: Vec::new(),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn subscribe(&mut self) -> StoreEvents {
        let (tx, rx) = bounded(self.config.buffer_capacity.max(1));
        self.subscribers.push(tx);
        StoreEvents { rx }
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn publish(&mut self, store: &str, event: StoreEvent) {
        if self.subscribers.is_empty() {
            return;
        }
        let dropped = &self.dropped;
        self.subscribers.retain(|tx| match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(store, dropped = total, "monitor subscriber is full; dropping store event");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

/// Subscriber end of a store's event feed.
///
/// Dropping it unsubscribes on the store's next publish.
#[derive(Debug)]
pub struct StoreEvents {
    rx: Receiver<StoreEvent>,
}

impl StoreEvents {
    /// Next buffered event, if any.
    #[must_use]
    pub fn try_recv(&self) -> Option<StoreEvent> {
        self.rx.try_recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    ///
    /// Returns `None` on timeout or once the store is gone and the buffer is drained.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<StoreEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// All currently buffered events, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<StoreEvent> {
        self.rx.try_iter().collect()
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true if no events are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
