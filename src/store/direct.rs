//! Direct, single-phase priority-ordered store.
//!
//! `put` and `get` are themselves the queued requests: there is no separate
//! reservation, and the moment a request is matched is the moment it takes
//! effect. A `put` hands its item straight to the most eligible waiting `get`
//! if there is one, otherwise stores it; on a full bounded store it queues
//! holding the item. A `get` takes the oldest stored item, otherwise queues.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use tracing::{debug, trace};

use crate::config::{Capacity, MonitorConfig, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::event::Event;
use crate::monitor::{Publisher, StoreEvent, StoreEvents};
use crate::queue::{Priority, QueueKey, Queued, RequestQueue};
use crate::reservation::{
    RequestKind, ReservationId, ReservationStatus, Resolution, Ticket,
};

use super::{lock_err, StoreId, StoreStats};

impl<V> Queued for Arc<Ticket<V>> {
    fn key(&self) -> QueueKey {
        Ticket::key(self)
    }
}

struct PendingPut<T> {
    ticket: Arc<Ticket<Resolution>>,
    item: T,
}

impl<T> Queued for PendingPut<T> {
    fn key(&self) -> QueueKey {
        self.ticket.key()
    }
}

struct Shared<T> {
    id: StoreId,
    name: String,
    capacity: Capacity,
    state: Mutex<State<T>>,
}

struct State<T> {
    items: VecDeque<T>,
    put_queue: RequestQueue<PendingPut<T>>,
    get_queue: RequestQueue<Arc<Ticket<Option<T>>>>,
    next_sequence: u64,
    publisher: Publisher,
}

impl<T> State<T> {
    fn new(monitor: MonitorConfig) -> Self {
        Self {
            items: VecDeque::new(),
            put_queue: RequestQueue::new(),
            get_queue: RequestQueue::new(),
            next_sequence: 0,
            publisher: Publisher::new(monitor),
        }
    }

    fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn stats(&self, capacity: Capacity) -> StoreStats {
        StoreStats {
            capacity,
            held: self.items.len(),
            reserved_puts: 0,
            reserved_gets: 0,
            pending_puts: self.put_queue.len(),
            pending_gets: self.get_queue.len(),
        }
    }

    fn complete_put(&mut self, ticket: &Ticket<Resolution>, store: &str) {
        ticket.resolve(ReservationStatus::Fulfilled, Resolution::Granted);
        debug!(store, id = %ticket.id(), priority = ticket.priority(), "put completed");
        self.publisher.publish(
            store,
            StoreEvent::Committed {
                request: ticket.info(),
            },
        );
    }

    fn deliver(&mut self, ticket: &Ticket<Option<T>>, item: T, store: &str) {
        ticket.resolve(ReservationStatus::Fulfilled, Some(item));
        debug!(store, id = %ticket.id(), priority = ticket.priority(), "get completed");
        self.publisher.publish(
            store,
            StoreEvent::Committed {
                request: ticket.info(),
            },
        );
    }

    /// Moves queued puts into the pool while there is room.
    fn admit_waiting_puts(&mut self, capacity: Capacity, store: &str) {
        while capacity.free(self.items.len()) > 0 {
            let Some(PendingPut { ticket, item }) = self.put_queue.pop() else {
                break;
            };
            self.items.push_back(item);
            self.complete_put(&ticket, store);
        }
    }
}

/// Handle for a `put` on a [`PriorityReqStore`].
///
/// Resolves to [`Resolution::Granted`] once the item is in the store (or
/// handed to a getter), or [`Resolution::Cancelled`] if withdrawn first.
pub struct PutRequest {
    ticket: Arc<Ticket<Resolution>>,
    event: Event<Resolution>,
}

impl PutRequest {
    fn new(ticket: Arc<Ticket<Resolution>>) -> Self {
        let event = ticket.event().clone();
        Self { ticket, event }
    }

    /// Identifier reported in logs and monitor events.
    #[must_use]
    pub fn id(&self) -> ReservationId {
        self.ticket.id()
    }

    /// Priority the request was queued with.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.ticket.priority()
    }

    /// `Pending`, `Fulfilled` or `Cancelled`.
    #[must_use]
    pub fn status(&self) -> ReservationStatus {
        self.ticket.status()
    }

    /// Returns true once the item has entered the store.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status() == ReservationStatus::Fulfilled
    }
}

impl Future for PutRequest {
    type Output = Resolution;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut()
            .event
            .poll_peek(cx)
            .map(|resolution| resolution.unwrap_or(Resolution::Cancelled))
    }
}

impl fmt::Debug for PutRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutRequest")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Handle for a `get` on a [`PriorityReqStore`].
///
/// Awaiting it yields the item. It fails with [`StoreError::Cancelled`] if the
/// request was withdrawn, and with [`StoreError::AlreadyFulfilled`] if the item
/// was already taken through [`try_take`](Self::try_take).
pub struct GetRequest<T> {
    ticket: Arc<Ticket<Option<T>>>,
    event: Event<Option<T>>,
}

impl<T> GetRequest<T> {
    fn new(ticket: Arc<Ticket<Option<T>>>) -> Self {
        let event = ticket.event().clone();
        Self { ticket, event }
    }

    /// Identifier reported in logs and monitor events.
    #[must_use]
    pub fn id(&self) -> ReservationId {
        self.ticket.id()
    }

    /// Priority the request was queued with.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.ticket.priority()
    }

    /// `Pending`, `Fulfilled` or `Cancelled`.
    #[must_use]
    pub fn status(&self) -> ReservationStatus {
        self.ticket.status()
    }

    /// Returns true once an item has been delivered to this request.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status() == ReservationStatus::Fulfilled
    }

    /// Takes the delivered item without waiting.
    ///
    /// Returns `None` while pending, after cancellation, or if already taken.
    pub fn try_take(&self) -> Option<T> {
        self.ticket.event().take().flatten()
    }

    fn missing_item(&self) -> StoreError {
        let id = self.ticket.id();
        match self.ticket.status() {
            ReservationStatus::Cancelled => StoreError::Cancelled { id },
            _ => StoreError::AlreadyFulfilled { id },
        }
    }
}

impl<T> Future for GetRequest<T> {
    type Output = StoreResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.event.poll_take(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Some(item))) => Poll::Ready(Ok(item)),
            Poll::Ready(_) => Poll::Ready(Err(this.missing_item())),
        }
    }
}

impl<T> fmt::Debug for GetRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetRequest")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Priority-ordered store where `put`/`get` are the requests.
///
/// No request is ever observably "granted but not taken": matching a request
/// and applying it happen in the same step.
pub struct PriorityReqStore<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for PriorityReqStore<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for PriorityReqStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityReqStore")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .finish_non_exhaustive()
    }
}

impl<T> PriorityReqStore<T> {
    /// Creates an empty store with default settings and the given capacity.
    #[must_use]
    pub fn new(capacity: Capacity) -> Self {
        let defaults = StoreConfig::default();
        Self::from_parts(defaults.name, capacity, defaults.monitor)
    }

    /// Creates an empty store from a validated config.
    pub fn with_config(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(config.name, config.capacity, config.monitor))
    }

    fn from_parts(name: String, capacity: Capacity, monitor: MonitorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: StoreId::new(),
                name,
                capacity,
                state: Mutex::new(State::new(monitor)),
            }),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State<T>>> {
        self.shared
            .state
            .lock()
            .map_err(|_| lock_err("priority_store"))
    }

    /// This store's identity; request handles carry it.
    #[must_use]
    pub fn id(&self) -> StoreId {
        self.shared.id
    }

    /// Name used in logs and monitor events.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> Capacity {
        self.shared.capacity
    }

    /// Offers `item` to the store.
    ///
    /// Completes immediately unless a bounded store is full, in which case the
    /// put waits (holding its item) until a `get` frees a slot.
    pub fn put(&self, item: T, priority: Priority) -> StoreResult<PutRequest> {
        let store = self.shared.name.as_str();
        let capacity = self.shared.capacity;
        let mut state = self.lock()?;

        let sequence = state.next_sequence();
        let ticket = Arc::new(Ticket::new(self.shared.id, RequestKind::Put, priority, sequence));
        trace!(store, id = %ticket.id(), priority, sequence, "put requested");
        state.publisher.publish(
            store,
            StoreEvent::Requested {
                request: ticket.info(),
            },
        );

        if let Some(waiting) = state.get_queue.pop() {
            debug_assert!(state.items.is_empty());
            state.deliver(&waiting, item, store);
            state.complete_put(&ticket, store);
        } else if capacity.free(state.items.len()) > 0 {
            state.items.push_back(item);
            state.complete_put(&ticket, store);
        } else {
            trace!(store, id = %ticket.id(), "store full; put queued");
            state.put_queue.enqueue(PendingPut {
                ticket: Arc::clone(&ticket),
                item,
            });
        }

        debug_assert!(state.stats(capacity).is_consistent());
        Ok(PutRequest::new(ticket))
    }

    /// Asks the store for an item.
    ///
    /// Completes immediately if an item is present, otherwise waits for a
    /// matching `put`. Taking an item from a full store admits the most
    /// eligible waiting put.
    pub fn get(&self, priority: Priority) -> StoreResult<GetRequest<T>> {
        let store = self.shared.name.as_str();
        let capacity = self.shared.capacity;
        let mut state = self.lock()?;

        let sequence = state.next_sequence();
        let ticket = Arc::new(Ticket::new(self.shared.id, RequestKind::Get, priority, sequence));
        trace!(store, id = %ticket.id(), priority, sequence, "get requested");
        state.publisher.publish(
            store,
            StoreEvent::Requested {
                request: ticket.info(),
            },
        );

        if let Some(item) = state.items.pop_front() {
            debug_assert!(state.get_queue.is_empty());
            state.deliver(&ticket, item, store);
            state.admit_waiting_puts(capacity, store);
        } else {
            trace!(store, id = %ticket.id(), "store empty; get queued");
            state.get_queue.enqueue(Arc::clone(&ticket));
        }

        debug_assert!(state.stats(capacity).is_consistent());
        Ok(GetRequest::new(ticket))
    }

    /// Withdraws a waiting put and returns its item.
    ///
    /// Returns `Ok(None)` if the put was already cancelled, and fails with
    /// [`StoreError::AlreadyFulfilled`] if the item already entered the store.
    pub fn cancel_put(&self, request: &PutRequest) -> StoreResult<Option<T>> {
        let store = self.shared.name.as_str();
        let mut state = self.lock()?;
        let ticket = &request.ticket;
        ticket.check_owner(self.shared.id)?;

        match ticket.status() {
            ReservationStatus::Pending => {
                let pending = state.put_queue.remove(ticket.key()).ok_or_else(|| {
                    StoreError::internal(format!("pending put {} missing from its queue", ticket.id()))
                })?;
                ticket.resolve(ReservationStatus::Cancelled, Resolution::Cancelled);
                debug!(store, id = %ticket.id(), "pending put cancelled");
                state.publisher.publish(
                    store,
                    StoreEvent::Cancelled {
                        request: ticket.info(),
                        was_granted: false,
                    },
                );
                Ok(Some(pending.item))
            }
            ReservationStatus::Cancelled => Ok(None),
            ReservationStatus::Fulfilled => Err(StoreError::AlreadyFulfilled { id: ticket.id() }),
            ReservationStatus::Granted => Err(StoreError::internal(
                "direct store request observed in granted state",
            )),
        }
    }

    /// Withdraws a waiting get. Its handle then fails with [`StoreError::Cancelled`].
    ///
    /// Cancelling twice is a no-op; cancelling a completed get fails with
    /// [`StoreError::AlreadyFulfilled`].
    pub fn cancel_get(&self, request: &GetRequest<T>) -> StoreResult<()> {
        let store = self.shared.name.as_str();
        let mut state = self.lock()?;
        let ticket = &request.ticket;
        ticket.check_owner(self.shared.id)?;

        match ticket.status() {
            ReservationStatus::Pending => {
                if state.get_queue.remove(ticket.key()).is_none() {
                    return Err(StoreError::internal(format!(
                        "pending get {} missing from its queue",
                        ticket.id()
                    )));
                }
                ticket.resolve(ReservationStatus::Cancelled, None);
                debug!(store, id = %ticket.id(), "pending get cancelled");
                state.publisher.publish(
                    store,
                    StoreEvent::Cancelled {
                        request: ticket.info(),
                        was_granted: false,
                    },
                );
                Ok(())
            }
            ReservationStatus::Cancelled => Ok(()),
            ReservationStatus::Fulfilled => Err(StoreError::AlreadyFulfilled { id: ticket.id() }),
            ReservationStatus::Granted => Err(StoreError::internal(
                "direct store request observed in granted state",
            )),
        }
    }

    /// Snapshot of the store's counters. Reserved counts are always zero.
    pub fn stats(&self) -> StoreResult<StoreStats> {
        Ok(self.lock()?.stats(self.shared.capacity))
    }

    /// Number of items physically present.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.lock()?.items.len())
    }

    /// Returns true if no items are present.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.lock()?.items.is_empty())
    }

    /// Subscribes to this store's lifecycle events.
    pub fn subscribe(&self) -> StoreResult<StoreEvents> {
        Ok(self.lock()?.publisher.subscribe())
    }

    /// Events dropped because a subscriber's buffer was full.
    pub fn dropped_events(&self) -> StoreResult<u64> {
        Ok(self.lock()?.publisher.dropped())
    }
}

impl<T: Clone> PriorityReqStore<T> {
    /// A copy of the pool, oldest item first.
    pub fn items(&self) -> StoreResult<Vec<T>> {
        Ok(self.lock()?.items.iter().cloned().collect())
    }
}
