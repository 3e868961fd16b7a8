//! Two-phase reserve-then-commit store.
//!
//! `reserve_put`/`reserve_get` queue a request for a capacity unit (a free slot
//! or an available item). The grant algorithm hands units to queued requests in
//! `(priority, sequence)` order and resolves their handles; the owner later
//! commits with `put`/`get`.
//!
//! # Grant rule
//!
//! A unit becoming available re-evaluates exactly one queue:
//!
//! | trigger                          | queue evaluated        |
//! |----------------------------------|------------------------|
//! | `reserve_put` / `reserve_get`    | the new request's own  |
//! | `put` commit (new item)          | gets                   |
//! | `get` commit (freed slot)        | puts                   |
//! | cancel of a granted reservation  | the cancelled one's own|
//!
//! Evaluation is greedy: heads of the queue are granted while units remain.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::config::{Capacity, MonitorConfig, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::monitor::{Publisher, StoreEvent, StoreEvents};
use crate::queue::{Priority, RequestQueue};
use crate::reservation::{RequestKind, Reservation, ReservationStatus, Resolution};

use super::{lock_err, StoreId, StoreStats};

struct Shared<T> {
    id: StoreId,
    name: String,
    capacity: Capacity,
    state: Mutex<State<T>>,
}

struct State<T> {
    items: VecDeque<T>,
    reserved_puts: usize,
    reserved_gets: usize,
    put_queue: RequestQueue<Reservation>,
    get_queue: RequestQueue<Reservation>,
    next_sequence: u64,
    publisher: Publisher,
}

impl<T> State<T> {
    fn new(monitor: MonitorConfig) -> Self {
        Self {
            items: VecDeque::new(),
            reserved_puts: 0,
            reserved_gets: 0,
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

    fn queue_mut(&mut self, kind: RequestKind) -> &mut RequestQueue<Reservation> {
        match kind {
            RequestKind::Put => &mut self.put_queue,
            RequestKind::Get => &mut self.get_queue,
        }
    }

    fn reserved_mut(&mut self, kind: RequestKind) -> &mut usize {
        match kind {
            RequestKind::Put => &mut self.reserved_puts,
            RequestKind::Get => &mut self.reserved_gets,
        }
    }

    /// Units a queue of `kind` may be granted right now.
    fn available(&self, kind: RequestKind, capacity: Capacity) -> usize {
        match kind {
            RequestKind::Put => capacity.free(self.items.len() + self.reserved_puts),
            RequestKind::Get => self.items.len().saturating_sub(self.reserved_gets),
        }
    }

    fn stats(&self, capacity: Capacity) -> StoreStats {
        StoreStats {
            capacity,
            held: self.items.len(),
            reserved_puts: self.reserved_puts,
            reserved_gets: self.reserved_gets,
            pending_puts: self.put_queue.len(),
            pending_gets: self.get_queue.len(),
        }
    }

    /// Grants queued requests of `kind` while units remain.
    fn evaluate(&mut self, kind: RequestKind, capacity: Capacity, store: &str) -> usize {
        let available = self.available(kind, capacity);
        let Self {
            put_queue,
            get_queue,
            reserved_puts,
            reserved_gets,
            publisher,
            ..
        } = self;
        let (queue, reserved) = match kind {
            RequestKind::Put => (put_queue, reserved_puts),
            RequestKind::Get => (get_queue, reserved_gets),
        };

        queue.grant_eligible(available, |reservation| {
            *reserved += 1;
            reservation
                .ticket()
                .resolve(ReservationStatus::Granted, Resolution::Granted);
            debug!(
                store,
                id = %reservation.id(),
                %kind,
                priority = reservation.priority(),
                sequence = reservation.sequence(),
                "reservation granted"
            );
            publisher.publish(
                store,
                StoreEvent::Granted {
                    request: reservation.ticket().info(),
                },
            );
        })
    }
}

/// Priority-ordered store with reserve-then-commit semantics.
///
/// Which item a `get` returns is not tied to any reservation; the oldest item
/// in the pool is handed out.
pub struct ReservablePriorityReqStore<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ReservablePriorityReqStore<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ReservablePriorityReqStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservablePriorityReqStore")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .finish_non_exhaustive()
    }
}

impl<T> ReservablePriorityReqStore<T> {
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
            .map_err(|_| lock_err("reservable_store"))
    }

    /// This store's identity; reservations carry it.
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

    /// Requests a free slot. Granted immediately if one is unreserved.
    pub fn reserve_put(&self, priority: Priority) -> StoreResult<Reservation> {
        self.reserve(RequestKind::Put, priority)
    }

    /// Requests an item. Granted immediately if one is unreserved.
    pub fn reserve_get(&self, priority: Priority) -> StoreResult<Reservation> {
        self.reserve(RequestKind::Get, priority)
    }

    fn reserve(&self, kind: RequestKind, priority: Priority) -> StoreResult<Reservation> {
        let store = self.shared.name.as_str();
        let mut state = self.lock()?;

        let sequence = state.next_sequence();
        let reservation = Reservation::new(self.shared.id, kind, priority, sequence);
        trace!(
            store,
            id = %reservation.id(),
            %kind,
            priority,
            sequence,
            "reservation requested"
        );
        state.publisher.publish(
            store,
            StoreEvent::Requested {
                request: reservation.ticket().info(),
            },
        );

        state.queue_mut(kind).enqueue(reservation.clone());
        state.evaluate(kind, self.shared.capacity, store);
        debug_assert!(state.stats(self.shared.capacity).is_consistent());
        Ok(reservation)
    }

    /// Commits a granted put reservation, adding `item` to the pool.
    ///
    /// The new item is offered to waiting get reservations. On error the item
    /// is dropped and the store is unchanged; use [`try_put`](Self::try_put)
    /// to get it back.
    pub fn put(&self, reservation: &Reservation, item: T) -> StoreResult<()> {
        self.try_put(reservation, item).map_err(|(err, _)| err)
    }

    /// Like [`put`](Self::put), but a rejected commit hands `item` back
    /// alongside the error.
    pub fn try_put(&self, reservation: &Reservation, item: T) -> Result<(), (StoreError, T)> {
        let store = self.shared.name.as_str();
        let mut state = match self.lock() {
            Ok(state) => state,
            Err(err) => return Err((err, item)),
        };
        let ticket = reservation.ticket();
        if let Err(err) = ticket.check_commit(self.shared.id, RequestKind::Put) {
            return Err((err, item));
        }

        state.items.push_back(item);
        state.reserved_puts -= 1;
        ticket.set_status(ReservationStatus::Fulfilled);
        debug!(store, id = %ticket.id(), held = state.items.len(), "put committed");
        state.publisher.publish(
            store,
            StoreEvent::Committed {
                request: ticket.info(),
            },
        );

        state.evaluate(RequestKind::Get, self.shared.capacity, store);
        debug_assert!(state.stats(self.shared.capacity).is_consistent());
        Ok(())
    }

    /// Commits a granted get reservation, removing and returning an item.
    ///
    /// The freed slot is offered to waiting put reservations.
    pub fn get(&self, reservation: &Reservation) -> StoreResult<T> {
        let store = self.shared.name.as_str();
        let mut state = self.lock()?;
        let ticket = reservation.ticket();
        ticket.check_commit(self.shared.id, RequestKind::Get)?;

        let item = state
            .items
            .pop_front()
            .ok_or_else(|| StoreError::internal("granted get reservation found an empty pool"))?;
        state.reserved_gets -= 1;
        ticket.set_status(ReservationStatus::Fulfilled);
        debug!(store, id = %ticket.id(), held = state.items.len(), "get committed");
        state.publisher.publish(
            store,
            StoreEvent::Committed {
                request: ticket.info(),
            },
        );

        state.evaluate(RequestKind::Put, self.shared.capacity, store);
        debug_assert!(state.stats(self.shared.capacity).is_consistent());
        Ok(item)
    }

    /// Cancels a put reservation.
    ///
    /// See [`cancel`](Self::cancel); additionally fails with
    /// [`StoreError::WrongKind`] for a get reservation.
    pub fn reserve_put_cancel(&self, reservation: &Reservation) -> StoreResult<()> {
        self.cancel_as(reservation, RequestKind::Put)
    }

    /// Cancels a get reservation.
    ///
    /// See [`cancel`](Self::cancel); additionally fails with
    /// [`StoreError::WrongKind`] for a put reservation.
    pub fn reserve_get_cancel(&self, reservation: &Reservation) -> StoreResult<()> {
        self.cancel_as(reservation, RequestKind::Get)
    }

    /// Cancels a reservation of either kind.
    ///
    /// - pending: leaves the queue; its handle resolves as [`Resolution::Cancelled`].
    /// - granted: releases its unit, which is re-offered to the same queue.
    /// - cancelled: no-op.
    /// - fulfilled: fails with [`StoreError::AlreadyFulfilled`].
    pub fn cancel(&self, reservation: &Reservation) -> StoreResult<()> {
        self.cancel_as(reservation, reservation.kind())
    }

    fn cancel_as(&self, reservation: &Reservation, kind: RequestKind) -> StoreResult<()> {
        let store = self.shared.name.as_str();
        let mut state = self.lock()?;
        let ticket = reservation.ticket();
        ticket.check_owner(self.shared.id)?;
        ticket.check_kind(kind)?;

        match ticket.status() {
            ReservationStatus::Pending => {
                if state.queue_mut(kind).remove(ticket.key()).is_none() {
                    return Err(StoreError::internal(format!(
                        "pending reservation {} missing from the {kind} queue",
                        ticket.id()
                    )));
                }
                ticket.resolve(ReservationStatus::Cancelled, Resolution::Cancelled);
                debug!(store, id = %ticket.id(), %kind, "pending reservation cancelled");
                state.publisher.publish(
                    store,
                    StoreEvent::Cancelled {
                        request: ticket.info(),
                        was_granted: false,
                    },
                );
            }
            ReservationStatus::Granted => {
                *state.reserved_mut(kind) -= 1;
                ticket.set_status(ReservationStatus::Cancelled);
                debug!(store, id = %ticket.id(), %kind, "granted reservation cancelled");
                state.publisher.publish(
                    store,
                    StoreEvent::Cancelled {
                        request: ticket.info(),
                        was_granted: true,
                    },
                );
                state.evaluate(kind, self.shared.capacity, store);
            }
            ReservationStatus::Cancelled => {
                trace!(store, id = %ticket.id(), "reservation already cancelled");
            }
            ReservationStatus::Fulfilled => {
                return Err(StoreError::AlreadyFulfilled { id: ticket.id() });
            }
        }

        debug_assert!(state.stats(self.shared.capacity).is_consistent());
        Ok(())
    }

    /// Snapshot of the store's counters.
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

    /// Pending reservations of `kind`, in grant order.
    pub fn queued(&self, kind: RequestKind) -> StoreResult<Vec<Reservation>> {
        let mut state = self.lock()?;
        Ok(state.queue_mut(kind).iter().cloned().collect())
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

impl<T: Clone> ReservablePriorityReqStore<T> {
    /// A copy of the pool, oldest item first.
    pub fn items(&self) -> StoreResult<Vec<T>> {
        Ok(self.lock()?.items.iter().cloned().collect())
    }
}
