//! Reservations: accepted intents to put into or get from a store.
//!
//! A reservation moves through a small state machine:
//!
//! ```text
//! pending ──grant──▶ granted ──commit──▶ fulfilled
//!    │                  │
//!    └──cancel──▶ cancelled ◀──cancel──┘
//! ```
//!
//! `fulfilled` and `cancelled` are terminal. Status changes are made by the
//! owning store while it holds its state lock; the handle only reads them.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::event::Event;
use crate::monitor::RequestInfo;
use crate::queue::{Priority, QueueKey, Queued};
use crate::store::StoreId;

/// Unique identifier for a reservation or direct request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new random reservation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a request adds an item or removes one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Wants a free slot.
    Put,
    /// Wants an available item.
    Get,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put => write!(f, "put"),
            Self::Get => write!(f, "get"),
        }
    }
}

/// Lifecycle status of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ReservationStatus {
    /// Queued, waiting for a capacity unit.
    Pending = 0,
    /// Holds a capacity unit; not yet committed.
    Granted = 1,
    /// Withdrawn by its owner.
    Cancelled = 2,
    /// Committed.
    Fulfilled = 3,
}

impl ReservationStatus {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Granted,
            2 => Self::Cancelled,
            _ => Self::Fulfilled,
        }
    }

    /// Returns true for `fulfilled` and `cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Fulfilled)
    }

    /// Returns true if `self → next` is an allowed transition.
    ///
    /// `pending → fulfilled` is allowed for direct stores, where the wait and
    /// the commit are one step.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Granted | Self::Cancelled | Self::Fulfilled)
                | (Self::Granted, Self::Fulfilled | Self::Cancelled)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Granted => write!(f, "granted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Fulfilled => write!(f, "fulfilled"),
        }
    }
}

/// How a wait on a reservation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// A capacity unit was assigned (or, for a direct put, the item was accepted).
    Granted,
    /// The request was cancelled while still pending.
    Cancelled,
}

/// Shared record behind every request handle.
pub(crate) struct Ticket<V> {
    id: ReservationId,
    kind: RequestKind,
    priority: Priority,
    sequence: u64,
    store: StoreId,
    status: AtomicU8,
    event: Event<V>,
}

impl<V> Ticket<V> {
    pub(crate) fn new(store: StoreId, kind: RequestKind, priority: Priority, sequence: u64) -> Self {
        Self {
            id: ReservationId::new(),
            kind,
            priority,
            sequence,
            store,
            status: AtomicU8::new(ReservationStatus::Pending as u8),
            event: Event::new(),
        }
    }

    pub(crate) const fn id(&self) -> ReservationId {
        self.id
    }

    pub(crate) const fn kind(&self) -> RequestKind {
        self.kind
    }

    pub(crate) const fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) const fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) const fn store(&self) -> StoreId {
        self.store
    }

    pub(crate) const fn key(&self) -> QueueKey {
        QueueKey::new(self.priority, self.sequence)
    }

    pub(crate) fn status(&self) -> ReservationStatus {
        ReservationStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) const fn event(&self) -> &Event<V> {
        &self.event
    }

    pub(crate) fn info(&self) -> RequestInfo {
        RequestInfo {
            store: self.store,
            id: self.id,
            kind: self.kind,
            priority: self.priority,
            sequence: self.sequence,
        }
    }

    /// Moves to `next`. Callers hold the owning store's lock.
    pub(crate) fn set_status(&self, next: ReservationStatus) {
        debug_assert!(
            self.status().can_transition_to(next),
            "illegal reservation transition {} -> {next}",
            self.status()
        );
        self.status.store(next as u8, Ordering::Release);
    }

    /// Moves to `next` and resolves the event with `value`.
    pub(crate) fn resolve(&self, next: ReservationStatus, value: V) {
        self.set_status(next);
        self.event.trigger(value);
    }

    pub(crate) fn check_owner(&self, store: StoreId) -> StoreResult<()> {
        if self.store == store {
            Ok(())
        } else {
            Err(StoreError::ForeignReservation {
                id: self.id,
                owner: self.store,
                store,
            })
        }
    }

    pub(crate) fn check_kind(&self, expected: RequestKind) -> StoreResult<()> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(StoreError::WrongKind {
                id: self.id,
                expected,
                actual: self.kind,
            })
        }
    }

    /// Validates a two-phase commit: right store, right kind, granted.
    pub(crate) fn check_commit(&self, store: StoreId, kind: RequestKind) -> StoreResult<()> {
        self.check_owner(store)?;
        self.check_kind(kind)?;
        match self.status() {
            ReservationStatus::Granted => Ok(()),
            status @ ReservationStatus::Pending => Err(StoreError::NotGranted { id: self.id, status }),
            ReservationStatus::Cancelled => Err(StoreError::Cancelled { id: self.id }),
            ReservationStatus::Fulfilled => Err(StoreError::AlreadyFulfilled { id: self.id }),
        }
    }
}

/// Handle for a reservation issued by a
/// [`ReservablePriorityReqStore`](crate::ReservablePriorityReqStore).
///
/// Cheap to clone; clones observe the same status. Awaiting the handle (or a
/// clone) completes once the reservation leaves `pending`:
///
/// ```rust,ignore
/// let slot = store.reserve_put(0)?;
/// if slot.clone().await == Resolution::Granted {
///     store.put(&slot, item)?;
/// }
/// ```
///
/// A caller that stops waiting (for example because a timer won a race) must
/// cancel the reservation. A grant nobody commits or cancels holds its unit for
/// the rest of the run.
#[derive(Clone)]
pub struct Reservation {
    ticket: Arc<Ticket<Resolution>>,
    // Per-handle waiter; clones start unregistered.
    event: Event<Resolution>,
}

impl Reservation {
    pub(crate) fn new(store: StoreId, kind: RequestKind, priority: Priority, sequence: u64) -> Self {
        let ticket = Arc::new(Ticket::new(store, kind, priority, sequence));
        let event = ticket.event().clone();
        Self { ticket, event }
    }

    pub(crate) fn ticket(&self) -> &Ticket<Resolution> {
        &self.ticket
    }

    /// Unique reservation id.
    #[must_use]
    pub fn id(&self) -> ReservationId {
        self.ticket.id()
    }

    /// Put or get.
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.ticket.kind()
    }

    /// Priority the reservation was queued with.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.ticket.priority()
    }

    /// Arrival sequence within the issuing store.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.ticket.sequence()
    }

    /// The store that issued this reservation.
    #[must_use]
    pub fn store_id(&self) -> StoreId {
        self.ticket.store()
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> ReservationStatus {
        self.ticket.status()
    }

    /// Returns true while waiting for a grant.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status() == ReservationStatus::Pending
    }

    /// Returns true if granted and not yet committed or cancelled.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.status() == ReservationStatus::Granted
    }

    /// Returns true once the completion handle has resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.ticket.event().is_triggered()
    }

    /// The underlying completion handle.
    #[must_use]
    pub fn event(&self) -> Event<Resolution> {
        self.ticket.event().clone()
    }
}

impl Queued for Reservation {
    fn key(&self) -> QueueKey {
        self.ticket.key()
    }
}

impl Future for Reservation {
    type Output = Resolution;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The resolution is `Copy` and never taken, so a resolved event always
        // carries a value.
        self.get_mut()
            .event
            .poll_peek(cx)
            .map(|resolution| resolution.unwrap_or(Resolution::Cancelled))
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("priority", &self.priority())
            .field("sequence", &self.sequence())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Reservation {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Reservation {}
