//! Error types for priostore.
//!
//! Every failure is a synchronous, recoverable contract violation by the caller.
//! A rejected operation leaves the store's counters, queues and pool untouched,
//! so callers can match on the variant and carry on with the same store.

use thiserror::Error;

use crate::reservation::{RequestKind, ReservationId, ReservationStatus};
use crate::store::StoreId;

/// Errors returned by store operations.
///
/// Variants are flat; the category predicates ([`is_reservation_state`],
/// [`is_ownership`], [`is_capacity_misuse`]) group them. A variant may belong to
/// more than one category: committing an ungranted reservation is both an invalid
/// state transition and a misuse of capacity accounting.
///
/// [`is_reservation_state`]: StoreError::is_reservation_state
/// [`is_ownership`]: StoreError::is_ownership
/// [`is_capacity_misuse`]: StoreError::is_capacity_misuse
#[derive(Debug, Error)]
pub enum StoreError {
    /// Commit attempted before the reservation was granted.
    #[error("Reservation {id} is {status}; only granted reservations can be committed")]
    NotGranted {
        id: ReservationId,
        status: ReservationStatus,
    },

    /// Commit attempted on a cancelled request, or a cancelled request was awaited.
    #[error("Request {id} was cancelled")]
    Cancelled {
        id: ReservationId,
    },

    /// Double commit, or cancellation of a request that already completed.
    #[error("Request {id} was already fulfilled")]
    AlreadyFulfilled {
        id: ReservationId,
    },

    /// The handle was issued by a different store instance.
    #[error("Request {id} belongs to store {owner}, not {store}")]
    ForeignReservation {
        id: ReservationId,
        owner: StoreId,
        store: StoreId,
    },

    /// A put reservation used for a get, or vice versa.
    #[error("Reservation {id} is a {actual} reservation, expected {expected}")]
    WrongKind {
        id: ReservationId,
        expected: RequestKind,
        actual: RequestKind,
    },

    /// A store config failed validation.
    #[error("Invalid store configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    /// A broken internal invariant, such as a poisoned lock.
    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl StoreError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns true if the operation was invalid for the request's current status.
    #[must_use]
    pub const fn is_reservation_state(&self) -> bool {
        matches!(
            self,
            Self::NotGranted { .. } | Self::Cancelled { .. } | Self::AlreadyFulfilled { .. }
        )
    }

    /// Returns true if the handle was used against the wrong store or for the wrong kind.
    #[must_use]
    pub const fn is_ownership(&self) -> bool {
        matches!(self, Self::ForeignReservation { .. } | Self::WrongKind { .. })
    }

    /// Returns true if the call would have broken capacity accounting
    /// (commit without grant, double commit, cancel after fulfil).
    #[must_use]
    pub const fn is_capacity_misuse(&self) -> bool {
        matches!(self, Self::NotGranted { .. } | Self::AlreadyFulfilled { .. })
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// The id of the request the error refers to, if any.
    #[must_use]
    pub const fn request_id(&self) -> Option<ReservationId> {
        match self {
            Self::NotGranted { id, .. }
            | Self::Cancelled { id }
            | Self::AlreadyFulfilled { id }
            | Self::ForeignReservation { id, .. }
            | Self::WrongKind { id, .. } => Some(*id),
            Self::InvalidConfig { .. } | Self::Internal { .. } => None,
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
