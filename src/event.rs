//! Single-resolution completion handles.
//!
//! An [`Event`] is resolved at most once. Resolution stores the value and
//! calls [`Notify::notify_waiters`]; every clone that is waiting holds its own
//! [`OwnedNotified`] registration, which is replaced (not duplicated) when the
//! clone is polled again and released when the clone is dropped. Only the
//! `sync` part of tokio is used, so waiting works under any executor.
//!
//! Stores resolve events directly from the grant algorithm; the request
//! handles built on top of them implement [`Future`], so they compose with any
//! external combinator such as `futures::future::join_all`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::futures::OwnedNotified;
use tokio::sync::Notify;

struct Slot<T> {
    triggered: bool,
    value: Option<T>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    notify: Arc<Notify>,
}

/// A completion handle that can be resolved exactly once.
///
/// Clones share the resolution but wait independently: each clone keeps at
/// most one registration with the underlying [`Notify`].
pub struct Event<T> {
    shared: Arc<Shared<T>>,
    waiter: Option<Pin<Box<OwnedNotified>>>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            waiter: None,
        }
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("triggered", &self.is_triggered())
            .field("waiting", &self.waiter.is_some())
            .finish_non_exhaustive()
    }
}

impl<T> Event<T> {
    /// Creates an unresolved event.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    triggered: false,
                    value: None,
                }),
                notify: Arc::new(Notify::new()),
            }),
            waiter: None,
        }
    }

    // Every update is a single field write, so a poisoned slot is still coherent.
    fn slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.shared.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves the event and wakes every waiting clone.
    ///
    /// Returns false (dropping `value`) if the event was already resolved.
    pub fn trigger(&self, value: T) -> bool {
        {
            let mut slot = self.slot();
            if slot.triggered {
                return false;
            }
            slot.triggered = true;
            slot.value = Some(value);
        }
        self.shared.notify.notify_waiters();
        true
    }

    /// Returns true once the event has been resolved.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.slot().triggered
    }

    /// Takes the resolved value out of the event.
    ///
    /// Returns `None` if the event is unresolved or the value was already taken.
    pub fn take(&self) -> Option<T> {
        self.slot().value.take()
    }

    /// Returns true if this clone currently holds a waiter registration.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiter.is_some()
    }

    /// Polls for resolution, registering this clone's waiter if unresolved.
    fn poll_resolved(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        loop {
            if self.is_triggered() {
                self.waiter = None;
                return Poll::Ready(());
            }
            let shared = &self.shared;
            let waiter = self
                .waiter
                .get_or_insert_with(|| Box::pin(Arc::clone(&shared.notify).notified_owned()));
            // The registration is created before the second check, so a trigger
            // landing in between is still observed by the poll below.
            if shared.slot.lock().unwrap_or_else(PoisonError::into_inner).triggered {
                self.waiter = None;
                return Poll::Ready(());
            }
            match waiter.as_mut().poll(cx) {
                Poll::Ready(()) => self.waiter = None,
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    /// Polls for the value, taking it on resolution.
    ///
    /// Resolves to `None` if another holder already took the value.
    pub fn poll_take(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        match self.poll_resolved(cx) {
            Poll::Ready(()) => Poll::Ready(self.take()),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Returns true if both handles refer to the same event.
    #[must_use]
    pub fn same_event(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: Clone> Event<T> {
    /// A copy of the resolved value, if any.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.slot().value.clone()
    }

    /// Polls for the value without consuming it.
    pub fn poll_peek(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        match self.poll_resolved(cx) {
            Poll::Ready(()) => Poll::Ready(self.value()),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Wake, Waker};

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_waker() -> (Arc<CountingWaker>, Waker) {
        let inner = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&inner));
        (inner, waker)
    }

    #[test]
    fn test_trigger_once() {
        let event = Event::new();
        assert!(!event.is_triggered());
        assert!(event.trigger(1));
        assert!(!event.trigger(2));
        assert!(event.is_triggered());
        assert_eq!(event.value(), Some(1));
    }

    #[test]
    fn test_poll_registers_and_wakes() {
        let mut event: Event<u32> = Event::new();
        let (counter, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);

        assert!(event.poll_peek(&mut cx).is_pending());
        assert!(event.is_waiting());
        assert!(event.poll_peek(&mut cx).is_pending());

        event.trigger(7);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(event.poll_peek(&mut cx), Poll::Ready(Some(7)));
        assert!(!event.is_waiting());
    }

    #[test]
    fn test_repolling_with_new_wakers_wakes_only_latest() {
        let mut event: Event<u8> = Event::new();
        let wakers: Vec<_> = (0..1000).map(|_| counting_waker()).collect();
        for (_, waker) in &wakers {
            let mut cx = Context::from_waker(waker);
            assert!(event.poll_peek(&mut cx).is_pending());
        }

        event.trigger(1);
        let woken: usize = wakers
            .iter()
            .map(|(counter, _)| counter.0.load(Ordering::SeqCst))
            .sum();
        // One registration per clone: earlier wakers were replaced.
        assert_eq!(woken, 1);
        assert_eq!(wakers[999].0 .0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_clone_releases_registration() {
        let event: Event<u8> = Event::new();
        let (counter, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);

        let mut waiting = event.clone();
        assert!(waiting.poll_peek(&mut cx).is_pending());
        drop(waiting);

        event.trigger(3);
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clones_wait_independently() {
        let event: Event<u8> = Event::new();
        let mut first = event.clone();
        let mut second = event.clone();
        let (a, waker_a) = counting_waker();
        let (b, waker_b) = counting_waker();

        assert!(first.poll_peek(&mut Context::from_waker(&waker_a)).is_pending());
        assert!(second.poll_peek(&mut Context::from_waker(&waker_b)).is_pending());

        event.trigger(9);
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
        assert_eq!(first.poll_peek(&mut Context::from_waker(&waker_a)), Poll::Ready(Some(9)));
    }

    #[test]
    fn test_take_consumes_for_all_clones() {
        let mut event = Event::new();
        let mut other = event.clone();
        assert!(event.same_event(&other));

        event.trigger(String::from("X"));
        let (_, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);

        assert_eq!(other.poll_take(&mut cx), Poll::Ready(Some("X".to_string())));
        assert_eq!(event.poll_take(&mut cx), Poll::Ready(None));
        assert!(event.take().is_none());
        assert!(event.is_triggered());
    }
}
