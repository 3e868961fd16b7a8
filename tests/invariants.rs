//! Property tests: accounting invariants hold for every reachable state.

use priostore::{
    Capacity, PriorityReqStore, RequestKind, Reservation, ReservablePriorityReqStore,
    ReservationStatus, StoreStats,
};
use proptest::prelude::*;

// ============================================================================
// Generators
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    ReservePut(i64),
    ReserveGet(i64),
    /// Commit the n-th outstanding reservation (modulo count).
    Commit(usize),
    /// Cancel the n-th reservation ever issued (modulo count).
    Cancel(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..4).prop_map(Op::ReservePut),
        (0i64..4).prop_map(Op::ReserveGet),
        any::<usize>().prop_map(Op::Commit),
        any::<usize>().prop_map(Op::Cancel),
    ]
}

#[derive(Debug, Clone)]
enum DirectOp {
    Put(i64),
    Get(i64),
    CancelPut(usize),
    CancelGet(usize),
}

fn arb_direct_op() -> impl Strategy<Value = DirectOp> {
    prop_oneof![
        (0i64..4).prop_map(DirectOp::Put),
        (0i64..4).prop_map(DirectOp::Get),
        any::<usize>().prop_map(DirectOp::CancelPut),
        any::<usize>().prop_map(DirectOp::CancelGet),
    ]
}

// ============================================================================
// Checks
// ============================================================================

fn count(reservations: &[Reservation], kind: RequestKind, status: ReservationStatus) -> usize {
    reservations
        .iter()
        .filter(|r| r.kind() == kind && r.status() == status)
        .count()
}

fn check_reservable(stats: &StoreStats, reservations: &[Reservation]) -> Result<(), TestCaseError> {
    prop_assert!(stats.is_consistent(), "inconsistent stats: {stats:?}");

    // Counters agree with reservation statuses.
    prop_assert_eq!(stats.reserved_puts, count(reservations, RequestKind::Put, ReservationStatus::Granted));
    prop_assert_eq!(stats.reserved_gets, count(reservations, RequestKind::Get, ReservationStatus::Granted));
    prop_assert_eq!(stats.pending_puts, count(reservations, RequestKind::Put, ReservationStatus::Pending));
    prop_assert_eq!(stats.pending_gets, count(reservations, RequestKind::Get, ReservationStatus::Pending));

    // Greedy grants: nothing waits while a unit is available for it.
    if stats.pending_puts > 0 {
        prop_assert_eq!(stats.free_slots(), Some(0));
    }
    if stats.pending_gets > 0 {
        prop_assert_eq!(stats.unreserved_items(), 0);
    }

    // Status and resolution agree.
    for r in reservations {
        prop_assert_eq!(r.is_resolved(), r.status() != ReservationStatus::Pending);
    }
    Ok(())
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: every operation sequence keeps the accounting invariants.
    #[test]
    fn prop_reservable_invariants_hold(capacity in 1usize..5, ops in prop::collection::vec(arb_op(), 1..80)) {
        let store: ReservablePriorityReqStore<u32> =
            ReservablePriorityReqStore::new(Capacity::bounded(capacity).unwrap());
        let mut issued: Vec<Reservation> = Vec::new();
        let mut next_item = 0u32;

        for op in ops {
            let before = store.stats().unwrap();
            match op {
                Op::ReservePut(p) => issued.push(store.reserve_put(p).unwrap()),
                Op::ReserveGet(p) => issued.push(store.reserve_get(p).unwrap()),
                Op::Commit(n) => {
                    let outstanding: Vec<_> = issued.iter().filter(|r| !r.status().is_terminal()).collect();
                    if outstanding.is_empty() {
                        continue;
                    }
                    let r = outstanding[n % outstanding.len()];
                    let result = match r.kind() {
                        RequestKind::Put => {
                            next_item += 1;
                            store.put(r, next_item)
                        }
                        RequestKind::Get => store.get(r).map(|_| ()),
                    };
                    match r.status() {
                        ReservationStatus::Fulfilled => prop_assert!(result.is_ok()),
                        _ => {
                            // Rejected commits leave the store untouched.
                            prop_assert!(result.unwrap_err().is_reservation_state());
                            prop_assert_eq!(store.stats().unwrap(), before);
                        }
                    }
                }
                Op::Cancel(n) => {
                    if issued.is_empty() {
                        continue;
                    }
                    let r = &issued[n % issued.len()];
                    let was = r.status();
                    let result = store.cancel(r);
                    if was == ReservationStatus::Fulfilled {
                        prop_assert!(result.unwrap_err().is_reservation_state());
                        prop_assert_eq!(store.stats().unwrap(), before);
                    } else {
                        prop_assert!(result.is_ok());
                        prop_assert_eq!(r.status(), ReservationStatus::Cancelled);
                    }
                }
            }
            check_reservable(&store.stats().unwrap(), &issued)?;
        }
    }

    /// Property: cancelling a granted reservation keeps the reserved count when
    /// a same-kind request is waiting, and lowers it by one otherwise.
    #[test]
    fn prop_cancel_granted_regrants_once(capacity in 1usize..4, waiting in 0usize..4) {
        let store: ReservablePriorityReqStore<u32> =
            ReservablePriorityReqStore::new(Capacity::bounded(capacity).unwrap());
        let granted: Vec<_> = (0..capacity).map(|_| store.reserve_put(1).unwrap()).collect();
        let queued: Vec<_> = (0..waiting).map(|_| store.reserve_put(1).unwrap()).collect();

        let before = store.stats().unwrap();
        store.reserve_put_cancel(&granted[0]).unwrap();
        let after = store.stats().unwrap();

        if waiting > 0 {
            prop_assert_eq!(after.reserved_puts, before.reserved_puts);
            prop_assert!(queued[0].is_granted());
            prop_assert_eq!(after.pending_puts, before.pending_puts - 1);
        } else {
            prop_assert_eq!(after.reserved_puts, before.reserved_puts - 1);
        }
    }

    /// Property: the direct store never holds items while gets wait, never
    /// queues puts while it has room, and conserves items.
    #[test]
    fn prop_direct_store_matching(capacity in 1usize..4, ops in prop::collection::vec(arb_direct_op(), 1..80)) {
        let store: PriorityReqStore<u32> = PriorityReqStore::new(Capacity::bounded(capacity).unwrap());
        let mut puts = Vec::new();
        let mut gets = Vec::new();
        let mut next_item = 0u32;
        let mut withdrawn = 0usize;

        for op in ops {
            match op {
                DirectOp::Put(p) => {
                    next_item += 1;
                    puts.push(store.put(next_item, p).unwrap());
                }
                DirectOp::Get(p) => gets.push(store.get(p).unwrap()),
                DirectOp::CancelPut(n) => {
                    if puts.is_empty() {
                        continue;
                    }
                    let r = &puts[n % puts.len()];
                    let was = r.status();
                    match store.cancel_put(r) {
                        Ok(Some(_)) => {
                            prop_assert_eq!(was, ReservationStatus::Pending);
                            withdrawn += 1;
                        }
                        Ok(None) => prop_assert_eq!(was, ReservationStatus::Cancelled),
                        Err(err) => prop_assert!(err.is_reservation_state()),
                    }
                }
                DirectOp::CancelGet(n) => {
                    if gets.is_empty() {
                        continue;
                    }
                    let r = &gets[n % gets.len()];
                    let was = r.status();
                    let result = store.cancel_get(r);
                    prop_assert_eq!(result.is_ok(), was != ReservationStatus::Fulfilled);
                }
            }

            let stats = store.stats().unwrap();
            prop_assert!(stats.is_consistent());
            if stats.pending_gets > 0 {
                prop_assert_eq!(stats.held, 0);
            }
            if stats.pending_puts > 0 {
                prop_assert_eq!(stats.free_slots(), Some(0));
            }

            let completed_puts = puts.iter().filter(|r| r.is_completed()).count();
            let completed_gets = gets.iter().filter(|r| r.is_completed()).count();
            let pending_puts = puts.iter().filter(|r| r.status() == ReservationStatus::Pending).count();
            prop_assert_eq!(completed_puts, stats.held + completed_gets);
            prop_assert_eq!(pending_puts + completed_puts + withdrawn, next_item as usize);
        }
    }
}
