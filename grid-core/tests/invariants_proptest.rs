//! Property-based tests for the state machine's invariants across random
//! sequences of legal operations (P1, P3) and disjoint-lock concurrency
//! (P8).

use std::time::Instant;

use grid_core::accountant::Accountant;
use grid_core::core::transitions::is_legal;
use grid_core::state_machine::{FundEffect, StateMachine};
use grid_core::{ChainOrderId, GridId, GridSlot, Side, SlotState, SlotType};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell)]
}

fn state_strategy() -> impl Strategy<Value = SlotState> {
    prop_oneof![Just(SlotState::Virtual), Just(SlotState::Active), Just(SlotState::Partial)]
}

/// Build a slot consistent with `state` on its own terms (I2, I4): an
/// order_id iff Active/Partial, and size at or above ideal when Active.
fn slot_for_state(id: GridId, side: Side, state: SlotState, size: Decimal, ideal: Decimal) -> GridSlot {
    let slot_type = match side {
        Side::Buy => SlotType::Buy,
        Side::Sell => SlotType::Sell,
    };
    let mut slot = GridSlot::new_virtual(id, slot_type, Decimal::ONE_HUNDRED, ideal);
    slot.state = state;
    match state {
        SlotState::Virtual => {
            slot.order_id = None;
            slot.size = Decimal::ZERO;
        }
        SlotState::Active => {
            slot.order_id = Some(ChainOrderId(id.0 as u128 + 1));
            slot.size = ideal + size;
        }
        SlotState::Partial => {
            slot.order_id = Some(ChainOrderId(id.0 as u128 + 1));
            slot.size = size % (ideal + Decimal::ONE);
        }
    }
    slot
}

proptest! {
    /// P1 + P3: any sequence of upserts that individually pass the state
    /// machine's own validation leaves I1 (indices), I2 (order_id
    /// consistency), I4 (Active size floor), and I6 (SPREAD is always
    /// Virtual) intact, and `assert_index_consistency` (which checks
    /// I1-I3, I6) never reports corruption.
    #[test]
    fn random_legal_sequences_preserve_invariants(
        states in proptest::collection::vec((side_strategy(), state_strategy(), 0u64..1000u64), 1..20),
    ) {
        let mut sm = StateMachine::new();
        let mut accountant = Accountant::new(None);

        for (i, (side, state, size_seed)) in states.into_iter().enumerate() {
            let id = GridId(i as u64);
            let size = Decimal::from(size_seed) / Decimal::from(10u64);
            let slot = slot_for_state(id, side, state, size, Decimal::from(10u64));
            // Every one of these is a Virtual->X transition (fresh id),
            // which `is_legal` always accepts in this state machine.
            prop_assert!(is_legal(SlotState::Virtual, state));
            sm.upsert_order(slot, FundEffect::None, &mut accountant).unwrap();
        }

        for slot in sm.slots().values() {
            prop_assert!(slot.order_id_consistent());
            prop_assert!(slot.size_consistent_with_state());
        }
        prop_assert!(sm.assert_index_consistency().is_ok());
    }

    /// A slot, once placed, can walk through any sequence of the three
    /// states (the transition table is total over {Virtual, Active,
    /// Partial}) and invariants hold after every step.
    #[test]
    fn single_slot_random_walk_preserves_invariants(
        walk in proptest::collection::vec(state_strategy(), 1..15),
    ) {
        let mut sm = StateMachine::new();
        let mut accountant = Accountant::new(None);
        let id = GridId(1);

        for state in walk {
            let slot = slot_for_state(id, Side::Buy, state, Decimal::from(3u64), Decimal::from(10u64));
            sm.upsert_order(slot, FundEffect::None, &mut accountant).unwrap();
            let stored = sm.get(id).unwrap();
            prop_assert!(stored.order_id_consistent());
            prop_assert!(stored.size_consistent_with_state());
        }
        prop_assert!(sm.assert_index_consistency().is_ok());
    }
}

/// P8: two disjoint-lock passes produce the same final state whichever
/// order they run in. Grounded on the shadow-lock mechanism `consolidate`
/// already respects: a real concurrent scheduler would run these two
/// slot-disjoint updates on separate tasks; here we just apply them in
/// both possible interleavings and compare the final slot map.
#[test]
fn disjoint_lock_passes_commute() {
    let base = |sm: &mut StateMachine, accountant: &mut Accountant| {
        let mut a = GridSlot::new_virtual(GridId(1), SlotType::Buy, Decimal::from(99u64), Decimal::from(10u64));
        a.state = SlotState::Active;
        a.order_id = Some(ChainOrderId(1));
        a.size = Decimal::from(10u64);

        let mut b = GridSlot::new_virtual(GridId(2), SlotType::Sell, Decimal::from(101u64), Decimal::from(10u64));
        b.state = SlotState::Active;
        b.order_id = Some(ChainOrderId(2));
        b.size = Decimal::from(10u64);

        sm.load_initial_grid(vec![a, b]);
        let _ = accountant;
    };

    let update_a = |sm: &mut StateMachine, accountant: &mut Accountant| {
        let mut a = sm.get(GridId(1)).unwrap().clone();
        a.state = SlotState::Partial;
        a.size = Decimal::from(4u64);
        sm.upsert_order(a, FundEffect::None, accountant).unwrap();
    };
    let update_b = |sm: &mut StateMachine, accountant: &mut Accountant| {
        let mut b = sm.get(GridId(2)).unwrap().clone();
        b.state = SlotState::Virtual;
        b.order_id = None;
        b.size = Decimal::ZERO;
        sm.upsert_order(b, FundEffect::None, accountant).unwrap();
    };

    let now = Instant::now();

    // Order 1: lock B while updating A, then lock A while updating B.
    let mut sm1 = StateMachine::new();
    let mut acc1 = Accountant::new(None);
    base(&mut sm1, &mut acc1);
    sm1.lock_orders(&[GridId(2)], now);
    update_a(&mut sm1, &mut acc1);
    sm1.unlock_orders(&[GridId(2)]);
    sm1.lock_orders(&[GridId(1)], now);
    update_b(&mut sm1, &mut acc1);
    sm1.unlock_orders(&[GridId(1)]);

    // Order 2: the other interleaving.
    let mut sm2 = StateMachine::new();
    let mut acc2 = Accountant::new(None);
    base(&mut sm2, &mut acc2);
    sm2.lock_orders(&[GridId(1)], now);
    update_b(&mut sm2, &mut acc2);
    sm2.unlock_orders(&[GridId(1)]);
    sm2.lock_orders(&[GridId(2)], now);
    update_a(&mut sm2, &mut acc2);
    sm2.unlock_orders(&[GridId(2)]);

    assert_eq!(sm1.get(GridId(1)), sm2.get(GridId(1)));
    assert_eq!(sm1.get(GridId(2)), sm2.get(GridId(2)));
    assert_eq!(acc1.funds, acc2.funds);
}
