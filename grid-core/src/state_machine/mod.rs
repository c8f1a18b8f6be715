//! The State Machine / Order Manager (spec §4.4): the central in-memory
//! grid, its lookup indices, shadow locks, and the single `upsert_order`
//! mutator everything else goes through.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::accountant::{Accountant, BalanceOp};
use crate::core::{ChainOrderId, GridId, GridSlot, SlotState, SlotType};
use crate::errors::CoreError;
use crate::monitoring::GridMetrics;

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;

/// What kind of balance adjustment an upsert should trigger, decided by
/// the caller (placement, cancellation, or a pure size/flag update that
/// doesn't touch chain balances).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundEffect {
    None,
    Place { fee: rust_decimal::Decimal },
    Cancel,
}

pub struct StateMachine {
    slots: HashMap<GridId, GridSlot>,
    index_by_state: HashMap<SlotState, HashSet<GridId>>,
    index_by_type: HashMap<SlotType, HashSet<GridId>>,
    claimed_chain_orders: HashMap<ChainOrderId, GridId>,
    shadow_locks: HashMap<GridId, Instant>,
    lock_timeout: Duration,
    pub orders_needing_price_correction: Vec<GridId>,
    pub orders_pending_cancellation: Vec<GridId>,
    /// Chain orders seen during sync with no claimable slot at all —
    /// queued for an outright `cancel_order` call rather than a grid
    /// state change.
    pub orphaned_chain_orders: Vec<ChainOrderId>,
    pub recently_rotated: HashSet<ChainOrderId>,
    pause_depth: u32,
    metrics: Option<Arc<GridMetrics>>,
}

impl StateMachine {
    pub fn new() -> Self {
        let mut index_by_state = HashMap::new();
        index_by_state.insert(SlotState::Virtual, HashSet::new());
        index_by_state.insert(SlotState::Active, HashSet::new());
        index_by_state.insert(SlotState::Partial, HashSet::new());

        let mut index_by_type = HashMap::new();
        index_by_type.insert(SlotType::Buy, HashSet::new());
        index_by_type.insert(SlotType::Sell, HashSet::new());
        index_by_type.insert(SlotType::Spread, HashSet::new());

        StateMachine {
            slots: HashMap::new(),
            index_by_state,
            index_by_type,
            claimed_chain_orders: HashMap::new(),
            shadow_locks: HashMap::new(),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            orders_needing_price_correction: Vec::new(),
            orders_pending_cancellation: Vec::new(),
            orphaned_chain_orders: Vec::new(),
            recently_rotated: HashSet::new(),
            pause_depth: 0,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<GridMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn slots(&self) -> &HashMap<GridId, GridSlot> {
        &self.slots
    }

    pub fn get(&self, id: GridId) -> Option<&GridSlot> {
        self.slots.get(&id)
    }

    pub fn get_slot_for_order(&self, order_id: ChainOrderId) -> Option<&GridSlot> {
        self.claimed_chain_orders
            .get(&order_id)
            .and_then(|grid_id| self.slots.get(grid_id))
    }

    pub fn ids_in_state(&self, state: SlotState) -> impl Iterator<Item = &GridId> {
        self.index_by_state
            .get(&state)
            .into_iter()
            .flat_map(|s| s.iter())
    }

    pub fn ids_of_type(&self, slot_type: SlotType) -> impl Iterator<Item = &GridId> {
        self.index_by_type
            .get(&slot_type)
            .into_iter()
            .flat_map(|s| s.iter())
    }

    /// Bulk-load slots freshly produced by the Grid Generator. Used at
    /// initialization/reload, bypassing `upsert_order`'s transition
    /// validation since there is no prior state to transition from.
    pub fn load_initial_grid(&mut self, slots: Vec<GridSlot>) {
        self.slots.clear();
        for set in self.index_by_state.values_mut() {
            set.clear();
        }
        for set in self.index_by_type.values_mut() {
            set.clear();
        }
        self.claimed_chain_orders.clear();

        for slot in slots {
            self.index_by_state.entry(slot.state).or_default().insert(slot.id);
            self.index_by_type
                .entry(slot.slot_type)
                .or_default()
                .insert(slot.id);
            if let Some(order_id) = slot.order_id {
                self.claimed_chain_orders.insert(order_id, slot.id);
            }
            self.slots.insert(slot.id, slot);
        }
    }

    /// The single mutator for all order modifications (spec §4.4).
    ///
    /// Validates id presence and the state ∈ legal transition table,
    /// updates both indices (remove-from-old, add-to-new), stores the
    /// slot, and — unless fund recalc is paused — triggers
    /// `recalculate_funds`. Nothing is partially applied on rejection.
    pub fn upsert_order(
        &mut self,
        new_slot: GridSlot,
        effect: FundEffect,
        accountant: &mut Accountant,
    ) -> Result<(), CoreError> {
        if new_slot.size.is_sign_negative() {
            warn!(grid_id = %new_slot.id, "rejected upsert: negative size");
            return Err(CoreError::BadInput {
                reason: format!("slot {} has negative size", new_slot.id),
            });
        }
        if !new_slot.order_id_consistent() {
            warn!(grid_id = %new_slot.id, "rejected upsert: order_id inconsistent with state");
            return Err(CoreError::BadInput {
                reason: format!("slot {} order_id inconsistent with state", new_slot.id),
            });
        }

        let old_slot = self.slots.get(&new_slot.id).cloned();
        let from_state = old_slot.as_ref().map(|s| s.state).unwrap_or(new_slot.state);

        if old_slot.is_some() && !crate::core::transitions::is_legal(from_state, new_slot.state) {
            warn!(
                grid_id = %new_slot.id,
                from = ?from_state,
                to = ?new_slot.state,
                "rejected illegal transition"
            );
            return Err(CoreError::InvalidTransition {
                grid_id: new_slot.id,
                from: from_state,
                to: new_slot.state,
            });
        }

        if let Some(old) = &old_slot {
            self.index_by_state
                .entry(old.state)
                .or_default()
                .remove(&old.id);
            self.index_by_type
                .entry(old.slot_type)
                .or_default()
                .remove(&old.id);
            if let Some(old_order) = old.order_id {
                if new_slot.order_id != Some(old_order) {
                    self.claimed_chain_orders.remove(&old_order);
                }
            }
        }

        self.index_by_state
            .entry(new_slot.state)
            .or_default()
            .insert(new_slot.id);
        self.index_by_type
            .entry(new_slot.slot_type)
            .or_default()
            .insert(new_slot.id);
        if let Some(order_id) = new_slot.order_id {
            self.claimed_chain_orders.insert(order_id, new_slot.id);
        }

        if let Some(m) = &self.metrics {
            if old_slot.is_none() || from_state != new_slot.state {
                m.record_transition(from_state, new_slot.state);
            }
        }

        let Some(side) = new_slot.side() else {
            self.slots.insert(new_slot.id, new_slot);
            self.maybe_recalculate(accountant);
            return Ok(());
        };

        match effect {
            FundEffect::Place { fee } => {
                accountant.update_optimistic_free_balance(
                    side,
                    BalanceOp::Place,
                    new_slot.size,
                    fee,
                );
            }
            FundEffect::Cancel => {
                let restored = old_slot.as_ref().map(|s| s.size).unwrap_or(new_slot.size);
                accountant.update_optimistic_free_balance(side, BalanceOp::Cancel, restored, 0.into());
            }
            FundEffect::None => {}
        }

        debug!(grid_id = %new_slot.id, from = ?from_state, to = ?new_slot.state, "slot upserted");
        self.slots.insert(new_slot.id, new_slot);
        self.maybe_recalculate(accountant);
        Ok(())
    }

    fn maybe_recalculate(&self, accountant: &mut Accountant) {
        if self.pause_depth == 0 {
            accountant.recalculate_funds(&self.slots);
        }
    }

    /// Stamp each id with the current instant so `is_locked` sees it as
    /// held until `lock_timeout` elapses.
    pub fn lock_orders(&mut self, ids: &[GridId], now: Instant) {
        for &id in ids {
            self.shadow_locks.insert(id, now);
        }
    }

    pub fn unlock_orders(&mut self, ids: &[GridId]) {
        for id in ids {
            self.shadow_locks.remove(id);
        }
    }

    pub fn is_locked(&self, id: GridId, now: Instant) -> bool {
        self.shadow_locks
            .get(&id)
            .map(|&stamp| now.duration_since(stamp) < self.lock_timeout)
            .unwrap_or(false)
    }

    pub fn record_lock_contention_skip(&self) {
        if let Some(m) = &self.metrics {
            m.lock_contention_skips.inc();
        }
    }

    /// `pauseFundRecalc` — uses a counter, not a boolean, so nested
    /// batches are safe.
    pub fn pause_fund_recalc(&mut self) {
        self.pause_depth += 1;
    }

    /// `resumeFundRecalc` — recalc runs once, only when depth returns to
    /// zero.
    pub fn resume_fund_recalc(&mut self, accountant: &mut Accountant) {
        if self.pause_depth > 0 {
            self.pause_depth -= 1;
        }
        if self.pause_depth == 0 {
            accountant.recalculate_funds(&self.slots);
        }
    }

    /// Verify invariants I1-I3 and I6; rebuild indices from the slot map
    /// if corruption is detected. Corruption is always logged, never
    /// silently tolerated; returns `IndexCorruption` if the slot map
    /// itself contains a contradiction that rebuilding cannot fix (e.g.
    /// two slots claiming the same chain order id).
    pub fn assert_index_consistency(&mut self) -> Result<(), CoreError> {
        let mut corrupted = false;

        for (id, slot) in &self.slots {
            let in_state_index = self
                .index_by_state
                .get(&slot.state)
                .is_some_and(|s| s.contains(id));
            let in_type_index = self
                .index_by_type
                .get(&slot.slot_type)
                .is_some_and(|s| s.contains(id));
            if !in_state_index || !in_type_index {
                corrupted = true;
            }
            if !slot.order_id_consistent() {
                corrupted = true;
            }
            if slot.slot_type == SlotType::Spread && slot.state != SlotState::Virtual {
                corrupted = true;
            }
        }

        let mut seen_orders: HashMap<ChainOrderId, GridId> = HashMap::new();
        for slot in self.slots.values() {
            if let Some(order_id) = slot.order_id {
                if let Some(&other) = seen_orders.get(&order_id) {
                    if other != slot.id {
                        error!(
                            order_id = %order_id,
                            a = %other,
                            b = %slot.id,
                            "I3 violated: chain order id claimed by two grid slots"
                        );
                        if let Some(m) = &self.metrics {
                            m.invariant_violations.inc();
                        }
                        return Err(CoreError::IndexCorruption {
                            reason: format!(
                                "chain order id {order_id} claimed by slots {other} and {}",
                                slot.id
                            ),
                        });
                    }
                }
                seen_orders.insert(order_id, slot.id);
            }
        }

        if corrupted {
            warn!("index corruption detected; rebuilding indices from slot map");
            if let Some(m) = &self.metrics {
                m.invariant_violations.inc();
            }
            self.rebuild_indices();
        }

        Ok(())
    }

    fn rebuild_indices(&mut self) {
        for set in self.index_by_state.values_mut() {
            set.clear();
        }
        for set in self.index_by_type.values_mut() {
            set.clear();
        }
        self.claimed_chain_orders.clear();
        for slot in self.slots.values() {
            self.index_by_state.entry(slot.state).or_default().insert(slot.id);
            self.index_by_type
                .entry(slot.slot_type)
                .or_default()
                .insert(slot.id);
            if let Some(order_id) = slot.order_id {
                self.claimed_chain_orders.insert(order_id, slot.id);
            }
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
