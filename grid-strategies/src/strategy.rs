//! The top-level `StrategyEngine` (spec §4.3): wires rebalance-after-fill,
//! consolidation, rotation, and spread control together, and implements
//! `grid-core`'s [`StrategyHooks`] seam.

use std::collections::HashMap;
use std::time::Instant;

use grid_core::accountant::Accountant;
use grid_core::chain::ChainFillEvent;
use grid_core::engine::StrategyHooks;
use grid_core::grid::geometric_sizes;
use grid_core::state_machine::{FundEffect, StateMachine};
use grid_core::{CoreError, GridId, GridSlot, Side, SlotState, SlotType};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::consolidation::consolidate;
use crate::regeneration::should_regenerate;
use crate::rotation::{rotate, RotationSizingParams};
use crate::spread::enforce_spread_control;
use crate::types::{OrderToPlace, StrategyConfig, StrategyOutputs};

/// How many extra VIRTUAL slots to activate on the filled side beyond
/// the one that just vanished (spec §4.3.1 step 1's `filledCount +
/// extra`, left at 0: one fill removes one order, so one placement
/// replaces it; a nonzero extra would pre-activate ahead of demand,
/// which nothing in this deployment asks for).
const REPLACEMENT_EXTRA: usize = 0;

pub struct StrategyEngine {
    pub config: StrategyConfig,
    pub rotation_sizing: RotationSizingParams,
    pub target_spread_percent: Decimal,
    pub outputs: StrategyOutputs,
}

impl StrategyEngine {
    pub fn new(config: StrategyConfig, rotation_sizing: RotationSizingParams, target_spread_percent: Decimal) -> Self {
        StrategyEngine { config, rotation_sizing, target_spread_percent, outputs: StrategyOutputs::default() }
    }

    /// Drains and returns everything accumulated since the last call —
    /// the caller submits these against the chain, then the slots they
    /// touch become real once sync reconciles the confirmations.
    pub fn take_outputs(&mut self) -> StrategyOutputs {
        std::mem::take(&mut self.outputs)
    }

    fn apply_fill_to_slot(
        &mut self,
        sm: &mut StateMachine,
        accountant: &mut Accountant,
        fill: &ChainFillEvent,
    ) -> Result<Option<(Side, bool)>, CoreError> {
        let Some(slot) = sm.get_slot_for_order(fill.order_id).cloned() else {
            warn!(order_id = %fill.order_id, "fill for an order not claimed by any slot, ignoring");
            return Ok(None);
        };
        let Some(side) = slot.side() else {
            return Ok(None);
        };

        let filled_size = fill.pays_amount;
        let remaining = (slot.size - filled_size).max(Decimal::ZERO);
        let is_full_fill = remaining.is_zero();

        // Every fill, partial or full, credits the opposite side's
        // cacheFunds net of the market fee (resolved: always net, both
        // sides).
        match side {
            Side::Sell => {
                let price = if fill.pays_amount.is_zero() {
                    Decimal::ZERO
                } else {
                    fill.receives_amount / fill.pays_amount
                };
                accountant.apply_sell_fill_proceeds(fill.pays_amount, price, self.config.market_fee_percent)?;
            }
            Side::Buy => {
                accountant.apply_buy_fill_proceeds(fill.receives_amount, self.config.market_fee_percent)?;
            }
        }

        let mut updated = slot.clone();
        if is_full_fill {
            updated.state = SlotState::Virtual;
            updated.order_id = None;
            updated.size = Decimal::ZERO;
            updated.slot_type = SlotType::Spread;
        } else {
            updated.state = SlotState::Partial;
            updated.size = remaining;
        }
        sm.upsert_order(updated, FundEffect::None, accountant)?;

        Ok(Some((side, is_full_fill)))
    }

    /// Freshly recomputed ideal sizes for every matched (Active/Virtual/
    /// Partial) slot of `side`, using the same geometric weighting the
    /// grid generator seeded it with, against the side's current
    /// allocated funds. This is what `should_regenerate`'s RMS check
    /// compares against what each slot still has persisted.
    fn recompute_ideal_sizes(&self, sm: &StateMachine, accountant: &Accountant, side: Side) -> HashMap<GridId, Decimal> {
        let mut ids: Vec<GridId> = sm
            .slots()
            .values()
            .filter(|s| s.side() == Some(side) && matches!(s.state, SlotState::Active | SlotState::Virtual | SlotState::Partial))
            .map(|s| s.id)
            .collect();
        // closest-to-market first, matching `geometric_sizes`' index-0
        // convention.
        ids.sort_by(|a, b| {
            let pa = sm.get(*a).map(|s| s.price).unwrap_or_default();
            let pb = sm.get(*b).map(|s| s.price).unwrap_or_default();
            match side {
                Side::Buy => pb.cmp(&pa),
                Side::Sell => pa.cmp(&pb),
            }
        });

        let budget = accountant.funds.allocated.get(side);
        let sizes = geometric_sizes(
            ids.len(),
            self.rotation_sizing.weight_exp,
            budget,
            self.rotation_sizing.increment_percent,
            self.rotation_sizing.min_size,
            self.rotation_sizing.base_precision,
        )
        .unwrap_or_default();

        ids.into_iter().zip(sizes).collect()
    }

    /// Spec §4.3.1: rebalances the side opposite a full fill.
    fn rebalance_after_fill(&mut self, sm: &mut StateMachine, accountant: &mut Accountant, filled_side: Side) {
        let now = Instant::now();

        let placements = activate_closest_virtuals(sm, filled_side, 1 + REPLACEMENT_EXTRA);
        self.outputs.orders_to_place.extend(placements);

        let opposite = filled_side.opposite();
        match consolidate(sm, accountant, opposite, &self.config, now) {
            Ok(moves) => self.outputs.partial_moves.extend(moves),
            Err(e) => warn!(error = %e, side = ?opposite, "consolidation failed"),
        }

        let active_and_virtual = sm
            .slots()
            .values()
            .filter(|s| s.side() == Some(opposite) && matches!(s.state, SlotState::Active | SlotState::Virtual))
            .count() as u32;
        let target = self.config.target_active_orders.get(opposite);

        if active_and_virtual < target {
            let deficit = (target - active_and_virtual) as usize;
            let placements = activate_closest_virtuals(sm, opposite, deficit);
            info!(side = ?opposite, count = placements.len(), "below target, placing new orders");
            self.outputs.orders_to_place.extend(placements);
        } else {
            match rotate(sm, accountant, opposite, &self.rotation_sizing, 0, now) {
                Ok(rotations) => self.outputs.orders_to_rotate.extend(rotations),
                Err(e) => warn!(error = %e, side = ?opposite, "rotation failed"),
            }
        }
    }
}

impl StrategyHooks for StrategyEngine {
    fn on_fill(&mut self, sm: &mut StateMachine, accountant: &mut Accountant, fill: &ChainFillEvent) {
        let applied = match self.apply_fill_to_slot(sm, accountant, fill) {
            Ok(applied) => applied,
            Err(e) => {
                warn!(error = %e, order_id = %fill.order_id, "failed to apply fill");
                return;
            }
        };

        let Some((side, is_full_fill)) = applied else { return };
        if is_full_fill {
            self.rebalance_after_fill(sm, accountant, side);
        }
    }

    fn on_cycle(&mut self, sm: &mut StateMachine, accountant: &mut Accountant) {
        let spread_outputs =
            enforce_spread_control(sm, accountant, &self.config, self.target_spread_percent);
        self.outputs.merge(spread_outputs);

        for side in [Side::Buy, Side::Sell] {
            let ideal_sizes = self.recompute_ideal_sizes(sm, accountant, side);
            if should_regenerate(sm, accountant, &self.config, side, &ideal_sizes) {
                info!(side = ?side, "regeneration trigger fired");
                self.outputs.regeneration_needed.push(side);
            }
        }
    }
}

/// Virtual slots of `side` closest to market, up to `count`, proposed as
/// placements (no state mutation — these aren't real until the caller
/// places them and sync claims the confirmation).
fn activate_closest_virtuals(sm: &StateMachine, side: Side, count: usize) -> Vec<OrderToPlace> {
    if count == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<GridSlot> = sm
        .slots()
        .values()
        .filter(|s| s.side() == Some(side) && s.state == SlotState::Virtual)
        .cloned()
        .collect();

    candidates.sort_by(|a, b| match side {
        Side::Buy => b.price.cmp(&a.price),
        Side::Sell => a.price.cmp(&b.price),
    });

    candidates
        .into_iter()
        .take(count)
        .map(|s| OrderToPlace { grid_id: s.id, side, price: s.price, size: s.ideal_size })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_core::core::GridId as Id;
    use grid_core::{ChainOrderId, SlotType};
    use rust_decimal_macros::dec;

    fn config() -> StrategyConfig {
        use crate::types::ActiveOrdersTarget;
        StrategyConfig {
            target_active_orders: ActiveOrdersTarget { buy: 3, sell: 2 },
            partial_dust_threshold_percent: dec!(5),
            grid_regeneration_percent: dec!(3),
            rms_percent: dec!(14.3),
            spread_margin_percent: dec!(1),
            market_fee_percent: dec!(0.1),
        }
    }

    fn sizing() -> RotationSizingParams {
        RotationSizingParams { weight_exp: 1.0, increment_percent: dec!(1), min_size: Decimal::ZERO, base_precision: 8 }
    }

    fn engine() -> StrategyEngine {
        StrategyEngine::new(config(), sizing(), dec!(2))
    }

    fn active(id: u64, slot_type: SlotType, price: Decimal, size: Decimal) -> GridSlot {
        let mut s = GridSlot::new_virtual(Id(id), slot_type, price, size);
        s.state = SlotState::Active;
        s.order_id = Some(ChainOrderId(id as u128));
        s.size = size;
        s
    }

    #[test]
    fn full_fill_frees_the_slot_and_rebalances_opposite_side() {
        let mut sm = StateMachine::new();
        let mut accountant = Accountant::new(None);

        let filled = active(1, SlotType::Sell, dec!(101), dec!(10));
        let virt_buy_near = GridSlot::new_virtual(Id(2), SlotType::Buy, dec!(99), dec!(10));
        let virt_buy_far = GridSlot::new_virtual(Id(3), SlotType::Buy, dec!(98), dec!(10));

        sm.load_initial_grid(vec![filled, virt_buy_near, virt_buy_far]);

        let mut engine = engine();
        let fill = ChainFillEvent {
            history_id: ChainOrderId(100),
            order_id: ChainOrderId(1),
            pays_amount: dec!(10),
            pays_asset: "base".to_string(),
            receives_amount: dec!(1010),
            receives_asset: "quote".to_string(),
            is_maker: true,
            block_num: 1,
            block_time_unix: 0,
        };

        engine.on_fill(&mut sm, &mut accountant, &fill);

        let freed = sm.get(Id(1)).unwrap();
        assert_eq!(freed.state, SlotState::Virtual);
        assert!(freed.order_id.is_none());
        assert_eq!(freed.slot_type, SlotType::Spread, "a full fill frees its slot into the spread pool");

        let outputs = engine.take_outputs();
        // one placement to replace the sell side's vanished order, plus
        // buy side has 2 active+virtual against a target of 3, so the
        // closest virtual (id 2, nearer market) gets placed too.
        assert!(outputs.orders_to_place.iter().any(|o| o.side == Side::Sell));
        assert!(outputs.orders_to_place.iter().any(|o| o.grid_id == Id(2)));
    }

    #[test]
    fn partial_fill_keeps_the_order_tracked_and_does_not_rebalance() {
        let mut sm = StateMachine::new();
        let mut accountant = Accountant::new(None);
        let filled = active(1, SlotType::Sell, dec!(101), dec!(10));
        sm.load_initial_grid(vec![filled]);

        let mut engine = engine();
        let fill = ChainFillEvent {
            history_id: ChainOrderId(100),
            order_id: ChainOrderId(1),
            pays_amount: dec!(4),
            pays_asset: "base".to_string(),
            receives_amount: dec!(404),
            receives_asset: "quote".to_string(),
            is_maker: true,
            block_num: 1,
            block_time_unix: 0,
        };

        engine.on_fill(&mut sm, &mut accountant, &fill);

        let slot = sm.get(Id(1)).unwrap();
        assert_eq!(slot.state, SlotState::Partial);
        assert_eq!(slot.size, dec!(6));
        assert!(engine.take_outputs().orders_to_place.is_empty());
    }

    #[test]
    fn on_cycle_reports_regeneration_when_cache_and_available_cross_threshold() {
        let mut sm = StateMachine::new();
        let mut accountant = Accountant::new(None);

        accountant.funds.allocated.buy = dec!(1000);
        accountant.funds.cache_funds.buy = dec!(20);
        accountant.funds.available.buy = dec!(10);

        let mut engine = engine();
        engine.on_cycle(&mut sm, &mut accountant);

        let outputs = engine.take_outputs();
        assert!(outputs.regeneration_needed.contains(&Side::Buy));
        assert!(!outputs.regeneration_needed.contains(&Side::Sell));
    }
}
