//! Rotation: moves the furthest ACTIVE order of a side to the closest
//! unused SPREAD slot to tighten the grid (spec §4.3.3).

use std::time::Instant;

use grid_core::accountant::Accountant;
use grid_core::grid::geometric_sizes;
use grid_core::state_machine::{FundEffect, StateMachine};
use grid_core::{CoreError, GridSlot, Side, SlotState, SlotType};
use rust_decimal::Decimal;
use tracing::info;

use crate::types::OrderToRotate;

/// Grid-sizing inputs the rotation batch needs from the bot's config,
/// mirroring what the Grid Generator was built with.
#[derive(Debug, Clone, Copy)]
pub struct RotationSizingParams {
    pub weight_exp: f64,
    pub increment_percent: Decimal,
    pub min_size: Decimal,
    pub base_precision: u32,
}

/// Runs one rotation pass for `side`. `recently_filled_count` folds in
/// fills the caller has already counted this cycle but not yet reflected
/// as Virtual/Active transitions, per spec §4.3.3's
/// `activeCount + virtualCount + recentlyFilledCount`.
pub fn rotate(
    sm: &mut StateMachine,
    accountant: &mut Accountant,
    side: Side,
    sizing: &RotationSizingParams,
    recently_filled_count: usize,
    now: Instant,
) -> Result<Vec<OrderToRotate>, CoreError> {
    let candidates = furthest_active_first(sm, side, now);
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let layering_bound = partial_layering_bound(sm, side);
    let targets = available_spread_targets(sm, side, layering_bound);
    let batch_len = candidates.len().min(targets.len());
    if batch_len == 0 {
        return Ok(Vec::new());
    }

    let n = sm
        .slots()
        .values()
        .filter(|s| s.side() == Some(side) && matches!(s.state, SlotState::Active | SlotState::Virtual))
        .count()
        + recently_filled_count;

    let budget = accountant.funds.cache_funds.get(side);
    let ideal_sizes = geometric_sizes(
        n.max(batch_len),
        sizing.weight_exp,
        budget,
        sizing.increment_percent,
        sizing.min_size,
        sizing.base_precision,
    )
    .map_err(|e| CoreError::BadInput { reason: e.to_string() })?;

    let total_ideal: Decimal = ideal_sizes.iter().copied().sum();
    let batch_sizes: Vec<Decimal> = if total_ideal > budget && !total_ideal.is_zero() {
        let scale = budget / total_ideal;
        ideal_sizes.iter().take(batch_len).map(|&s| s * scale).collect()
    } else {
        ideal_sizes.iter().take(batch_len).copied().collect()
    };

    let allocated: Decimal = batch_sizes.iter().copied().sum();
    let surplus = (budget - allocated).max(Decimal::ZERO);

    let mut rotations = Vec::with_capacity(batch_len);
    for ((from, to), &size) in candidates.into_iter().zip(targets).zip(batch_sizes.iter()).take(batch_len) {
        let order_id = from.order_id.expect("Active slot always carries an order_id");

        let mut vacated = from.clone();
        vacated.state = SlotState::Virtual;
        vacated.order_id = None;
        vacated.size = Decimal::ZERO;
        sm.upsert_order(vacated, FundEffect::Cancel, accountant)?;

        sm.recently_rotated.insert(order_id);

        info!(from = %from.id, to = %to.id, size = %size, side = ?side, "rotating order toward market");
        rotations.push(OrderToRotate {
            from_grid_id: from.id,
            from_order: order_id,
            to_grid_id: to.id,
            side,
            price: to.price,
            size,
        });
    }

    accountant.funds.cache_funds.set(side, surplus);
    Ok(rotations)
}

/// ACTIVE slots of `side`, furthest from market first, excluding ones
/// locked, already pending a price correction, or rotated this cycle.
fn furthest_active_first(sm: &StateMachine, side: Side, now: Instant) -> Vec<GridSlot> {
    let mut active: Vec<GridSlot> = sm
        .slots()
        .values()
        .filter(|s| {
            s.side() == Some(side)
                && s.state == SlotState::Active
                && !sm.is_locked(s.id, now)
                && !sm.orders_needing_price_correction.contains(&s.id)
                && s.order_id.map(|id| !sm.recently_rotated.contains(&id)).unwrap_or(false)
        })
        .cloned()
        .collect();

    active.sort_by(|a, b| match side {
        Side::Buy => a.price.cmp(&b.price),
        Side::Sell => b.price.cmp(&a.price),
    });
    active
}

/// The price boundary surviving PARTIAL orders impose on rotation
/// targets: sells must stay at or above the minimum partial sell price,
/// buys at or below the maximum partial buy price.
fn partial_layering_bound(sm: &StateMachine, side: Side) -> Option<Decimal> {
    let prices = sm
        .slots()
        .values()
        .filter(|s| s.side() == Some(side) && s.state == SlotState::Partial)
        .map(|s| s.price);

    match side {
        Side::Buy => prices.reduce(Decimal::max),
        Side::Sell => prices.reduce(Decimal::min),
    }
}

/// Unused SPREAD slots ordered closest-to-market first, filtered to
/// respect the layering bound.
fn available_spread_targets(sm: &StateMachine, side: Side, bound: Option<Decimal>) -> Vec<GridSlot> {
    let mut spreads: Vec<GridSlot> = sm
        .slots()
        .values()
        .filter(|s| {
            s.slot_type == SlotType::Spread
                && s.state == SlotState::Virtual
                && match (bound, side) {
                    (Some(b), Side::Buy) => s.price <= b,
                    (Some(b), Side::Sell) => s.price >= b,
                    (None, _) => true,
                }
        })
        .cloned()
        .collect();

    spreads.sort_by(|a, b| match side {
        Side::Buy => b.price.cmp(&a.price),
        Side::Sell => a.price.cmp(&b.price),
    });
    spreads
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_core::core::GridId as Id;
    use grid_core::ChainOrderId;
    use rust_decimal_macros::dec;

    fn sizing() -> RotationSizingParams {
        RotationSizingParams {
            weight_exp: 1.0,
            increment_percent: dec!(1),
            min_size: Decimal::ZERO,
            base_precision: 8,
        }
    }

    fn active_sell(id: u64, price: Decimal, order: u128) -> GridSlot {
        let mut s = GridSlot::new_virtual(Id(id), SlotType::Sell, price, dec!(10));
        s.state = SlotState::Active;
        s.order_id = Some(ChainOrderId(order));
        s.size = dec!(10);
        s
    }

    #[test]
    fn rotates_furthest_sell_to_closest_spread_and_marks_recently_rotated() {
        let mut sm = StateMachine::new();
        let mut accountant = accountant_with_sell_cache(dec!(20));

        let far = active_sell(1, dec!(110), 1);
        let spread_close = GridSlot::new_spread(Id(3), dec!(100.5));
        let spread_far = GridSlot::new_spread(Id(4), dec!(109));

        sm.load_initial_grid(vec![far, spread_close, spread_far]);

        let rotations = rotate(&mut sm, &mut accountant, Side::Sell, &sizing(), 0, Instant::now()).unwrap();

        assert_eq!(rotations.len(), 1);
        assert_eq!(rotations[0].from_grid_id, Id(1));
        assert_eq!(rotations[0].to_grid_id, Id(3));
        assert!(sm.recently_rotated.contains(&ChainOrderId(1)));

        let vacated = sm.get(Id(1)).unwrap();
        assert_eq!(vacated.state, SlotState::Virtual);
        assert!(vacated.order_id.is_none());
    }

    #[test]
    fn skips_candidates_already_recently_rotated() {
        let mut sm = StateMachine::new();
        let mut accountant = accountant_with_sell_cache(dec!(20));

        let far = active_sell(1, dec!(110), 1);
        let spread = GridSlot::new_spread(Id(2), dec!(100.5));
        sm.load_initial_grid(vec![far, spread]);
        sm.recently_rotated.insert(ChainOrderId(1));

        let rotations = rotate(&mut sm, &mut accountant, Side::Sell, &sizing(), 0, Instant::now()).unwrap();
        assert!(rotations.is_empty());
    }

    #[test]
    fn layering_bound_excludes_spread_slots_inside_partial_boundary() {
        let mut sm = StateMachine::new();
        let mut accountant = accountant_with_sell_cache(dec!(20));

        let far = active_sell(1, dec!(110), 1);
        let mut partial = GridSlot::new_virtual(Id(2), SlotType::Sell, dec!(103), dec!(10));
        partial.state = SlotState::Partial;
        partial.order_id = Some(ChainOrderId(2));
        partial.size = dec!(5);

        // inside the partial boundary (103): must be excluded.
        let spread_inside = GridSlot::new_spread(Id(3), dec!(101));
        // at/outside the boundary: eligible.
        let spread_outside = GridSlot::new_spread(Id(4), dec!(104));

        sm.load_initial_grid(vec![far, partial, spread_inside, spread_outside]);

        let rotations = rotate(&mut sm, &mut accountant, Side::Sell, &sizing(), 0, Instant::now()).unwrap();
        assert_eq!(rotations.len(), 1);
        assert_eq!(rotations[0].to_grid_id, Id(4));
    }

    fn accountant_with_sell_cache(sell: Decimal) -> Accountant {
        let mut a = Accountant::new(None);
        a.funds.cache_funds.sell = sell;
        a
    }
}
