//! Spread control (spec §4.3.4): proactively activates spread
//! placeholders toward the market when the live spread drifts too wide,
//! rather than waiting for a fill to trigger rebalancing.

use grid_core::accountant::Accountant;
use grid_core::state_machine::StateMachine;
use grid_core::{GridSlot, Side, SlotState, SlotType};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use crate::types::{OrderToPlace, StrategyConfig, StrategyOutputs};

/// Computes `currentSpread` from the innermost ACTIVE orders on each
/// side and, if it exceeds `targetSpreadPercent` by more than
/// `config.spread_margin_percent`, proposes placements for the SPREAD
/// slot closest to market on each side. Placements only — the slots
/// themselves stay VIRTUAL until the caller's placement confirms and
/// syncs back, same as every other new order.
pub fn enforce_spread_control(
    sm: &StateMachine,
    accountant: &Accountant,
    config: &StrategyConfig,
    target_spread_percent: Decimal,
) -> StrategyOutputs {
    let mut outputs = StrategyOutputs::default();

    let (Some(best_bid), Some(best_ask)) =
        (innermost_active_price(sm, Side::Buy), innermost_active_price(sm, Side::Sell))
    else {
        return outputs;
    };
    if best_ask <= best_bid {
        return outputs;
    }

    let mid = (best_ask + best_bid) / dec!(2);
    if mid.is_zero() {
        return outputs;
    }

    let current_spread_percent = (best_ask - best_bid) / mid * Decimal::ONE_HUNDRED;
    let ceiling = target_spread_percent + config.spread_margin_percent;
    if current_spread_percent <= ceiling {
        return outputs;
    }

    info!(
        current = %current_spread_percent,
        target = %target_spread_percent,
        "spread exceeds target by more than the margin, activating placeholders"
    );

    if let Some(slot) = closest_spread_toward(sm, mid, Side::Sell) {
        let size = template_size(sm, accountant, Side::Sell);
        outputs.orders_to_place.push(OrderToPlace { grid_id: slot.id, side: Side::Sell, price: slot.price, size });
    }
    if let Some(slot) = closest_spread_toward(sm, mid, Side::Buy) {
        let size = template_size(sm, accountant, Side::Buy);
        outputs.orders_to_place.push(OrderToPlace { grid_id: slot.id, side: Side::Buy, price: slot.price, size });
    }

    outputs
}

fn innermost_active_price(sm: &StateMachine, side: Side) -> Option<Decimal> {
    let actives = sm.slots().values().filter(|s| s.side() == Some(side) && s.state == SlotState::Active);
    match side {
        Side::Buy => actives.map(|s| s.price).max(),
        Side::Sell => actives.map(|s| s.price).min(),
    }
}

/// The unused SPREAD slot on `side`'s half of the gap (above `mid` for
/// sell, below it for buy) closest to the market.
fn closest_spread_toward(sm: &StateMachine, mid: Decimal, side: Side) -> Option<GridSlot> {
    sm.slots()
        .values()
        .filter(|s| {
            s.slot_type == SlotType::Spread
                && s.state == SlotState::Virtual
                && match side {
                    Side::Sell => s.price > mid,
                    Side::Buy => s.price < mid,
                }
        })
        .min_by_key(|s| (s.price - mid).abs())
        .cloned()
}

/// A reasonable size for a freshly activated spread placeholder: the
/// ideal size of the nearest real slot on the same side, falling back to
/// an even split of that side's cache funds when the side has no real
/// slots yet (a brand-new grid on its first cycle).
fn template_size(sm: &StateMachine, accountant: &Accountant, side: Side) -> Decimal {
    let nearest = sm
        .slots()
        .values()
        .filter(|s| s.side() == Some(side) && !s.ideal_size.is_zero())
        .min_by_key(|s| s.price)
        .map(|s| s.ideal_size);

    nearest.unwrap_or_else(|| accountant.funds.cache_funds.get(side))
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_core::core::GridId as Id;
    use rust_decimal_macros::dec;

    fn config(margin: Decimal) -> StrategyConfig {
        use crate::types::ActiveOrdersTarget;
        StrategyConfig {
            target_active_orders: ActiveOrdersTarget { buy: 5, sell: 5 },
            partial_dust_threshold_percent: dec!(5),
            grid_regeneration_percent: dec!(3),
            rms_percent: dec!(14.3),
            spread_margin_percent: margin,
            market_fee_percent: dec!(0.1),
        }
    }

    fn active(id: u64, slot_type: SlotType, price: Decimal, size: Decimal) -> GridSlot {
        let mut s = GridSlot::new_virtual(Id(id), slot_type, price, size);
        s.state = SlotState::Active;
        s.order_id = Some(grid_core::ChainOrderId(id as u128));
        s.size = size;
        s
    }

    #[test]
    fn wide_spread_activates_closest_placeholder_each_side() {
        let mut sm = StateMachine::new();
        let bid = active(1, SlotType::Buy, dec!(95), dec!(10));
        let ask = active(2, SlotType::Sell, dec!(110), dec!(10));
        // mid = 102.5: one placeholder above it (ask side), one below (bid side).
        let spread_near_ask = GridSlot::new_spread(Id(3), dec!(105));
        let spread_near_bid = GridSlot::new_spread(Id(4), dec!(99));

        sm.load_initial_grid(vec![bid, ask, spread_near_ask, spread_near_bid]);
        let accountant = Accountant::new(None);

        // mid = 102.5, spread = 15/102.5 * 100 ~= 14.6%, way above a 2% target.
        let outputs = enforce_spread_control(&sm, &accountant, &config(dec!(1)), dec!(2));

        assert_eq!(outputs.orders_to_place.len(), 2);
        let sides: Vec<Side> = outputs.orders_to_place.iter().map(|o| o.side).collect();
        assert!(sides.contains(&Side::Sell));
        assert!(sides.contains(&Side::Buy));
    }

    #[test]
    fn tight_spread_does_nothing() {
        let mut sm = StateMachine::new();
        let bid = active(1, SlotType::Buy, dec!(99), dec!(10));
        let ask = active(2, SlotType::Sell, dec!(101), dec!(10));
        sm.load_initial_grid(vec![bid, ask]);
        let accountant = Accountant::new(None);

        // spread = 2/100 * 100 = 2%, at the target with a 1% margin.
        let outputs = enforce_spread_control(&sm, &accountant, &config(dec!(1)), dec!(2));
        assert!(outputs.orders_to_place.is_empty());
    }
}
