//! Automatic grid regeneration triggers (spec §4.3.5): two independent
//! checks, per side, for recomputing ideal sizes while price levels stay
//! fixed.

use std::collections::HashMap;

use grid_core::accountant::Accountant;
use grid_core::state_machine::StateMachine;
use grid_core::{GridId, Side, SlotState};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::StrategyConfig;

/// Cache-&-available threshold trigger: `(cacheFunds[side] +
/// available[side]) >= Θc × allocated[side]`. Absorbs new deposits
/// automatically without waiting for drift to build up.
pub fn cache_available_threshold_trigger(accountant: &Accountant, side: Side, theta_c_percent: Decimal) -> bool {
    let allocated = accountant.funds.allocated.get(side);
    if allocated.is_zero() {
        return false;
    }
    let cache = accountant.funds.cache_funds.get(side);
    let available = accountant.funds.available.get(side);
    (cache + available) >= theta_c_percent / dec!(100) * allocated
}

/// RMS of the relative error between freshly calculated ideal sizes and
/// the sizes currently persisted on matched slots. Unmatched ids (either
/// side just added/removed a slot) are skipped; a slot with a zero
/// persisted size contributes nothing (division by it is undefined).
pub fn rms_divergence(calculated: &HashMap<GridId, Decimal>, persisted: &HashMap<GridId, Decimal>) -> Decimal {
    let mut sum_sq = 0f64;
    let mut n = 0usize;

    for (id, persisted_size) in persisted {
        if persisted_size.is_zero() {
            continue;
        }
        if let Some(calculated_size) = calculated.get(id) {
            let e = ((*calculated_size - *persisted_size) / *persisted_size).to_f64().unwrap_or(0.0);
            sum_sq += e * e;
            n += 1;
        }
    }

    if n == 0 {
        return Decimal::ZERO;
    }
    Decimal::try_from((sum_sq / n as f64).sqrt()).unwrap_or(Decimal::ZERO)
}

pub fn rms_trigger(rms: Decimal, theta_r_percent: Decimal) -> bool {
    rms * dec!(100) > theta_r_percent
}

/// Both triggers combined for one side. `calculated_ideal_sizes` is the
/// caller's fresh re-run of the grid generator's sizing formula against
/// current funds, keyed by the existing grid ids on that side.
pub fn should_regenerate(
    sm: &StateMachine,
    accountant: &Accountant,
    config: &StrategyConfig,
    side: Side,
    calculated_ideal_sizes: &HashMap<GridId, Decimal>,
) -> bool {
    if cache_available_threshold_trigger(accountant, side, config.grid_regeneration_percent) {
        return true;
    }

    let persisted: HashMap<GridId, Decimal> = sm
        .slots()
        .values()
        .filter(|s| s.side() == Some(side) && matches!(s.state, SlotState::Active | SlotState::Virtual | SlotState::Partial))
        .map(|s| (s.id, s.ideal_size))
        .collect();

    rms_trigger(rms_divergence(calculated_ideal_sizes, &persisted), config.rms_percent)
}
