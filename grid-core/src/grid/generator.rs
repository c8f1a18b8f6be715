//! The Grid Generator (spec §4.2): a pure function that builds the
//! geometric price ladder and assigns weighted per-side sizes.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use crate::core::{GridId, GridSlot, Side, SlotType};
use crate::precision::{to_chain_int, PrecisionError};

#[derive(Debug, Error, PartialEq)]
pub enum GridGenerationError {
    #[error("bad input: {0}")]
    BadInput(String),
    #[error(transparent)]
    Precision(#[from] PrecisionError),
}

/// Per-side weight distribution exponent, in `[-1, 2]` per spec §6.
#[derive(Debug, Clone, Copy)]
pub struct WeightDistribution {
    pub buy: f64,
    pub sell: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SideFunds {
    pub buy: Decimal,
    pub sell: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct Precisions {
    pub price: u32,
    pub base: u32,
    pub quote: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct MinSizes {
    pub buy: Decimal,
    pub sell: Decimal,
}

#[derive(Debug, Clone)]
pub struct GridSpec {
    pub market_price: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub increment_percent: Decimal,
    pub target_spread_percent: Decimal,
    pub weight_distribution: WeightDistribution,
    pub funds: SideFunds,
    pub precisions: Precisions,
    pub min_sizes: MinSizes,
}

/// Generate the full ladder of slots for a grid, in descending price order
/// (highest sell price first, ending at the lowest buy price).
pub fn generate_grid(spec: &GridSpec) -> Result<Vec<GridSlot>, GridGenerationError> {
    if spec.market_price <= Decimal::ZERO
        || spec.min_price <= Decimal::ZERO
        || spec.max_price <= spec.min_price
        || spec.increment_percent <= Decimal::ZERO
    {
        return Err(GridGenerationError::BadInput(
            "market/min/max price and increment must be positive, with max > min".to_string(),
        ));
    }
    if spec.market_price < spec.min_price || spec.market_price > spec.max_price {
        return Err(GridGenerationError::BadInput(
            "market price must lie within [min_price, max_price]".to_string(),
        ));
    }

    let increment_percent = spec
        .increment_percent
        .to_f64()
        .ok_or_else(|| GridGenerationError::BadInput("increment_percent out of range".into()))?;
    let step_up = 1.0 + increment_percent / 100.0;
    let step_down = 1.0 - increment_percent / 100.0;
    if step_down <= 0.0 {
        return Err(GridGenerationError::BadInput(
            "increment_percent must be less than 100".to_string(),
        ));
    }

    let mut target_spread_percent = spec
        .target_spread_percent
        .to_f64()
        .ok_or_else(|| GridGenerationError::BadInput("target_spread_percent out of range".into()))?;
    let min_spread = 2.0 * increment_percent;
    if target_spread_percent < min_spread {
        warn!(
            target_spread_percent,
            min_spread, "target_spread_percent below 2x increment_percent, auto-raising"
        );
        target_spread_percent = min_spread;
    }

    let n_spread = ((1.0 + target_spread_percent / 100.0).ln() / step_up.ln())
        .ceil()
        .max(2.0) as u64;
    let buy_spread = n_spread / 2;
    let sell_spread = n_spread - buy_spread;

    let market_price = spec.market_price.to_f64().unwrap_or(0.0);
    let min_price = spec.min_price.to_f64().unwrap_or(0.0);
    let max_price = spec.max_price.to_f64().unwrap_or(0.0);

    // Sell levels: from max_price down to market_price.
    let mut sell_prices = Vec::new();
    let mut p = max_price;
    while p > market_price {
        sell_prices.push(p);
        p *= step_down;
    }
    if sell_prices.is_empty() {
        sell_prices.push(max_price);
    }

    // Buy levels: from just below the last sell level (or market price)
    // down to min_price.
    let buy_start = sell_prices.last().copied().unwrap_or(market_price) * step_down;
    let mut buy_prices = Vec::new();
    let mut p = buy_start;
    while p > min_price {
        buy_prices.push(p);
        p *= step_down;
    }
    if buy_prices.is_empty() {
        buy_prices.push(buy_start.max(min_price));
    }

    let n_sell = sell_prices.len();
    let n_buy = buy_prices.len();
    let sell_spread = (sell_spread as usize).min(n_sell);
    let buy_spread = (buy_spread as usize).min(n_buy);

    let mut slots = Vec::with_capacity(n_sell + n_buy);
    let mut next_id = 0u64;

    // Sell side, market-outward order in `sell_prices` (innermost first).
    let n_sell_real = n_sell - sell_spread;
    let sell_sizes = weighted_sizes(
        n_sell_real,
        spec.weight_distribution.sell,
        spec.funds.sell,
        increment_percent,
        spec.min_sizes.sell,
        spec.precisions.base,
    )?;
    for (i, &price) in sell_prices.iter().enumerate() {
        let price_dec = decimal_from_f64(price)?;
        let id = GridId(next_id);
        next_id += 1;
        if i < sell_spread {
            slots.push(GridSlot::new_spread(id, price_dec));
        } else {
            let size = sell_sizes[i - sell_spread];
            slots.push(GridSlot::new_virtual(id, SlotType::Sell, price_dec, size));
        }
    }

    // Buy side, innermost-first in `buy_prices`.
    let n_buy_real = n_buy - buy_spread;
    let buy_sizes = weighted_sizes(
        n_buy_real,
        spec.weight_distribution.buy,
        spec.funds.buy,
        increment_percent,
        spec.min_sizes.buy,
        spec.precisions.base,
    )?;
    for (i, &price) in buy_prices.iter().enumerate() {
        let price_dec = decimal_from_f64(price)?;
        let id = GridId(next_id);
        next_id += 1;
        if i < buy_spread {
            slots.push(GridSlot::new_spread(id, price_dec));
        } else {
            let size = buy_sizes[i - buy_spread];
            slots.push(GridSlot::new_virtual(id, SlotType::Buy, price_dec, size));
        }
    }

    Ok(slots)
}

/// Public entry point for the same geometric weighting the generator
/// uses internally, exposed so the rotation strategy (spec §4.3.3
/// "compute the ideal geometric sizes ... using the grid generator's
/// sizing algorithm") can size a rotation batch without duplicating the
/// weighting formula.
pub fn geometric_sizes(
    n: usize,
    weight_exp: f64,
    funds: Decimal,
    increment_percent: Decimal,
    min_size: Decimal,
    base_precision: u32,
) -> Result<Vec<Decimal>, GridGenerationError> {
    let inc = increment_percent
        .to_f64()
        .ok_or_else(|| GridGenerationError::BadInput("increment_percent out of range".into()))?;
    weighted_sizes(n, weight_exp, funds, inc, min_size, base_precision)
}

fn decimal_from_f64(v: f64) -> Result<Decimal, GridGenerationError> {
    Decimal::try_from(v).map_err(|_| GridGenerationError::BadInput(format!("bad price: {v}")))
}

/// Compute weighted, quantized sizes for `n` real (non-spread) slots of
/// one side, indexed outward from the market (index 0 = closest to
/// market). Falls back to an unweighted retry if the minimum-size
/// constraint can't be met with weighting, then fails sizing (empty
/// sizes replaced with zero) if it still can't.
fn weighted_sizes(
    n: usize,
    weight_exp: f64,
    funds: Decimal,
    increment_percent: f64,
    min_size: Decimal,
    base_precision: u32,
) -> Result<Vec<Decimal>, GridGenerationError> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let base = 1.0 - increment_percent / 100.0;
    let raw: Vec<f64> = (0..n).map(|i| base.powf(i as f64 * weight_exp)).collect();
    let total: f64 = raw.iter().sum();

    let quantize = |sizes: &[f64]| -> Result<Vec<Decimal>, GridGenerationError> {
        sizes
            .iter()
            .map(|&s| {
                let dec = decimal_from_f64(s)?;
                let int_amount = to_chain_int(dec, base_precision)?;
                crate::precision::from_chain_int(int_amount, base_precision)
                    .map_err(GridGenerationError::Precision)
            })
            .collect()
    };

    let funds_f64 = funds.to_f64().unwrap_or(0.0);
    let first_pass: Vec<f64> = raw.iter().map(|w| w / total * funds_f64).collect();
    let quantized = quantize(&first_pass)?;

    if min_size.is_zero() || quantized.iter().all(|s| *s >= min_size) {
        return Ok(quantized);
    }

    // Retry once without weighting (even split).
    let even = funds_f64 / n as f64;
    let even_sizes = vec![even; n];
    let even_quantized = quantize(&even_sizes)?;
    if even_quantized.iter().all(|s| *s >= min_size) {
        return Ok(even_quantized);
    }

    warn!(n, "unable to satisfy minimum order size; failing sizing");
    Ok(vec![Decimal::ZERO; n])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spec() -> GridSpec {
        GridSpec {
            market_price: dec!(100),
            min_price: dec!(50),
            max_price: dec!(200),
            increment_percent: dec!(1),
            target_spread_percent: dec!(2),
            weight_distribution: WeightDistribution { buy: 1.0, sell: 1.0 },
            funds: SideFunds {
                buy: dec!(1000),
                sell: dec!(10),
            },
            precisions: Precisions {
                price: 8,
                base: 8,
                quote: 8,
            },
            min_sizes: MinSizes {
                buy: Decimal::ZERO,
                sell: Decimal::ZERO,
            },
        }
    }

    #[test]
    fn scenario_1_grid_generation() {
        let slots = generate_grid(&spec()).unwrap();

        let spread_count = slots
            .iter()
            .filter(|s| s.slot_type == SlotType::Spread)
            .count();
        assert!(spread_count >= 2, "there should be at least 2 spread slots total");

        let sell_total: Decimal = slots
            .iter()
            .filter(|s| s.slot_type == SlotType::Sell)
            .map(|s| s.ideal_size)
            .sum();
        assert!(
            (sell_total - dec!(10)).abs() < dec!(0.01),
            "sell sizes should sum to the sell budget: got {sell_total}"
        );

        let buy_total: Decimal = slots
            .iter()
            .filter(|s| s.slot_type == SlotType::Buy)
            .map(|s| s.ideal_size)
            .sum();
        assert!(
            (buy_total - dec!(1000)).abs() < dec!(1),
            "buy sizes should sum to the buy budget: got {buy_total}"
        );
    }

    #[test]
    fn consecutive_prices_step_by_increment() {
        let slots = generate_grid(&spec()).unwrap();
        for w in slots.windows(2) {
            let ratio = (w[1].price / w[0].price).to_f64().unwrap();
            let step_up = 1.01;
            let step_down = 0.99;
            let close = |a: f64, b: f64| (a - b).abs() < 1e-6;
            assert!(
                close(ratio, step_up) || close(ratio, step_down),
                "unexpected price ratio {ratio}"
            );
        }
    }

    #[test]
    fn rejects_market_price_outside_bounds() {
        let mut s = spec();
        s.market_price = dec!(500);
        assert!(generate_grid(&s).is_err());
    }

    #[test]
    fn auto_raises_target_spread_below_minimum() {
        let mut s = spec();
        s.target_spread_percent = dec!(0.5); // below 2 * 1%
        let slots = generate_grid(&s);
        assert!(slots.is_ok());
    }

    #[test]
    fn is_a_pure_function_of_its_inputs() {
        let a = generate_grid(&spec()).unwrap();
        let b = generate_grid(&spec()).unwrap();
        assert_eq!(a, b);
    }
}
