//! Precision & Math Utilities (spec §4.1).
//!
//! All size and price comparisons that affect chain behavior go through
//! integer representations at the asset's own decimal precision. These
//! functions never mutate anything and never touch I/O.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use thiserror::Error;

use crate::core::Side;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrecisionError {
    #[error("bad input: {0}")]
    BadInput(String),
}

/// Convert a decimal `amount` to its integer representation at `precision`
/// decimal places, truncating toward zero on any excess digits.
///
/// `toChainInt` in spec terms. Truncation (not rounding to nearest) is the
/// deliberate rule here: it is idempotent under repeated application and
/// never reports a chain balance larger than what is actually available.
pub fn to_chain_int(amount: Decimal, precision: u32) -> Result<i128, PrecisionError> {
    let shifted = amount * Decimal::from(10u64.pow(precision));
    shifted
        .trunc()
        .to_i128()
        .ok_or_else(|| PrecisionError::BadInput(format!("amount out of range: {amount}")))
}

/// Inverse of `to_chain_int`: reconstruct a `Decimal` at `precision` decimal
/// places from its integer representation. `fromChainInt` in spec terms.
pub fn from_chain_int(int_amount: i128, precision: u32) -> Result<Decimal, PrecisionError> {
    if precision > 28 {
        return Err(PrecisionError::BadInput(format!(
            "precision {precision} exceeds Decimal's maximum scale"
        )));
    }
    Ok(Decimal::from_i128_with_scale(int_amount, precision))
}

/// Compare two decimal sizes at the given precision by comparing their
/// integer representations, so small float-ish noise below the asset's
/// tick size never produces a spurious ordering.
pub fn compare_sizes(a: Decimal, b: Decimal, precision: u32) -> Result<Ordering, PrecisionError> {
    let ia = to_chain_int(a, precision)?;
    let ib = to_chain_int(b, precision)?;
    Ok(ia.cmp(&ib))
}

/// The maximum absolute price difference at which an on-chain order is
/// still considered "the same" as a grid slot.
///
/// Modeled on the one-tick price change induced by perturbing the quoted
/// amount by one unit at the given order size: the quote side of a larger
/// order moves by one integer unit over a coarser base-amount grid, so the
/// tolerance band widens with size (P6: monotone non-decreasing in
/// `order_size`). Falls back to `grid_price * 0.001` when asset metadata
/// (precision) is unknown.
pub fn price_tolerance(
    grid_price: Decimal,
    order_size: Decimal,
    _side: Side,
    price_precision: Option<u32>,
    quote_precision: Option<u32>,
) -> Result<Decimal, PrecisionError> {
    if order_size.is_sign_negative() {
        return Err(PrecisionError::BadInput("negative order size".to_string()));
    }

    let (Some(price_p), Some(quote_p)) = (price_precision, quote_precision) else {
        return Ok(grid_price * Decimal::new(1, 3)); // 0.001
    };

    let tick = from_chain_int(1, price_p)?;
    let one_quote_unit = from_chain_int(1, quote_p)?;
    Ok(tick + one_quote_unit * order_size)
}

/// Deduct the maker market fee for `asset`, returning the net amount.
/// `fee_percent` is expressed as e.g. `0.1` for 0.1%.
pub fn apply_market_fee(gross: Decimal, fee_percent: Decimal) -> Result<Decimal, PrecisionError> {
    let fee = gross * fee_percent / Decimal::ONE_HUNDRED;
    Ok(gross - fee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_trip_to_from_chain_int() {
        for n in [0i128, 1, 42, 123456789, 1_000_000] {
            for p in [0u32, 2, 6, 8] {
                let d = from_chain_int(n, p).unwrap();
                let back = to_chain_int(d, p).unwrap();
                assert_eq!(back, n, "n={n} p={p}");
            }
        }
    }

    #[test]
    fn to_chain_int_truncates_excess_digits() {
        // 1.23456 at precision 2 truncates to 1.23 -> 123
        assert_eq!(to_chain_int(dec!(1.23456), 2).unwrap(), 123);
    }

    #[test]
    fn compare_sizes_orders_by_integer_representation() {
        assert_eq!(
            compare_sizes(dec!(1.001), dec!(1.0019), 2).unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            compare_sizes(dec!(1.02), dec!(1.01), 2).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn price_tolerance_falls_back_without_metadata() {
        let tol = price_tolerance(dec!(100), dec!(5), Side::Buy, None, None).unwrap();
        assert_eq!(tol, dec!(0.1));
    }

    #[test]
    fn price_tolerance_monotone_in_order_size() {
        let small = price_tolerance(dec!(100), dec!(1), Side::Buy, Some(2), Some(6)).unwrap();
        let large = price_tolerance(dec!(100), dec!(100), Side::Buy, Some(2), Some(6)).unwrap();
        assert!(large >= small, "tolerance should not decrease with size");
    }

    #[test]
    fn apply_market_fee_deducts_percentage() {
        let net = apply_market_fee(dec!(100), dec!(0.1)).unwrap();
        assert_eq!(net, dec!(99.9));
    }

    #[test]
    fn price_tolerance_rejects_negative_size() {
        let err = price_tolerance(dec!(100), dec!(-1), Side::Buy, Some(2), Some(6));
        assert!(matches!(err, Err(PrecisionError::BadInput(_))));
    }
}
