//! Partial-order consolidation — "Anchor & Refill" (spec §4.3.2).
//!
//! Converges a side back down to at most one PARTIAL order: outer
//! partials restore to their ideal size, the innermost partial either
//! MERGEs (absorbs the dust) or SPLITs (anchors to ideal, places a fresh
//! order with the residual).

use grid_core::accountant::Accountant;
use grid_core::state_machine::{FundEffect, StateMachine};
use grid_core::{CoreError, GridSlot, Side, SlotState};
use rust_decimal::Decimal;
use tracing::info;

use crate::types::{PartialMove, PartialMoveKind, StrategyConfig};

/// Runs the Anchor & Refill walk for one side and returns the resulting
/// partial moves. Locked slots are left untouched entirely.
pub fn consolidate(
    sm: &mut StateMachine,
    accountant: &mut Accountant,
    side: Side,
    config: &StrategyConfig,
    now: std::time::Instant,
) -> Result<Vec<PartialMove>, CoreError> {
    let mut partials: Vec<GridSlot> = sm
        .slots()
        .values()
        .filter(|s| s.side() == Some(side) && s.state == SlotState::Partial && !sm.is_locked(s.id, now))
        .cloned()
        .collect();

    if partials.is_empty() {
        return Ok(Vec::new());
    }

    // Outermost-first, away from market: for BUY that's lowest price,
    // for SELL that's highest price.
    partials.sort_by(|a, b| match side {
        Side::Buy => a.price.cmp(&b.price),
        Side::Sell => b.price.cmp(&a.price),
    });

    let innermost = partials.pop().expect("checked non-empty above");
    let mut moves = Vec::new();
    let mut residual_capital = Decimal::ZERO;

    for outer in partials {
        let excess = (outer.size - outer.ideal_size).max(Decimal::ZERO);
        residual_capital += excess;

        let mut restored = outer.clone();
        restored.size = outer.ideal_size;
        restored.state = SlotState::Active;
        sm.upsert_order(restored, FundEffect::None, accountant)?;
        moves.push(PartialMove { grid_id: outer.id, kind: PartialMoveKind::RestoredToIdeal });
    }

    moves.push(anchor_innermost(sm, accountant, innermost, residual_capital, side, config)?);

    Ok(moves)
}

fn anchor_innermost(
    sm: &mut StateMachine,
    accountant: &mut Accountant,
    innermost: GridSlot,
    residual_capital: Decimal,
    side: Side,
    config: &StrategyConfig,
) -> Result<PartialMove, CoreError> {
    let dust_threshold = config.partial_dust_threshold_percent;
    let is_dust = innermost.ideal_size.is_zero()
        || (innermost.size / innermost.ideal_size) * Decimal::ONE_HUNDRED < dust_threshold;

    let merged_size = innermost.ideal_size + residual_capital;
    let merge_ceiling = innermost.ideal_size * (Decimal::ONE + dust_threshold / Decimal::ONE_HUNDRED);

    if is_dust && merged_size <= merge_ceiling {
        let mut merged = innermost.clone();
        merged.size = merged_size;
        merged.state = SlotState::Active;
        merged.flags.is_double_order = true;
        merged.flags.merged_dust_size = residual_capital;
        merged.flags.filled_since_refill = Decimal::ZERO;
        merged.flags.pending_rotation = true;
        sm.upsert_order(merged, FundEffect::None, accountant)?;

        info!(grid_id = %innermost.id, merged_dust_size = %residual_capital, "consolidation: MERGE");
        return Ok(PartialMove {
            grid_id: innermost.id,
            kind: PartialMoveKind::Merged { merged_dust_size: residual_capital },
        });
    }

    // SPLIT: anchor the innermost to ideal. The residual capital becomes
    // a fresh order at the closest SPREAD slot, but that slot isn't
    // flipped to Active here — it has no `order_id` yet. The caller
    // reads `residual_placed_at`/`residual_size` off the returned move
    // and places the order; the state machine picks it up as a claim on
    // the next sync pass, same as any other new placement.
    let mut anchored = innermost.clone();
    anchored.size = innermost.ideal_size;
    anchored.state = SlotState::Active;
    sm.upsert_order(anchored, FundEffect::None, accountant)?;

    let closest_spread = sm
        .slots()
        .values()
        .filter(|s| s.slot_type == grid_core::SlotType::Spread && s.state == SlotState::Virtual)
        .min_by_key(|s| (s.price - innermost.price).abs())
        .map(|s| s.id);

    let Some(spread_id) = closest_spread else {
        info!(grid_id = %innermost.id, "consolidation: SPLIT anchored, no spread slot available for residual");
        return Ok(PartialMove {
            grid_id: innermost.id,
            kind: PartialMoveKind::Split { residual_placed_at: innermost.id, residual_size: Decimal::ZERO },
        });
    };

    let residual_size = if residual_capital.is_zero() {
        zero_residual_split_size(sm, accountant, side)
    } else {
        residual_capital
    };

    info!(grid_id = %innermost.id, residual_at = %spread_id, residual_size = %residual_size, "consolidation: SPLIT");
    Ok(PartialMove {
        grid_id: innermost.id,
        kind: PartialMoveKind::Split { residual_placed_at: spread_id, residual_size },
    })
}

/// Open Question 2's resolution: when a SPLIT's residual capital is
/// exactly zero but a rotation partner is still needed, size the fresh
/// order from `cacheFunds[side] / rotation_candidate_count`, where the
/// candidate count is every Active/Virtual slot of the side (the pool a
/// rotation could draw from).
fn zero_residual_split_size(sm: &StateMachine, accountant: &Accountant, side: Side) -> Decimal {
    let candidate_count = sm
        .slots()
        .values()
        .filter(|s| s.side() == Some(side) && matches!(s.state, SlotState::Active | SlotState::Virtual))
        .count()
        .max(1);

    accountant.funds.cache_funds.get(side) / Decimal::from(candidate_count)
}
