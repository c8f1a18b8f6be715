//! Shared output and configuration types for the strategy engine.

use grid_core::{ChainOrderId, GridId, Side};
use rust_decimal::Decimal;

/// A placement the caller (the engine's chain adapter call site) should
/// submit. The slot has already been staged as the relevant state in
/// the state machine; this carries what to actually send on-chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderToPlace {
    pub grid_id: GridId,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// A rotation: cancel `from_order` (on `from_grid_id`), place a fresh
/// order at `to_grid_id`'s price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderToRotate {
    pub from_grid_id: GridId,
    pub from_order: ChainOrderId,
    pub to_grid_id: GridId,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// A partial-order move produced by consolidation: either a restore to
/// ideal size in place, or a MERGE/SPLIT decision on the innermost
/// partial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialMove {
    pub grid_id: GridId,
    pub kind: PartialMoveKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PartialMoveKind {
    RestoredToIdeal,
    Merged { merged_dust_size: Decimal },
    Split { residual_placed_at: GridId, residual_size: Decimal },
}

/// What one cycle's strategy pass produced, handed back to the caller to
/// submit against the chain (spec §4.3: "three output lists").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyOutputs {
    pub orders_to_place: Vec<OrderToPlace>,
    pub orders_to_rotate: Vec<OrderToRotate>,
    pub partial_moves: Vec<PartialMove>,
    /// Sides whose most recent cycle tripped a regeneration trigger
    /// (spec §4.3.5). Regenerating the grid itself means re-running the
    /// generator against fresh funds, which needs the bot's `GridSpec`
    /// and so happens one level up from this engine; this just reports
    /// which sides need it.
    pub regeneration_needed: Vec<Side>,
}

impl StrategyOutputs {
    pub fn merge(&mut self, mut other: StrategyOutputs) {
        self.orders_to_place.append(&mut other.orders_to_place);
        self.orders_to_rotate.append(&mut other.orders_to_rotate);
        self.partial_moves.append(&mut other.partial_moves);
        self.regeneration_needed.append(&mut other.regeneration_needed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveOrdersTarget {
    pub buy: u32,
    pub sell: u32,
}

impl ActiveOrdersTarget {
    pub fn get(&self, side: Side) -> u32 {
        match side {
            Side::Buy => self.buy,
            Side::Sell => self.sell,
        }
    }
}

/// Tuning knobs from spec §6, scoped to what the strategy engine needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyConfig {
    pub target_active_orders: ActiveOrdersTarget,
    /// `PARTIAL_DUST_THRESHOLD_PERCENTAGE`, default 5.
    pub partial_dust_threshold_percent: Decimal,
    /// `GRID_REGENERATION_PERCENTAGE`, default 3.
    pub grid_regeneration_percent: Decimal,
    /// `RMS_PERCENTAGE`, default 14.3.
    pub rms_percent: Decimal,
    /// How far `currentSpread` may exceed `targetSpreadPercent` before
    /// spread control activates placeholders toward market.
    pub spread_margin_percent: Decimal,
    /// Market taker/maker fee for this pair, sourced from chain asset
    /// metadata at startup. Applied to both sides of every fill when
    /// crediting `cacheFunds`.
    pub market_fee_percent: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn active_orders_target_indexes_by_side() {
        let target = ActiveOrdersTarget { buy: 5, sell: 3 };
        assert_eq!(target.get(Side::Buy), 5);
        assert_eq!(target.get(Side::Sell), 3);
    }

    #[test]
    fn strategy_outputs_merge_concatenates_all_three_lists() {
        let mut a = StrategyOutputs {
            orders_to_place: vec![OrderToPlace {
                grid_id: GridId(1),
                side: Side::Buy,
                price: dec!(100),
                size: dec!(1),
            }],
            ..Default::default()
        };
        let b = StrategyOutputs {
            orders_to_place: vec![OrderToPlace {
                grid_id: GridId(2),
                side: Side::Sell,
                price: dec!(101),
                size: dec!(1),
            }],
            partial_moves: vec![PartialMove { grid_id: GridId(3), kind: PartialMoveKind::RestoredToIdeal }],
            ..Default::default()
        };

        a.merge(b);
        assert_eq!(a.orders_to_place.len(), 2);
        assert_eq!(a.partial_moves.len(), 1);
        assert!(a.orders_to_rotate.is_empty());
    }
}
