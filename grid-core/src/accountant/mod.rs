//! The Accountant (spec §4.5): owns the fund cells, re-derives them from
//! the slot map, and accounts for fill proceeds. Only the Accountant
//! writes these cells; every other component observes.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::core::{ChainOrderId, GridId, GridSlot, Side, SlotState, SlotType};
use crate::monitoring::GridMetrics;
use crate::precision::{apply_market_fee, PrecisionError};

/// A pair of per-side scalars, mirroring the spec's `{buy, sell}` cells.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerSide<T> {
    pub buy: T,
    pub sell: T,
}

impl<T: Copy> PerSide<T> {
    pub fn get(&self, side: Side) -> T {
        match side {
            Side::Buy => self.buy,
            Side::Sell => self.sell,
        }
    }

    pub fn set(&mut self, side: Side, value: T) {
        match side {
            Side::Buy => self.buy = value,
            Side::Sell => self.sell = value,
        }
    }
}

/// The per-side fund cells owned by the Accountant (spec §3 "Fund cells").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FundCells {
    /// Optimistic mirror of on-chain free balance (`chainFree` in spec
    /// terms), refreshed from the chain periodically and adjusted
    /// optimistically between refreshes by `update_optimistic_free_balance`.
    pub chain_free: PerSide<Decimal>,
    pub available: PerSide<Decimal>,
    pub virtual_funds: PerSide<Decimal>,
    pub committed_grid: PerSide<Decimal>,
    pub committed_chain: PerSide<Decimal>,
    pub cache_funds: PerSide<Decimal>,
    pub fees_reserved: PerSide<Decimal>,
    pub allocated: PerSide<Decimal>,
}

/// Which operation `update_optimistic_free_balance` should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOp {
    Place,
    Cancel,
}

pub struct Accountant {
    pub funds: FundCells,
    /// Which side's cache funds the native transaction-fee token is
    /// deducted from, if this trading pair includes it. `None` if
    /// neither asset is the chain's native fee token.
    pub native_fee_side: Option<Side>,
    pub bts_fees_owed: Decimal,
    metrics: Option<Arc<GridMetrics>>,
}

impl Accountant {
    pub fn new(native_fee_side: Option<Side>) -> Self {
        Accountant {
            funds: FundCells::default(),
            native_fee_side,
            bts_fees_owed: Decimal::ZERO,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<GridMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Recompute every derived fund cell from the slot map per the
    /// identities in spec §3 (I5). Pure re-projection; no chain I/O.
    /// Idempotent: calling this twice in a row with an unchanged slot map
    /// produces the same `FundCells` (P2).
    pub fn recalculate_funds(&mut self, slots: &HashMap<GridId, GridSlot>) {
        let mut virtual_funds = PerSide::<Decimal>::default();
        let mut committed_grid = PerSide::<Decimal>::default();
        let mut committed_chain = PerSide::<Decimal>::default();

        for slot in slots.values() {
            let Some(side) = slot.side() else { continue };
            match slot.state {
                SlotState::Virtual => {
                    if slot.slot_type != SlotType::Spread {
                        virtual_funds.set(side, virtual_funds.get(side) + slot.size);
                    }
                }
                SlotState::Active | SlotState::Partial => {
                    committed_grid.set(side, committed_grid.get(side) + slot.size);
                    if slot.order_id.is_some() {
                        committed_chain.set(side, committed_chain.get(side) + slot.size);
                    }
                }
            }
        }

        for side in [Side::Buy, Side::Sell] {
            let available = (self.funds.chain_free.get(side)
                - virtual_funds.get(side)
                - self.funds.cache_funds.get(side)
                - self.funds.fees_reserved.get(side))
            .max(Decimal::ZERO);
            self.funds.available.set(side, available);
        }

        self.funds.virtual_funds = virtual_funds;
        self.funds.committed_grid = committed_grid;
        self.funds.committed_chain = committed_chain;

        if let Some(m) = &self.metrics {
            m.fund_recalc_count.inc();
        }
    }

    /// Adjust `chain_free` optimistically around a single slot transition,
    /// so subsequent operations in the same cycle see a consistent view
    /// without re-querying the chain.
    pub fn update_optimistic_free_balance(
        &mut self,
        side: Side,
        op: BalanceOp,
        size: Decimal,
        fee: Decimal,
    ) {
        let current = self.funds.chain_free.get(side);
        let updated = match op {
            BalanceOp::Place => current - size - fee,
            BalanceOp::Cancel => current + size,
        };
        self.funds.chain_free.set(side, updated);
    }

    /// A SELL fills: gross = size * price, net credited to
    /// `cache_funds[buy]` (the Open Question is resolved: always net of
    /// the market fee, never gross, for both directions).
    pub fn apply_sell_fill_proceeds(
        &mut self,
        size: Decimal,
        price: Decimal,
        fee_percent: Decimal,
    ) -> Result<Decimal, PrecisionError> {
        let gross = size * price;
        let net = apply_market_fee(gross, fee_percent)?;
        self.funds.cache_funds.buy += net;
        self.apply_native_fee_if_held(Side::Buy, gross - net);
        Ok(net)
    }

    /// A BUY fills: symmetric, proceeds in base asset credited to
    /// `cache_funds[sell]`, net of the market fee.
    pub fn apply_buy_fill_proceeds(
        &mut self,
        size: Decimal,
        fee_percent: Decimal,
    ) -> Result<Decimal, PrecisionError> {
        let net = apply_market_fee(size, fee_percent)?;
        self.funds.cache_funds.sell += net;
        self.apply_native_fee_if_held(Side::Sell, size - net);
        Ok(net)
    }

    /// Accumulate the native-token fee owed for a fill, then immediately
    /// deduct it from whichever side's cache funds holds that token.
    fn apply_native_fee_if_held(&mut self, proceeds_side: Side, fee_amount: Decimal) {
        let Some(native_side) = self.native_fee_side else {
            return;
        };
        self.bts_fees_owed += fee_amount;
        if native_side == proceeds_side {
            self.funds.cache_funds.set(
                native_side,
                (self.funds.cache_funds.get(native_side) - fee_amount).max(Decimal::ZERO),
            );
            self.bts_fees_owed = (self.bts_fees_owed - fee_amount).max(Decimal::ZERO);
        }
    }

    /// A chain order id was reused by the same slot rather than freshly
    /// issued — no fund effect, only noted for callers that track
    /// per-order accounting history separately.
    pub fn note_reused_order(&self, _id: ChainOrderId) {}
}
