//! The grid slot data model (spec §3).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{ChainOrderId, GridId};

/// Which side of the book a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// The kind of slot. `Spread` slots are always `Virtual` and act as
/// rotation targets inside the no-order zone around the reference price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotType {
    Buy,
    Sell,
    Spread,
}

impl SlotType {
    pub fn side(self) -> Option<Side> {
        match self {
            SlotType::Buy => Some(Side::Buy),
            SlotType::Sell => Some(Side::Sell),
            SlotType::Spread => None,
        }
    }
}

/// A slot's lifecycle state. See the transition table in `transitions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    Virtual,
    Active,
    Partial,
}

/// Strategy flags carried by a slot (design, not vocabulary — spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyFlags {
    /// The slot absorbed dust from an Anchor & Refill MERGE.
    pub is_double_order: bool,
    /// Size of dust merged into this slot by a MERGE decision.
    pub merged_dust_size: Decimal,
    /// Accumulated fills since the last refill, tracked while
    /// `is_double_order` is set, until it reaches `merged_dust_size`.
    pub filled_since_refill: Decimal,
    /// A rotation on the opposite side is owed once this slot's dust
    /// accounting closes out.
    pub pending_rotation: bool,
    /// This slot is the fresh replacement order placed by a SPLIT
    /// decision, carrying residual capital from consolidation.
    pub is_residual_from_anchor: bool,
}

impl Default for StrategyFlags {
    fn default() -> Self {
        StrategyFlags {
            is_double_order: false,
            merged_dust_size: Decimal::ZERO,
            filled_since_refill: Decimal::ZERO,
            pending_rotation: false,
            is_residual_from_anchor: false,
        }
    }
}

/// A single position in the grid ladder.
///
/// `id` and `price` are immutable once the grid is generated; `state`,
/// `size`, `order_id`, and `flags` mutate under the rules in
/// `transitions::is_legal`. `ideal_size` is recomputed whenever the side
/// is regenerated (spec §4.3.5) and used by invariant I4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSlot {
    pub id: GridId,
    pub slot_type: SlotType,
    pub state: SlotState,
    pub price: Decimal,
    pub size: Decimal,
    pub ideal_size: Decimal,
    pub order_id: Option<ChainOrderId>,
    pub flags: StrategyFlags,
}

impl GridSlot {
    pub fn new_spread(id: GridId, price: Decimal) -> Self {
        GridSlot {
            id,
            slot_type: SlotType::Spread,
            state: SlotState::Virtual,
            price,
            size: Decimal::ZERO,
            ideal_size: Decimal::ZERO,
            order_id: None,
            flags: StrategyFlags::default(),
        }
    }

    pub fn new_virtual(id: GridId, slot_type: SlotType, price: Decimal, ideal_size: Decimal) -> Self {
        GridSlot {
            id,
            slot_type,
            state: SlotState::Virtual,
            price,
            size: Decimal::ZERO,
            ideal_size,
            order_id: None,
            flags: StrategyFlags::default(),
        }
    }

    pub fn side(&self) -> Option<Side> {
        self.slot_type.side()
    }

    /// Invariant I2: `state ∈ {Active, Partial} ⇔ order_id.is_some()`.
    pub fn order_id_consistent(&self) -> bool {
        matches!(self.state, SlotState::Active | SlotState::Partial) == self.order_id.is_some()
    }

    /// Invariant I4: an `Active` slot must be at or above its ideal size.
    pub fn size_consistent_with_state(&self) -> bool {
        match self.state {
            SlotState::Active => self.size >= self.ideal_size,
            _ => true,
        }
    }
}

/// The legal transition table (spec §3). Used by the state machine's
/// single mutator; anything not listed here is rejected.
pub mod transitions {
    use super::SlotState::{self, *};

    pub fn is_legal(from: SlotState, to: SlotState) -> bool {
        matches!(
            (from, to),
            (Virtual, Active)
                | (Virtual, Partial)
                | (Active, Partial)
                | (Active, Virtual)
                | (Partial, Active)
                | (Partial, Virtual)
                // A no-op upsert (e.g. a size-only update to an Active slot)
                // is not a transition and is always allowed.
                | (Virtual, Virtual)
                | (Active, Active)
                | (Partial, Partial)
        )
    }
}
