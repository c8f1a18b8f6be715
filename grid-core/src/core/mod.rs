//! The grid slot data model: ids, slot types/states, strategy flags.

pub mod ids;
pub mod slot;

pub use ids::{ChainOrderId, GridId};
pub use slot::{transitions, GridSlot, Side, SlotState, SlotType, StrategyFlags};
