//! The Strategy Engine (spec §4.3): rebalance-after-fill orchestration,
//! Anchor & Refill consolidation, rotation, spread control, and
//! automatic grid regeneration.
//!
//! This crate depends on `grid-core` for the state machine, accountant,
//! and slot data model; it plugs into `grid-core`'s engine loop through
//! the `StrategyHooks` trait, implemented on [`strategy::StrategyEngine`]
//! here.

pub mod consolidation;
pub mod regeneration;
pub mod rotation;
pub mod spread;
pub mod strategy;
pub mod types;

pub use strategy::StrategyEngine;
pub use types::{
    ActiveOrdersTarget, OrderToPlace, OrderToRotate, PartialMove, PartialMoveKind, StrategyConfig,
    StrategyOutputs,
};
