//! The core error taxonomy (spec §7).
//!
//! Every recoverable failure mode the engine can hit is a variant here;
//! outer orchestration (binaries, the cycle loop) wraps these in
//! `anyhow::Result` at its own boundary, but nothing inside `grid-core`
//! returns a bare string error.

use crate::core::{ChainOrderId, GridId, SlotState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed slot, config, or number. Reject the operation, continue.
    #[error("bad input: {reason}")]
    BadInput { reason: String },

    /// An illegal state edge was attempted (see the transition table in §3).
    #[error("invalid transition for slot {grid_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        grid_id: GridId,
        from: SlotState,
        to: SlotState,
    },

    /// Invariants I1-I3 or I6 were violated and could not be repaired by
    /// rebuilding the indices from the slot map.
    #[error("index corruption: {reason}")]
    IndexCorruption { reason: String },

    /// Timeout or RPC failure talking to the chain. Retried with backoff;
    /// surfaced to the cycle only once retries are exhausted.
    #[error("chain call transiently failed: {reason}")]
    ChainTransient { reason: String },

    /// The node rejected the call outright (e.g. insufficient balance).
    #[error("chain call permanently rejected: {reason}")]
    ChainPermanent { reason: String },

    /// Same retry policy as `ChainTransient`, for the persistence layer.
    #[error("persistence call transiently failed: {reason}")]
    PersistenceTransient { reason: String },

    /// Size or price fell below the minimum tick for the asset.
    #[error("precision loss for slot {grid_id:?}: {reason}")]
    PrecisionLoss {
        grid_id: Option<GridId>,
        reason: String,
    },

    /// A malformed chain order id was encountered during sync.
    #[error("unknown chain order id {0}")]
    UnknownChainOrderId(ChainOrderId),

    #[error(transparent)]
    Precision(#[from] crate::precision::PrecisionError),

    #[error(transparent)]
    GridGeneration(#[from] crate::grid::generator::GridGenerationError),
}

pub type CoreResult<T> = Result<T, CoreError>;
