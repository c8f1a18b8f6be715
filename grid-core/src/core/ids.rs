//! Grid and chain order identifiers.
//!
//! Kept as distinct newtypes (never raw integers) so a grid id can never
//! be accidentally compared against a chain order id, following the
//! teacher's `core::types::OrderId` convention.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Stable identifier for a grid slot, assigned once at grid generation.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridId(pub u64);

impl fmt::Display for GridId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid#{}", self.0)
    }
}

impl From<u64> for GridId {
    fn from(v: u64) -> Self {
        GridId(v)
    }
}

/// An on-chain order identifier. Opaque when handed back from a real
/// chain adapter; the simulated adapter issues its own using
/// `ChainOrderId::generate`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainOrderId(pub u128);

impl fmt::Display for ChainOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain#{}", self.0)
    }
}

impl From<u128> for ChainOrderId {
    fn from(v: u128) -> Self {
        ChainOrderId(v)
    }
}

static ID_COUNTER: AtomicU32 = AtomicU32::new(0);

impl ChainOrderId {
    /// Timestamp (top 64 bits) | random (next 32 bits) | monotonic counter
    /// (low 32 bits), for the simulated chain adapter's own id issuance.
    /// Real adapters never call this; their ids are parsed from whatever
    /// the chain returns.
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let random: u32 = rand::thread_rng().gen();
        let counter = ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);

        let id = ((timestamp as u128) << 64) | ((random as u128) << 32) | counter as u128;
        ChainOrderId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_across_calls() {
        let a = ChainOrderId::generate();
        let b = ChainOrderId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn display_formats_are_distinguishable() {
        assert_eq!(GridId(7).to_string(), "grid#7");
        assert_eq!(ChainOrderId(7).to_string(), "chain#7");
    }
}
