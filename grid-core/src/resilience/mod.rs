//! Retry policy for the chain/persistence adapter error taxonomy
//! (spec §7 `ChainTransient`/`PersistenceTransient`).

pub mod backoff;

pub use backoff::{BackoffConfig, ExponentialBackoff};
