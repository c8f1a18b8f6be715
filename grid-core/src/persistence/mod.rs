//! The Persistence contract (spec §6) and an in-memory implementation
//! used by tests and the demo binaries. Real adapters (e.g. a
//! filesystem or database backend) live outside this crate.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::GridSlot;
use crate::errors::CoreError;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Per-bot persisted grid state (spec §6 "Persisted state layout").
/// `extra` preserves any fields this version doesn't recognize so a
/// round-trip through an older/newer build doesn't silently drop data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GridSnapshot {
    pub schema_version: u32,
    pub slots: Vec<GridSlot>,
    pub rms_reference: HashMap<String, Decimal>,
    pub last_updated_unix: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GridSnapshot {
    pub fn new(slots: Vec<GridSlot>, rms_reference: HashMap<String, Decimal>, last_updated_unix: i64) -> Self {
        GridSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            slots,
            rms_reference,
            last_updated_unix,
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheFunds {
    pub buy: Decimal,
    pub sell: Decimal,
}

/// Everything the engine needs to persist across restarts. One instance
/// per bot key (`{assetA}-{assetB}-{account}`-style identifier), or one
/// instance shared across bots if the backend is itself keyed.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn load_grid_snapshot(&self, bot_key: &str) -> Result<Option<GridSnapshot>, CoreError>;
    async fn save_grid_snapshot(&self, bot_key: &str, snapshot: &GridSnapshot) -> Result<(), CoreError>;
    async fn load_cache_funds(&self, bot_key: &str) -> Result<CacheFunds, CoreError>;
    async fn update_cache_funds(&self, bot_key: &str, funds: CacheFunds) -> Result<(), CoreError>;
    async fn load_fees_owed(&self, bot_key: &str) -> Result<Decimal, CoreError>;
    async fn update_fees_owed(&self, bot_key: &str, value: Decimal) -> Result<(), CoreError>;
    /// Whether a `recalculate.<bot_key>.trigger` marker is present,
    /// signalling the engine should regenerate the grid on its next
    /// cycle regardless of the RMS/cache thresholds.
    async fn has_regeneration_trigger(&self, bot_key: &str) -> Result<bool, CoreError>;
    async fn clear_regeneration_trigger(&self, bot_key: &str) -> Result<(), CoreError>;
    /// Surfaces the most recent persistence warning for `getPersistenceWarning()`
    /// (spec §7); `None` once cleared or if nothing has failed.
    async fn persistence_warning(&self, bot_key: &str) -> Option<String>;
}

#[derive(Default)]
struct BotRecord {
    snapshot: Option<GridSnapshot>,
    cache_funds: CacheFunds,
    fees_owed: Decimal,
    regeneration_trigger: bool,
    warning: Option<String>,
}

/// In-memory stand-in for tests and the demo binaries. Never fails on
/// its own; `warning` is exposed purely so callers can exercise the
/// `persistence_warning` surface without a real backend.
pub struct InMemoryPersistence {
    bots: Mutex<HashMap<String, BotRecord>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        InMemoryPersistence { bots: Mutex::new(HashMap::new()) }
    }

    pub async fn set_warning(&self, bot_key: &str, warning: Option<String>) {
        self.bots.lock().await.entry(bot_key.to_string()).or_default().warning = warning;
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistence {
    async fn load_grid_snapshot(&self, bot_key: &str) -> Result<Option<GridSnapshot>, CoreError> {
        Ok(self.bots.lock().await.get(bot_key).and_then(|r| r.snapshot.clone()))
    }

    async fn save_grid_snapshot(&self, bot_key: &str, snapshot: &GridSnapshot) -> Result<(), CoreError> {
        self.bots
            .lock()
            .await
            .entry(bot_key.to_string())
            .or_default()
            .snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn load_cache_funds(&self, bot_key: &str) -> Result<CacheFunds, CoreError> {
        Ok(self
            .bots
            .lock()
            .await
            .get(bot_key)
            .map(|r| r.cache_funds)
            .unwrap_or_default())
    }

    async fn update_cache_funds(&self, bot_key: &str, funds: CacheFunds) -> Result<(), CoreError> {
        self.bots.lock().await.entry(bot_key.to_string()).or_default().cache_funds = funds;
        Ok(())
    }

    async fn load_fees_owed(&self, bot_key: &str) -> Result<Decimal, CoreError> {
        Ok(self
            .bots
            .lock()
            .await
            .get(bot_key)
            .map(|r| r.fees_owed)
            .unwrap_or_default())
    }

    async fn update_fees_owed(&self, bot_key: &str, value: Decimal) -> Result<(), CoreError> {
        self.bots.lock().await.entry(bot_key.to_string()).or_default().fees_owed = value;
        Ok(())
    }

    async fn has_regeneration_trigger(&self, bot_key: &str) -> Result<bool, CoreError> {
        Ok(self
            .bots
            .lock()
            .await
            .get(bot_key)
            .map(|r| r.regeneration_trigger)
            .unwrap_or(false))
    }

    async fn clear_regeneration_trigger(&self, bot_key: &str) -> Result<(), CoreError> {
        if let Some(r) = self.bots.lock().await.get_mut(bot_key) {
            r.regeneration_trigger = false;
        }
        Ok(())
    }

    async fn persistence_warning(&self, bot_key: &str) -> Option<String> {
        self.bots.lock().await.get(bot_key).and_then(|r| r.warning.clone())
    }
}
