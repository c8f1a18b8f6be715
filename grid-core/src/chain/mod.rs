//! The Chain Adapter contract (spec §6) and a simulated implementation
//! used by the demo binaries and tests. Real adapters live outside this
//! crate and implement `ChainAdapter` against an actual node/RPC.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::core::{ChainOrderId, Side};
use crate::errors::CoreError;

pub type AssetId = String;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderRequest {
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub price_precision: u32,
    pub size_precision: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedOrder {
    pub order_id: ChainOrderId,
    pub fee: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderUpdate {
    pub price: Option<Decimal>,
    pub size: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainOpenOrder {
    pub order_id: ChainOrderId,
    pub for_sale: Decimal,
    pub sell_asset: AssetId,
    pub receive_asset: AssetId,
    pub min_to_receive: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetBalance {
    pub free: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainFillEvent {
    pub history_id: ChainOrderId,
    pub order_id: ChainOrderId,
    pub pays_amount: Decimal,
    pub pays_asset: AssetId,
    pub receives_amount: Decimal,
    pub receives_asset: AssetId,
    pub is_maker: bool,
    pub block_num: u64,
    pub block_time_unix: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetMetadata {
    pub precision: u32,
    pub market_fee_percent: Decimal,
}

/// Everything the Sync and Strategy engines need from the chain. One
/// instance per bot; real implementations hold their own RPC client
/// internally.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    async fn place_order(&self, account_id: &str, market: &str, req: OrderRequest) -> Result<PlacedOrder, CoreError>;
    async fn cancel_order(&self, account_id: &str, order_id: ChainOrderId) -> Result<(), CoreError>;
    async fn update_order(&self, account_id: &str, order_id: ChainOrderId, update: OrderUpdate) -> Result<(), CoreError>;
    async fn read_open_orders(&self, account_id: &str, market: &str) -> Result<Vec<ChainOpenOrder>, CoreError>;
    async fn get_account_balances(&self, account_id: &str, assets: &[AssetId]) -> Result<HashMap<AssetId, AssetBalance>, CoreError>;
    /// A channel the caller drains for live fills; the adapter owns the
    /// underlying subscription task's lifetime.
    async fn subscribe_fills(&self, account_id: &str) -> Result<mpsc::Receiver<ChainFillEvent>, CoreError>;
    async fn get_asset_metadata(&self, symbol: &str) -> Result<AssetMetadata, CoreError>;
    async fn wait_connected(&self, timeout: Duration) -> Result<(), CoreError>;
}

/// Process-wide asset metadata cache (spec §9 "Global mutable state"):
/// lazily initialized, immutable per symbol after first successful
/// fetch, explicitly resettable. Shared by every `ChainAdapter`
/// instance in the process rather than per-bot, since asset metadata
/// doesn't vary by account.
static ASSET_METADATA_CACHE: OnceCell<DashMap<String, AssetMetadata>> = OnceCell::new();

fn metadata_cache() -> &'static DashMap<String, AssetMetadata> {
    ASSET_METADATA_CACHE.get_or_init(DashMap::new)
}

/// Fetch asset metadata through the shared cache, calling `adapter` only
/// on a miss.
pub async fn cached_asset_metadata(
    adapter: &dyn ChainAdapter,
    symbol: &str,
) -> Result<AssetMetadata, CoreError> {
    if let Some(entry) = metadata_cache().get(symbol) {
        return Ok(*entry);
    }
    let metadata = adapter.get_asset_metadata(symbol).await?;
    metadata_cache().insert(symbol.to_string(), metadata);
    Ok(metadata)
}

/// Drop every cached entry, forcing the next `cached_asset_metadata`
/// call per symbol to refetch. For operator-triggered resets only.
pub fn reset_asset_metadata_cache() {
    metadata_cache().clear();
}

/// An in-memory adapter for tests and the demo binaries: orders placed
/// against it are tracked but never actually fill unless the test
/// harness calls `push_fill` explicitly.
pub struct SimulatedChainAdapter {
    open_orders: Mutex<HashMap<ChainOrderId, ChainOpenOrder>>,
    balances: Mutex<HashMap<AssetId, AssetBalance>>,
    fills_tx: Mutex<Option<mpsc::Sender<ChainFillEvent>>>,
    default_metadata: AssetMetadata,
}

impl SimulatedChainAdapter {
    pub fn new(balances: HashMap<AssetId, AssetBalance>) -> Self {
        SimulatedChainAdapter {
            open_orders: Mutex::new(HashMap::new()),
            balances: Mutex::new(balances),
            fills_tx: Mutex::new(None),
            default_metadata: AssetMetadata {
                precision: 8,
                market_fee_percent: Decimal::new(1, 1), // 0.1%
            },
        }
    }

    /// Push a fill to whoever is subscribed, consuming `for_sale` from
    /// the tracked open order's size.
    pub fn push_fill(&self, fill: ChainFillEvent) {
        if let Some(order) = self.open_orders.lock().get_mut(&fill.order_id) {
            order.for_sale = (order.for_sale - fill.pays_amount).max(Decimal::ZERO);
        }
        if let Some(tx) = self.fills_tx.lock().as_ref() {
            let _ = tx.try_send(fill);
        }
    }
}

#[async_trait]
impl ChainAdapter for SimulatedChainAdapter {
    async fn place_order(&self, _account_id: &str, _market: &str, req: OrderRequest) -> Result<PlacedOrder, CoreError> {
        let order_id = ChainOrderId::generate();
        let (sell_asset, receive_asset) = match req.side {
            Side::Buy => ("quote".to_string(), "base".to_string()),
            Side::Sell => ("base".to_string(), "quote".to_string()),
        };
        self.open_orders.lock().insert(
            order_id,
            ChainOpenOrder {
                order_id,
                for_sale: req.size,
                sell_asset,
                receive_asset,
                min_to_receive: req.size * req.price,
            },
        );
        Ok(PlacedOrder { order_id, fee: Decimal::ZERO })
    }

    async fn cancel_order(&self, _account_id: &str, order_id: ChainOrderId) -> Result<(), CoreError> {
        self.open_orders
            .lock()
            .remove(&order_id)
            .map(|_| ())
            .ok_or(CoreError::UnknownChainOrderId(order_id))
    }

    async fn update_order(&self, _account_id: &str, order_id: ChainOrderId, update: OrderUpdate) -> Result<(), CoreError> {
        let mut orders = self.open_orders.lock();
        let order = orders
            .get_mut(&order_id)
            .ok_or(CoreError::UnknownChainOrderId(order_id))?;
        if let Some(size) = update.size {
            order.for_sale = size;
        }
        if let Some(price) = update.price {
            order.min_to_receive = order.for_sale * price;
        }
        Ok(())
    }

    async fn read_open_orders(&self, _account_id: &str, _market: &str) -> Result<Vec<ChainOpenOrder>, CoreError> {
        Ok(self.open_orders.lock().values().cloned().collect())
    }

    async fn get_account_balances(&self, _account_id: &str, assets: &[AssetId]) -> Result<HashMap<AssetId, AssetBalance>, CoreError> {
        let balances = self.balances.lock();
        Ok(assets
            .iter()
            .filter_map(|a| balances.get(a).map(|b| (a.clone(), *b)))
            .collect())
    }

    async fn subscribe_fills(&self, _account_id: &str) -> Result<mpsc::Receiver<ChainFillEvent>, CoreError> {
        let (tx, rx) = mpsc::channel(256);
        *self.fills_tx.lock() = Some(tx);
        Ok(rx)
    }

    async fn get_asset_metadata(&self, _symbol: &str) -> Result<AssetMetadata, CoreError> {
        Ok(self.default_metadata)
    }

    async fn wait_connected(&self, _timeout: Duration) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Cheaply clonable handle, for callers that want `Arc<dyn ChainAdapter>`
/// ergonomics without every call site spelling it out.
pub type SharedChainAdapter = Arc<dyn ChainAdapter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_adapter_tracks_placed_orders() {
        let adapter = SimulatedChainAdapter::new(HashMap::new());
        let placed = adapter
            .place_order(
                "acct",
                "market",
                OrderRequest {
                    side: Side::Buy,
                    price: Decimal::new(100, 0),
                    size: Decimal::new(10, 0),
                    price_precision: 8,
                    size_precision: 8,
                },
            )
            .await
            .unwrap();

        let open = adapter.read_open_orders("acct", "market").await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].order_id, placed.order_id);

        adapter.cancel_order("acct", placed.order_id).await.unwrap();
        assert!(adapter.read_open_orders("acct", "market").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_unknown_order_errors() {
        let adapter = SimulatedChainAdapter::new(HashMap::new());
        let result = adapter.cancel_order("acct", ChainOrderId(999)).await;
        assert!(matches!(result, Err(CoreError::UnknownChainOrderId(_))));
    }

    #[test]
    fn asset_metadata_cache_is_populated_on_first_insert() {
        reset_asset_metadata_cache();
        metadata_cache().insert(
            "TEST".to_string(),
            AssetMetadata { precision: 6, market_fee_percent: Decimal::ZERO },
        );
        assert!(metadata_cache().contains_key("TEST"));
        reset_asset_metadata_cache();
        assert!(!metadata_cache().contains_key("TEST"));
    }
}
