//! Grid demo: generates a starting grid, wires the state machine,
//! accountant, and [`grid_strategies::StrategyEngine`] into
//! [`grid_core::engine::GridEngine`] against a [`SimulatedChainAdapter`]
//! and [`InMemoryPersistence`], and runs it for a fixed number of
//! cycles.
//!
//! Real deployments swap in a chain adapter backed by an actual RPC
//! client and a persistence adapter backed by a real store; both are
//! trait objects behind `Arc<dyn _>`; nothing else in this wiring
//! changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use grid_bins::common::{init_logging, print_summary, CommonArgs};
use grid_core::accountant::Accountant;
use grid_core::chain::{cached_asset_metadata, AssetBalance, SimulatedChainAdapter};
use grid_core::config::{FundSpec, GridBotConfig, SidePair, StartPrice, TuningConfig};
use grid_core::engine::{BotState, EngineContext, GridEngine};
use grid_core::grid::{generate_grid, GridSpec, MinSizes, Precisions, SideFunds, WeightDistribution};
use grid_core::monitoring::GridMetrics;
use grid_core::persistence::{InMemoryPersistence, PersistenceAdapter};
use grid_core::state_machine::StateMachine;
use grid_strategies::rotation::RotationSizingParams;
use grid_strategies::{ActiveOrdersTarget, StrategyConfig, StrategyEngine};
use rust_decimal_macros::dec;

fn demo_config() -> GridBotConfig {
    GridBotConfig {
        asset_a: "BTC".to_string(),
        asset_b: "USDT".to_string(),
        start_price: StartPrice::Fixed(dec!(50000)),
        min_price: dec!(45000),
        max_price: dec!(55000),
        increment_percent: dec!(1),
        target_spread_percent: dec!(2),
        weight_distribution: SidePair { buy: 1.0, sell: 1.0 },
        bot_funds: SidePair {
            buy: FundSpec::Absolute(dec!(10000)),
            sell: FundSpec::Absolute(dec!(2)),
        },
        active_orders: SidePair { buy: 5, sell: 5 },
        preferred_account: "demo-account".to_string(),
        dry_run: true,
        active: true,
        tuning: TuningConfig { run_loop_ms: 200, ..TuningConfig::default() },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CommonArgs::parse();
    init_logging(&args.log_level)?;

    let config = match &args.config {
        Some(path) => GridBotConfig::load(path)?,
        None => {
            tracing::info!("no --config given, using the built-in BTC/USDT demo config");
            demo_config()
        }
    };

    let market_price = match config.start_price {
        StartPrice::Fixed(p) => p,
        StartPrice::Market | StartPrice::Pool => {
            anyhow::bail!("this demo only resolves a fixed startPrice; pass a literal price in the config")
        }
    };

    // A real deployment resolves a `Percent` FundSpec against a live
    // balance fetched via `ChainAdapter::get_account_balances`; this demo
    // has no account to query yet (the chain adapter is built below,
    // seeded from these very funds), so a flat notional stands in.
    let notional_balance = dec!(1_000_000);
    let buy_funds = config.bot_funds.buy.resolve(notional_balance);
    let sell_funds = config.bot_funds.sell.resolve(notional_balance);

    let spec = GridSpec {
        market_price,
        min_price: config.min_price,
        max_price: config.max_price,
        increment_percent: config.increment_percent,
        target_spread_percent: config.target_spread_percent,
        weight_distribution: WeightDistribution {
            buy: config.weight_distribution.buy,
            sell: config.weight_distribution.sell,
        },
        funds: SideFunds { buy: buy_funds, sell: sell_funds },
        precisions: Precisions { price: 8, base: 8, quote: 8 },
        min_sizes: MinSizes { buy: dec!(0.0001), sell: dec!(0.0001) },
    };
    let slots = generate_grid(&spec)?;
    tracing::info!(slot_count = slots.len(), market_price = %market_price, "grid generated");

    let mut state_machine = StateMachine::new();
    state_machine.load_initial_grid(slots);

    let mut accountant = Accountant::new(None);
    accountant.funds.allocated.buy = buy_funds;
    accountant.funds.allocated.sell = sell_funds;
    accountant.funds.available.buy = buy_funds;
    accountant.funds.available.sell = sell_funds;

    let mut balances = HashMap::new();
    balances.insert("base".to_string(), AssetBalance { free: sell_funds, total: sell_funds });
    balances.insert("quote".to_string(), AssetBalance { free: buy_funds, total: buy_funds });

    let chain = Arc::new(SimulatedChainAdapter::new(balances));
    let market = format!("{}-{}", config.asset_a, config.asset_b);
    let market_fee_percent = cached_asset_metadata(chain.as_ref(), &market).await?.market_fee_percent;

    let strategy_config = StrategyConfig {
        target_active_orders: ActiveOrdersTarget {
            buy: config.active_orders.buy,
            sell: config.active_orders.sell,
        },
        partial_dust_threshold_percent: config.tuning.partial_dust_threshold_percentage,
        grid_regeneration_percent: config.tuning.grid_regeneration_percentage,
        rms_percent: config.tuning.rms_percentage,
        spread_margin_percent: dec!(1),
        market_fee_percent,
    };
    let rotation_sizing = RotationSizingParams {
        weight_exp: config.weight_distribution.buy,
        increment_percent: config.increment_percent,
        min_size: spec.min_sizes.buy,
        base_precision: spec.precisions.base,
    };
    let strategy = StrategyEngine::new(strategy_config, rotation_sizing, config.target_spread_percent);
    let persistence = Arc::new(InMemoryPersistence::new());
    let metrics = Arc::new(GridMetrics::new()?);

    let bot_key = format!("{}-{}-{}", config.asset_a, config.asset_b, config.preferred_account);
    let ctx = EngineContext {
        bot_key: bot_key.clone(),
        account_id: config.preferred_account.clone(),
        market: market.clone(),
        config: config.clone(),
        chain,
        persistence: persistence.clone(),
        metrics,
    };
    let state = BotState {
        state_machine,
        accountant,
        strategy: Box::new(strategy),
        dedup: Default::default(),
    };

    let engine = GridEngine::new(ctx, state);
    engine.install_ctrlc_handler()?;

    let shutdown = engine.shutdown_flag();
    let run_for = Duration::from_millis(config.tuning.run_loop_ms * args.cycles);
    tokio::spawn(async move {
        tokio::time::sleep(run_for).await;
        shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    });

    tracing::info!(cycles = args.cycles, bot_key = %bot_key, "starting engine");
    engine.run().await?;

    let snapshot = persistence.load_grid_snapshot(&bot_key).await?;
    let cache_funds = persistence.load_cache_funds(&bot_key).await?;
    if let Some(snapshot) = snapshot {
        print_summary(&snapshot.slots, cache_funds);
    }

    Ok(())
}
