//! Configuration types (spec §6 "Configuration (recognized options)").

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// `startPrice` accepts a literal number or one of two sentinel modes
/// resolved at startup by whoever owns the chain/pool connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPrice {
    Fixed(Decimal),
    Pool,
    Market,
}

/// `botFunds` accepts an absolute amount or a `"N%"` share of available
/// balance, resolved against the live chain balance at grid generation
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FundSpec {
    Absolute(Decimal),
    Percent(Decimal),
}

impl FundSpec {
    /// Parse the `"N%"` string form; anything else is left to serde's
    /// untagged numeric match.
    pub fn parse_percent(s: &str) -> Option<FundSpec> {
        let trimmed = s.strip_suffix('%')?;
        trimmed.trim().parse::<Decimal>().ok().map(FundSpec::Percent)
    }

    pub fn resolve(&self, available: Decimal) -> Decimal {
        match self {
            FundSpec::Absolute(v) => *v,
            FundSpec::Percent(pct) => available * *pct / Decimal::ONE_HUNDRED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SidePair<T> {
    pub buy: T,
    pub sell: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridBotConfig {
    pub asset_a: String,
    pub asset_b: String,
    pub start_price: StartPrice,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub increment_percent: Decimal,
    pub target_spread_percent: Decimal,
    pub weight_distribution: SidePair<f64>,
    pub bot_funds: SidePair<FundSpec>,
    pub active_orders: SidePair<u32>,
    pub preferred_account: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub tuning: TuningConfig,
}

fn default_true() -> bool {
    true
}

/// Spec §6 tuning constants, with the spec's own defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub grid_regeneration_percentage: Decimal,
    pub rms_percentage: Decimal,
    pub partial_dust_threshold_percentage: Decimal,
    pub blockchain_fetch_interval_min: u64,
    pub sync_delay_ms: u64,
    pub lock_timeout_ms: u64,
    pub account_totals_timeout_ms: u64,
    pub run_loop_ms: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        TuningConfig {
            grid_regeneration_percentage: Decimal::new(3, 0),
            rms_percentage: Decimal::new(143, 1),
            partial_dust_threshold_percentage: Decimal::new(5, 0),
            blockchain_fetch_interval_min: 240,
            sync_delay_ms: 500,
            lock_timeout_ms: 10_000,
            account_totals_timeout_ms: 10_000,
            run_loop_ms: 5_000,
        }
    }
}
