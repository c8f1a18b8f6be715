//! Configuration loading and validation (spec §6).
//!
//! `GridBotConfig` is loaded from a TOML file on disk; tuning constants
//! fall back to the spec's own defaults (`TuningConfig::default`) when
//! omitted from the file.

pub mod types;

pub use types::*;

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;

impl GridBotConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: GridBotConfig =
            toml::from_str(&contents).with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_default() -> Result<Self> {
        Self::load("config/default.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.asset_a.is_empty() || self.asset_b.is_empty() {
            anyhow::bail!("assetA and assetB must both be set");
        }
        if self.asset_a == self.asset_b {
            anyhow::bail!("assetA and assetB must differ");
        }
        if self.min_price <= Decimal::ZERO || self.max_price <= Decimal::ZERO {
            anyhow::bail!("minPrice and maxPrice must be positive");
        }
        if self.min_price >= self.max_price {
            anyhow::bail!("minPrice must be less than maxPrice");
        }
        if self.increment_percent <= Decimal::ZERO {
            anyhow::bail!("incrementPercent must be positive");
        }
        if self.target_spread_percent <= Decimal::ZERO {
            anyhow::bail!("targetSpreadPercent must be positive");
        }
        for (label, w) in [
            ("buy", self.weight_distribution.buy),
            ("sell", self.weight_distribution.sell),
        ] {
            if !(-1.0..=2.0).contains(&w) {
                anyhow::bail!("weightDistribution.{label} must be within [-1, 2], got {w}");
            }
        }
        if self.active_orders.buy == 0 && self.active_orders.sell == 0 {
            anyhow::bail!("activeOrders must specify at least one non-zero side");
        }
        if self.preferred_account.is_empty() {
            anyhow::bail!("preferredAccount must be set");
        }
        if let StartPrice::Fixed(price) = &self.start_price {
            if *price <= Decimal::ZERO {
                anyhow::bail!("startPrice must be positive when given as a fixed number");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn valid_config() -> GridBotConfig {
        GridBotConfig {
            asset_a: "BTC".to_string(),
            asset_b: "USDT".to_string(),
            start_price: StartPrice::Market,
            min_price: dec!(50),
            max_price: dec!(200),
            increment_percent: dec!(1),
            target_spread_percent: dec!(2),
            weight_distribution: SidePair { buy: 1.0, sell: 1.0 },
            bot_funds: SidePair {
                buy: FundSpec::Absolute(dec!(1000)),
                sell: FundSpec::Absolute(dec!(10)),
            },
            active_orders: SidePair { buy: 5, sell: 5 },
            preferred_account: "acct-1".to_string(),
            dry_run: false,
            active: true,
            tuning: TuningConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_price_bounds() {
        let mut cfg = valid_config();
        cfg.min_price = dec!(300);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_weight_distribution_out_of_range() {
        let mut cfg = valid_config();
        cfg.weight_distribution.buy = 3.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_identical_assets() {
        let mut cfg = valid_config();
        cfg.asset_b = cfg.asset_a.clone();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_percent_fund_spec() {
        assert_eq!(FundSpec::parse_percent("50%"), Some(FundSpec::Percent(dec!(50))));
        assert_eq!(FundSpec::parse_percent("not-a-percent"), None);
    }

    #[test]
    fn fund_spec_resolves_against_available_balance() {
        let pct = FundSpec::Percent(dec!(25));
        assert_eq!(pct.resolve(dec!(400)), dec!(100));
        let abs = FundSpec::Absolute(dec!(10));
        assert_eq!(abs.resolve(dec!(400)), dec!(10));
    }

    #[test]
    fn tuning_defaults_match_spec() {
        let tuning = TuningConfig::default();
        assert_eq!(tuning.grid_regeneration_percentage, dec!(3));
        assert_eq!(tuning.rms_percentage, dec!(14.3));
        assert_eq!(tuning.lock_timeout_ms, 10_000);
        assert_eq!(tuning.run_loop_ms, 5_000);
    }
}
