//! Common utilities shared by the demo binaries: CLI parsing, logging
//! setup, and a small end-of-run summary.

use anyhow::Result;
use clap::Parser;
use grid_core::persistence::CacheFunds;
use grid_core::{GridSlot, SlotState};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Common CLI arguments for the demo binaries.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// Path to a GridBotConfig TOML file. Falls back to a small
    /// built-in BTC/USDT config when omitted.
    #[arg(short, long)]
    pub config: Option<String>,

    /// How many cycles to run before exiting, ignoring Ctrl-C.
    #[arg(long, default_value = "5")]
    pub cycles: u64,

    /// Log level.
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

/// Initialize tracing/logging the same way every binary in this
/// workspace does: env filter first, explicit `--log-level` as the
/// fallback.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    Ok(())
}

/// Print a one-shot summary of the persisted grid snapshot, for the
/// demo binaries to call once the cycle loop exits. Takes the final
/// slots and cache funds rather than the live state machine/accountant
/// since those are owned by the engine's lock for its whole lifetime.
pub fn print_summary(slots: &[GridSlot], cache_funds: CacheFunds) {
    let active = slots.iter().filter(|s| s.state == SlotState::Active).count();
    let partial = slots.iter().filter(|s| s.state == SlotState::Partial).count();
    let virtual_count = slots.iter().filter(|s| s.state == SlotState::Virtual).count();

    tracing::info!("=== Final Grid State ===");
    tracing::info!(active, partial, virtual_count, "slot counts");
    tracing::info!(cache_buy = %cache_funds.buy, cache_sell = %cache_funds.sell, "cache funds");
}
