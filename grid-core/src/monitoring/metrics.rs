//! Prometheus metrics for the grid engine.
//!
//! Exposes exactly the counters spec.md §7 names
//! (`invariantViolations`, `fundRecalcCount`, `lockContentionSkips`,
//! `stateTransitions{from→to}`) plus grid-level gauges the strategy and
//! sync engines update each cycle.

use prometheus::{Gauge, GaugeVec, IntCounter, IntCounterVec, Opts, Registry};
use tracing::info;

use crate::core::{Side, SlotState};

/// All metrics for one bot instance's grid engine.
pub struct GridMetrics {
    registry: Registry,
    pub invariant_violations: IntCounter,
    pub fund_recalc_count: IntCounter,
    pub lock_contention_skips: IntCounter,
    pub state_transitions: IntCounterVec,
    pub active_orders: GaugeVec,
    pub cache_funds: GaugeVec,
    pub rms_divergence: GaugeVec,
}

impl GridMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let invariant_violations = IntCounter::with_opts(
            Opts::new(
                "grid_invariant_violations_total",
                "Invariant I1-I7 violations detected by assertIndexConsistency",
            )
            .namespace("grid"),
        )?;
        registry.register(Box::new(invariant_violations.clone()))?;

        let fund_recalc_count = IntCounter::with_opts(
            Opts::new("grid_fund_recalc_total", "Number of recalculateFunds invocations")
                .namespace("grid"),
        )?;
        registry.register(Box::new(fund_recalc_count.clone()))?;

        let lock_contention_skips = IntCounter::with_opts(
            Opts::new(
                "grid_lock_contention_skips_total",
                "Operations skipped because a slot was shadow-locked",
            )
            .namespace("grid"),
        )?;
        registry.register(Box::new(lock_contention_skips.clone()))?;

        let state_transitions = IntCounterVec::new(
            Opts::new("grid_state_transitions_total", "Slot state transitions by from/to")
                .namespace("grid"),
            &["from", "to"],
        )?;
        registry.register(Box::new(state_transitions.clone()))?;

        let active_orders = GaugeVec::new(
            Opts::new("grid_active_orders", "Active (non-virtual) slots by side").namespace("grid"),
            &["side"],
        )?;
        registry.register(Box::new(active_orders.clone()))?;

        let cache_funds = GaugeVec::new(
            Opts::new("grid_cache_funds", "Off-grid proceeds awaiting redistribution").namespace("grid"),
            &["side"],
        )?;
        registry.register(Box::new(cache_funds.clone()))?;

        let rms_divergence = GaugeVec::new(
            Opts::new("grid_rms_divergence", "RMS divergence between calculated and persisted sizes")
                .namespace("grid"),
            &["side"],
        )?;
        registry.register(Box::new(rms_divergence.clone()))?;

        info!("grid metrics registry initialized");

        Ok(Self {
            registry,
            invariant_violations,
            fund_recalc_count,
            lock_contention_skips,
            state_transitions,
            active_orders,
            cache_funds,
            rms_divergence,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_transition(&self, from: SlotState, to: SlotState) {
        self.state_transitions
            .with_label_values(&[state_label(from), state_label(to)])
            .inc();
    }

    pub fn set_active_orders(&self, side: Side, count: usize) {
        self.active_orders
            .with_label_values(&[side_label(side)])
            .set(count as f64);
    }

    pub fn set_cache_funds(&self, side: Side, amount: f64) {
        self.cache_funds.with_label_values(&[side_label(side)]).set(amount);
    }

    pub fn set_rms_divergence(&self, side: Side, value: f64) {
        self.rms_divergence
            .with_label_values(&[side_label(side)])
            .set(value);
    }
}

impl Default for GridMetrics {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            tracing::error!("failed to create grid metrics registry: {}", e);
            panic!("cannot create grid metrics registry")
        })
    }
}

fn state_label(s: SlotState) -> &'static str {
    match s {
        SlotState::Virtual => "virtual",
        SlotState::Active => "active",
        SlotState::Partial => "partial",
    }
}

fn side_label(s: Side) -> &'static str {
    match s {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

/// A single Prometheus `Gauge`, handed out when a metric doesn't need a
/// side/state label (kept for callers that track one process-wide value).
pub type PlainGauge = Gauge;
