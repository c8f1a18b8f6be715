//! Prometheus metrics for the grid engine.

pub mod metrics;

pub use metrics::GridMetrics;
