//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_rate_limited_total` (counter): one increment per denied request
//! - `http_rate_limiter_degraded_total` (counter): fail-open decisions, by `reason`
//! - `http_rate_limit_bypassed_total` (counter): requests from trusted ranges
//! - `trusted_ranges` (gauge): number of loaded trusted CIDR blocks
//!
//! The denial counter carries no labels; request paths are left out because
//! scanners generate unbounded numbers of them.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

pub const RATE_LIMITED: &str = "http_rate_limited_total";
pub const LIMITER_DEGRADED: &str = "http_rate_limiter_degraded_total";
pub const TRUSTED_BYPASS: &str = "http_rate_limit_bypassed_total";
pub const TRUSTED_RANGES: &str = "trusted_ranges";

/// Why the limiter allowed a request without a counter result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedReason {
    /// The store returned an error.
    Unavailable,
    /// The store did not answer within the configured timeout.
    Timeout,
}

impl DegradedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
        }
    }
}

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_counter!(RATE_LIMITED, "Requests denied by the rate limiter");
            describe_counter!(
                LIMITER_DEGRADED,
                "Requests allowed because the counter store failed"
            );
            describe_counter!(TRUSTED_BYPASS, "Requests that skipped rate limiting");
            describe_gauge!(TRUSTED_RANGES, "Trusted CIDR blocks currently loaded");
            tracing::info!(address = %addr, "Metrics endpoint listening");
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
        }
    }
}

pub fn record_rate_limited() {
    counter!(RATE_LIMITED).increment(1);
}

pub fn record_limiter_degraded(reason: DegradedReason) {
    counter!(LIMITER_DEGRADED, "reason" => reason.as_str()).increment(1);
}

pub fn record_trusted_bypass() {
    counter!(TRUSTED_BYPASS).increment(1);
}

#[allow(clippy::cast_precision_loss)]
pub fn record_trusted_ranges(count: usize) {
    gauge!(TRUSTED_RANGES).set(count as f64);
}

/// Where the admission gate reports its decisions.
pub trait MetricsSink: Send + Sync {
    fn rate_limited(&self);
    fn limiter_degraded(&self, reason: DegradedReason);
    fn trusted_bypass(&self);
}

/// Sink that forwards to the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderSink;

impl MetricsSink for RecorderSink {
    fn rate_limited(&self) {
        record_rate_limited();
    }

    fn limiter_degraded(&self, reason: DegradedReason) {
        record_limiter_degraded(reason);
    }

    fn trusted_bypass(&self) {
        record_trusted_bypass();
    }
}
