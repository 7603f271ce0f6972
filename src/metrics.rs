//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `verify_access_reconciliations_total` - Total number of convergence passes
//! - `verify_access_reconciliation_errors_total` - Total number of failed passes
//! - `verify_access_reconciliation_duration_seconds` - Duration of a pass
//! - `verify_access_deployments_created_total` - Deployments created
//! - `verify_access_deployments_updated_total` - Deployments updated for drift
//! - `verify_access_secret_writes_total` - Credential secret creates/updates

use anyhow::Result;
use prometheus::{Histogram, IntCounter, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "verify_access_reconciliations_total",
        "Total number of convergence passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "verify_access_reconciliation_errors_total",
        "Total number of failed convergence passes",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "verify_access_reconciliation_duration_seconds",
            "Duration of a convergence pass in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static DEPLOYMENTS_CREATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "verify_access_deployments_created_total",
        "Total number of deployments created",
    )
    .expect("Failed to create DEPLOYMENTS_CREATED_TOTAL metric - this should never happen")
});

static DEPLOYMENTS_UPDATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "verify_access_deployments_updated_total",
        "Total number of deployments updated to correct drift",
    )
    .expect("Failed to create DEPLOYMENTS_UPDATED_TOTAL metric - this should never happen")
});

static SECRET_WRITES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "verify_access_secret_writes_total",
        "Total number of credential secret creates and updates",
    )
    .expect("Failed to create SECRET_WRITES_TOTAL metric - this should never happen")
});

/// Register all metrics into the crate registry. Idempotent registration is
/// not needed; this is called once from the binary.
pub fn register() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(DEPLOYMENTS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEPLOYMENTS_UPDATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRET_WRITES_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(seconds: f64) {
    RECONCILIATION_DURATION.observe(seconds);
}

pub fn increment_deployments_created() {
    DEPLOYMENTS_CREATED_TOTAL.inc();
}

pub fn increment_deployments_updated() {
    DEPLOYMENTS_UPDATED_TOTAL.inc();
}

pub fn increment_secret_writes() {
    SECRET_WRITES_TOTAL.inc();
}
