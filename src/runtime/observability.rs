//! Structured logging setup and worker counters.
//!
//! Core logic only emits `tracing` events. Installing a subscriber is up to
//! the process, once, at startup through [`init_logging`].

use crate::runtime::task::TaskVerdict;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log format options for structured logging
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Structured JSON output for log aggregators
    Json,
    /// Human-readable format for development (with all fields)
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

/// Logging configuration.
///
/// ```rust,no_run
/// # use duroflow::runtime::observability::{init_logging, LogFormat, ObservabilityConfig};
/// let config = ObservabilityConfig {
///     log_format: LogFormat::Json,
///     log_level: "debug".to_string(),
///     ..Default::default()
/// };
/// init_logging(&config).unwrap();
/// ```
///
/// `RUST_LOG`, when set, replaces the filter computed from `log_level`.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Level for the `duroflow` targets (e.g. "info", "debug")
    pub log_level: String,
    /// Recorded on the startup log line
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_level: "info".to_string(),
            service_name: "duroflow".to_string(),
        }
    }
}

fn default_filter_expression(level: &str) -> String {
    format!("warn,duroflow={level}")
}

/// Install the process-wide subscriber.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), String> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter_expression(&config.log_level)));

    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .map_err(|e| format!("Failed to initialize JSON logging: {}", e))?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()
                .map_err(|e| format!("Failed to initialize pretty logging: {}", e))?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .try_init()
                .map_err(|e| format!("Failed to initialize compact logging: {}", e))?;
        }
    }

    tracing::info!(target: "duroflow::runtime", service_name = %config.service_name, "logging initialized");
    Ok(())
}

/// Snapshot of worker counters for tests and diagnostics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub decisions_completed: u64,
    pub decisions_suspended: u64,
    pub decisions_failed: u64,
    pub workflow_restarts: u64,
    pub activities_completed: u64,
    pub activities_failed: u64,
    pub activities_suspended: u64,
    pub unregistered_tasks: u64,
    pub report_errors: u64,
    pub pagination_restarts: u64,
    pub contract_violations: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Metrics {
    decisions_completed: AtomicU64,
    decisions_suspended: AtomicU64,
    decisions_failed: AtomicU64,
    workflow_restarts: AtomicU64,
    activities_completed: AtomicU64,
    activities_failed: AtomicU64,
    activities_suspended: AtomicU64,
    unregistered_tasks: AtomicU64,
    report_errors: AtomicU64,
    pagination_restarts: AtomicU64,
    contract_violations: AtomicU64,
}

impl Metrics {
    pub(crate) fn record_decision(&self, verdict: &TaskVerdict) {
        let counter = match verdict {
            TaskVerdict::Complete(_) => &self.decisions_completed,
            TaskVerdict::Suspend => &self.decisions_suspended,
            TaskVerdict::Fail(_) => &self.decisions_failed,
            TaskVerdict::Restart(_) => &self.workflow_restarts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_activity(&self, verdict: &TaskVerdict) {
        let counter = match verdict {
            TaskVerdict::Complete(_) => &self.activities_completed,
            TaskVerdict::Suspend => &self.activities_suspended,
            TaskVerdict::Fail(_) | TaskVerdict::Restart(_) => &self.activities_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unregistered(&self) {
        self.unregistered_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_report_error(&self) {
        self.report_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pagination_restart(&self) {
        self.pagination_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_contract_violation(&self) {
        self.contract_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            decisions_completed: self.decisions_completed.load(Ordering::Relaxed),
            decisions_suspended: self.decisions_suspended.load(Ordering::Relaxed),
            decisions_failed: self.decisions_failed.load(Ordering::Relaxed),
            workflow_restarts: self.workflow_restarts.load(Ordering::Relaxed),
            activities_completed: self.activities_completed.load(Ordering::Relaxed),
            activities_failed: self.activities_failed.load(Ordering::Relaxed),
            activities_suspended: self.activities_suspended.load(Ordering::Relaxed),
            unregistered_tasks: self.unregistered_tasks.load(Ordering::Relaxed),
            report_errors: self.report_errors.load(Ordering::Relaxed),
            pagination_restarts: self.pagination_restarts.load(Ordering::Relaxed),
            contract_violations: self.contract_violations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_targets_the_crate() {
        assert_eq!(default_filter_expression("debug"), "warn,duroflow=debug");
    }

    #[test]
    fn verdicts_land_in_their_counters() {
        let metrics = Metrics::default();
        metrics.record_decision(&TaskVerdict::Suspend);
        metrics.record_decision(&TaskVerdict::Restart("[[],{}]".to_string()));
        metrics.record_activity(&TaskVerdict::Fail("x".to_string()));
        let snap = metrics.snapshot();
        assert_eq!(snap.decisions_suspended, 1);
        assert_eq!(snap.workflow_restarts, 1);
        assert_eq!(snap.activities_failed, 1);
        assert_eq!(snap.decisions_completed, 0);
    }
}
