/*!
Observability for the backup engine.

- Structured logging through `tracing`, installed by [`init_logging`]
- Prometheus counters for backups, restores and pruning (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, VaultError};

/// Filter applied when `RUST_LOG` is not set
pub const DEFAULT_LOG_DIRECTIVE: &str = "moodvault=info";

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<VaultMetrics>> = OnceLock::new();

#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct VaultMetrics {
    pub backup_attempts_total: Counter,
    pub backup_failures_total: Counter,
    pub restores_total: Counter,
    pub pruned_backups_total: Counter,
    pub snapshot_size_bytes: Histogram,
    registry: Registry,
}

#[cfg(feature = "metrics")]
fn counter(registry: &Registry, name: &str, help: &str) -> Result<Counter> {
    let counter = Counter::new(name, help)
        .map_err(|e| VaultError::storage(format!("Failed to create {name} metric: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| VaultError::storage(format!("Failed to register {name}: {e}")))?;
    Ok(counter)
}

#[cfg(feature = "metrics")]
impl VaultMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let backup_attempts_total = counter(
            &registry,
            "moodvault_backup_attempts_total",
            "Backups attempted, scheduled or manual",
        )?;
        let backup_failures_total = counter(
            &registry,
            "moodvault_backup_failures_total",
            "Backups that failed to upload",
        )?;
        let restores_total = counter(
            &registry,
            "moodvault_restores_total",
            "Restores run to completion",
        )?;
        let pruned_backups_total = counter(
            &registry,
            "moodvault_pruned_backups_total",
            "Backups deleted by retention",
        )?;

        let snapshot_size_bytes = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "moodvault_snapshot_size_bytes",
                "Encoded snapshot size in bytes",
            )
            .buckets(prometheus::exponential_buckets(1024.0, 4.0, 8).map_err(|e| {
                VaultError::storage(format!("Failed to build size buckets: {e}"))
            })?),
        )
        .map_err(|e| {
            VaultError::storage(format!("Failed to create snapshot_size_bytes metric: {e}"))
        })?;
        registry
            .register(Box::new(snapshot_size_bytes.clone()))
            .map_err(|e| {
                VaultError::storage(format!("Failed to register snapshot_size_bytes: {e}"))
            })?;

        Ok(Self {
            backup_attempts_total,
            backup_failures_total,
            restores_total,
            pruned_backups_total,
            snapshot_size_bytes,
            registry,
        })
    }

    /// Process-wide instance; `None` if the registry could not be built
    pub fn global() -> Option<&'static VaultMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::warn!(error = %e, "Metrics disabled");
                    None
                }
            })
            .as_ref()
    }

    pub fn record_backup(&self, success: bool) {
        self.backup_attempts_total.inc();
        if !success {
            self.backup_failures_total.inc();
        }
    }

    pub fn record_restore(&self) {
        self.restores_total.inc();
    }

    pub fn record_pruned(&self, count: usize) {
        self.pruned_backups_total.inc_by(count as f64);
    }

    pub fn record_snapshot_size(&self, size_bytes: usize) {
        self.snapshot_size_bytes.observe(size_bytes as f64);
    }

    /// Text exposition format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| VaultError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| VaultError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides [`DEFAULT_LOG_DIRECTIVE`]. Calling this twice returns
/// an error instead of panicking.
pub fn init_logging(json: bool) -> Result<()> {
    init_logging_with(DEFAULT_LOG_DIRECTIVE, json)
}

/// Same as [`init_logging`] with a caller-chosen fallback filter
pub fn init_logging_with(default_directive: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| VaultError::validation(format!("Invalid log filter: {e}")))?;

    let result = if json {
        let subscriber = TracingRegistry::default().with(filter).with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_current_span(false)
                .with_writer(std::io::stderr),
        );
        set_global_default(subscriber)
    } else {
        let subscriber = TracingRegistry::default().with(filter).with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        );
        set_global_default(subscriber)
    };
    result.map_err(|e| {
        VaultError::storage(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    #[cfg(feature = "metrics")]
    VaultMetrics::global();

    tracing::debug!("moodvault logging initialized");
    Ok(())
}
