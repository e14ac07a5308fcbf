//! Page Sink Metrics
//!
//! Every sink owns a `SinkMetrics` backed by its own Prometheus registry, so several sinks (or
//! several write sessions) can coexist in one process without clashing metric names.
//!
//! ## Metrics
//!
//! | name | type | meaning |
//! |------|------|---------|
//! | `parallel_zip` | gauge | 1 once pages are being sealed in parallel |
//! | `pages_buffered` | counter | pages queued by a buffered sink |
//! | `pages_sealed` | counter | pages sealed (by tasks or by the sink itself) |
//! | `sealed_bytes` | counter | bytes produced by sealing |
//! | `pages_committed` | counter | pages durably written |
//! | `clusters_committed` | counter | clusters committed |
//! | `batch_commits` | counter | clusters committed with one batched sealed-page call |
//! | `per_page_commits` | counter | clusters committed page by page |
//!
//! ## Nesting
//!
//! A buffered sink observes the metrics of its inner sink; `gather()` returns the families of
//! the sink itself followed by those of every observed sink.

use prometheus::proto::MetricFamily;
use prometheus::{IntCounter, IntGauge, Opts, Registry};

use crate::error::{Error, Result};

#[derive(Clone)]
pub struct SinkMetrics {
    name: String,
    registry: Registry,
    observed: Vec<Registry>,

    pub parallel_zip: IntGauge,
    pub pages_buffered: IntCounter,
    pub pages_sealed: IntCounter,
    pub sealed_bytes: IntCounter,
    pub pages_committed: IntCounter,
    pub clusters_committed: IntCounter,
    pub batch_commits: IntCounter,
    pub per_page_commits: IntCounter,
}

impl SinkMetrics {
    /// Create the metrics of a sink; `name` becomes the metric name prefix
    pub fn new(name: &str) -> Result<Self> {
        let registry = Registry::new_custom(Some(name.to_string()), None)
            .map_err(|e| Error::Config(format!("invalid metrics prefix '{}': {}", name, e)))?;

        let parallel_zip = IntGauge::with_opts(Opts::new(
            "parallel_zip",
            "compressing pages in parallel",
        ))
        .map_err(metrics_error)?;
        let pages_buffered = counter("pages_buffered", "pages queued until cluster commit")?;
        let pages_sealed = counter("pages_sealed", "pages sealed")?;
        let sealed_bytes = counter("sealed_bytes", "bytes produced by sealing")?;
        let pages_committed = counter("pages_committed", "pages written")?;
        let clusters_committed = counter("clusters_committed", "clusters committed")?;
        let batch_commits = counter(
            "batch_commits",
            "clusters committed with a single sealed page batch",
        )?;
        let per_page_commits = counter("per_page_commits", "clusters committed page by page")?;

        registry
            .register(Box::new(parallel_zip.clone()))
            .map_err(metrics_error)?;
        for c in [
            &pages_buffered,
            &pages_sealed,
            &sealed_bytes,
            &pages_committed,
            &clusters_committed,
            &batch_commits,
            &per_page_commits,
        ] {
            registry.register(Box::new(c.clone())).map_err(metrics_error)?;
        }

        Ok(Self {
            name: name.to_string(),
            registry,
            observed: Vec::new(),
            parallel_zip,
            pages_buffered,
            pages_sealed,
            sealed_bytes,
            pages_committed,
            clusters_committed,
            batch_commits,
            per_page_commits,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Include `other` (and everything it observes) in this sink's `gather()`
    pub fn observe(&mut self, other: &SinkMetrics) {
        self.observed.push(other.registry.clone());
        self.observed.extend(other.observed.iter().cloned());
    }

    /// Metric families of this sink and every observed sink
    pub fn gather(&self) -> Vec<MetricFamily> {
        let mut families = self.registry.gather();
        for registry in &self.observed {
            families.extend(registry.gather());
        }
        families
    }

    /// Whether parallel sealing has been used
    pub fn is_parallel_zip(&self) -> bool {
        self.parallel_zip.get() == 1
    }
}

impl std::fmt::Debug for SinkMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkMetrics")
            .field("name", &self.name)
            .field("parallel_zip", &self.parallel_zip.get())
            .field("pages_buffered", &self.pages_buffered.get())
            .field("pages_sealed", &self.pages_sealed.get())
            .field("pages_committed", &self.pages_committed.get())
            .field("clusters_committed", &self.clusters_committed.get())
            .finish()
    }
}

fn counter(name: &str, help: &str) -> Result<IntCounter> {
    IntCounter::new(name, help).map_err(metrics_error)
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Config(format!("metrics: {}", e))
}
