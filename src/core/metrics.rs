//! Metrics collection for daxfs-core
//!
//! Prometheus-backed counters and histograms for branch lifecycle events,
//! delta-log appends, and resolver behaviour. Collection is opt-in via
//! `MetricsConfig::enabled`; when disabled the registry is still created
//! (registration is cheap) but nothing calls `collect_metrics`.

use crate::core::error::Result;
use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Build an `IntCounter` and register it against [`REGISTRY`] (not
/// prometheus's default registry, which `collect_metrics` never gathers
/// from).
fn counter(name: &str, help: &str) -> Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    REGISTRY.register(Box::new(c.clone()))?;
    Ok(c)
}

/// Build a `Histogram` with explicit buckets and register it against
/// [`REGISTRY`].
fn histogram(name: &str, help: &str, buckets: Vec<f64>) -> Result<Histogram> {
    let h = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))?;
    REGISTRY.register(Box::new(h.clone()))?;
    Ok(h)
}

/// Branch lifecycle counters
pub struct BranchMetrics {
    /// Branches forked
    pub forked: IntCounter,
    /// Branches committed into their parent
    pub committed: IntCounter,
    /// Branches aborted
    pub aborted: IntCounter,
    /// Branches transitioned to STALE by a sibling commit
    pub invalidated: IntCounter,
}

/// Delta-log counters
pub struct DeltaMetrics {
    /// Records appended, by type (tracked as a single total; per-type
    /// breakdown is exposed through labels in a future iteration)
    pub appended: IntCounter,
    /// Allocator `NOSPC` events encountered during append
    pub nospc: IntCounter,
    /// Time spent per `build_index` rebuild
    pub rebuild_duration: Histogram,
}

/// Resolver counters
pub struct ResolverMetrics {
    /// Resolutions that had to walk past the leaf branch
    pub ancestor_walks: IntCounter,
    /// Resolutions that fell through to the base image
    pub base_fallbacks: IntCounter,
    /// Branch-chain depth walked per resolution
    pub walk_depth: Histogram,
}

/// Centralized metrics collection
pub struct Metrics {
    /// Branch lifecycle metrics
    pub branch: BranchMetrics,
    /// Delta log metrics
    pub delta: DeltaMetrics,
    /// Resolver metrics
    pub resolver: ResolverMetrics,
}

impl Metrics {
    fn new() -> Result<Self> {
        Ok(Self {
            branch: BranchMetrics {
                forked: counter("daxfs_branches_forked_total", "Total branches forked")?,
                committed: counter("daxfs_branches_committed_total", "Total branches committed")?,
                aborted: counter("daxfs_branches_aborted_total", "Total branches aborted")?,
                invalidated: counter("daxfs_branches_invalidated_total", "Total branches invalidated by a sibling commit")?,
            },
            delta: DeltaMetrics {
                appended: counter("daxfs_delta_records_appended_total", "Total delta-log records appended")?,
                nospc: counter("daxfs_delta_nospc_total", "Total NOSPC errors during append")?,
                rebuild_duration: histogram(
                    "daxfs_index_rebuild_seconds",
                    "Duration of build_index rebuilds",
                    vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]
                )?,
            },
            resolver: ResolverMetrics {
                ancestor_walks: counter("daxfs_resolver_ancestor_walks_total", "Resolutions requiring a walk past the leaf branch")?,
                base_fallbacks: counter("daxfs_resolver_base_fallbacks_total", "Resolutions that fell through to the base image")?,
                walk_depth: histogram(
                    "daxfs_resolver_walk_depth",
                    "Branch-chain depth walked per resolution",
                    vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0]
                )?,
            },
        })
    }

    /// Get the global metrics instance
    pub fn global() -> &'static Metrics {
        static INSTANCE: Lazy<Metrics> = Lazy::new(|| Metrics::new().expect("failed to initialize metrics"));
        &INSTANCE
    }
}

/// Get the Prometheus registry for serving metrics
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Initialize the metrics registry (registers all metrics eagerly)
pub fn init_registry() {
    let _ = Metrics::global();
}

/// Collect and return all metrics as Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry().gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
