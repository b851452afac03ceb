//! Prometheus metrics for monitoring
//!
//! In-process counters, gauges, and histograms with text export. There is
//! no HTTP listener here; embedders expose `gather()` however they like.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: String,
    help: String,
}

impl Counter {
    /// Create a new counter
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by delta
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: String,
    help: String,
}

impl Gauge {
    /// Create a new gauge
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Set value
    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by 1
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Histogram for latency measurements
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    sum: AtomicU64,
    count: AtomicU64,
    name: String,
    help: String,
}

impl Histogram {
    /// Create with default buckets
    pub fn new(name: &str, help: &str) -> Self {
        Self::with_buckets(
            name,
            help,
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
    }

    /// Create with custom buckets
    pub fn with_buckets(name: &str, help: &str, bounds: Vec<f64>) -> Self {
        let buckets = bounds.into_iter().map(|b| (b, AtomicU64::new(0))).collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Observe a value in seconds
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);

        // sum kept as micros for atomic precision
        let micros = (value * 1_000_000.0) as u64;
        self.sum.fetch_add(micros, Ordering::Relaxed);

        for (bound, count) in &self.buckets {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        let mut output = format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.name, self.help, self.name
        );

        for (bound, count) in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name,
                bound,
                count.load(Ordering::Relaxed)
            ));
        }

        let sum_secs = self.sum.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!("{}_sum {}\n", self.name, sum_secs));
        output.push_str(&format!(
            "{}_count {}\n",
            self.name,
            self.count.load(Ordering::Relaxed)
        ));

        output
    }
}

/// Metrics registry
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, Arc<Counter>>>,
    gauges: RwLock<HashMap<String, Arc<Gauge>>>,
    histograms: RwLock<HashMap<String, Arc<Histogram>>>,
}

impl MetricsRegistry {
    /// Create a new registry
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or fetch) a counter by name
    pub fn counter(&self, name: &str, help: &str) -> Arc<Counter> {
        let mut counters = self.counters.write();
        counters
            .entry(name.into())
            .or_insert_with(|| Arc::new(Counter::new(name, help)))
            .clone()
    }

    /// Register (or fetch) a gauge by name
    pub fn gauge(&self, name: &str, help: &str) -> Arc<Gauge> {
        let mut gauges = self.gauges.write();
        gauges
            .entry(name.into())
            .or_insert_with(|| Arc::new(Gauge::new(name, help)))
            .clone()
    }

    /// Register (or fetch) a histogram by name
    pub fn histogram(&self, name: &str, help: &str) -> Arc<Histogram> {
        let mut histograms = self.histograms.write();
        histograms
            .entry(name.into())
            .or_insert_with(|| Arc::new(Histogram::new(name, help)))
            .clone()
    }

    /// Export all metrics in Prometheus format
    pub fn export(&self) -> String {
        let mut output = String::new();

        for counter in self.counters.read().values() {
            output.push_str(&counter.to_prometheus());
        }

        for gauge in self.gauges.read().values() {
            output.push_str(&gauge.to_prometheus());
        }

        for histogram in self.histograms.read().values() {
            output.push_str(&histogram.to_prometheus());
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide registry backing the standard metrics
pub fn global() -> &'static MetricsRegistry {
    use std::sync::LazyLock;
    static GLOBAL: LazyLock<MetricsRegistry> = LazyLock::new(MetricsRegistry::new);
    &GLOBAL
}

/// Standard Cohort metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static ACTIVE_PEERS: LazyLock<Arc<Gauge>> = LazyLock::new(|| {
        global().gauge("cohort_active_peers", "Number of live peer entries in the registry")
    });

    pub static PEERS_REMOVED: LazyLock<Arc<Counter>> = LazyLock::new(|| {
        global().counter(
            "cohort_peers_removed_total",
            "Peers removed after failed health checks",
        )
    });

    pub static LEADER_REASSIGNMENTS: LazyLock<Arc<Counter>> = LazyLock::new(|| {
        global().counter(
            "cohort_leader_reassignments_total",
            "Leader reassignment attempts triggered by failed pings",
        )
    });

    pub static LEADER_REMOVALS: LazyLock<Arc<Counter>> = LazyLock::new(|| {
        global().counter(
            "cohort_leader_removals_total",
            "Leader entries removed after failed reassignment",
        )
    });

    pub static REBALANCE_PUSHES: LazyLock<Arc<Counter>> = LazyLock::new(|| {
        global().counter(
            "cohort_rebalance_pushes_total",
            "Ordinal assignments pushed to followers",
        )
    });

    pub static REBALANCE_PUSH_FAILURES: LazyLock<Arc<Counter>> = LazyLock::new(|| {
        global().counter(
            "cohort_rebalance_push_failures_total",
            "Ordinal pushes that failed and were left for the next tick",
        )
    });

    pub static INFO_CHANGES: LazyLock<Arc<Counter>> = LazyLock::new(|| {
        global().counter(
            "cohort_info_changes_total",
            "Changes to this node's own member number or total",
        )
    });

    pub static MODELS_PUBLISHED: LazyLock<Arc<Counter>> = LazyLock::new(|| {
        global().counter(
            "cohort_membership_models_published_total",
            "Membership models published on the change bus",
        )
    });

    pub static HEALTH_CHECK_DURATION: LazyLock<Arc<Histogram>> = LazyLock::new(|| {
        global().histogram(
            "cohort_health_check_tick_seconds",
            "Health-check tick latency",
        )
    });

    pub static REBALANCE_DURATION: LazyLock<Arc<Histogram>> = LazyLock::new(|| {
        global().histogram("cohort_rebalance_tick_seconds", "Rebalance tick latency")
    });
}

/// Gather all registered metrics as Prometheus text
pub fn gather() -> String {
    global().export()
}
