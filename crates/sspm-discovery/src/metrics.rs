//! Aggregate gauges published after each reconciliation pass.
//!
//! The engine writes through the [`MetricsSink`] trait so tests can assert on
//! published values. [`PrometheusMetricsSink`] backs it with
//! `prometheus-client`; [`GaugePublisher`] zeroes label sets that disappear
//! between snapshots so removed sources do not keep reporting old counts.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Label set for one gauge sample, as (name, value) pairs.
pub type GaugeLabels = Vec<(String, String)>;

/// Gauges owned by the discovery engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryGauge {
    /// Apps per bound source and managed state.
    DiscoveredApps,
    /// High and critical apps per bound source and risk level.
    HighRiskApps,
    /// Connectors per health status.
    Connectors,
}

impl DiscoveryGauge {
    pub fn all() -> &'static [DiscoveryGauge] {
        &[
            DiscoveryGauge::DiscoveredApps,
            DiscoveryGauge::HighRiskApps,
            DiscoveryGauge::Connectors,
        ]
    }

    /// Metric name without the exposition suffix.
    pub fn name(&self) -> &'static str {
        match self {
            DiscoveryGauge::DiscoveredApps => "sspm_discovered_apps",
            DiscoveryGauge::HighRiskApps => "sspm_high_risk_apps",
            DiscoveryGauge::Connectors => "sspm_connectors",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            DiscoveryGauge::DiscoveredApps => "Discovered SaaS apps by bound source and managed state",
            DiscoveryGauge::HighRiskApps => "High and critical risk SaaS apps by bound source",
            DiscoveryGauge::Connectors => "Connectors by health status",
        }
    }
}

/// Destination for gauge values.
pub trait MetricsSink: Send + Sync {
    fn set_gauge(&self, gauge: DiscoveryGauge, labels: &[(String, String)], value: i64);
}

/// Build a label set from string pairs.
pub fn labels<const N: usize>(pairs: [(&str, &str); N]) -> GaugeLabels {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// `prometheus-client` backed sink.
pub struct PrometheusMetricsSink {
    registry: Mutex<Registry>,
    families: HashMap<DiscoveryGauge, Family<GaugeLabels, Gauge>>,
}

impl PrometheusMetricsSink {
    /// Create a sink with every discovery gauge registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let mut families = HashMap::new();

        for gauge in DiscoveryGauge::all() {
            let family = Family::<GaugeLabels, Gauge>::default();
            registry.register(gauge.name(), gauge.help(), family.clone());
            families.insert(*gauge, family);
        }

        Self {
            registry: Mutex::new(registry),
            families,
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let mut buffer = String::new();
        encode(&mut buffer, &registry)?;
        Ok(buffer)
    }
}

impl Default for PrometheusMetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn set_gauge(&self, gauge: DiscoveryGauge, labels: &[(String, String)], value: i64) {
        if let Some(family) = self.families.get(&gauge) {
            family.get_or_create(&labels.to_vec()).set(value);
        }
    }
}

/// Sink that keeps the latest value per label set. For tests.
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    values: RwLock<HashMap<(DiscoveryGauge, GaugeLabels), i64>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value for a label set, if ever written.
    pub fn get(&self, gauge: DiscoveryGauge, labels: &[(String, String)]) -> Option<i64> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(gauge, labels.to_vec()))
            .copied()
    }

    /// All label sets written for a gauge.
    pub fn snapshot(&self, gauge: DiscoveryGauge) -> HashMap<GaugeLabels, i64> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|((g, _), _)| *g == gauge)
            .map(|((_, labels), value)| (labels.clone(), *value))
            .collect()
    }

    /// Number of writes recorded so far, across all gauges.
    pub fn len(&self) -> usize {
        self.values.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn set_gauge(&self, gauge: DiscoveryGauge, labels: &[(String, String)], value: i64) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((gauge, labels.to_vec()), value);
    }
}

/// Publishes whole gauge snapshots, zeroing label sets that vanished.
pub struct GaugePublisher {
    sink: std::sync::Arc<dyn MetricsSink>,
    published: Mutex<HashMap<DiscoveryGauge, HashSet<GaugeLabels>>>,
}

impl GaugePublisher {
    pub fn new(sink: std::sync::Arc<dyn MetricsSink>) -> Self {
        Self {
            sink,
            published: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the gauge's values with `snapshot`.
    pub fn publish(&self, gauge: DiscoveryGauge, snapshot: &HashMap<GaugeLabels, i64>) {
        let mut published = self.published.lock().unwrap_or_else(|e| e.into_inner());
        let previous = published.entry(gauge).or_default();

        for stale in previous.iter().filter(|l| !snapshot.contains_key(*l)) {
            self.sink.set_gauge(gauge, stale, 0);
        }
        for (labels, value) in snapshot {
            self.sink.set_gauge(gauge, labels, *value);
        }

        previous.extend(snapshot.keys().cloned());
    }
}
