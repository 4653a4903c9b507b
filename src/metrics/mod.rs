// Metrics module - defines the collector contract and the metric data model
//
// A collector advertises a fixed schema of metric descriptors once, at
// registration, and on every scrape produces samples for a subset of that
// schema. Nothing here depends on a particular monitoring backend; the
// exposition module turns samples into the Prometheus text format.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::cache::ThrottledCache;

pub mod nodes;

/// Kind of value a metric carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Point-in-time value that can go up and down
    Gauge,
    /// Monotonically non-decreasing count
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// Static description of one metric: name, help text, kind and label names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub labels: &'static [&'static str],
}

impl MetricDescriptor {
    pub const fn gauge(
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
    ) -> Self {
        MetricDescriptor {
            name,
            help,
            kind: MetricKind::Gauge,
            labels,
        }
    }

    pub const fn counter(name: &'static str, help: &'static str) -> Self {
        MetricDescriptor {
            name,
            help,
            kind: MetricKind::Counter,
            labels: &[],
        }
    }
}

/// One observed value of a metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub name: &'static str,
    pub kind: MetricKind,
    pub value: f64,
    /// Label name/value pairs, in the descriptor's label order
    pub labels: Vec<(&'static str, String)>,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// Creates a sample for `descriptor`
    ///
    /// # Arguments
    /// * `descriptor` - The metric this sample belongs to
    /// * `value` - Observed value
    /// * `label_values` - One value per descriptor label, in the same order
    /// * `timestamp` - When the value was observed
    pub fn new(
        descriptor: &MetricDescriptor,
        value: f64,
        label_values: &[&str],
        timestamp: DateTime<Utc>,
    ) -> Self {
        debug_assert_eq!(
            descriptor.labels.len(),
            label_values.len(),
            "label cardinality mismatch for {}",
            descriptor.name
        );

        MetricSample {
            name: descriptor.name,
            kind: descriptor.kind,
            value,
            labels: descriptor
                .labels
                .iter()
                .zip(label_values)
                .map(|(name, value)| (*name, value.to_string()))
                .collect(),
            timestamp,
        }
    }

    /// Returns the value of label `name`, if the sample carries it.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(label, _)| *label == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Core trait that all metric collectors must implement.
///
/// The registry calls `schema` once while registering the collector, then
/// `sample` on every scrape. A collector may emit any subset of its schema on
/// a given scrape, but never a metric outside of it.
#[async_trait]
pub trait MetricCollector: Send + Sync {
    /// Returns the human-readable name of this collector, used for logging.
    fn name(&self) -> &str;

    /// Every metric this collector can emit.
    fn schema(&self) -> Vec<MetricDescriptor>;

    /// Produces the current samples.
    ///
    /// Failures are handled inside the collector (logged and counted); a
    /// failed scrape yields a smaller set of samples rather than an error.
    async fn sample(&self) -> Vec<MetricSample>;
}

/// Creates all metric collectors backed by the shared node inventory cache.
///
/// # Adding New Metrics
/// Implement `MetricCollector` in a new module and add its instantiation here.
pub fn create_all_collectors(cache: Arc<ThrottledCache>) -> Vec<Arc<dyn MetricCollector>> {
    vec![Arc::new(nodes::NodesCollector::new(cache))]
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATE_CPUS: MetricDescriptor =
        MetricDescriptor::gauge("test_cpus_per_state", "Cpus per state", &["state"]);

    #[test]
    fn test_sample_carries_descriptor_labels() {
        let now = Utc::now();
        let sample = MetricSample::new(&STATE_CPUS, 8.0, &["alloc"], now);

        assert_eq!(sample.name, "test_cpus_per_state");
        assert_eq!(sample.kind, MetricKind::Gauge);
        assert_eq!(sample.labels, vec![("state", "alloc".to_string())]);
        assert_eq!(sample.label("state"), Some("alloc"));
        assert_eq!(sample.label("partition"), None);
    }

    #[test]
    fn test_sample_serializes_kind_and_timestamp() {
        let counter = MetricDescriptor::counter("test_errors", "errors");
        let sample = MetricSample::new(&counter, 3.0, &[], Utc::now());

        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["kind"], "counter");
        assert_eq!(json["value"], 3.0);
        assert!(json["timestamp"].is_string());
    }
}
