// Registry module - the registration phase and the per-scrape gather
//
// Collectors are registered once at startup. Registration is where their
// schemas are validated and advertised; after that every scrape calls
// `gather`, which runs the collectors and concatenates their samples.
//
// # Architecture
// - Descriptor names are unique across all registered collectors
// - Collectors run concurrently within one gather
// - A collector never fails a gather; it reports its own errors in-band

use futures_util::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::exposition;
use crate::metrics::{MetricCollector, MetricDescriptor, MetricSample};

/// Errors that can occur while registering a collector
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("collector '{collector}' advertises an invalid schema: {source}")]
    Schema {
        collector: String,
        #[source]
        source: prometheus::Error,
    },
}

/// Holds the registered collectors and everything they advertised
#[derive(Default)]
pub struct MetricRegistry {
    collectors: Vec<Arc<dyn MetricCollector>>,
    descriptors: Vec<MetricDescriptor>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collector and advertises its schema
    ///
    /// The whole schema is validated before anything is recorded, so a
    /// rejected collector leaves the registry unchanged.
    ///
    /// # Returns
    /// * `Ok(())` - The collector will take part in every gather
    /// * `Err(RegistryError)` - A metric or label name is malformed, or a
    ///   metric name is already taken
    pub fn register(&mut self, collector: Arc<dyn MetricCollector>) -> Result<(), RegistryError> {
        let schema = collector.schema();

        let mut combined = self.descriptors.clone();
        combined.extend_from_slice(&schema);
        exposition::check_schema(&combined).map_err(|source| RegistryError::Schema {
            collector: collector.name().to_string(),
            source,
        })?;

        info!(
            "Registered collector '{}' with {} metric(s)",
            collector.name(),
            schema.len()
        );
        for descriptor in &schema {
            debug!(
                "  {} ({}) labels={:?}",
                descriptor.name,
                descriptor.kind.as_str(),
                descriptor.labels
            );
        }

        self.descriptors.extend(schema);
        self.collectors.push(collector);
        Ok(())
    }

    /// Every advertised descriptor, in registration order
    pub fn descriptors(&self) -> &[MetricDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Runs every registered collector once and returns all their samples.
    pub async fn gather(&self) -> Vec<MetricSample> {
        let batches = join_all(self.collectors.iter().map(|c| c.sample())).await;

        let samples: Vec<MetricSample> = batches.into_iter().flatten().collect();
        debug!("Gathered {} sample(s)", samples.len());
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    struct Fixed {
        name: &'static str,
        schema: Vec<MetricDescriptor>,
    }

    #[async_trait]
    impl MetricCollector for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn schema(&self) -> Vec<MetricDescriptor> {
            self.schema.clone()
        }

        async fn sample(&self) -> Vec<MetricSample> {
            let now = Utc::now();
            self.schema
                .iter()
                .map(|d| {
                    let labels: Vec<&str> = d.labels.iter().map(|_| "x").collect();
                    MetricSample::new(d, 1.0, &labels, now)
                })
                .collect()
        }
    }

    fn fixed(name: &'static str, schema: Vec<MetricDescriptor>) -> Arc<dyn MetricCollector> {
        Arc::new(Fixed { name, schema })
    }

    #[tokio::test]
    async fn test_gather_concatenates_collectors() {
        let mut registry = MetricRegistry::new();
        registry
            .register(fixed(
                "a",
                vec![
                    MetricDescriptor::gauge("a_one", "one", &[]),
                    MetricDescriptor::gauge("a_two", "two", &["partition"]),
                ],
            ))
            .unwrap();
        registry
            .register(fixed("b", vec![MetricDescriptor::counter("b_errors", "errors")]))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.descriptors().len(), 3);

        let mut names: Vec<&str> = registry.gather().await.iter().map(|s| s.name).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["a_one", "a_two", "b_errors"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = MetricRegistry::new();
        registry
            .register(fixed("a", vec![MetricDescriptor::gauge("shared", "x", &[])]))
            .unwrap();

        let err = registry
            .register(fixed(
                "b",
                vec![
                    MetricDescriptor::gauge("b_only", "x", &[]),
                    MetricDescriptor::gauge("shared", "x", &[]),
                ],
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Schema { ref collector, source: prometheus::Error::AlreadyReg } if collector == "b"
        ));

        // Nothing from the rejected collector was kept.
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.descriptors().len(), 1);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut registry = MetricRegistry::new();
        assert!(registry
            .register(fixed("a", vec![MetricDescriptor::gauge("9lives", "x", &[])]))
            .is_err());
        assert!(registry
            .register(fixed(
                "a",
                vec![MetricDescriptor::gauge("ok_name", "x", &["bad-label"])]
            ))
            .is_err());
        assert!(registry
            .register(fixed("a", vec![MetricDescriptor::gauge("slurm-cpus", "x", &[])]))
            .is_err());
        assert!(registry.is_empty());

        registry
            .register(fixed("a", vec![MetricDescriptor::gauge("job:rate5m", "x", &["_state"])]))
            .unwrap();
        assert_eq!(registry.len(), 1);
    }
}
