// Exposition module - renders samples in the Prometheus text format
//
// The collectors stay backend-neutral; this is the one place that maps
// descriptors and samples onto `prometheus` metric vectors. A fresh registry
// is built per render so concurrent scrapes never share mutable metric state.

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use tracing::warn;

use crate::metrics::{MetricDescriptor, MetricKind, MetricSample};

pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// One descriptor turned into a labelled prometheus vector
enum Family {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

impl Family {
    fn new(descriptor: &MetricDescriptor) -> prometheus::Result<Self> {
        let opts = Opts::new(descriptor.name, descriptor.help);
        Ok(match descriptor.kind {
            MetricKind::Gauge => Family::Gauge(GaugeVec::new(opts, descriptor.labels)?),
            MetricKind::Counter => Family::Counter(CounterVec::new(opts, descriptor.labels)?),
        })
    }

    fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        match self {
            Family::Gauge(vec) => registry.register(Box::new(vec.clone())),
            Family::Counter(vec) => registry.register(Box::new(vec.clone())),
        }
    }

    fn observe(&self, sample: &MetricSample) -> prometheus::Result<()> {
        let values: Vec<&str> = sample.labels.iter().map(|(_, v)| v.as_str()).collect();
        match self {
            Family::Gauge(vec) => vec.get_metric_with_label_values(&values)?.set(sample.value),
            Family::Counter(vec) => {
                if sample.value < 0.0 {
                    warn!("Dropping negative value for counter '{}'", sample.name);
                    return Ok(());
                }
                vec.get_metric_with_label_values(&values)?.inc_by(sample.value)
            }
        }
        Ok(())
    }
}

/// Builds a registry holding one empty vector per descriptor
///
/// Fails on a malformed metric or label name and on a descriptor that is
/// advertised twice.
fn build(
    descriptors: &[MetricDescriptor],
) -> prometheus::Result<(Registry, HashMap<&'static str, Family>)> {
    let registry = Registry::new();
    let mut families = HashMap::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let family = Family::new(descriptor)?;
        family.register(&registry)?;
        families.insert(descriptor.name, family);
    }
    Ok((registry, families))
}

/// Checks that `descriptors` form a schema the text format can carry.
pub fn check_schema(descriptors: &[MetricDescriptor]) -> prometheus::Result<()> {
    build(descriptors).map(|_| ())
}

/// Renders `samples` under their descriptors
///
/// Families without samples are left out. Samples whose name has no
/// descriptor are dropped.
pub fn render(
    descriptors: &[MetricDescriptor],
    samples: &[MetricSample],
) -> prometheus::Result<String> {
    let (registry, families) = build(descriptors)?;

    for sample in samples {
        match families.get(sample.name) {
            Some(family) => family.observe(sample)?,
            None => warn!("Dropping sample for unregistered metric '{}'", sample.name),
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
