// Node metrics collector
//
// Turns the scheduler's node inventory into per-partition and cluster-wide
// CPU and memory gauges, plus a counter of failed scrapes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use super::{MetricCollector, MetricDescriptor, MetricSample};
use crate::aggregate::{cpu_summary, mem_summary, partition_aggregates, PartitionAggregate};
use crate::cache::ThrottledCache;
use crate::fetcher::FetchError;
use crate::inventory::{parse_nodes, NodeRecord, ParseError};

// partition summary metrics
const PARTITION_CPUS: MetricDescriptor = MetricDescriptor::gauge(
    "slurm_partition_total_cpus",
    "Total cpus per partition",
    &["partition"],
);
const PARTITION_REAL_MEMORY: MetricDescriptor =
    MetricDescriptor::gauge("slurm_partition_real_mem", "Real mem per partition", &["partition"]);
const PARTITION_FREE_MEMORY: MetricDescriptor =
    MetricDescriptor::gauge("slurm_partition_free_mem", "Free mem per partition", &["partition"]);
const PARTITION_ALLOC_MEMORY: MetricDescriptor = MetricDescriptor::gauge(
    "slurm_partition_alloc_mem",
    "Alloc mem per partition",
    &["partition"],
);
const PARTITION_ALLOC_CPUS: MetricDescriptor = MetricDescriptor::gauge(
    "slurm_partition_alloc_cpus",
    "Alloc cpus per partition",
    &["partition"],
);
const PARTITION_IDLE_CPUS: MetricDescriptor = MetricDescriptor::gauge(
    "slurm_partition_idle_cpus",
    "Idle cpus per partition",
    &["partition"],
);
const PARTITION_WEIGHT: MetricDescriptor = MetricDescriptor::gauge(
    "slurm_partition_weight",
    "Total node weight per partition",
    &["partition"],
);
const PARTITION_CPU_LOAD: MetricDescriptor = MetricDescriptor::gauge(
    "slurm_partition_cpu_load",
    "Total cpu load per partition",
    &["partition"],
);

// cpu summary metrics
const TOTAL_CPUS: MetricDescriptor = MetricDescriptor::gauge("slurm_cpus_total", "Total cpus", &[]);
const TOTAL_IDLE_CPUS: MetricDescriptor =
    MetricDescriptor::gauge("slurm_cpus_idle", "Total idle cpus", &[]);
const TOTAL_CPU_LOAD: MetricDescriptor =
    MetricDescriptor::gauge("slurm_cpu_load", "Total cpu load", &[]);
const CPUS_PER_STATE: MetricDescriptor = MetricDescriptor::gauge(
    "slurm_cpus_per_state",
    "Cpus per state i.e alloc, mixed, draining, etc.",
    &["state"],
);

// memory summary metrics
const TOTAL_REAL_MEMORY: MetricDescriptor =
    MetricDescriptor::gauge("slurm_mem_real", "Total real mem", &[]);
const TOTAL_FREE_MEMORY: MetricDescriptor =
    MetricDescriptor::gauge("slurm_mem_free", "Total free mem", &[]);
const TOTAL_ALLOC_MEMORY: MetricDescriptor =
    MetricDescriptor::gauge("slurm_mem_alloc", "Total alloc mem", &[]);

// exporter metrics
const NODE_SCRAPE_ERRORS: MetricDescriptor =
    MetricDescriptor::counter("slurm_node_scrape_error", "slurm node info scrape errors");

/// Why a scrape produced no node metrics
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("failed to fetch node inventory: {0}")]
    Fetch(#[from] FetchError),

    #[error("failed to parse node inventory: {0}")]
    Parse(#[from] ParseError),
}

impl PartitionAggregate {
    fn fields(&self) -> [(&'static MetricDescriptor, f64); 8] {
        [
            (&PARTITION_CPUS, self.cpus),
            (&PARTITION_REAL_MEMORY, self.real_memory),
            (&PARTITION_FREE_MEMORY, self.free_memory),
            (&PARTITION_ALLOC_MEMORY, self.alloc_memory),
            (&PARTITION_ALLOC_CPUS, self.alloc_cpus),
            (&PARTITION_IDLE_CPUS, self.idle_cpus),
            (&PARTITION_WEIGHT, self.weight),
            (&PARTITION_CPU_LOAD, self.cpu_load),
        ]
    }
}

/// Collector for the scheduler's node inventory
///
/// Each scrape runs fetch, parse and the three aggregations in sequence. The
/// only state kept between scrapes is the error counter; the shared cache
/// lives outside the collector and is handed in at construction.
pub struct NodesCollector {
    cache: Arc<ThrottledCache>,
    scrape_errors: AtomicU64,
}

impl NodesCollector {
    pub fn new(cache: Arc<ThrottledCache>) -> Self {
        NodesCollector {
            cache,
            scrape_errors: AtomicU64::new(0),
        }
    }

    /// Returns the parsed nodes and whether they come from a stale payload.
    async fn fetch_nodes(&self) -> Result<(Vec<NodeRecord>, bool), CollectError> {
        let payload = self.cache.get().await?;
        let nodes = parse_nodes(&payload.bytes)?;
        Ok((nodes, payload.stale))
    }

    /// Appends every node-derived sample for one scrape.
    fn emit(&self, nodes: &[NodeRecord], now: DateTime<Utc>, samples: &mut Vec<MetricSample>) {
        for node in nodes {
            trace!(
                hostname = %node.hostname,
                state = %node.state,
                architecture = %node.architecture,
                "Node record"
            );
        }

        // Zero-valued partition fields are skipped to keep the series sparse.
        for (partition, aggregate) in partition_aggregates(nodes) {
            for (descriptor, value) in aggregate.fields() {
                if value > 0.0 {
                    samples.push(MetricSample::new(descriptor, value, &[partition.as_str()], now));
                }
            }
        }

        let cpus = cpu_summary(nodes);
        samples.push(MetricSample::new(&TOTAL_CPUS, cpus.total, &[], now));
        samples.push(MetricSample::new(&TOTAL_IDLE_CPUS, cpus.idle, &[], now));
        samples.push(MetricSample::new(&TOTAL_CPU_LOAD, cpus.load, &[], now));
        for (state, count) in &cpus.per_state {
            samples.push(MetricSample::new(&CPUS_PER_STATE, *count, &[state.as_str()], now));
        }

        let mem = mem_summary(nodes);
        samples.push(MetricSample::new(&TOTAL_REAL_MEMORY, mem.real_memory, &[], now));
        samples.push(MetricSample::new(&TOTAL_FREE_MEMORY, mem.free_memory, &[], now));
        samples.push(MetricSample::new(&TOTAL_ALLOC_MEMORY, mem.alloc_memory, &[], now));
    }

    pub fn scrape_errors(&self) -> u64 {
        self.scrape_errors.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MetricCollector for NodesCollector {
    fn name(&self) -> &str {
        "Nodes"
    }

    fn schema(&self) -> Vec<MetricDescriptor> {
        vec![
            PARTITION_CPUS,
            PARTITION_REAL_MEMORY,
            PARTITION_FREE_MEMORY,
            PARTITION_ALLOC_MEMORY,
            PARTITION_ALLOC_CPUS,
            PARTITION_IDLE_CPUS,
            PARTITION_WEIGHT,
            PARTITION_CPU_LOAD,
            TOTAL_CPUS,
            TOTAL_IDLE_CPUS,
            TOTAL_CPU_LOAD,
            CPUS_PER_STATE,
            TOTAL_REAL_MEMORY,
            TOTAL_FREE_MEMORY,
            TOTAL_ALLOC_MEMORY,
            NODE_SCRAPE_ERRORS,
        ]
    }

    async fn sample(&self) -> Vec<MetricSample> {
        let now = Utc::now();
        let mut samples = Vec::new();

        match self.fetch_nodes().await {
            Ok((nodes, stale)) => {
                if stale {
                    self.scrape_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Node inventory fetch failed, emitting last good aggregates");
                }
                debug!("Collected {} node record(s)", nodes.len());
                self.emit(&nodes, now, &mut samples);
            }
            Err(e) => {
                self.scrape_errors.fetch_add(1, Ordering::Relaxed);
                error!("Failed to collect node metrics: {}", e);
            }
        }

        // The error counter is always last, whatever happened above.
        samples.push(MetricSample::new(
            &NODE_SCRAPE_ERRORS,
            self.scrape_errors() as f64,
            &[],
            now,
        ));
        samples
    }
}
