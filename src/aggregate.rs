// Aggregate module - derived views over one scrape's node records
//
// All three reductions are plain sums rebuilt from empty state on every call,
// so they are independent of node order and never carry data between scrapes.

use std::collections::HashMap;

use crate::inventory::NodeRecord;

/// Resource totals for one partition
///
/// A node that belongs to several partitions is counted in full by each of
/// them, so partition totals can add up to more than the cluster total.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PartitionAggregate {
    pub cpus: f64,
    pub real_memory: f64,
    pub free_memory: f64,
    pub alloc_memory: f64,
    pub alloc_cpus: f64,
    pub idle_cpus: f64,
    pub weight: f64,
    pub cpu_load: f64,
}

impl PartitionAggregate {
    fn add(&mut self, node: &NodeRecord) {
        self.cpus += node.cpus;
        self.real_memory += node.real_memory;
        self.free_memory += node.free_memory;
        self.alloc_memory += node.alloc_memory;
        self.alloc_cpus += node.alloc_cpus;
        self.idle_cpus += node.idle_cpus;
        self.weight += node.weight;
        self.cpu_load += node.cpu_load;
    }
}

/// Cluster-wide CPU totals plus CPUs bucketed by node state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuSummary {
    pub total: f64,
    pub idle: f64,
    pub load: f64,
    /// State tag (verbatim, case-sensitive) to the CPUs of nodes in that state
    pub per_state: HashMap<String, f64>,
}

/// Cluster-wide memory totals
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemSummary {
    pub alloc_memory: f64,
    pub free_memory: f64,
    pub real_memory: f64,
}

/// Sums every node's resources into each partition it lists.
pub fn partition_aggregates(nodes: &[NodeRecord]) -> HashMap<String, PartitionAggregate> {
    let mut partitions: HashMap<String, PartitionAggregate> = HashMap::new();
    for node in nodes {
        for partition in &node.partitions {
            partitions
                .entry(partition.clone())
                .or_default()
                .add(node);
        }
    }
    partitions
}

pub fn cpu_summary(nodes: &[NodeRecord]) -> CpuSummary {
    let mut summary = CpuSummary::default();
    for node in nodes {
        summary.total += node.cpus;
        summary.idle += node.idle_cpus;
        summary.load += node.cpu_load;
        *summary.per_state.entry(node.state.clone()).or_default() += node.cpus;
    }
    summary
}

pub fn mem_summary(nodes: &[NodeRecord]) -> MemSummary {
    nodes.iter().fold(MemSummary::default(), |mut summary, node| {
        summary.alloc_memory += node.alloc_memory;
        summary.free_memory += node.free_memory;
        summary.real_memory += node.real_memory;
        summary
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(hostname: &str, cpus: f64, state: &str, partitions: &[&str]) -> NodeRecord {
        NodeRecord {
            hostname: hostname.to_string(),
            cpus,
            state: state.to_string(),
            partitions: partitions.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    fn fixture() -> Vec<NodeRecord> {
        vec![
            NodeRecord {
                real_memory: 1000.0,
                free_memory: 600.0,
                alloc_memory: 400.0,
                alloc_cpus: 1.0,
                idle_cpus: 3.0,
                weight: 1.0,
                cpu_load: 0.5,
                ..node("cs1", 4.0, "idle", &["batch"])
            },
            NodeRecord {
                real_memory: 2000.0,
                free_memory: 500.0,
                alloc_memory: 1500.0,
                alloc_cpus: 8.0,
                idle_cpus: 0.0,
                weight: 10.0,
                cpu_load: 7.75,
                ..node("cs2", 8.0, "alloc", &["batch", "gpu"])
            },
            NodeRecord {
                real_memory: 500.0,
                ..node("cs3", 2.0, "down", &[])
            },
        ]
    }

    #[test]
    fn test_multi_partition_node_counts_in_full() {
        let partitions = partition_aggregates(&fixture());

        assert_eq!(partitions.len(), 2);
        let batch = partitions["batch"];
        let gpu = partitions["gpu"];
        assert_eq!(batch.cpus, 12.0);
        assert_eq!(gpu.cpus, 8.0);
        assert_eq!(batch.real_memory, 3000.0);
        assert_eq!(gpu.alloc_memory, 1500.0);
        assert_eq!(batch.idle_cpus, 3.0);
        assert_eq!(batch.weight, 11.0);
        assert_eq!(batch.cpu_load, 8.25);

        // Partition sums overlap and exceed the cluster total.
        let summed: f64 = partitions.values().map(|p| p.cpus).sum();
        assert_eq!(summed, 20.0);
        assert_eq!(cpu_summary(&fixture()).total, 14.0);
    }

    #[test]
    fn test_aggregates_ignore_order() {
        let nodes = fixture();
        let mut reversed = nodes.clone();
        reversed.reverse();

        assert_eq!(partition_aggregates(&nodes), partition_aggregates(&reversed));
        assert_eq!(cpu_summary(&nodes), cpu_summary(&reversed));
        assert_eq!(mem_summary(&nodes), mem_summary(&reversed));
    }

    #[test]
    fn test_cpu_summary_by_state() {
        let mut nodes = fixture();
        nodes.push(node("cs4", 16.0, "IDLE", &["batch"]));
        nodes.push(node("cs5", 1.0, "idle", &["batch"]));

        let summary = cpu_summary(&nodes);
        assert_eq!(summary.total, 31.0);
        assert_eq!(summary.idle, 3.0);
        assert_eq!(summary.load, 8.25);
        assert_eq!(summary.per_state.len(), 4);
        assert_eq!(summary.per_state["idle"], 5.0);
        assert_eq!(summary.per_state["IDLE"], 16.0);
        assert_eq!(summary.per_state["alloc"], 8.0);
        assert_eq!(summary.per_state["down"], 2.0);
    }

    #[test]
    fn test_mem_summary() {
        let summary = mem_summary(&fixture());
        assert_eq!(
            summary,
            MemSummary {
                alloc_memory: 1900.0,
                free_memory: 1100.0,
                real_memory: 3500.0,
            }
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(partition_aggregates(&[]).is_empty());
        assert_eq!(cpu_summary(&[]), CpuSummary::default());
        assert!(cpu_summary(&[]).per_state.is_empty());
        assert_eq!(mem_summary(&[]), MemSummary::default());
    }
}
