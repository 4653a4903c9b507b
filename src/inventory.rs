// Inventory module - decodes the scheduler's node listing
//
// The payload is the JSON document produced by `sinfo --json`:
// an opaque `meta` block, a list of error strings, and one entry per node.

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::error;

/// Errors that can occur while decoding a node inventory payload
#[derive(Error, Debug)]
pub enum ParseError {
    /// The data source answered but reported its own errors
    #[error("data source reported an error: {0}")]
    Source(String),

    /// The payload does not match the expected schema
    #[error("malformed node inventory payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One cluster node as reported at scrape time
///
/// Numeric fields are kept as reported; a missing or `null` field is zero.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeRecord {
    #[serde(deserialize_with = "null_as_default")]
    pub hostname: String,
    #[serde(deserialize_with = "null_as_default")]
    pub cpus: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub real_memory: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub free_memory: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub partitions: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub state: String,
    #[serde(deserialize_with = "null_as_default")]
    pub alloc_memory: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub alloc_cpus: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub idle_cpus: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub weight: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub cpu_load: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub architecture: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SinfoResponse {
    #[allow(dead_code)]
    meta: serde_json::Value,
    #[serde(deserialize_with = "null_as_default")]
    errors: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    nodes: Vec<NodeRecord>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decodes a node inventory payload into node records
///
/// A payload with a non-empty `errors` list is rejected as a whole, even if it
/// also carries nodes. Every reported error is logged; the first one is
/// returned.
///
/// # Returns
/// * `Ok(Vec<NodeRecord>)` - The nodes exactly as reported
/// * `Err(ParseError::Source)` - The data source flagged errors
/// * `Err(ParseError::Malformed)` - The payload is not valid for the schema
pub fn parse_nodes(payload: &[u8]) -> Result<Vec<NodeRecord>, ParseError> {
    let response: SinfoResponse = serde_json::from_slice(payload).map_err(|e| {
        error!("Failed to decode node inventory: {}", e);
        ParseError::Malformed(e)
    })?;

    if let Some(first) = response.errors.first() {
        for e in &response.errors {
            error!("Data source error response: {:?}", e);
        }
        return Err(ParseError::Source(first.clone()));
    }

    Ok(response.nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_node() {
        let payload = br#"{
            "meta": {"plugin": {"type": "openapi/v0.0.38"}},
            "errors": [],
            "nodes": [{
                "hostname": "cs1",
                "cpus": 64,
                "real_memory": 515000,
                "free_memory": 400000.5,
                "partitions": ["batch", "gpu"],
                "state": "mixed",
                "alloc_memory": 115000,
                "alloc_cpus": 16,
                "idle_cpus": 48,
                "weight": 1,
                "cpu_load": 15.25,
                "architecture": "x86_64"
            }]
        }"#;

        let nodes = parse_nodes(payload).unwrap();
        assert_eq!(
            nodes,
            vec![NodeRecord {
                hostname: "cs1".to_string(),
                cpus: 64.0,
                real_memory: 515000.0,
                free_memory: 400000.5,
                partitions: vec!["batch".to_string(), "gpu".to_string()],
                state: "mixed".to_string(),
                alloc_memory: 115000.0,
                alloc_cpus: 16.0,
                idle_cpus: 48.0,
                weight: 1.0,
                cpu_load: 15.25,
                architecture: "x86_64".to_string(),
            }]
        );
    }

    #[test]
    fn test_missing_and_null_fields_are_zero() {
        let payload = br#"{"nodes": [{"hostname": "cs2", "cpus": null, "partitions": null}]}"#;
        let nodes = parse_nodes(payload).unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].hostname, "cs2");
        assert_eq!(nodes[0].cpus, 0.0);
        assert_eq!(nodes[0].weight, 0.0);
        assert!(nodes[0].partitions.is_empty());
        assert_eq!(nodes[0].state, "");
    }

    #[test]
    fn test_errors_reject_payload_even_with_nodes() {
        let payload = br#"{
            "errors": ["slurm_load_node: Unable to contact slurm controller", "second"],
            "nodes": [{"hostname": "cs1", "cpus": 4}]
        }"#;

        match parse_nodes(payload) {
            Err(ParseError::Source(msg)) => {
                assert_eq!(msg, "slurm_load_node: Unable to contact slurm controller")
            }
            other => panic!("expected source error, got {:?}", other),
        }
    }

    #[test]
    fn test_null_errors_and_missing_nodes() {
        let nodes = parse_nodes(br#"{"meta": {}, "errors": null}"#).unwrap();
        assert!(nodes.is_empty());
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(
            parse_nodes(b"sinfo: error: invalid option"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            parse_nodes(br#"{"nodes": [{"cpus": "many"}]}"#),
            Err(ParseError::Malformed(_))
        ));
    }
}
