//! Integration tests for dataset splitting.
//!
//! Splits must conserve rows and columns exactly and stay balanced, and
//! they must keep doing so when a partition is split again and again.

use std::sync::Arc;

use clusterproxy::frame::{verify_split, DatasetHandle};
use clusterproxy::key::DEFAULT_TEMP_PREFIX;
use clusterproxy::stage::ArtifactUploader;
use clusterproxy::transport::{
    ClusterTransport, Endpoint, MemoryCluster, Method, TransportError, TransportResult,
};
use serde_json::{json, Value};

/// A cluster that splits by fixed ratios whatever the client asks for.
struct SkewedSplitter {
    cluster: Arc<MemoryCluster>,
    ratios: Vec<f64>,
}

impl ClusterTransport for SkewedSplitter {
    fn request(&self, method: Method, path: &str, mut params: Value) -> TransportResult<Value> {
        if matches!(Endpoint::parse(method, path), Some(Endpoint::SplitFrame)) {
            params["ratios"] = json!(self.ratios);
        }
        self.cluster.request(method, path, params)
    }
}

fn iris() -> (Arc<MemoryCluster>, ArtifactUploader, DatasetHandle) {
    let cluster = Arc::new(MemoryCluster::new());
    let key = cluster.insert_frame(
        "iris.hex",
        &["sepal_len", "sepal_wid", "petal_len", "petal_wid", "class"],
        150,
    );
    let iris = DatasetHandle::describe(&*cluster, &key).unwrap();
    let uploader = ArtifactUploader::new(cluster.clone());
    (cluster, uploader, iris)
}

#[test]
fn test_recursive_binary_split_conserves_rows() {
    let (_cluster, uploader, iris) = iris();
    let columns = iris.column_count();

    let mut current = iris;
    for _ in 0..10 {
        let before = current.row_count();
        let parts = current.split(&uploader, &[0.5]).unwrap();
        assert_eq!(parts.len(), 2);

        let (a, b) = (parts[0].row_count(), parts[1].row_count());
        assert_eq!(a + b, before);
        assert!(a.abs_diff(b) < 2, "{} vs {}", a, b);
        assert_eq!(parts[0].column_count(), columns);
        assert_eq!(parts[1].column_count(), columns);

        current = parts[1].clone();
    }
}

#[test]
fn test_multiway_split() {
    let (_cluster, uploader, iris) = iris();

    let parts = iris.split(&uploader, &[0.2, 0.3]).unwrap();
    let rows: Vec<u64> = parts.iter().map(|p| p.row_count()).collect();
    assert_eq!(rows, vec![30, 45, 75]);
    assert!(parts.iter().all(|p| p.labels() == iris.labels()));
}

#[test]
fn test_uneven_multiway_split_is_within_tolerance() {
    let cluster = Arc::new(MemoryCluster::new());
    let key = cluster.insert_frame("small", &["x", "y"], 7);
    let small = DatasetHandle::describe(&*cluster, &key).unwrap();
    let uploader = ArtifactUploader::new(cluster.clone());

    let ratios = [0.15, 0.25, 0.3];
    let parts = small.split(&uploader, &ratios).unwrap();
    assert_eq!(parts.len(), 4);
    assert_eq!(parts.iter().map(|p| p.row_count()).sum::<u64>(), 7);
    verify_split(&small, &parts, &ratios).unwrap();
}

#[test]
fn test_split_of_column_selection_stages_and_releases() {
    let (cluster, uploader, iris) = iris();
    let measurements = iris.select(&[0, 1, 2, 3]).unwrap();
    assert!(measurements.frame_key().is_none());

    let parts = measurements.split(&uploader, &[0.5]).unwrap();
    assert_eq!(parts[0].column_count(), 4);
    assert_eq!(parts[0].row_count() + parts[1].row_count(), 150);
    assert!(cluster
        .keys()
        .iter()
        .all(|k| !k.starts_with(DEFAULT_TEMP_PREFIX)));
}

#[test]
fn test_split_failure_releases_staged_frame() {
    let (cluster, uploader, iris) = iris();
    let measurements = iris.select(&[0, 1]).unwrap();
    cluster.fail_next_matching(
        |e| matches!(e, Endpoint::SplitFrame),
        TransportError::remote("INTERNAL", "split failed"),
    );

    assert!(measurements.split(&uploader, &[0.5]).unwrap_err().is_remote());
    assert!(cluster
        .keys()
        .iter()
        .all(|k| !k.starts_with(DEFAULT_TEMP_PREFIX)));
}

#[test]
fn test_partitions_released_when_describe_fails() {
    let (cluster, uploader, iris) = iris();
    let before = cluster.keys();
    // The first describe after the split succeeds, the second one fails.
    cluster.fail_next_matching(
        |e| matches!(e, Endpoint::Frame(k) if k.as_str().starts_with("split1")),
        TransportError::Timeout(30),
    );

    let err = iris.split(&uploader, &[0.5]).unwrap_err();
    assert!(err.is_transport());
    assert_eq!(cluster.keys(), before);
}

#[test]
fn test_partitions_released_when_verification_fails() {
    let (cluster, _, iris) = iris();
    let before = cluster.keys();
    let skewed = Arc::new(SkewedSplitter {
        cluster: cluster.clone(),
        ratios: vec![0.2],
    });
    let uploader = ArtifactUploader::new(skewed);

    let err = iris.split(&uploader, &[0.5]).unwrap_err();
    assert!(err.is_transport());
    assert!(err.to_string().contains("partition 0 has 30 rows"));
    assert_eq!(cluster.keys(), before);
}

#[test]
fn test_lost_split_reply_releases_staged_frame() {
    let (cluster, uploader, iris) = iris();
    let measurements = iris.select(&[0, 1]).unwrap();
    cluster.lose_next_reply_matching(
        |e| matches!(e, Endpoint::SplitFrame),
        TransportError::Timeout(30),
    );

    assert!(measurements.split(&uploader, &[0.5]).is_err());
    assert!(cluster
        .keys()
        .iter()
        .all(|k| !k.starts_with(DEFAULT_TEMP_PREFIX)));
}

#[test]
fn test_bad_ratios_issue_no_requests() {
    let (cluster, uploader, iris) = iris();
    cluster.clear_requests();

    assert!(iris.split(&uploader, &[]).unwrap_err().is_invalid_input());
    assert!(iris.split(&uploader, &[0.6, 0.5]).unwrap_err().is_invalid_input());
    assert!(iris.split(&uploader, &[0.5, 0.5]).unwrap_err().is_invalid_input());
    assert!(iris.split(&uploader, &[1.5]).unwrap_err().is_invalid_input());
    assert!(DatasetHandle::empty()
        .split(&uploader, &[0.5])
        .unwrap_err()
        .is_invalid_input());
    assert_eq!(cluster.request_count(), 0);
}

#[test]
fn test_partitions_are_caller_owned() {
    let (cluster, uploader, iris) = iris();
    let parts = iris.split(&uploader, &[0.5]).unwrap();
    for part in &parts {
        let key = part.frame_key().unwrap();
        assert!(cluster.contains_key(key.as_str()));
        part.delete(&*cluster).unwrap();
        assert!(!cluster.contains_key(key.as_str()));
    }
    assert!(cluster.contains_key("iris.hex"));
}
