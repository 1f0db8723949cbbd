//! Integration tests for model proxies against the in-process cluster.
//!
//! Every test checks the staging discipline as well as the result: once an
//! operation returns, no temporary artifact it staged may remain on the
//! cluster, whether the operation succeeded or failed.

use std::sync::Arc;

use clusterproxy::frame::{DatasetHandle, FrameScope, LocalFrame};
use clusterproxy::key::{RemoteKey, DEFAULT_TEMP_PREFIX};
use clusterproxy::model::{MetricsKind, MetricsResult, ModelProxy};
use clusterproxy::stage::ArtifactUploader;
use clusterproxy::transport::{
    ClusterTransport, Endpoint, MemoryCluster, MemoryModel, TransportError,
};
use clusterproxy::ProxyError;

const IRIS_COLUMNS: [&str; 5] = ["sepal_len", "sepal_wid", "petal_len", "petal_wid", "class"];
const IRIS_CLASSES: [&str; 3] = ["setosa", "versicolor", "virginica"];

struct Fixture {
    cluster: Arc<MemoryCluster>,
    iris: DatasetHandle,
}

impl Fixture {
    fn new() -> Self {
        let cluster = Arc::new(MemoryCluster::new());
        let key = cluster.insert_frame("iris.hex", &IRIS_COLUMNS, 150);
        let iris = DatasetHandle::describe(&*cluster, &key).unwrap();
        Self { cluster, iris }
    }

    fn transport(&self) -> Arc<dyn ClusterTransport> {
        self.cluster.clone()
    }

    fn model(&self, key: &str, model: MemoryModel) -> ModelProxy {
        self.cluster.insert_model(key, model);
        ModelProxy::load(self.transport(), RemoteKey::new(key).unwrap()).unwrap()
    }

    fn temporaries(&self) -> Vec<String> {
        self.cluster
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(DEFAULT_TEMP_PREFIX))
            .collect()
    }
}

// ============================================================================
// Predict
// ============================================================================

#[test]
fn test_predict_row_count_matches_input() {
    let fx = Fixture::new();
    let model = fx.model("iris_gbm", MemoryModel::classifier("gbm", &IRIS_CLASSES));

    let predictions = model.predict(&fx.iris).unwrap();

    assert_eq!(predictions.row_count(), fx.iris.row_count());
    assert_eq!(predictions.column_count(), 4);
    assert_eq!(predictions.labels()[0], "predict");
    assert!(fx.temporaries().is_empty());

    // The result belongs to the caller and stays until deleted.
    let key = predictions.frame_key().unwrap().clone();
    assert!(fx.cluster.contains_key(key.as_str()));
    predictions.delete(&*fx.cluster).unwrap();
    assert!(!fx.cluster.contains_key(key.as_str()));
    model.detach();
}

#[test]
fn test_predict_on_column_subset() {
    let fx = Fixture::new();
    let model = fx.model("iris_gbm", MemoryModel::classifier("gbm", &IRIS_CLASSES));

    let features = fx.iris.select(&[0, 1, 2, 3]).unwrap();
    let predictions = model.predict(&features).unwrap();
    assert_eq!(predictions.row_count(), 150);
    assert!(fx.temporaries().is_empty());
    model.detach();
}

#[test]
fn test_predict_on_local_frame() {
    let fx = Fixture::new();
    let model = fx.model("ozone_glm", MemoryModel::regression("glm"));
    let before = fx.cluster.keys();

    let local = LocalFrame::new()
        .with_column("radiation", vec![190.0, 118.0, 149.0, 313.0])
        .with_column("temperature", vec![67.0, 72.0, 74.0, 62.0]);
    let predictions = model.predict(&local).unwrap();

    assert_eq!(predictions.row_count(), 4);
    assert_eq!(predictions.labels(), vec!["predict"]);

    // Uploaded columns go away with the staged frame.
    predictions.delete(&*fx.cluster).unwrap();
    assert_eq!(fx.cluster.keys(), before);
    model.detach();
}

#[test]
fn test_predict_request_sequence() {
    let fx = Fixture::new();
    let model = fx.model("iris_gbm", MemoryModel::classifier("gbm", &IRIS_CLASSES));
    fx.cluster.clear_requests();

    model.predict(&fx.iris).unwrap();

    let endpoints: Vec<Endpoint> = fx
        .cluster
        .requests()
        .iter()
        .filter_map(|r| r.endpoint())
        .collect();
    assert_eq!(endpoints.len(), 4);
    assert!(matches!(endpoints[0], Endpoint::BindColumns));
    assert!(matches!(endpoints[1], Endpoint::Predictions { .. }));
    assert!(matches!(endpoints[2], Endpoint::Frame(_)));
    assert!(matches!(endpoints[3], Endpoint::Remove(_)));
    model.detach();
}

// ============================================================================
// Cleanup on failure
// ============================================================================

#[test]
fn test_staged_frame_released_after_remote_error() {
    let fx = Fixture::new();
    let model = fx.model("iris_gbm", MemoryModel::classifier("gbm", &IRIS_CLASSES));
    fx.cluster.fail_next_matching(
        |e| matches!(e, Endpoint::Predictions { .. }),
        TransportError::remote("ILLEGAL_ARGUMENT", "test/train mismatch"),
    );

    let err = model.predict(&fx.iris).unwrap_err();
    match err {
        ProxyError::Remote { code, .. } => assert_eq!(code, "ILLEGAL_ARGUMENT"),
        other => panic!("expected remote error, got {:?}", other),
    }
    assert!(fx.temporaries().is_empty());
    model.detach();
}

#[test]
fn test_staged_frame_released_after_timeout() {
    let fx = Fixture::new();
    let model = fx.model("iris_gbm", MemoryModel::classifier("gbm", &IRIS_CLASSES));
    fx.cluster.fail_next_matching(
        |e| matches!(e, Endpoint::ModelMetrics { .. }),
        TransportError::Timeout(60),
    );

    let err = model.evaluate_metrics(&fx.iris).unwrap_err();
    assert!(err.is_transport());
    assert!(fx.temporaries().is_empty());
    model.detach();
}

#[test]
fn test_release_failure_does_not_replace_result() {
    let fx = Fixture::new();
    let model = fx.model("iris_gbm", MemoryModel::classifier("gbm", &IRIS_CLASSES));
    fx.cluster.fail_next_matching(
        |e| matches!(e, Endpoint::Remove(_)),
        TransportError::Connect("connection reset".into()),
    );

    // The staged frame leaks, but the prediction still comes back.
    let predictions = model.predict(&fx.iris).unwrap();
    assert_eq!(predictions.row_count(), 150);
    assert_eq!(fx.temporaries().len(), 1);
    model.detach();
}

#[test]
fn test_invalid_input_issues_no_requests() {
    let fx = Fixture::new();
    let model = fx.model("iris_gbm", MemoryModel::classifier("gbm", &IRIS_CLASSES));
    fx.cluster.clear_requests();

    let empty = DatasetHandle::empty();
    assert!(model.predict(&empty).unwrap_err().is_invalid_input());
    assert!(model.evaluate_metrics(&empty).unwrap_err().is_invalid_input());
    assert!(model.extract_features(&empty, 0).unwrap_err().is_invalid_input());
    assert!(model.confusion_matrix(&empty).unwrap_err().is_invalid_input());

    let ragged = LocalFrame::new()
        .with_column("a", vec![1.0, 2.0])
        .with_column("b", vec![1.0]);
    assert!(model.predict(&ragged).unwrap_err().is_invalid_input());

    assert_eq!(fx.cluster.request_count(), 0);
    model.detach();
}

// ============================================================================
// Metrics
// ============================================================================

#[test]
fn test_metrics_are_idempotent() {
    let fx = Fixture::new();
    let model = fx.model("iris_gbm", MemoryModel::classifier("gbm", &IRIS_CLASSES));

    let first = model.evaluate_metrics(&fx.iris).unwrap();
    let second = model.evaluate_metrics(&fx.iris).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.kind(), MetricsKind::Multinomial);
    assert!(fx.temporaries().is_empty());
    model.detach();
}

#[test]
fn test_binomial_metrics_carry_confusion_matrix() {
    let fx = Fixture::new();
    let model = fx.model("prostate_gbm", MemoryModel::classifier("gbm", &["0", "1"]));

    let metrics = model.evaluate_metrics(&fx.iris).unwrap();
    match &metrics {
        MetricsResult::Binomial(m) => assert!(m.auc > 0.5),
        other => panic!("expected binomial metrics, got {:?}", other),
    }
    let cm = metrics.confusion_matrix().unwrap();
    assert_eq!(cm.class_labels(), vec!["0", "1"]);
    assert_eq!(cm, model.confusion_matrix(&fx.iris).unwrap());
    model.detach();
}

#[test]
fn test_clustering_metrics() {
    let fx = Fixture::new();
    let model = fx.model("iris_km", MemoryModel::kmeans(3));
    match model.evaluate_metrics(&fx.iris).unwrap() {
        MetricsResult::Clustering(m) => assert_eq!(m.size.len(), 3),
        other => panic!("expected clustering metrics, got {:?}", other),
    }
    model.detach();
}

#[test]
fn test_regression_metrics_display() {
    let fx = Fixture::new();
    let model = fx.model("ozone_glm", MemoryModel::regression("glm"));
    let metrics = model.evaluate_metrics(&fx.iris).unwrap();
    insta::assert_snapshot!(metrics.to_string(), @r"
    Regression metrics:
    MSE: 1.5
    R^2: 0.82
    mean residual deviance: 1.5
    ");
    model.detach();
}

// ============================================================================
// Deep features
// ============================================================================

#[test]
fn test_extract_first_hidden_layer() {
    let fx = Fixture::new();
    let model = fx.model(
        "iris_dl",
        MemoryModel::classifier("deeplearning", &IRIS_CLASSES).with_hidden_layers(vec![10, 10, 5]),
    );

    let features = model.extract_features(&fx.iris, 0).unwrap();
    assert_eq!(features.row_count(), 150);
    assert_eq!(features.column_count(), 10);
    assert!(fx.temporaries().is_empty());
    model.detach();
}

#[test]
fn test_extract_missing_layer_is_remote_error() {
    let fx = Fixture::new();
    let model = fx.model("iris_gbm", MemoryModel::classifier("gbm", &IRIS_CLASSES));
    let err = model.extract_features(&fx.iris, 0).unwrap_err();
    assert!(err.is_remote());
    assert!(fx.temporaries().is_empty());
    model.detach();
}

// ============================================================================
// Render and lifetime
// ============================================================================

#[test]
fn test_render_is_idempotent() {
    let fx = Fixture::new();
    let model = fx.model("iris_km", MemoryModel::kmeans(3));
    let rendered = model.render();
    assert_eq!(rendered, model.render());
    assert!(rendered.starts_with("Model Details:"));
    assert!(rendered.contains("Cluster Size[k]:"));
    assert!(rendered.contains("Cluster Centers"));
    assert!(!rendered.contains("not shown"));
    model.detach();
}

#[test]
fn test_model_lifetime() {
    let fx = Fixture::new();

    let model = fx.model("a", MemoryModel::regression("glm"));
    model.release().unwrap();
    assert!(!fx.cluster.contains_key("a"));

    let model = fx.model("b", MemoryModel::regression("glm"));
    drop(model);
    assert!(!fx.cluster.contains_key("b"));

    let model = fx.model("c", MemoryModel::regression("glm"));
    let key = model.detach();
    assert!(fx.cluster.contains_key(key.as_str()));
}

#[test]
fn test_explicit_release_reports_failure() {
    let fx = Fixture::new();
    let model = fx.model("a", MemoryModel::regression("glm"));
    fx.cluster.fail_next_matching(
        |e| matches!(e, Endpoint::Remove(_)),
        TransportError::Timeout(60),
    );
    assert!(matches!(model.release(), Err(ProxyError::Release { .. })));
}

#[test]
fn test_shared_uploader_prefix() {
    let fx = Fixture::new();
    let uploader = ArtifactUploader::with_generator(
        fx.transport(),
        Arc::new(clusterproxy::key::TempKeyGenerator::new("scoring")),
    );
    let model = fx
        .model("iris_gbm", MemoryModel::classifier("gbm", &IRIS_CLASSES))
        .with_uploader(uploader);
    fx.cluster.clear_requests();

    model.predict(&fx.iris).unwrap();
    let bind = &fx.cluster.requests()[0];
    assert!(bind.params["destination_key"]
        .as_str()
        .unwrap()
        .starts_with("scoring_"));
    model.detach();
}

#[test]
fn test_frame_scope_releases_results() {
    let fx = Fixture::new();
    let model = fx.model("iris_gbm", MemoryModel::classifier("gbm", &IRIS_CLASSES));
    let frames_before = fx.cluster.frame_count();
    {
        let mut scope = FrameScope::new(&*fx.cluster);
        let first = scope.track(model.predict(&fx.iris).unwrap());
        let second = scope.track(model.predict(&fx.iris).unwrap());
        assert_ne!(first.frame_key(), second.frame_key());
        assert_eq!(fx.cluster.frame_count(), frames_before + 2);
    }
    assert_eq!(fx.cluster.frame_count(), frames_before);
    model.detach();
}
