//! In-process cluster.
//!
//! [`MemoryCluster`] implements [`ClusterTransport`] over a local key space so
//! that proxies can be exercised without a running cluster. It keeps only
//! what the proxies can observe (keys, labels, row counts, model responses)
//! and records every request it receives.
//!
//! Removing a frame also removes those of its columns that no other frame
//! still references, mirroring how the cluster reference-counts columns
//! shared between frames.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::error::{TransportError, TransportResult};
use super::protocol::{
    BindParams, Endpoint, ImportParams, Method, PredictParams, SplitParams, UploadColumnParams,
};
use super::ClusterTransport;
use crate::key::RemoteKey;

/// A request as received by the in-process cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub params: Value,
}

impl RecordedRequest {
    /// The endpoint this request addressed, if it was a known one.
    pub fn endpoint(&self) -> Option<Endpoint> {
        Endpoint::parse(self.method, &self.path)
    }
}

/// A model resident in a [`MemoryCluster`].
#[derive(Debug, Clone)]
pub struct MemoryModel {
    algo: String,
    category: String,
    response_labels: Vec<String>,
    hidden_units: Vec<usize>,
    metrics: Value,
    output: Value,
}

impl MemoryModel {
    /// A classifier predicting one of `classes`.
    ///
    /// Predictions carry a `predict` column plus one probability column per
    /// class; two classes make a binomial model, more a multinomial one.
    pub fn classifier(algo: &str, classes: &[&str]) -> Self {
        let binomial = classes.len() == 2;
        let mut labels = vec!["predict".to_string()];
        labels.extend(classes.iter().map(|c| c.to_string()));

        let cm = confusion_table(classes);
        let metrics = if binomial {
            json!({"MSE": 0.09, "AUC": 0.97, "logloss": 0.21, "cm": {"table": cm}})
        } else {
            json!({"MSE": 0.04, "logloss": 0.12, "hit_ratios": [0.96, 1.0], "cm": {"table": cm}})
        };

        Self {
            algo: algo.to_string(),
            category: if binomial { "Binomial" } else { "Multinomial" }.to_string(),
            response_labels: labels,
            hidden_units: Vec::new(),
            metrics,
            output: json!({
                "help": {
                    "names": "Column names",
                    "domains": "Domains for categorical columns",
                    "model_category": "Category of the model"
                },
                "names": [],
                "domains": [classes],
            }),
        }
    }

    /// A regression model predicting one numeric column.
    pub fn regression(algo: &str) -> Self {
        Self {
            algo: algo.to_string(),
            category: "Regression".to_string(),
            response_labels: vec!["predict".to_string()],
            hidden_units: Vec::new(),
            metrics: json!({"MSE": 1.5, "r2": 0.82, "mean_residual_deviance": 1.5}),
            output: json!({
                "help": {"model_category": "Category of the model"},
            }),
        }
    }

    /// A k-means clustering model with `k` clusters.
    pub fn kmeans(k: usize) -> Self {
        let size: Vec<u64> = vec![10; k];
        Self {
            algo: "kmeans".to_string(),
            category: "Clustering".to_string(),
            response_labels: vec!["predict".to_string()],
            hidden_units: Vec::new(),
            metrics: json!({
                "avg_within_ss": 0.42,
                "avg_between_ss": 3.1,
                "avg_ss": 3.52,
                "size": size,
            }),
            output: json!({
                "help": {
                    "size": "Cluster Size[k]",
                    "avg_within_ss": "Average within cluster Mean Square Error",
                    "iterations": "Iterations executed",
                    "centers": "Cluster Centers[k][features]",
                    "_internal": "not shown",
                    "model_category": "Category of the model"
                },
                "size": size,
                "avg_within_ss": 0.42,
                "iterations": 7,
                "_internal": 1,
                "centers": {
                    "name": "Cluster Centers",
                    "columns": [{"name": "x", "type": "double"}, {"name": "y", "type": "double"}],
                    "data": [vec![0.5; k], vec![1.5; k]]
                }
            }),
        }
    }

    /// Give the model hidden layers with the given unit counts.
    pub fn with_hidden_layers(mut self, units: Vec<usize>) -> Self {
        self.hidden_units = units;
        self
    }

    fn describe(&self, key: &str) -> Value {
        let mut output = self.output.clone();
        if let Value::Object(map) = &mut output {
            map.insert("model_category".to_string(), json!(self.category));
        }
        json!({
            "model_id": {"name": key},
            "algo": self.algo,
            "output": output,
        })
    }
}

fn confusion_table(classes: &[&str]) -> Value {
    let n = classes.len();
    let mut columns: Vec<Value> = classes
        .iter()
        .map(|c| json!({"name": c, "type": "long"}))
        .collect();
    columns.push(json!({"name": "Error", "type": "double"}));

    let mut data: Vec<Value> = (0..n)
        .map(|col| {
            let cells: Vec<u64> = (0..n).map(|row| if row == col { 50 } else { 0 }).collect();
            json!(cells)
        })
        .collect();
    data.push(json!(vec![0.0; n]));

    json!({"name": "Confusion Matrix", "columns": columns, "data": data})
}

#[derive(Debug, Clone)]
struct StoredFrame {
    rows: u64,
    columns: Vec<(String, String)>,
}

type FailurePredicate = Box<dyn Fn(&Endpoint) -> bool + Send>;

/// When an injected failure fires relative to the request being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePoint {
    /// The request never reaches the key space.
    BeforeApply,
    /// The request is applied but its reply is lost.
    AfterApply,
}

struct InjectedFailure {
    matches: FailurePredicate,
    point: FailurePoint,
    error: TransportError,
}

#[derive(Default)]
struct State {
    vecs: BTreeMap<String, u64>,
    frames: BTreeMap<String, StoredFrame>,
    models: BTreeMap<String, MemoryModel>,
    requests: Vec<RecordedRequest>,
    failures: VecDeque<InjectedFailure>,
    next_id: u64,
}

impl State {
    fn mint(&mut self, prefix: &str) -> String {
        loop {
            self.next_id += 1;
            let key = format!("{}_{}", prefix, self.next_id);
            if !self.contains(&key) {
                return key;
            }
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.vecs.contains_key(key) || self.frames.contains_key(key) || self.models.contains_key(key)
    }

    fn frame(&self, key: &RemoteKey) -> TransportResult<&StoredFrame> {
        self.frames.get(key.as_str()).ok_or_else(|| not_found(key))
    }

    fn model(&self, key: &RemoteKey) -> TransportResult<&MemoryModel> {
        self.models.get(key.as_str()).ok_or_else(|| not_found(key))
    }

    /// Create a frame with fresh columns.
    fn create_frame(&mut self, key: String, labels: &[String], rows: u64) -> String {
        let columns = labels
            .iter()
            .map(|label| {
                let vec_key = self.mint("vec");
                self.vecs.insert(vec_key.clone(), rows);
                (label.clone(), vec_key)
            })
            .collect();
        self.frames.insert(key.clone(), StoredFrame { rows, columns });
        key
    }

    fn remove_frame(&mut self, key: &str) {
        if let Some(frame) = self.frames.remove(key) {
            for (_, vec_key) in frame.columns {
                let shared = self
                    .frames
                    .values()
                    .any(|f| f.columns.iter().any(|(_, k)| *k == vec_key));
                if !shared {
                    self.vecs.remove(&vec_key);
                }
            }
        }
    }

    fn take_failure(&mut self, endpoint: &Endpoint) -> Option<(FailurePoint, TransportError)> {
        let pos = self.failures.iter().position(|f| (f.matches)(endpoint))?;
        self.failures.remove(pos).map(|f| (f.point, f.error))
    }
}

fn not_found(key: &RemoteKey) -> TransportError {
    TransportError::remote("NOT_FOUND", format!("key '{}' not found", key))
}

fn illegal(message: impl Into<String>) -> TransportError {
    TransportError::remote("ILLEGAL_ARGUMENT", message)
}

fn parse_params<T: DeserializeOwned>(params: Value) -> TransportResult<T> {
    serde_json::from_value(params).map_err(|e| illegal(format!("bad parameters: {}", e)))
}

/// An in-process stand-in for the cluster.
///
/// # Example
///
/// ```
/// use clusterproxy::transport::{MemoryCluster, MemoryModel};
///
/// let cluster = MemoryCluster::new();
/// let iris = cluster.insert_frame("iris.hex", &["sepal_len", "class"], 150);
/// cluster.insert_model("gbm", MemoryModel::classifier("gbm", &["a", "b", "c"]));
/// assert!(cluster.contains_key(iris.as_str()));
/// assert_eq!(cluster.request_count(), 0);
/// ```
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl MemoryCluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the maps consistent enough
        // for test inspection.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a frame with `rows` rows and one fresh column per label.
    pub fn insert_frame(&self, key: &str, labels: &[&str], rows: u64) -> RemoteKey {
        let labels: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        let mut state = self.lock();
        state.remove_frame(key);
        RemoteKey::from_cluster(state.create_frame(key.to_string(), &labels, rows))
    }

    /// Store a model.
    pub fn insert_model(&self, key: &str, model: MemoryModel) -> RemoteKey {
        self.lock().models.insert(key.to_string(), model);
        RemoteKey::from_cluster(key)
    }

    /// Whether any artifact is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let state = self.lock();
        let mut keys: Vec<String> = state
            .vecs
            .keys()
            .chain(state.frames.keys())
            .chain(state.models.keys())
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Number of stored frames.
    pub fn frame_count(&self) -> usize {
        self.lock().frames.len()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// All requests received so far, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// Forget the request log.
    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    /// Fail the next request whose endpoint satisfies `matches` with `error`.
    ///
    /// Failures are matched in the order they were registered and each fires
    /// once. The failing request is still recorded.
    pub fn fail_next_matching<F>(&self, matches: F, error: TransportError)
    where
        F: Fn(&Endpoint) -> bool + Send + 'static,
    {
        self.inject(Box::new(matches), FailurePoint::BeforeApply, error);
    }

    /// Apply the next request whose endpoint satisfies `matches`, then
    /// report `error` instead of its reply.
    ///
    /// This stands in for a reply lost to a timeout or a dropped connection
    /// after the cluster already acted on the request. Shares the queue of
    /// [`MemoryCluster::fail_next_matching`].
    pub fn lose_next_reply_matching<F>(&self, matches: F, error: TransportError)
    where
        F: Fn(&Endpoint) -> bool + Send + 'static,
    {
        self.inject(Box::new(matches), FailurePoint::AfterApply, error);
    }

    fn inject(&self, matches: FailurePredicate, point: FailurePoint, error: TransportError) {
        self.lock().failures.push_back(InjectedFailure {
            matches,
            point,
            error,
        });
    }

    fn dispatch(&self, state: &mut State, endpoint: Endpoint, params: Value) -> TransportResult<Value> {
        match endpoint {
            Endpoint::Predictions { model, frame } => {
                let params: PredictParams = parse_params(params)?;
                let rows = state.frame(&frame)?.rows;
                let model_def = state.model(&model)?.clone();

                match params.deep_features_hidden_layer {
                    Some(layer) => {
                        let units = model_def.hidden_units.get(layer as usize).ok_or_else(|| {
                            illegal(format!(
                                "hidden layer {} out of range; model has {} hidden layers",
                                layer,
                                model_def.hidden_units.len()
                            ))
                        })?;
                        let labels: Vec<String> = (0..*units)
                            .map(|i| format!("DF.L{}.C{}", layer + 1, i + 1))
                            .collect();
                        let key = state.mint("deepfeatures");
                        let key = state.create_frame(key, &labels, rows);
                        Ok(json!({"destination_key": {"name": key}}))
                    }
                    None => {
                        let key = state.mint("prediction");
                        let key = state.create_frame(key, &model_def.response_labels, rows);
                        let mut metrics = model_def.metrics.clone();
                        if let Value::Object(map) = &mut metrics {
                            map.insert("predictions".to_string(), json!({"key": {"name": key}}));
                        }
                        Ok(json!({"model_metrics": [metrics]}))
                    }
                }
            }

            Endpoint::ModelMetrics { model, frame } => {
                state.frame(&frame)?;
                let metrics = state.model(&model)?.metrics.clone();
                Ok(json!({"model_metrics": [metrics]}))
            }

            Endpoint::Frame(key) => {
                let frame = state.frame(&key)?;
                let vec_keys: Vec<Value> = frame
                    .columns
                    .iter()
                    .map(|(_, k)| json!({"name": k}))
                    .collect();
                let columns: Vec<Value> = frame
                    .columns
                    .iter()
                    .map(|(label, _)| json!({"label": label}))
                    .collect();
                Ok(json!({"frames": [{
                    "frame_id": {"name": key.as_str()},
                    "rows": frame.rows,
                    "vec_keys": vec_keys,
                    "columns": columns,
                }]}))
            }

            Endpoint::Model(key) => {
                let model = state.model(&key)?;
                Ok(json!({"models": [model.describe(key.as_str())]}))
            }

            Endpoint::Remove(key) => {
                let name = key.as_str();
                if state.frames.contains_key(name) {
                    state.remove_frame(name);
                } else if state.vecs.remove(name).is_none() && state.models.remove(name).is_none() {
                    return Err(not_found(&key));
                }
                Ok(json!({}))
            }

            Endpoint::Keys => {
                let mut keys: Vec<&String> = state
                    .vecs
                    .keys()
                    .chain(state.frames.keys())
                    .chain(state.models.keys())
                    .collect();
                keys.sort();
                let keys: Vec<Value> = keys.into_iter().map(|k| json!({"name": k})).collect();
                Ok(json!({"keys": keys}))
            }

            Endpoint::SplitFrame => {
                let params: SplitParams = parse_params(params)?;
                let source = state.frame(&params.dataset)?.clone();
                let labels: Vec<String> = source.columns.iter().map(|(l, _)| l.clone()).collect();

                let mut boundaries = vec![0u64];
                let mut cumulative = 0.0;
                for ratio in &params.ratios {
                    cumulative += ratio;
                    let b = (source.rows as f64 * cumulative).round() as u64;
                    boundaries.push(b.min(source.rows));
                }
                boundaries.push(source.rows);

                let mut splits = Vec::new();
                for (i, pair) in boundaries.windows(2).enumerate() {
                    let rows = pair[1].saturating_sub(pair[0]);
                    let key = state.mint(&format!("split{}", i));
                    let key = state.create_frame(key, &labels, rows);
                    splits.push(json!({"name": key}));
                }

                let job = state.mint("split_job");
                Ok(json!({"jobs": [{
                    "dest": {"name": job},
                    "status": "DONE",
                    "output": {"splits": splits},
                }]}))
            }

            Endpoint::UploadColumn => {
                let params: UploadColumnParams = parse_params(params)?;
                let key = state.mint("vec");
                state.vecs.insert(key.clone(), params.values.len() as u64);
                Ok(json!({"key": {"name": key}}))
            }

            Endpoint::BindColumns => {
                let params: BindParams = parse_params(params)?;
                if params.labels.len() != params.vec_keys.len() {
                    return Err(illegal("labels and vec_keys differ in length"));
                }
                if state.contains(params.destination_key.as_str()) {
                    return Err(TransportError::remote(
                        "KEY_EXISTS",
                        format!("key '{}' already exists", params.destination_key),
                    ));
                }
                let mut rows = None;
                for key in &params.vec_keys {
                    let len = *state.vecs.get(key.as_str()).ok_or_else(|| not_found(key))?;
                    if rows.is_some_and(|r| r != len) {
                        return Err(illegal("cannot bind columns of different lengths"));
                    }
                    rows = Some(len);
                }
                let columns = params
                    .labels
                    .into_iter()
                    .zip(params.vec_keys.iter().map(|k| k.as_str().to_string()))
                    .collect();
                state.frames.insert(
                    params.destination_key.as_str().to_string(),
                    StoredFrame {
                        rows: rows.unwrap_or(0),
                        columns,
                    },
                );
                Ok(json!({"destination_key": {"name": params.destination_key.as_str()}}))
            }

            Endpoint::ImportFiles => {
                let params: ImportParams = parse_params(params)?;
                let content = std::fs::read_to_string(&params.path).map_err(|e| {
                    TransportError::remote(
                        "FILE_NOT_FOUND",
                        format!("cannot read {}: {}", params.path, e),
                    )
                })?;
                let mut lines = content.lines().filter(|l| !l.trim().is_empty());
                let labels: Vec<String> = lines
                    .next()
                    .ok_or_else(|| illegal(format!("{} is empty", params.path)))?
                    .split(',')
                    .map(|l| l.trim().trim_matches('"').to_string())
                    .collect();
                let rows = lines.count() as u64;

                let key = match params.destination_key {
                    Some(key) => key.into_inner(),
                    None => {
                        let stem = Path::new(&params.path)
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .unwrap_or("import");
                        format!("{}.hex", stem)
                    }
                };
                state.remove_frame(&key);
                let key = state.create_frame(key, &labels, rows);
                Ok(json!({"destination_key": {"name": key}}))
            }
        }
    }
}

impl ClusterTransport for MemoryCluster {
    fn request(&self, method: Method, path: &str, params: Value) -> TransportResult<Value> {
        let mut state = self.lock();
        state.requests.push(RecordedRequest {
            method,
            path: path.to_string(),
            params: params.clone(),
        });

        let endpoint = Endpoint::parse(method, path).ok_or_else(|| {
            TransportError::Status {
                status: 404,
                body: format!("no route for {} {}", method, path),
            }
        })?;

        match state.take_failure(&endpoint) {
            Some((FailurePoint::BeforeApply, err)) => Err(err),
            Some((FailurePoint::AfterApply, err)) => {
                let _ = self.dispatch(&mut state, endpoint, params);
                Err(err)
            }
            None => self.dispatch(&mut state, endpoint, params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ClusterTransportExt;
    use crate::transport::protocol::{FramesResponse, SplitResponse};

    #[test]
    fn test_describe_inserted_frame() {
        let cluster = MemoryCluster::new();
        cluster.insert_frame("iris.hex", &["a", "b", "c"], 150);

        let response: FramesResponse = cluster
            .call(&Endpoint::Frame(RemoteKey::from_cluster("iris.hex")), json!({}))
            .unwrap();
        let frame = response.frame().unwrap();
        assert_eq!(frame.rows, 150);
        assert_eq!(frame.columns.len(), 3);
        assert_eq!(cluster.request_count(), 1);
    }

    #[test]
    fn test_key_with_path_characters() {
        let cluster = MemoryCluster::new();
        cluster.insert_frame("data/iris v2.hex", &["a"], 10);
        cluster.insert_frame("data", &["b"], 5);

        let key = RemoteKey::from_cluster("data/iris v2.hex");
        let response: FramesResponse = cluster.call(&Endpoint::Frame(key.clone()), json!({})).unwrap();
        assert_eq!(response.frame().unwrap().rows, 10);

        cluster.remove(&key).unwrap();
        assert!(!cluster.contains_key("data/iris v2.hex"));
        assert!(cluster.contains_key("data"));
    }

    #[test]
    fn test_unknown_key_is_remote_error() {
        let cluster = MemoryCluster::new();
        let err = cluster
            .request(Method::Get, "Frames/missing", json!({}))
            .unwrap_err();
        assert!(err.is_remote());
    }

    #[test]
    fn test_unknown_route() {
        let cluster = MemoryCluster::new();
        let err = cluster.request(Method::Get, "Bogus", json!({})).unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 404, .. }));
    }

    #[test]
    fn test_split_boundaries() {
        let cluster = MemoryCluster::new();
        cluster.insert_frame("f", &["x"], 75);

        let response: SplitResponse = cluster
            .call(
                &Endpoint::SplitFrame,
                SplitParams {
                    dataset: RemoteKey::from_cluster("f"),
                    ratios: vec![0.5],
                },
            )
            .unwrap();
        let splits = &response.job().unwrap().output.splits;
        assert_eq!(splits.len(), 2);

        let rows: Vec<u64> = splits
            .iter()
            .map(|s| {
                let r: FramesResponse = cluster.call(&Endpoint::Frame(s.name.clone()), json!({})).unwrap();
                r.frame().unwrap().rows
            })
            .collect();
        assert_eq!(rows.iter().sum::<u64>(), 75);
    }

    #[test]
    fn test_remove_frame_keeps_shared_columns() {
        let cluster = MemoryCluster::new();
        cluster.insert_frame("base", &["x"], 10);
        let describe: FramesResponse = cluster
            .call(&Endpoint::Frame(RemoteKey::from_cluster("base")), json!({}))
            .unwrap();
        let vec_key = describe.frame().unwrap().vec_keys[0].name.clone();

        cluster
            .call::<_, Value>(
                &Endpoint::BindColumns,
                BindParams {
                    destination_key: RemoteKey::from_cluster("copy"),
                    vec_keys: vec![vec_key.clone()],
                    labels: vec!["x".to_string()],
                },
            )
            .unwrap();

        cluster.remove(&RemoteKey::from_cluster("copy")).unwrap();
        assert!(!cluster.contains_key("copy"));
        assert!(cluster.contains_key(vec_key.as_str()));

        cluster.remove(&RemoteKey::from_cluster("base")).unwrap();
        assert!(!cluster.contains_key(vec_key.as_str()));
    }

    #[test]
    fn test_failure_injection_fires_once() {
        let cluster = MemoryCluster::new();
        cluster.fail_next_matching(
            |e| matches!(e, Endpoint::Keys),
            TransportError::Timeout(1),
        );
        assert!(cluster.request(Method::Get, "DKV", json!({})).is_err());
        assert!(cluster.request(Method::Get, "DKV", json!({})).is_ok());
        assert_eq!(cluster.request_count(), 2);
    }

    #[test]
    fn test_lost_reply_still_applies_request() {
        let cluster = MemoryCluster::new();
        cluster.insert_frame("f", &["x"], 3);
        cluster.lose_next_reply_matching(
            |e| matches!(e, Endpoint::Remove(_)),
            TransportError::Timeout(60),
        );

        let err = cluster.remove(&RemoteKey::from_cluster("f")).unwrap_err();
        assert!(matches!(err, TransportError::Timeout(60)));
        assert!(!cluster.contains_key("f"));
        assert_eq!(cluster.request_count(), 1);
    }

    #[test]
    fn test_bind_rejects_mismatched_lengths() {
        let cluster = MemoryCluster::new();
        let a: Value = cluster
            .call(
                &Endpoint::UploadColumn,
                UploadColumnParams {
                    label: "a".into(),
                    values: vec![1.0, 2.0],
                },
            )
            .unwrap();
        let b: Value = cluster
            .call(
                &Endpoint::UploadColumn,
                UploadColumnParams {
                    label: "b".into(),
                    values: vec![1.0],
                },
            )
            .unwrap();
        let key = |v: &Value| RemoteKey::from_cluster(v["key"]["name"].as_str().unwrap());

        let err = cluster
            .call::<_, Value>(
                &Endpoint::BindColumns,
                BindParams {
                    destination_key: RemoteKey::from_cluster("bound"),
                    vec_keys: vec![key(&a), key(&b)],
                    labels: vec!["a".into(), "b".into()],
                },
            )
            .unwrap_err();
        assert!(err.is_remote());
    }
}
