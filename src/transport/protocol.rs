//! Request and response schemas for the cluster REST API.
//!
//! Every response this crate reads is deserialized into one of the explicit
//! schemas below. Anything that does not fit is reported as
//! [`TransportError::InvalidResponse`] rather than defaulted.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

use super::error::{TransportError, TransportResult};
use crate::key::RemoteKey;
use crate::model::TwoDimTable;

// ============================================================================
// Methods and Endpoints
// ============================================================================

/// HTTP-style request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bytes escaped when a key becomes one URL path segment.
const KEY_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn segment(key: &RemoteKey) -> impl fmt::Display + '_ {
    utf8_percent_encode(key.as_str(), KEY_SEGMENT)
}

/// A resource and action on the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Run inference for a model over a frame (also deep features).
    Predictions { model: RemoteKey, frame: RemoteKey },
    /// Compute metrics for a model over a frame.
    ModelMetrics { model: RemoteKey, frame: RemoteKey },
    /// Describe a frame.
    Frame(RemoteKey),
    /// Describe a model.
    Model(RemoteKey),
    /// Delete a key and its subparts.
    Remove(RemoteKey),
    /// List all keys.
    Keys,
    /// Split a frame by ratios.
    SplitFrame,
    /// Push one in-memory column.
    UploadColumn,
    /// Bind columns into a new frame.
    BindColumns,
    /// Import and parse a file visible to the cluster.
    ImportFiles,
}

impl Endpoint {
    /// The method this endpoint is served under.
    pub fn method(&self) -> Method {
        match self {
            Endpoint::Frame(_) | Endpoint::Model(_) | Endpoint::Keys => Method::Get,
            Endpoint::Remove(_) => Method::Delete,
            _ => Method::Post,
        }
    }

    /// Resource path, relative to the API version root.
    ///
    /// Keys are percent-encoded so that each occupies exactly one segment.
    pub fn path(&self) -> String {
        match self {
            Endpoint::Predictions { model, frame } => format!(
                "Predictions/models/{}/frames/{}",
                segment(model),
                segment(frame)
            ),
            Endpoint::ModelMetrics { model, frame } => format!(
                "ModelMetrics/models/{}/frames/{}",
                segment(model),
                segment(frame)
            ),
            Endpoint::Frame(key) => format!("Frames/{}", segment(key)),
            Endpoint::Model(key) => format!("Models/{}", segment(key)),
            Endpoint::Remove(key) => format!("DKV/{}", segment(key)),
            Endpoint::Keys => "DKV".to_string(),
            Endpoint::SplitFrame => "SplitFrame".to_string(),
            Endpoint::UploadColumn => "Vecs".to_string(),
            Endpoint::BindColumns => "CBind".to_string(),
            Endpoint::ImportFiles => "ImportFiles".to_string(),
        }
    }

    /// Recover an endpoint from a method and path.
    pub fn parse(method: Method, path: &str) -> Option<Self> {
        let decoded = path
            .trim_matches('/')
            .split('/')
            .map(|s| percent_decode_str(s).decode_utf8().ok())
            .collect::<Option<Vec<_>>>()?;
        let segments: Vec<&str> = decoded.iter().map(|s| s.as_ref()).collect();
        fn key(s: &str) -> RemoteKey {
            RemoteKey::from_cluster(s)
        }

        let endpoint = match (method, segments.as_slice()) {
            (Method::Post, ["Predictions", "models", m, "frames", f]) => Endpoint::Predictions {
                model: key(m),
                frame: key(f),
            },
            (Method::Post, ["ModelMetrics", "models", m, "frames", f]) => Endpoint::ModelMetrics {
                model: key(m),
                frame: key(f),
            },
            (Method::Get, ["Frames", k]) => Endpoint::Frame(key(k)),
            (Method::Get, ["Models", k]) => Endpoint::Model(key(k)),
            (Method::Delete, ["DKV", k]) => Endpoint::Remove(key(k)),
            (Method::Get, ["DKV"]) => Endpoint::Keys,
            (Method::Post, ["SplitFrame"]) => Endpoint::SplitFrame,
            (Method::Post, ["Vecs"]) => Endpoint::UploadColumn,
            (Method::Post, ["CBind"]) => Endpoint::BindColumns,
            (Method::Post, ["ImportFiles"]) => Endpoint::ImportFiles,
            _ => return None,
        };
        Some(endpoint)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method(), self.path())
    }
}

// ============================================================================
// Shared Shapes
// ============================================================================

/// A key reference as it appears in responses: either a bare string or an
/// object with a `name` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "KeyRepr")]
pub struct KeyRef {
    pub name: RemoteKey,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyRepr {
    Bare(String),
    Named { name: String },
}

impl From<KeyRepr> for KeyRef {
    fn from(repr: KeyRepr) -> Self {
        let name = match repr {
            KeyRepr::Bare(name) | KeyRepr::Named { name } => name,
        };
        KeyRef {
            name: RemoteKey::from_cluster(name),
        }
    }
}

impl From<RemoteKey> for KeyRef {
    fn from(name: RemoteKey) -> Self {
        KeyRef { name }
    }
}

/// Parameters for requests that take none.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NoParams {}

/// Take the first element of a response array, or fail naming the field.
pub(crate) fn first<'a, T>(items: &'a [T], field: &str) -> TransportResult<&'a T> {
    items
        .first()
        .ok_or_else(|| TransportError::invalid_response(format!("`{}` array is empty", field)))
}

// ============================================================================
// Request Parameters
// ============================================================================

/// Parameters for `Predictions/models/{m}/frames/{f}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictParams {
    /// Zero-indexed hidden layer to extract instead of predictions.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deep_features_hidden_layer: Option<u32>,
}

/// Parameters for `Vecs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadColumnParams {
    pub label: String,
    pub values: Vec<f64>,
}

/// Parameters for `CBind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindParams {
    pub destination_key: RemoteKey,
    pub vec_keys: Vec<RemoteKey>,
    pub labels: Vec<String>,
}

/// Parameters for `SplitFrame`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitParams {
    pub dataset: RemoteKey,
    pub ratios: Vec<f64>,
}

/// Parameters for `ImportFiles`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportParams {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub destination_key: Option<RemoteKey>,
}

// ============================================================================
// Responses
// ============================================================================

/// Response of `Predictions/models/{m}/frames/{f}` without a hidden layer.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionsResponse {
    pub model_metrics: Vec<PredictionMetrics>,
}

/// One element of `model_metrics` in a predictions response.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionMetrics {
    pub predictions: PredictionsRef,
    #[serde(default)]
    pub cm: Option<ConfusionMatrixEnvelope>,
}

/// The `predictions` object naming the result frame.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionsRef {
    pub key: KeyRef,
}

/// The `cm` object wrapping a confusion-matrix table.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfusionMatrixEnvelope {
    pub table: TwoDimTable,
}

impl PredictionsResponse {
    /// The single metrics element the cluster returns.
    pub fn metrics(&self) -> TransportResult<&PredictionMetrics> {
        first(&self.model_metrics, "model_metrics")
    }
}

/// Response of `ModelMetrics/models/{m}/frames/{f}`.
///
/// The element payload is kept raw here and parsed according to the
/// model's metrics kind.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsResponse {
    pub model_metrics: Vec<serde_json::Value>,
}

impl MetricsResponse {
    /// The single metrics element the cluster returns.
    pub fn metrics(&self) -> TransportResult<&serde_json::Value> {
        first(&self.model_metrics, "model_metrics")
    }
}

/// Response of a deep-features request.
#[derive(Debug, Clone, Deserialize)]
pub struct DeepFeaturesResponse {
    pub destination_key: KeyRef,
}

/// Response of `Frames/{key}`.
#[derive(Debug, Clone, Deserialize)]
pub struct FramesResponse {
    pub frames: Vec<FrameSummary>,
}

impl FramesResponse {
    /// The described frame.
    pub fn frame(&self) -> TransportResult<&FrameSummary> {
        first(&self.frames, "frames")
    }
}

/// Frame metadata: row count, column keys and labels.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameSummary {
    #[serde(default)]
    pub frame_id: Option<KeyRef>,
    pub rows: u64,
    pub vec_keys: Vec<KeyRef>,
    pub columns: Vec<ColumnSummary>,
}

/// Per-column metadata inside a frame description.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSummary {
    pub label: String,
}

/// Response of `SplitFrame`.
#[derive(Debug, Clone, Deserialize)]
pub struct SplitResponse {
    pub jobs: Vec<JobDescriptor>,
}

impl SplitResponse {
    /// The single job the split ran as.
    pub fn job(&self) -> TransportResult<&JobDescriptor> {
        first(&self.jobs, "jobs")
    }
}

/// A finished job and what it produced.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDescriptor {
    pub dest: KeyRef,
    #[serde(default)]
    pub status: Option<String>,
    pub output: SplitOutput,
}

/// Output of a split job: partition keys in order.
#[derive(Debug, Clone, Deserialize)]
pub struct SplitOutput {
    pub splits: Vec<KeyRef>,
}

/// Response of `Models/{key}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<serde_json::Value>,
}

impl ModelsResponse {
    /// The described model's full metadata tree.
    pub fn model(&self) -> TransportResult<&serde_json::Value> {
        first(&self.models, "models")
    }
}

/// Identity fields read from a model description.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSummary {
    pub model_id: KeyRef,
    #[serde(default)]
    pub algo: Option<String>,
    #[serde(default)]
    pub output: ModelOutputSummary,
}

/// The part of a model's `output` that selects its metrics kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelOutputSummary {
    #[serde(default)]
    pub model_category: Option<String>,
}

/// Response of `Vecs`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub key: KeyRef,
}

/// Response of `CBind`.
#[derive(Debug, Clone, Deserialize)]
pub struct BindResponse {
    pub destination_key: KeyRef,
}

/// Response of `ImportFiles`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportResponse {
    pub destination_key: KeyRef,
}

/// Response of `DKV`.
#[derive(Debug, Clone, Deserialize)]
pub struct KeysResponse {
    pub keys: Vec<KeyRef>,
}

/// Error body the cluster sends alongside a failing status.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub exception_msg: Option<String>,
}

impl ErrorEnvelope {
    /// Error code, falling back to the HTTP status.
    pub fn code(&self, status: u16) -> String {
        self.error_code
            .clone()
            .unwrap_or_else(|| self.http_status.unwrap_or(status).to_string())
    }

    /// Most specific message available.
    pub fn message(&self) -> String {
        self.exception_msg
            .clone()
            .or_else(|| self.msg.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}
