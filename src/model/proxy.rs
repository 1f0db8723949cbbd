//! Model proxies.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::metrics::{MetricsKind, MetricsResult};
use super::render::render;
use super::table::ConfusionMatrix;
use crate::error::{ProxyError, ProxyResult};
use crate::frame::DatasetHandle;
use crate::key::RemoteKey;
use crate::stage::{release_quietly, ArtifactUploader, StageInput};
use crate::transport::protocol::{
    DeepFeaturesResponse, MetricsResponse, ModelSummary, ModelsResponse, PredictParams,
    PredictionsResponse,
};
use crate::transport::{ClusterTransport, ClusterTransportExt, Endpoint, NoParams, TransportError};

/// Local proxy for a trained model stored on the cluster.
///
/// Every operation that reads an input frame stages the input as a
/// temporary artifact, issues one request, and releases the temporary
/// before returning, whether the request succeeded or not. Results are
/// new datasets owned by the caller.
///
/// The proxy owns the remote model. [`ModelProxy::release`] deletes it and
/// reports failure; [`ModelProxy::detach`] gives the key back without
/// deleting anything. A proxy dropped without either deletes the model and
/// logs any failure.
pub struct ModelProxy {
    key: RemoteKey,
    metadata: Value,
    kind: MetricsKind,
    uploader: ArtifactUploader,
    released: bool,
}

impl ModelProxy {
    pub fn new(
        transport: Arc<dyn ClusterTransport>,
        key: RemoteKey,
        metadata: Value,
        kind: MetricsKind,
    ) -> Self {
        Self {
            key,
            metadata,
            kind,
            uploader: ArtifactUploader::new(transport),
            released: false,
        }
    }

    /// Fetch the description of model `key` and build a proxy for it.
    ///
    /// The metrics kind comes from the model category, or from the
    /// algorithm name when the category is missing or unknown.
    pub fn load(transport: Arc<dyn ClusterTransport>, key: RemoteKey) -> ProxyResult<Self> {
        let response: ModelsResponse = transport.call(&Endpoint::Model(key.clone()), NoParams {})?;
        let metadata = response.model()?.clone();
        let summary: ModelSummary = serde_json::from_value(metadata.clone())
            .map_err(|e| TransportError::invalid_response(format!("model {}: {}", key, e)))?;

        let kind = summary
            .output
            .model_category
            .as_deref()
            .and_then(MetricsKind::from_category)
            .or_else(|| summary.algo.as_deref().and_then(MetricsKind::from_algo))
            .ok_or_else(|| {
                TransportError::invalid_response(format!(
                    "model {} has no recognised category (algo {:?})",
                    key, summary.algo
                ))
            })?;

        debug!(model = %key, %kind, "loaded model");
        Ok(Self::new(transport, key, metadata, kind))
    }

    /// Use the model without owning it.
    ///
    /// Dropping a borrowed proxy leaves the model on the cluster;
    /// [`ModelProxy::release`] still deletes it.
    pub fn borrowed(mut self) -> Self {
        self.released = true;
        self
    }

    /// Stage inputs through `uploader` instead of a private one.
    pub fn with_uploader(mut self, uploader: ArtifactUploader) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn key(&self) -> &RemoteKey {
        &self.key
    }

    pub fn kind(&self) -> MetricsKind {
        self.kind
    }

    /// The model description as the cluster reported it.
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    fn transport(&self) -> &dyn ClusterTransport {
        self.uploader.transport()
    }

    /// Stage `input`, run `op` against the staged key, then release it.
    fn with_staged<'a, T>(
        &self,
        input: impl Into<StageInput<'a>>,
        op: impl FnOnce(&RemoteKey, u64) -> ProxyResult<T>,
    ) -> ProxyResult<T> {
        let input = input.into();
        let staged = self.uploader.stage(input)?;
        let result = op(staged.key(), input.row_count());
        staged.release_quietly();
        result
    }

    /// Describe a frame the cluster just created for the caller.
    ///
    /// The caller never sees the key when describing fails, so the frame
    /// is released before the error is returned.
    fn describe_result(&self, key: &RemoteKey) -> ProxyResult<DatasetHandle> {
        DatasetHandle::describe(self.transport(), key).inspect_err(|_| {
            release_quietly(self.transport(), key);
        })
    }

    /// Run the model over `input` and return the prediction frame.
    ///
    /// The result has one row per input row.
    pub fn predict<'a>(&self, input: impl Into<StageInput<'a>>) -> ProxyResult<DatasetHandle> {
        self.with_staged(input, |frame, rows| {
            let response: PredictionsResponse = self.transport().call(
                &Endpoint::Predictions {
                    model: self.key.clone(),
                    frame: frame.clone(),
                },
                PredictParams::default(),
            )?;
            let predictions = &response.metrics()?.predictions.key.name;
            let handle = self.describe_result(predictions)?;

            if handle.row_count() != rows {
                release_quietly(self.transport(), predictions);
                return Err(TransportError::invalid_response(format!(
                    "prediction frame has {} rows, input has {}",
                    handle.row_count(),
                    rows
                ))
                .into());
            }

            info!(model = %self.key, predictions = %predictions, rows, "predicted");
            Ok(handle)
        })
    }

    /// Score the model against `input`.
    pub fn evaluate_metrics<'a>(
        &self,
        input: impl Into<StageInput<'a>>,
    ) -> ProxyResult<MetricsResult> {
        self.with_staged(input, |frame, _| {
            let response: MetricsResponse = self.transport().call(
                &Endpoint::ModelMetrics {
                    model: self.key.clone(),
                    frame: frame.clone(),
                },
                NoParams {},
            )?;
            MetricsResult::parse(self.kind, response.metrics()?)
        })
    }

    /// Activations of hidden layer `layer` (zero-indexed) for every input
    /// row, one column per unit.
    ///
    /// A layer the model does not have is rejected by the cluster.
    pub fn extract_features<'a>(
        &self,
        input: impl Into<StageInput<'a>>,
        layer: u32,
    ) -> ProxyResult<DatasetHandle> {
        self.with_staged(input, |frame, _| {
            let response: DeepFeaturesResponse = self.transport().call(
                &Endpoint::Predictions {
                    model: self.key.clone(),
                    frame: frame.clone(),
                },
                PredictParams {
                    deep_features_hidden_layer: Some(layer),
                },
            )?;
            let handle = self.describe_result(&response.destination_key.name)?;
            info!(model = %self.key, layer, columns = handle.column_count(), "extracted features");
            Ok(handle)
        })
    }

    /// Confusion matrix of a classifier over `input`.
    ///
    /// The prediction frame produced along the way is released.
    pub fn confusion_matrix<'a>(
        &self,
        input: impl Into<StageInput<'a>>,
    ) -> ProxyResult<ConfusionMatrix> {
        self.with_staged(input, |frame, _| {
            let response: PredictionsResponse = self.transport().call(
                &Endpoint::Predictions {
                    model: self.key.clone(),
                    frame: frame.clone(),
                },
                PredictParams::default(),
            )?;
            let metrics = response.metrics()?;
            release_quietly(self.transport(), &metrics.predictions.key.name);

            metrics
                .cm
                .as_ref()
                .map(|cm| ConfusionMatrix::new(cm.table.clone()))
                .ok_or_else(|| {
                    TransportError::invalid_response(format!(
                        "model {} reported no confusion matrix",
                        self.key
                    ))
                    .into()
                })
        })
    }

    /// Human-readable summary of the model.
    pub fn render(&self) -> String {
        render(&self.metadata)
    }

    /// Delete the model on the cluster.
    pub fn release(mut self) -> ProxyResult<()> {
        self.released = true;
        self.transport()
            .remove(&self.key)
            .map_err(|source| ProxyError::Release {
                key: self.key.clone(),
                source,
            })
    }

    /// Stop managing the model and return its key.
    pub fn detach(mut self) -> RemoteKey {
        self.released = true;
        self.key.clone()
    }
}

impl Drop for ModelProxy {
    fn drop(&mut self) {
        if !self.released {
            match self.transport().remove(&self.key) {
                Ok(()) => debug!(model = %self.key, "released model on drop"),
                Err(e) => warn!(model = %self.key, error = %e, "failed to release model on drop"),
            }
        }
    }
}

impl std::fmt::Debug for ModelProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelProxy")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("released", &self.released)
            .finish()
    }
}
