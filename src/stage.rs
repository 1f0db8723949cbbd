//! Staging of inputs as temporary cluster artifacts.
//!
//! Requests that read an input frame need it as a single artifact on the
//! cluster. [`ArtifactUploader::stage`] binds (and for local data, first
//! uploads) the input columns into a new frame under a generated temporary
//! key and returns a [`StagedFrame`] guard that owns it.
//!
//! The operation that staged a frame releases it before returning, on the
//! success path and on every error path. Failures while releasing are
//! logged and never replace the operation's own outcome.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::StagingSettings;
use crate::error::{ProxyError, ProxyResult};
use crate::frame::{DatasetHandle, LocalFrame};
use crate::key::{RemoteKey, TempKeyGenerator};
use crate::transport::protocol::{BindParams, BindResponse, UploadColumnParams, UploadResponse};
use crate::transport::{ClusterTransport, ClusterTransportExt, Endpoint};

/// Input accepted by operations that stage a frame.
#[derive(Debug, Clone, Copy)]
pub enum StageInput<'a> {
    /// Columns already resident on the cluster.
    Remote(&'a DatasetHandle),
    /// Columns held locally that must be uploaded first.
    Local(&'a LocalFrame),
}

impl<'a> From<&'a DatasetHandle> for StageInput<'a> {
    fn from(handle: &'a DatasetHandle) -> Self {
        StageInput::Remote(handle)
    }
}

impl<'a> From<&'a LocalFrame> for StageInput<'a> {
    fn from(frame: &'a LocalFrame) -> Self {
        StageInput::Local(frame)
    }
}

impl StageInput<'_> {
    /// Reject inputs that cannot be staged. Issues no requests.
    pub fn validate(&self) -> ProxyResult<()> {
        match self {
            StageInput::Remote(handle) if handle.is_empty() => {
                Err(ProxyError::invalid_input("dataset has no columns"))
            }
            StageInput::Remote(_) => Ok(()),
            StageInput::Local(frame) => frame.validate(),
        }
    }

    /// Number of rows the staged frame will have.
    pub fn row_count(&self) -> u64 {
        match self {
            StageInput::Remote(handle) => handle.row_count(),
            StageInput::Local(frame) => frame.row_count(),
        }
    }
}

/// Converts inputs into temporary frames on the cluster.
///
/// Cheap to clone; clones share the transport and the key generator.
#[derive(Clone)]
pub struct ArtifactUploader {
    transport: Arc<dyn ClusterTransport>,
    keys: Arc<TempKeyGenerator>,
}

impl ArtifactUploader {
    /// Create an uploader with the default temporary key prefix.
    pub fn new(transport: Arc<dyn ClusterTransport>) -> Self {
        Self::with_generator(transport, Arc::new(TempKeyGenerator::default()))
    }

    /// Create an uploader that mints keys from `keys`.
    pub fn with_generator(transport: Arc<dyn ClusterTransport>, keys: Arc<TempKeyGenerator>) -> Self {
        Self { transport, keys }
    }

    /// Create an uploader using the configured temporary key prefix.
    pub fn from_settings(transport: Arc<dyn ClusterTransport>, settings: &StagingSettings) -> Self {
        Self::with_generator(
            transport,
            Arc::new(TempKeyGenerator::new(settings.temp_prefix.clone())),
        )
    }

    /// The transport requests go through.
    pub fn transport(&self) -> &dyn ClusterTransport {
        self.transport.as_ref()
    }

    /// Shared handle to the transport.
    pub fn shared_transport(&self) -> Arc<dyn ClusterTransport> {
        self.transport.clone()
    }

    /// The generator temporary keys come from.
    pub fn key_generator(&self) -> &TempKeyGenerator {
        &self.keys
    }

    /// Stage `input` as a new temporary frame.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` without issuing any request when the input is
    /// empty or malformed. Transport and cluster errors are returned as-is;
    /// nothing is retried.
    pub fn stage<'a>(&self, input: impl Into<StageInput<'a>>) -> ProxyResult<StagedFrame> {
        let input = input.into();
        input.validate()?;

        let destination = self.keys.next_key();
        let key = match input {
            StageInput::Remote(handle) => {
                let vec_keys = handle.columns().iter().map(|c| c.key().clone()).collect();
                let labels = handle.labels().into_iter().map(String::from).collect();
                self.bind(&destination, vec_keys, labels)?
            }
            StageInput::Local(frame) => {
                let mut uploaded = Vec::with_capacity(frame.column_count());
                for column in frame.columns() {
                    let response: Result<UploadResponse, _> = self.transport.call(
                        &Endpoint::UploadColumn,
                        UploadColumnParams {
                            label: column.label.clone(),
                            values: column.values.clone(),
                        },
                    );
                    match response {
                        Ok(response) => uploaded.push(response.key.name),
                        Err(e) => {
                            self.release_all_quietly(&uploaded);
                            return Err(e.into());
                        }
                    }
                }

                let labels = frame.columns().iter().map(|c| c.label.clone()).collect();
                match self.bind(&destination, uploaded.clone(), labels) {
                    Ok(key) => key,
                    Err(e) => {
                        self.release_all_quietly(&uploaded);
                        return Err(e);
                    }
                }
            }
        };

        Ok(StagedFrame {
            key,
            transport: self.transport.clone(),
            armed: true,
        })
    }

    /// Stage `input` and hand ownership of the artifact to the caller.
    pub fn stage_key<'a>(&self, input: impl Into<StageInput<'a>>) -> ProxyResult<RemoteKey> {
        Ok(self.stage(input)?.detach())
    }

    /// Bind `vec_keys` into a frame at `destination`.
    ///
    /// A failed bind may still have created the frame (the reply can be
    /// lost after the cluster acted), so `destination` is released before
    /// the error is returned.
    fn bind(
        &self,
        destination: &RemoteKey,
        vec_keys: Vec<RemoteKey>,
        labels: Vec<String>,
    ) -> ProxyResult<RemoteKey> {
        let response: Result<BindResponse, _> = self.transport.call(
            &Endpoint::BindColumns,
            BindParams {
                destination_key: destination.clone(),
                vec_keys,
                labels,
            },
        );
        match response {
            Ok(response) => {
                debug!(key = %response.destination_key.name, "staged temporary frame");
                Ok(response.destination_key.name)
            }
            Err(e) => {
                release_quietly(self.transport.as_ref(), destination);
                Err(e.into())
            }
        }
    }

    fn release_all_quietly(&self, keys: &[RemoteKey]) {
        release_all_quietly(self.transport.as_ref(), keys);
    }
}

/// Best-effort release used on cleanup paths: failures are logged only.
///
/// A key the cluster no longer knows counts as released.
pub(crate) fn release_quietly(transport: &dyn ClusterTransport, key: &RemoteKey) {
    match transport.remove(key) {
        Ok(()) => debug!(%key, "released temporary artifact"),
        Err(e) if e.is_not_found() => debug!(%key, "temporary artifact already gone"),
        Err(e) => warn!(%key, error = %e, "failed to release temporary artifact"),
    }
}

/// Release every key in `keys` quietly.
pub(crate) fn release_all_quietly(transport: &dyn ClusterTransport, keys: &[RemoteKey]) {
    for key in keys {
        release_quietly(transport, key);
    }
}

/// A temporary frame owned by the operation that staged it.
///
/// Release it explicitly with [`StagedFrame::release`] or
/// [`StagedFrame::release_quietly`]. If neither runs (for example because
/// of a panic), dropping the guard releases the frame quietly.
#[must_use = "a staged frame must be released by the operation that created it"]
pub struct StagedFrame {
    key: RemoteKey,
    transport: Arc<dyn ClusterTransport>,
    armed: bool,
}

impl StagedFrame {
    /// Key of the staged frame.
    pub fn key(&self) -> &RemoteKey {
        &self.key
    }

    /// Release the frame, reporting failure.
    pub fn release(mut self) -> ProxyResult<()> {
        self.armed = false;
        self.transport
            .remove(&self.key)
            .map_err(|source| ProxyError::Release {
                key: self.key.clone(),
                source,
            })
    }

    /// Release the frame, logging failure instead of returning it.
    pub fn release_quietly(mut self) {
        self.armed = false;
        release_quietly(self.transport.as_ref(), &self.key);
    }

    /// Give up ownership without releasing.
    pub fn detach(mut self) -> RemoteKey {
        self.armed = false;
        self.key.clone()
    }
}

impl Drop for StagedFrame {
    fn drop(&mut self) {
        if self.armed {
            warn!(key = %self.key, "staged frame dropped without explicit release");
            release_quietly(self.transport.as_ref(), &self.key);
        }
    }
}

impl std::fmt::Debug for StagedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedFrame")
            .field("key", &self.key)
            .field("armed", &self.armed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryCluster, TransportError};

    fn setup() -> (Arc<MemoryCluster>, ArtifactUploader, DatasetHandle) {
        crate::logging::init_test_logging();
        let cluster = Arc::new(MemoryCluster::new());
        let key = cluster.insert_frame("iris.hex", &["sepal_len", "sepal_wid", "class"], 150);
        let ds = DatasetHandle::describe(&*cluster, &key).unwrap();
        let uploader = ArtifactUploader::new(cluster.clone());
        cluster.clear_requests();
        (cluster, uploader, ds)
    }

    #[test]
    fn test_stage_remote_binds_under_temporary_key() {
        let (cluster, uploader, ds) = setup();

        let staged = uploader.stage(&ds).unwrap();
        assert!(uploader.key_generator().is_temporary(staged.key()));
        assert!(cluster.contains_key(staged.key().as_str()));
        assert_eq!(cluster.request_count(), 1);

        let staged_view = DatasetHandle::describe(&*cluster, staged.key()).unwrap();
        assert_eq!(staged_view.labels(), ds.labels());
        assert_eq!(staged_view.row_count(), 150);

        let key = staged.key().clone();
        staged.release().unwrap();
        assert!(!cluster.contains_key(key.as_str()));
        // Source columns are still referenced by the original frame.
        assert!(DatasetHandle::describe(&*cluster, ds.frame_key().unwrap()).is_ok());
    }

    #[test]
    fn test_stage_local_uploads_then_binds() {
        let (cluster, uploader, _) = setup();
        let frame = LocalFrame::new()
            .with_column("x", vec![1.0, 2.0, 3.0])
            .with_column("y", vec![4.0, 5.0, 6.0]);

        let staged = uploader.stage(&frame).unwrap();
        assert_eq!(cluster.request_count(), 3);
        let view = DatasetHandle::describe(&*cluster, staged.key()).unwrap();
        assert_eq!(view.labels(), vec!["x", "y"]);
        assert_eq!(view.row_count(), 3);

        let key = staged.key().clone();
        staged.release_quietly();
        assert!(!cluster.contains_key(key.as_str()));
    }

    #[test]
    fn test_empty_input_issues_no_requests() {
        let (cluster, uploader, _) = setup();
        let empty = DatasetHandle::empty();
        assert!(uploader.stage(&empty).unwrap_err().is_invalid_input());
        assert!(uploader.stage(&LocalFrame::new()).unwrap_err().is_invalid_input());
        assert_eq!(cluster.request_count(), 0);
    }

    #[test]
    fn test_failed_bind_releases_uploaded_columns() {
        let (cluster, uploader, _) = setup();
        let before = cluster.keys();
        cluster.fail_next_matching(
            |e| matches!(e, Endpoint::BindColumns),
            TransportError::remote("INTERNAL", "bind failed"),
        );

        let frame = LocalFrame::new().with_column("x", vec![1.0, 2.0]);
        let err = uploader.stage(&frame).unwrap_err();
        assert!(err.is_remote());
        assert_eq!(cluster.keys(), before);
    }

    #[test]
    fn test_lost_bind_reply_releases_destination() {
        let (cluster, uploader, ds) = setup();
        let before = cluster.keys();
        cluster.lose_next_reply_matching(
            |e| matches!(e, Endpoint::BindColumns),
            TransportError::Timeout(60),
        );

        let err = uploader.stage(&ds).unwrap_err();
        assert!(matches!(err, ProxyError::Transport(TransportError::Timeout(60))));
        assert_eq!(cluster.keys(), before);
        assert!(cluster
            .requests()
            .iter()
            .any(|r| matches!(r.endpoint(), Some(Endpoint::Remove(_)))));
    }

    #[test]
    fn test_lost_bind_reply_releases_local_upload() {
        let (cluster, uploader, _) = setup();
        let before = cluster.keys();
        cluster.lose_next_reply_matching(
            |e| matches!(e, Endpoint::BindColumns),
            TransportError::Timeout(60),
        );

        let frame = LocalFrame::new()
            .with_column("x", vec![1.0, 2.0])
            .with_column("y", vec![3.0, 4.0]);
        assert!(uploader.stage(&frame).is_err());
        assert_eq!(cluster.keys(), before);
    }

    #[test]
    fn test_drop_releases_unreleased_frame() {
        let (cluster, uploader, ds) = setup();
        let key = {
            let staged = uploader.stage(&ds).unwrap();
            staged.key().clone()
        };
        assert!(!cluster.contains_key(key.as_str()));
    }

    #[test]
    fn test_configured_prefix() {
        let cluster = Arc::new(MemoryCluster::new());
        let key = cluster.insert_frame("f", &["x"], 4);
        let ds = DatasetHandle::describe(&*cluster, &key).unwrap();
        let settings = StagingSettings {
            temp_prefix: "scratch".to_string(),
        };
        let uploader = ArtifactUploader::from_settings(cluster.clone(), &settings);
        let staged = uploader.stage(&ds).unwrap();
        assert!(staged.key().as_str().starts_with("scratch_"));
        staged.release().unwrap();
    }

    #[test]
    fn test_stage_key_hands_over_ownership() {
        let (cluster, uploader, ds) = setup();
        let key = uploader.stage_key(&ds).unwrap();
        assert!(cluster.contains_key(key.as_str()));
        cluster.remove(&key).unwrap();
    }

    #[test]
    fn test_release_failure_is_reported() {
        let (cluster, uploader, ds) = setup();
        let staged = uploader.stage(&ds).unwrap();
        cluster.fail_next_matching(
            |e| matches!(e, Endpoint::Remove(_)),
            TransportError::Timeout(5),
        );
        let err = staged.release().unwrap_err();
        assert!(matches!(err, ProxyError::Release { .. }));
    }
}
