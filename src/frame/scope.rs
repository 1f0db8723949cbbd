//! Scoped ownership of result datasets.

use tracing::warn;

use super::dataset::DatasetHandle;
use crate::error::ProxyResult;
use crate::transport::ClusterTransport;

/// Deletes the datasets it tracks when closed or dropped.
///
/// Results returned to the caller are never released automatically. A
/// scope lets a caller opt in: every handle passed to
/// [`FrameScope::track`] is deleted by [`FrameScope::close`], or quietly
/// on drop, unless it was taken back with [`FrameScope::keep`].
///
/// ```
/// use clusterproxy::frame::{DatasetHandle, FrameScope};
/// use clusterproxy::transport::MemoryCluster;
///
/// let cluster = MemoryCluster::new();
/// let key = cluster.insert_frame("scratch", &["x"], 10);
/// {
///     let mut scope = FrameScope::new(&cluster);
///     let ds = scope.track(DatasetHandle::describe(&cluster, &key).unwrap());
///     assert_eq!(ds.row_count(), 10);
/// }
/// assert!(!cluster.contains_key("scratch"));
/// ```
pub struct FrameScope<'a> {
    transport: &'a dyn ClusterTransport,
    tracked: Vec<DatasetHandle>,
}

impl<'a> FrameScope<'a> {
    pub fn new(transport: &'a dyn ClusterTransport) -> Self {
        Self {
            transport,
            tracked: Vec::new(),
        }
    }

    /// Take ownership of `handle`; returns a copy for use within the scope.
    pub fn track(&mut self, handle: DatasetHandle) -> DatasetHandle {
        self.tracked.push(handle.clone());
        handle
    }

    /// Track every handle in `handles`.
    pub fn track_all(&mut self, handles: Vec<DatasetHandle>) -> Vec<DatasetHandle> {
        self.tracked.extend(handles.iter().cloned());
        handles
    }

    /// Stop tracking `handle` so it outlives the scope.
    ///
    /// Returns false if the handle was not tracked.
    pub fn keep(&mut self, handle: &DatasetHandle) -> bool {
        match self.tracked.iter().position(|h| h == handle) {
            Some(pos) => {
                self.tracked.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Delete every tracked dataset.
    ///
    /// All deletions are attempted; the first failure is returned.
    pub fn close(mut self) -> ProxyResult<()> {
        let mut first_error = None;
        for handle in std::mem::take(&mut self.tracked) {
            if let Err(e) = handle.delete(self.transport) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for FrameScope<'_> {
    fn drop(&mut self) {
        for handle in self.tracked.drain(..) {
            if let Err(e) = handle.delete(self.transport) {
                warn!(
                    frame = ?handle.frame_key(),
                    error = %e,
                    "failed to delete scoped dataset"
                );
            }
        }
    }
}
