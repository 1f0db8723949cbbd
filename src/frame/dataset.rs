//! Dataset handles.

use serde_json::json;
use tracing::debug;

use super::column::ColumnHandle;
use crate::error::{ProxyError, ProxyResult};
use crate::key::RemoteKey;
use crate::transport::protocol::{FrameSummary, FramesResponse, ImportParams, ImportResponse};
use crate::transport::{ClusterTransport, ClusterTransportExt, Endpoint, TransportError};

/// Local proxy for a dataset stored on the cluster.
///
/// A dataset is an ordered list of columns that share one row count; the
/// column order is the dataset's schema order. Handles are values: every
/// transformation returns a new handle and nothing is changed in place.
///
/// A handle returned to the caller is never released automatically. Call
/// [`DatasetHandle::delete`] (or track it in a
/// [`FrameScope`](super::FrameScope)) when it is no longer needed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatasetHandle {
    frame_key: Option<RemoteKey>,
    columns: Vec<ColumnHandle>,
    row_count: u64,
}

impl DatasetHandle {
    /// An empty handle, pending assembly.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a handle from `(label, key)` pairs and the shared row count.
    pub fn from_columns<I, S>(columns: I, row_count: u64) -> Self
    where
        I: IntoIterator<Item = (S, RemoteKey)>,
        S: Into<String>,
    {
        let columns = columns
            .into_iter()
            .map(|(label, key)| ColumnHandle::new(key, label, row_count))
            .collect();
        Self {
            frame_key: None,
            columns,
            row_count,
        }
    }

    /// Build a handle from a frame description returned by the cluster.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the description lists a different
    /// number of column keys and labels.
    pub fn from_describe(summary: &FrameSummary) -> ProxyResult<Self> {
        if summary.vec_keys.len() != summary.columns.len() {
            return Err(TransportError::invalid_response(format!(
                "frame describes {} column keys but {} labels",
                summary.vec_keys.len(),
                summary.columns.len()
            ))
            .into());
        }

        let columns = summary
            .columns
            .iter()
            .zip(&summary.vec_keys)
            .map(|(column, key)| (column.label.clone(), key.name.clone()));

        let mut handle = Self::from_columns(columns, summary.rows);
        handle.frame_key = summary.frame_id.as_ref().map(|k| k.name.clone());
        Ok(handle)
    }

    /// Attach the key of the frame artifact this handle was described from.
    pub fn with_frame_key(mut self, key: RemoteKey) -> Self {
        self.frame_key = Some(key);
        self
    }

    /// Key of the frame artifact, if the handle came from one.
    pub fn frame_key(&self) -> Option<&RemoteKey> {
        self.frame_key.as_ref()
    }

    pub fn columns(&self) -> &[ColumnHandle] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&ColumnHandle> {
        self.columns.get(index)
    }

    pub fn column_by_label(&self, label: &str) -> Option<&ColumnHandle> {
        self.columns.iter().find(|c| c.label() == label)
    }

    /// Column labels in schema order.
    pub fn labels(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.label()).collect()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// True when the handle has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// A new handle over the columns at `indices`, in the order given.
    ///
    /// The result references the same column keys and has no frame key.
    pub fn select(&self, indices: &[usize]) -> ProxyResult<Self> {
        let columns = indices
            .iter()
            .map(|&i| {
                self.columns.get(i).cloned().ok_or_else(|| {
                    ProxyError::invalid_input(format!(
                        "column index {} out of range for {} columns",
                        i,
                        self.columns.len()
                    ))
                })
            })
            .collect::<ProxyResult<Vec<_>>>()?;

        Ok(Self {
            frame_key: None,
            columns,
            row_count: self.row_count,
        })
    }

    /// A new handle with the columns of `other` appended after these.
    pub fn bind(&self, other: &DatasetHandle) -> ProxyResult<Self> {
        if self.is_empty() {
            return Ok(Self {
                frame_key: None,
                ..other.clone()
            });
        }
        if !other.is_empty() && other.row_count != self.row_count {
            return Err(ProxyError::invalid_input(format!(
                "cannot bind {} rows to {} rows",
                other.row_count, self.row_count
            )));
        }

        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Ok(Self {
            frame_key: None,
            columns,
            row_count: self.row_count,
        })
    }

    /// Fetch the current description of frame `key` from the cluster.
    pub fn describe(transport: &dyn ClusterTransport, key: &RemoteKey) -> ProxyResult<Self> {
        let response: FramesResponse =
            transport.call(&Endpoint::Frame(key.clone()), json!({}))?;
        let handle = Self::from_describe(response.frame()?)?;
        debug!(
            frame = %key,
            rows = handle.row_count,
            columns = handle.column_count(),
            "described frame"
        );
        Ok(handle.with_frame_key(key.clone()))
    }

    /// Import and parse a file the cluster can read, then describe it.
    ///
    /// The resulting frame is caller-owned.
    pub fn import_file(
        transport: &dyn ClusterTransport,
        path: &str,
        destination: Option<RemoteKey>,
    ) -> ProxyResult<Self> {
        if path.trim().is_empty() {
            return Err(ProxyError::invalid_input("import path is empty"));
        }
        let response: ImportResponse = transport.call(
            &Endpoint::ImportFiles,
            ImportParams {
                path: path.to_string(),
                destination_key: destination,
            },
        )?;
        Self::describe(transport, &response.destination_key.name)
    }

    /// Release this dataset on the cluster.
    ///
    /// Removes the frame artifact when there is one (the cluster then drops
    /// the columns no other frame uses), otherwise each column key. Other
    /// handles referencing the same keys become dangling.
    pub fn delete(&self, transport: &dyn ClusterTransport) -> ProxyResult<()> {
        match &self.frame_key {
            Some(key) => transport.remove(key)?,
            None => {
                for column in &self.columns {
                    transport.remove(column.key())?;
                }
            }
        }
        Ok(())
    }
}
