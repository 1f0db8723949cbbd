//! Column handles.

use crate::key::RemoteKey;

/// Local proxy for one column stored on the cluster.
///
/// Several handles may reference the same key; a handle does not own the
/// column it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnHandle {
    key: RemoteKey,
    label: String,
    row_count: u64,
}

impl ColumnHandle {
    pub fn new(key: RemoteKey, label: impl Into<String>, row_count: u64) -> Self {
        Self {
            key,
            label: label.into(),
            row_count,
        }
    }

    pub fn key(&self) -> &RemoteKey {
        &self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }
}
