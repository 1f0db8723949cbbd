//! In-memory frames waiting to be pushed to the cluster.

use crate::error::{ProxyError, ProxyResult};

/// One in-memory column.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalColumn {
    pub label: String,
    pub values: Vec<f64>,
}

/// Columns held locally that must be uploaded before the cluster can use
/// them.
///
/// # Example
///
/// ```
/// use clusterproxy::frame::LocalFrame;
///
/// let frame = LocalFrame::new()
///     .with_column("x", vec![1.0, 2.0, 3.0])
///     .with_column("y", vec![0.5, 0.25, 0.125]);
/// assert_eq!(frame.row_count(), 3);
/// assert!(frame.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalFrame {
    columns: Vec<LocalColumn>,
}

impl LocalFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column.
    pub fn with_column(mut self, label: impl Into<String>, values: Vec<f64>) -> Self {
        self.columns.push(LocalColumn {
            label: label.into(),
            values,
        });
        self
    }

    pub fn columns(&self) -> &[LocalColumn] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Row count of the first column (zero when there are none).
    pub fn row_count(&self) -> u64 {
        self.columns.first().map_or(0, |c| c.values.len() as u64)
    }

    /// Check the frame can be uploaded: at least one column, at least one
    /// row, and all columns of equal length.
    pub fn validate(&self) -> ProxyResult<()> {
        let first = self
            .columns
            .first()
            .ok_or_else(|| ProxyError::invalid_input("local frame has no columns"))?;
        if first.values.is_empty() {
            return Err(ProxyError::invalid_input("local frame has no rows"));
        }
        if let Some(bad) = self
            .columns
            .iter()
            .find(|c| c.values.len() != first.values.len())
        {
            return Err(ProxyError::invalid_input(format!(
                "column '{}' has {} rows, expected {}",
                bad.label,
                bad.values.len(),
                first.values.len()
            )));
        }
        Ok(())
    }
}
