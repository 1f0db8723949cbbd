//! Column and dataset handles.
//!
//! A [`DatasetHandle`] is a local description of a frame stored on the
//! cluster: an ordered list of [`ColumnHandle`]s sharing one row count.
//! Handles carry keys and metadata only; no data is held locally except in
//! a [`LocalFrame`] that has not been uploaded yet.

mod column;
mod dataset;
mod local;
mod scope;
mod split;

pub use column::ColumnHandle;
pub use dataset::DatasetHandle;
pub use local::{LocalColumn, LocalFrame};
pub use scope::FrameScope;
pub use split::{validate_ratios, verify_split};
