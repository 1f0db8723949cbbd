//! # clusterproxy
//!
//! Client-side proxies for datasets and models that live on a remote
//! compute cluster.
//!
//! ## Architecture
//!
//! Every column, dataset and model stays on the cluster; the local process
//! holds only keys and metadata:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │          ModelProxy (predict, metrics, features)         │
//! │          DatasetHandle (describe, split, delete)         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [stage]
//! ┌─────────────────────────────────────────────────────────┐
//! │     ArtifactUploader → StagedFrame (temporary key)       │
//! │     released before the operation returns                │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [transport]
//! ┌─────────────────────────────────────────────────────────┐
//! │     ClusterTransport: HttpTransport | MemoryCluster      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use clusterproxy::prelude::*;
//! use clusterproxy::transport::{MemoryCluster, MemoryModel};
//!
//! let cluster = Arc::new(MemoryCluster::new());
//! let iris = cluster.insert_frame("iris.hex", &["sepal_len", "petal_len", "class"], 150);
//! cluster.insert_model("gbm", MemoryModel::classifier("gbm", &["setosa", "versicolor", "virginica"]));
//!
//! let frame = DatasetHandle::describe(&*cluster, &iris)?;
//! let model = ModelProxy::load(cluster.clone(), RemoteKey::new("gbm")?)?;
//!
//! let predictions = model.predict(&frame)?;
//! assert_eq!(predictions.row_count(), 150);
//! predictions.delete(&*cluster)?;
//! model.release()?;
//! # Ok::<(), clusterproxy::ProxyError>(())
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod key;
pub mod logging;
pub mod model;
pub mod stage;
pub mod transport;

pub use error::{ProxyError, ProxyResult};

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::error::{ProxyError, ProxyResult};
    pub use crate::frame::{ColumnHandle, DatasetHandle, FrameScope, LocalFrame};
    pub use crate::key::{RemoteKey, TempKeyGenerator};
    pub use crate::model::{MetricsKind, MetricsResult, ModelProxy};
    pub use crate::stage::{ArtifactUploader, StageInput, StagedFrame};
    pub use crate::transport::{ClusterTransport, ClusterTransportExt, HttpTransport};
}
