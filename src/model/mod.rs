//! Trained models on the cluster.
//!
//! [`ModelProxy`] runs inference, scoring and feature extraction against a
//! remote model. Metrics are parsed into a [`MetricsResult`] whose variant
//! follows the model's [`MetricsKind`].

mod metrics;
mod proxy;
mod render;
mod table;

pub use metrics::{
    BinomialMetrics, ClusteringMetrics, MetricsKind, MetricsResult, MultinomialMetrics,
    RegressionMetrics,
};
pub use proxy::ModelProxy;
pub use render::render;
pub use table::{ConfusionMatrix, TableColumn, TwoDimTable};
