//! Model performance metrics.
//!
//! The cluster reports metrics in a different shape for every model
//! category. The shape is chosen by [`MetricsKind`], which comes from the
//! model's metadata; the payload is then parsed strictly into the matching
//! [`MetricsResult`] variant.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::table::{ConfusionMatrix, TwoDimTable};
use crate::error::ProxyResult;
use crate::transport::TransportError;

/// Category of model, which decides the metrics shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricsKind {
    Binomial,
    Multinomial,
    Regression,
    Clustering,
}

impl MetricsKind {
    /// Parse the cluster's model category name.
    pub fn from_category(category: &str) -> Option<Self> {
        match category.to_ascii_lowercase().as_str() {
            "binomial" => Some(Self::Binomial),
            "multinomial" => Some(Self::Multinomial),
            "regression" => Some(Self::Regression),
            "clustering" => Some(Self::Clustering),
            _ => None,
        }
    }

    /// Guess the category from the algorithm name.
    pub fn from_algo(algo: &str) -> Option<Self> {
        match algo.to_ascii_lowercase().as_str() {
            "kmeans" => Some(Self::Clustering),
            "naivebayes" => Some(Self::Multinomial),
            "glm" => Some(Self::Regression),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binomial => "Binomial",
            Self::Multinomial => "Multinomial",
            Self::Regression => "Regression",
            Self::Clustering => "Clustering",
        }
    }
}

impl fmt::Display for MetricsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct CmEnvelope {
    table: TwoDimTable,
}

fn confusion(cm: &Option<CmEnvelope>) -> Option<ConfusionMatrix> {
    cm.as_ref().map(|cm| ConfusionMatrix::new(cm.table.clone()))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BinomialMetrics {
    #[serde(rename = "MSE")]
    pub mse: f64,
    #[serde(rename = "AUC")]
    pub auc: f64,
    pub logloss: f64,
    #[serde(default)]
    cm: Option<CmEnvelope>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MultinomialMetrics {
    #[serde(rename = "MSE")]
    pub mse: f64,
    pub logloss: f64,
    #[serde(default)]
    pub hit_ratios: Vec<f64>,
    #[serde(default)]
    cm: Option<CmEnvelope>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegressionMetrics {
    #[serde(rename = "MSE")]
    pub mse: f64,
    pub r2: f64,
    pub mean_residual_deviance: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClusteringMetrics {
    pub avg_within_ss: f64,
    pub avg_between_ss: f64,
    pub avg_ss: f64,
    #[serde(default)]
    pub size: Vec<u64>,
}

/// Metrics for one model over one frame, shaped by the model's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsResult {
    Binomial(BinomialMetrics),
    Multinomial(MultinomialMetrics),
    Regression(RegressionMetrics),
    Clustering(ClusteringMetrics),
}

impl MetricsResult {
    /// Parse a raw metrics payload as `kind`.
    ///
    /// # Errors
    ///
    /// A payload missing a field the kind requires is a malformed response.
    pub fn parse(kind: MetricsKind, payload: &Value) -> ProxyResult<Self> {
        fn parse_as<T: serde::de::DeserializeOwned>(
            kind: MetricsKind,
            payload: &Value,
        ) -> Result<T, TransportError> {
            T::deserialize(payload).map_err(|e| {
                TransportError::invalid_response(format!("{} metrics: {}", kind, e))
            })
        }

        let result = match kind {
            MetricsKind::Binomial => Self::Binomial(parse_as(kind, payload)?),
            MetricsKind::Multinomial => Self::Multinomial(parse_as(kind, payload)?),
            MetricsKind::Regression => Self::Regression(parse_as(kind, payload)?),
            MetricsKind::Clustering => Self::Clustering(parse_as(kind, payload)?),
        };
        Ok(result)
    }

    pub fn kind(&self) -> MetricsKind {
        match self {
            Self::Binomial(_) => MetricsKind::Binomial,
            Self::Multinomial(_) => MetricsKind::Multinomial,
            Self::Regression(_) => MetricsKind::Regression,
            Self::Clustering(_) => MetricsKind::Clustering,
        }
    }

    /// Mean squared error; clustering metrics have none.
    pub fn mse(&self) -> Option<f64> {
        match self {
            Self::Binomial(m) => Some(m.mse),
            Self::Multinomial(m) => Some(m.mse),
            Self::Regression(m) => Some(m.mse),
            Self::Clustering(_) => None,
        }
    }

    /// Confusion matrix of a classifier, when reported.
    pub fn confusion_matrix(&self) -> Option<ConfusionMatrix> {
        match self {
            Self::Binomial(m) => confusion(&m.cm),
            Self::Multinomial(m) => confusion(&m.cm),
            Self::Regression(_) | Self::Clustering(_) => None,
        }
    }
}

impl fmt::Display for MetricsResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} metrics:", self.kind())?;
        match self {
            Self::Binomial(m) => {
                writeln!(f, "MSE: {}", m.mse)?;
                writeln!(f, "AUC: {}", m.auc)?;
                writeln!(f, "logloss: {}", m.logloss)?;
            }
            Self::Multinomial(m) => {
                writeln!(f, "MSE: {}", m.mse)?;
                writeln!(f, "logloss: {}", m.logloss)?;
                if !m.hit_ratios.is_empty() {
                    let ratios: Vec<String> = m.hit_ratios.iter().map(|r| r.to_string()).collect();
                    writeln!(f, "hit ratios: {}", ratios.join(", "))?;
                }
            }
            Self::Regression(m) => {
                writeln!(f, "MSE: {}", m.mse)?;
                writeln!(f, "R^2: {}", m.r2)?;
                writeln!(f, "mean residual deviance: {}", m.mean_residual_deviance)?;
            }
            Self::Clustering(m) => {
                writeln!(f, "avg within SS: {}", m.avg_within_ss)?;
                writeln!(f, "avg between SS: {}", m.avg_between_ss)?;
                writeln!(f, "avg SS: {}", m.avg_ss)?;
                if !m.size.is_empty() {
                    let sizes: Vec<String> = m.size.iter().map(|s| s.to_string()).collect();
                    writeln!(f, "cluster sizes: {}", sizes.join(", "))?;
                }
            }
        }
        if let Some(cm) = self.confusion_matrix() {
            write!(f, "{}", cm.render())?;
        }
        Ok(())
    }
}
