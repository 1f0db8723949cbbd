//! Splitting datasets into row partitions.
//!
//! The cluster performs the split. The client checks the result before
//! handing it back: row counts must add up exactly, every partition must
//! keep the original schema, and each partition must be close to its ideal
//! share. A partition next to one split boundary may deviate by less than
//! one row from its ideal size, and one between two boundaries by less
//! than two rows.

use tracing::{debug, info, warn};

use super::dataset::DatasetHandle;
use crate::error::{ProxyError, ProxyResult};
use crate::key::RemoteKey;
use crate::stage::{release_all_quietly, ArtifactUploader};
use crate::transport::protocol::{SplitParams, SplitResponse};
use crate::transport::{ClusterTransportExt, Endpoint, TransportError};

/// Check a list of split ratios.
///
/// Each ratio is the fraction of rows of one partition; the last partition
/// takes the remainder. Ratios must lie strictly between 0 and 1, be
/// non-decreasing, and sum to less than 1.
pub fn validate_ratios(ratios: &[f64]) -> ProxyResult<()> {
    if ratios.is_empty() {
        return Err(ProxyError::invalid_input("at least one split ratio is required"));
    }
    for (i, &ratio) in ratios.iter().enumerate() {
        if !ratio.is_finite() || ratio <= 0.0 || ratio >= 1.0 {
            return Err(ProxyError::invalid_input(format!(
                "split ratio {} must be in (0, 1), got {}",
                i, ratio
            )));
        }
        if i > 0 && ratio < ratios[i - 1] {
            return Err(ProxyError::invalid_input(format!(
                "split ratios must be ascending: {} follows {}",
                ratio,
                ratios[i - 1]
            )));
        }
    }
    let total: f64 = ratios.iter().sum();
    if total >= 1.0 {
        return Err(ProxyError::invalid_input(format!(
            "split ratios must sum to less than 1, got {}",
            total
        )));
    }
    Ok(())
}

/// Ideal (fractional) row count of every partition.
fn ideal_sizes(rows: u64, ratios: &[f64]) -> Vec<f64> {
    let rows = rows as f64;
    let mut sizes: Vec<f64> = ratios.iter().map(|r| rows * r).collect();
    sizes.push(rows * (1.0 - ratios.iter().sum::<f64>()));
    sizes
}

/// Verify a split result against the dataset it came from.
///
/// Returns a malformed-response transport error describing the first
/// violation found.
pub fn verify_split(
    original: &DatasetHandle,
    partitions: &[DatasetHandle],
    ratios: &[f64],
) -> ProxyResult<()> {
    let fail = |message: String| -> ProxyResult<()> {
        Err(TransportError::invalid_response(message).into())
    };

    if partitions.len() != ratios.len() + 1 {
        return fail(format!(
            "expected {} partitions, got {}",
            ratios.len() + 1,
            partitions.len()
        ));
    }

    let total: u64 = partitions.iter().map(|p| p.row_count()).sum();
    if total != original.row_count() {
        return fail(format!(
            "partitions hold {} rows, original has {}",
            total,
            original.row_count()
        ));
    }

    let labels = original.labels();
    for (i, partition) in partitions.iter().enumerate() {
        if partition.labels() != labels {
            return fail(format!(
                "partition {} has columns {:?}, expected {:?}",
                i,
                partition.labels(),
                labels
            ));
        }
    }

    let last = partitions.len() - 1;
    for (i, (partition, ideal)) in partitions
        .iter()
        .zip(ideal_sizes(original.row_count(), ratios))
        .enumerate()
    {
        let boundaries = if i == 0 || i == last { 1.0 } else { 2.0 };
        let deviation = (partition.row_count() as f64 - ideal).abs();
        if deviation >= boundaries {
            return fail(format!(
                "partition {} has {} rows, ideal is {:.1}",
                i,
                partition.row_count(),
                ideal
            ));
        }
    }

    Ok(())
}

impl DatasetHandle {
    /// Split the dataset into `ratios.len() + 1` row partitions.
    ///
    /// A dataset without a frame key is staged first; the staged artifact
    /// is released before returning. The partitions are new caller-owned
    /// frames.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for bad ratios or an empty dataset (no request is
    /// issued). Transport errors propagate unchanged. A result that fails
    /// [`verify_split`] is reported as a malformed response. Partitions
    /// created by a split that fails afterwards are released.
    pub fn split(
        &self,
        uploader: &ArtifactUploader,
        ratios: &[f64],
    ) -> ProxyResult<Vec<DatasetHandle>> {
        validate_ratios(ratios)?;
        if self.is_empty() {
            return Err(ProxyError::invalid_input("cannot split a dataset with no columns"));
        }

        match self.frame_key() {
            Some(key) => self.split_frame(uploader, key, ratios),
            None => {
                let staged = uploader.stage(self)?;
                let result = self.split_frame(uploader, staged.key(), ratios);
                staged.release_quietly();
                result
            }
        }
    }

    fn split_frame(
        &self,
        uploader: &ArtifactUploader,
        key: &RemoteKey,
        ratios: &[f64],
    ) -> ProxyResult<Vec<DatasetHandle>> {
        let transport = uploader.transport();
        let response: SplitResponse = transport.call(
            &Endpoint::SplitFrame,
            SplitParams {
                dataset: key.clone(),
                ratios: ratios.to_vec(),
            },
        )?;
        let job = response.job()?;
        debug!(job = %job.dest.name, status = ?job.status, "split job finished");

        let keys: Vec<RemoteKey> = job.output.splits.iter().map(|s| s.name.clone()).collect();
        let partitions = keys
            .iter()
            .map(|key| DatasetHandle::describe(transport, key))
            .collect::<ProxyResult<Vec<_>>>()
            .and_then(|partitions| {
                verify_split(self, &partitions, ratios)?;
                Ok(partitions)
            })
            .inspect_err(|e| {
                warn!(frame = %key, error = %e, "releasing partitions of failed split");
                release_all_quietly(transport, &keys);
            })?;

        info!(
            frame = %key,
            rows = self.row_count(),
            partitions = partitions.len(),
            "split dataset"
        );
        Ok(partitions)
    }
}
