//! Missing-value filtering for quantitative matrices.

use crate::data::{QuantMatrix, SampleMetadata};
use crate::error::{DaaError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Logic for combining group-wise observation requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupwiseLogic {
    /// Feature must pass the requirement in ANY group.
    Any,
    /// Feature must pass the requirement in ALL groups.
    All,
    /// Feature must pass the requirement in at least N groups.
    AtLeast(usize),
}

/// Replace zeros (and negative values) with missing values.
///
/// Search engines report an unquantified channel as 0; it carries no
/// abundance information and would make the log transform fail.
pub fn zero_to_missing(matrix: &QuantMatrix) -> Result<QuantMatrix> {
    let data = matrix.matrix().map(|v| if v <= 0.0 { f64::NAN } else { v });
    matrix.with_values(data)
}

/// Remove rows whose grouping key is missing or empty.
///
/// Aggregation refuses such rows, so this is the step to run before it.
pub fn filter_missing_key(matrix: &QuantMatrix, column: &str) -> Result<QuantMatrix> {
    let keys = matrix.features().column(column)?;
    let keep_indices: Vec<usize> = keys
        .iter()
        .enumerate()
        .filter(|(_, key)| {
            let key = key.trim();
            !key.is_empty() && key != "NA"
        })
        .map(|(i, _)| i)
        .collect();

    if keep_indices.is_empty() {
        return Err(DaaError::EmptyData(format!(
            "No rows have a value in key column '{}'",
            column
        )));
    }
    matrix.subset_features(&keep_indices)
}

/// Keep features observed in at least `min_fraction` of samples.
pub fn filter_missing(matrix: &QuantMatrix, min_fraction: f64) -> Result<QuantMatrix> {
    if !(0.0..=1.0).contains(&min_fraction) {
        return Err(DaaError::InvalidParameter(
            "Observed fraction must be between 0 and 1".to_string(),
        ));
    }

    let min_samples = (min_fraction * matrix.n_samples() as f64).ceil() as usize;
    let observed = matrix.observed_counts();
    let keep_indices: Vec<usize> = observed
        .iter()
        .enumerate()
        .filter(|(_, &n)| n >= min_samples.max(1))
        .map(|(i, _)| i)
        .collect();

    if keep_indices.is_empty() {
        return Err(DaaError::EmptyData(format!(
            "No features are observed in {:.1}% of samples",
            min_fraction * 100.0
        )));
    }
    matrix.subset_features(&keep_indices)
}

/// Keep features with at least `min_observed` values within groups.
///
/// Groups are the levels of a categorical metadata column; the group-wise
/// results are combined with `logic`.
pub fn filter_missing_groupwise(
    matrix: &QuantMatrix,
    metadata: &SampleMetadata,
    group_column: &str,
    min_observed: usize,
    logic: GroupwiseLogic,
) -> Result<QuantMatrix> {
    let groups = build_group_indices(matrix, metadata, group_column)?;
    let n_groups = groups.len();
    if n_groups == 0 {
        return Err(DaaError::EmptyData("No groups found in metadata".to_string()));
    }
    if let GroupwiseLogic::AtLeast(n) = logic {
        if n > n_groups {
            return Err(DaaError::InvalidParameter(format!(
                "AtLeast({}) requires at least {} groups, but only {} found",
                n, n, n_groups
            )));
        }
    }

    let keep_indices: Vec<usize> = (0..matrix.n_features())
        .into_par_iter()
        .filter(|&row| {
            let passing = groups
                .values()
                .filter(|cols| {
                    cols.iter()
                        .filter(|&&c| matrix.get(row, c).is_finite())
                        .count()
                        >= min_observed
                })
                .count();
            match logic {
                GroupwiseLogic::Any => passing > 0,
                GroupwiseLogic::All => passing == n_groups,
                GroupwiseLogic::AtLeast(n) => passing >= n,
            }
        })
        .collect();

    if keep_indices.is_empty() {
        return Err(DaaError::EmptyData(format!(
            "No features have {} observations per '{}' group",
            min_observed, group_column
        )));
    }
    matrix.subset_features(&keep_indices)
}

/// Column indices of each level of a categorical column.
fn build_group_indices(
    matrix: &QuantMatrix,
    metadata: &SampleMetadata,
    group_column: &str,
) -> Result<BTreeMap<String, Vec<usize>>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (col, sample_id) in matrix.sample_ids().iter().enumerate() {
        let value = metadata.get(sample_id, group_column).ok_or_else(|| {
            DaaError::SampleMismatch(format!(
                "Sample '{}' has no value for '{}'",
                sample_id, group_column
            ))
        })?;
        let label = value.as_categorical().ok_or_else(|| DaaError::InvalidVariableType {
            column: group_column.to_string(),
            reason: "grouping column must be categorical".to_string(),
        })?;
        groups.entry(label.to_string()).or_default().push(col);
    }
    Ok(groups)
}
