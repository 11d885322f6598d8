//! Per-sample centering on a log scale.
//!
//! Subtracting a per-sample location statistic removes loading differences
//! between samples while keeping every within-sample difference between
//! features intact.

use crate::data::QuantMatrix;
use crate::error::{DaaError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Location statistic subtracted from each sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CenterStatistic {
    /// Median of the finite values.
    #[default]
    Median,
    /// Mean of the finite values.
    Mean,
}

/// Result of centering.
#[derive(Debug, Clone)]
pub struct CenteredMatrix {
    /// The centered matrix.
    pub matrix: QuantMatrix,
    /// Statistic subtracted from each sample, in column order.
    pub offsets: Vec<f64>,
    /// Which statistic was used.
    pub statistic: CenterStatistic,
}

/// Median of the finite values of a slice, `NaN` if there are none.
pub fn finite_median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn finite_mean(values: &[f64]) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |acc, v| (acc.0 + v, acc.1 + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Center every sample on its median or mean.
///
/// Expects log-scale values. After median centering every column's median
/// over its finite values is zero. Missing values stay missing.
pub fn normalize_center(matrix: &QuantMatrix, statistic: CenterStatistic) -> Result<CenteredMatrix> {
    let offsets: Vec<f64> = (0..matrix.n_samples())
        .into_par_iter()
        .map(|j| {
            let col = matrix.col(j);
            match statistic {
                CenterStatistic::Median => finite_median(&col),
                CenterStatistic::Mean => finite_mean(&col),
            }
        })
        .collect();

    if let Some(j) = offsets.iter().position(|o| o.is_nan()) {
        return Err(DaaError::EmptyData(format!(
            "Sample '{}' has no observed values",
            matrix.sample_ids()[j]
        )));
    }

    let mut data = matrix.matrix().clone();
    for (j, offset) in offsets.iter().enumerate() {
        data.column_mut(j).add_scalar_mut(-offset);
    }

    log::debug!(
        "Centered {} samples on the {:?} (offsets {:?})",
        offsets.len(),
        statistic,
        offsets
    );

    Ok(CenteredMatrix {
        matrix: matrix.with_values(data)?,
        offsets,
        statistic,
    })
}

/// Median-center every sample.
pub fn normalize_median(matrix: &QuantMatrix) -> Result<CenteredMatrix> {
    normalize_center(matrix, CenterStatistic::Median)
}
