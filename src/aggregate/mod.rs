//! Aggregation of child rows (PSMs, peptides) into parent features.
//!
//! Rows sharing a value in a grouping column are combined sample by sample.
//! How missing values are combined is an explicit choice: summing only the
//! observed children favours parents with complete rows, propagating a
//! single gap discards the whole cell.

use crate::data::{FeatureMetadata, QuantMatrix};
use crate::error::{DaaError, Result};
use crate::normalize::finite_median;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const POLISH_MAX_ITER: usize = 10;
const POLISH_EPS: f64 = 0.01;

/// How child values are combined within a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateMethod {
    /// Column sums (raw intensities).
    #[default]
    Sum,
    /// Arithmetic mean.
    Mean,
    /// Median.
    Median,
    /// Tukey median polish on the child x sample block: the parent value is
    /// the overall effect plus the sample effect. Expects log-scale input
    /// and always ignores missing cells.
    MedianPolish,
}

/// Treatment of missing child values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Any missing child makes the parent cell missing.
    #[default]
    Propagate,
    /// Combine the observed children; missing only if all are missing.
    Ignore,
}

/// Combine rows that share a key in `key_column`.
///
/// Output rows follow the order in which keys first appear and are named
/// by the key. Each output row's support count is the number of child rows
/// combined into it. Annotation columns whose value is constant within
/// every group are carried over; the others are dropped.
///
/// Every row must have a key: remove unkeyed rows first with
/// [`filter_missing_key`](crate::filter::filter_missing_key).
pub fn aggregate_features(
    matrix: &QuantMatrix,
    key_column: &str,
    method: AggregateMethod,
    missing: MissingPolicy,
) -> Result<QuantMatrix> {
    let keys = matrix.features().column(key_column)?;

    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (row, key) in keys.iter().enumerate() {
        let key = key.trim();
        if key.is_empty() || key == "NA" {
            return Err(DaaError::MissingGroupingKey {
                feature: matrix.feature_ids()[row].clone(),
                row,
                column: key_column.to_string(),
            });
        }
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(row);
    }

    let members: Vec<&Vec<usize>> = order.iter().map(|k| &groups[k]).collect();
    let n_samples = matrix.n_samples();

    let rows: Vec<Vec<f64>> = members
        .par_iter()
        .map(|children| {
            let block: Vec<Vec<f64>> = children.iter().map(|&i| matrix.row(i)).collect();
            match method {
                AggregateMethod::MedianPolish => median_polish(&block, n_samples),
                _ => (0..n_samples)
                    .map(|j| {
                        let cells: Vec<f64> = block.iter().map(|r| r[j]).collect();
                        combine_cells(&cells, method, missing)
                    })
                    .collect(),
            }
        })
        .collect();

    let data = DMatrix::from_fn(rows.len(), n_samples, |i, j| rows[i][j]);

    let features = matrix.features();
    let kept: Vec<usize> = (0..features.columns().len())
        .filter(|&c| {
            members.iter().all(|children| {
                let first = &features.row(children[0])[c];
                children.iter().all(|&i| &features.row(i)[c] == first)
            })
        })
        .collect();
    let columns = kept.iter().map(|&c| features.columns()[c].clone()).collect();
    let values = members
        .iter()
        .map(|children| {
            kept.iter()
                .map(|&c| features.row(children[0])[c].clone())
                .collect()
        })
        .collect();
    let support = members.iter().map(|children| children.len()).collect();

    log::debug!(
        "Aggregated {} rows into {} features on '{}' ({:?}, {:?})",
        matrix.n_features(),
        order.len(),
        key_column,
        method,
        missing
    );

    QuantMatrix::with_features(
        data,
        order.iter().map(|k| k.to_string()).collect(),
        matrix.sample_ids().to_vec(),
        FeatureMetadata::new(columns, values, support)?,
    )
}

fn combine_cells(cells: &[f64], method: AggregateMethod, missing: MissingPolicy) -> f64 {
    if missing == MissingPolicy::Propagate && cells.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let observed: Vec<f64> = cells.iter().copied().filter(|v| v.is_finite()).collect();
    if observed.is_empty() {
        return f64::NAN;
    }
    match method {
        AggregateMethod::Sum => observed.iter().sum(),
        AggregateMethod::Mean => observed.iter().sum::<f64>() / observed.len() as f64,
        AggregateMethod::Median | AggregateMethod::MedianPolish => finite_median(&observed),
    }
}

/// Overall + column effects of Tukey's median polish, ignoring missing cells.
fn median_polish(block: &[Vec<f64>], n_samples: usize) -> Vec<f64> {
    let n_rows = block.len();
    let mut z: Vec<Vec<f64>> = block.to_vec();
    let mut overall = 0.0;
    let mut row_effects = vec![0.0; n_rows];
    let mut col_effects = vec![0.0; n_samples];
    let mut old_sum = 0.0;

    let or_zero = |m: f64| if m.is_nan() { 0.0 } else { m };

    for _ in 0..POLISH_MAX_ITER {
        for (i, row) in z.iter_mut().enumerate() {
            let delta = or_zero(finite_median(row));
            row.iter_mut().for_each(|v| *v -= delta);
            row_effects[i] += delta;
        }
        let delta = or_zero(finite_median(&col_effects));
        col_effects.iter_mut().for_each(|v| *v -= delta);
        overall += delta;

        for (j, effect) in col_effects.iter_mut().enumerate() {
            let column: Vec<f64> = z.iter().map(|r| r[j]).collect();
            let delta = or_zero(finite_median(&column));
            z.iter_mut().for_each(|r| r[j] -= delta);
            *effect += delta;
        }
        let delta = or_zero(finite_median(&row_effects));
        row_effects.iter_mut().for_each(|v| *v -= delta);
        overall += delta;

        let new_sum: f64 = z.iter().flatten().filter(|v| v.is_finite()).map(|v| v.abs()).sum();
        if new_sum == 0.0 || (new_sum - old_sum).abs() < POLISH_EPS * new_sum {
            break;
        }
        old_sum = new_sum;
    }

    (0..n_samples)
        .map(|j| {
            if block.iter().any(|r| r[j].is_finite()) {
                overall + col_effects[j]
            } else {
                f64::NAN
            }
        })
        .collect()
}
