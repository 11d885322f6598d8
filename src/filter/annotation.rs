//! Row filters on annotation (QC) columns.

use crate::data::QuantMatrix;
use crate::error::{DaaError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A predicate on one annotation column.
///
/// Numeric predicates treat a missing annotation as failing; a value that
/// is present but not numeric is an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationFilter {
    /// Keep rows whose value equals `value`.
    Equals { column: String, value: String },
    /// Keep rows whose value differs from `value`.
    NotEquals { column: String, value: String },
    /// Keep rows whose value matches a regular expression.
    Matches { column: String, pattern: String },
    /// Drop rows whose value matches a regular expression.
    NotMatches { column: String, pattern: String },
    /// Keep rows whose numeric value is at least `min`.
    AtLeast { column: String, min: f64 },
    /// Keep rows whose numeric value is at most `max`.
    AtMost { column: String, max: f64 },
}

impl AnnotationFilter {
    /// Column the predicate reads.
    pub fn column(&self) -> &str {
        match self {
            Self::Equals { column, .. }
            | Self::NotEquals { column, .. }
            | Self::Matches { column, .. }
            | Self::NotMatches { column, .. }
            | Self::AtLeast { column, .. }
            | Self::AtMost { column, .. } => column,
        }
    }

    /// Evaluate the predicate on every row.
    fn mask(&self, matrix: &QuantMatrix) -> Result<Vec<bool>> {
        let values = matrix.features().column(self.column())?;
        match self {
            Self::Equals { value, .. } => Ok(values.iter().map(|v| *v == value.as_str()).collect()),
            Self::NotEquals { value, .. } => Ok(values.iter().map(|v| *v != value.as_str()).collect()),
            Self::Matches { pattern, .. } | Self::NotMatches { pattern, .. } => {
                let re = Regex::new(pattern).map_err(|e| {
                    DaaError::InvalidParameter(format!("Invalid pattern '{}': {}", pattern, e))
                })?;
                let keep_on_match = matches!(self, Self::Matches { .. });
                Ok(values
                    .iter()
                    .map(|v| re.is_match(v) == keep_on_match)
                    .collect())
            }
            Self::AtLeast { min, .. } => self.numeric_mask(matrix, &values, |x| x >= *min),
            Self::AtMost { max, .. } => self.numeric_mask(matrix, &values, |x| x <= *max),
        }
    }

    fn numeric_mask(
        &self,
        matrix: &QuantMatrix,
        values: &[&str],
        pass: impl Fn(f64) -> bool,
    ) -> Result<Vec<bool>> {
        values
            .iter()
            .enumerate()
            .map(|(row, raw)| {
                let raw = raw.trim();
                if raw.is_empty() || raw == "NA" {
                    return Ok(false);
                }
                raw.parse::<f64>()
                    .map(&pass)
                    .map_err(|_| DaaError::InvalidValue {
                        value: raw.to_string(),
                        row,
                        column: format!("{} (feature {})", self.column(), matrix.feature_ids()[row]),
                    })
            })
            .collect()
    }
}

/// Keep rows that pass every filter.
pub fn filter_annotation(matrix: &QuantMatrix, filters: &[AnnotationFilter]) -> Result<QuantMatrix> {
    let mut keep = vec![true; matrix.n_features()];
    for filter in filters {
        for (k, pass) in keep.iter_mut().zip(filter.mask(matrix)?) {
            *k &= pass;
        }
    }

    let keep_indices: Vec<usize> = keep
        .iter()
        .enumerate()
        .filter(|(_, &k)| k)
        .map(|(i, _)| i)
        .collect();
    if keep_indices.is_empty() {
        return Err(DaaError::EmptyData(
            "No rows pass the annotation filters".to_string(),
        ));
    }
    matrix.subset_features(&keep_indices)
}

/// Result of a filtering step with statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterResult {
    /// Number of features before filtering.
    pub n_before: usize,
    /// Number of features after filtering.
    pub n_after: usize,
    /// Number of features removed.
    pub n_removed: usize,
    /// Proportion of features retained.
    pub retention_rate: f64,
}

impl FilterResult {
    /// Statistics of a filter that took `before` rows down to `after`.
    pub fn between(before: &QuantMatrix, after: &QuantMatrix) -> Self {
        let n_before = before.n_features();
        let n_after = after.n_features();
        Self {
            n_before,
            n_after,
            n_removed: n_before - n_after,
            retention_rate: if n_before == 0 {
                0.0
            } else {
                n_after as f64 / n_before as f64
            },
        }
    }
}

impl std::fmt::Display for FilterResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Filter Result")?;
        writeln!(f, "  Before:    {} features", self.n_before)?;
        writeln!(f, "  After:     {} features", self.n_after)?;
        writeln!(f, "  Removed:   {} features", self.n_removed)?;
        writeln!(f, "  Retained:  {:.1}%", self.retention_rate * 100.0)?;
        Ok(())
    }
}

/// Annotation filtering with statistics about what was removed.
pub fn filter_annotation_with_stats(
    matrix: &QuantMatrix,
    filters: &[AnnotationFilter],
) -> Result<(QuantMatrix, FilterResult)> {
    let filtered = filter_annotation(matrix, filters)?;
    let stats = FilterResult::between(matrix, &filtered);
    Ok((filtered, stats))
}
