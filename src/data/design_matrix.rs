//! Design matrix construction from sample metadata and a formula.

use crate::data::{Formula, SampleMetadata, Variable, VariableType};
use crate::error::{DaaError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the intercept column.
pub const INTERCEPT: &str = "(Intercept)";

/// Tolerance on singular values, relative to the largest, for rank detection.
const RANK_TOLERANCE: f64 = 1e-10;

/// A statistical precondition that does not stop fitting but weakens the
/// interpretation of its results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DesignWarning {
    /// Columns are linearly dependent; some coefficients are not estimable.
    Collinear { rank: usize, n_coefficients: usize },
    /// Group sizes differ by a factor of two or more.
    Imbalanced {
        variable: String,
        smallest: usize,
        largest: usize,
    },
    /// A level is observed in a single sample.
    SingleReplicate { variable: String, level: String },
}

impl std::fmt::Display for DesignWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DesignWarning::Collinear {
                rank,
                n_coefficients,
            } => write!(
                f,
                "design is collinear: rank {} with {} coefficients",
                rank, n_coefficients
            ),
            DesignWarning::Imbalanced {
                variable,
                smallest,
                largest,
            } => write!(
                f,
                "'{}' is imbalanced: group sizes range from {} to {}",
                variable, smallest, largest
            ),
            DesignWarning::SingleReplicate { variable, level } => {
                write!(f, "'{}' level '{}' has a single sample", variable, level)
            }
        }
    }
}

/// A design matrix for linear modeling.
///
/// Built once from sample metadata immediately before fitting; never
/// modified afterwards.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// The design matrix (samples × coefficients).
    matrix: DMatrix<f64>,
    /// Names of the coefficients (columns).
    coefficient_names: Vec<String>,
    /// Sample IDs (rows).
    sample_ids: Vec<String>,
    /// Reference levels for categorical variables.
    reference_levels: HashMap<String, String>,
    /// Per-variable group sizes, for diagnostics.
    group_sizes: Vec<(String, Vec<(String, usize)>)>,
}

impl DesignMatrix {
    /// Create a design matrix directly from components.
    pub fn from_matrix(
        matrix: DMatrix<f64>,
        coefficient_names: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        if matrix.ncols() != coefficient_names.len() {
            return Err(DaaError::DimensionMismatch {
                expected: matrix.ncols(),
                actual: coefficient_names.len(),
            });
        }
        if matrix.nrows() != sample_ids.len() {
            return Err(DaaError::DimensionMismatch {
                expected: matrix.nrows(),
                actual: sample_ids.len(),
            });
        }
        Ok(Self {
            matrix,
            coefficient_names,
            sample_ids,
            reference_levels: HashMap::new(),
            group_sizes: Vec::new(),
        })
    }

    /// Build a design matrix from metadata and formula.
    ///
    /// Categorical variables are treatment coded against their
    /// alphabetically first level.
    pub fn from_formula(metadata: &SampleMetadata, formula: &Formula) -> Result<Self> {
        Self::from_formula_with_reference(metadata, formula, &HashMap::new())
    }

    /// Build a design matrix, choosing the reference level of categorical
    /// variables explicitly (variable -> level).
    pub fn from_formula_with_reference(
        metadata: &SampleMetadata,
        formula: &Formula,
        references: &HashMap<String, String>,
    ) -> Result<Self> {
        let sample_ids = metadata.sample_ids().to_vec();
        let n_samples = sample_ids.len();

        let mut coefficient_names = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();
        let mut reference_levels = HashMap::new();
        let mut group_sizes = Vec::new();

        if formula.intercept {
            coefficient_names.push(INTERCEPT.to_string());
            columns.push(vec![1.0; n_samples]);
        }

        for (term_idx, var_name) in formula.terms.iter().enumerate() {
            let values = metadata.column(var_name)?;
            if let Some(pos) = values.iter().position(|v| v.is_missing()) {
                return Err(DaaError::InvalidVariableType {
                    column: var_name.clone(),
                    reason: format!("sample '{}' has a missing value", sample_ids[pos]),
                });
            }

            match metadata.column_type(var_name) {
                Some(VariableType::Continuous) => {
                    coefficient_names.push(var_name.clone());
                    columns.push(
                        values
                            .iter()
                            .map(|v| v.as_continuous().unwrap_or(f64::NAN))
                            .collect(),
                    );
                }
                Some(VariableType::Categorical) | None => {
                    let levels = metadata.levels(var_name)?;
                    if levels.is_empty() {
                        return Err(DaaError::EmptyData(format!(
                            "Variable '{}' has no levels",
                            var_name
                        )));
                    }
                    let reference = match references.get(var_name) {
                        Some(level) if levels.contains(level) => level.clone(),
                        Some(level) => {
                            return Err(DaaError::InvalidParameter(format!(
                                "Level '{}' not found for variable '{}'",
                                level, var_name
                            )));
                        }
                        None => levels[0].clone(),
                    };
                    // the first factor keeps every level when there is no intercept
                    let drop_reference = formula.intercept || term_idx > 0;
                    for level in &levels {
                        if drop_reference && *level == reference {
                            continue;
                        }
                        coefficient_names.push(format!("{}{}", var_name, level));
                        columns.push(
                            values
                                .iter()
                                .map(|v| match v {
                                    Variable::Categorical(s) if s == level => 1.0,
                                    _ => 0.0,
                                })
                                .collect(),
                        );
                    }
                    reference_levels.insert(var_name.clone(), reference);
                    group_sizes.push((var_name.clone(), metadata.level_counts(var_name)?));
                }
            }
        }

        let mut matrix = DMatrix::zeros(n_samples, columns.len());
        for (col_idx, col) in columns.iter().enumerate() {
            for (row_idx, &val) in col.iter().enumerate() {
                matrix[(row_idx, col_idx)] = val;
            }
        }

        Ok(Self {
            matrix,
            coefficient_names,
            sample_ids,
            reference_levels,
            group_sizes,
        })
    }

    /// Get the design matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Get coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Get sample IDs.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Number of samples (rows).
    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Reference level of a categorical variable.
    pub fn reference_level(&self, variable: &str) -> Option<&str> {
        self.reference_levels.get(variable).map(|s| s.as_str())
    }

    /// Index of a coefficient by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Check if the matrix has an intercept.
    pub fn has_intercept(&self) -> bool {
        self.coefficient_names.first().map(String::as_str) == Some(INTERCEPT)
    }

    /// Numerical rank of the design.
    pub fn rank(&self) -> usize {
        matrix_rank(&self.matrix)
    }

    /// Keep the leading linearly independent columns.
    ///
    /// Columns are taken left to right and one is dropped when it lies in
    /// the span of those already kept. Returns the reduced design and the
    /// names of the dropped coefficients.
    pub fn estimable(&self) -> (DesignMatrix, Vec<String>) {
        let mut kept: Vec<usize> = Vec::new();
        let mut dropped = Vec::new();
        for j in 0..self.n_coefficients() {
            let mut candidate = kept.clone();
            candidate.push(j);
            if matrix_rank(&self.matrix.select_columns(&candidate)) > kept.len() {
                kept = candidate;
            } else {
                dropped.push(self.coefficient_names[j].clone());
            }
        }
        let reduced = DesignMatrix {
            matrix: self.matrix.select_columns(&kept),
            coefficient_names: kept.iter().map(|&j| self.coefficient_names[j].clone()).collect(),
            sample_ids: self.sample_ids.clone(),
            reference_levels: self.reference_levels.clone(),
            group_sizes: self.group_sizes.clone(),
        };
        (reduced, dropped)
    }

    /// Statistical preconditions that should be reported before fitting.
    ///
    /// A [`DesignWarning::Collinear`] design is still fitted: `model_lm`
    /// drops the non-estimable coefficients (see [`DesignMatrix::estimable`]).
    pub fn diagnostics(&self) -> Vec<DesignWarning> {
        let mut warnings = Vec::new();

        let rank = self.rank();
        if rank < self.n_coefficients() {
            warnings.push(DesignWarning::Collinear {
                rank,
                n_coefficients: self.n_coefficients(),
            });
        }

        for (variable, counts) in &self.group_sizes {
            let smallest = counts.iter().map(|(_, n)| *n).min().unwrap_or(0);
            let largest = counts.iter().map(|(_, n)| *n).max().unwrap_or(0);
            if smallest > 0 && largest >= 2 * smallest {
                warnings.push(DesignWarning::Imbalanced {
                    variable: variable.clone(),
                    smallest,
                    largest,
                });
            }
            for (level, n) in counts {
                if *n == 1 {
                    warnings.push(DesignWarning::SingleReplicate {
                        variable: variable.clone(),
                        level: level.clone(),
                    });
                }
            }
        }

        warnings
    }
}

/// Numerical rank from singular values.
pub(crate) fn matrix_rank(m: &DMatrix<f64>) -> usize {
    if m.is_empty() {
        return 0;
    }
    let sv = m.clone().singular_values();
    let max = sv.iter().cloned().fold(0.0_f64, f64::max);
    if max == 0.0 {
        return 0;
    }
    sv.iter().filter(|&&s| s > max * RANK_TOLERANCE).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_metadata() -> SampleMetadata {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample\tcondition\tbatch\tload").unwrap();
        writeln!(file, "S1\tA\tb1\t1.0").unwrap();
        writeln!(file, "S2\tA\tb2\t1.2").unwrap();
        writeln!(file, "S3\tB\tb1\t0.9").unwrap();
        writeln!(file, "S4\tB\tb2\t1.1").unwrap();
        writeln!(file, "S5\tC\tb1\t1.0").unwrap();
        writeln!(file, "S6\tC\tb2\t0.8").unwrap();
        file.flush().unwrap();
        SampleMetadata::from_tsv(file.path()).unwrap()
    }

    #[test]
    fn test_treatment_coding() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ condition").unwrap();
        let dm = DesignMatrix::from_formula(&meta, &formula).unwrap();

        assert_eq!(dm.n_samples(), 6);
        assert_eq!(dm.coefficient_names(), &["(Intercept)", "conditionB", "conditionC"]);
        assert_eq!(dm.reference_level("condition"), Some("A"));
        let col: Vec<f64> = (0..6).map(|i| dm.matrix()[(i, 1)]).collect();
        assert_eq!(col, vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(dm.rank(), 3);
        assert!(dm.diagnostics().is_empty());
    }

    #[test]
    fn test_custom_reference() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ condition").unwrap();
        let mut refs = HashMap::new();
        refs.insert("condition".to_string(), "C".to_string());
        let dm = DesignMatrix::from_formula_with_reference(&meta, &formula, &refs).unwrap();
        assert_eq!(dm.coefficient_names(), &["(Intercept)", "conditionA", "conditionB"]);

        refs.insert("condition".to_string(), "Z".to_string());
        assert!(DesignMatrix::from_formula_with_reference(&meta, &formula, &refs).is_err());
    }

    #[test]
    fn test_no_intercept() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ 0 + condition").unwrap();
        let dm = DesignMatrix::from_formula(&meta, &formula).unwrap();
        assert!(!dm.has_intercept());
        assert_eq!(dm.coefficient_names(), &["conditionA", "conditionB", "conditionC"]);
    }

    #[test]
    fn test_additive_with_continuous() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ condition + batch + load").unwrap();
        let dm = DesignMatrix::from_formula(&meta, &formula).unwrap();
        assert_eq!(
            dm.coefficient_names(),
            &["(Intercept)", "conditionB", "conditionC", "batchb2", "load"]
        );
        assert_eq!(dm.matrix()[(1, 4)], 1.2);
    }

    #[test]
    fn test_collinear_design_is_flagged() {
        let ids: Vec<String> = (1..=4).map(|i| format!("S{}", i)).collect();
        let matrix = DMatrix::from_row_slice(4, 3, &[
            1.0, 0.0, 0.0,
            1.0, 0.0, 0.0,
            1.0, 1.0, 1.0,
            1.0, 1.0, 1.0,
        ]);
        let names = vec!["(Intercept)".into(), "x".into(), "y".into()];
        let dm = DesignMatrix::from_matrix(matrix, names, ids).unwrap();
        assert_eq!(dm.rank(), 2);
        assert!(matches!(
            dm.diagnostics()[0],
            DesignWarning::Collinear { rank: 2, n_coefficients: 3 }
        ));

        let (reduced, dropped) = dm.estimable();
        assert_eq!(reduced.coefficient_names(), &["(Intercept)", "x"]);
        assert_eq!(dropped, vec!["y".to_string()]);
        assert_eq!(reduced.rank(), 2);
        assert!(reduced.diagnostics().is_empty());
    }

    #[test]
    fn test_imbalance_is_flagged() {
        let ids: Vec<String> = (1..=5).map(|i| format!("S{}", i)).collect();
        let meta =
            SampleMetadata::from_labels("condition", &ids, &["A", "A", "A", "A", "B"]).unwrap();
        let formula = Formula::parse("~ condition").unwrap();
        let dm = DesignMatrix::from_formula(&meta, &formula).unwrap();
        let warnings = dm.diagnostics();
        assert!(warnings.contains(&DesignWarning::Imbalanced {
            variable: "condition".into(),
            smallest: 1,
            largest: 4,
        }));
        assert!(warnings.contains(&DesignWarning::SingleReplicate {
            variable: "condition".into(),
            level: "B".into(),
        }));
    }

    #[test]
    fn test_missing_variable() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ genotype").unwrap();
        assert!(matches!(
            DesignMatrix::from_formula(&meta, &formula),
            Err(DaaError::MissingColumn(_))
        ));
    }
}
