//! Per-feature linear model fitting via OLS.

use crate::data::{matrix_rank, DesignMatrix, QuantMatrix};
use crate::error::{DaaError, Result};
use crate::model::Contrast;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Outcome of fitting one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitStatus {
    /// Coefficients and variance were estimated.
    Ok,
    /// Fewer observed samples than design columns.
    TooFewObservations { observed: usize, required: usize },
    /// The design restricted to the observed samples is rank deficient.
    SingularDesign { rank: usize, required: usize },
}

impl FitStatus {
    /// Check if the feature was fitted.
    pub fn is_ok(&self) -> bool {
        matches!(self, FitStatus::Ok)
    }

    /// Human readable reason for an exclusion.
    pub fn reason(&self) -> String {
        match self {
            FitStatus::Ok => "fitted".to_string(),
            FitStatus::TooFewObservations { observed, required } => format!(
                "too few observations ({} observed, {} required)",
                observed, required
            ),
            FitStatus::SingularDesign { rank, required } => format!(
                "observed design is singular (rank {} of {})",
                rank, required
            ),
        }
    }
}

/// Results from fitting a linear model to a single feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmFitSingle {
    /// Feature identifier.
    pub feature_id: String,
    /// Estimated coefficients.
    pub coefficients: Vec<f64>,
    /// Square roots of the diagonal of the unscaled covariance
    /// `(X'X)^-1`; multiply by sigma for standard errors.
    pub stdev_unscaled: Vec<f64>,
    /// Unscaled covariance of the coefficients (row-major).
    #[serde(skip)]
    pub cov_unscaled: Vec<f64>,
    /// Residual variance (`NaN` without residual degrees of freedom).
    pub s2: f64,
    /// Residual degrees of freedom: observations minus coefficients.
    pub df_residual: usize,
    /// Number of observed (finite) values used.
    pub n_obs: usize,
    /// Mean of the observed values.
    pub amean: f64,
    /// Number of child rows behind this feature.
    pub support: usize,
    /// Whether the fit succeeded, and why not.
    pub status: FitStatus,
}

impl LmFitSingle {
    /// Residual standard deviation.
    pub fn sigma(&self) -> f64 {
        self.s2.sqrt()
    }

    /// Ordinary standard error of a coefficient.
    pub fn std_error(&self, index: usize) -> Option<f64> {
        self.stdev_unscaled.get(index).map(|s| s * self.sigma())
    }

    /// Ordinary t-statistic for a coefficient.
    pub fn t_statistic(&self, index: usize) -> Option<f64> {
        let coef = self.coefficients.get(index)?;
        let se = self.std_error(index)?;
        if se > 0.0 {
            Some(coef / se)
        } else {
            None
        }
    }

    fn excluded(
        feature_id: &str,
        n_coef: usize,
        n_obs: usize,
        amean: f64,
        support: usize,
        status: FitStatus,
    ) -> Self {
        Self {
            feature_id: feature_id.to_string(),
            coefficients: vec![f64::NAN; n_coef],
            stdev_unscaled: vec![f64::NAN; n_coef],
            cov_unscaled: Vec::new(),
            s2: f64::NAN,
            df_residual: 0,
            n_obs,
            amean,
            support,
            status,
        }
    }
}

/// Results from fitting linear models to all features.
#[derive(Debug, Clone)]
pub struct LmFit {
    /// Individual fits for each feature, in matrix row order.
    pub fits: Vec<LmFitSingle>,
    /// Coefficient (or contrast) names.
    pub coefficient_names: Vec<String>,
    /// Number of samples.
    pub n_samples: usize,
}

impl LmFit {
    /// Get the fit for a specific feature by ID.
    pub fn get_feature(&self, feature_id: &str) -> Option<&LmFitSingle> {
        self.fits.iter().find(|f| f.feature_id == feature_id)
    }

    /// Get coefficient index by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// All estimates of one coefficient.
    pub fn coefficients_for(&self, coefficient_name: &str) -> Option<Vec<f64>> {
        let idx = self.coefficient_index(coefficient_name)?;
        Some(self.fits.iter().map(|f| f.coefficients[idx]).collect())
    }

    /// Number of features.
    pub fn n_features(&self) -> usize {
        self.fits.len()
    }

    /// Number of coefficients.
    pub fn n_coefficients(&self) -> usize {
        self.coefficient_names.len()
    }

    /// Count of fitted features.
    pub fn n_fitted(&self) -> usize {
        self.fits.iter().filter(|f| f.status.is_ok()).count()
    }

    /// Features that could not be fitted.
    pub fn excluded(&self) -> Vec<&LmFitSingle> {
        self.fits.iter().filter(|f| !f.status.is_ok()).collect()
    }

    /// Re-express the fit in terms of contrasts.
    ///
    /// Each contrast becomes a coefficient: its estimate is the weighted sum
    /// of the coefficients and its unscaled standard deviation comes from
    /// the feature's own unscaled covariance, so features with missing
    /// samples are handled exactly. Variances and degrees of freedom are
    /// unchanged.
    pub fn contrasts(&self, contrasts: &[Contrast]) -> Result<LmFit> {
        let p = self.n_coefficients();
        if contrasts.is_empty() {
            return Err(DaaError::InvalidParameter("No contrasts given".to_string()));
        }
        if let Some(c) = contrasts.iter().find(|c| c.weights.len() != p) {
            return Err(DaaError::DimensionMismatch {
                expected: p,
                actual: c.weights.len(),
            });
        }

        let fits = self
            .fits
            .par_iter()
            .map(|f| {
                if !f.status.is_ok() {
                    return LmFitSingle {
                        coefficients: vec![f64::NAN; contrasts.len()],
                        stdev_unscaled: vec![f64::NAN; contrasts.len()],
                        cov_unscaled: Vec::new(),
                        ..f.clone()
                    };
                }
                let beta = DVector::from_column_slice(&f.coefficients);
                let cov = DMatrix::from_row_slice(p, p, &f.cov_unscaled);
                let c = DMatrix::from_fn(p, contrasts.len(), |i, j| contrasts[j].weights[i]);
                let estimates = c.transpose() * beta;
                let cov_c = c.transpose() * cov * &c;
                LmFitSingle {
                    coefficients: estimates.iter().copied().collect(),
                    stdev_unscaled: (0..contrasts.len()).map(|j| cov_c[(j, j)].sqrt()).collect(),
                    cov_unscaled: cov_c.transpose().iter().copied().collect(),
                    ..f.clone()
                }
            })
            .collect();

        Ok(LmFit {
            fits,
            coefficient_names: contrasts.iter().map(|c| c.name.clone()).collect(),
            n_samples: self.n_samples,
        })
    }
}

/// Fit a linear model to every feature of a log-scale matrix.
///
/// Each feature is regressed on the design using only its observed
/// samples. Complete features share a precomputed `(X'X)^-1`. A feature
/// with fewer observations than coefficients, or whose observed samples do
/// not support every coefficient, is kept with a non-`Ok`
/// [`FitStatus`] and no estimates.
///
/// The design rows must follow the matrix columns. A rank-deficient design
/// is reduced to its estimable coefficients with a warning; the dropped
/// coefficients are absent from the fit.
pub fn model_lm(matrix: &QuantMatrix, design: &DesignMatrix) -> Result<LmFit> {
    let n_features = matrix.n_features();
    let n_samples = matrix.n_samples();
    let n_coef = design.n_coefficients();

    if design.n_samples() != n_samples {
        return Err(DaaError::DimensionMismatch {
            expected: n_samples,
            actual: design.n_samples(),
        });
    }
    if design.sample_ids() != matrix.sample_ids() {
        return Err(DaaError::SampleMismatch(
            "Design rows do not follow the matrix columns".to_string(),
        ));
    }
    if design.n_coefficients() > 0 && design.rank() < n_coef {
        let (reduced, dropped) = design.estimable();
        if reduced.n_coefficients() > 0 {
            log::warn!(
                "Coefficients not estimable from the design, dropped: {}",
                dropped.join(", ")
            );
            return model_lm(matrix, &reduced);
        }
    }

    let x = design.matrix();
    let rank = matrix_rank(x);
    if rank < n_coef {
        return Err(DaaError::Numerical(format!(
            "Design matrix is rank deficient (rank {} < {} coefficients)",
            rank, n_coef
        )));
    }

    let xtx_inv = (x.transpose() * x).try_inverse().ok_or_else(|| {
        DaaError::Numerical("Design matrix is singular (X'X not invertible)".to_string())
    })?;

    let fits: Vec<LmFitSingle> = (0..n_features)
        .into_par_iter()
        .map(|i| {
            fit_single_feature(
                &matrix.row(i),
                &matrix.feature_ids()[i],
                matrix.support(i),
                x,
                &xtx_inv,
            )
        })
        .collect();

    let fit = LmFit {
        fits,
        coefficient_names: design.coefficient_names().to_vec(),
        n_samples,
    };
    let n_excluded = n_features - fit.n_fitted();
    if n_excluded > 0 {
        log::warn!(
            "{} of {} features could not be fitted and are excluded",
            n_excluded,
            n_features
        );
    }
    log::debug!(
        "Fitted {} features on {} coefficients",
        fit.n_fitted(),
        n_coef
    );
    Ok(fit)
}

/// Fit a single feature, dropping its missing samples.
fn fit_single_feature(
    y: &[f64],
    feature_id: &str,
    support: usize,
    x: &DMatrix<f64>,
    xtx_inv: &DMatrix<f64>,
) -> LmFitSingle {
    let n_coef = x.ncols();
    let observed: Vec<usize> = (0..y.len()).filter(|&j| y[j].is_finite()).collect();
    let n_obs = observed.len();
    let amean = if n_obs == 0 {
        f64::NAN
    } else {
        observed.iter().map(|&j| y[j]).sum::<f64>() / n_obs as f64
    };

    if n_obs < n_coef {
        return LmFitSingle::excluded(
            feature_id,
            n_coef,
            n_obs,
            amean,
            support,
            FitStatus::TooFewObservations {
                observed: n_obs,
                required: n_coef,
            },
        );
    }

    let (x_obs, cov) = if n_obs == y.len() {
        (x.clone(), xtx_inv.clone())
    } else {
        let x_obs = x.select_rows(&observed);
        let rank = matrix_rank(&x_obs);
        let inverse = if rank < n_coef {
            None
        } else {
            (x_obs.transpose() * &x_obs).try_inverse()
        };
        match inverse {
            Some(cov) => (x_obs, cov),
            None => {
                return LmFitSingle::excluded(
                    feature_id,
                    n_coef,
                    n_obs,
                    amean,
                    support,
                    FitStatus::SingularDesign {
                        rank,
                        required: n_coef,
                    },
                )
            }
        }
    };

    let y_vec = DVector::from_iterator(n_obs, observed.iter().map(|&j| y[j]));
    let beta = &cov * (x_obs.transpose() * &y_vec);
    let residuals = &y_vec - &x_obs * &beta;
    let rss: f64 = residuals.iter().map(|e| e * e).sum();

    let df_residual = n_obs - n_coef;
    let s2 = if df_residual > 0 {
        rss / df_residual as f64
    } else {
        f64::NAN
    };

    LmFitSingle {
        feature_id: feature_id.to_string(),
        coefficients: beta.iter().copied().collect(),
        stdev_unscaled: (0..n_coef).map(|j| cov[(j, j)].sqrt()).collect(),
        cov_unscaled: cov.transpose().iter().copied().collect(),
        s2,
        df_residual,
        n_obs,
        amean,
        support,
        status: FitStatus::Ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Formula, SampleMetadata};
    use approx::assert_relative_eq;

    fn sample_ids() -> Vec<String> {
        (1..=6).map(|i| format!("S{}", i)).collect()
    }

    fn create_design(labels: &[&str]) -> DesignMatrix {
        let meta = SampleMetadata::from_labels("condition", &sample_ids(), labels).unwrap();
        DesignMatrix::from_formula(&meta, &Formula::parse("~ condition").unwrap()).unwrap()
    }

    fn create_matrix(values: &[f64], n_features: usize) -> QuantMatrix {
        QuantMatrix::new(
            DMatrix::from_row_slice(n_features, 6, values),
            (0..n_features).map(|i| format!("P{}", i)).collect(),
            sample_ids(),
        )
        .unwrap()
    }

    #[test]
    fn test_two_group_estimates() {
        let design = create_design(&["A", "A", "A", "B", "B", "B"]);
        let mat = create_matrix(
            &[
                1.0, 1.2, 0.8, 3.0, 3.2, 2.8,
                5.0, 5.5, 4.5, 5.0, 4.0, 6.0,
            ],
            2,
        );
        let fit = model_lm(&mat, &design).unwrap();

        assert_eq!(fit.coefficient_names, vec!["(Intercept)", "conditionB"]);
        let f0 = &fit.fits[0];
        assert_relative_eq!(f0.coefficients[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(f0.coefficients[1], 2.0, epsilon = 1e-12);
        assert_eq!(f0.df_residual, 4);
        // residuals +-0.2 and 0 in each group
        assert_relative_eq!(f0.s2, 0.16 / 4.0, epsilon = 1e-12);
        assert_relative_eq!(f0.stdev_unscaled[1], (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(f0.amean, 2.0, epsilon = 1e-12);

        let f1 = &fit.fits[1];
        assert_relative_eq!(f1.coefficients[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(f1.s2, 2.5 / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_effect_zero_noise() {
        let design = create_design(&["A", "A", "A", "B", "B", "B"]);
        let mat = create_matrix(&[7.5; 6], 1);
        let fit = model_lm(&mat, &design).unwrap();
        let f = &fit.fits[0];
        assert_relative_eq!(f.coefficients[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(f.s2, 0.0, epsilon = 1e-24);
        assert_eq!(f.status, FitStatus::Ok);
    }

    #[test]
    fn test_missing_values_use_observed_samples() {
        let design = create_design(&["A", "A", "A", "B", "B", "B"]);
        let nan = f64::NAN;
        let mat = create_matrix(&[1.0, nan, 1.0, 3.0, 3.0, nan], 1);
        let fit = model_lm(&mat, &design).unwrap();
        let f = &fit.fits[0];
        assert_eq!(f.n_obs, 4);
        assert_eq!(f.df_residual, 2);
        assert_relative_eq!(f.coefficients[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(f.stdev_unscaled[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_too_few_observations_flagged() {
        let design = create_design(&["A", "A", "A", "B", "B", "B"]);
        let nan = f64::NAN;
        let mat = create_matrix(&[1.0, nan, nan, nan, nan, nan], 1);
        let fit = model_lm(&mat, &design).unwrap();
        let f = &fit.fits[0];
        assert_eq!(
            f.status,
            FitStatus::TooFewObservations {
                observed: 1,
                required: 2
            }
        );
        assert!(f.coefficients.iter().all(|c| c.is_nan()));
        assert_eq!(fit.excluded().len(), 1);
    }

    #[test]
    fn test_group_entirely_missing_is_singular() {
        let design = create_design(&["A", "A", "A", "B", "B", "B"]);
        let nan = f64::NAN;
        let mat = create_matrix(&[1.0, 2.0, 1.5, nan, nan, nan], 1);
        let fit = model_lm(&mat, &design).unwrap();
        assert!(matches!(
            fit.fits[0].status,
            FitStatus::SingularDesign { rank: 1, required: 2 }
        ));
    }

    #[test]
    fn test_contrasts() {
        let design = create_design(&["A", "A", "B", "B", "C", "C"]);
        let mat = create_matrix(&[1.0, 1.0, 2.0, 2.2, 4.0, 4.4], 1);
        let fit = model_lm(&mat, &design).unwrap();

        let c = Contrast::parse("conditionC - conditionB", &fit.coefficient_names).unwrap();
        let single = Contrast::coefficient("conditionB", &fit.coefficient_names).unwrap();
        let cfit = fit.contrasts(&[c, single]).unwrap();

        assert_eq!(cfit.coefficient_names, vec!["conditionC - conditionB", "conditionB"]);
        let f = &cfit.fits[0];
        assert_relative_eq!(f.coefficients[0], 2.1, epsilon = 1e-12);
        assert_relative_eq!(f.coefficients[1], fit.fits[0].coefficients[1], epsilon = 1e-12);
        assert_relative_eq!(f.stdev_unscaled[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(f.stdev_unscaled[1], fit.fits[0].stdev_unscaled[1], epsilon = 1e-12);
        assert_relative_eq!(f.s2, fit.fits[0].s2);
    }

    #[test]
    fn test_dimension_mismatch() {
        let design = create_design(&["A", "A", "A", "B", "B", "B"]);
        let mat = QuantMatrix::new(
            DMatrix::from_element(1, 4, 1.0),
            vec!["P0".into()],
            (1..=4).map(|i| format!("S{}", i)).collect(),
        )
        .unwrap();
        assert!(model_lm(&mat, &design).is_err());
    }

    #[test]
    fn test_collinear_design_drops_coefficient() {
        let matrix = DMatrix::from_fn(6, 3, |i, j| if j == 0 || i >= 3 { 1.0 } else { 0.0 });
        let design = DesignMatrix::from_matrix(
            matrix,
            vec!["(Intercept)".into(), "x".into(), "y".into()],
            sample_ids(),
        )
        .unwrap();
        let mat = create_matrix(&[1.0, 1.1, 0.9, 3.0, 3.1, 2.9], 1);
        let fit = model_lm(&mat, &design).unwrap();
        assert_eq!(fit.coefficient_names, vec!["(Intercept)", "x"]);
        let f = &fit.fits[0];
        assert!(f.status.is_ok());
        assert_relative_eq!(f.coefficients[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(f.coefficients[1], 2.0, epsilon = 1e-10);
        assert_eq!(f.df_residual, 4);
    }

    #[test]
    fn test_zero_design_is_error() {
        let design = DesignMatrix::from_matrix(
            DMatrix::zeros(6, 1),
            vec!["x".into()],
            sample_ids(),
        )
        .unwrap();
        let mat = create_matrix(&[1.0; 6], 1);
        assert!(matches!(model_lm(&mat, &design), Err(DaaError::Numerical(_))));
    }
}
