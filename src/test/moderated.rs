//! Moderated t-tests on coefficients of a moderated fit.

use crate::data::ExcludedFeature;
use crate::error::{DaaError, Result};
use crate::model::ModeratedFit;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Result of a moderated test for a single feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratedResultSingle {
    /// Feature identifier.
    pub feature_id: String,
    /// Coefficient name being tested.
    pub coefficient: String,
    /// Estimated coefficient value.
    pub estimate: f64,
    /// Moderated standard error.
    pub std_error: f64,
    /// t-statistic using the feature's own residual variance.
    pub t_ordinary: f64,
    /// Moderated t-statistic.
    pub statistic: f64,
    /// P-value.
    pub p_value: f64,
    /// Degrees of freedom of the reference distribution.
    pub df_total: f64,
    /// Mean of the observed values.
    pub amean: f64,
    /// Number of child rows behind the feature.
    pub support: usize,
}

/// Moderated tests of one coefficient across all features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratedTest {
    /// Results of the tested features.
    pub results: Vec<ModeratedResultSingle>,
    /// Coefficient name being tested.
    pub coefficient: String,
    /// Effect-size threshold of the null hypothesis, for TREAT tests.
    pub lfc_threshold: Option<f64>,
    /// Features that could not be tested.
    pub excluded: Vec<ExcludedFeature>,
}

impl ModeratedTest {
    /// Number of tests.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Get p-values for all tested features.
    pub fn p_values(&self) -> Vec<f64> {
        self.results.iter().map(|r| r.p_value).collect()
    }

    /// Get estimates for all tested features.
    pub fn estimates(&self) -> Vec<f64> {
        self.results.iter().map(|r| r.estimate).collect()
    }

    /// Get feature IDs of the tested features.
    pub fn feature_ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.feature_id.as_str()).collect()
    }

    /// Get result for a specific feature.
    pub fn get_feature(&self, feature_id: &str) -> Option<&ModeratedResultSingle> {
        self.results.iter().find(|r| r.feature_id == feature_id)
    }
}

/// `P(T > t)` for a t-distribution, the normal when `df` is infinite.
fn upper_tail(t: f64, df: f64) -> f64 {
    if t.is_nan() || df.is_nan() || df <= 0.0 {
        return f64::NAN;
    }
    if df.is_infinite() {
        return Normal::new(0.0, 1.0).map(|n| n.sf(t)).unwrap_or(f64::NAN);
    }
    StudentsT::new(0.0, 1.0, df)
        .map(|d| d.sf(t))
        .unwrap_or(f64::NAN)
}

/// Moderated t-test of `H0: beta = 0` for every fitted feature.
///
/// The statistic is `beta / (stdev_unscaled * sqrt(s2_post))`, referred to
/// a t-distribution with the total (prior + residual) degrees of freedom.
/// Features without a fit are listed in `excluded` instead of receiving
/// statistics.
pub fn test_moderated(fit: &ModeratedFit, coefficient: &str) -> Result<ModeratedTest> {
    run_test(fit, coefficient, None)
}

/// Moderated test relative to a fold-change threshold (TREAT).
///
/// Tests `H0: |beta| <= lfc` against `H1: |beta| > lfc`. The p-value is
/// `P(T > (|b| - lfc)/se) + P(T > (|b| + lfc)/se)`, never smaller than the
/// p-value of [`test_moderated`]. The reported statistic is
/// `sign(b) * max((|b| - lfc)/se, 0)`, which is zero for every estimate
/// inside the threshold.
pub fn test_treat(fit: &ModeratedFit, coefficient: &str, lfc: f64) -> Result<ModeratedTest> {
    if !(lfc >= 0.0 && lfc.is_finite()) {
        return Err(DaaError::InvalidParameter(format!(
            "Fold-change threshold must be finite and non-negative, got {}",
            lfc
        )));
    }
    run_test(fit, coefficient, Some(lfc))
}

fn run_test(fit: &ModeratedFit, coefficient: &str, lfc: Option<f64>) -> Result<ModeratedTest> {
    let coef_idx = fit.fit.coefficient_index(coefficient).ok_or_else(|| {
        DaaError::InvalidParameter(format!(
            "Coefficient '{}' not found. Available: {:?}",
            coefficient, fit.fit.coefficient_names
        ))
    })?;

    let mut results = Vec::with_capacity(fit.n_features());
    let mut excluded = Vec::new();

    for (i, f) in fit.fit.fits.iter().enumerate() {
        if !f.status.is_ok() {
            excluded.push(ExcludedFeature {
                feature_id: f.feature_id.clone(),
                reason: f.status.reason(),
            });
            continue;
        }

        let estimate = f.coefficients[coef_idx];
        let std_error = fit.std_error(i, coef_idx);
        let df = fit.df_total[i];
        let ordinary_se = f.std_error(coef_idx).unwrap_or(f64::NAN);
        let t_ordinary = if ordinary_se > 0.0 {
            estimate / ordinary_se
        } else {
            f64::NAN
        };

        let (statistic, p_value) = if !(std_error > 0.0) {
            (f64::NAN, f64::NAN)
        } else {
            match lfc {
                None => {
                    let t = estimate / std_error;
                    (t, (2.0 * upper_tail(t.abs(), df)).min(1.0))
                }
                Some(lfc) => {
                    let right = (estimate.abs() - lfc) / std_error;
                    let left = (estimate.abs() + lfc) / std_error;
                    let p = (upper_tail(right, df) + upper_tail(left, df)).min(1.0);
                    (estimate.signum() * right.max(0.0), p)
                }
            }
        };

        results.push(ModeratedResultSingle {
            feature_id: f.feature_id.clone(),
            coefficient: coefficient.to_string(),
            estimate,
            std_error,
            t_ordinary,
            statistic,
            p_value,
            df_total: df,
            amean: f.amean,
            support: f.support,
        });
    }

    if !excluded.is_empty() {
        log::warn!(
            "{} features excluded from testing '{}'",
            excluded.len(),
            coefficient
        );
    }

    Ok(ModeratedTest {
        results,
        coefficient: coefficient.to_string(),
        lfc_threshold: lfc,
        excluded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DesignMatrix, Formula, QuantMatrix, SampleMetadata};
    use crate::model::{model_lm, moderate, EbayesConfig};
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn create_moderated() -> ModeratedFit {
        let sample_ids: Vec<String> = (1..=6).map(|i| format!("S{}", i)).collect();
        let meta =
            SampleMetadata::from_labels("condition", &sample_ids, &["A", "A", "A", "B", "B", "B"])
                .unwrap();
        let design =
            DesignMatrix::from_formula(&meta, &Formula::parse("~ condition").unwrap()).unwrap();

        let nan = f64::NAN;
        let data = DMatrix::from_row_slice(6, 6, &[
            10.0, 10.2, 9.8, 12.1, 11.9, 12.0,
            15.0, 15.3, 14.6, 15.1, 14.8, 15.2,
            20.0, 19.5, 20.4, 19.0, 18.9, 19.3,
            8.0, 8.4, 7.9, 8.1, 8.3, 7.7,
            11.0, 11.6, 10.7, 11.2, 11.1, 11.4,
            9.0, nan, nan, nan, nan, nan,
        ]);
        let mat = QuantMatrix::new(
            data,
            (1..=6).map(|i| format!("P{}", i)).collect(),
            sample_ids,
        )
        .unwrap();
        let fit = model_lm(&mat, &design).unwrap();
        moderate(fit, &EbayesConfig::default()).unwrap()
    }

    #[test]
    fn test_moderated_basic() {
        let moderated = create_moderated();
        let test = test_moderated(&moderated, "conditionB").unwrap();

        assert_eq!(test.len(), 5);
        assert_eq!(test.excluded.len(), 1);
        assert_eq!(test.excluded[0].feature_id, "P6");

        let p1 = test.get_feature("P1").unwrap();
        assert_relative_eq!(p1.estimate, 2.0, epsilon = 1e-10);
        assert!(p1.statistic > 0.0);
        assert!(p1.p_value < 0.001);
        assert_relative_eq!(p1.statistic, p1.estimate / p1.std_error, epsilon = 1e-12);

        for r in &test.results {
            assert!(r.p_value > 0.0 && r.p_value <= 1.0);
            assert!(r.df_total >= 4.0);
        }
    }

    #[test]
    fn test_treat_is_more_conservative() {
        let moderated = create_moderated();
        let plain = test_moderated(&moderated, "conditionB").unwrap();
        let treat = test_treat(&moderated, "conditionB", 1.0).unwrap();
        assert_eq!(treat.lfc_threshold, Some(1.0));

        for (p, t) in plain.results.iter().zip(&treat.results) {
            assert!(t.p_value >= p.p_value - 1e-15);
            assert_eq!(t.statistic.signum() * p.statistic.signum() >= 0.0, true);
            if p.estimate.abs() <= 1.0 {
                assert_eq!(t.statistic, 0.0);
            }
        }
    }

    #[test]
    fn test_treat_zero_threshold_matches_plain() {
        let moderated = create_moderated();
        let plain = test_moderated(&moderated, "conditionB").unwrap();
        let treat = test_treat(&moderated, "conditionB", 0.0).unwrap();
        for (p, t) in plain.results.iter().zip(&treat.results) {
            assert_relative_eq!(p.p_value, t.p_value, max_relative = 1e-10);
            assert_relative_eq!(p.statistic, t.statistic, max_relative = 1e-10);
        }
        assert!(test_treat(&moderated, "conditionB", -1.0).is_err());
    }

    #[test]
    fn test_unknown_coefficient() {
        let moderated = create_moderated();
        assert!(test_moderated(&moderated, "conditionC").is_err());
    }

    #[test]
    fn test_infinite_df_uses_normal() {
        assert_relative_eq!(upper_tail(1.959963984540054, f64::INFINITY), 0.025, epsilon = 1e-9);
        assert_relative_eq!(upper_tail(0.0, 5.0), 0.5, epsilon = 1e-12);
        assert!(upper_tail(1.0, 0.0).is_nan());
    }
}
