//! Empirical-Bayes moderation of residual variances.
//!
//! Residual variances of all features are treated as draws from a scaled
//! inverse chi-square prior. The prior's degrees of freedom `d0` and scale
//! `s0^2` are estimated by matching moments of the log variances, then each
//! feature's variance is replaced by its posterior mean
//! `(d0 * s0^2 + d * s^2) / (d0 + d)`.
//!
//! Estimating the prior needs every feature's fit, so [`moderate`] takes the
//! complete [`LmFit`] and is the one point in the pipeline where features
//! are no longer independent.

use crate::data::matrix_rank;
use crate::error::{DaaError, Result};
use crate::model::special::{digamma, trigamma, trigamma_inverse};
use crate::model::LmFit;
use crate::normalize::finite_median;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Variances below this fraction of the median are raised to it before
/// taking logs.
const VARIANCE_FLOOR: f64 = 1e-5;

/// Consistency constant turning the MAD into a normal standard deviation.
const MAD_SCALE: f64 = 1.4826;

/// Spread of log-variance residuals below which no feature is an outlier.
const MIN_MAD: f64 = 1e-8;

/// Options for variance moderation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EbayesConfig {
    /// Let the prior variance follow a smooth trend in mean abundance.
    pub trend: bool,
    /// Exclude outlying variances from prior estimation.
    pub robust: bool,
    /// Robust z-score beyond which a log variance is an outlier.
    pub outlier_z: f64,
}

impl Default for EbayesConfig {
    fn default() -> Self {
        Self {
            trend: false,
            robust: false,
            outlier_z: 3.5,
        }
    }
}

impl EbayesConfig {
    /// Prior variance depending on mean abundance.
    pub fn with_trend(mut self, trend: bool) -> Self {
        self.trend = trend;
        self
    }

    /// Robust prior estimation.
    pub fn with_robust(mut self, robust: bool) -> Self {
        self.robust = robust;
        self
    }
}

/// A fit whose residual variances have been moderated.
#[derive(Debug, Clone)]
pub struct ModeratedFit {
    /// The underlying per-feature fits.
    pub fit: LmFit,
    /// Prior degrees of freedom per feature (`inf` when the variances show
    /// no excess spread, 0 for upper outliers in robust mode).
    pub df_prior: Vec<f64>,
    /// Prior variance per feature (constant unless trended).
    pub s2_prior: Vec<f64>,
    /// Posterior (moderated) variance per feature.
    pub s2_post: Vec<f64>,
    /// Degrees of freedom of the moderated t-statistic.
    pub df_total: Vec<f64>,
    /// Features excluded from prior estimation in robust mode.
    pub outliers: Vec<bool>,
    /// Options used.
    pub config: EbayesConfig,
}

impl ModeratedFit {
    /// Number of features.
    pub fn n_features(&self) -> usize {
        self.fit.n_features()
    }

    /// Moderated standard error of a coefficient for one feature.
    pub fn std_error(&self, feature: usize, coefficient: usize) -> f64 {
        self.fit.fits[feature].stdev_unscaled[coefficient] * self.s2_post[feature].sqrt()
    }

    /// Number of features flagged as variance outliers.
    pub fn n_outliers(&self) -> usize {
        self.outliers.iter().filter(|&&o| o).count()
    }
}

/// Location model of the log variances: a constant, or a natural cubic
/// spline in mean abundance.
#[derive(Debug, Clone)]
enum Location {
    Constant(f64),
    Spline {
        knots: Vec<f64>,
        shift: f64,
        scale: f64,
        coefficients: Vec<f64>,
    },
}

impl Location {
    fn predict(&self, covariate: f64) -> f64 {
        match self {
            Location::Constant(m) => *m,
            Location::Spline {
                knots,
                shift,
                scale,
                coefficients,
            } => natural_spline_row((covariate - shift) / scale, knots)
                .iter()
                .zip(coefficients)
                .map(|(b, c)| b * c)
                .sum(),
        }
    }
}

/// Moment estimate of the scaled F (inverse chi-square) prior.
#[derive(Debug, Clone)]
struct PriorEstimate {
    df0: f64,
    location: Location,
    mean_variance: f64,
    /// Mean of `digamma(d/2) - ln(d/2)`, the offset between the raw and the
    /// bias-corrected log variances.
    log_bias: f64,
    /// Bias-corrected log variances the estimate was computed from.
    log_variances: Vec<f64>,
}

impl PriorEstimate {
    fn s2_prior(&self, covariate: f64) -> f64 {
        let trended = matches!(self.location, Location::Spline { .. });
        let loc = self.location.predict(covariate);
        if self.df0.is_finite() && self.df0 > 0.0 {
            (loc + digamma(self.df0 / 2.0) - (self.df0 / 2.0).ln()).exp()
        } else if trended {
            (loc + self.log_bias).exp()
        } else {
            self.mean_variance
        }
    }
}

/// Type-7 quantile of sorted values.
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Truncated-power natural cubic spline basis at one point, including the
/// constant. Linear beyond the boundary knots.
fn natural_spline_row(x: f64, knots: &[f64]) -> Vec<f64> {
    let k = knots.len();
    let last = knots[k - 1];
    let cube = |v: f64| if v > 0.0 { v * v * v } else { 0.0 };
    let d = |j: usize| (cube(x - knots[j]) - cube(x - last)) / (last - knots[j]);

    let mut row = Vec::with_capacity(k);
    row.push(1.0);
    row.push(x);
    for j in 0..k.saturating_sub(2) {
        row.push(d(j) - d(k - 2));
    }
    row
}

/// Estimate the prior from residual variances, their degrees of freedom and
/// optionally the mean abundance of each feature.
fn fit_f_dist(s2: &[f64], df: &[f64], covariate: Option<&[f64]>) -> Result<PriorEstimate> {
    let n = s2.len();
    if n == 0 {
        return Err(DaaError::EmptyData(
            "No features with residual degrees of freedom".to_string(),
        ));
    }

    let mut median = finite_median(s2);
    if median == 0.0 {
        log::warn!("More than half of the residual variances are exactly zero");
        median = 1.0;
    }
    let x: Vec<f64> = s2.iter().map(|&v| v.max(VARIANCE_FLOOR * median)).collect();
    let mean_variance = x.iter().sum::<f64>() / n as f64;
    let log_bias = df
        .iter()
        .map(|&d| digamma(d / 2.0) - (d / 2.0).ln())
        .sum::<f64>()
        / n as f64;
    let e: Vec<f64> = x
        .iter()
        .zip(df)
        .map(|(&v, &d)| v.ln() - digamma(d / 2.0) + (d / 2.0).ln())
        .collect();

    if n == 1 {
        return Ok(PriorEstimate {
            df0: 0.0,
            location: Location::Constant(e[0]),
            mean_variance,
            log_bias,
            log_variances: e,
        });
    }

    let (location, mut evar) = match covariate.and_then(|c| spline_knots(c)) {
        Some((knots, shift, scale)) => {
            let covariate = covariate.unwrap_or_default();
            let basis_rows: Vec<Vec<f64>> = covariate
                .iter()
                .map(|&a| natural_spline_row((a - shift) / scale, &knots))
                .collect();
            let p = knots.len();
            let basis = DMatrix::from_fn(n, p, |i, j| basis_rows[i][j]);
            let target = DVector::from_column_slice(&e);
            let coefficients = basis
                .clone()
                .svd(true, true)
                .solve(&target, 1e-10)
                .map_err(|msg| DaaError::Numerical(format!("Variance trend fit failed: {}", msg)))?;
            let residuals = &target - &basis * &coefficients;
            let rank = matrix_rank(&basis);
            let dof = n.saturating_sub(rank).max(1);
            let evar = residuals.iter().map(|r| r * r).sum::<f64>() / dof as f64;
            (
                Location::Spline {
                    knots,
                    shift,
                    scale,
                    coefficients: coefficients.iter().copied().collect(),
                },
                evar,
            )
        }
        None => {
            let emean = e.iter().sum::<f64>() / n as f64;
            let evar = e.iter().map(|v| (v - emean).powi(2)).sum::<f64>() / (n - 1) as f64;
            (Location::Constant(emean), evar)
        }
    };

    evar -= df.iter().map(|&d| trigamma(d / 2.0)).sum::<f64>() / n as f64;
    let df0 = if evar > 0.0 {
        2.0 * trigamma_inverse(evar)
    } else {
        f64::INFINITY
    };

    Ok(PriorEstimate {
        df0,
        location,
        mean_variance,
        log_bias,
        log_variances: e,
    })
}

/// Knots of the variance trend, on a covariate rescaled to [0, 1].
///
/// One basis function per feature count step (1 + [n >= 3] + [n >= 6] +
/// [n >= 30]), capped by the number of distinct covariate values. `None`
/// when fewer than two basis functions remain.
fn spline_knots(covariate: &[f64]) -> Option<(Vec<f64>, f64, f64)> {
    let n = covariate.len();
    let mut sorted = covariate.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut distinct = sorted.clone();
    distinct.dedup();

    let wanted = 1 + usize::from(n >= 3) + usize::from(n >= 6) + usize::from(n >= 30);
    let n_knots = wanted.min(distinct.len());
    if n_knots < 2 {
        return None;
    }

    let shift = sorted[0];
    let scale = sorted[n - 1] - shift;
    if !(scale > 0.0) {
        return None;
    }
    let mut knots: Vec<f64> = (0..n_knots)
        .map(|j| (quantile_sorted(&sorted, j as f64 / (n_knots - 1) as f64) - shift) / scale)
        .collect();
    knots.dedup();
    if knots.len() < 2 {
        return None;
    }
    Some((knots, shift, scale))
}

/// Moderate the residual variances of a fit.
///
/// Features without a fit get `NaN` in every moderated field. Features with
/// zero residual degrees of freedom take the prior variance alone. When the
/// observed spread of the log variances is no larger than sampling alone
/// explains, the prior degrees of freedom are infinite and every feature
/// takes the prior variance.
///
/// In robust mode, log variances whose residual from the prior location has
/// a median/MAD z-score beyond `outlier_z` are left out and the prior is
/// estimated again from the rest. Outliers in the upper tail are then not
/// shrunk (`d0 = 0`); the remaining features are shrunk towards a prior
/// that does not depend on the outliers.
pub fn moderate(fit: LmFit, config: &EbayesConfig) -> Result<ModeratedFit> {
    let n = fit.n_features();
    let usable: Vec<usize> = (0..n)
        .filter(|&i| {
            let f = &fit.fits[i];
            f.status.is_ok() && f.df_residual > 0 && f.s2.is_finite()
        })
        .collect();
    if usable.is_empty() {
        return Err(DaaError::EmptyData(
            "No feature has residual degrees of freedom; cannot estimate a variance prior"
                .to_string(),
        ));
    }

    let s2: Vec<f64> = usable.iter().map(|&i| fit.fits[i].s2).collect();
    let df: Vec<f64> = usable
        .iter()
        .map(|&i| fit.fits[i].df_residual as f64)
        .collect();
    let amean: Vec<f64> = usable.iter().map(|&i| fit.fits[i].amean).collect();
    let covariate = config.trend.then_some(amean.as_slice());

    let mut prior = fit_f_dist(&s2, &df, covariate)?;
    let mut outliers = vec![false; n];
    let mut upper = vec![false; n];

    if config.robust {
        let residuals: Vec<f64> = (0..usable.len())
            .map(|k| prior.log_variances[k] - prior.location.predict(amean[k]))
            .collect();
        let center = finite_median(&residuals);
        let deviations: Vec<f64> = residuals.iter().map(|r| (r - center).abs()).collect();
        let mad = MAD_SCALE * finite_median(&deviations);

        if mad.is_finite() && mad > MIN_MAD {
            let mut retained = Vec::with_capacity(usable.len());
            for (k, &i) in usable.iter().enumerate() {
                let z = (residuals[k] - center) / mad;
                if z.abs() > config.outlier_z {
                    outliers[i] = true;
                    upper[i] = z > 0.0;
                } else {
                    retained.push(k);
                }
            }
            let n_outliers = usable.len() - retained.len();
            if n_outliers > 0 && retained.len() >= 2 {
                log::debug!(
                    "Excluding {} variance outliers from prior estimation",
                    n_outliers
                );
                let pick = |v: &[f64]| retained.iter().map(|&k| v[k]).collect::<Vec<f64>>();
                let retained_amean = pick(&amean);
                prior = fit_f_dist(
                    &pick(&s2),
                    &pick(&df),
                    config.trend.then_some(retained_amean.as_slice()),
                )?;
            } else if n_outliers > 0 {
                log::warn!("Too few non-outlying features for robust prior estimation");
                outliers.iter_mut().for_each(|o| *o = false);
                upper.iter_mut().for_each(|u| *u = false);
            }
        }
    }

    let df_pooled: f64 = df.iter().sum();
    let mut df_prior = vec![f64::NAN; n];
    let mut s2_prior = vec![f64::NAN; n];
    let mut s2_post = vec![f64::NAN; n];
    let mut df_total = vec![f64::NAN; n];

    for (i, f) in fit.fits.iter().enumerate() {
        if !f.status.is_ok() {
            continue;
        }
        let d = f.df_residual as f64;
        let d0 = if upper[i] { 0.0 } else { prior.df0 };
        let s0 = prior.s2_prior(f.amean);

        s2_post[i] = if d == 0.0 || !f.s2.is_finite() || d0.is_infinite() {
            s0
        } else {
            (d0 * s0 + d * f.s2) / (d0 + d)
        };
        df_total[i] = (d0 + d).min(df_pooled);
        df_prior[i] = d0;
        s2_prior[i] = s0;
    }

    log::debug!(
        "Variance prior: d0 = {:.3}, trend = {}, robust = {}",
        prior.df0,
        config.trend,
        config.robust
    );

    Ok(ModeratedFit {
        fit,
        df_prior,
        s2_prior,
        s2_post,
        df_total,
        outliers,
        config: config.clone(),
    })
}
