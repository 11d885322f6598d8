//! Logarithmic transform and its inverse.

use crate::data::QuantMatrix;
use crate::error::{DaaError, Result};

fn check_base(base: f64) -> Result<()> {
    if !(base.is_finite() && base > 0.0 && base != 1.0) {
        return Err(DaaError::InvalidParameter(format!(
            "Log base must be positive and not 1, got {}",
            base
        )));
    }
    Ok(())
}

/// Apply `log(x, base)` to every observed value.
///
/// Every observed value must be strictly positive; the first offending
/// cell is reported. Missing values stay missing. Use
/// [`zero_to_missing`](crate::filter::zero_to_missing) first when zeros
/// mean "not quantified".
pub fn log_transform(matrix: &QuantMatrix, base: f64) -> Result<QuantMatrix> {
    check_base(base)?;

    for row in 0..matrix.n_features() {
        for col in 0..matrix.n_samples() {
            let value = matrix.get(row, col);
            if !value.is_nan() && value <= 0.0 {
                return Err(DaaError::Numerical(format!(
                    "Cannot log-transform non-positive value {} (feature '{}', sample '{}')",
                    value,
                    matrix.feature_ids()[row],
                    matrix.sample_ids()[col]
                )));
            }
        }
    }

    let ln_base = base.ln();
    let transformed = matrix.matrix().map(|v| v.ln() / ln_base);
    log::debug!(
        "Log{} transformed {} x {} matrix",
        base,
        matrix.n_features(),
        matrix.n_samples()
    );
    matrix.with_values(transformed)
}

/// Inverse of [`log_transform`]: `base^x` for every observed value.
pub fn exp_transform(matrix: &QuantMatrix, base: f64) -> Result<QuantMatrix> {
    check_base(base)?;
    matrix.with_values(matrix.matrix().map(|v| base.powf(v)))
}
