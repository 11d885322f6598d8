//! Significance labelling of result tables.
//!
//! A pure annotation pass: statistics are copied unchanged and each row
//! receives a [`Significance`] label.

use crate::data::{DaResultSet, Significance};
use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};

/// Thresholds for labelling rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Rows need `q < q_cutoff`.
    pub q_cutoff: f64,
    /// When set, rows also need `|estimate| > lfc_cutoff`.
    pub lfc_cutoff: Option<f64>,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            q_cutoff: 0.05,
            lfc_cutoff: None,
        }
    }
}

impl ClassifyConfig {
    /// Config with a q-value cutoff and no effect-size cutoff.
    pub fn new(q_cutoff: f64) -> Self {
        Self {
            q_cutoff,
            lfc_cutoff: None,
        }
    }

    /// Also require an effect magnitude above `lfc_cutoff`.
    pub fn with_lfc(mut self, lfc_cutoff: f64) -> Self {
        self.lfc_cutoff = Some(lfc_cutoff);
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.q_cutoff > 0.0 && self.q_cutoff <= 1.0) {
            return Err(DaaError::InvalidParameter(format!(
                "q-value cutoff must be in (0, 1], got {}",
                self.q_cutoff
            )));
        }
        if let Some(lfc) = self.lfc_cutoff {
            if !(lfc >= 0.0 && lfc.is_finite()) {
                return Err(DaaError::InvalidParameter(format!(
                    "Effect-size cutoff must be finite and non-negative, got {}",
                    lfc
                )));
            }
        }
        Ok(())
    }

    /// Label for a single row. Boundary values are not significant.
    pub fn label(&self, estimate: f64, q_value: f64) -> Significance {
        let passes_q = q_value < self.q_cutoff;
        let passes_lfc = self.lfc_cutoff.map_or(true, |lfc| estimate.abs() > lfc);

        if !(passes_q && passes_lfc) {
            return Significance::NotSignificant;
        }
        if estimate > 0.0 {
            Significance::Up
        } else if estimate < 0.0 {
            Significance::Down
        } else {
            Significance::NotSignificant
        }
    }
}

/// Label every row of a result set.
///
/// Rows with a NaN q-value are never significant. Excluded features stay
/// excluded.
pub fn classify(results: &DaResultSet, config: &ClassifyConfig) -> Result<DaResultSet> {
    config.validate()?;

    let mut labelled = results.clone();
    for r in labelled.results.iter_mut() {
        r.significance = Some(config.label(r.estimate, r.q_value));
    }

    let summary = labelled.summary();
    log::debug!(
        "Classified {} rows at q < {}: {} up, {} down",
        labelled.len(),
        config.q_cutoff,
        summary.up,
        summary.down
    );

    Ok(labelled)
}
