//! Benjamini-Hochberg false discovery rate correction.

use crate::data::{DaResult, DaResultSet};
use crate::test::ModeratedTest;
use serde::{Deserialize, Serialize};

/// Result of BH correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BhCorrected {
    /// Feature IDs in original order.
    pub feature_ids: Vec<String>,
    /// Original p-values.
    pub p_values: Vec<f64>,
    /// Adjusted p-values (q-values). NaN where the p-value is NaN.
    pub q_values: Vec<f64>,
    /// Number of tests, i.e. non-NaN p-values.
    pub n_tests: usize,
}

impl BhCorrected {
    /// Get q-value for a specific feature.
    pub fn get_qvalue(&self, feature_id: &str) -> Option<f64> {
        let idx = self.feature_ids.iter().position(|f| f == feature_id)?;
        self.q_values.get(idx).copied()
    }

    /// Count significant results at a threshold.
    pub fn n_significant(&self, alpha: f64) -> usize {
        self.q_values.iter().filter(|&&q| q < alpha).count()
    }

    /// Get indices of significant results.
    pub fn significant_indices(&self, alpha: f64) -> Vec<usize> {
        self.q_values
            .iter()
            .enumerate()
            .filter(|(_, &q)| q < alpha)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Apply Benjamini-Hochberg FDR correction.
///
/// With the `m` non-NaN p-values sorted ascending, the adjusted value at
/// rank `i` is `min_{j >= i} p[j] * m / j`, capped at 1. NaN p-values are
/// not counted as tests and receive a NaN q-value.
pub fn correct_bh(p_values: &[f64], feature_ids: &[String]) -> BhCorrected {
    let mut q_values = vec![f64::NAN; p_values.len()];

    let mut indices: Vec<usize> = (0..p_values.len())
        .filter(|&i| !p_values[i].is_nan())
        .collect();
    let n = indices.len();

    if n > 0 {
        indices.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));
        let n_f64 = n as f64;

        // Work backwards from the largest p-value
        let mut running = 1.0_f64;
        for (i, &idx) in indices.iter().enumerate().rev() {
            let rank = (i + 1) as f64;
            running = running.min(p_values[idx] * n_f64 / rank);
            q_values[idx] = running.min(1.0);
        }
    }

    BhCorrected {
        feature_ids: feature_ids.to_vec(),
        p_values: p_values.to_vec(),
        q_values,
        n_tests: n,
    }
}

/// Apply BH correction to moderated test results.
pub fn correct_bh_moderated(test: &ModeratedTest) -> BhCorrected {
    let p_values = test.p_values();
    let feature_ids: Vec<String> = test.feature_ids().iter().map(|s| s.to_string()).collect();
    correct_bh(&p_values, &feature_ids)
}

/// Create full DA results from a moderated test and its BH correction.
///
/// Rows keep the order of the test; excluded features are carried along
/// without statistics. No significance label is set.
pub fn create_results(test: &ModeratedTest, bh: &BhCorrected, method: &str) -> DaResultSet {
    let results: Vec<DaResult> = test
        .results
        .iter()
        .enumerate()
        .map(|(i, r)| DaResult {
            feature_id: r.feature_id.clone(),
            coefficient: r.coefficient.clone(),
            estimate: r.estimate,
            std_error: r.std_error,
            t_ordinary: r.t_ordinary,
            statistic: r.statistic,
            p_value: r.p_value,
            q_value: bh.q_values.get(i).copied().unwrap_or(f64::NAN),
            df_total: r.df_total,
            mean_abundance: r.amean,
            support: r.support,
            significance: None,
        })
        .collect();

    DaResultSet {
        method: method.to_string(),
        coefficient: test.coefficient.clone(),
        lfc_threshold: test.lfc_threshold,
        results,
        excluded: test.excluded.clone(),
    }
}
