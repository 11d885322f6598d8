//! Result types for differential abundance analysis.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Significance label assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Significance {
    /// Significant with a positive effect.
    Up,
    /// Significant with a negative effect.
    Down,
    /// Not significant.
    NotSignificant,
}

impl Significance {
    /// Get the descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::NotSignificant => "not_significant",
        }
    }

    /// Check if the label marks a significant row.
    pub fn is_significant(&self) -> bool {
        !matches!(self, Self::NotSignificant)
    }
}

/// Result for a single feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaResult {
    /// Feature identifier.
    pub feature_id: String,
    /// Name of the coefficient or contrast being tested.
    pub coefficient: String,
    /// Estimated effect (log fold change).
    pub estimate: f64,
    /// Moderated standard error of the estimate.
    pub std_error: f64,
    /// Ordinary t-statistic from the feature's own residual variance.
    pub t_ordinary: f64,
    /// Moderated t-statistic.
    pub statistic: f64,
    /// Raw p-value.
    pub p_value: f64,
    /// Adjusted p-value (q-value) after multiple testing correction.
    pub q_value: f64,
    /// Total degrees of freedom of the moderated test.
    pub df_total: f64,
    /// Mean of the observed values of the feature.
    pub mean_abundance: f64,
    /// Number of child rows aggregated into this feature.
    pub support: usize,
    /// Label assigned by the classifier, if it has run.
    pub significance: Option<Significance>,
}

impl DaResult {
    /// Check if the classifier labelled this row significant.
    pub fn is_significant(&self) -> bool {
        self.significance.map(|s| s.is_significant()).unwrap_or(false)
    }

    /// Check if this result is significant at a custom q-value threshold.
    pub fn is_significant_at(&self, alpha: f64) -> bool {
        self.q_value < alpha
    }
}

/// A feature that could not be tested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedFeature {
    /// Feature identifier.
    pub feature_id: String,
    /// Why no statistics were produced.
    pub reason: String,
}

/// Collection of DA results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaResultSet {
    /// Method name used to generate these results.
    pub method: String,
    /// Coefficient or contrast tested.
    pub coefficient: String,
    /// Effect-size threshold of the null hypothesis (TREAT), if any.
    pub lfc_threshold: Option<f64>,
    /// One result per tested feature.
    pub results: Vec<DaResult>,
    /// Features excluded before testing.
    pub excluded: Vec<ExcludedFeature>,
}

impl DaResultSet {
    /// Number of tested features.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Get the result of a specific feature.
    pub fn get_feature(&self, feature_id: &str) -> Option<&DaResult> {
        self.results.iter().find(|r| r.feature_id == feature_id)
    }

    /// Results sorted by p-value (ascending, NaN last).
    pub fn sorted_by_pvalue(&self) -> Vec<&DaResult> {
        let mut sorted: Vec<_> = self.results.iter().collect();
        sorted.sort_by(|a, b| nan_last(a.p_value).total_cmp(&nan_last(b.p_value)));
        sorted
    }

    /// Rows the classifier labelled significant.
    pub fn significant(&self) -> Vec<&DaResult> {
        self.results.iter().filter(|r| r.is_significant()).collect()
    }

    /// Rows with a q-value below a threshold.
    pub fn significant_at(&self, alpha: f64) -> Vec<&DaResult> {
        self.results
            .iter()
            .filter(|r| r.is_significant_at(alpha))
            .collect()
    }

    /// Feature IDs of the significant rows.
    pub fn significant_ids(&self) -> Vec<String> {
        self.significant()
            .into_iter()
            .map(|r| r.feature_id.clone())
            .collect()
    }

    /// Count rows at common thresholds and by label.
    pub fn summary(&self) -> ResultSummary {
        let label_count = |label: Significance| {
            self.results
                .iter()
                .filter(|r| r.significance == Some(label))
                .count()
        };
        ResultSummary {
            total: self.len(),
            excluded: self.excluded.len(),
            significant_001: self.results.iter().filter(|r| r.q_value < 0.001).count(),
            significant_01: self.results.iter().filter(|r| r.q_value < 0.01).count(),
            significant_05: self.results.iter().filter(|r| r.q_value < 0.05).count(),
            up: label_count(Significance::Up),
            down: label_count(Significance::Down),
        }
    }

    /// Write results to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(
            writer,
            "feature_id\tcoefficient\tlogFC\tstd_error\tt_ordinary\tt\tp_value\tq_value\tdf_total\tmean_abundance\tsupport\tsignificance"
        )?;
        for r in &self.results {
            writeln!(
                writer,
                "{}\t{}\t{:.6}\t{:.6}\t{:.4}\t{:.4}\t{:.3e}\t{:.3e}\t{:.2}\t{:.4}\t{}\t{}",
                r.feature_id,
                r.coefficient,
                r.estimate,
                r.std_error,
                r.t_ordinary,
                r.statistic,
                r.p_value,
                r.q_value,
                r.df_total,
                r.mean_abundance,
                r.support,
                r.significance.map(|s| s.name()).unwrap_or("NA"),
            )?;
        }
        for e in &self.excluded {
            writeln!(
                writer,
                "{}\t{}\tNA\tNA\tNA\tNA\tNA\tNA\tNA\tNA\tNA\texcluded: {}",
                e.feature_id, self.coefficient, e.reason
            )?;
        }

        Ok(())
    }

    /// Iterate over results.
    pub fn iter(&self) -> impl Iterator<Item = &DaResult> {
        self.results.iter()
    }
}

fn nan_last(p: f64) -> f64 {
    if p.is_nan() {
        f64::INFINITY
    } else {
        p
    }
}

/// Summary counts for a result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total: usize,
    pub excluded: usize,
    pub significant_001: usize,
    pub significant_01: usize,
    pub significant_05: usize,
    pub up: usize,
    pub down: usize,
}

impl std::fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Features tested:   {}", self.total)?;
        writeln!(f, "Features excluded: {}", self.excluded)?;
        writeln!(f, "q < 0.001: {}", self.significant_001)?;
        writeln!(f, "q < 0.01:  {}", self.significant_01)?;
        writeln!(f, "q < 0.05:  {}", self.significant_05)?;
        writeln!(f, "Up: {}  Down: {}", self.up, self.down)?;
        Ok(())
    }
}
