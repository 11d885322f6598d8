//! Pipeline runner for composing and executing analysis steps.

use crate::aggregate::{aggregate_features, AggregateMethod, MissingPolicy};
use crate::classify::{classify, ClassifyConfig};
use crate::correct::{correct_bh_moderated, create_results, BhCorrected};
use crate::data::{DaResultSet, DesignMatrix, Formula, QuantMatrix, SampleMetadata};
use crate::error::{DaaError, Result};
use crate::filter::{
    filter_annotation, filter_missing, filter_missing_groupwise, filter_missing_key,
    zero_to_missing, AnnotationFilter, FilterResult, GroupwiseLogic,
};
use crate::model::{model_lm, moderate, Contrast, EbayesConfig, LmFit, ModeratedFit};
use crate::normalize::{normalize_center, CenterStatistic};
use crate::test::{test_moderated, test_treat, ModeratedTest};
use crate::transform::log_transform;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A step in the analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineStep {
    // === Row Filtering ===
    /// Drop rows without a grouping key.
    FilterMissingKey { column: String },
    /// Keep rows passing every annotation predicate.
    FilterAnnotation { filters: Vec<AnnotationFilter> },
    /// Keep rows observed in at least this fraction of samples.
    FilterMissing { min_fraction: f64 },
    /// Keep rows observed often enough within groups.
    FilterMissingGroupwise {
        group_column: String,
        min_observed: usize,
        logic: GroupwiseLogic,
    },

    // === Missing Values ===
    /// Treat zero intensities as missing.
    ZeroToMissing,

    // === Aggregation ===
    /// Combine rows sharing a key into parent features.
    Aggregate {
        key_column: String,
        #[serde(default)]
        method: AggregateMethod,
        #[serde(default)]
        missing: MissingPolicy,
    },

    // === Transformation ===
    /// Logarithm with the given base.
    LogTransform { base: f64 },

    // === Normalization ===
    /// Subtract a per-sample location statistic.
    Normalize {
        #[serde(default)]
        statistic: CenterStatistic,
    },

    // === Model Fitting ===
    /// Fit per-feature linear models.
    ModelLM {
        formula: String,
        /// Reference level per categorical variable.
        #[serde(default)]
        references: HashMap<String, String>,
    },
    /// Replace the coefficients by linear contrasts.
    Contrasts { expressions: Vec<String> },
    /// Empirical-Bayes variance moderation.
    Ebayes(EbayesConfig),

    // === Testing ===
    /// Moderated t-test for a coefficient.
    TestModerated { coefficient: String },
    /// Moderated test against a fold-change threshold.
    TestTreat { coefficient: String, lfc: f64 },

    // === Multiple Testing Correction ===
    /// Benjamini-Hochberg correction.
    CorrectBH,

    // === Labelling ===
    /// Label rows significant/up/down.
    Classify(ClassifyConfig),

    // === Output ===
    /// Write the current matrix to a TSV file.
    Snapshot { path: String },
}

impl PipelineStep {
    /// Short snake_case name of the step.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FilterMissingKey { .. } => "filter_missing_key",
            Self::FilterAnnotation { .. } => "filter_annotation",
            Self::FilterMissing { .. } => "filter_missing",
            Self::FilterMissingGroupwise { .. } => "filter_missing_groupwise",
            Self::ZeroToMissing => "zero_to_missing",
            Self::Aggregate { .. } => "aggregate",
            Self::LogTransform { .. } => "log_transform",
            Self::Normalize { .. } => "normalize",
            Self::ModelLM { .. } => "model_lm",
            Self::Contrasts { .. } => "contrasts",
            Self::Ebayes(_) => "ebayes",
            Self::TestModerated { .. } => "test_moderated",
            Self::TestTreat { .. } => "test_treat",
            Self::CorrectBH => "correct_bh",
            Self::Classify(_) => "classify",
            Self::Snapshot { .. } => "snapshot",
        }
    }
}

/// Pipeline configuration for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the pipeline.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Steps to execute.
    pub steps: Vec<PipelineStep>,
}

impl PipelineConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(DaaError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(DaaError::from)
    }

    /// Load from a YAML file.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }
}

/// Builder for constructing and running analysis pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    name: String,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create a new empty pipeline.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            name: "unnamed".to_string(),
        }
    }

    /// Create from a config.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            steps: config.steps.clone(),
            name: config.name.clone(),
        }
    }

    /// Set the pipeline name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Append an arbitrary step.
    pub fn step(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Drop rows with an empty key in `column`.
    pub fn filter_missing_key(self, column: &str) -> Self {
        self.step(PipelineStep::FilterMissingKey {
            column: column.to_string(),
        })
    }

    /// Keep rows passing every annotation predicate.
    pub fn filter_annotation(self, filters: Vec<AnnotationFilter>) -> Self {
        self.step(PipelineStep::FilterAnnotation { filters })
    }

    /// Keep rows observed in at least `min_fraction` of samples.
    pub fn filter_missing(self, min_fraction: f64) -> Self {
        self.step(PipelineStep::FilterMissing { min_fraction })
    }

    /// Keep rows with at least `min_observed` values per group, combined
    /// across groups with `logic`.
    pub fn filter_missing_groupwise(
        self,
        group_column: &str,
        min_observed: usize,
        logic: GroupwiseLogic,
    ) -> Self {
        self.step(PipelineStep::FilterMissingGroupwise {
            group_column: group_column.to_string(),
            min_observed,
            logic,
        })
    }

    /// Treat zero intensities as missing.
    pub fn zero_to_missing(self) -> Self {
        self.step(PipelineStep::ZeroToMissing)
    }

    /// Combine rows sharing a key.
    pub fn aggregate(self, key_column: &str, method: AggregateMethod, missing: MissingPolicy) -> Self {
        self.step(PipelineStep::Aggregate {
            key_column: key_column.to_string(),
            method,
            missing,
        })
    }

    /// Sum rows sharing a key, ignoring missing children.
    pub fn aggregate_sum(self, key_column: &str) -> Self {
        self.aggregate(key_column, AggregateMethod::Sum, MissingPolicy::Ignore)
    }

    /// Logarithm with the given base.
    pub fn log_transform(self, base: f64) -> Self {
        self.step(PipelineStep::LogTransform { base })
    }

    /// Base-2 logarithm.
    pub fn log2(self) -> Self {
        self.log_transform(2.0)
    }

    /// Subtract per-sample medians.
    pub fn normalize_median(self) -> Self {
        self.step(PipelineStep::Normalize {
            statistic: CenterStatistic::Median,
        })
    }

    /// Add linear model.
    pub fn model_lm(self, formula: &str) -> Self {
        self.step(PipelineStep::ModelLM {
            formula: formula.to_string(),
            references: HashMap::new(),
        })
    }

    /// Add linear model with explicit reference levels.
    pub fn model_lm_with_reference(self, formula: &str, references: &[(&str, &str)]) -> Self {
        self.step(PipelineStep::ModelLM {
            formula: formula.to_string(),
            references: references
                .iter()
                .map(|(v, l)| (v.to_string(), l.to_string()))
                .collect(),
        })
    }

    /// Replace the fitted coefficients by contrasts.
    pub fn contrasts(self, expressions: &[&str]) -> Self {
        self.step(PipelineStep::Contrasts {
            expressions: expressions.iter().map(|e| e.to_string()).collect(),
        })
    }

    /// Add empirical-Bayes moderation.
    pub fn ebayes(self, config: EbayesConfig) -> Self {
        self.step(PipelineStep::Ebayes(config))
    }

    /// Add moderated t-test.
    pub fn test_moderated(self, coefficient: &str) -> Self {
        self.step(PipelineStep::TestModerated {
            coefficient: coefficient.to_string(),
        })
    }

    /// Add moderated test against a fold-change threshold.
    pub fn test_treat(self, coefficient: &str, lfc: f64) -> Self {
        self.step(PipelineStep::TestTreat {
            coefficient: coefficient.to_string(),
            lfc,
        })
    }

    /// Add BH correction.
    pub fn correct_bh(self) -> Self {
        self.step(PipelineStep::CorrectBH)
    }

    /// Label rows with the given thresholds.
    pub fn classify(self, config: ClassifyConfig) -> Self {
        self.step(PipelineStep::Classify(config))
    }

    /// Write the matrix as it stands to a TSV file.
    pub fn snapshot(self, path: &str) -> Self {
        self.step(PipelineStep::Snapshot {
            path: path.to_string(),
        })
    }

    /// Convert to config for serialization.
    pub fn to_config(&self, description: Option<&str>) -> PipelineConfig {
        PipelineConfig {
            name: self.name.clone(),
            description: description.map(String::from),
            steps: self.steps.clone(),
        }
    }

    /// Run the pipeline on data.
    pub fn run(&self, matrix: &QuantMatrix, metadata: &SampleMetadata) -> Result<DaResultSet> {
        let mut state = PipelineState::new(matrix.clone(), metadata.clone());

        for (i, step) in self.steps.iter().enumerate() {
            debug!("Pipeline '{}' step {}: {}", self.name, i + 1, step.name());
            state = state.apply(step).map_err(|e| {
                DaaError::Pipeline(format!("Step {} ({}) failed: {}", i + 1, step.name(), e))
            })?;
        }

        state.finalize(&self.name)
    }
}

/// Internal state during pipeline execution.
struct PipelineState {
    matrix: QuantMatrix,
    metadata: SampleMetadata,
    lm_fit: Option<LmFit>,
    moderated: Option<ModeratedFit>,
    test: Option<ModeratedTest>,
    bh_corrected: Option<BhCorrected>,
    classify: Option<ClassifyConfig>,
}

impl PipelineState {
    fn new(matrix: QuantMatrix, metadata: SampleMetadata) -> Self {
        Self {
            matrix,
            metadata,
            lm_fit: None,
            moderated: None,
            test: None,
            bh_corrected: None,
            classify: None,
        }
    }

    fn replace_filtered(&mut self, filtered: QuantMatrix, what: &str) {
        debug!("{}: {}", what, FilterResult::between(&self.matrix, &filtered));
        self.matrix = filtered;
    }

    fn apply(mut self, step: &PipelineStep) -> Result<Self> {
        match step {
            // === Row Filtering ===
            PipelineStep::FilterMissingKey { column } => {
                let filtered = filter_missing_key(&self.matrix, column)?;
                self.replace_filtered(filtered, "missing key");
            }
            PipelineStep::FilterAnnotation { filters } => {
                let filtered = filter_annotation(&self.matrix, filters)?;
                self.replace_filtered(filtered, "annotation");
            }
            PipelineStep::FilterMissing { min_fraction } => {
                let filtered = filter_missing(&self.matrix, *min_fraction)?;
                self.replace_filtered(filtered, "missing values");
            }
            PipelineStep::FilterMissingGroupwise {
                group_column,
                min_observed,
                logic,
            } => {
                let filtered = filter_missing_groupwise(
                    &self.matrix,
                    &self.metadata,
                    group_column,
                    *min_observed,
                    *logic,
                )?;
                self.replace_filtered(filtered, "group-wise missing values");
            }

            // === Missing Values ===
            PipelineStep::ZeroToMissing => {
                self.matrix = zero_to_missing(&self.matrix)?;
            }

            // === Aggregation ===
            PipelineStep::Aggregate {
                key_column,
                method,
                missing,
            } => {
                let n_before = self.matrix.n_features();
                self.matrix = aggregate_features(&self.matrix, key_column, *method, *missing)?;
                info!(
                    "Aggregated {} rows into {} by '{}'",
                    n_before,
                    self.matrix.n_features(),
                    key_column
                );
            }

            // === Transformation ===
            PipelineStep::LogTransform { base } => {
                self.matrix = log_transform(&self.matrix, *base)?;
            }

            // === Normalization ===
            PipelineStep::Normalize { statistic } => {
                let centered = normalize_center(&self.matrix, *statistic)?;
                debug!("Sample offsets: {:?}", centered.offsets);
                self.matrix = centered.matrix;
            }

            // === Model Fitting ===
            PipelineStep::ModelLM {
                formula,
                references,
            } => {
                let parsed_formula = Formula::parse(formula)?;
                self.metadata = self.metadata.align_to(self.matrix.sample_ids())?;
                let design = DesignMatrix::from_formula_with_reference(
                    &self.metadata,
                    &parsed_formula,
                    references,
                )?;
                for warning in design.diagnostics() {
                    warn!("Design '{}': {}", formula, warning);
                }
                self.lm_fit = Some(model_lm(&self.matrix, &design)?);
                self.moderated = None;
                self.clear_results();
            }
            PipelineStep::Contrasts { expressions } => {
                let fit = self.lm_fit.as_ref().ok_or_else(|| {
                    DaaError::Pipeline("Must fit model before forming contrasts".to_string())
                })?;
                let contrasts = expressions
                    .iter()
                    .map(|e| Contrast::parse(e, &fit.coefficient_names))
                    .collect::<Result<Vec<_>>>()?;
                self.lm_fit = Some(fit.contrasts(&contrasts)?);
                self.moderated = None;
                self.clear_results();
            }
            PipelineStep::Ebayes(config) => {
                let fit = self.lm_fit.take().ok_or_else(|| {
                    DaaError::Pipeline("Must fit model before moderation".to_string())
                })?;
                let moderated = moderate(fit, config)?;
                info!(
                    "Prior df {:.3}, {} outlier variances",
                    moderated.df_prior.iter().cloned().fold(f64::NAN, f64::max),
                    moderated.n_outliers()
                );
                self.moderated = Some(moderated);
                self.clear_results();
            }

            // === Testing ===
            PipelineStep::TestModerated { coefficient } => {
                let moderated = self.moderated.as_ref().ok_or_else(|| {
                    DaaError::Pipeline("Must run ebayes before testing".to_string())
                })?;
                self.test = Some(test_moderated(moderated, coefficient)?);
                self.bh_corrected = None;
                self.classify = None;
            }
            PipelineStep::TestTreat { coefficient, lfc } => {
                let moderated = self.moderated.as_ref().ok_or_else(|| {
                    DaaError::Pipeline("Must run ebayes before testing".to_string())
                })?;
                self.test = Some(test_treat(moderated, coefficient, *lfc)?);
                self.bh_corrected = None;
                self.classify = None;
            }

            // === Correction ===
            PipelineStep::CorrectBH => {
                let test = self.test.as_ref().ok_or_else(|| {
                    DaaError::Pipeline("Must perform a test before BH correction".to_string())
                })?;
                self.bh_corrected = Some(correct_bh_moderated(test));
            }

            // === Labelling ===
            PipelineStep::Classify(config) => {
                if self.bh_corrected.is_none() {
                    return Err(DaaError::Pipeline(
                        "Must apply BH correction before classifying".to_string(),
                    ));
                }
                self.classify = Some(config.clone());
            }

            // === Output ===
            PipelineStep::Snapshot { path } => {
                self.matrix.to_tsv(path)?;
                debug!("Wrote snapshot to {}", path);
            }
        }
        Ok(self)
    }

    /// Drop test statistics computed from an earlier fit.
    fn clear_results(&mut self) {
        self.test = None;
        self.bh_corrected = None;
        self.classify = None;
    }

    fn finalize(self, method_name: &str) -> Result<DaResultSet> {
        let test = self.test.ok_or_else(|| {
            DaaError::Pipeline("Pipeline must include a test step".to_string())
        })?;
        let bh = self.bh_corrected.ok_or_else(|| {
            DaaError::Pipeline("Pipeline must include correction step".to_string())
        })?;

        let results = create_results(&test, &bh, method_name);
        match self.classify {
            Some(config) => classify(&results, &config),
            None => Ok(results),
        }
    }
}

/// Convenience function to run a limma-style analysis on a log-scale matrix.
///
/// Median normalization, per-feature linear models, moderation, moderated
/// t-tests and BH correction.
pub fn run_limma(
    matrix: &QuantMatrix,
    metadata: &SampleMetadata,
    formula: &str,
    coefficient: &str,
    config: EbayesConfig,
) -> Result<DaResultSet> {
    Pipeline::new()
        .name("limma")
        .normalize_median()
        .model_lm(formula)
        .ebayes(config)
        .test_moderated(coefficient)
        .correct_bh()
        .run(matrix, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FeatureMetadata, Significance};
    use nalgebra::DMatrix;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// 8 proteins x 6 samples, log2 scale. P1 and P2 shifted in treatment.
    fn create_log_matrix() -> QuantMatrix {
        let nan = f64::NAN;
        let data = DMatrix::from_row_slice(8, 6, &[
            20.1, 19.9, 20.0, 22.2, 21.9, 22.0,
            18.0, 18.3, 17.8, 16.1, 15.9, 16.2,
            21.0, 21.2, 20.9, 21.1, 20.8, 21.0,
            17.5, 17.3, 17.6, 17.4, 17.7, 17.5,
            19.2, 19.0, 19.3, 19.1, 19.4, 19.0,
            22.0, 22.3, 21.8, 22.1, 22.0, 21.9,
            16.0, 16.4, 15.9, 16.2, 16.1, 16.3,
            15.0, nan, nan, nan, nan, nan,
        ]);
        let feature_ids = (1..=8).map(|i| format!("P{}", i)).collect();
        QuantMatrix::new(data, feature_ids, sample_ids()).unwrap()
    }

    fn sample_ids() -> Vec<String> {
        (1..=6).map(|i| format!("S{}", i)).collect()
    }

    fn create_test_metadata() -> SampleMetadata {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample_id\tcondition\tbatch").unwrap();
        for i in 1..=6 {
            let condition = if i <= 3 { "control" } else { "treatment" };
            writeln!(file, "S{}\t{}\tb{}", i, condition, i % 2).unwrap();
        }
        file.flush().unwrap();
        SampleMetadata::from_tsv(file.path()).unwrap()
    }

    /// Raw PSM table: two PSMs per protein, one PSM without a key.
    fn create_psm_matrix() -> QuantMatrix {
        let proteins = create_log_matrix();
        let mut values = Vec::new();
        let mut ids = Vec::new();
        let mut annotations = Vec::new();
        for p in 0..7 {
            for (k, response) in [0.0, 1.5].iter().enumerate() {
                ids.push(format!("psm_{}_{}", p, k));
                annotations.push(vec![proteins.feature_ids()[p].clone(), "0.001".to_string()]);
                for j in 0..6 {
                    values.push((proteins.get(p, j) + response).exp2());
                }
            }
        }
        ids.push("psm_orphan".to_string());
        annotations.push(vec![String::new(), "0.001".to_string()]);
        values.extend([1000.0, 0.0, 1200.0, 900.0, 1100.0, 1000.0]);

        let n = ids.len();
        let features = FeatureMetadata::new(
            vec!["protein".to_string(), "qvalue".to_string()],
            annotations,
            vec![1; n],
        )
        .unwrap();
        QuantMatrix::with_features(
            DMatrix::from_row_slice(n, 6, &values),
            ids,
            sample_ids(),
            features,
        )
        .unwrap()
    }

    #[test]
    fn test_pipeline_builder() {
        let pipeline = Pipeline::new()
            .name("test")
            .normalize_median()
            .model_lm("~ condition")
            .ebayes(EbayesConfig::default())
            .test_moderated("conditiontreatment")
            .correct_bh();

        let config = pipeline.to_config(Some("Test pipeline"));
        assert_eq!(config.steps.len(), 5);
        assert_eq!(config.name, "test");
        assert_eq!(pipeline.steps()[1].name(), "model_lm");
    }

    #[test]
    fn test_pipeline_run() {
        let results = Pipeline::new()
            .name("test")
            .normalize_median()
            .model_lm("~ condition")
            .ebayes(EbayesConfig::default())
            .test_moderated("conditiontreatment")
            .correct_bh()
            .classify(ClassifyConfig::new(0.05))
            .run(&create_log_matrix(), &create_test_metadata())
            .unwrap();

        assert_eq!(results.len(), 7);
        assert_eq!(results.excluded.len(), 1);
        assert_eq!(results.method, "test");
        for r in results.iter() {
            assert!(r.p_value >= 0.0 && r.p_value <= 1.0);
            assert!(r.q_value >= r.p_value);
        }

        let p1 = results.get_feature("P1").unwrap();
        assert_eq!(p1.significance, Some(Significance::Up));
        let p2 = results.get_feature("P2").unwrap();
        assert_eq!(p2.significance, Some(Significance::Down));
    }

    #[test]
    fn test_pipeline_from_psms() {
        let results = Pipeline::new()
            .name("psm")
            .filter_annotation(vec![AnnotationFilter::AtMost {
                column: "qvalue".to_string(),
                max: 0.01,
            }])
            .filter_missing_key("protein")
            .zero_to_missing()
            .aggregate_sum("protein")
            .log2()
            .normalize_median()
            .model_lm("~ condition")
            .ebayes(EbayesConfig::default().with_robust(true))
            .test_moderated("conditiontreatment")
            .correct_bh()
            .run(&create_psm_matrix(), &create_test_metadata())
            .unwrap();

        assert_eq!(results.len(), 7);
        let p1 = results.get_feature("P1").unwrap();
        assert_eq!(p1.support, 2);
        assert!((p1.estimate - 2.0).abs() < 0.5);
    }

    #[test]
    fn test_run_limma() {
        let results = run_limma(
            &create_log_matrix(),
            &create_test_metadata(),
            "~ condition",
            "conditiontreatment",
            EbayesConfig::default().with_trend(true),
        )
        .unwrap();

        assert_eq!(results.method, "limma");
        assert!(results.get_feature("P1").unwrap().p_value < 0.001);
    }

    #[test]
    fn test_pipeline_contrasts_and_treat() {
        let results = Pipeline::new()
            .normalize_median()
            .model_lm_with_reference("~ condition", &[("condition", "treatment")])
            .contrasts(&["-conditioncontrol"])
            .ebayes(EbayesConfig::default())
            .test_treat("-conditioncontrol", 1.0)
            .correct_bh()
            .run(&create_log_matrix(), &create_test_metadata())
            .unwrap();

        assert_eq!(results.lfc_threshold, Some(1.0));
        let p1 = results.get_feature("P1").unwrap();
        assert!(p1.estimate > 1.5);
        assert!(p1.p_value < 0.05);
        assert_eq!(results.get_feature("P3").unwrap().statistic, 0.0);
    }

    #[test]
    fn test_pipeline_config_yaml() {
        let pipeline = Pipeline::new()
            .name("example")
            .filter_missing_key("protein")
            .filter_annotation(vec![AnnotationFilter::NotMatches {
                column: "protein".to_string(),
                pattern: "^(REV_|CON_)".to_string(),
            }])
            .zero_to_missing()
            .aggregate("protein", AggregateMethod::MedianPolish, MissingPolicy::Ignore)
            .log2()
            .normalize_median()
            .filter_missing_groupwise("condition", 2, GroupwiseLogic::All)
            .model_lm("~ condition")
            .ebayes(EbayesConfig::default().with_trend(true).with_robust(true))
            .test_treat("conditiontreatment", 0.5)
            .correct_bh()
            .classify(ClassifyConfig::new(0.01).with_lfc(1.0));

        let config = pipeline.to_config(Some("Example proteomics pipeline"));
        let yaml = config.to_yaml().unwrap();

        let parsed = PipelineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.name, "example");
        assert_eq!(parsed.steps, config.steps);
    }

    #[test]
    fn test_pipeline_error_handling() {
        let matrix = create_log_matrix();
        let metadata = create_test_metadata();

        // test before moderation
        let result = Pipeline::new()
            .model_lm("~ condition")
            .test_moderated("conditiontreatment")
            .run(&matrix, &metadata);
        match result {
            Err(DaaError::Pipeline(msg)) => assert!(msg.contains("test_moderated")),
            other => panic!("expected pipeline error, got {:?}", other.map(|r| r.len())),
        }

        // no test step
        assert!(Pipeline::new()
            .model_lm("~ condition")
            .run(&matrix, &metadata)
            .is_err());

        // log of non-positive values
        assert!(Pipeline::new()
            .log2()
            .normalize_median()
            .run(&matrix.with_values(-matrix.matrix().clone()).unwrap(), &metadata)
            .is_err());
    }

    #[test]
    fn test_refit_discards_earlier_statistics() {
        let matrix = create_log_matrix();
        let metadata = create_test_metadata();

        // a second fit without a test of its own
        let result = Pipeline::new()
            .model_lm("~ condition")
            .ebayes(EbayesConfig::default())
            .test_moderated("conditiontreatment")
            .correct_bh()
            .model_lm("~ condition")
            .ebayes(EbayesConfig::default().with_robust(true))
            .run(&matrix, &metadata);
        assert!(matches!(result, Err(DaaError::Pipeline(_))));

        let refit = Pipeline::new()
            .model_lm("~ condition")
            .ebayes(EbayesConfig::default())
            .test_moderated("conditiontreatment")
            .correct_bh()
            .classify(ClassifyConfig::new(0.05))
            .model_lm("~ condition")
            .ebayes(EbayesConfig::default())
            .test_treat("conditiontreatment", 0.5)
            .correct_bh()
            .run(&matrix, &metadata)
            .unwrap();
        assert_eq!(refit.lfc_threshold, Some(0.5));
        assert!(refit.iter().all(|r| r.significance.is_none()));
    }

    #[test]
    fn test_snapshot_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("normalized.tsv");
        Pipeline::new()
            .normalize_median()
            .snapshot(path.to_str().unwrap())
            .model_lm("~ condition")
            .ebayes(EbayesConfig::default())
            .test_moderated("conditiontreatment")
            .correct_bh()
            .run(&create_log_matrix(), &create_test_metadata())
            .unwrap();

        let reloaded = QuantMatrix::from_tsv(&path).unwrap();
        assert_eq!(reloaded.n_features(), 8);
        assert_eq!(reloaded.n_samples(), 6);
    }
}
