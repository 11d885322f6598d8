//! Synthetic data generation for benchmarking and testing.
//!
//! Generates log-scale protein matrices with known ground truth, and raw
//! PSM-level tables that aggregate back to them, for validating the
//! differential abundance pipeline.

use crate::data::{FeatureMetadata, QuantMatrix, SampleMetadata};
use crate::error::{DaaError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the condition column in generated metadata.
pub const CONDITION_COLUMN: &str = "condition";

/// Configuration for synthetic data generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Name/identifier for this dataset.
    pub name: String,
    /// Number of features (proteins).
    pub n_features: usize,
    /// Number of samples per group.
    pub n_samples_per_group: usize,
    /// Number of truly differential features.
    pub n_differential: usize,
    /// Log2 shift of differential features in the second group.
    pub effect_size: f64,
    /// Alternate the sign of the shift across differential features.
    pub bidirectional: bool,
    /// Standard deviation of the Gaussian noise per cell.
    pub noise_sd: f64,
    /// Mean of the per-feature baseline (log2 intensity).
    pub baseline_mean: f64,
    /// Spread of the per-feature baseline.
    pub baseline_sd: f64,
    /// Standard deviation of a per-sample loading offset.
    pub loading_sd: f64,
    /// Fraction of cells set missing at random.
    pub missing_fraction: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            n_features: 100,
            n_samples_per_group: 3,
            n_differential: 10,
            effect_size: 2.0,
            bidirectional: false,
            noise_sd: 0.3,
            baseline_mean: 20.0,
            baseline_sd: 2.0,
            loading_sd: 0.0,
            missing_fraction: 0.0,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    /// Create a new config with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Set dimensions.
    pub fn with_dimensions(mut self, n_features: usize, n_samples_per_group: usize) -> Self {
        self.n_features = n_features;
        self.n_samples_per_group = n_samples_per_group;
        self
    }

    /// Set differential features.
    pub fn with_differential(mut self, n: usize, effect_size: f64) -> Self {
        self.n_differential = n;
        self.effect_size = effect_size;
        self
    }

    /// Shift half of the differential features down instead of up.
    pub fn with_bidirectional(mut self, bidirectional: bool) -> Self {
        self.bidirectional = bidirectional;
        self
    }

    /// Set the per-cell noise.
    pub fn with_noise(mut self, sd: f64) -> Self {
        self.noise_sd = sd;
        self
    }

    /// Set the per-sample loading offset spread.
    pub fn with_loading(mut self, sd: f64) -> Self {
        self.loading_sd = sd;
        self
    }

    /// Set the fraction of missing cells.
    pub fn with_missing(mut self, fraction: f64) -> Self {
        self.missing_fraction = fraction.clamp(0.0, 0.9);
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // Preset configurations

    /// 100 proteins, 3 vs 3 samples, 10 shifted by +2.
    pub fn two_group() -> Self {
        Self::new("two_group")
    }

    /// Unequal sample loading that normalization has to remove.
    pub fn uneven_loading() -> Self {
        Self::new("uneven_loading")
            .with_dimensions(500, 4)
            .with_differential(25, 1.0)
            .with_bidirectional(true)
            .with_loading(0.5)
    }

    /// Missing values scattered through the matrix.
    pub fn sparse() -> Self {
        Self::new("sparse")
            .with_dimensions(300, 5)
            .with_differential(20, 1.5)
            .with_bidirectional(true)
            .with_missing(0.15)
    }

    fn validate(&self) -> Result<()> {
        if self.n_features == 0 || self.n_samples_per_group == 0 {
            return Err(DaaError::InvalidParameter(
                "Synthetic data needs at least one feature and one sample per group".to_string(),
            ));
        }
        if self.n_differential > self.n_features {
            return Err(DaaError::InvalidParameter(format!(
                "n_differential ({}) exceeds n_features ({})",
                self.n_differential, self.n_features
            )));
        }
        if !(self.noise_sd >= 0.0) || !(self.loading_sd >= 0.0) {
            return Err(DaaError::InvalidParameter(
                "Standard deviations must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ground truth for a synthetic dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruth {
    /// Feature IDs that are truly differential.
    pub differential_features: Vec<String>,
    /// True log2 fold changes (second group over first).
    pub true_log2fc: HashMap<String, f64>,
    /// Null features (not differential).
    pub null_features: Vec<String>,
}

/// Recovery of the ground truth by a list of calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recovery {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl Recovery {
    /// Fraction of differential features that were called.
    pub fn sensitivity(&self) -> f64 {
        let positives = self.true_positives + self.false_negatives;
        if positives == 0 {
            return f64::NAN;
        }
        self.true_positives as f64 / positives as f64
    }

    /// Fraction of calls that are false.
    pub fn false_discovery_proportion(&self) -> f64 {
        let calls = self.true_positives + self.false_positives;
        if calls == 0 {
            return 0.0;
        }
        self.false_positives as f64 / calls as f64
    }
}

impl GroundTruth {
    /// Check if a feature is truly differential.
    pub fn is_differential(&self, feature_id: &str) -> bool {
        self.true_log2fc.contains_key(feature_id)
    }

    /// Get the true log2 fold change for a feature (0.0 for null features).
    pub fn get_log2fc(&self, feature_id: &str) -> f64 {
        self.true_log2fc.get(feature_id).copied().unwrap_or(0.0)
    }

    /// Compare a set of significant feature IDs against the truth.
    pub fn evaluate(&self, called: &[String]) -> Recovery {
        let true_positives = called.iter().filter(|id| self.is_differential(id)).count();
        Recovery {
            true_positives,
            false_positives: called.len() - true_positives,
            false_negatives: self.differential_features.len() - true_positives,
        }
    }

    /// Write ground truth to TSV format.
    pub fn to_tsv(&self) -> String {
        let mut lines = vec!["feature_id\ttrue_log2fc\tis_differential".to_string()];
        for feat in &self.differential_features {
            lines.push(format!("{}\t{:.4}\ttrue", feat, self.get_log2fc(feat)));
        }
        for feat in &self.null_features {
            lines.push(format!("{}\t0.0\tfalse", feat));
        }
        lines.join("\n")
    }
}

/// Result of synthetic data generation.
#[derive(Debug, Clone)]
pub struct SyntheticData {
    /// Generated log2-scale matrix.
    pub matrix: QuantMatrix,
    /// Sample metadata with a `condition` column (`control`, `treatment`).
    pub metadata: SampleMetadata,
    /// Ground truth.
    pub ground_truth: GroundTruth,
    /// Configuration used.
    pub config: SyntheticConfig,
}

impl SyntheticData {
    /// Write all files to a directory.
    pub fn write_to_dir(&self, dir: &std::path::Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        self.matrix.to_tsv(dir.join("matrix.tsv"))?;
        std::fs::write(dir.join("metadata.tsv"), self.metadata_to_tsv())?;
        std::fs::write(dir.join("ground_truth.tsv"), self.ground_truth.to_tsv())?;
        std::fs::write(dir.join("config.yaml"), serde_yaml::to_string(&self.config)?)?;

        Ok(())
    }

    fn metadata_to_tsv(&self) -> String {
        let mut lines = vec![format!("sample_id\t{}", CONDITION_COLUMN)];
        for sample_id in self.metadata.sample_ids() {
            let condition = self
                .metadata
                .get(sample_id, CONDITION_COLUMN)
                .and_then(|v| v.as_categorical())
                .unwrap_or("NA");
            lines.push(format!("{}\t{}", sample_id, condition));
        }
        lines.join("\n")
    }
}

/// Simple deterministic RNG (xorshift64).
pub(crate) struct Rng {
    state: u64,
}

impl Rng {
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    pub(crate) fn next_f64(&mut self) -> f64 {
        (self.next_u64() as f64) / (u64::MAX as f64)
    }

    /// Normal variate (Box-Muller).
    pub(crate) fn next_normal(&mut self, mean: f64, std: f64) -> f64 {
        let u1 = self.next_f64().max(1e-10);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std * z
    }

    /// Uniform integer in `lo..=hi`.
    fn next_range(&mut self, lo: usize, hi: usize) -> usize {
        lo + (self.next_u64() % (hi - lo + 1) as u64) as usize
    }
}

/// Generate a two-group log2 matrix with known shifted features.
///
/// Features `P0001..` have a baseline drawn around `baseline_mean`; the
/// first `n_differential` features are shifted by `effect_size` in the
/// `treatment` group. Every cell gets independent Gaussian noise.
pub fn generate_two_group(config: &SyntheticConfig) -> Result<SyntheticData> {
    config.validate()?;
    let mut rng = Rng::new(config.seed);

    let n_features = config.n_features;
    let per_group = config.n_samples_per_group;
    let n_samples = 2 * per_group;

    let width = n_features.to_string().len().max(4);
    let feature_ids: Vec<String> = (1..=n_features)
        .map(|i| format!("P{:0width$}", i, width = width))
        .collect();
    let sample_ids: Vec<String> = (1..=per_group)
        .map(|i| format!("control_{}", i))
        .chain((1..=per_group).map(|i| format!("treatment_{}", i)))
        .collect();
    let labels: Vec<&str> = (0..n_samples)
        .map(|j| if j < per_group { "control" } else { "treatment" })
        .collect();

    let loading: Vec<f64> = (0..n_samples)
        .map(|_| rng.next_normal(0.0, config.loading_sd))
        .collect();

    let mut true_log2fc = HashMap::new();
    let mut data = DMatrix::zeros(n_features, n_samples);
    for i in 0..n_features {
        let baseline = rng.next_normal(config.baseline_mean, config.baseline_sd);
        let shift = if i < config.n_differential {
            let sign = if config.bidirectional && i % 2 == 1 { -1.0 } else { 1.0 };
            let fc = sign * config.effect_size;
            true_log2fc.insert(feature_ids[i].clone(), fc);
            fc
        } else {
            0.0
        };

        for j in 0..n_samples {
            let group_shift = if j < per_group { 0.0 } else { shift };
            data[(i, j)] =
                baseline + group_shift + loading[j] + rng.next_normal(0.0, config.noise_sd);
        }
    }

    if config.missing_fraction > 0.0 {
        for value in data.iter_mut() {
            if rng.next_f64() < config.missing_fraction {
                *value = f64::NAN;
            }
        }
    }

    let ground_truth = GroundTruth {
        differential_features: feature_ids[..config.n_differential].to_vec(),
        true_log2fc,
        null_features: feature_ids[config.n_differential..].to_vec(),
    };

    let matrix = QuantMatrix::new(data, feature_ids, sample_ids.clone())?;
    let metadata = SampleMetadata::from_labels(CONDITION_COLUMN, &sample_ids, &labels)?;

    Ok(SyntheticData {
        matrix,
        metadata,
        ground_truth,
        config: config.clone(),
    })
}

/// Layout of a simulated spectrum-match table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsmConfig {
    /// Peptides per protein, drawn uniformly from this range.
    pub peptides_per_protein: (usize, usize),
    /// Spectrum matches per peptide, drawn uniformly from this range.
    pub psms_per_peptide: (usize, usize),
    /// Spread of the per-peptide response factor (log2).
    pub response_sd: f64,
    /// Fraction of PSM rows without a protein key.
    pub unassigned_fraction: f64,
    /// Random seed.
    pub seed: u64,
}

impl Default for PsmConfig {
    fn default() -> Self {
        Self {
            peptides_per_protein: (1, 4),
            psms_per_peptide: (1, 3),
            response_sd: 1.0,
            unassigned_fraction: 0.0,
            seed: 7,
        }
    }
}

/// Expand a protein-level log2 matrix into raw-scale spectrum matches.
///
/// Each PSM row carries `peptide` and `protein` annotation columns. Its
/// intensity is `2^(protein + response)` with a response factor shared by
/// all samples of a peptide, so summing PSMs to peptides and peptides to
/// proteins and taking log2 recovers the protein value plus a per-protein
/// constant. Missing protein cells stay missing. With
/// `unassigned_fraction > 0` some rows get an empty protein key.
pub fn generate_psm_table(proteins: &QuantMatrix, config: &PsmConfig) -> Result<QuantMatrix> {
    let (pep_lo, pep_hi) = config.peptides_per_protein;
    let (psm_lo, psm_hi) = config.psms_per_peptide;
    if pep_lo == 0 || pep_lo > pep_hi || psm_lo == 0 || psm_lo > psm_hi {
        return Err(DaaError::InvalidParameter(format!(
            "Invalid PSM layout: peptides {:?}, PSMs {:?}",
            config.peptides_per_protein, config.psms_per_peptide
        )));
    }

    let mut rng = Rng::new(config.seed);
    let n_samples = proteins.n_samples();

    let mut ids = Vec::new();
    let mut annotations = Vec::new();
    let mut values: Vec<f64> = Vec::new();

    for (p, protein_id) in proteins.feature_ids().iter().enumerate() {
        for pep in 0..rng.next_range(pep_lo, pep_hi) {
            let peptide_id = format!("{}_pep{}", protein_id, pep + 1);
            let response = rng.next_normal(0.0, config.response_sd);
            for psm in 0..rng.next_range(psm_lo, psm_hi) {
                ids.push(format!("{}_psm{}", peptide_id, psm + 1));
                let key = if rng.next_f64() < config.unassigned_fraction {
                    String::new()
                } else {
                    protein_id.clone()
                };
                annotations.push(vec![peptide_id.clone(), key]);
                for j in 0..n_samples {
                    let v = proteins.get(p, j);
                    values.push(if v.is_nan() { f64::NAN } else { (v + response).exp2() });
                }
            }
        }
    }

    let n_rows = ids.len();
    let data = DMatrix::from_row_slice(n_rows, n_samples, &values);
    let features = FeatureMetadata::new(
        vec!["peptide".to_string(), "protein".to_string()],
        annotations,
        vec![1; n_rows],
    )?;
    QuantMatrix::with_features(data, ids, proteins.sample_ids().to_vec(), features)
}

/// Generate synthetic data with default configuration.
pub fn generate_synthetic() -> Result<SyntheticData> {
    generate_two_group(&SyntheticConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_group_shape() {
        let data = generate_two_group(&SyntheticConfig::two_group()).unwrap();
        assert_eq!(data.matrix.n_features(), 100);
        assert_eq!(data.matrix.n_samples(), 6);
        assert_eq!(data.ground_truth.differential_features.len(), 10);
        assert_eq!(data.ground_truth.null_features.len(), 90);
        assert_eq!(data.matrix.feature_ids()[0], "P0001");
        assert_eq!(
            data.metadata.levels(CONDITION_COLUMN).unwrap(),
            vec!["control", "treatment"]
        );
        assert_eq!(data.matrix.n_missing(), 0);
    }

    #[test]
    fn test_reproducible() {
        let a = generate_two_group(&SyntheticConfig::default()).unwrap();
        let b = generate_two_group(&SyntheticConfig::default()).unwrap();
        assert_eq!(a.matrix.matrix(), b.matrix.matrix());

        let c = generate_two_group(&SyntheticConfig::default().with_seed(7)).unwrap();
        assert_ne!(a.matrix.matrix(), c.matrix.matrix());
    }

    #[test]
    fn test_shift_visible_in_group_means() {
        let config = SyntheticConfig::default().with_noise(0.0);
        let data = generate_two_group(&config).unwrap();
        for i in 0..config.n_features {
            let row = data.matrix.row(i);
            let diff = row[3..].iter().sum::<f64>() / 3.0 - row[..3].iter().sum::<f64>() / 3.0;
            let expected = data.ground_truth.get_log2fc(&data.matrix.feature_ids()[i]);
            assert!((diff - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_bidirectional_and_missing() {
        let data = generate_two_group(&SyntheticConfig::sparse()).unwrap();
        let truth = &data.ground_truth;
        assert_eq!(truth.get_log2fc("P0001"), 1.5);
        assert_eq!(truth.get_log2fc("P0002"), -1.5);
        let missing = data.matrix.n_missing() as f64 / (300.0 * 10.0);
        assert!(missing > 0.08 && missing < 0.22);
    }

    #[test]
    fn test_evaluate() {
        let data = generate_two_group(&SyntheticConfig::default()).unwrap();
        let called = vec!["P0001".to_string(), "P0002".to_string(), "P0050".to_string()];
        let recovery = data.ground_truth.evaluate(&called);
        assert_eq!(recovery.true_positives, 2);
        assert_eq!(recovery.false_positives, 1);
        assert_eq!(recovery.false_negatives, 8);
        assert!((recovery.sensitivity() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_psm_table_layout() {
        let config = SyntheticConfig::default()
            .with_dimensions(5, 2)
            .with_differential(2, 1.0);
        let data = generate_two_group(&config).unwrap();
        let psms = generate_psm_table(&data.matrix, &PsmConfig::default()).unwrap();

        assert!(psms.n_features() >= 5);
        assert!(psms.n_features() <= 5 * 4 * 3);
        assert_eq!(psms.sample_ids(), data.matrix.sample_ids());
        let proteins: std::collections::BTreeSet<&str> =
            psms.features().column("protein").unwrap().into_iter().collect();
        assert_eq!(proteins.len(), 5);
        assert!(psms.matrix().iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_invalid_config() {
        let config = SyntheticConfig::default().with_differential(200, 1.0);
        assert!(generate_two_group(&config).is_err());

        let data = generate_synthetic().unwrap();
        let layout = PsmConfig {
            peptides_per_protein: (3, 2),
            ..Default::default()
        };
        assert!(generate_psm_table(&data.matrix, &layout).is_err());
    }
}
