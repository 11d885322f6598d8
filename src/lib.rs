//! Composable Differential Abundance Analysis for quantitative proteomics
//!
//! This library provides modular primitives for differential abundance analysis
//! of spectrum-match, peptide and protein intensity tables.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (QuantMatrix, SampleMetadata, DesignMatrix, Results)
//! - **filter**: Row filtering (grouping keys, QC annotations, missing values)
//! - **aggregate**: Aggregation of PSMs and peptides into proteins
//! - **transform**: Logarithm and its inverse
//! - **normalize**: Per-sample median centering
//! - **model**: Per-feature linear models and empirical-Bayes moderation
//! - **test**: Moderated t-tests and threshold tests (TREAT)
//! - **correct**: Multiple testing correction (Benjamini-Hochberg)
//! - **classify**: Significance and direction labels
//! - **enrich**: Over-representation analysis of result lists
//! - **pipeline**: Pipeline composition and execution
//! - **benchmark**: Synthetic data with known ground truth
//!
//! # Example
//!
//! ```no_run
//! use proteomics_daa::prelude::*;
//!
//! // Load data
//! let proteins = QuantMatrix::from_tsv("proteins.tsv").unwrap();
//! let metadata = SampleMetadata::from_tsv("metadata.tsv").unwrap();
//!
//! // Run analysis pipeline
//! let results = Pipeline::new()
//!     .zero_to_missing()
//!     .log2()
//!     .normalize_median()
//!     .model_lm("~ condition")
//!     .ebayes(EbayesConfig::default().with_trend(true))
//!     .test_moderated("conditiontreatment")
//!     .correct_bh()
//!     .classify(ClassifyConfig::new(0.05))
//!     .run(&proteins, &metadata)
//!     .unwrap();
//! ```

pub mod aggregate;
pub mod benchmark;
pub mod classify;
pub mod correct;
pub mod data;
pub mod enrich;
pub mod error;
pub mod filter;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod test;
pub mod transform;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::aggregate::{aggregate_features, AggregateMethod, MissingPolicy};
    pub use crate::benchmark::{
        generate_psm_table, generate_synthetic, generate_two_group, GroundTruth, PsmConfig,
        Recovery, SyntheticConfig, SyntheticData,
    };
    pub use crate::classify::{classify, ClassifyConfig};
    pub use crate::correct::{correct_bh, correct_bh_moderated, create_results, BhCorrected};
    pub use crate::data::{
        DaResult, DaResultSet, DesignMatrix, DesignWarning, ExcludedFeature, FeatureMetadata,
        Formula, QuantMatrix, SampleMetadata, Significance, TableSpec, Variable,
    };
    pub use crate::enrich::{
        test_enrichment, CategoryMap, EnrichmentConfig, EnrichmentResult, EnrichmentRow,
    };
    pub use crate::error::{DaaError, Result};
    pub use crate::filter::{
        filter_annotation, filter_missing, filter_missing_groupwise, filter_missing_key,
        zero_to_missing, AnnotationFilter, FilterResult, GroupwiseLogic,
    };
    pub use crate::model::{
        model_lm, moderate, Contrast, EbayesConfig, FitStatus, LmFit, ModeratedFit,
    };
    pub use crate::normalize::{normalize_center, normalize_median, CenterStatistic};
    pub use crate::pipeline::{run_limma, Pipeline, PipelineConfig, PipelineStep};
    pub use crate::test::{test_moderated, test_treat, ModeratedTest};
    pub use crate::transform::{exp_transform, log_transform};
}
