//! Benchmarking utilities for evaluating differential abundance methods.
//!
//! Synthetic datasets with known ground truth, at protein level and as raw
//! spectrum-match tables.

mod generate;

pub use generate::{
    generate_psm_table, generate_synthetic, generate_two_group, GroundTruth, PsmConfig, Recovery,
    SyntheticConfig, SyntheticData, CONDITION_COLUMN,
};
