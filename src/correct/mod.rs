//! Multiple testing correction.

pub mod bh;

pub use bh::{correct_bh, correct_bh_moderated, create_results, BhCorrected};
