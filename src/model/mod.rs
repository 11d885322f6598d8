//! Statistical models for differential abundance analysis.

pub mod contrast;
pub mod ebayes;
pub mod lm;
pub mod special;

pub use contrast::Contrast;
pub use ebayes::{moderate, EbayesConfig, ModeratedFit};
pub use lm::{model_lm, FitStatus, LmFit, LmFitSingle};
