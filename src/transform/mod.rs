//! Variance-stabilizing transforms.

pub mod logarithm;

pub use logarithm::{exp_transform, log_transform};
