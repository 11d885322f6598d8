//! Sample normalization for log-scale abundances.

pub mod center;

pub use center::{finite_median, normalize_center, normalize_median, CenterStatistic, CenteredMatrix};
