//! Data structures for differential abundance analysis.

mod design_matrix;
mod formula;
mod metadata;
mod quant_matrix;
mod result;

pub use design_matrix::{DesignMatrix, DesignWarning, INTERCEPT};
pub(crate) use design_matrix::matrix_rank;
pub use formula::Formula;
pub use metadata::{SampleMetadata, Variable, VariableType};
pub use quant_matrix::{FeatureMetadata, QuantMatrix, TableSpec};
pub use result::{DaResult, DaResultSet, ExcludedFeature, ResultSummary, Significance};
