//! Filtering primitives for quantitative matrices.

pub mod annotation;
pub mod missing;

pub use annotation::{
    filter_annotation, filter_annotation_with_stats, AnnotationFilter, FilterResult,
};
pub use missing::{
    filter_missing, filter_missing_groupwise, filter_missing_key, zero_to_missing, GroupwiseLogic,
};
