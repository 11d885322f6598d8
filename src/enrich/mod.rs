//! Over-representation testing of result lists against category mappings.

mod category;
pub mod ora;

pub use category::CategoryMap;
pub use ora::{hypergeometric_upper, test_enrichment, EnrichmentConfig, EnrichmentResult, EnrichmentRow};
