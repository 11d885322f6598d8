//! Statistical hypothesis testing for differential abundance.

pub mod moderated;

pub use moderated::{test_moderated, test_treat, ModeratedResultSingle, ModeratedTest};
