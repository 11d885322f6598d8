//! Formula parsing for model specification.

use crate::error::{DaaError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn variable_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9._]*$").expect("valid regex"))
}

/// A parsed additive model formula.
///
/// Supports the R-style subset used for designed proteomics experiments:
/// - `~ condition` - intercept + condition
/// - `~ condition + batch` - intercept + condition + batch
/// - `~ 0 + condition` - one indicator per condition, no intercept
///
/// Interactions are not supported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    /// Whether to include an intercept.
    pub intercept: bool,
    /// Variables in the formula, in order of appearance.
    pub terms: Vec<String>,
}

impl Formula {
    /// Parse a formula string.
    ///
    /// ```
    /// use proteomics_daa::data::Formula;
    /// let f = Formula::parse("~ condition + batch").unwrap();
    /// assert!(f.intercept);
    /// assert_eq!(f.terms, vec!["condition", "batch"]);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let rhs = formula
            .trim()
            .strip_prefix('~')
            .ok_or_else(|| DaaError::FormulaParse("Formula must start with '~'".to_string()))?
            .trim();
        if rhs.is_empty() {
            return Err(DaaError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }

        let mut intercept = true;
        let mut terms: Vec<String> = Vec::new();

        // "-1" is R's other spelling of "0 +"
        let rhs = rhs.replace("- 1", "+ 0").replace("-1", "+ 0");
        for raw in rhs.split('+') {
            let term = raw.trim();
            match term {
                "" => continue,
                "1" => intercept = true,
                "0" => intercept = false,
                t if t.contains(':') || t.contains('*') => {
                    return Err(DaaError::FormulaParse(format!(
                        "Interaction terms are not supported: {}",
                        t
                    )));
                }
                t if variable_name().is_match(t) => {
                    if !terms.iter().any(|existing| existing == t) {
                        terms.push(t.to_string());
                    }
                }
                t => {
                    return Err(DaaError::FormulaParse(format!(
                        "Invalid term '{}'",
                        t
                    )));
                }
            }
        }

        if terms.is_empty() && !intercept {
            return Err(DaaError::FormulaParse(
                "Formula must have at least one term".to_string(),
            ));
        }

        Ok(Self { intercept, terms })
    }

    /// Variable names used in the formula.
    pub fn variables(&self) -> &[String] {
        &self.terms
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "~ ")?;
        if !self.intercept {
            write!(f, "0 + ")?;
        }
        if self.terms.is_empty() {
            write!(f, "1")
        } else {
            write!(f, "{}", self.terms.join(" + "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let f = Formula::parse("~ condition").unwrap();
        assert!(f.intercept);
        assert_eq!(f.terms, vec!["condition"]);
    }

    #[test]
    fn test_parse_no_intercept() {
        let f = Formula::parse("~ 0 + condition").unwrap();
        assert!(!f.intercept);
        let f = Formula::parse("~condition - 1").unwrap();
        assert!(!f.intercept);
        assert_eq!(f.terms, vec!["condition"]);
    }

    #[test]
    fn test_parse_intercept_only() {
        let f = Formula::parse("~ 1").unwrap();
        assert!(f.intercept);
        assert!(f.terms.is_empty());
        assert_eq!(f.to_string(), "~ 1");
    }

    #[test]
    fn test_duplicate_terms_collapse() {
        let f = Formula::parse("~ condition + batch + condition").unwrap();
        assert_eq!(f.terms, vec!["condition", "batch"]);
        assert_eq!(f.to_string(), "~ condition + batch");
    }

    #[test]
    fn test_invalid_formula() {
        assert!(Formula::parse("condition").is_err());
        assert!(Formula::parse("~").is_err());
        assert!(Formula::parse("~ 0").is_err());
        assert!(Formula::parse("~ condition:batch").is_err());
        assert!(Formula::parse("~ log(x)").is_err());
    }
}
