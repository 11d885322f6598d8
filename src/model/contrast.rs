//! Linear contrasts of model coefficients.

use crate::error::{DaaError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn term_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([+-])?\s*(?:([0-9]*\.?[0-9]+)\s*\*\s*)?([^\s+*-]+)\s*(?:$|[+-])")
            .expect("valid regex")
    })
}

/// A named linear combination of coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contrast {
    /// Name used in place of a coefficient name downstream.
    pub name: String,
    /// One weight per coefficient, in design order.
    pub weights: Vec<f64>,
}

impl Contrast {
    /// Contrast with explicit weights.
    pub fn new(name: &str, weights: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            weights,
        }
    }

    /// Parse an expression such as `conditionB - conditionC` or
    /// `0.5*conditionB + 0.5*conditionC - conditionA`.
    ///
    /// Every name must be one of `coefficient_names`. The expression itself
    /// becomes the contrast name.
    pub fn parse(expression: &str, coefficient_names: &[String]) -> Result<Self> {
        let mut weights = vec![0.0; coefficient_names.len()];
        let mut rest = expression.trim();
        if rest.is_empty() {
            return Err(DaaError::ContrastParse("Empty contrast".to_string()));
        }

        let mut first = true;
        while !rest.is_empty() {
            let caps = term_pattern().captures(rest).ok_or_else(|| {
                DaaError::ContrastParse(format!("Cannot parse '{}' in '{}'", rest, expression))
            })?;
            let sign = match caps.get(1).map(|m| m.as_str()) {
                Some("-") => -1.0,
                Some(_) => 1.0,
                None if first => 1.0,
                None => {
                    return Err(DaaError::ContrastParse(format!(
                        "Missing operator before '{}'",
                        rest
                    )))
                }
            };
            let multiplier = match caps.get(2) {
                Some(m) => m.as_str().parse::<f64>().map_err(|_| {
                    DaaError::ContrastParse(format!("Invalid multiplier '{}'", m.as_str()))
                })?,
                None => 1.0,
            };
            let name = &caps[3];
            let idx = coefficient_names
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| {
                    DaaError::ContrastParse(format!(
                        "Unknown coefficient '{}'. Available: {:?}",
                        name, coefficient_names
                    ))
                })?;
            weights[idx] += sign * multiplier;

            // leave a trailing operator for the next term
            let consumed = caps.get(3).map(|m| m.end()).unwrap_or(rest.len());
            rest = rest[consumed..].trim_start();
            first = false;
        }

        if weights.iter().all(|&w| w == 0.0) {
            return Err(DaaError::ContrastParse(format!(
                "Contrast '{}' has no non-zero weight",
                expression
            )));
        }

        Ok(Self {
            name: expression.trim().to_string(),
            weights,
        })
    }

    /// Contrast selecting a single coefficient.
    pub fn coefficient(name: &str, coefficient_names: &[String]) -> Result<Self> {
        let idx = coefficient_names
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| {
                DaaError::ContrastParse(format!("Unknown coefficient '{}'", name))
            })?;
        let mut weights = vec![0.0; coefficient_names.len()];
        weights[idx] = 1.0;
        Ok(Self::new(name, weights))
    }
}
