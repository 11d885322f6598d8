//! Over-representation analysis with the hypergeometric test.

use super::CategoryMap;
use crate::correct::correct_bh;
use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};
use statrs::function::factorial::ln_binomial;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Configuration for enrichment testing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Report categories with `q < q_cutoff`.
    pub q_cutoff: f64,
    /// Smallest number of universe members a tested category may have.
    pub min_size: usize,
    /// Largest number of universe members a tested category may have.
    pub max_size: Option<usize>,
    /// Count only identifiers with at least one category.
    pub annotated_only: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            q_cutoff: 0.05,
            min_size: 1,
            max_size: None,
            annotated_only: true,
        }
    }
}

/// Test result for one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentRow {
    /// Category identifier.
    pub category: String,
    /// Category description, empty if unknown.
    pub description: String,
    /// Foreground members in the category (k).
    pub overlap: usize,
    /// Universe members in the category (K).
    pub set_size: usize,
    /// Foreground size (n).
    pub foreground_size: usize,
    /// Universe size (N).
    pub universe_size: usize,
    /// `(k / n) / (K / N)`.
    pub fold_enrichment: f64,
    /// `P(X >= k)` for `X ~ Hypergeometric(N, K, n)`.
    pub p_value: f64,
    /// BH-adjusted p-value across tested categories.
    pub q_value: f64,
    /// Foreground identifiers in the category, sorted.
    pub members: Vec<String>,
}

/// Result of an enrichment invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    /// Categories passing the q-value cutoff, sorted by p-value.
    pub results: Vec<EnrichmentRow>,
    /// Number of categories tested.
    pub n_tested: usize,
    /// Foreground size after filtering.
    pub foreground_size: usize,
    /// Universe size after filtering.
    pub universe_size: usize,
}

impl EnrichmentResult {
    /// Number of reported categories.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if no category was reported.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Get the row of a category.
    pub fn get_category(&self, category: &str) -> Option<&EnrichmentRow> {
        self.results.iter().find(|r| r.category == category)
    }

    /// Write reported categories to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(
            writer,
            "category\tdescription\toverlap\tset_size\tforeground_size\tuniverse_size\tfold_enrichment\tp_value\tq_value\tmembers"
        )?;
        for r in &self.results {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}\t{}\t{:.4}\t{:.3e}\t{:.3e}\t{}",
                r.category,
                r.description,
                r.overlap,
                r.set_size,
                r.foreground_size,
                r.universe_size,
                r.fold_enrichment,
                r.p_value,
                r.q_value,
                r.members.join(";"),
            )?;
        }
        Ok(())
    }
}

/// Upper tail `P(X >= k)` of the hypergeometric distribution with
/// population `N`, `K` successes and `n` draws.
pub fn hypergeometric_upper(k: usize, big_k: usize, n: usize, big_n: usize) -> f64 {
    // smallest overlap the margins allow
    let min_overlap = (n + big_k).saturating_sub(big_n);
    if k <= min_overlap {
        return 1.0;
    }
    let hi = big_k.min(n);
    if k > hi {
        return 0.0;
    }
    let lo = k;

    let ln_total = ln_binomial(big_n as u64, n as u64);
    let terms: Vec<f64> = (lo..=hi)
        .map(|i| {
            ln_binomial(big_k as u64, i as u64) + ln_binomial((big_n - big_k) as u64, (n - i) as u64)
                - ln_total
        })
        .collect();

    let max = terms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = terms.iter().map(|t| (t - max).exp()).sum();
    (max + sum.ln()).exp().clamp(0.0, 1.0)
}

fn dedup(ids: &[String]) -> BTreeSet<&str> {
    ids.iter().map(|s| s.as_str()).collect()
}

/// All tested categories, sorted by p-value.
fn enrichment_table(
    foreground: &[String],
    universe: &[String],
    categories: &CategoryMap,
    config: &EnrichmentConfig,
) -> Result<(Vec<EnrichmentRow>, usize, usize)> {
    let mut universe_set = dedup(universe);
    let mut foreground_set = dedup(foreground);

    let outside: Vec<&str> = foreground_set
        .iter()
        .filter(|id| !universe_set.contains(*id))
        .copied()
        .take(5)
        .collect();
    if !outside.is_empty() {
        return Err(DaaError::InvalidParameter(format!(
            "Foreground must be a subset of the universe; not in universe: {:?}",
            outside
        )));
    }

    if config.annotated_only {
        universe_set.retain(|id| categories.is_annotated(id));
        foreground_set.retain(|id| categories.is_annotated(id));
    }
    let big_n = universe_set.len();
    let n = foreground_set.len();

    // category -> (universe count, foreground members)
    let mut counts: BTreeMap<&str, (usize, Vec<String>)> = BTreeMap::new();
    for id in &universe_set {
        if let Some(cats) = categories.categories_of(id) {
            for cat in cats {
                let entry = counts.entry(cat.as_str()).or_insert((0, Vec::new()));
                entry.0 += 1;
                if foreground_set.contains(id) {
                    entry.1.push(id.to_string());
                }
            }
        }
    }

    let mut rows: Vec<EnrichmentRow> = counts
        .into_iter()
        .filter(|(_, (size, _))| {
            *size > 0 && *size >= config.min_size && config.max_size.map_or(true, |m| *size <= m)
        })
        .map(|(cat, (set_size, members))| {
            let overlap = members.len();
            let fold_enrichment = if n > 0 {
                (overlap as f64 / n as f64) / (set_size as f64 / big_n as f64)
            } else {
                f64::NAN
            };
            EnrichmentRow {
                category: cat.to_string(),
                description: categories.description(cat).to_string(),
                overlap,
                set_size,
                foreground_size: n,
                universe_size: big_n,
                fold_enrichment,
                p_value: hypergeometric_upper(overlap, set_size, n, big_n),
                q_value: f64::NAN,
                members,
            }
        })
        .collect();

    let p_values: Vec<f64> = rows.iter().map(|r| r.p_value).collect();
    let ids: Vec<String> = rows.iter().map(|r| r.category.clone()).collect();
    let bh = correct_bh(&p_values, &ids);
    for (row, q) in rows.iter_mut().zip(bh.q_values) {
        row.q_value = q;
    }

    rows.sort_by(|a, b| {
        a.p_value
            .total_cmp(&b.p_value)
            .then_with(|| a.category.cmp(&b.category))
    });
    Ok((rows, n, big_n))
}

/// Test every category for over-representation in the foreground.
///
/// The foreground must be a subset of the universe. Duplicate identifiers
/// are ignored. Categories without universe members are never tested.
/// Only categories with `q < q_cutoff` are reported.
pub fn test_enrichment(
    foreground: &[String],
    universe: &[String],
    categories: &CategoryMap,
    config: &EnrichmentConfig,
) -> Result<EnrichmentResult> {
    if !(config.q_cutoff > 0.0 && config.q_cutoff <= 1.0) {
        return Err(DaaError::InvalidParameter(format!(
            "q-value cutoff must be in (0, 1], got {}",
            config.q_cutoff
        )));
    }

    let (rows, foreground_size, universe_size) =
        enrichment_table(foreground, universe, categories, config)?;
    let n_tested = rows.len();
    if foreground_size == 0 {
        log::warn!("Enrichment foreground has no annotated identifiers");
    }

    let results: Vec<EnrichmentRow> = rows
        .into_iter()
        .filter(|r| r.q_value < config.q_cutoff)
        .collect();
    log::debug!(
        "Tested {} categories ({} of {} identifiers in foreground), {} reported",
        n_tested,
        foreground_size,
        universe_size,
        results.len()
    );

    Ok(EnrichmentResult {
        results,
        n_tested,
        foreground_size,
        universe_size,
    })
}
