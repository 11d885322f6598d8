//! Sample metadata: one record per matrix column.

use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// A variable value for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical label (condition, batch, TMT channel group).
    Categorical(String),
    /// Continuous numeric covariate.
    Continuous(f64),
    /// Missing value.
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Try to get as categorical label.
    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as continuous value.
    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            _ => None,
        }
    }
}

/// Type of a metadata column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Categorical,
    Continuous,
}

fn parse_cell(raw: &str, var_type: VariableType) -> Variable {
    let raw = raw.trim();
    if raw.is_empty() || raw == "NA" || raw == "na" {
        return Variable::Missing;
    }
    match var_type {
        VariableType::Continuous => raw
            .parse::<f64>()
            .map(Variable::Continuous)
            .unwrap_or(Variable::Missing),
        VariableType::Categorical => Variable::Categorical(raw.to_string()),
    }
}

/// Sample metadata containing variables for each sample.
#[derive(Debug, Clone, Default)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    column_names: Vec<String>,
    /// sample_id -> column -> value
    data: HashMap<String, HashMap<String, Variable>>,
    column_types: HashMap<String, VariableType>,
}

impl SampleMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata with a single categorical column.
    ///
    /// Convenience for the common one-factor layout where each sample
    /// carries a condition label.
    pub fn from_labels(column: &str, sample_ids: &[String], labels: &[&str]) -> Result<Self> {
        if sample_ids.len() != labels.len() {
            return Err(DaaError::DimensionMismatch {
                expected: sample_ids.len(),
                actual: labels.len(),
            });
        }
        let mut meta = Self::new();
        meta.column_names.push(column.to_string());
        meta.column_types
            .insert(column.to_string(), VariableType::Categorical);
        for (sid, label) in sample_ids.iter().zip(labels) {
            if meta.data.contains_key(sid) {
                return Err(DaaError::DuplicateId(sid.clone()));
            }
            meta.sample_ids.push(sid.clone());
            let mut row = HashMap::new();
            row.insert(column.to_string(), parse_cell(label, VariableType::Categorical));
            meta.data.insert(sid.clone(), row);
        }
        Ok(meta)
    }

    /// Load metadata from a TSV file.
    ///
    /// The first column holds sample IDs. A column is continuous when every
    /// non-missing value parses as a number, categorical otherwise; use
    /// [`with_column_types`](Self::with_column_types) to override.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(path)?;
        let header: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        if header.len() < 2 {
            return Err(DaaError::EmptyData(
                "Metadata must have at least one variable column".to_string(),
            ));
        }
        let column_names: Vec<String> = header[1..].to_vec();

        let mut raw_rows: Vec<(String, Vec<String>)> = Vec::new();
        for record in reader.records() {
            let record = record?;
            let sample_id = match record.get(0) {
                Some(s) if !s.trim().is_empty() => s.trim().to_string(),
                _ => continue,
            };
            let values = (1..header.len())
                .map(|i| record.get(i).unwrap_or_default().to_string())
                .collect();
            raw_rows.push((sample_id, values));
        }

        if raw_rows.is_empty() {
            return Err(DaaError::EmptyData("No samples in metadata".to_string()));
        }

        let mut column_types = HashMap::new();
        for (col_idx, name) in column_names.iter().enumerate() {
            let all_numeric = raw_rows.iter().all(|(_, values)| {
                let v = values[col_idx].trim();
                v.is_empty() || v == "NA" || v == "na" || v.parse::<f64>().is_ok()
            });
            let var_type = if all_numeric {
                VariableType::Continuous
            } else {
                VariableType::Categorical
            };
            column_types.insert(name.clone(), var_type);
        }

        let mut sample_ids = Vec::with_capacity(raw_rows.len());
        let mut data = HashMap::with_capacity(raw_rows.len());
        for (sample_id, values) in raw_rows {
            if data.contains_key(&sample_id) {
                return Err(DaaError::DuplicateId(sample_id));
            }
            let row: HashMap<String, Variable> = column_names
                .iter()
                .zip(values.iter())
                .map(|(name, raw)| (name.clone(), parse_cell(raw, column_types[name])))
                .collect();
            sample_ids.push(sample_id.clone());
            data.insert(sample_id, row);
        }

        Ok(Self {
            sample_ids,
            column_names,
            data,
            column_types,
        })
    }

    /// Override the type of specific columns, re-reading their values.
    ///
    /// Numeric-looking labels such as TMT channel numbers are often meant
    /// as categories.
    pub fn with_column_types(mut self, types: HashMap<String, VariableType>) -> Self {
        for (column, var_type) in types {
            for row in self.data.values_mut() {
                if let Some(var) = row.get_mut(&column) {
                    let text = match var {
                        Variable::Categorical(s) => s.clone(),
                        Variable::Continuous(v) => v.to_string(),
                        Variable::Missing => continue,
                    };
                    *var = parse_cell(&text, var_type);
                }
            }
            self.column_types.insert(column, var_type);
        }
        self
    }

    /// Sample IDs in order.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Column names.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of samples.
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Get a value for a sample and column.
    pub fn get(&self, sample_id: &str, column: &str) -> Option<&Variable> {
        self.data.get(sample_id).and_then(|m| m.get(column))
    }

    /// All values of a column, in sample order.
    pub fn column(&self, column: &str) -> Result<Vec<&Variable>> {
        if !self.has_column(column) {
            return Err(DaaError::MissingColumn(column.to_string()));
        }
        Ok(self
            .sample_ids
            .iter()
            .map(|sid| self.get(sid, column).unwrap_or(&Variable::Missing))
            .collect())
    }

    /// Type of a column.
    pub fn column_type(&self, column: &str) -> Option<VariableType> {
        self.column_types.get(column).copied()
    }

    /// Distinct labels of a categorical column, sorted.
    pub fn levels(&self, column: &str) -> Result<Vec<String>> {
        let levels: BTreeSet<String> = self
            .column(column)?
            .into_iter()
            .filter_map(|v| v.as_categorical().map(String::from))
            .collect();
        Ok(levels.into_iter().collect())
    }

    /// Number of samples carrying each label of a categorical column.
    pub fn level_counts(&self, column: &str) -> Result<Vec<(String, usize)>> {
        let values = self.column(column)?;
        Ok(self
            .levels(column)?
            .into_iter()
            .map(|level| {
                let n = values
                    .iter()
                    .filter(|v| v.as_categorical() == Some(level.as_str()))
                    .count();
                (level, n)
            })
            .collect())
    }

    /// Reorder metadata to match matrix columns.
    ///
    /// Every sample ID must have exactly one record; extra records are
    /// dropped.
    pub fn align_to(&self, sample_ids: &[String]) -> Result<Self> {
        let mut data = HashMap::with_capacity(sample_ids.len());
        for sid in sample_ids {
            let row = self.data.get(sid).ok_or_else(|| {
                DaaError::SampleMismatch(format!("Sample '{}' not found in metadata", sid))
            })?;
            if data.insert(sid.clone(), row.clone()).is_some() {
                return Err(DaaError::DuplicateId(sid.clone()));
            }
        }
        Ok(Self {
            sample_ids: sample_ids.to_vec(),
            column_names: self.column_names.clone(),
            data,
            column_types: self.column_types.clone(),
        })
    }

    /// Check if a sample exists.
    pub fn has_sample(&self, sample_id: &str) -> bool {
        self.data.contains_key(sample_id)
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.column_names.iter().any(|c| c == column)
    }
}
