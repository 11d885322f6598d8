//! Dense quantitative matrix with per-feature annotations.

use crate::error::{DaaError, Result};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Tokens read as a missing quantitative value.
const MISSING_TOKENS: [&str; 5] = ["", "NA", "na", "NaN", "nan"];
const SUPPORT_COLUMN: &str = "support";

fn is_missing_token(s: &str) -> bool {
    MISSING_TOKENS.contains(&s.trim())
}

/// Per-feature annotation records.
///
/// Every row carries the values of the annotation columns (identifiers,
/// grouping keys, QC metrics copied from the upstream table) and a support
/// count: the number of child rows that were combined into it. Raw rows
/// have a support count of 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMetadata {
    columns: Vec<String>,
    values: Vec<Vec<String>>,
    support: Vec<usize>,
}

impl FeatureMetadata {
    /// Metadata with no annotation columns and unit support for `n` rows.
    pub fn empty(n: usize) -> Self {
        Self {
            columns: Vec::new(),
            values: vec![Vec::new(); n],
            support: vec![1; n],
        }
    }

    /// Build metadata from column names, row values and support counts.
    pub fn new(columns: Vec<String>, values: Vec<Vec<String>>, support: Vec<usize>) -> Result<Self> {
        if values.len() != support.len() {
            return Err(DaaError::DimensionMismatch {
                expected: values.len(),
                actual: support.len(),
            });
        }
        for row in &values {
            if row.len() != columns.len() {
                return Err(DaaError::DimensionMismatch {
                    expected: columns.len(),
                    actual: row.len(),
                });
            }
        }
        if let Some(pos) = support.iter().position(|&s| s == 0) {
            return Err(DaaError::InvalidParameter(format!(
                "Support count must be at least 1 (row {})",
                pos
            )));
        }
        Ok(Self {
            columns,
            values,
            support,
        })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.support.len()
    }

    /// Check if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.support.is_empty()
    }

    /// Annotation column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Position of an annotation column.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Annotation value for a row, `None` if the column does not exist.
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.values.get(row).map(|r| r[idx].as_str())
    }

    /// All values of an annotation column.
    pub fn column(&self, column: &str) -> Result<Vec<&str>> {
        let idx = self
            .column_index(column)
            .ok_or_else(|| DaaError::MissingColumn(column.to_string()))?;
        Ok(self.values.iter().map(|r| r[idx].as_str()).collect())
    }

    /// Annotation values of one row, in column order.
    pub fn row(&self, row: usize) -> &[String] {
        &self.values[row]
    }

    /// Support counts.
    pub fn support(&self) -> &[usize] {
        &self.support
    }

    fn subset(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            values: indices.iter().map(|&i| self.values[i].clone()).collect(),
            support: indices.iter().map(|&i| self.support[i]).collect(),
        }
    }
}

/// Layout of an upstream delimited table.
///
/// Column names are an external contract of the acquisition software; the
/// caller names which columns hold the identifier and the quantitative
/// values. All remaining columns are kept as annotations unless
/// `annotation_columns` restricts them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    /// Field delimiter.
    pub delimiter: u8,
    /// Column holding unique row identifiers; `None` numbers the rows.
    pub id_column: Option<String>,
    /// Columns holding the per-sample quantitative values.
    pub quant_columns: Vec<String>,
    /// Annotation columns to keep; `None` keeps every other column.
    pub annotation_columns: Option<Vec<String>>,
}

impl TableSpec {
    /// Tab-delimited table with the given quantitative columns.
    pub fn tsv(quant_columns: Vec<String>) -> Self {
        Self {
            delimiter: b'\t',
            id_column: None,
            quant_columns,
            annotation_columns: None,
        }
    }

    /// Use a named identifier column.
    pub fn with_id_column(mut self, column: &str) -> Self {
        self.id_column = Some(column.to_string());
        self
    }

    /// Keep only the named annotation columns.
    pub fn with_annotations(mut self, columns: Vec<String>) -> Self {
        self.annotation_columns = Some(columns);
        self
    }

    /// Use a different field delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

/// A dense quantitative matrix storing feature abundances across samples.
///
/// Rows are features (PSMs, peptides or proteins depending on the stage),
/// columns are samples. Missing values are stored as `NaN`.
#[derive(Debug, Clone)]
pub struct QuantMatrix {
    /// Values (features × samples).
    data: DMatrix<f64>,
    /// Feature identifiers (row names).
    feature_ids: Vec<String>,
    /// Sample identifiers (column names).
    sample_ids: Vec<String>,
    /// Per-feature annotations and support counts.
    features: FeatureMetadata,
}

fn check_unique(ids: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(DaaError::DuplicateId(id.clone()));
        }
    }
    Ok(())
}

impl QuantMatrix {
    /// Create a matrix with unit support and no annotations.
    pub fn new(data: DMatrix<f64>, feature_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let n = feature_ids.len();
        Self::with_features(data, feature_ids, sample_ids, FeatureMetadata::empty(n))
    }

    /// Create a matrix with explicit feature metadata.
    pub fn with_features(
        data: DMatrix<f64>,
        feature_ids: Vec<String>,
        sample_ids: Vec<String>,
        features: FeatureMetadata,
    ) -> Result<Self> {
        let (nrows, ncols) = data.shape();
        if nrows != feature_ids.len() {
            return Err(DaaError::DimensionMismatch {
                expected: nrows,
                actual: feature_ids.len(),
            });
        }
        if ncols != sample_ids.len() {
            return Err(DaaError::DimensionMismatch {
                expected: ncols,
                actual: sample_ids.len(),
            });
        }
        if features.len() != nrows {
            return Err(DaaError::DimensionMismatch {
                expected: nrows,
                actual: features.len(),
            });
        }
        check_unique(&feature_ids)?;
        check_unique(&sample_ids)?;
        Ok(Self {
            data,
            feature_ids,
            sample_ids,
            features,
        })
    }

    /// Replace the values, keeping identifiers and annotations.
    pub fn with_values(&self, data: DMatrix<f64>) -> Result<Self> {
        if data.shape() != self.data.shape() {
            return Err(DaaError::DimensionMismatch {
                expected: self.data.len(),
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            feature_ids: self.feature_ids.clone(),
            sample_ids: self.sample_ids.clone(),
            features: self.features.clone(),
        })
    }

    /// Load a matrix from an upstream delimited table.
    pub fn from_delimited<P: AsRef<Path>>(path: P, spec: &TableSpec) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(spec.delimiter)
            .has_headers(true)
            .flexible(false)
            .from_path(path)?;
        let header: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();

        let find = |name: &str| {
            header
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| DaaError::MissingColumn(name.to_string()))
        };

        if spec.quant_columns.is_empty() {
            return Err(DaaError::EmptyData(
                "Table spec names no quantitative columns".to_string(),
            ));
        }
        let quant_idx: Vec<usize> = spec
            .quant_columns
            .iter()
            .map(|c| find(c))
            .collect::<Result<_>>()?;
        let id_idx = spec.id_column.as_deref().map(find).transpose()?;
        let annot_idx: Vec<usize> = match &spec.annotation_columns {
            Some(cols) => cols.iter().map(|c| find(c)).collect::<Result<_>>()?,
            None => (0..header.len())
                .filter(|i| !quant_idx.contains(i) && Some(*i) != id_idx)
                .collect(),
        };

        let n_samples = quant_idx.len();
        let mut values: Vec<f64> = Vec::new();
        let mut feature_ids = Vec::new();
        let mut annotations = Vec::new();

        for (row_idx, record) in reader.records().enumerate() {
            let record = record?;
            let id = match id_idx {
                Some(i) => record.get(i).unwrap_or_default().to_string(),
                None => format!("row{}", row_idx + 1),
            };
            feature_ids.push(id);

            for &col in &quant_idx {
                let raw = record.get(col).unwrap_or_default();
                let value = if is_missing_token(raw) {
                    f64::NAN
                } else {
                    raw.trim().parse::<f64>().map_err(|_| DaaError::InvalidValue {
                        value: raw.to_string(),
                        row: row_idx,
                        column: header[col].clone(),
                    })?
                };
                values.push(value);
            }

            annotations.push(
                annot_idx
                    .iter()
                    .map(|&i| record.get(i).unwrap_or_default().to_string())
                    .collect::<Vec<_>>(),
            );
        }

        let n_features = feature_ids.len();
        if n_features == 0 {
            return Err(DaaError::EmptyData("No rows in table".to_string()));
        }

        let data = DMatrix::from_row_slice(n_features, n_samples, &values);
        let columns = annot_idx.iter().map(|&i| header[i].clone()).collect();
        let features = FeatureMetadata::new(columns, annotations, vec![1; n_features])?;

        Self::with_features(data, feature_ids, spec.quant_columns.clone(), features)
    }

    /// Load a matrix from a TSV file.
    ///
    /// Expected format:
    /// - First row: header with sample IDs (first column is the feature ID header)
    /// - Subsequent rows: feature ID followed by values
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        let header: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        if header.len() < 2 {
            return Err(DaaError::EmptyData(
                "TSV must have at least one sample".to_string(),
            ));
        }
        // files written by `to_tsv` carry support and annotations after the samples
        let support_idx = header.iter().position(|h| h == SUPPORT_COLUMN);
        let quant_end = support_idx.unwrap_or(header.len());
        let spec = TableSpec::tsv(header[1..quant_end].to_vec())
            .with_id_column(&header[0])
            .with_annotations(header[quant_end..].to_vec());
        let loaded = Self::from_delimited(path, &spec)?;
        if support_idx.is_none() {
            return Ok(loaded);
        }

        let support = loaded
            .features
            .column(SUPPORT_COLUMN)?
            .iter()
            .enumerate()
            .map(|(row, v)| {
                v.trim().parse::<usize>().map_err(|_| DaaError::InvalidValue {
                    value: v.to_string(),
                    row,
                    column: SUPPORT_COLUMN.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let columns = header[quant_end + 1..].to_vec();
        let values = (0..loaded.n_features())
            .map(|row| loaded.features.row(row)[1..].to_vec())
            .collect();
        let features = FeatureMetadata::new(columns, values, support)?;
        Self::with_features(loaded.data, loaded.feature_ids, loaded.sample_ids, features)
    }

    /// Write the matrix to a TSV file.
    ///
    /// Columns: feature id, one column per sample, the support count, then
    /// the annotation columns. Missing values are written as `NA`.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write!(writer, "feature_id")?;
        for sample_id in &self.sample_ids {
            write!(writer, "\t{}", sample_id)?;
        }
        write!(writer, "\t{}", SUPPORT_COLUMN)?;
        for column in self.features.columns() {
            write!(writer, "\t{}", column)?;
        }
        writeln!(writer)?;

        for (row, feature_id) in self.feature_ids.iter().enumerate() {
            write!(writer, "{}", feature_id)?;
            for col in 0..self.n_samples() {
                let value = self.data[(row, col)];
                if value.is_nan() {
                    write!(writer, "\tNA")?;
                } else {
                    write!(writer, "\t{}", value)?;
                }
            }
            write!(writer, "\t{}", self.features.support[row])?;
            for value in self.features.row(row) {
                write!(writer, "\t{}", value)?;
            }
            writeln!(writer)?;
        }

        Ok(())
    }

    /// Get the value at (row, col). `NaN` when missing.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[(row, col)]
    }

    /// Number of features (rows).
    #[inline]
    pub fn n_features(&self) -> usize {
        self.data.nrows()
    }

    /// Number of samples (columns).
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Feature identifiers.
    #[inline]
    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    /// Sample identifiers.
    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Get the underlying matrix.
    #[inline]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Feature annotations.
    #[inline]
    pub fn features(&self) -> &FeatureMetadata {
        &self.features
    }

    /// Support count of a feature.
    pub fn support(&self, row: usize) -> usize {
        self.features.support[row]
    }

    /// Values of a row (feature).
    pub fn row(&self, row: usize) -> Vec<f64> {
        self.data.row(row).iter().copied().collect()
    }

    /// Values of a column (sample).
    pub fn col(&self, col: usize) -> Vec<f64> {
        self.data.column(col).iter().copied().collect()
    }

    /// Count of missing cells.
    pub fn n_missing(&self) -> usize {
        self.data.iter().filter(|v| v.is_nan()).count()
    }

    /// Count of finite values per row.
    pub fn observed_counts(&self) -> Vec<usize> {
        (0..self.n_features())
            .map(|i| self.data.row(i).iter().filter(|v| v.is_finite()).count())
            .collect()
    }

    /// Mean of the finite values of each row (`NaN` for an all-missing row).
    pub fn row_means(&self) -> Vec<f64> {
        (0..self.n_features())
            .into_par_iter()
            .map(|i| {
                let (sum, n) = self
                    .data
                    .row(i)
                    .iter()
                    .filter(|v| v.is_finite())
                    .fold((0.0, 0usize), |acc, v| (acc.0 + v, acc.1 + 1));
                if n == 0 {
                    f64::NAN
                } else {
                    sum / n as f64
                }
            })
            .collect()
    }

    /// Subset to the specified features (by index).
    pub fn subset_features(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_features()) {
            return Err(DaaError::InvalidParameter(format!(
                "Feature index {} out of bounds",
                bad
            )));
        }
        let data = self.data.select_rows(indices);
        let feature_ids = indices.iter().map(|&i| self.feature_ids[i].clone()).collect();
        Self::with_features(
            data,
            feature_ids,
            self.sample_ids.clone(),
            self.features.subset(indices),
        )
    }

    /// Subset to the specified samples (by index).
    pub fn subset_samples(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_samples()) {
            return Err(DaaError::InvalidParameter(format!(
                "Sample index {} out of bounds",
                bad
            )));
        }
        let data = self.data.select_columns(indices);
        let sample_ids = indices.iter().map(|&i| self.sample_ids[i].clone()).collect();
        Self::with_features(
            data,
            self.feature_ids.clone(),
            sample_ids,
            self.features.clone(),
        )
    }
}
