//! Identifier to category membership mapping.

use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// External mapping from feature identifiers to category memberships.
///
/// An identifier may belong to any number of categories. Categories may
/// carry a human-readable description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryMap {
    memberships: HashMap<String, BTreeSet<String>>,
    descriptions: HashMap<String, String>,
}

impl CategoryMap {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(identifier, category)` pairs.
    pub fn from_pairs<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        let mut map = Self::new();
        for (id, category) in pairs {
            map.insert(id, category);
        }
        map
    }

    /// Load from a headerless TSV of `identifier<TAB>category[<TAB>description]`.
    ///
    /// The category cell may list several categories separated by `;`. Lines
    /// starting with `#` are skipped.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .from_path(path)?;

        let mut map = Self::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let id = record.get(0).unwrap_or_default().trim();
            let categories = record.get(1).unwrap_or_default().trim();
            if id.is_empty() && categories.is_empty() {
                continue;
            }
            if id.is_empty() || categories.is_empty() {
                return Err(DaaError::InvalidValue {
                    value: record.iter().collect::<Vec<_>>().join("\t"),
                    row: row + 1,
                    column: if id.is_empty() { "identifier" } else { "category" }.to_string(),
                });
            }
            let description = record.get(2).map(str::trim).filter(|d| !d.is_empty());

            for category in categories.split(';').map(str::trim).filter(|c| !c.is_empty()) {
                map.insert(id, category);
                if let Some(d) = description {
                    map.set_description(category, d);
                }
            }
        }

        if map.memberships.is_empty() {
            return Err(DaaError::EmptyData("Category mapping has no entries".to_string()));
        }
        Ok(map)
    }

    /// Add one membership.
    pub fn insert(&mut self, id: impl Into<String>, category: impl Into<String>) {
        self.memberships
            .entry(id.into())
            .or_default()
            .insert(category.into());
    }

    /// Set the description of a category.
    pub fn set_description(&mut self, category: impl Into<String>, description: impl Into<String>) {
        self.descriptions.insert(category.into(), description.into());
    }

    /// Categories of an identifier.
    pub fn categories_of(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.memberships.get(id)
    }

    /// Check if an identifier has at least one category.
    pub fn is_annotated(&self, id: &str) -> bool {
        self.memberships.get(id).map_or(false, |c| !c.is_empty())
    }

    /// Description of a category, empty if none was given.
    pub fn description(&self, category: &str) -> &str {
        self.descriptions
            .get(category)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Number of annotated identifiers.
    pub fn n_identifiers(&self) -> usize {
        self.memberships.len()
    }

    /// Number of distinct categories.
    pub fn n_categories(&self) -> usize {
        self.memberships
            .values()
            .flatten()
            .collect::<BTreeSet<_>>()
            .len()
    }
}
