//! Header normalization
//!
//! Export headers repeat columns that differ only in case or surrounding
//! whitespace (`"Email"` and `"Email "`). The first occurrence wins; later
//! duplicates are dropped together with their data.

use std::collections::HashSet;

/// Canonical, duplicate-free column list derived from a raw header row
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedHeader {
    columns: Vec<String>,
    index_map: Vec<usize>,
    raw_width: usize,
}

impl NormalizedHeader {
    /// Normalize a raw header row.
    ///
    /// Names are compared trimmed and case-folded; the stored name is the
    /// trimmed original of the first occurrence.
    pub fn from_raw<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        let mut index_map = Vec::new();
        let mut raw_width = 0;

        for (idx, name) in raw.into_iter().enumerate() {
            raw_width = idx + 1;
            let trimmed = name.as_ref().trim();
            if seen.insert(fold(trimmed)) {
                columns.push(trimmed.to_string());
                index_map.push(idx);
            }
        }

        Self {
            columns,
            index_map,
            raw_width,
        }
    }

    /// Normalized column names in order of first appearance
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Raw position of each normalized column
    pub fn index_map(&self) -> &[usize] {
        &self.index_map
    }

    /// Number of fields in the raw header row; shorter data rows are malformed
    pub fn raw_width(&self) -> usize {
        self.raw_width
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Drop the column matching `name` (case-insensitively), if present.
    ///
    /// Returns whether a column was removed. The raw width is unchanged, so
    /// rows are still validated against the full header.
    pub fn remove_column(&mut self, name: &str) -> bool {
        let target = fold(name);
        match self.columns.iter().position(|c| fold(c) == target) {
            Some(pos) => {
                self.columns.remove(pos);
                self.index_map.remove(pos);
                true
            },
            None => false,
        }
    }

    /// Full insert column list: normalized columns followed by the key column
    pub fn with_key_column(&self, key_column: &str) -> Vec<String> {
        let mut columns = Vec::with_capacity(self.columns.len() + 1);
        columns.extend(self.columns.iter().cloned());
        columns.push(key_column.to_string());
        columns
    }

    /// Project a raw record onto the normalized columns and append `key`.
    ///
    /// Returns `None` for records with fewer fields than the raw header.
    pub fn project<'r, R>(&self, record: R, key: &str) -> Option<Vec<String>>
    where
        R: IntoIterator<Item = &'r str>,
    {
        let fields: Vec<&str> = record.into_iter().collect();
        if fields.len() < self.raw_width {
            return None;
        }

        let mut row = Vec::with_capacity(self.index_map.len() + 1);
        row.extend(self.index_map.iter().map(|&i| fields[i].to_string()));
        row.push(key.to_string());
        Some(row)
    }
}

/// Case- and whitespace-insensitive comparison key for a column name.
///
/// Uses Unicode full case folding, so `Straße` and `STRASSE` collide.
pub fn fold(name: &str) -> String {
    caseless::default_case_fold_str(name.trim())
}
