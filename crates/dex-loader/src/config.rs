//! Loader configuration
//!
//! Everything the ingestion core needs is passed in through [`LoaderConfig`];
//! nothing inside the loader reads process-wide state.

use dex_common::{DexError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::source::pattern::NamePattern;

/// Default target table
pub const DEFAULT_TABLE_NAME: &str = "data_extension_item";

/// Default name of the column that tags every row with its source file
pub const DEFAULT_KEY_COLUMN: &str = "CustomerKey";

/// Default rows per insert chunk
pub const DEFAULT_CHUNK_SIZE: usize = 25_000;

/// Default rows between intermediate commits
pub const DEFAULT_COMMIT_THRESHOLD: usize = 50_000;

/// Default source file encoding
pub const DEFAULT_ENCODING: &str = "utf-16";

/// Default name pattern of the local (daily) flavor
pub const DAILY_PATTERN: &str = "*_Daily*.csv";

/// Default name pattern of the remote (historical) flavor
pub const HISTORICAL_PATTERN: &str = "*_Historical*.csv";

/// Name of the quarantine directory created next to the source files
pub const QUARANTINE_DIR_NAME: &str = "_failed";

/// Ingestion settings shared by both entry points
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Directory scanned (local flavor) or used as download target (remote flavor)
    pub source_directory: PathBuf,
    /// Glob matched against file names, e.g. `*_Daily*.csv`
    pub name_pattern: String,
    pub table_name: String,
    pub key_column: String,
    /// Raw data rows read per insert unit
    pub chunk_size: usize,
    /// Inserted rows after which a commit is forced
    pub commit_threshold: usize,
    /// WHATWG label of the source encoding
    pub encoding: String,
    pub delimiter: u8,
    pub quarantine_directory: PathBuf,
    /// Delete rows carrying the file's key before loading it again
    pub replace_existing: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let source_directory = PathBuf::from("./csv");
        Self {
            quarantine_directory: source_directory.join(QUARANTINE_DIR_NAME),
            source_directory,
            name_pattern: DAILY_PATTERN.to_string(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            key_column: DEFAULT_KEY_COLUMN.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            commit_threshold: DEFAULT_COMMIT_THRESHOLD,
            encoding: DEFAULT_ENCODING.to_string(),
            delimiter: b',',
            replace_existing: false,
        }
    }
}

impl LoaderConfig {
    /// Defaults rooted at `source_directory`, quarantine included
    pub fn for_directory(source_directory: impl Into<PathBuf>) -> Self {
        let source_directory = source_directory.into();
        Self {
            quarantine_directory: source_directory.join(QUARANTINE_DIR_NAME),
            source_directory,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(DexError::config("chunk_size must be greater than 0"));
        }
        if self.commit_threshold == 0 {
            return Err(DexError::config("commit_threshold must be greater than 0"));
        }
        if self.table_name.trim().is_empty() {
            return Err(DexError::config("table_name cannot be empty"));
        }
        if self.key_column.trim().is_empty() {
            return Err(DexError::config("key_column cannot be empty"));
        }
        if self.name_pattern.trim().is_empty() {
            return Err(DexError::config("name_pattern cannot be empty"));
        }
        crate::reader::encoding_for_label(&self.encoding)?;
        NamePattern::new(&self.name_pattern)?;

        if self.commit_threshold < self.chunk_size {
            tracing::warn!(
                chunk_size = self.chunk_size,
                commit_threshold = self.commit_threshold,
                "commit_threshold is below chunk_size, every chunk will be committed"
            );
        }
        Ok(())
    }

    pub fn pattern(&self) -> Result<NamePattern> {
        NamePattern::new(&self.name_pattern)
    }
}
