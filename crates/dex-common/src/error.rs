//! Error types for DEX

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for DEX file operations
pub type Result<T> = std::result::Result<T, DexError>;

/// Main error type for reading source files and writing side artifacts
#[derive(Error, Debug)]
pub enum DexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported encoding label: {0}")]
    Encoding(String),

    #[error("File has no header row: {}", .0.display())]
    MissingHeader(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DexError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
