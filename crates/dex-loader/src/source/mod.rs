//! File set resolution
//!
//! A [`FileSetResolver`] enumerates candidate files and makes each one
//! available at a local path for the loader. [`local::LocalResolver`] scans a
//! directory; [`remote::RemoteResolver`] lists a directory on an SFTP or FTP
//! server and downloads each candidate into a temporary directory.

pub mod ftp;
pub mod local;
pub mod pattern;
pub mod remote;
pub mod sftp;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use pattern::NamePattern;

/// Retrieval failures. These abort the run; they happen outside the
/// per-file isolation scope.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// A stale local copy could not be replaced, usually because another
    /// program holds it open
    #[error("Local file {} is locked or open in another program. Close it and run again.", .0.display())]
    DestinationLocked(PathBuf),

    #[error("FTP error: {0}")]
    Ftp(#[from] suppaftp::FtpError),

    #[error("SFTP error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Retrieval task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Invalid file name pattern: {0}")]
    Pattern(#[from] dex_common::DexError),
}

pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// A file discovered by a resolver, not necessarily present locally yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// File name without directory
    pub name: String,
    /// Local path or remote path, depending on the resolver
    pub location: String,
    pub size: Option<u64>,
}

/// A local file ready for loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    path: PathBuf,
    key: String,
}

impl SourceFile {
    /// The key is the file's base name without extension
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, key }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Enumerates candidate files and materializes them locally
#[async_trait]
pub trait FileSetResolver: Send {
    /// Candidates whose name matches `pattern`, sorted by name
    async fn list_candidates(&mut self, pattern: &NamePattern) -> RetrievalResult<Vec<Candidate>>;

    /// Make `candidate` available at a stable local path
    async fn materialize(&mut self, candidate: &Candidate) -> RetrievalResult<SourceFile>;

    /// Discard whatever `materialize` created; called after every file,
    /// whether it loaded or not. Must not fail the run.
    async fn release(&mut self, candidate: &Candidate, file: &SourceFile);

    /// End the resolver's session, if it has one
    async fn close(&mut self) {}
}

/// Sort candidates by name so runs are deterministic
pub(crate) fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| a.name.cmp(&b.name));
}
