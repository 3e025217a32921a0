//! DEX Loader Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads wide, variable-schema CSV exports into one wide table.
//!
//! # Pipeline
//!
//! - **Resolve**: a [`source::FileSetResolver`] lists matching files, locally
//!   or on an SFTP or FTP server, and materializes each one at a local path
//! - **Normalize**: [`header::NormalizedHeader`] trims and de-duplicates the
//!   header row
//! - **Synchronize**: [`schema::synchronize`] adds any missing text column
//! - **Load**: [`loader::BatchLoader`] inserts chunks inside a transaction,
//!   committing every `commit_threshold` rows; a rejected chunk is written to
//!   the [`quarantine`] directory and the file is rolled back
//!
//! # Example
//!
//! ```no_run
//! use dex_loader::config::LoaderConfig;
//! use dex_loader::db::{ConnectionPool, DbConfig};
//! use dex_loader::loader::BatchLoader;
//! use dex_loader::run::run;
//! use dex_loader::source::local::LocalResolver;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LoaderConfig::for_directory("./csv");
//!     let pattern = config.pattern()?;
//!     let pool = ConnectionPool::connect(&DbConfig::default()).await?;
//!
//!     let loader = BatchLoader::new(pool, config.clone())?;
//!     let mut resolver = LocalResolver::new(&config.source_directory);
//!     let report = run(&mut resolver, &loader, &pattern).await?;
//!     println!("{} rows loaded", report.rows_loaded());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod header;
pub mod loader;
pub mod progress;
pub mod quarantine;
pub mod reader;
pub mod run;
pub mod schema;
pub mod source;

pub use loader::{BatchLoader, LoadError, LoadSummary};
pub use run::{run, RunReport};
