//! Chunked transactional loading of one source file
//!
//! Per file: acquire a dedicated session, normalize the header, grow the
//! table, then insert the data rows chunk by chunk inside a transaction that
//! is committed every `commit_threshold` rows and once more at the end.
//! A rejected chunk is quarantined and the whole uncommitted remainder of the
//! file is rolled back.

use dex_common::{DexError, Result as DexResult};
use encoding_rs::Encoding;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::LoaderConfig;
use crate::db::{DbError, SessionProvider, TableSession};
use crate::quarantine::{Quarantine, QuarantineRecord};
use crate::reader::{encoding_for_label, ChunkedReader};
use crate::schema;
use crate::source::SourceFile;

/// Why a file did not load
#[derive(Error, Debug)]
pub enum LoadError {
    /// The database rejected a chunk; it was quarantined and the file's open
    /// transaction rolled back
    #[error("Batch {batch} of {file} rejected ({rows} rows), quarantined to {}", path.display())]
    Quarantined {
        file: String,
        batch: usize,
        rows: usize,
        path: PathBuf,
        #[source]
        source: DbError,
    },

    /// A chunk was rejected and the quarantine record could not be written either
    #[error("Batch {batch} of {file} rejected ({insert_error}) and could not be quarantined: {source}")]
    QuarantineWrite {
        file: String,
        batch: usize,
        insert_error: DbError,
        #[source]
        source: DexError,
    },

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Source(#[from] DexError),
}

impl LoadError {
    pub fn is_quarantined(&self) -> bool {
        matches!(self, LoadError::Quarantined { .. } | LoadError::QuarantineWrite { .. })
    }
}

/// Counters for one successfully loaded file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub key: String,
    /// Chunks that reached the insert step
    pub batches: usize,
    pub rows: usize,
    /// Data rows shorter than the header, dropped before batching
    pub malformed_rows: usize,
    pub commits: usize,
    pub columns_created: usize,
    pub columns_recovered: usize,
    /// Rows deleted up front when `replace_existing` is set
    pub replaced_rows: u64,
}

/// Loads source files into the target table through sessions from `P`
pub struct BatchLoader<P> {
    provider: P,
    config: LoaderConfig,
    encoding: &'static Encoding,
    quarantine: Quarantine,
}

impl<P: SessionProvider> BatchLoader<P> {
    pub fn new(provider: P, config: LoaderConfig) -> DexResult<Self> {
        config.validate()?;
        let encoding = encoding_for_label(&config.encoding)?;
        let quarantine = Quarantine::new(&config.quarantine_directory);
        Ok(Self {
            provider,
            config,
            encoding,
            quarantine,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Load every valid row of `file`.
    ///
    /// The session is released on every exit path; on error the open
    /// transaction is rolled back first.
    pub async fn load_file(&self, file: &SourceFile) -> Result<LoadSummary, LoadError> {
        let name = file.name();
        info!(file = %name, key = file.key(), "Starting load");

        let mut session = self.provider.acquire().await?;
        let result = self.load_with(&mut session, file, &name).await;

        if let Err(ref e) = result {
            error!(file = %name, error = %e, "Load failed, rolling back file");
            if let Err(rb) = session.rollback().await {
                warn!(file = %name, error = %rb, "Rollback failed");
            }
        }
        if let Err(e) = session.release().await {
            warn!(file = %name, error = %e, "Connection release failed");
        }
        debug!(file = %name, "Connection released");

        result
    }

    async fn load_with<S: TableSession>(
        &self,
        session: &mut S,
        file: &SourceFile,
        name: &str,
    ) -> Result<LoadSummary, LoadError> {
        let table = self.config.table_name.as_str();
        let key = file.key();

        let mut reader = ChunkedReader::open(file.path(), self.encoding, self.config.delimiter)?;
        let mut header = reader.header().clone();
        if header.remove_column(&self.config.key_column) {
            warn!(
                file = %name,
                key_column = %self.config.key_column,
                "Header contains the key column, its values are replaced by the file key"
            );
        }
        let required = header.with_key_column(&self.config.key_column);

        let sync = schema::synchronize(session, table, &required).await?;
        let mut summary = LoadSummary {
            key: key.to_string(),
            columns_created: sync.created(),
            columns_recovered: sync.recovered(),
            ..LoadSummary::default()
        };
        let columns = sync.columns;

        session.begin().await?;

        if self.config.replace_existing {
            let key_column = columns.last().map(String::as_str).unwrap_or(&self.config.key_column);
            summary.replaced_rows = session.delete_key(table, key_column, key).await?;
            info!(file = %name, rows = summary.replaced_rows, "Deleted rows from a previous load");
        }

        let mut pending = 0;
        let mut batch = 0;
        while let Some(raw) = reader.next_chunk(self.config.chunk_size)? {
            batch += 1;

            let rows: Vec<Vec<String>> = raw
                .iter()
                .filter_map(|record| header.project(record.iter(), key))
                .collect();
            summary.malformed_rows += raw.len() - rows.len();
            drop(raw);

            if rows.is_empty() {
                debug!(file = %name, batch, "Batch has no valid rows, skipping");
                continue;
            }

            if let Err(insert_error) = session.insert_rows(table, &columns, &rows).await {
                return Err(self
                    .quarantine_batch(session, name, key, batch, &columns, &rows, insert_error)
                    .await);
            }

            summary.batches += 1;
            summary.rows += rows.len();
            pending += rows.len();
            info!(
                file = %name,
                batch,
                rows = rows.len(),
                total = summary.rows,
                "Batch inserted"
            );

            if pending >= self.config.commit_threshold {
                session.commit().await?;
                summary.commits += 1;
                info!(file = %name, total = summary.rows, "Partial commit");
                pending = 0;
                session.begin().await?;
            }
        }

        session.commit().await?;
        summary.commits += 1;
        info!(
            file = %name,
            total = summary.rows,
            malformed = summary.malformed_rows,
            "Final commit"
        );

        Ok(summary)
    }

    /// Persist the rejected chunk, then roll the file back
    #[allow(clippy::too_many_arguments)]
    async fn quarantine_batch<S: TableSession>(
        &self,
        session: &mut S,
        name: &str,
        key: &str,
        batch: usize,
        columns: &[String],
        rows: &[Vec<String>],
        insert_error: DbError,
    ) -> LoadError {
        error!(
            file = %name,
            batch,
            rows = rows.len(),
            error = %insert_error,
            "Batch insert failed"
        );

        let record = QuarantineRecord::new(key, batch, columns, rows, &insert_error);
        let written = self.quarantine.write(&record);

        if let Err(rb) = session.rollback().await {
            warn!(file = %name, error = %rb, "Rollback after rejected batch failed");
        }

        match written {
            Ok(path) => {
                warn!(file = %name, batch, path = %path.display(), "Batch exported to quarantine");
                LoadError::Quarantined {
                    file: name.to_string(),
                    batch,
                    rows: rows.len(),
                    path,
                    source: insert_error,
                }
            },
            Err(source) => LoadError::QuarantineWrite {
                file: name.to_string(),
                batch,
                insert_error,
                source,
            },
        }
    }
}
