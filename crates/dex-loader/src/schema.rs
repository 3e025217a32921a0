//! Online schema evolution for the target table
//!
//! The table only ever grows: every required column that has no
//! case-insensitive match gets added as bounded-length text. Existing columns
//! are never altered or dropped.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::db::{DbError, DbResult, TableSession};
use crate::header::fold;

/// What synchronization did for one required column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnChange {
    /// A matching column was already present
    Existing,
    /// The column was added by this run
    Created,
    /// The add raced with another writer that created it first
    Recovered,
}

/// Outcome of synchronizing one file's column list
#[derive(Debug, Clone, Default)]
pub struct SchemaSync {
    /// Physical column name to insert into, one per required column, same order
    pub columns: Vec<String>,
    pub changes: Vec<ColumnChange>,
}

impl SchemaSync {
    pub fn created(&self) -> usize {
        self.count(ColumnChange::Created)
    }

    pub fn recovered(&self) -> usize {
        self.count(ColumnChange::Recovered)
    }

    fn count(&self, change: ColumnChange) -> usize {
        self.changes.iter().filter(|c| **c == change).count()
    }
}

/// Ensure `table` has a column for each of `required`.
///
/// Matching is case-insensitive and the returned [`SchemaSync::columns`] carry
/// the physical spelling, so inserts never depend on how a file capitalises a
/// header. A single commit closes the pass.
pub async fn synchronize<S>(session: &mut S, table: &str, required: &[String]) -> DbResult<SchemaSync>
where
    S: TableSession + ?Sized,
{
    let mut existing: HashMap<String, String> = session
        .column_names(table)
        .await?
        .into_iter()
        .map(|name| (fold(&name), name))
        .collect();

    session.begin().await?;

    let mut sync = SchemaSync::default();
    for column in required {
        let key = fold(column);
        if let Some(physical) = existing.get(&key) {
            sync.columns.push(physical.clone());
            sync.changes.push(ColumnChange::Existing);
            continue;
        }

        let change = match session.add_text_column(table, column).await {
            Ok(()) => {
                info!(table, column = %column, "Column created");
                ColumnChange::Created
            },
            Err(DbError::DuplicateColumn(_)) => {
                debug!(table, column = %column, "Column already exists, ignoring");
                ColumnChange::Recovered
            },
            Err(e) => {
                if let Err(rb) = session.rollback().await {
                    warn!(table, error = %rb, "Rollback after failed schema change failed");
                }
                return Err(e);
            },
        };

        existing.insert(key, column.clone());
        sync.columns.push(column.clone());
        sync.changes.push(change);
    }

    session.commit().await?;
    Ok(sync)
}
