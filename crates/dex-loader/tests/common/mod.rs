//! Shared fixtures for the loader integration tests.
//!
//! [`FakeDb`] is an in-memory table behind the `SessionProvider` seam. It
//! keeps uncommitted rows per session, so commit and rollback boundaries can
//! be asserted exactly, and records every call as an [`Event`].

#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use dex_loader::config::LoaderConfig;
use dex_loader::db::{DbError, DbResult, SessionProvider, TableSession};
use dex_loader::source::local::LocalResolver;
use dex_loader::source::{Candidate, FileSetResolver, NamePattern, RetrievalError, RetrievalResult, SourceFile};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// One stored row, keyed by physical column name
pub type Row = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Acquire,
    AddColumn(String),
    Begin,
    Insert(usize),
    Delete(String),
    Commit,
    Rollback,
    Release,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub columns: Vec<String>,
    pub committed: Vec<Row>,
    pub events: Vec<Event>,
    insert_calls: usize,

    /// Fail the n-th insert call (1-based, counted across all sessions)
    pub fail_insert_call: Option<usize>,
    /// Fail any insert carrying this file key
    pub fail_insert_key: Option<String>,
    /// Columns another writer adds just before we do
    pub racing_columns: Vec<String>,
    /// Adding this column fails with a non-duplicate error
    pub fail_add_column: Option<String>,
}

/// In-memory [`SessionProvider`]
#[derive(Clone, Default)]
pub struct FakeDb {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDb {
    pub fn with_columns(columns: &[&str]) -> Self {
        let db = Self::default();
        db.state().columns = columns.iter().map(|c| c.to_string()).collect();
        db
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn columns(&self) -> Vec<String> {
        self.state().columns.clone()
    }

    pub fn committed(&self) -> Vec<Row> {
        self.state().committed.clone()
    }

    pub fn committed_for(&self, key_column: &str, key: &str) -> Vec<Row> {
        self.committed()
            .into_iter()
            .filter(|row| row.get(key_column).map(String::as_str) == Some(key))
            .collect()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.state().events.iter().filter(|e| *e == event).count()
    }

    /// Insert sizes in call order
    pub fn inserts(&self) -> Vec<usize> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Insert(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    /// Events recorded after the first insert
    pub fn events_after_first_insert(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .skip_while(|e| !matches!(e, Event::Insert(_)))
            .collect()
    }
}

#[async_trait]
impl SessionProvider for FakeDb {
    type Session = FakeSession;

    async fn acquire(&self) -> DbResult<FakeSession> {
        self.state().events.push(Event::Acquire);
        Ok(FakeSession {
            state: Arc::clone(&self.state),
            in_transaction: false,
            pending_rows: Vec::new(),
            pending_deletes: Vec::new(),
        })
    }
}

pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    in_transaction: bool,
    pending_rows: Vec<Row>,
    pending_deletes: Vec<(String, String)>,
}

impl FakeSession {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn apply(state: &mut FakeState, deletes: Vec<(String, String)>, rows: Vec<Row>) {
        for (column, key) in deletes {
            state
                .committed
                .retain(|row| row.get(&column).map(String::as_str) != Some(key.as_str()));
        }
        state.committed.extend(rows);
    }
}

fn rejected(message: &str) -> DbError {
    DbError::Sqlx(sqlx::Error::Protocol(message.to_string()))
}

#[async_trait]
impl TableSession for FakeSession {
    async fn column_names(&mut self, _table: &str) -> DbResult<Vec<String>> {
        Ok(self.state().columns.clone())
    }

    async fn add_text_column(&mut self, _table: &str, column: &str) -> DbResult<()> {
        let mut state = self.state();
        if state.fail_add_column.as_deref() == Some(column) {
            return Err(rejected("permission denied for table"));
        }
        if let Some(pos) = state.racing_columns.iter().position(|c| c == column) {
            state.racing_columns.remove(pos);
            state.columns.push(column.to_string());
        }
        if state.columns.iter().any(|c| c == column) {
            return Err(DbError::DuplicateColumn(column.to_string()));
        }
        state.columns.push(column.to_string());
        state.events.push(Event::AddColumn(column.to_string()));
        Ok(())
    }

    async fn delete_key(&mut self, _table: &str, key_column: &str, key: &str) -> DbResult<u64> {
        let deleted;
        {
            let mut state = self.state();
            state.events.push(Event::Delete(key.to_string()));
            deleted = state
                .committed
                .iter()
                .filter(|row| row.get(key_column).map(String::as_str) == Some(key))
                .count() as u64;
        }

        let delete = (key_column.to_string(), key.to_string());
        if self.in_transaction {
            self.pending_deletes.push(delete);
        } else {
            Self::apply(&mut self.state(), vec![delete], Vec::new());
        }
        Ok(deleted)
    }

    async fn insert_rows(
        &mut self,
        _table: &str,
        columns: &[String],
        rows: &[Vec<String>],
    ) -> DbResult<u64> {
        let stored: Vec<Row> = {
            let mut state = self.state();
            state.insert_calls += 1;
            state.events.push(Event::Insert(rows.len()));

            if state.fail_insert_call == Some(state.insert_calls) {
                return Err(rejected("value too long for type character varying(255)"));
            }
            if let Some(key) = &state.fail_insert_key {
                if rows.iter().any(|r| r.last() == Some(key)) {
                    return Err(rejected("invalid byte sequence for encoding \"UTF8\""));
                }
            }
            if let Some(missing) = columns.iter().find(|c| !state.columns.contains(c)) {
                return Err(rejected(&format!("column \"{}\" does not exist", missing)));
            }
            if rows.iter().any(|r| r.len() != columns.len()) {
                return Err(rejected("INSERT has more expressions than target columns"));
            }

            rows.iter()
                .map(|r| columns.iter().cloned().zip(r.iter().cloned()).collect())
                .collect()
        };

        if self.in_transaction {
            self.pending_rows.extend(stored);
        } else {
            Self::apply(&mut self.state(), Vec::new(), stored);
        }
        Ok(rows.len() as u64)
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.state().events.push(Event::Begin);
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        if self.in_transaction {
            self.in_transaction = false;
            let deletes = std::mem::take(&mut self.pending_deletes);
            let rows = std::mem::take(&mut self.pending_rows);
            let mut state = self.state();
            state.events.push(Event::Commit);
            Self::apply(&mut state, deletes, rows);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.pending_deletes.clear();
            self.pending_rows.clear();
            self.state().events.push(Event::Rollback);
        }
        Ok(())
    }

    async fn release(mut self) -> DbResult<()> {
        self.rollback().await?;
        self.state().events.push(Event::Release);
        Ok(())
    }
}

/// Local resolver that records releases and can fail to materialize one file
pub struct RecordingResolver {
    inner: LocalResolver,
    pub fail_materialize: Option<String>,
    pub released: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<Mutex<bool>>,
}

impl RecordingResolver {
    pub fn new(dir: &Path) -> Self {
        Self {
            inner: LocalResolver::new(dir),
            fail_materialize: None,
            released: Arc::default(),
            closed: Arc::default(),
        }
    }
}

#[async_trait]
impl FileSetResolver for RecordingResolver {
    async fn list_candidates(&mut self, pattern: &NamePattern) -> RetrievalResult<Vec<Candidate>> {
        self.inner.list_candidates(pattern).await
    }

    async fn materialize(&mut self, candidate: &Candidate) -> RetrievalResult<SourceFile> {
        if self.fail_materialize.as_deref() == Some(candidate.name.as_str()) {
            return Err(RetrievalError::DestinationLocked(PathBuf::from(&candidate.location)));
        }
        self.inner.materialize(candidate).await
    }

    async fn release(&mut self, candidate: &Candidate, file: &SourceFile) {
        self.released.lock().unwrap().push(candidate.name.clone());
        self.inner.release(candidate, file).await;
    }

    async fn close(&mut self) {
        *self.closed.lock().unwrap() = true;
    }
}

/// Write `lines` as UTF-16LE with a byte order mark and CRLF line endings
pub fn write_utf16(path: &Path, lines: &[String]) {
    let text = lines.join("\r\n") + "\r\n";
    let mut bytes = vec![0xFF, 0xFE];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    std::fs::write(path, bytes).unwrap();
}

pub fn lines(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|l| l.to_string()).collect()
}

/// UTF-16 export with `header` and `rows` generated data rows
pub fn write_export(dir: &Path, name: &str, header: &[&str], rows: usize) -> PathBuf {
    let mut content = Vec::with_capacity(rows + 1);
    content.push(header.join(","));
    for i in 0..rows {
        let row: Vec<String> = (0..header.len()).map(|c| format!("r{}c{}", i, c)).collect();
        content.push(row.join(","));
    }
    let path = dir.join(name);
    write_utf16(&path, &content);
    path
}

/// Loader settings rooted at `dir`, quarantine inside it
pub fn test_config(dir: &Path) -> LoaderConfig {
    LoaderConfig::for_directory(dir)
}
