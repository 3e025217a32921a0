//! Side files for batches the database rejected
//!
//! A quarantine record is written before the file's transaction is rolled
//! back and is never read by the loader again.

use chrono::{DateTime, Utc};
use dex_common::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Rows kept from a rejected batch
pub const QUARANTINE_SAMPLE_ROWS: usize = 50;

/// Snapshot of one rejected batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineRecord {
    /// Key of the source file (its base name)
    pub key: String,
    /// 1-based chunk number within the file
    pub batch: usize,
    /// Rows the batch tried to insert, of which `rows` is a sample
    pub batch_rows: usize,
    pub error: String,
    pub quarantined_at: DateTime<Utc>,
    /// Insert column list, key column last
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QuarantineRecord {
    pub fn new(
        key: &str,
        batch: usize,
        header: &[String],
        rows: &[Vec<String>],
        error: &dyn std::fmt::Display,
    ) -> Self {
        Self {
            key: key.to_string(),
            batch,
            batch_rows: rows.len(),
            error: error.to_string(),
            quarantined_at: Utc::now(),
            header: header.to_vec(),
            rows: rows.iter().take(QUARANTINE_SAMPLE_ROWS).cloned().collect(),
        }
    }

    /// `{key}_batch{n}.json`
    pub fn file_name(&self) -> String {
        format!("{}_batch{}.json", self.key, self.batch)
    }
}

/// Directory that collects quarantine records
#[derive(Debug, Clone)]
pub struct Quarantine {
    dir: PathBuf,
}

impl Quarantine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `record`, replacing an older record for the same file and batch
    pub fn write(&self, record: &QuarantineRecord) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(record.file_name());
        let json = serde_json::to_vec_pretty(record)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<Vec<String>> {
        (0..n).map(|i| vec![format!("r{i}"), "k".to_string()]).collect()
    }

    #[test]
    fn test_record_keeps_at_most_fifty_rows() {
        let header = vec!["Email".to_string(), "CustomerKey".to_string()];
        let record = QuarantineRecord::new("k", 2, &header, &rows(120), &"value too long");

        assert_eq!(record.rows.len(), QUARANTINE_SAMPLE_ROWS);
        assert_eq!(record.batch_rows, 120);
        assert_eq!(record.rows[0][0], "r0");
        assert_eq!(record.file_name(), "k_batch2.json");
    }

    #[test]
    fn test_write_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let quarantine = Quarantine::new(tmp.path().join("_failed"));
        let header = vec!["Name".to_string(), "CustomerKey".to_string()];
        let record = QuarantineRecord::new("Clients_Daily", 1, &header, &rows(3), &"boom");

        let path = quarantine.write(&record).unwrap();
        assert_eq!(path, tmp.path().join("_failed").join("Clients_Daily_batch1.json"));

        let stored: QuarantineRecord =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored.header, header);
        assert_eq!(stored.rows.len(), 3);
        assert_eq!(stored.error, "boom");
    }
}
