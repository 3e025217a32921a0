//! One ingestion run: resolve the file set, load each file, report

use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::db::SessionProvider;
use crate::loader::{BatchLoader, LoadSummary};
use crate::source::{FileSetResolver, NamePattern, RetrievalResult};

/// Outcome of one file within a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Loaded(LoadSummary),
    Failed { key: String, error: String },
    Quarantined { key: String, error: String },
}

/// What a run did, file by file
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub files: Vec<(String, FileOutcome)>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn files_seen(&self) -> usize {
        self.files.len()
    }

    pub fn files_loaded(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Loaded(_)))
    }

    /// Files that did not load, quarantined ones included
    pub fn files_failed(&self) -> usize {
        self.files_seen() - self.files_loaded()
    }

    pub fn files_quarantined(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Quarantined { .. }))
    }

    pub fn rows_loaded(&self) -> usize {
        self.files
            .iter()
            .map(|(_, outcome)| match outcome {
                FileOutcome::Loaded(summary) => summary.rows,
                _ => 0,
            })
            .sum()
    }

    pub fn all_loaded(&self) -> bool {
        self.files_failed() == 0
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|(_, o)| pred(o)).count()
    }

    fn log_summary(&self) {
        info!(
            files = self.files_seen(),
            loaded = self.files_loaded(),
            failed = self.files_failed(),
            quarantined = self.files_quarantined(),
            rows = self.rows_loaded(),
            elapsed_secs = self.elapsed.as_secs_f64(),
            "Run finished"
        );
    }
}

/// Load every file `resolver` yields for `pattern`, in name order.
///
/// A file that fails to load is logged and skipped. A retrieval failure
/// aborts the run; the resolver is closed either way.
pub async fn run<R, P>(
    resolver: &mut R,
    loader: &BatchLoader<P>,
    pattern: &NamePattern,
) -> RetrievalResult<RunReport>
where
    R: FileSetResolver + ?Sized,
    P: SessionProvider,
{
    let started = Instant::now();
    let result = run_files(resolver, loader, pattern).await;
    resolver.close().await;

    let mut report = result?;
    report.elapsed = started.elapsed();
    report.log_summary();
    Ok(report)
}

async fn run_files<R, P>(
    resolver: &mut R,
    loader: &BatchLoader<P>,
    pattern: &NamePattern,
) -> RetrievalResult<RunReport>
where
    R: FileSetResolver + ?Sized,
    P: SessionProvider,
{
    let mut report = RunReport::default();

    let candidates = resolver.list_candidates(pattern).await?;
    if candidates.is_empty() {
        warn!(pattern = %pattern, "No files found matching pattern");
        return Ok(report);
    }
    info!(pattern = %pattern, count = candidates.len(), "Files to load");

    for candidate in &candidates {
        let file = resolver.materialize(candidate).await?;

        let outcome = match loader.load_file(&file).await {
            Ok(summary) => {
                info!(
                    file = %candidate.name,
                    rows = summary.rows,
                    commits = summary.commits,
                    "File loaded"
                );
                FileOutcome::Loaded(summary)
            },
            Err(e) if e.is_quarantined() => {
                error!(file = %candidate.name, error = %e, "File rolled back, batch quarantined");
                FileOutcome::Quarantined {
                    key: file.key().to_string(),
                    error: e.to_string(),
                }
            },
            Err(e) => {
                error!(file = %candidate.name, error = %e, "File failed to load");
                FileOutcome::Failed {
                    key: file.key().to_string(),
                    error: e.to_string(),
                }
            },
        };

        resolver.release(candidate, &file).await;
        report.files.push((candidate.name.clone(), outcome));
    }

    Ok(report)
}
