//! Local directory scan

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use super::{
    sort_candidates, Candidate, FileSetResolver, NamePattern, RetrievalResult, SourceFile,
};

/// Resolves candidates from files directly inside one directory.
///
/// Files are loaded in place and never deleted.
pub struct LocalResolver {
    dir: PathBuf,
}

impl LocalResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl FileSetResolver for LocalResolver {
    async fn list_candidates(&mut self, pattern: &NamePattern) -> RetrievalResult<Vec<Candidate>> {
        let mut candidates = Vec::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if !pattern.matches(&name) {
                continue;
            }

            candidates.push(Candidate {
                name,
                location: entry.path().to_string_lossy().into_owned(),
                size: Some(metadata.len()),
            });
        }

        sort_candidates(&mut candidates);
        debug!(dir = %self.dir.display(), pattern = %pattern, count = candidates.len(), "Local scan finished");
        Ok(candidates)
    }

    async fn materialize(&mut self, candidate: &Candidate) -> RetrievalResult<SourceFile> {
        Ok(SourceFile::new(&candidate.location))
    }

    async fn release(&mut self, _candidate: &Candidate, _file: &SourceFile) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lists_matching_files_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["b_Daily.csv", "a_Daily.csv", "c_Historical.csv", "notes.txt"] {
            std::fs::write(tmp.path().join(name), "x").unwrap();
        }
        std::fs::create_dir(tmp.path().join("z_Daily_dir.csv")).unwrap();

        let mut resolver = LocalResolver::new(tmp.path());
        let pattern = NamePattern::new("*_Daily*.csv").unwrap();
        let candidates = resolver.list_candidates(&pattern).await.unwrap();

        let names: Vec<_> = candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a_Daily.csv", "b_Daily.csv"]);
        assert_eq!(candidates[0].size, Some(1));
    }

    #[tokio::test]
    async fn test_materialize_is_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("x_Daily.csv");
        std::fs::write(&path, "A\n1\n").unwrap();

        let mut resolver = LocalResolver::new(tmp.path());
        let pattern = NamePattern::new("*.csv").unwrap();
        let candidate = resolver.list_candidates(&pattern).await.unwrap().remove(0);
        let file = resolver.materialize(&candidate).await.unwrap();

        assert_eq!(file.path(), path);
        assert_eq!(file.key(), "x_Daily");

        resolver.release(&candidate, &file).await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let mut resolver = LocalResolver::new("/definitely/not/here");
        let pattern = NamePattern::new("*.csv").unwrap();
        assert!(resolver.list_candidates(&pattern).await.is_err());
    }
}
