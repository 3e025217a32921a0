//! FTP client for remote retrieval
//!
//! suppaftp is blocking, so the control connection sits behind a mutex and
//! every operation runs on the blocking thread pool.
//!
//! # Examples
//!
//! ```rust,ignore
//! use dex_loader::source::ftp::FtpSession;
//! use dex_loader::source::remote::{Protocol, RemoteConfig, RemoteSession};
//!
//! let config = RemoteConfig { protocol: Protocol::Ftp, port: 21, ..RemoteConfig::default() };
//! let session = FtpSession::connect(config).await?;
//! for entry in session.list("Import").await? {
//!     println!("{} {:?}", entry.name, entry.size);
//! }
//! session.close().await;
//! ```

use async_trait::async_trait;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use suppaftp::{FtpError, FtpStream};
use tracing::{debug, info, warn};

use super::remote::{
    connect_with_retry, copy_with_progress, resolve_addr, ProgressFn, RemoteConfig, RemoteEntry,
    RemoteSession,
};
use super::RetrievalResult;

/// Parse one line of a `LIST` response.
///
/// Handles Unix-style listings
/// (`-rw-r--r--   1 ftp ftp  1234 Jan 15 12:00 file name.csv`) and
/// DOS-style listings (`06-25-25  10:15AM       1234 file.csv`,
/// `06-25-25  10:15AM  <DIR>  Import`). Names may contain spaces.
pub fn parse_list_line(line: &str) -> Option<RemoteEntry> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return None;
    }

    if parts[0].contains('-') && parts[0].chars().next()?.is_ascii_digit() {
        let is_directory = parts[2].eq_ignore_ascii_case("<DIR>");
        return Some(RemoteEntry {
            name: parts[3..].join(" "),
            is_directory,
            size: if is_directory { None } else { parts[2].parse().ok() },
        });
    }

    let is_directory = parts[0].starts_with('d');
    let (name, size) = if parts.len() >= 9 {
        (parts[8..].join(" "), parts[4].parse().ok())
    } else {
        (parts.last()?.to_string(), parts.get(4).and_then(|s| s.parse().ok()))
    };

    if name == "." || name == ".." {
        return None;
    }

    Some(RemoteEntry {
        name,
        is_directory,
        size,
    })
}

/// An open, logged-in FTP control connection
pub struct FtpSession {
    stream: Arc<Mutex<FtpStream>>,
    host: String,
}

impl FtpSession {
    /// Connect and log in, retrying with a linear backoff
    pub async fn connect(config: RemoteConfig) -> RetrievalResult<Self> {
        let stream = connect_with_retry(&config, Self::connect_sync).await?;
        Ok(Self {
            stream: Arc::new(Mutex::new(stream)),
            host: config.host,
        })
    }

    fn connect_sync(config: &RemoteConfig) -> RetrievalResult<FtpStream> {
        let addr = resolve_addr(config)?;
        let mut stream =
            FtpStream::connect_timeout(addr, Duration::from_secs(config.connect_timeout_secs))?;

        // Extended Passive Mode - better for NAT/Docker environments
        stream.set_mode(suppaftp::Mode::ExtendedPassive);

        debug!("Logging in as: {}", config.username);
        stream.login(&config.username, &config.password)?;
        stream.transfer_type(suppaftp::types::FileType::Binary)?;

        Ok(stream)
    }

    /// Run `op` against the control connection on the blocking pool
    async fn with_stream<T, F>(&self, op: F) -> RetrievalResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> RetrievalResult<T> + Send + 'static,
    {
        let stream = Arc::clone(&self.stream);
        tokio::task::spawn_blocking(move || {
            let mut guard = stream
                .lock()
                .map_err(|_| std::io::Error::other("FTP session lock poisoned"))?;
            op(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl RemoteSession for FtpSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn list(&self, dir: &str) -> RetrievalResult<Vec<RemoteEntry>> {
        let path = dir.to_string();
        let entries = self
            .with_stream(move |ftp| {
                let lines = ftp.list(Some(path.as_str()))?;
                Ok(lines.iter().filter_map(|l| parse_list_line(l)).collect::<Vec<_>>())
            })
            .await?;

        debug!(dir, count = entries.len(), "Remote directory listed");
        Ok(entries)
    }

    async fn download(&self, remote: &str, local: &Path, mut progress: ProgressFn) -> RetrievalResult<u64> {
        let remote = remote.to_string();
        let local = local.to_path_buf();

        self.with_stream(move |ftp| {
            // SIZE is optional on many servers
            let total = ftp.size(&remote).ok().map(|s| s as u64);
            let mut file = File::create(&local)?;

            let transferred = ftp.retr(&remote, |reader| {
                copy_with_progress(reader, &mut file, total, progress.as_mut())
                    .map_err(FtpError::ConnectionError)
            })?;
            file.sync_all()?;

            if total.is_some_and(|t| t != transferred) {
                warn!(remote = %remote, expected = ?total, transferred, "Downloaded size differs from reported size");
            }
            Ok(transferred)
        })
        .await
    }

    async fn close(&self) {
        let result = self.with_stream(|ftp| Ok(ftp.quit()?)).await;
        match result {
            Ok(()) => info!(host = %self.host, "FTP session closed"),
            Err(e) => warn!(host = %self.host, error = %e, "Failed to quit FTP session gracefully"),
        }
    }
}
