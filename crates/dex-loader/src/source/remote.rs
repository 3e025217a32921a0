//! Remote retrieval shared by the FTP and SFTP clients
//!
//! A [`RemoteSession`] is opened once per run and reused for listing and
//! every download. [`RemoteResolver`] turns a session into a
//! [`FileSetResolver`]: it lists the remote directory, downloads each
//! candidate into a local directory and deletes the copy after loading.
//!
//! # Examples
//!
//! ```rust,ignore
//! use dex_loader::source::remote::{self, Protocol, RemoteConfig};
//!
//! let config = RemoteConfig {
//!     protocol: Protocol::Sftp,
//!     host: "sftp.example.com".into(),
//!     ..RemoteConfig::default()
//! };
//! let session = remote::connect(config).await?;
//! session.log_listing("Import").await?;
//! session.close().await;
//! ```

use async_trait::async_trait;
use dex_common::DexError;
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::ftp::FtpSession;
use super::sftp::SftpSession;
use super::{
    sort_candidates, Candidate, FileSetResolver, NamePattern, RetrievalError, RetrievalResult,
    SourceFile,
};
use crate::progress::{create_download_progress, format_listing_size, update_download_progress};

/// Maximum number of connection attempts
pub const MAX_RETRIES: u32 = 3;

/// Base delay between connection attempts (in seconds), multiplied by the attempt number
pub const RETRY_DELAY_SECS: u64 = 5;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Download progress callback: `(transferred, total)`, `total == 0` while unknown
pub type ProgressFn = Box<dyn FnMut(u64, u64) + Send>;

/// File transfer protocol spoken by the remote server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    Ftp,
    #[default]
    Sftp,
}

impl Protocol {
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Ftp => 21,
            Protocol::Sftp => 22,
        }
    }
}

impl FromStr for Protocol {
    type Err = DexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ftp" => Ok(Protocol::Ftp),
            "sftp" => Ok(Protocol::Sftp),
            other => Err(DexError::config(format!(
                "Unknown protocol '{}', expected 'ftp' or 'sftp'",
                other
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ftp => write!(f, "ftp"),
            Protocol::Sftp => write!(f, "sftp"),
        }
    }
}

/// Remote server connection settings
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub protocol: Protocol,

    pub host: String,

    /// 22 for SFTP, 21 for FTP
    pub port: u16,

    pub username: String,

    pub password: String,

    /// Remote directory holding the exports
    pub remote_dir: String,

    pub connect_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Sftp,
            host: "localhost".to_string(),
            port: Protocol::Sftp.default_port(),
            username: "anonymous".to_string(),
            password: String::new(),
            remote_dir: "Import".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Entry name (file name or directory name)
    pub name: String,

    pub is_directory: bool,

    /// File size in bytes (if available)
    pub size: Option<u64>,
}

/// An open, authenticated connection to the remote server
#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn host(&self) -> &str;

    /// List a remote directory with per-entry size and type
    async fn list(&self, dir: &str) -> RetrievalResult<Vec<RemoteEntry>>;

    /// Download `remote` to `local`, creating or truncating `local`.
    ///
    /// `progress` follows the [`copy_with_progress`] contract. Returns the
    /// number of bytes written.
    async fn download(&self, remote: &str, local: &Path, progress: ProgressFn) -> RetrievalResult<u64>;

    /// End the session; failures are logged, not returned
    async fn close(&self);

    /// Log every entry of `dir` with its size, the way an operator inspects the server
    async fn log_listing(&self, dir: &str) -> RetrievalResult<()> {
        let entries = self.list(dir).await?;
        info!(host = %self.host(), "Contents of '{}':", dir);
        for entry in &entries {
            info!(
                "{:40}  {}",
                entry.name,
                format_listing_size(entry.size, entry.is_directory)
            );
        }
        Ok(())
    }
}

/// Connect with the client matching `config.protocol`
pub async fn connect(config: RemoteConfig) -> RetrievalResult<Box<dyn RemoteSession>> {
    Ok(match config.protocol {
        Protocol::Ftp => Box::new(FtpSession::connect(config).await?),
        Protocol::Sftp => Box::new(SftpSession::connect(config).await?),
    })
}

/// Run the blocking `connect` on the blocking pool, retrying with a linear backoff
pub(crate) async fn connect_with_retry<T>(
    config: &RemoteConfig,
    connect: fn(&RemoteConfig) -> RetrievalResult<T>,
) -> RetrievalResult<T>
where
    T: Send + 'static,
{
    info!(
        host = %config.host,
        port = config.port,
        protocol = %config.protocol,
        "Connecting to remote server"
    );

    let mut attempt = 1;
    loop {
        let attempt_config = config.clone();
        match tokio::task::spawn_blocking(move || connect(&attempt_config)).await? {
            Ok(session) => {
                info!(host = %config.host, protocol = %config.protocol, "Remote session established");
                return Ok(session);
            },
            Err(e) if attempt < MAX_RETRIES => {
                let delay = RETRY_DELAY_SECS * attempt as u64;
                warn!(
                    "Connect attempt {}/{} failed: {}. Retrying in {}s...",
                    attempt, MAX_RETRIES, e, delay
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

pub(crate) fn resolve_addr(config: &RemoteConfig) -> io::Result<SocketAddr> {
    (config.host.as_str(), config.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(ErrorKind::NotFound, format!("cannot resolve {}", config.host)))
}

/// Copy `reader` into `writer`, reporting progress after every block.
///
/// `total` is the size announced by the server. While it is unknown, or once
/// the transfer has outgrown it, progress reports a total of 0. The last
/// call is always `(transferred, transferred)`, also for an empty file.
pub fn copy_with_progress(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    total: Option<u64>,
    progress: &mut dyn FnMut(u64, u64),
) -> io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut done = 0u64;
    let mut last = None;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        done += n as u64;

        let reported = total.filter(|&t| t >= done).unwrap_or(0);
        progress(done, reported);
        last = Some((done, reported));
    }
    writer.flush()?;

    if last != Some((done, done)) {
        progress(done, done);
    }
    Ok(done)
}

/// Download `remote` to `local` with a progress bar, replacing a stale copy.
///
/// A stale copy that cannot be removed yields
/// [`RetrievalError::DestinationLocked`].
pub async fn fetch_file(
    session: &dyn RemoteSession,
    remote: &str,
    local: &Path,
    size_hint: Option<u64>,
) -> RetrievalResult<u64> {
    info!("↓ {} → {}", remote, local.display());

    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    remove_stale_copy(local)?;

    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| remote.to_string());
    let pb = create_download_progress(size_hint.unwrap_or(0), &format!("Downloading {}", name));
    let bar = pb.clone();

    let bytes = session
        .download(
            remote,
            local,
            Box::new(move |transferred, total| update_download_progress(&bar, transferred, total)),
        )
        .await?;

    if size_hint.is_some_and(|s| s != bytes) {
        warn!(remote = %remote, expected = ?size_hint, bytes, "Downloaded size differs from listed size");
    }
    info!(file = %name, bytes, "Download complete");
    Ok(bytes)
}

fn remove_stale_copy(local: &Path) -> RetrievalResult<()> {
    match std::fs::remove_file(local) {
        Ok(()) => {
            debug!(path = %local.display(), "Removed stale local copy");
            Ok(())
        },
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) if matches!(e.kind(), ErrorKind::PermissionDenied | ErrorKind::ResourceBusy) => {
            error!(
                path = %local.display(),
                "Local file is open in another program. Close it and run again."
            );
            Err(RetrievalError::DestinationLocked(local.to_path_buf()))
        },
        Err(e) => Err(e.into()),
    }
}

/// Lists a remote directory and downloads each candidate into a local
/// temporary directory; the local copy is deleted after loading.
pub struct RemoteResolver {
    session: Box<dyn RemoteSession>,
    remote_dir: String,
    download_dir: PathBuf,
}

impl RemoteResolver {
    pub fn new(
        session: Box<dyn RemoteSession>,
        remote_dir: impl Into<String>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session,
            remote_dir: remote_dir.into(),
            download_dir: download_dir.into(),
        }
    }

    /// Connect with `config` and resolve from `config.remote_dir`
    pub async fn connect(config: RemoteConfig, download_dir: impl Into<PathBuf>) -> RetrievalResult<Self> {
        let remote_dir = config.remote_dir.clone();
        let session = connect(config).await?;
        Ok(Self::new(session, remote_dir, download_dir))
    }

    fn remote_path(&self, name: &str) -> String {
        match self.remote_dir.trim_end_matches('/') {
            "" | "." => name.to_string(),
            dir => format!("{}/{}", dir, name),
        }
    }
}

#[async_trait]
impl FileSetResolver for RemoteResolver {
    async fn list_candidates(&mut self, pattern: &NamePattern) -> RetrievalResult<Vec<Candidate>> {
        let entries = self.session.list(&self.remote_dir).await?;

        let mut candidates: Vec<Candidate> = entries
            .into_iter()
            .filter(|e| !e.is_directory && pattern.matches(&e.name))
            .map(|e| Candidate {
                location: self.remote_path(&e.name),
                name: e.name,
                size: e.size,
            })
            .collect();

        sort_candidates(&mut candidates);
        Ok(candidates)
    }

    async fn materialize(&mut self, candidate: &Candidate) -> RetrievalResult<SourceFile> {
        let local = self.download_dir.join(&candidate.name);
        fetch_file(self.session.as_ref(), &candidate.location, &local, candidate.size).await?;
        Ok(SourceFile::new(local))
    }

    async fn release(&mut self, _candidate: &Candidate, file: &SourceFile) {
        match std::fs::remove_file(file.path()) {
            Ok(()) => debug!(path = %file.path().display(), "Temporary copy removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {},
            Err(e) => warn!(
                path = %file.path().display(),
                error = %e,
                "Could not remove temporary copy, leaving it in place"
            ),
        }
    }

    async fn close(&mut self) {
        self.session.close().await;
    }
}
