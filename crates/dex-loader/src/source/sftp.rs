//! SFTP client for remote retrieval
//!
//! libssh2 is blocking, so the SSH session and its SFTP channel sit behind a
//! mutex and every operation runs on the blocking thread pool. The server's
//! host key is not verified.

use async_trait::async_trait;
use ssh2::{FileStat, Session, Sftp};
use std::fs::File;
use std::io::{self, ErrorKind};
use std::net::TcpStream;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::remote::{
    connect_with_retry, copy_with_progress, resolve_addr, ProgressFn, RemoteConfig, RemoteEntry,
    RemoteSession,
};
use super::RetrievalResult;

struct SftpChannel {
    sftp: Sftp,
    session: Session,
}

/// An open, authenticated SFTP session
pub struct SftpSession {
    channel: Arc<Mutex<SftpChannel>>,
    host: String,
}

impl SftpSession {
    /// Connect and authenticate with a password, retrying with a linear backoff
    pub async fn connect(config: RemoteConfig) -> RetrievalResult<Self> {
        let channel = connect_with_retry(&config, Self::connect_sync).await?;
        Ok(Self {
            channel: Arc::new(Mutex::new(channel)),
            host: config.host,
        })
    }

    fn connect_sync(config: &RemoteConfig) -> RetrievalResult<SftpChannel> {
        let addr = resolve_addr(config)?;
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let tcp = TcpStream::connect_timeout(&addr, timeout)?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
        session.handshake()?;

        debug!("Logging in as: {}", config.username);
        session.userauth_password(&config.username, &config.password)?;
        if !session.authenticated() {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                format!("SFTP authentication failed for {}", config.username),
            )
            .into());
        }

        let sftp = session.sftp()?;
        // Downloads may stall longer than the connect timeout
        session.set_timeout(0);

        Ok(SftpChannel { sftp, session })
    }

    /// Run `op` against the channel on the blocking pool
    async fn with_channel<T, F>(&self, op: F) -> RetrievalResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SftpChannel) -> RetrievalResult<T> + Send + 'static,
    {
        let channel = Arc::clone(&self.channel);
        tokio::task::spawn_blocking(move || {
            let mut guard = channel
                .lock()
                .map_err(|_| io::Error::other("SFTP session lock poisoned"))?;
            op(&mut guard)
        })
        .await?
    }
}

/// Convert one `readdir` result; `.` and `..` are skipped
fn entry_from_stat(path: &Path, stat: &FileStat) -> Option<RemoteEntry> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    if name == "." || name == ".." {
        return None;
    }

    let is_directory = stat.is_dir();
    Some(RemoteEntry {
        name,
        is_directory,
        size: if is_directory { None } else { stat.size },
    })
}

#[async_trait]
impl RemoteSession for SftpSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn list(&self, dir: &str) -> RetrievalResult<Vec<RemoteEntry>> {
        let path = dir.to_string();
        let entries = self
            .with_channel(move |channel| {
                let listing = channel.sftp.readdir(Path::new(&path))?;
                Ok(listing
                    .iter()
                    .filter_map(|(p, stat)| entry_from_stat(p, stat))
                    .collect::<Vec<_>>())
            })
            .await?;

        debug!(dir, count = entries.len(), "Remote directory listed");
        Ok(entries)
    }

    async fn download(&self, remote: &str, local: &Path, mut progress: ProgressFn) -> RetrievalResult<u64> {
        let remote = remote.to_string();
        let local = local.to_path_buf();

        self.with_channel(move |channel| {
            let mut source = channel.sftp.open(Path::new(&remote))?;
            let total = source.stat().ok().and_then(|s| s.size);
            let mut file = File::create(&local)?;

            let transferred = copy_with_progress(&mut source, &mut file, total, progress.as_mut())?;
            file.sync_all()?;

            if total.is_some_and(|t| t != transferred) {
                warn!(remote = %remote, expected = ?total, transferred, "Downloaded size differs from reported size");
            }
            Ok(transferred)
        })
        .await
    }

    async fn close(&self) {
        let result = self
            .with_channel(|channel| Ok(channel.session.disconnect(None, "dex-loader done", None)?))
            .await;
        match result {
            Ok(()) => info!(host = %self.host, "SFTP session closed"),
            Err(e) => warn!(host = %self.host, error = %e, "Failed to close SFTP session gracefully"),
        }
    }
}
