//! DEX Loader - CSV export ingestion tool

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dex_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use dex_loader::config::{
    LoaderConfig, DAILY_PATTERN, DEFAULT_CHUNK_SIZE, DEFAULT_COMMIT_THRESHOLD, DEFAULT_ENCODING,
    DEFAULT_KEY_COLUMN, DEFAULT_TABLE_NAME, HISTORICAL_PATTERN,
};
use dex_loader::db::{ConnectionPool, DbConfig};
use dex_loader::loader::BatchLoader;
use dex_loader::source::local::LocalResolver;
use dex_loader::source::remote::{
    self, fetch_file, Protocol, RemoteConfig, RemoteResolver, RemoteSession,
};
use dex_loader::source::{FileSetResolver, NamePattern, RetrievalError};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "dex-loader")]
#[command(author, version, about = "Load wide CSV exports into one wide table")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load matching files from a local directory
    Local {
        /// Directory holding the exports
        #[arg(short, long, env = "DEX_SOURCE_DIR", default_value = "./csv")]
        dir: PathBuf,

        /// File name pattern
        #[arg(short, long, default_value = DAILY_PATTERN)]
        pattern: String,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Download matching files from the SFTP or FTP server and load them
    Remote {
        #[command(flatten)]
        server: RemoteArgs,

        /// Local directory for temporary copies
        #[arg(long, env = "DEX_DOWNLOAD_DIR", default_value = "./csv")]
        download_dir: PathBuf,

        /// File name pattern
        #[arg(short, long, default_value = HISTORICAL_PATTERN)]
        pattern: String,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// List remote directories with entry sizes
    List {
        #[command(flatten)]
        server: RemoteArgs,

        /// Directories to list (defaults to the remote directory)
        dirs: Vec<String>,
    },

    /// Download a single remote file
    Fetch {
        #[command(flatten)]
        server: RemoteArgs,

        /// Remote path
        remote: String,

        /// Local destination
        local: PathBuf,
    },
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Maximum pooled connections
    #[arg(long, env = "DEX_POOL_SIZE", default_value_t = 5)]
    pool_size: u32,

    /// Target table, optionally schema-qualified
    #[arg(long, env = "DEX_TABLE", default_value = DEFAULT_TABLE_NAME)]
    table: String,

    /// Column holding each row's file key
    #[arg(long, env = "DEX_KEY_COLUMN", default_value = DEFAULT_KEY_COLUMN)]
    key_column: String,

    /// Data rows per insert chunk
    #[arg(long, env = "DEX_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Inserted rows between commits
    #[arg(long, env = "DEX_COMMIT_THRESHOLD", default_value_t = DEFAULT_COMMIT_THRESHOLD)]
    commit_threshold: usize,

    /// Source file encoding label
    #[arg(long, env = "DEX_ENCODING", default_value = DEFAULT_ENCODING)]
    encoding: String,

    /// Field delimiter (single ASCII character)
    #[arg(long, env = "DEX_DELIMITER", default_value_t = ',')]
    delimiter: char,

    /// Quarantine directory (defaults to `_failed` inside the source directory)
    #[arg(long, env = "DEX_QUARANTINE_DIR")]
    quarantine_dir: Option<PathBuf>,

    /// Delete rows from a previous load of the same file first
    #[arg(long, env = "DEX_REPLACE_EXISTING")]
    replace_existing: bool,
}

impl LoadArgs {
    fn loader_config(&self, source_directory: PathBuf, pattern: String) -> Result<LoaderConfig> {
        let delimiter = u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .with_context(|| format!("Delimiter {:?} is not a single ASCII character", self.delimiter))?;

        let mut config = LoaderConfig::for_directory(source_directory);
        config.name_pattern = pattern;
        config.table_name = self.table.clone();
        config.key_column = self.key_column.clone();
        config.chunk_size = self.chunk_size;
        config.commit_threshold = self.commit_threshold;
        config.encoding = self.encoding.clone();
        config.delimiter = delimiter;
        config.replace_existing = self.replace_existing;
        if let Some(dir) = &self.quarantine_dir {
            config.quarantine_directory = dir.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn db_config(&self) -> DbConfig {
        DbConfig {
            url: self.database_url.clone(),
            max_connections: self.pool_size,
            min_connections: self.pool_size.min(1),
            ..DbConfig::default()
        }
    }
}

#[derive(Args, Debug)]
struct RemoteArgs {
    /// Transfer protocol: sftp or ftp
    #[arg(long, env = "REMOTE_PROTOCOL", default_value_t = Protocol::Sftp)]
    protocol: Protocol,

    /// Server host
    #[arg(long, env = "REMOTE_HOST")]
    host: String,

    /// Server port (defaults to 22 for sftp, 21 for ftp)
    #[arg(long, env = "REMOTE_PORT")]
    port: Option<u16>,

    #[arg(long, env = "REMOTE_USER")]
    user: String,

    #[arg(long, env = "REMOTE_PASSWORD", hide_env_values = true)]
    password: String,

    /// Remote directory holding the exports
    #[arg(long, env = "REMOTE_DIR", default_value = "Import")]
    remote_dir: String,
}

impl RemoteArgs {
    fn config(&self) -> RemoteConfig {
        RemoteConfig {
            protocol: self.protocol,
            host: self.host.clone(),
            port: self.port.unwrap_or(self.protocol.default_port()),
            username: self.user.clone(),
            password: self.password.clone(),
            remote_dir: self.remote_dir.clone(),
            ..RemoteConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Values from .env must be visible before clap reads env-backed flags
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .output(LogOutput::Both)
        .log_file_prefix("dex-loader")
        .build()
        .merge_env()?;

    let guard = init_logging(&log_config)?;

    if let Err(e) = execute(cli.command).await {
        if let Some(RetrievalError::DestinationLocked(path)) = e.downcast_ref::<RetrievalError>() {
            error!(path = %path.display(), "Local file is locked, run aborted");
        }
        error!(error = ?e, "Run aborted");
        eprintln!("Error: {:#}", e);
        drop(guard);
        process::exit(1);
    }

    Ok(())
}

async fn execute(command: Command) -> Result<()> {
    match command {
        Command::Local { dir, pattern, load } => {
            let config = load.loader_config(dir.clone(), pattern)?;
            let pattern = config.pattern()?;
            let (pool, loader) = connect_loader(&load, config).await?;

            info!(dir = %dir.display(), pattern = %pattern, "Local ingestion");
            let mut resolver = LocalResolver::new(dir);
            ingest(&mut resolver, &pool, &loader, &pattern).await
        },
        Command::Remote {
            server,
            download_dir,
            pattern,
            load,
        } => {
            let config = load.loader_config(download_dir.clone(), pattern)?;
            let pattern = config.pattern()?;
            let (pool, loader) = connect_loader(&load, config).await?;

            info!(
                protocol = %server.protocol,
                host = %server.host,
                dir = %server.remote_dir,
                pattern = %pattern,
                "Remote ingestion"
            );
            let mut resolver = match RemoteResolver::connect(server.config(), download_dir).await {
                Ok(resolver) => resolver,
                Err(e) => {
                    pool.close().await;
                    return Err(e.into());
                },
            };
            ingest(&mut resolver, &pool, &loader, &pattern).await
        },
        Command::List { server, dirs } => {
            let config = server.config();
            let dirs = if dirs.is_empty() {
                vec![config.remote_dir.clone()]
            } else {
                dirs
            };

            let session = remote::connect(config).await?;
            let mut result = Ok(());
            for dir in &dirs {
                result = session.log_listing(dir).await;
                if result.is_err() {
                    break;
                }
            }
            session.close().await;
            Ok(result?)
        },
        Command::Fetch {
            server,
            remote: remote_path,
            local,
        } => {
            let session = remote::connect(server.config()).await?;
            let result = fetch_file(session.as_ref(), &remote_path, &local, None).await;
            session.close().await;
            result?;
            Ok(())
        },
    }
}

async fn connect_loader(
    load: &LoadArgs,
    config: LoaderConfig,
) -> Result<(ConnectionPool, BatchLoader<ConnectionPool>)> {
    let pool = ConnectionPool::connect(&load.db_config())
        .await
        .context("Failed to connect to the database")?;
    let loader = BatchLoader::new(pool.clone(), config)?;
    Ok((pool, loader))
}

async fn ingest<R: FileSetResolver>(
    resolver: &mut R,
    pool: &ConnectionPool,
    loader: &BatchLoader<ConnectionPool>,
    pattern: &NamePattern,
) -> Result<()> {
    let result = dex_loader::run(resolver, loader, pattern).await;
    pool.close().await;

    let report = result?;
    if !report.all_loaded() {
        warn!(
            failed = report.files_failed(),
            quarantined = report.files_quarantined(),
            "Some files were not loaded, see the errors above"
        );
    }

    info!("Ingestion complete");
    Ok(())
}
