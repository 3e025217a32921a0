//! Loader tests against a real PostgreSQL
//!
//! These need Docker and are ignored by default:
//!
//! ```bash
//! cargo test -p dex-loader --test postgres_tests -- --ignored
//! ```

mod common;

use anyhow::Result;
use common::{lines, test_config, write_export, write_utf16};
use dex_loader::db::{ConnectionPool, DbError, SessionProvider, TableSession};
use dex_loader::loader::{BatchLoader, LoadError};
use dex_loader::source::SourceFile;
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

const TABLE: &str = "data_extension_item";

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dex_loader=debug")),
        )
        .with_test_writer()
        .try_init();
}

async fn start_postgres() -> Result<(ContainerAsync<Postgres>, ConnectionPool)> {
    let container = Postgres::default().with_tag("16-alpine").start().await?;

    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let conn_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&conn_string)
        .await?;

    sqlx::query(&format!(
        r#"CREATE TABLE {} (id BIGSERIAL PRIMARY KEY, "CustomerKey" VARCHAR(255))"#,
        TABLE
    ))
    .execute(&pool)
    .await?;

    Ok((container, ConnectionPool::from_pool(pool, "test_pool")))
}

async fn row_count(pool: &ConnectionPool, key: &str) -> Result<i64> {
    let count = sqlx::query_scalar(&format!(
        r#"SELECT COUNT(*) FROM {} WHERE "CustomerKey" = $1"#,
        TABLE
    ))
    .bind(key)
    .fetch_one(pool.inner())
    .await?;
    Ok(count)
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_load_creates_columns_and_rows() -> Result<()> {
    init_tracing();
    let (_container, pool) = start_postgres().await?;
    let tmp = tempfile::tempdir()?;

    let path = tmp.path().join("file1.csv");
    write_utf16(&path, &lines(&["Email,Email ,Name", "a@x.com,dup,Bob"]));

    let loader = BatchLoader::new(pool.clone(), test_config(tmp.path()))?;
    let summary = loader.load_file(&SourceFile::new(&path)).await?;
    info!(?summary, "Loaded");

    assert_eq!(summary.columns_created, 2);
    let (email, name): (String, String) = sqlx::query_as(&format!(
        r#"SELECT "Email", "Name" FROM {} WHERE "CustomerKey" = 'file1'"#,
        TABLE
    ))
    .fetch_one(pool.inner())
    .await?;
    assert_eq!((email.as_str(), name.as_str()), ("a@x.com", "Bob"));

    let mut session = pool.acquire().await?;
    let columns = session.column_names(TABLE).await?;
    assert_eq!(columns, ["id", "CustomerKey", "Email", "Name"]);
    session.release().await?;

    Ok(())
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_duplicate_column_inside_transaction_keeps_it_usable() -> Result<()> {
    init_tracing();
    let (_container, pool) = start_postgres().await?;

    let mut session = pool.acquire().await?;
    session.begin().await?;

    let err = session.add_text_column(TABLE, "CustomerKey").await.unwrap_err();
    assert!(matches!(err, DbError::DuplicateColumn(_)));

    let columns = vec!["CustomerKey".to_string()];
    let inserted = session
        .insert_rows(TABLE, &columns, &[vec!["after-duplicate".to_string()]])
        .await?;
    assert_eq!(inserted, 1);
    session.commit().await?;
    session.release().await?;

    assert_eq!(row_count(&pool, "after-duplicate").await?, 1);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_oversized_value_quarantines_and_rolls_back() -> Result<()> {
    init_tracing();
    let (_container, pool) = start_postgres().await?;
    let tmp = tempfile::tempdir()?;

    let path = tmp.path().join("toolong.csv");
    let long = "x".repeat(300);
    write_utf16(&path, &lines(&["Note", "fine", &long]));

    let mut config = test_config(tmp.path());
    config.chunk_size = 1;
    let loader = BatchLoader::new(pool.clone(), config)?;

    let err = loader.load_file(&SourceFile::new(&path)).await.unwrap_err();

    assert!(matches!(err, LoadError::Quarantined { batch: 2, .. }));
    assert_eq!(row_count(&pool, "toolong").await?, 0);
    assert!(tmp.path().join("_failed").join("toolong_batch2.json").exists());
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_wide_chunk_is_split_below_bind_limit() -> Result<()> {
    init_tracing();
    let (_container, pool) = start_postgres().await?;
    let tmp = tempfile::tempdir()?;

    // 300 columns x 300 rows needs more than 65 535 parameters
    let header: Vec<String> = (0..299).map(|i| format!("C{}", i)).collect();
    let header: Vec<&str> = header.iter().map(String::as_str).collect();
    let path = write_export(tmp.path(), "wide.csv", &header, 300);

    let loader = BatchLoader::new(pool.clone(), test_config(tmp.path()))?;
    let summary = loader.load_file(&SourceFile::new(&path)).await?;

    assert_eq!(summary.batches, 1);
    assert_eq!(row_count(&pool, "wide").await?, 300);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_replace_existing_reload_is_idempotent() -> Result<()> {
    init_tracing();
    let (_container, pool) = start_postgres().await?;
    let tmp = tempfile::tempdir()?;
    let path = write_export(tmp.path(), "again.csv", &["A"], 7);

    let mut config = test_config(tmp.path());
    config.replace_existing = true;
    let loader = BatchLoader::new(pool.clone(), config)?;

    loader.load_file(&SourceFile::new(&path)).await?;
    loader.load_file(&SourceFile::new(&path)).await?;

    assert_eq!(row_count(&pool, "again").await?, 7);
    Ok(())
}
