use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

pub mod models;
pub mod queries;


pub use models::*;
pub use queries::*;

pub type DbPool = Pool<Sqlite>;

/// Handle to the SQLite metadata store. Cheap to clone; all clones share
/// one connection pool, so concurrent readers are safe.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path.as_ref())
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    /// Open the store under a base directory, creating it when absent.
    #[inline]
    pub async fn initialize_from_base_dir(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)
            .with_context(|| format!("Failed to create base directory: {}", base_dir.display()))?;

        Self::new(base_dir.join("metadata.db")).await
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        // Statements contain no embedded semicolons, so splitting on ';'
        // is safe here.
        let schema = include_str!("migrations/001_initial_schema.sql");
        for statement in schema.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to run migration statement: {statement}"))?;
        }

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn begin_transaction(&self) -> Result<sqlx::Transaction<'_, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin database transaction")
    }

    #[inline]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
