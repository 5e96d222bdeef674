use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::database::sqlite::models::{IndexingJob, NewIndexingJob};
use crate::database::sqlite::queries::JobQueries;


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_url: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
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

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    // Job operations
    pub async fn claim_job(
        &self,
        job: NewIndexingJob,
        force: bool,
        stale_before: Option<NaiveDateTime>,
    ) -> Result<(IndexingJob, bool)> {
        JobQueries::claim(&self.pool, job, force, stale_before).await
    }

    pub async fn get_job(&self, repo_name: &str) -> Result<Option<IndexingJob>> {
        JobQueries::get_by_repo(&self.pool, repo_name).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<IndexingJob>> {
        JobQueries::list_all(&self.pool).await
    }

    pub async fn mark_job_indexing(&self, repo_name: &str, message: &str) -> Result<bool> {
        JobQueries::mark_indexing(&self.pool, repo_name, message).await
    }

    pub async fn update_job_progress(
        &self,
        repo_name: &str,
        percent: i64,
        message: &str,
    ) -> Result<bool> {
        JobQueries::update_progress(&self.pool, repo_name, percent, message).await
    }

    pub async fn touch_job(&self, repo_name: &str) -> Result<bool> {
        JobQueries::touch(&self.pool, repo_name).await
    }

    pub async fn complete_job(&self, repo_name: &str, message: &str) -> Result<bool> {
        JobQueries::complete(&self.pool, repo_name, message).await
    }

    pub async fn fail_job(&self, repo_name: &str, error_code: &str, message: &str) -> Result<bool> {
        JobQueries::fail(&self.pool, repo_name, error_code, message).await
    }

    pub async fn fail_stale_jobs(
        &self,
        stale_before: NaiveDateTime,
        error_code: &str,
        message: &str,
    ) -> Result<u64> {
        JobQueries::fail_stale(&self.pool, stale_before, error_code, message).await
    }

    pub async fn delete_job(&self, repo_name: &str) -> Result<bool> {
        JobQueries::delete(&self.pool, repo_name).await
    }
}
