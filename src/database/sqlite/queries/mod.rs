
use super::models::*;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

const JOB_COLUMNS: &str = "repo_name, repo_url, status, progress_percent, progress_message, \
     start_time, end_time, error_message, error_code, callback_url, requesting_user_id, \
     created_at, updated_at";

pub struct JobQueries;

impl JobQueries {
    /// Atomically create a pending job, or restart an existing one when allowed.
    ///
    /// A `failed` record is always restarted; a `completed` record only when `force`
    /// is set. Records in `pending` or `indexing` are left untouched unless their
    /// heartbeat is older than `stale_before`, which means no run owns them any more.
    /// Returns the stored record and whether this call created or restarted it.
    #[inline]
    pub async fn claim(
        pool: &SqlitePool,
        new_job: NewIndexingJob,
        force: bool,
        stale_before: Option<NaiveDateTime>,
    ) -> Result<(IndexingJob, bool)> {
        let now = Utc::now().naive_utc();
        let affected = sqlx::query(
            r#"
            INSERT INTO indexing_jobs (
                repo_name, repo_url, status, progress_percent, progress_message,
                start_time, end_time, error_message, error_code, callback_url,
                requesting_user_id, created_at, updated_at
            )
            VALUES (?, ?, 'pending', 0, 'Queued for indexing', ?, NULL, NULL, NULL, ?, ?, ?, ?)
            ON CONFLICT(repo_name) DO UPDATE SET
                repo_url = excluded.repo_url,
                status = 'pending',
                progress_percent = 0,
                progress_message = excluded.progress_message,
                start_time = excluded.start_time,
                end_time = NULL,
                error_message = NULL,
                error_code = NULL,
                callback_url = excluded.callback_url,
                requesting_user_id = excluded.requesting_user_id,
                updated_at = excluded.updated_at
            WHERE indexing_jobs.status = 'failed'
               OR (? = 1 AND indexing_jobs.status = 'completed')
               OR (indexing_jobs.status IN ('pending', 'indexing')
                   AND indexing_jobs.updated_at < ?)
            "#,
        )
        .bind(&new_job.repo_name)
        .bind(&new_job.repo_url)
        .bind(now)
        .bind(&new_job.callback_url)
        .bind(new_job.requesting_user_id)
        .bind(now)
        .bind(now)
        .bind(force)
        .bind(stale_before)
        .execute(pool)
        .await
        .context("Failed to claim indexing job")?
        .rows_affected();

        let job = Self::get_by_repo(pool, &new_job.repo_name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve claimed indexing job"))?;

        debug!(
            "Claim for {} affected {} row(s), status now {}",
            job.repo_name, affected, job.status
        );
        Ok((job, affected > 0))
    }

    #[inline]
    pub async fn get_by_repo(pool: &SqlitePool, repo_name: &str) -> Result<Option<IndexingJob>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM indexing_jobs WHERE repo_name = ?");
        let result = sqlx::query_as::<_, IndexingJob>(&query)
            .bind(repo_name)
            .fetch_optional(pool)
            .await
            .context("Failed to get indexing job by repository")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<IndexingJob>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM indexing_jobs ORDER BY updated_at DESC, repo_name ASC"
        );
        let jobs = sqlx::query_as::<_, IndexingJob>(&query)
            .fetch_all(pool)
            .await
            .context("Failed to list indexing jobs")?;

        Ok(jobs)
    }

    /// Move a pending job to `indexing`. Returns false if the job was not pending.
    #[inline]
    pub async fn mark_indexing(pool: &SqlitePool, repo_name: &str, message: &str) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let affected = sqlx::query(
            "UPDATE indexing_jobs SET status = 'indexing', progress_message = ?, updated_at = ? \
             WHERE repo_name = ? AND status = 'pending'",
        )
        .bind(message)
        .bind(now)
        .bind(repo_name)
        .execute(pool)
        .await
        .context("Failed to mark job as indexing")?
        .rows_affected();

        Ok(affected > 0)
    }

    /// Raise progress on an active job. Progress never moves backwards.
    #[inline]
    pub async fn update_progress(
        pool: &SqlitePool,
        repo_name: &str,
        percent: i64,
        message: &str,
    ) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let percent = percent.clamp(0, 100);
        let affected = sqlx::query(
            "UPDATE indexing_jobs \
             SET progress_percent = MAX(progress_percent, ?), progress_message = ?, updated_at = ? \
             WHERE repo_name = ? AND status IN ('pending', 'indexing')",
        )
        .bind(percent)
        .bind(message)
        .bind(now)
        .bind(repo_name)
        .execute(pool)
        .await
        .context("Failed to update job progress")?
        .rows_affected();

        if affected == 0 {
            warn!("Ignoring progress update for inactive job {}", repo_name);
        }
        Ok(affected > 0)
    }

    /// Refresh the heartbeat of an active job
    #[inline]
    pub async fn touch(pool: &SqlitePool, repo_name: &str) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let affected = sqlx::query(
            "UPDATE indexing_jobs SET updated_at = ? \
             WHERE repo_name = ? AND status IN ('pending', 'indexing')",
        )
        .bind(now)
        .bind(repo_name)
        .execute(pool)
        .await
        .context("Failed to refresh job heartbeat")?
        .rows_affected();

        Ok(affected > 0)
    }

    #[inline]
    pub async fn complete(pool: &SqlitePool, repo_name: &str, message: &str) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let affected = sqlx::query(
            "UPDATE indexing_jobs \
             SET status = 'completed', progress_percent = 100, progress_message = ?, \
                 end_time = ?, updated_at = ?, error_message = NULL, error_code = NULL \
             WHERE repo_name = ? AND status IN ('pending', 'indexing')",
        )
        .bind(message)
        .bind(now)
        .bind(now)
        .bind(repo_name)
        .execute(pool)
        .await
        .context("Failed to mark job as completed")?
        .rows_affected();

        Ok(affected > 0)
    }

    #[inline]
    pub async fn fail(
        pool: &SqlitePool,
        repo_name: &str,
        error_code: &str,
        error_message: &str,
    ) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let affected = sqlx::query(
            "UPDATE indexing_jobs \
             SET status = 'failed', error_code = ?, error_message = ?, \
                 progress_message = 'Indexing failed', end_time = ?, updated_at = ? \
             WHERE repo_name = ? AND status IN ('pending', 'indexing')",
        )
        .bind(error_code)
        .bind(error_message)
        .bind(now)
        .bind(now)
        .bind(repo_name)
        .execute(pool)
        .await
        .context("Failed to mark job as failed")?
        .rows_affected();

        Ok(affected > 0)
    }

    /// Fail every active job whose heartbeat is older than `stale_before`
    #[inline]
    pub async fn fail_stale(
        pool: &SqlitePool,
        stale_before: NaiveDateTime,
        error_code: &str,
        error_message: &str,
    ) -> Result<u64> {
        let now = Utc::now().naive_utc();
        let affected = sqlx::query(
            "UPDATE indexing_jobs \
             SET status = 'failed', error_code = ?, error_message = ?, \
                 progress_message = 'Indexing interrupted', end_time = ?, updated_at = ? \
             WHERE status IN ('pending', 'indexing') AND updated_at < ?",
        )
        .bind(error_code)
        .bind(error_message)
        .bind(now)
        .bind(now)
        .bind(stale_before)
        .execute(pool)
        .await
        .context("Failed to recover stale jobs")?
        .rows_affected();

        if affected > 0 {
            warn!("Marked {} stale indexing job(s) as interrupted", affected);
        }
        Ok(affected)
    }

    /// Delete a job that is not pending or indexing. Returns false when no such row exists.
    #[inline]
    pub async fn delete(pool: &SqlitePool, repo_name: &str) -> Result<bool> {
        let affected = sqlx::query(
            "DELETE FROM indexing_jobs \
             WHERE repo_name = ? AND status NOT IN ('pending', 'indexing')",
        )
        .bind(repo_name)
        .execute(pool)
        .await
        .context("Failed to delete indexing job")?
        .rows_affected();

        Ok(affected > 0)
    }
}
