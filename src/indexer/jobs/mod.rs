// Indexing job lifecycle: pending -> indexing -> completed | failed

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{CallbackNotifier, IndexingPipeline, IndexingRequest, ProgressReporter};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{IndexingJob, NewIndexingJob};
use crate::{RepoSearchError, Result};

pub const INTERNAL_ERROR_CODE: &str = "INTERNAL_ERROR";
pub const INTERRUPTED_ERROR_CODE: &str = "INTERRUPTED";

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(120);

/// Result of asking for a repository to be indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRequestOutcome {
    /// Job record as it stood right after the request
    pub job: IndexingJob,
    /// Whether this request started a new pipeline run
    pub is_new_request: bool,
}

/// Owns the job records and runs at most one pipeline per repository
#[derive(Clone)]
pub struct JobManager {
    database: Database,
    pipeline: Arc<dyn IndexingPipeline>,
    notifier: CallbackNotifier,
    heartbeat_interval: Duration,
    stale_after: Duration,
}

impl JobManager {
    #[inline]
    pub fn new(
        database: Database,
        pipeline: Arc<dyn IndexingPipeline>,
        notifier: CallbackNotifier,
    ) -> Self {
        Self {
            database,
            pipeline,
            notifier,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    #[inline]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Heartbeat age after which an active job is treated as abandoned and can be reclaimed
    #[inline]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Claim the repository's job record and start the pipeline if the claim is new.
    ///
    /// Returns immediately; the build runs on a spawned task. A pending or running
    /// job is returned unchanged unless its heartbeat went stale, as is a completed
    /// one unless `force` is set.
    #[inline]
    pub async fn request_indexing(
        &self,
        request: IndexingRequest,
        callback_url: Option<String>,
        requesting_user_id: Option<i64>,
        force: bool,
    ) -> Result<IndexRequestOutcome> {
        let new_job = NewIndexingJob {
            repo_name: request.repo.full_name(),
            repo_url: request.repo_url.clone(),
            callback_url,
            requesting_user_id,
        };
        let stale_before = stale_cutoff(self.stale_after)?;
        let (job, is_new_request) = self
            .database
            .claim_job(new_job, force, Some(stale_before))
            .await
            .map_err(RepoSearchError::database)?;

        if is_new_request {
            info!("Starting indexing job for {}", job.repo_name);
            let manager = self.clone();
            tokio::spawn(async move { manager.run_job(request).await });
        } else {
            debug!(
                "Indexing request for {} joined existing {} job",
                job.repo_name, job.status
            );
        }

        Ok(IndexRequestOutcome {
            job,
            is_new_request,
        })
    }

    #[inline]
    pub async fn status(&self, repo_name: &str) -> Result<Option<IndexingJob>> {
        self.database
            .get_job(repo_name)
            .await
            .map_err(RepoSearchError::database)
    }

    #[inline]
    pub async fn list(&self) -> Result<Vec<IndexingJob>> {
        self.database
            .list_jobs()
            .await
            .map_err(RepoSearchError::database)
    }

    /// Remove a finished job record; `false` when there was none or it is still active
    #[inline]
    pub async fn delete(&self, repo_name: &str) -> Result<bool> {
        self.database
            .delete_job(repo_name)
            .await
            .map_err(RepoSearchError::database)
    }

    /// Fail jobs whose heartbeat is older than `stale_after`.
    ///
    /// Called at startup so a repository is never left blocked by a process that died
    /// mid-build.
    #[inline]
    pub async fn recover_interrupted_jobs(&self, stale_after: Duration) -> Result<u64> {
        let stale_before = stale_cutoff(stale_after)?;
        let recovered = self
            .database
            .fail_stale_jobs(
                stale_before,
                INTERRUPTED_ERROR_CODE,
                "Indexing was interrupted before it finished",
            )
            .await
            .map_err(RepoSearchError::database)?;
        if recovered > 0 {
            warn!("Marked {} interrupted indexing job(s) as failed", recovered);
        }
        Ok(recovered)
    }

    async fn run_job(self, request: IndexingRequest) {
        let repo_name = request.repo.full_name();

        match self
            .database
            .mark_job_indexing(&repo_name, "Indexing started")
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!("Job for {} is no longer pending, not running it", repo_name);
                return;
            }
            Err(e) => {
                error!("Failed to start job for {}: {:#}", repo_name, e);
                self.record_failure(&repo_name, INTERNAL_ERROR_CODE, "Failed to start indexing")
                    .await;
                self.notify(&repo_name).await;
                return;
            }
        }

        let heartbeat = self.start_heartbeat_task(repo_name.clone());
        let pipeline = Arc::clone(&self.pipeline);
        let progress = ProgressReporter::new(self.database.clone(), repo_name.clone());
        // The pipeline runs on its own task so a panic surfaces as a JoinError here
        let result = tokio::spawn(async move { pipeline.run(&request, &progress).await }).await;
        heartbeat.abort();

        match result {
            Ok(Ok(outcome)) => {
                let message = format!(
                    "Indexed {} of {} code chunks",
                    outcome.indexed, outcome.documents
                );
                match self.database.complete_job(&repo_name, &message).await {
                    Ok(true) => info!("Indexing job for {} completed: {}", repo_name, message),
                    Ok(false) => warn!("Job for {} was no longer active at completion", repo_name),
                    Err(e) => error!("Failed to record completion for {}: {:#}", repo_name, e),
                }
            }
            Ok(Err(e)) => {
                error!("Indexing job for {} failed: {}", repo_name, e);
                self.record_failure(&repo_name, e.error_code(), &e.public_message())
                    .await;
            }
            Err(join_error) => {
                error!("Indexing task for {} aborted: {}", repo_name, join_error);
                self.record_failure(
                    &repo_name,
                    INTERNAL_ERROR_CODE,
                    "The indexing task terminated unexpectedly",
                )
                .await;
            }
        }

        self.notify(&repo_name).await;
    }

    async fn record_failure(&self, repo_name: &str, error_code: &str, message: &str) {
        match self.database.fail_job(repo_name, error_code, message).await {
            Ok(true) => {}
            Ok(false) => warn!("Job for {} was no longer active at failure", repo_name),
            Err(e) => error!("Failed to record failure for {}: {:#}", repo_name, e),
        }
    }

    async fn notify(&self, repo_name: &str) {
        match self.database.get_job(repo_name).await {
            Ok(Some(job)) => {
                self.notifier.notify(&job);
            }
            Ok(None) => debug!("Job for {} vanished before notification", repo_name),
            Err(e) => warn!("Failed to load job {} for notification: {:#}", repo_name, e),
        }
    }

    fn start_heartbeat_task(&self, repo_name: String) -> JoinHandle<()> {
        let database = self.database.clone();
        let interval = self.heartbeat_interval;

        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                match database.touch_job(&repo_name).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => error!("Failed to refresh heartbeat for {}: {:#}", repo_name, e),
                }
            }
        })
    }
}

fn stale_cutoff(stale_after: Duration) -> Result<NaiveDateTime> {
    let age =
        chrono::Duration::from_std(stale_after).context("Stale job threshold is out of range")?;
    Ok(Utc::now()
        .naive_utc()
        .checked_sub_signed(age)
        .unwrap_or(NaiveDateTime::MIN))
}
