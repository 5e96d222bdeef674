// Repository service facade
// Validates requests and wires the job manager, index store and search orchestrator

pub mod validation;


use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::lancedb::{IndexLocation, VectorIndexStore};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{IndexingJob, JobStatus};
use crate::embeddings::{EmbeddingProvider, provider_from_config};
use crate::index::IndexKind;
use crate::indexer::{
    CallbackNotifier, IndexingPipeline, IndexingRequest, JobManager, RepositoryPipeline,
    RepositoryRef,
};
use crate::search::{SearchOrchestrator, SearchResults, SimilaritySearch};
use crate::{RepoSearchError, Result};

use self::validation::{
    resolve_search_type, validate_callback_url, validate_query, validate_threshold,
    validate_top_k,
};

/// Response to an indexing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexResponse {
    pub analysis_id: String,
    pub repo_name: String,
    pub status: JobStatus,
    pub progress: i64,
    pub message: String,
    pub is_new_request: bool,
    pub started_at: Option<NaiveDateTime>,
    pub estimated_completion: Option<NaiveDateTime>,
    /// HTTP-style status: 200 when already indexed, 202 when queued or running
    pub status_code: u16,
}

/// Current state of a repository's indexing job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub analysis_id: String,
    pub repo_name: String,
    pub status: JobStatus,
    pub progress: i64,
    pub message: String,
    pub current_step: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    /// 200 completed, 202 pending or indexing, 409 failed
    pub status_code: u16,
}

impl From<&IndexingJob> for StatusReport {
    #[inline]
    fn from(job: &IndexingJob) -> Self {
        let repo_name = &job.repo_name;
        let (message, status_code) = match job.status {
            JobStatus::Pending | JobStatus::Indexing => {
                (format!("Repository '{repo_name}' is being indexed"), 202)
            }
            JobStatus::Completed => (format!("Repository '{repo_name}' has been indexed"), 200),
            JobStatus::Failed => (
                format!(
                    "Indexing of repository '{repo_name}' failed: {}",
                    job.error_message.as_deref().unwrap_or("unknown error")
                ),
                409,
            ),
        };
        Self {
            analysis_id: job.repo_name.clone(),
            repo_name: job.repo_name.clone(),
            status: job.status,
            progress: job.progress_percent,
            message,
            current_step: job.progress_message.clone(),
            error: job.error_message.clone(),
            error_code: job.error_code.clone(),
            started_at: job.start_time,
            completed_at: job.end_time,
            status_code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub index_removed: bool,
    pub job_removed: bool,
}

/// Entry point for indexing, status, search and removal of repositories
#[derive(Clone)]
pub struct RepositoryService {
    config: Config,
    jobs: JobManager,
    orchestrator: SearchOrchestrator,
    store: VectorIndexStore,
}

impl RepositoryService {
    /// Open the job store under the base directory, connect the configured embedding
    /// provider and fail any jobs a previous process left behind.
    #[inline]
    pub async fn from_config(config: Config) -> Result<Self> {
        std::fs::create_dir_all(config.get_base_dir()).with_context(|| {
            format!(
                "Failed to create base directory {}",
                config.get_base_dir().display()
            )
        })?;
        let database = Database::new(config.database_path())
            .await
            .map_err(RepoSearchError::database)?;
        let provider = provider_from_config(&config.embedding)
            .map_err(|e| RepoSearchError::Config(format!("{e:#}")))?;

        let service = Self::new(config, database, provider);
        service
            .jobs
            .recover_interrupted_jobs(Duration::from_secs(service.config.jobs.stale_after_seconds))
            .await?;
        Ok(service)
    }

    #[inline]
    pub fn new(config: Config, database: Database, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let pipeline = Arc::new(RepositoryPipeline::from_config(&config, Arc::clone(&provider)));
        Self::with_pipeline(config, database, provider, pipeline)
    }

    /// Service running a caller-supplied pipeline
    #[inline]
    pub fn with_pipeline(
        config: Config,
        database: Database,
        provider: Arc<dyn EmbeddingProvider>,
        pipeline: Arc<dyn IndexingPipeline>,
    ) -> Self {
        let store = VectorIndexStore::new();
        let jobs = JobManager::new(database, pipeline, CallbackNotifier::default())
            .with_heartbeat_interval(Duration::from_secs(config.jobs.heartbeat_seconds))
            .with_stale_after(Duration::from_secs(config.jobs.stale_after_seconds));
        let orchestrator = SearchOrchestrator::new(
            config.indexes_dir(),
            store.clone(),
            SimilaritySearch::new(provider),
            config.search.clone(),
        );
        Self {
            config,
            jobs,
            orchestrator,
            store,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// Validate `repo_url` and start indexing unless a usable job already exists
    #[inline]
    pub async fn process_index_request(
        &self,
        repo_url: &str,
        callback_url: Option<String>,
        user_id: Option<i64>,
        force: bool,
    ) -> Result<IndexResponse> {
        let repo = RepositoryRef::parse_url(repo_url)?;
        let callback_url = validate_callback_url(callback_url)?;
        let repo_name = repo.full_name();

        let outcome = self
            .jobs
            .request_indexing(
                IndexingRequest {
                    repo_url: repo.github_url(),
                    repo,
                },
                callback_url,
                user_id,
                force,
            )
            .await?;
        let job = &outcome.job;

        let (message, status_code) = if outcome.is_new_request {
            (format!("Indexing of repository '{repo_name}' started"), 202)
        } else if job.status == JobStatus::Completed {
            (format!("Repository '{repo_name}' is already indexed"), 200)
        } else {
            (
                format!("Indexing of repository '{repo_name}' is already in progress"),
                202,
            )
        };
        info!("{}", message);

        Ok(IndexResponse {
            analysis_id: repo_name.clone(),
            repo_name,
            status: job.status,
            progress: job.progress_percent,
            message,
            is_new_request: outcome.is_new_request,
            started_at: job.start_time,
            estimated_completion: job.end_time,
            status_code,
        })
    }

    #[inline]
    pub async fn get_repository_status(&self, repo_name: &str) -> Result<StatusReport> {
        let repo = RepositoryRef::parse_full_name(repo_name)?;
        let job = self
            .jobs
            .status(&repo.full_name())
            .await?
            .ok_or_else(|| RepoSearchError::NotIndexed(repo.full_name()))?;
        Ok(StatusReport::from(&job))
    }

    #[inline]
    pub async fn list_repositories(&self) -> Result<Vec<StatusReport>> {
        let jobs = self.jobs.list().await?;
        Ok(jobs.iter().map(StatusReport::from).collect())
    }

    /// Search a repository's persisted index.
    ///
    /// Missing `top_k` and `similarity_threshold` fall back to the configured defaults.
    #[inline]
    pub async fn search_repository(
        &self,
        repo_name: &str,
        query: &str,
        top_k: Option<usize>,
        similarity_threshold: Option<f32>,
        search_type: Option<&str>,
    ) -> Result<SearchResults> {
        let repo = RepositoryRef::parse_full_name(repo_name)?;
        let query = validate_query(query)?;
        let top_k = validate_top_k(top_k, self.config.search.max_top_k)?;
        let threshold = validate_threshold(similarity_threshold)?;
        let kind = resolve_search_type(search_type);

        self.orchestrator
            .search(&repo, query, top_k, threshold, kind)
            .await
    }

    /// Remove a repository's index and job record. Refused while a build is running.
    #[inline]
    pub async fn delete_repository(&self, repo_name: &str) -> Result<DeleteOutcome> {
        let repo = RepositoryRef::parse_full_name(repo_name)?;
        let full_name = repo.full_name();

        // The job row goes first; its delete only matches finished jobs
        let job_removed = self.jobs.delete(&full_name).await?;
        if !job_removed {
            if let Some(job) = self.jobs.status(&full_name).await? {
                if job.status.is_active() {
                    return Err(RepoSearchError::Conflict(format!(
                        "repository '{full_name}' is being indexed; try again when the job finishes"
                    )));
                }
            }
        }

        let location = IndexLocation::new(&self.config.indexes_dir(), &repo, IndexKind::Code);
        let index_removed = self.store.delete(&location).await;
        if !index_removed && !job_removed {
            warn!("Nothing to delete for {}", full_name);
        }

        Ok(DeleteOutcome {
            index_removed,
            job_removed,
        })
    }
}
