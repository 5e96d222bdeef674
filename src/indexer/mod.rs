// Indexer module
// Turns a repository into a persisted vector index and tracks the jobs doing it

pub mod callback;
pub mod jobs;
pub mod source;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::lancedb::{IndexLocation, VectorIndexStore};
use crate::database::sqlite::Database;
use crate::embeddings::EmbeddingProvider;
use crate::embeddings::chunking::ChunkingConfig;
use crate::index::{Document, IndexKind, VectorIndex};
use crate::{RepoSearchError, Result};

pub use callback::{CallbackNotifier, CallbackPayload};
pub use jobs::{IndexRequestOutcome, JobManager};
pub use source::{RepositoryRef, RepositorySource, SourceConfig, SourceFile};

const EMBEDDING_HINT: &str = "Hint: check that the embedding server is reachable \
     and that the configured model has been pulled";

/// Embeds documents and persists the resulting index
#[derive(Clone)]
pub struct IndexBuilder {
    provider: Arc<dyn EmbeddingProvider>,
    store: VectorIndexStore,
}

impl IndexBuilder {
    #[inline]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, store: VectorIndexStore) -> Self {
        Self { provider, store }
    }

    #[inline]
    pub fn store(&self) -> &VectorIndexStore {
        &self.store
    }

    /// Embed `documents`, assemble an index from the survivors and persist it at `location`.
    ///
    /// Returns `Ok(None)` when there is nothing to index: the input is empty, or every
    /// document failed to embed. Nothing is written in that case. If every vector that
    /// came back has the wrong dimension the model and config disagree, which is an
    /// embedding error rather than an empty result.
    #[inline]
    pub async fn build(
        &self,
        documents: Vec<Document>,
        location: &IndexLocation,
    ) -> Result<Option<VectorIndex>> {
        if documents.is_empty() {
            info!("No documents to index for {}", location.repo_name());
            return Ok(None);
        }

        let total = documents.len();
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let batch = self
            .provider
            .embed_documents(&texts)
            .await
            .map_err(with_remediation)?;

        let failed: HashSet<usize> = batch.failed_indices.iter().copied().collect();
        if let Some(out_of_range) = failed.iter().find(|&&i| i >= total) {
            return Err(RepoSearchError::Indexing(format!(
                "Embedding provider reported failure for index {out_of_range} of a {total}-document batch"
            )));
        }
        if batch.vectors.len() + failed.len() != total {
            return Err(RepoSearchError::Indexing(format!(
                "Embedding provider returned {} vectors and {} failures for {} documents",
                batch.vectors.len(),
                failed.len(),
                total
            )));
        }
        if batch.vectors.is_empty() {
            warn!(
                "All {} documents failed to embed for {}",
                total,
                location.repo_name()
            );
            return Ok(None);
        }
        if !failed.is_empty() {
            warn!(
                "{} of {} documents failed to embed for {} and were skipped",
                failed.len(),
                total,
                location.repo_name()
            );
        }

        let dimension = self.provider.dimension();
        let mut entries = Vec::with_capacity(batch.vectors.len());
        let mut mismatched = None;
        let survivors = documents
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !failed.contains(i));
        for ((position, document), vector) in survivors.zip(batch.vectors) {
            if vector.len() != dimension {
                warn!(
                    "Dropping document {} ({}): vector has dimension {}, expected {}",
                    position,
                    document.file_path().unwrap_or("unknown file"),
                    vector.len(),
                    dimension
                );
                mismatched = Some(vector.len());
                continue;
            }
            entries.push((document, vector));
        }
        if entries.is_empty() {
            if let Some(actual) = mismatched {
                return Err(RepoSearchError::Embedding(format!(
                    "Embedding model returned {actual}-dimensional vectors but {dimension} were \
                     expected. Hint: set embedding.embedding_dimension to {actual} or switch to a \
                     model producing {dimension}-dimensional vectors"
                )));
            }
            warn!(
                "No vectors with dimension {} for {}",
                dimension,
                location.repo_name()
            );
            return Ok(None);
        }

        let index = VectorIndex::new(location.kind(), dimension, entries)
            .map_err(|e| RepoSearchError::Indexing(e.to_string()))?;
        debug!(
            "Assembled {} index for {} with {} vectors",
            index.kind(),
            location.repo_name(),
            index.len()
        );

        self.store.save(location, &index).await?;
        Ok(Some(index))
    }
}

fn with_remediation(error: RepoSearchError) -> RepoSearchError {
    match error {
        RepoSearchError::Embedding(message) if !message.contains("Hint:") => {
            RepoSearchError::Embedding(format!("{message}. {EMBEDDING_HINT}"))
        }
        other => other,
    }
}

/// What to index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingRequest {
    pub repo: RepositoryRef,
    pub repo_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOutcome {
    /// Chunks produced from the repository
    pub documents: usize,
    /// Chunks that made it into the index
    pub indexed: usize,
}

/// Records coarse progress for one job; failures to record are only logged
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    database: Option<Database>,
    repo_name: String,
}

impl ProgressReporter {
    #[inline]
    pub fn new(database: Database, repo_name: impl Into<String>) -> Self {
        Self {
            database: Some(database),
            repo_name: repo_name.into(),
        }
    }

    /// Reporter that only logs, for runs without a job record
    #[inline]
    pub fn detached(repo_name: impl Into<String>) -> Self {
        Self {
            database: None,
            repo_name: repo_name.into(),
        }
    }

    #[inline]
    pub async fn report(&self, percent: i64, message: &str) {
        info!("[{}] {}% {}", self.repo_name, percent, message);
        if let Some(database) = &self.database {
            if let Err(e) = database
                .update_job_progress(&self.repo_name, percent, message)
                .await
            {
                warn!("Failed to record progress for {}: {:#}", self.repo_name, e);
            }
        }
    }
}

/// The work executed for one indexing job
#[async_trait]
pub trait IndexingPipeline: Send + Sync {
    async fn run(
        &self,
        request: &IndexingRequest,
        progress: &ProgressReporter,
    ) -> Result<PipelineOutcome>;
}

/// Source checkout, chunking, embedding and persistence of a code index
#[derive(Clone)]
pub struct RepositoryPipeline {
    source: RepositorySource,
    chunking: ChunkingConfig,
    builder: IndexBuilder,
    indexes_dir: PathBuf,
}

impl RepositoryPipeline {
    #[inline]
    pub fn new(
        source: RepositorySource,
        chunking: ChunkingConfig,
        builder: IndexBuilder,
        indexes_dir: PathBuf,
    ) -> Self {
        Self {
            source,
            chunking,
            builder,
            indexes_dir,
        }
    }

    #[inline]
    pub fn from_config(config: &Config, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::new(
            RepositorySource::new(config.source.clone(), config.checkouts_dir()),
            config.chunking.clone(),
            IndexBuilder::new(provider, VectorIndexStore::new()),
            config.indexes_dir(),
        )
    }
}

#[async_trait]
impl IndexingPipeline for RepositoryPipeline {
    async fn run(
        &self,
        request: &IndexingRequest,
        progress: &ProgressReporter,
    ) -> Result<PipelineOutcome> {
        let repo = &request.repo;

        progress.report(5, "Preparing repository source").await;
        let root = self.source.prepare(repo, &request.repo_url).await?;

        progress.report(20, "Scanning and chunking source files").await;
        let documents = self.source.collect_documents(&root, &self.chunking).await?;
        if documents.is_empty() {
            return Err(RepoSearchError::NoDocuments(format!(
                "no indexable source files found in {repo}"
            )));
        }

        let total = documents.len();
        progress
            .report(40, &format!("Embedding {total} code chunks"))
            .await;
        let location = IndexLocation::new(&self.indexes_dir, repo, IndexKind::Code);
        let index = self
            .builder
            .build(documents, &location)
            .await?
            .ok_or_else(|| {
                RepoSearchError::NoDocuments(format!(
                    "none of the {total} code chunks in {repo} could be embedded"
                ))
            })?;

        progress.report(95, "Index persisted").await;
        info!(
            "Indexed {} of {} chunks for {}",
            index.len(),
            total,
            repo
        );
        Ok(PipelineOutcome {
            documents: total,
            indexed: index.len(),
        })
    }
}
