// Similarity search over persisted vector indexes


use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::database::lancedb::{IndexLocation, VectorIndexStore};
use crate::embeddings::EmbeddingProvider;
use crate::index::{Document, IndexKind, Metadata, VectorIndex};
use crate::indexer::RepositoryRef;
use crate::{RepoSearchError, Result};

/// Threshold retried once when the requested one filters out every top result
pub const FALLBACK_SIMILARITY_THRESHOLD: f32 = 0.1;

const NORM_EPSILON: f32 = 1e-8;

/// One ranked match
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub document: Document,
    pub score: f32,
}

/// Brute-force cosine similarity over every vector in an index
#[derive(Clone)]
pub struct SimilaritySearch {
    provider: Arc<dyn EmbeddingProvider>,
}

impl SimilaritySearch {
    #[inline]
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    /// Embed `query` and rank `index` against it, best first
    #[inline]
    pub async fn search(
        &self,
        index: &VectorIndex,
        query: &str,
        top_k: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let query_vector = self.provider.embed_query(query).await?;
        if index.is_empty() {
            debug!("Searching an empty {} index", index.kind());
            return Ok(Vec::new());
        }
        if query_vector.len() != index.dimension() {
            return Err(RepoSearchError::Embedding(format!(
                "Query embedding has dimension {} but the index was built with {}. \
                 Hint: rebuild the index after changing the embedding model",
                query_vector.len(),
                index.dimension()
            )));
        }

        Ok(rank(index, &query_vector, top_k, similarity_threshold))
    }
}

/// Score every stored vector against `query_vector`, keep the best `top_k`, then filter
/// by `similarity_threshold`, relaxing it to the fallback once if nothing survives.
#[inline]
pub fn rank(
    index: &VectorIndex,
    query_vector: &[f32],
    top_k: usize,
    similarity_threshold: f32,
) -> Vec<SearchHit> {
    let query = normalize(query_vector);

    let mut scored: Vec<(f32, &Document)> = Vec::with_capacity(index.len());
    for position in 0..index.len() {
        let vector = match index.reconstruct(position) {
            Ok(vector) => vector,
            Err(e) => {
                warn!("Skipping unreadable vector: {}", e);
                continue;
            }
        };
        let Some(document) = index.id_at(position).and_then(|id| index.document(id)) else {
            warn!("Skipping vector at position {} with no document", position);
            continue;
        };
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt() + NORM_EPSILON;
        let score = query
            .iter()
            .zip(vector)
            .map(|(q, v)| q * (v / norm))
            .sum::<f32>();
        scored.push((score, document));
    }

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(top_k);

    let mut hits = filter_by(&scored, similarity_threshold);
    if hits.is_empty() && !scored.is_empty() && similarity_threshold > FALLBACK_SIMILARITY_THRESHOLD
    {
        info!(
            "No results above threshold {}, retrying with {}",
            similarity_threshold, FALLBACK_SIMILARITY_THRESHOLD
        );
        hits = filter_by(&scored, FALLBACK_SIMILARITY_THRESHOLD);
    }
    hits
}

fn filter_by(scored: &[(f32, &Document)], threshold: f32) -> Vec<SearchHit> {
    scored
        .iter()
        .filter(|(score, _)| *score >= threshold)
        .map(|(score, document)| SearchHit {
            document: (*document).clone(),
            score: *score,
        })
        .collect()
}

fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt() + NORM_EPSILON;
    vector.iter().map(|v| v / norm).collect()
}

/// One entry of a search response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResultItem {
    pub content: String,
    pub file_path: String,
    pub score: f32,
    pub metadata: Metadata,
}

impl From<SearchHit> for SearchResultItem {
    #[inline]
    fn from(hit: SearchHit) -> Self {
        let file_path = hit.document.file_path().unwrap_or_default().to_string();
        Self {
            content: hit.document.content,
            file_path,
            score: hit.score,
            metadata: hit.document.metadata,
        }
    }
}

/// Search response envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub repo_name: String,
    pub query: String,
    pub search_type: IndexKind,
    pub results: Vec<SearchResultItem>,
    pub total_results: usize,
    /// Seconds spent loading and ranking
    pub search_time: f64,
    pub result_generated_at: DateTime<Utc>,
}

/// Resolves a repository to its persisted index and ranks it
#[derive(Clone)]
pub struct SearchOrchestrator {
    indexes_dir: PathBuf,
    store: VectorIndexStore,
    engine: SimilaritySearch,
    defaults: SearchConfig,
}

impl SearchOrchestrator {
    #[inline]
    pub fn new(
        indexes_dir: PathBuf,
        store: VectorIndexStore,
        engine: SimilaritySearch,
        defaults: SearchConfig,
    ) -> Self {
        Self {
            indexes_dir,
            store,
            engine,
            defaults,
        }
    }

    #[inline]
    pub fn location(&self, repo: &RepositoryRef, kind: IndexKind) -> IndexLocation {
        IndexLocation::new(&self.indexes_dir, repo, kind)
    }

    /// Search the persisted `kind` index of `repo`. Never builds an index on demand.
    #[inline]
    pub async fn search(
        &self,
        repo: &RepositoryRef,
        query: &str,
        top_k: Option<usize>,
        similarity_threshold: Option<f32>,
        kind: IndexKind,
    ) -> Result<SearchResults> {
        let started = Instant::now();
        let top_k = top_k.unwrap_or(self.defaults.default_top_k);
        let threshold = similarity_threshold.unwrap_or(self.defaults.default_similarity_threshold);

        let location = self.location(repo, kind);
        let index = self
            .store
            .load(&location)
            .await
            .ok_or_else(|| RepoSearchError::IndexNotFound(repo.full_name()))?;

        let hits = self.engine.search(&index, query, top_k, threshold).await?;
        let results: Vec<SearchResultItem> = hits.into_iter().map(SearchResultItem::from).collect();
        debug!(
            "Search in {} for {:?} returned {} results",
            repo,
            query,
            results.len()
        );

        Ok(SearchResults {
            repo_name: repo.full_name(),
            query: query.to_string(),
            search_type: kind,
            total_results: results.len(),
            results,
            search_time: started.elapsed().as_secs_f64(),
            result_generated_at: Utc::now(),
        })
    }
}
