// Embedding providers and source chunking

pub mod chunking;
pub mod hashing;
pub mod ollama;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EmbeddingBackend, EmbeddingConfig};

pub use chunking::{ChunkingConfig, CodeChunk, chunk_source, estimate_token_count};
pub use hashing::HashingEmbedder;
pub use ollama::OllamaClient;

/// Result of embedding a batch of documents.
///
/// `vectors` holds one vector per input that succeeded, in input order;
/// `failed_indices` lists the original positions of inputs that did not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedBatch {
    pub vectors: Vec<Vec<f32>>,
    pub failed_indices: Vec<usize>,
}

impl EmbeddedBatch {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Converts text into fixed-dimension vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension every returned vector is expected to have
    fn dimension(&self) -> usize;

    /// Embed many texts. Per-item failures are reported in `failed_indices`;
    /// an `Err` means the provider itself is unusable.
    async fn embed_documents(&self, texts: &[String]) -> crate::Result<EmbeddedBatch>;

    async fn embed_query(&self, text: &str) -> crate::Result<Vec<f32>>;
}

/// Build the provider selected by `config.backend`
#[inline]
pub fn provider_from_config(
    config: &EmbeddingConfig,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.backend {
        EmbeddingBackend::Ollama => Arc::new(OllamaClient::new(config)?),
        EmbeddingBackend::Hashing => {
            Arc::new(HashingEmbedder::new(config.embedding_dimension as usize))
        }
    };
    Ok(provider)
}
