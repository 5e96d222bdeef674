
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{EmbeddedBatch, EmbeddingProvider};
use crate::RepoSearchError;
use crate::config::EmbeddingConfig;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    dimension: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff: Duration,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

/// Why a request gave up
#[derive(Debug, Clone, PartialEq, Eq)]
enum RequestFailure {
    /// The server itself is unusable; retrying other inputs cannot help
    Provider(String),
    /// Only this request failed; smaller requests may still succeed
    Request(String),
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let base_url = config
            .embedding_url()
            .context("Failed to generate embedding server URL from config")?;

        let timeout = if config.timeout_seconds == 0 {
            DEFAULT_TIMEOUT_SECONDS
        } else {
            config.timeout_seconds
        };
        let agent = build_agent(Duration::from_secs(timeout));

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            dimension: config.embedding_dimension as usize,
            agent,
            retry_attempts: if config.retry_attempts == 0 {
                DEFAULT_RETRY_ATTEMPTS
            } else {
                config.retry_attempts
            },
            backoff: DEFAULT_BACKOFF,
        })
    }

    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay before the first retry; doubles on every further attempt
    #[inline]
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Test connection to the server and verify model availability
    #[inline]
    pub fn health_check(&self) -> anyhow::Result<()> {
        debug!("Performing health check for {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;

        if models.iter().any(|m| m.name == self.model) {
            info!(
                "Health check passed for {} with model {}",
                self.base_url, self.model
            );
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available_models
            ))
        }
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .map_err(|failure| match failure {
                RequestFailure::Provider(message) | RequestFailure::Request(message) => {
                    anyhow::anyhow!(message)
                }
            })?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Embed texts in configured batch sizes, attributing failures to original indices
    #[inline]
    pub fn embed_documents_blocking(&self, texts: &[String]) -> crate::Result<EmbeddedBatch> {
        let mut result = EmbeddedBatch {
            vectors: Vec::with_capacity(texts.len()),
            failed_indices: Vec::new(),
        };
        if texts.is_empty() {
            return Ok(result);
        }

        debug!("Generating embeddings for {} texts", texts.len());
        let batch_size = self.batch_size as usize;

        for (batch_number, batch) in texts.chunks(batch_size).enumerate() {
            let offset = batch_number * batch_size;
            match self.embed_batch(batch) {
                Ok(vectors) => result.vectors.extend(vectors),
                Err(RequestFailure::Provider(message)) => {
                    return Err(RepoSearchError::Embedding(message));
                }
                Err(RequestFailure::Request(reason)) if batch.len() == 1 => {
                    warn!("Embedding failed for input {}: {}", offset, reason);
                    result.failed_indices.push(offset);
                }
                Err(RequestFailure::Request(reason)) => {
                    warn!(
                        "Batch of {} starting at {} failed ({}), retrying item by item",
                        batch.len(),
                        offset,
                        reason
                    );
                    for (i, text) in batch.iter().enumerate() {
                        match self.embed_batch(std::slice::from_ref(text)) {
                            Ok(vectors) => result.vectors.extend(vectors),
                            Err(RequestFailure::Provider(message)) => {
                                return Err(RepoSearchError::Embedding(message));
                            }
                            Err(RequestFailure::Request(reason)) => {
                                warn!("Embedding failed for input {}: {}", offset + i, reason);
                                result.failed_indices.push(offset + i);
                            }
                        }
                    }
                }
            }
        }

        debug!(
            "Generated {} embeddings, {} failed",
            result.vectors.len(),
            result.failed_indices.len()
        );
        Ok(result)
    }

    #[inline]
    pub fn embed_query_blocking(&self, text: &str) -> crate::Result<Vec<f32>> {
        match self.embed_batch(std::slice::from_ref(&text.to_string())) {
            Ok(mut vectors) => vectors
                .pop()
                .ok_or_else(|| RepoSearchError::Embedding("Empty embedding response".to_string())),
            Err(RequestFailure::Provider(message) | RequestFailure::Request(message)) => {
                Err(RepoSearchError::Embedding(message))
            }
        }
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RequestFailure> {
        let url = self
            .base_url
            .join("/api/embed")
            .map_err(|e| RequestFailure::Provider(format!("Invalid embedding URL: {e}")))?;

        let request = BatchEmbedRequest {
            model: &self.model,
            inputs: texts,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RequestFailure::Request(format!("Failed to serialize request: {e}")))?;

        let response_text = self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: BatchEmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| RequestFailure::Request(format!("Malformed embedding response: {e}")))?;

        if response.embeddings.len() != texts.len() {
            return Err(RequestFailure::Request(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String, RequestFailure>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let failure = match &error {
                        ureq::Error::StatusCode(401 | 403) => {
                            return Err(RequestFailure::Provider(format!(
                                "Embedding server at {} rejected the request (HTTP {}). \
                                 Hint: check the credentials or proxy in front of the server.",
                                self.base_url,
                                status_of(&error)
                            )));
                        }
                        ureq::Error::StatusCode(429) => {
                            return Err(RequestFailure::Provider(format!(
                                "Embedding server at {} is rate limiting requests (HTTP 429). \
                                 Hint: lower embedding.batch_size or retry later.",
                                self.base_url
                            )));
                        }
                        ureq::Error::StatusCode(status) if *status >= 500 => {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, self.retry_attempts
                            );
                            RequestFailure::Request(format!("Server error: HTTP {status}"))
                        }
                        ureq::Error::StatusCode(status) => {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(RequestFailure::Request(format!(
                                "Client error: HTTP {status}"
                            )));
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            RequestFailure::Provider(format!(
                                "Could not reach embedding server at {}: {}. \
                                 Hint: make sure Ollama is running and embedding.host/embedding.port \
                                 in config.toml point at it.",
                                self.base_url, error
                            ))
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            return Err(RequestFailure::Request(format!(
                                "Non-retryable error: {error}"
                            )));
                        }
                    };

                    last_error = Some(failure);

                    if attempt < self.retry_attempts {
                        let delay = self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| {
            RequestFailure::Request("Request failed after retries".to_string())
        }))
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

fn status_of(error: &ureq::Error) -> u16 {
    match error {
        ureq::Error::StatusCode(status) => *status,
        _ => 0,
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_documents(&self, texts: &[String]) -> crate::Result<EmbeddedBatch> {
        let client = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.embed_documents_blocking(&texts))
            .await
            .context("Embedding task panicked")?
    }

    async fn embed_query(&self, text: &str) -> crate::Result<Vec<f32>> {
        let client = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || client.embed_query_blocking(&text))
            .await
            .context("Embedding task panicked")?
    }
}
