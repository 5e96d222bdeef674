use thiserror::Error;

pub type Result<T> = std::result::Result<T, RepoSearchError>;

#[derive(Error, Debug)]
pub enum RepoSearchError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Indexing error: {0}")]
    Indexing(String),

    #[error("Failed to persist index: {0}")]
    Persist(String),

    #[error("No indexable documents: {0}")]
    NoDocuments(String),

    #[error("No index found for repository '{0}'")]
    IndexNotFound(String),

    #[error("No indexing record for repository '{0}' (not_indexed)")]
    NotIndexed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Repository source error: {0}")]
    Source(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RepoSearchError {
    /// Wrap a job-store failure, keeping the whole context chain
    #[inline]
    pub fn database(error: anyhow::Error) -> Self {
        Self::Database(format!("{error:#}"))
    }

    /// Stable machine-readable code recorded on failed jobs and returned to callers
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Embedding(_) => "EMBEDDING_FAILED",
            Self::Indexing(_) => "INDEXING_FAILED",
            Self::Persist(_) => "PERSIST_FAILED",
            Self::NoDocuments(_) => "NO_DOCUMENTS",
            Self::IndexNotFound(_) => "INDEX_NOT_FOUND",
            Self::NotIndexed(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Source(_) => "SOURCE_FAILED",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) | Self::Io(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error is part of the documented taxonomy. Anything else is an
    /// internal fault whose details stay in the logs.
    #[inline]
    pub fn is_expected(&self) -> bool {
        !matches!(self, Self::Database(_) | Self::Io(_) | Self::Other(_))
    }

    /// Message safe to hand to an external caller
    #[inline]
    pub fn public_message(&self) -> String {
        if self.is_expected() {
            self.to_string()
        } else {
            "An internal error occurred while processing the request".to_string()
        }
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod index;
pub mod indexer;
pub mod search;
pub mod service;
