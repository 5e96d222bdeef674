// Request validation for the service facade

use tracing::warn;
use url::Url;

use crate::index::IndexKind;
use crate::{RepoSearchError, Result};

pub const MAX_QUERY_CHARS: usize = 2000;

/// Trimmed, non-empty query of bounded length
#[inline]
pub fn validate_query(query: &str) -> Result<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(RepoSearchError::Validation(
            "Search query must not be empty".to_string(),
        ));
    }
    let length = query.chars().count();
    if length > MAX_QUERY_CHARS {
        return Err(RepoSearchError::Validation(format!(
            "Search query is {length} characters long; the limit is {MAX_QUERY_CHARS}"
        )));
    }
    Ok(query)
}

#[inline]
pub fn validate_top_k(top_k: Option<usize>, max_top_k: usize) -> Result<Option<usize>> {
    match top_k {
        Some(k) if k == 0 || k > max_top_k => Err(RepoSearchError::Validation(format!(
            "top_k must be between 1 and {max_top_k}, got {k}"
        ))),
        other => Ok(other),
    }
}

#[inline]
pub fn validate_threshold(threshold: Option<f32>) -> Result<Option<f32>> {
    match threshold {
        Some(t) if !(0.0..=1.0).contains(&t) => Err(RepoSearchError::Validation(format!(
            "similarity_threshold must be between 0 and 1, got {t}"
        ))),
        other => Ok(other),
    }
}

/// Callback targets must be absolute http(s) URLs
#[inline]
pub fn validate_callback_url(callback_url: Option<String>) -> Result<Option<String>> {
    let Some(raw) = callback_url else {
        return Ok(None);
    };
    let url = Url::parse(raw.trim()).map_err(|e| {
        RepoSearchError::Validation(format!("Invalid callback URL '{raw}': {e}"))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RepoSearchError::Validation(format!(
            "Callback URL must use http or https, got '{}'",
            url.scheme()
        )));
    }
    Ok(Some(url.to_string()))
}

/// Unknown or missing search types fall back to code search
#[inline]
pub fn resolve_search_type(search_type: Option<&str>) -> IndexKind {
    match search_type.map(str::parse::<IndexKind>) {
        None => IndexKind::default(),
        Some(Ok(kind)) => kind,
        Some(Err(e)) => {
            warn!("{e}; searching code instead");
            IndexKind::Code
        }
    }
}
