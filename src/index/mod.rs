// In-memory vector index model
// A VectorIndex pairs an ordered vector set with its docstore and is assembled once


use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Scalar metadata value attached to a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    #[inline]
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    #[inline]
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    #[inline]
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for MetadataValue {
    #[inline]
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<bool> for MetadataValue {
    #[inline]
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for MetadataValue {
    #[inline]
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// A unit of source content to be embedded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    #[inline]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Source file path recorded by the chunker, if any
    #[inline]
    pub fn file_path(&self) -> Option<&str> {
        self.metadata.get("file_path").and_then(MetadataValue::as_str)
    }
}

/// Kind of content an index was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    Code,
}

impl IndexKind {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
        }
    }
}

impl fmt::Display for IndexKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = VectorIndexError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "code" => Ok(Self::Code),
            other => Err(VectorIndexError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum VectorIndexError {
    #[error("Unknown index kind: {0}")]
    UnknownKind(String),
    #[error("Invalid vector dimension: expected {expected}, got {actual} for '{id}'")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },
    #[error("Index dimension must be greater than zero")]
    ZeroDimension,
    #[error("Vector buffer holds {values} values which is not {count} vectors of dimension {dimension}")]
    BufferLength {
        values: usize,
        count: usize,
        dimension: usize,
    },
    #[error("Duplicate internal id: {0}")]
    DuplicateId(String),
    #[error("Vector '{0}' has no docstore entry")]
    MissingDocument(String),
    #[error("Docstore entry '{0}' has no vector")]
    OrphanDocument(String),
    #[error("Vector position {position} out of range (index holds {len})")]
    OutOfRange { position: usize, len: usize },
    #[error("Vector at position {0} contains non-finite values")]
    NonFinite(usize),
}

/// Immutable vector index: ordered (id, vector) pairs plus the docstore
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    kind: IndexKind,
    dimension: usize,
    ids: Vec<String>,
    vectors: Vec<f32>,
    docstore: HashMap<String, Document>,
}

impl VectorIndex {
    /// Assemble an index from embedded documents, assigning fresh internal ids
    #[inline]
    pub fn new(
        kind: IndexKind,
        dimension: usize,
        entries: Vec<(Document, Vec<f32>)>,
    ) -> Result<Self, VectorIndexError> {
        if dimension == 0 {
            return Err(VectorIndexError::ZeroDimension);
        }

        let mut ids = Vec::with_capacity(entries.len());
        let mut vectors = Vec::with_capacity(entries.len() * dimension);
        let mut docstore = HashMap::with_capacity(entries.len());

        for (document, vector) in entries {
            let id = Uuid::new_v4().to_string();
            if vector.len() != dimension {
                return Err(VectorIndexError::DimensionMismatch {
                    id,
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            vectors.extend_from_slice(&vector);
            docstore.insert(id.clone(), document);
            ids.push(id);
        }

        Ok(Self {
            kind,
            dimension,
            ids,
            vectors,
            docstore,
        })
    }

    /// Reassemble an index from persisted parts, enforcing the id/docstore invariant
    #[inline]
    pub fn from_parts(
        kind: IndexKind,
        dimension: usize,
        ids: Vec<String>,
        vectors: Vec<f32>,
        docstore: HashMap<String, Document>,
    ) -> Result<Self, VectorIndexError> {
        if dimension == 0 {
            return Err(VectorIndexError::ZeroDimension);
        }
        if vectors.len() != ids.len() * dimension {
            return Err(VectorIndexError::BufferLength {
                values: vectors.len(),
                count: ids.len(),
                dimension,
            });
        }

        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            if !seen.insert(id.as_str()) {
                return Err(VectorIndexError::DuplicateId(id.clone()));
            }
            if !docstore.contains_key(id) {
                return Err(VectorIndexError::MissingDocument(id.clone()));
            }
        }
        if let Some(orphan) = docstore.keys().find(|id| !seen.contains(id.as_str())) {
            return Err(VectorIndexError::OrphanDocument(orphan.clone()));
        }

        Ok(Self {
            kind,
            dimension,
            ids,
            vectors,
            docstore,
        })
    }

    #[inline]
    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[inline]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    #[inline]
    pub fn id_at(&self, position: usize) -> Option<&str> {
        self.ids.get(position).map(String::as_str)
    }

    #[inline]
    pub fn document(&self, id: &str) -> Option<&Document> {
        self.docstore.get(id)
    }

    #[inline]
    pub fn docstore_len(&self) -> usize {
        self.docstore.len()
    }

    /// Iterate (id, vector, document) in index order
    #[inline]
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[f32], Option<&Document>)> {
        self.ids
            .iter()
            .zip(self.vectors.chunks_exact(self.dimension))
            .map(|(id, vector)| (id.as_str(), vector, self.docstore.get(id)))
    }

    /// Read back the stored vector at `position`
    #[inline]
    pub fn reconstruct(&self, position: usize) -> Result<&[f32], VectorIndexError> {
        if position >= self.ids.len() {
            return Err(VectorIndexError::OutOfRange {
                position,
                len: self.ids.len(),
            });
        }
        let start = position * self.dimension;
        let vector = &self.vectors[start..start + self.dimension];
        if vector.iter().any(|value| !value.is_finite()) {
            return Err(VectorIndexError::NonFinite(position));
        }
        Ok(vector)
    }

    #[inline]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            kind: self.kind,
            total_vectors: self.ids.len(),
            dimension: self.dimension,
        }
    }
}

/// Diagnostic summary of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub kind: IndexKind,
    pub total_vectors: usize,
    pub dimension: usize,
}
