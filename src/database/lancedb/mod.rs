// LanceDB-backed persistence for vector indexes
// Each (repository, kind) pair owns a directory of immutable generations plus a CURRENT pointer


pub mod vector_store;

use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::index::IndexKind;
use crate::indexer::source::RepositoryRef;

pub use vector_store::VectorIndexStore;

/// Name of the pointer file naming the live generation
pub const CURRENT_POINTER: &str = "CURRENT";
/// Prefix shared by every generation directory
pub const GENERATION_PREFIX: &str = "gen-";
/// LanceDB table holding the vectors of one generation
pub const VECTOR_TABLE: &str = "vectors";
/// Sidecar file holding the docstore of one generation
pub const DOCSTORE_FILE: &str = "docstore.json";

/// Deterministic on-disk location of one persisted index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLocation {
    root: PathBuf,
    repo_name: String,
    kind: IndexKind,
}

impl IndexLocation {
    /// `<indexes_dir>/<owner>/<repo>/<kind>`
    #[inline]
    pub fn new(indexes_dir: &Path, repo: &RepositoryRef, kind: IndexKind) -> Self {
        let root = indexes_dir
            .join(repo.owner())
            .join(repo.name())
            .join(kind.as_str());
        Self {
            root,
            repo_name: repo.full_name(),
            kind,
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    #[inline]
    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    #[inline]
    pub fn current_pointer(&self) -> PathBuf {
        self.root.join(CURRENT_POINTER)
    }

    #[inline]
    pub fn generation_dir(&self, generation: &str) -> PathBuf {
        self.root.join(generation)
    }
}

/// Fresh generation name; lexicographic order follows creation time
#[inline]
pub fn new_generation_name() -> String {
    format!(
        "{GENERATION_PREFIX}{:013}-{}",
        Utc::now().timestamp_millis().max(0),
        Uuid::new_v4().simple()
    )
}

/// Whether `name` looks like a generation directory we created
#[inline]
pub fn is_generation_name(name: &str) -> bool {
    name.strip_prefix(GENERATION_PREFIX).is_some_and(|rest| {
        !rest.is_empty()
            && rest
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
