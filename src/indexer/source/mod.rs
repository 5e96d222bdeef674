// Repository sourcing: identity, checkout and file discovery

#[cfg(test)]
mod tests;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::embeddings::chunking::{ChunkingConfig, chunk_source};
use crate::index::Document;
use crate::{RepoSearchError, Result};

const MAX_OWNER_LEN: usize = 39;
const MAX_NAME_LEN: usize = 100;
const CLONE_TIMEOUT: Duration = Duration::from_secs(600);

/// Validated `owner/name` pair identifying a GitHub repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    owner: String,
    name: String,
}

impl RepositoryRef {
    #[inline]
    pub fn new(owner: &str, name: &str) -> Result<Self> {
        let valid_owner = !owner.is_empty()
            && owner.len() <= MAX_OWNER_LEN
            && owner.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid_owner {
            return Err(RepoSearchError::Validation(format!(
                "Invalid repository owner: '{owner}'"
            )));
        }

        let valid_name = !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && name != "."
            && name != ".."
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid_name {
            return Err(RepoSearchError::Validation(format!(
                "Invalid repository name: '{name}'"
            )));
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Parse `owner/repo`
    #[inline]
    pub fn parse_full_name(full_name: &str) -> Result<Self> {
        let trimmed = full_name.trim();
        match trimmed.split_once('/') {
            Some((owner, name)) if !name.contains('/') => Self::new(owner, name),
            _ => Err(RepoSearchError::Validation(format!(
                "Repository must be given as 'owner/repo', got '{trimmed}'"
            ))),
        }
    }

    /// Parse `https://github.com/owner/repo`, with optional `.git` suffix and trailing slash
    #[inline]
    pub fn parse_url(repo_url: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            RepoSearchError::Validation(format!("Invalid repository URL '{repo_url}': {reason}"))
        };

        let url = Url::parse(repo_url.trim()).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "https" {
            return Err(invalid("only https URLs are supported"));
        }
        match url.host_str() {
            Some("github.com" | "www.github.com") => {}
            _ => return Err(invalid("only github.com repositories are supported")),
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("query strings and fragments are not allowed"));
        }

        let path = url.path().trim_matches('/');
        let mut segments = path.split('/');
        let (Some(owner), Some(name), None) = (segments.next(), segments.next(), segments.next())
        else {
            return Err(invalid("expected https://github.com/<owner>/<repo>"));
        };
        let name = name.strip_suffix(".git").unwrap_or(name);

        Self::new(owner, name)
    }

    #[inline]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Canonical URL used when no explicit URL was supplied
    #[inline]
    pub fn github_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepositoryRef {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepositoryRef {
    type Err = RepoSearchError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        Self::parse_full_name(s)
    }
}

/// Where source files come from and which of them are indexed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Mirror root holding `<owner>/<repo>` checkouts; consulted before cloning
    pub local_root: Option<PathBuf>,
    /// File extensions (without dot) to index
    pub extensions: Vec<String>,
    /// Files larger than this are skipped
    pub max_file_size_bytes: u64,
}

impl Default for SourceConfig {
    #[inline]
    fn default() -> Self {
        Self {
            local_root: None,
            extensions: [
                "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "c", "h", "cc", "cpp",
                "hpp", "cs", "rb", "php", "swift", "scala", "sh",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            max_file_size_bytes: 512 * 1024,
        }
    }
}

/// One discovered source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the repository root, `/`-separated
    pub relative_path: String,
    pub content: String,
}

/// Resolves repositories to a working tree and turns it into documents
#[derive(Debug, Clone)]
pub struct RepositorySource {
    config: SourceConfig,
    checkouts_dir: PathBuf,
}

impl RepositorySource {
    #[inline]
    pub fn new(config: SourceConfig, checkouts_dir: PathBuf) -> Self {
        Self {
            config,
            checkouts_dir,
        }
    }

    /// Return a working tree for `repo`: the local mirror if present, else a fresh shallow clone
    #[inline]
    pub async fn prepare(&self, repo: &RepositoryRef, repo_url: &str) -> Result<PathBuf> {
        if let Some(root) = &self.config.local_root {
            let mirror = root.join(repo.owner()).join(repo.name());
            if mirror.is_dir() {
                info!("Using local mirror {} for {}", mirror.display(), repo);
                return Ok(mirror);
            }
            debug!("No local mirror for {} under {}", repo, root.display());
        }

        let destination = self.checkouts_dir.join(repo.owner()).join(repo.name());
        clone_repository(repo_url, &destination)
            .await
            .map_err(|e| RepoSearchError::Source(format!("{e:#}")))?;
        Ok(destination)
    }

    /// Walk `root` honouring .gitignore, keeping allowed extensions under the size limit
    #[inline]
    pub fn scan(&self, root: &Path) -> Result<Vec<SourceFile>> {
        if !root.is_dir() {
            return Err(RepoSearchError::Source(format!(
                "Repository root {} is not a directory",
                root.display()
            )));
        }

        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .require_git(false);

        let mut files = Vec::new();
        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to read entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let path = entry.path();
            if !self.is_allowed_extension(path) {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if meta.len() > self.config.max_file_size_bytes {
                    debug!(
                        "Skipping large file {} ({} bytes > {})",
                        path.display(),
                        meta.len(),
                        self.config.max_file_size_bytes
                    );
                    continue;
                }
            }

            let content = match std::fs::read(path) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        debug!("Skipping non-UTF-8 file {}", path.display());
                        continue;
                    }
                },
                Err(e) => {
                    warn!("Failed to read {}: {}", path.display(), e);
                    continue;
                }
            };

            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let relative_path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            files.push(SourceFile {
                relative_path,
                content,
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        info!("Found {} source files under {}", files.len(), root.display());
        Ok(files)
    }

    /// Scan and chunk `root` into embedding-ready documents
    #[inline]
    pub async fn collect_documents(
        &self,
        root: &Path,
        chunking: &ChunkingConfig,
    ) -> Result<Vec<Document>> {
        let source = self.clone();
        let root = root.to_path_buf();
        let chunking = chunking.clone();

        tokio::task::spawn_blocking(move || {
            let files = source.scan(&root)?;
            let documents: Vec<Document> = files
                .iter()
                .flat_map(|file| chunk_source(&file.relative_path, &file.content, &chunking))
                .map(|chunk| chunk.into_document())
                .collect();
            Ok::<_, RepoSearchError>(documents)
        })
        .await
        .context("Source scanning task panicked")?
    }

    fn is_allowed_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.config
                    .extensions
                    .iter()
                    .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
    }
}

async fn clone_repository(repo_url: &str, destination: &Path) -> anyhow::Result<()> {
    if tokio::fs::try_exists(destination).await.unwrap_or(false) {
        debug!("Removing stale checkout {}", destination.display());
        tokio::fs::remove_dir_all(destination)
            .await
            .with_context(|| format!("Failed to clear {}", destination.display()))?;
    }
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    info!("Cloning {} into {}", repo_url, destination.display());
    let output = tokio::time::timeout(
        CLONE_TIMEOUT,
        tokio::process::Command::new("git")
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg("--quiet")
            .arg(repo_url)
            .arg(destination)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output(),
    )
    .await
    .with_context(|| format!("Timed out cloning {repo_url}"))?
    .context("Failed to run git")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git clone of {} failed: {}", repo_url, stderr.trim());
    }
    Ok(())
}
