use super::*;
use crate::embeddings::{EmbeddedBatch, HashingEmbedder};
use std::fs;
use tempfile::TempDir;

const DIMENSION: usize = 8;

/// Provider whose per-item behaviour is scripted by document content
struct ScriptedProvider {
    /// Contents that fail to embed
    failing: Vec<&'static str>,
    /// Contents that come back with the wrong dimension
    wrong_dimension: Vec<&'static str>,
    /// Drop this many vectors from the end without reporting them
    swallow: usize,
    /// Fail the whole batch with this message
    provider_error: Option<&'static str>,
}

impl ScriptedProvider {
    fn healthy() -> Self {
        Self {
            failing: Vec::new(),
            wrong_dimension: Vec::new(),
            swallow: 0,
            provider_error: None,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<EmbeddedBatch> {
        if let Some(message) = self.provider_error {
            return Err(RepoSearchError::Embedding(message.to_string()));
        }
        let embedder = HashingEmbedder::new(DIMENSION);
        let mut batch = EmbeddedBatch::default();
        for (i, text) in texts.iter().enumerate() {
            if self.failing.contains(&text.as_str()) {
                batch.failed_indices.push(i);
            } else if self.wrong_dimension.contains(&text.as_str()) {
                batch.vectors.push(vec![1.0; DIMENSION + 1]);
            } else {
                batch.vectors.push(embedder.embed(text));
            }
        }
        let keep = batch.vectors.len().saturating_sub(self.swallow);
        batch.vectors.truncate(keep);
        Ok(batch)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(HashingEmbedder::new(DIMENSION).embed(text))
    }
}

fn documents(contents: &[&str]) -> Vec<Document> {
    contents
        .iter()
        .enumerate()
        .map(|(i, content)| {
            Document::new(*content).with_metadata("file_path", format!("src/file_{i}.py"))
        })
        .collect()
}

fn test_location(temp_dir: &TempDir) -> IndexLocation {
    let repo = RepositoryRef::new("octo", "widgets").expect("valid repository");
    IndexLocation::new(&temp_dir.path().join("indexes"), &repo, IndexKind::Code)
}

fn builder(provider: ScriptedProvider) -> IndexBuilder {
    IndexBuilder::new(Arc::new(provider), VectorIndexStore::new())
}

#[tokio::test]
async fn empty_input_builds_nothing() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = test_location(&temp_dir);

    let result = builder(ScriptedProvider::healthy())
        .build(Vec::new(), &location)
        .await
        .expect("empty input is not an error");

    assert!(result.is_none());
    assert!(!VectorIndexStore::new().exists(&location).await);
}

#[tokio::test]
async fn built_index_is_persisted_and_reloadable() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = test_location(&temp_dir);
    let builder = builder(ScriptedProvider::healthy());

    let index = builder
        .build(documents(&["def foo(): pass", "def bar(): return 1"]), &location)
        .await
        .expect("build should succeed")
        .expect("index should be produced");

    assert_eq!(index.len(), 2);
    assert_eq!(index.docstore_len(), index.len());
    assert_eq!(index.dimension(), DIMENSION);

    let loaded = builder
        .store()
        .load(&location)
        .await
        .expect("persisted index should load");
    assert_eq!(loaded.ids(), index.ids());
    for id in index.ids() {
        assert_eq!(loaded.document(id), index.document(id));
    }
}

#[tokio::test]
async fn failed_documents_are_dropped_without_shifting() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = test_location(&temp_dir);
    let embedder = HashingEmbedder::new(DIMENSION);

    let index = builder(ScriptedProvider {
        failing: vec!["beta body"],
        ..ScriptedProvider::healthy()
    })
    .build(documents(&["alpha body", "beta body", "gamma body"]), &location)
    .await
    .expect("partial failure is absorbed")
    .expect("survivors are indexed");

    assert_eq!(index.len(), 2);
    assert_eq!(index.docstore_len(), 2);
    for (_, vector, document) in index.entries() {
        let document = document.expect("every vector has a document");
        assert_ne!(document.content, "beta body");
        assert_eq!(vector, embedder.embed(&document.content).as_slice());
    }
}

#[tokio::test]
async fn all_failures_build_nothing() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = test_location(&temp_dir);

    let result = builder(ScriptedProvider {
        failing: vec!["one", "two"],
        ..ScriptedProvider::healthy()
    })
    .build(documents(&["one", "two"]), &location)
    .await
    .expect("all-fail is not an error");

    assert!(result.is_none());
    assert!(!VectorIndexStore::new().exists(&location).await);
}

#[tokio::test]
async fn unaccounted_vectors_fail_the_build() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = test_location(&temp_dir);

    let error = builder(ScriptedProvider {
        swallow: 1,
        ..ScriptedProvider::healthy()
    })
    .build(documents(&["one", "two", "three"]), &location)
    .await
    .expect_err("count mismatch must fail");

    assert_eq!(error.error_code(), "INDEXING_FAILED");
    assert!(!VectorIndexStore::new().exists(&location).await);
}

#[tokio::test]
async fn wrong_dimension_vectors_are_dropped() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = test_location(&temp_dir);

    let index = builder(ScriptedProvider {
        wrong_dimension: vec!["odd one"],
        ..ScriptedProvider::healthy()
    })
    .build(documents(&["good one", "odd one"]), &location)
    .await
    .expect("build should succeed")
    .expect("index should be produced");

    assert_eq!(index.len(), 1);
    assert!(index.entries().all(|(_, vector, _)| vector.len() == DIMENSION));
}

#[tokio::test]
async fn dimension_mismatch_on_every_vector_is_an_embedding_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = test_location(&temp_dir);

    let error = builder(ScriptedProvider {
        wrong_dimension: vec!["one", "two"],
        ..ScriptedProvider::healthy()
    })
    .build(documents(&["one", "two"]), &location)
    .await
    .expect_err("model and config disagree on dimension");

    assert_eq!(error.error_code(), "EMBEDDING_FAILED");
    let message = error.to_string();
    assert!(message.contains(&format!("{}-dimensional", DIMENSION + 1)));
    assert!(message.contains("embedding.embedding_dimension"));
    assert!(!VectorIndexStore::new().exists(&location).await);
}

#[tokio::test]
async fn provider_errors_carry_a_hint() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = test_location(&temp_dir);

    let error = builder(ScriptedProvider {
        provider_error: Some("connection refused"),
        ..ScriptedProvider::healthy()
    })
    .build(documents(&["one"]), &location)
    .await
    .expect_err("provider failure must surface");

    assert_eq!(error.error_code(), "EMBEDDING_FAILED");
    let message = error.to_string();
    assert!(message.contains("connection refused"));
    assert!(message.contains("Hint:"));
}

fn mirror_pipeline(temp_dir: &TempDir) -> RepositoryPipeline {
    let mirrors = temp_dir.path().join("mirrors");
    let source = RepositorySource::new(
        SourceConfig {
            local_root: Some(mirrors),
            ..SourceConfig::default()
        },
        temp_dir.path().join("checkouts"),
    );
    RepositoryPipeline::new(
        source,
        ChunkingConfig {
            min_chars: 1,
            ..ChunkingConfig::default()
        },
        IndexBuilder::new(Arc::new(HashingEmbedder::new(64)), VectorIndexStore::new()),
        temp_dir.path().join("indexes"),
    )
}

#[tokio::test]
async fn pipeline_indexes_local_mirror() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let repo_dir = temp_dir.path().join("mirrors").join("octo").join("widgets");
    fs::create_dir_all(repo_dir.join("src")).expect("should create mirror");
    fs::write(repo_dir.join("src/foo.py"), "def foo():\n    pass\n").expect("write");
    fs::write(repo_dir.join("src/bar.py"), "def bar():\n    return 1\n").expect("write");

    let repo = RepositoryRef::new("octo", "widgets").expect("valid repository");
    let request = IndexingRequest {
        repo_url: repo.github_url(),
        repo: repo.clone(),
    };
    let outcome = mirror_pipeline(&temp_dir)
        .run(&request, &ProgressReporter::detached(repo.full_name()))
        .await
        .expect("pipeline should succeed");

    assert_eq!(outcome.documents, 2);
    assert_eq!(outcome.indexed, 2);
    let location = IndexLocation::new(&temp_dir.path().join("indexes"), &repo, IndexKind::Code);
    assert!(VectorIndexStore::new().exists(&location).await);
}

#[tokio::test]
async fn pipeline_without_source_files_reports_no_documents() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let repo_dir = temp_dir.path().join("mirrors").join("octo").join("empty");
    fs::create_dir_all(&repo_dir).expect("should create mirror");
    fs::write(repo_dir.join("README.md"), "# nothing to index\n").expect("write");

    let repo = RepositoryRef::new("octo", "empty").expect("valid repository");
    let request = IndexingRequest {
        repo_url: repo.github_url(),
        repo: repo.clone(),
    };
    let error = mirror_pipeline(&temp_dir)
        .run(&request, &ProgressReporter::detached(repo.full_name()))
        .await
        .expect_err("no source files");

    assert_eq!(error.error_code(), "NO_DOCUMENTS");
}
