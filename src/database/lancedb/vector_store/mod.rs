
use super::{
    CURRENT_POINTER, DOCSTORE_FILE, IndexLocation, VECTOR_TABLE, is_generation_name,
    new_generation_name,
};
use crate::RepoSearchError;
use crate::index::{Document, IndexKind, IndexStats, VectorIndex};
use anyhow::{Context, anyhow, bail};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Generations kept on disk after a save, the live one included
const RETAINED_GENERATIONS: usize = 2;

/// Docstore sidecar written next to the LanceDB table
#[derive(Debug, Serialize, Deserialize)]
struct DocstoreFile {
    kind: IndexKind,
    dimension: usize,
    created_at: DateTime<Utc>,
    entries: HashMap<String, Document>,
}

/// Persists and reloads vector indexes as generation directories
#[derive(Debug, Clone)]
pub struct VectorIndexStore {
    retained_generations: usize,
}

impl Default for VectorIndexStore {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndexStore {
    #[inline]
    pub fn new() -> Self {
        Self {
            retained_generations: RETAINED_GENERATIONS,
        }
    }

    /// Write `index` as a fresh generation and make it live.
    ///
    /// Readers that already resolved the previous generation keep reading it; the
    /// pointer swap is a rename, so a reader sees either the old or the new one.
    #[inline]
    pub async fn save(
        &self,
        location: &IndexLocation,
        index: &VectorIndex,
    ) -> Result<(), RepoSearchError> {
        let generation = new_generation_name();
        let generation_dir = location.generation_dir(&generation);

        if let Err(e) = self.write_generation(&generation_dir, index).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&generation_dir).await {
                debug!(
                    "Could not remove partial generation {}: {}",
                    generation_dir.display(),
                    cleanup
                );
            }
            return Err(RepoSearchError::Persist(format!(
                "{} ({}): {e:#}",
                location.repo_name(),
                location.kind()
            )));
        }

        swap_current_pointer(location, &generation)
            .await
            .map_err(|e| RepoSearchError::Persist(format!("{e:#}")))?;

        info!(
            "Persisted {} index for {} ({} vectors) as {}",
            location.kind(),
            location.repo_name(),
            index.len(),
            generation
        );

        self.prune_generations(location, &generation).await;
        Ok(())
    }

    /// Reload the live generation. `None` means nothing usable is on disk.
    #[inline]
    pub async fn load(&self, location: &IndexLocation) -> Option<VectorIndex> {
        let pointer = location.current_pointer();
        let generation = match tokio::fs::read_to_string(&pointer).await {
            Ok(contents) => contents.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No persisted index at {}", location.path().display());
                return None;
            }
            Err(e) => {
                warn!("Could not read {}: {}", pointer.display(), e);
                return None;
            }
        };

        if !is_generation_name(&generation) {
            warn!(
                "Ignoring malformed index pointer in {}: {:?}",
                pointer.display(),
                generation
            );
            return None;
        }

        match read_generation(&location.generation_dir(&generation)).await {
            Ok(index) => {
                debug!(
                    "Loaded {} index for {} ({} vectors)",
                    index.kind(),
                    location.repo_name(),
                    index.len()
                );
                Some(index)
            }
            Err(e) => {
                warn!(
                    "Persisted index for {} is unreadable, treating as absent: {:#}",
                    location.repo_name(),
                    e
                );
                None
            }
        }
    }

    /// Remove every generation of the index. Returns false if nothing existed or removal failed.
    #[inline]
    pub async fn delete(&self, location: &IndexLocation) -> bool {
        let path = location.path();
        match tokio::fs::metadata(path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
            Err(e) => {
                warn!("Could not inspect {}: {}", path.display(), e);
                return false;
            }
        }

        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {
                info!(
                    "Deleted {} index for {}",
                    location.kind(),
                    location.repo_name()
                );
                remove_empty_parents(path).await;
                true
            }
            Err(e) => {
                warn!("Failed to delete index at {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Whether a live generation pointer exists for `location`
    #[inline]
    pub async fn exists(&self, location: &IndexLocation) -> bool {
        tokio::fs::try_exists(location.current_pointer())
            .await
            .unwrap_or(false)
    }

    #[inline]
    pub fn stats(index: &VectorIndex) -> IndexStats {
        index.stats()
    }

    async fn write_generation(
        &self,
        generation_dir: &Path,
        index: &VectorIndex,
    ) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(generation_dir)
            .await
            .with_context(|| format!("Failed to create {}", generation_dir.display()))?;

        let uri = generation_dir.to_string_lossy().to_string();
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .context("Failed to open LanceDB dataset")?;

        let schema = create_schema(index.dimension())?;
        let table = connection
            .create_empty_table(VECTOR_TABLE, schema.clone())
            .execute()
            .await
            .context("Failed to create vector table")?;

        if !index.is_empty() {
            let batch = create_record_batch(index, schema.clone())?;
            let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
            table
                .add(reader)
                .execute()
                .await
                .context("Failed to insert vectors")?;
        }

        let docstore = DocstoreFile {
            kind: index.kind(),
            dimension: index.dimension(),
            created_at: Utc::now(),
            entries: index
                .entries()
                .filter_map(|(id, _, document)| document.map(|doc| (id.to_string(), doc.clone())))
                .collect(),
        };
        let json = serde_json::to_vec(&docstore).context("Failed to serialize docstore")?;
        tokio::fs::write(generation_dir.join(DOCSTORE_FILE), json)
            .await
            .context("Failed to write docstore")?;

        Ok(())
    }

    async fn prune_generations(&self, location: &IndexLocation, live: &str) {
        let mut generations = match list_generations(location.path()).await {
            Ok(generations) => generations,
            Err(e) => {
                debug!("Skipping generation pruning: {:#}", e);
                return;
            }
        };
        generations.sort();

        let excess = generations.len().saturating_sub(self.retained_generations);
        for generation in generations.into_iter().take(excess) {
            if generation == live {
                continue;
            }
            let dir = location.generation_dir(&generation);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!("Pruned old generation {}", dir.display()),
                Err(e) => warn!("Failed to prune {}: {}", dir.display(), e),
            }
        }
    }
}

/// Create schema with the specified vector dimension
fn create_schema(dimension: usize) -> anyhow::Result<Arc<Schema>> {
    let list_size = i32::try_from(dimension).context("Vector dimension too large")?;
    Ok(Arc::new(Schema::new(vec![
        Field::new("position", DataType::UInt32, false),
        Field::new("doc_id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                list_size,
            ),
            false,
        ),
    ])))
}

fn create_record_batch(index: &VectorIndex, schema: Arc<Schema>) -> anyhow::Result<RecordBatch> {
    let dimension = index.dimension();
    let list_size = i32::try_from(dimension).context("Vector dimension too large")?;

    let mut positions = Vec::with_capacity(index.len());
    let mut doc_ids = Vec::with_capacity(index.len());
    let mut flat_values = Vec::with_capacity(index.len() * dimension);
    for (position, (id, vector, _)) in index.entries().enumerate() {
        positions.push(u32::try_from(position).context("Index holds too many vectors")?);
        doc_ids.push(id);
        flat_values.extend_from_slice(vector);
    }

    let field = Arc::new(Field::new("item", DataType::Float32, true));
    let vector_array = FixedSizeListArray::try_new(
        field,
        list_size,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .context("Failed to create vector array")?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(UInt32Array::from(positions)),
        Arc::new(StringArray::from(doc_ids)),
        Arc::new(vector_array),
    ];

    RecordBatch::try_new(schema, arrays).context("Failed to create record batch")
}

async fn read_generation(generation_dir: &Path) -> anyhow::Result<VectorIndex> {
    let docstore_path = generation_dir.join(DOCSTORE_FILE);
    let raw = tokio::fs::read(&docstore_path)
        .await
        .with_context(|| format!("Failed to read {}", docstore_path.display()))?;
    let docstore: DocstoreFile =
        serde_json::from_slice(&raw).context("Failed to parse docstore")?;

    let uri = generation_dir.to_string_lossy().to_string();
    let connection = lancedb::connect(&uri)
        .execute()
        .await
        .context("Failed to open LanceDB dataset")?;
    let table = connection
        .open_table(VECTOR_TABLE)
        .execute()
        .await
        .context("Failed to open vector table")?;

    let count = table
        .count_rows(None)
        .await
        .context("Failed to count vectors")?;

    let mut rows: Vec<(u32, String, Vec<f32>)> = Vec::with_capacity(count);
    if count > 0 {
        let mut stream = table
            .query()
            .limit(count)
            .execute()
            .await
            .context("Failed to scan vector table")?;

        while let Some(batch) = stream
            .try_next()
            .await
            .context("Failed to read vector stream")?
        {
            parse_vector_batch(&batch, docstore.dimension, &mut rows)?;
        }
    }

    if rows.len() != count {
        bail!("Expected {} vectors, read {}", count, rows.len());
    }
    rows.sort_by_key(|(position, _, _)| *position);

    let mut ids = Vec::with_capacity(rows.len());
    let mut vectors = Vec::with_capacity(rows.len() * docstore.dimension);
    for (_, id, vector) in rows {
        ids.push(id);
        vectors.extend(vector);
    }

    VectorIndex::from_parts(
        docstore.kind,
        docstore.dimension,
        ids,
        vectors,
        docstore.entries,
    )
    .context("Persisted index is inconsistent")
}

fn parse_vector_batch(
    batch: &RecordBatch,
    dimension: usize,
    rows: &mut Vec<(u32, String, Vec<f32>)>,
) -> anyhow::Result<()> {
    let positions = batch
        .column_by_name("position")
        .ok_or_else(|| anyhow!("Missing position column"))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| anyhow!("Invalid position column type"))?;

    let doc_ids = batch
        .column_by_name("doc_id")
        .ok_or_else(|| anyhow!("Missing doc_id column"))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow!("Invalid doc_id column type"))?;

    let vectors = batch
        .column_by_name("vector")
        .ok_or_else(|| anyhow!("Missing vector column"))?
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .ok_or_else(|| anyhow!("Invalid vector column type"))?;

    if usize::try_from(vectors.value_length()).ok() != Some(dimension) {
        bail!(
            "Vector column has dimension {}, docstore says {}",
            vectors.value_length(),
            dimension
        );
    }

    for row in 0..batch.num_rows() {
        let values = vectors.value(row);
        let values = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| anyhow!("Invalid vector element type"))?;
        // Null elements surface as NaN so the search engine can skip the row
        let vector = (0..values.len())
            .map(|i| {
                if values.is_null(i) {
                    f32::NAN
                } else {
                    values.value(i)
                }
            })
            .collect();
        rows.push((positions.value(row), doc_ids.value(row).to_string(), vector));
    }

    Ok(())
}

async fn swap_current_pointer(location: &IndexLocation, generation: &str) -> anyhow::Result<()> {
    let pointer = location.current_pointer();
    let temp = location
        .path()
        .join(format!("{CURRENT_POINTER}.{}.tmp", uuid::Uuid::new_v4().simple()));

    tokio::fs::write(&temp, generation)
        .await
        .with_context(|| format!("Failed to write {}", temp.display()))?;
    if let Err(e) = tokio::fs::rename(&temp, &pointer).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e).with_context(|| format!("Failed to swap {}", pointer.display()));
    }
    Ok(())
}

async fn list_generations(root: &Path) -> anyhow::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(root)
        .await
        .with_context(|| format!("Failed to list {}", root.display()))?;

    let mut generations = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_generation_name(&name) && entry.file_type().await?.is_dir() {
            generations.push(name);
        }
    }
    Ok(generations)
}

/// Drop now-empty `<repo>` and `<owner>` directories above a deleted index
async fn remove_empty_parents(path: &Path) {
    let mut current: Option<PathBuf> = path.parent().map(Path::to_path_buf);
    for _ in 0..2 {
        let Some(dir) = current else { break };
        // remove_dir only succeeds on empty directories
        if tokio::fs::remove_dir(&dir).await.is_err() {
            break;
        }
        current = dir.parent().map(Path::to_path_buf);
    }
}
