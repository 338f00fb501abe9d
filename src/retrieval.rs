//! Retrieval backends and their on-disk artifacts.
//!
//! Two implementations of [`Retriever`] are chosen once, at construction:
//!
//! - [`VectorRetriever`] embeds segments in fixed-size batches, builds a
//!   [`FlatIndex`] per batch and merges them into one index. Persisted as
//!   `index.json` (metadata + segments) and `vectors.bin` (little-endian
//!   `f32` rows) inside the index directory.
//! - [`KeywordRetriever`] is the degraded mode used when no embedder is
//!   available. Persisted as a JSON array of keyword entries.
//!
//! Both load their artifact lazily on the first query.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use normcheck_core::embedding::{blob_to_vec, vec_to_blob, Embedder};
use normcheck_core::index::{FlatIndex, KeywordEntry, KeywordTable};
use normcheck_core::manifest::RetrievalMode;
use normcheck_core::models::{Segment, SegmentHit};

use crate::config::Config;
use crate::json_file;

pub const INDEX_FILE: &str = "index.json";
pub const VECTORS_FILE: &str = "vectors.bin";
const INDEX_VERSION: u32 = 1;

#[async_trait]
pub trait Retriever: Send + Sync {
    fn mode(&self) -> RetrievalMode;

    /// Replace the stored artifact with one built from `segments`.
    /// Returns the number of segments indexed.
    async fn rebuild(&self, segments: Vec<Segment>) -> Result<usize>;

    /// Best `k` segments for `query`. Empty when nothing is indexed.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SegmentHit>>;

    /// Whether the persisted artifact exists on disk.
    fn artifact_present(&self) -> bool;

    /// Delete the persisted artifact and forget anything loaded.
    async fn clear(&self) -> Result<()>;
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Pick the retriever for the configured embedder.
pub fn create_retriever(config: &Config, embedder: Option<Arc<dyn Embedder>>) -> Arc<dyn Retriever> {
    match embedder {
        Some(embedder) => Arc::new(VectorRetriever::new(
            embedder,
            config.paths.index_dir.clone(),
            config.embedding.batch_size,
        )),
        None => Arc::new(KeywordRetriever::new(config.paths.keyword_db.clone())),
    }
}

// ============ Vector index ============

#[derive(Serialize, Deserialize)]
struct IndexMeta {
    version: u32,
    dims: usize,
    model: String,
    segments: Vec<Segment>,
}

/// Write `index` to `dir` as `index.json` + `vectors.bin`.
///
/// Both files are staged as temp files first. `index.json` is removed before
/// the swap and renamed into place last, so an interrupted save leaves either
/// the previous pair or no artifact at all.
pub fn save_index(dir: &Path, index: &FlatIndex, model: &str) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create index directory {}", dir.display()))?;

    let mut blob = Vec::with_capacity(index.len() * index.dims() * 4);
    for vector in index.vectors() {
        blob.extend_from_slice(&vec_to_blob(vector));
    }
    let meta = IndexMeta {
        version: INDEX_VERSION,
        dims: index.dims(),
        model: model.to_string(),
        segments: index.segments().to_vec(),
    };

    let vectors_path = dir.join(VECTORS_FILE);
    let index_path = dir.join(INDEX_FILE);
    let vectors_tmp = staging_path(&vectors_path);
    let index_tmp = staging_path(&index_path);
    std::fs::write(&vectors_tmp, blob)
        .with_context(|| format!("Failed to write {}", vectors_tmp.display()))?;
    std::fs::write(&index_tmp, serde_json::to_string_pretty(&meta)?)
        .with_context(|| format!("Failed to write {}", index_tmp.display()))?;

    remove_if_present(&index_path)?;
    std::fs::rename(&vectors_tmp, &vectors_path)
        .with_context(|| format!("Failed to replace {}", vectors_path.display()))?;
    std::fs::rename(&index_tmp, &index_path)
        .with_context(|| format!("Failed to replace {}", index_path.display()))?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Read an index written by [`save_index`]. `Ok(None)` if absent.
pub fn load_index(dir: &Path) -> Result<Option<(FlatIndex, String)>> {
    let Some(meta) = json_file::load::<IndexMeta>(&dir.join(INDEX_FILE))? else {
        return Ok(None);
    };
    if meta.version != INDEX_VERSION {
        bail!("Unsupported index version {} in {}", meta.version, dir.display());
    }

    let vectors_path = dir.join(VECTORS_FILE);
    let blob = std::fs::read(&vectors_path)
        .with_context(|| format!("Failed to read {}", vectors_path.display()))?;
    let row_bytes = meta.dims * 4;
    if row_bytes == 0 || blob.len() != row_bytes * meta.segments.len() {
        bail!(
            "{} holds {} bytes, expected {} rows of {} dims",
            vectors_path.display(),
            blob.len(),
            meta.segments.len(),
            meta.dims
        );
    }
    let vectors = blob.chunks_exact(row_bytes).map(blob_to_vec).collect();
    let index = FlatIndex::from_parts(meta.dims, meta.segments, vectors)?;
    Ok(Some((index, meta.model)))
}

pub fn index_present(dir: &Path) -> bool {
    dir.join(INDEX_FILE).is_file() && dir.join(VECTORS_FILE).is_file()
}

pub struct VectorRetriever {
    embedder: Arc<dyn Embedder>,
    dir: PathBuf,
    batch_size: usize,
    index: RwLock<Option<FlatIndex>>,
}

impl VectorRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, dir: PathBuf, batch_size: usize) -> Self {
        Self {
            embedder,
            dir,
            batch_size: batch_size.max(1),
            index: RwLock::new(None),
        }
    }

    /// Embed `segments` batch by batch; the first batch seeds the index and
    /// each later batch is merged in. Any batch failure aborts the build.
    async fn build(&self, segments: Vec<Segment>) -> Result<FlatIndex> {
        let total_batches = segments.len().div_ceil(self.batch_size);
        let mut index: Option<FlatIndex> = None;

        for (i, batch) in segments.chunks(self.batch_size).enumerate() {
            tracing::info!(
                batch = i + 1,
                total_batches,
                size = batch.len(),
                "embedding batch"
            );
            let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .with_context(|| format!("Embedding batch {}/{} failed", i + 1, total_batches))?;
            let sub_index = FlatIndex::from_batch(batch.to_vec(), vectors)?;
            match index.as_mut() {
                None => index = Some(sub_index),
                Some(running) => running.merge(sub_index)?,
            }
        }

        index.ok_or_else(|| anyhow::anyhow!("No segments to index"))
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Vector
    }

    async fn rebuild(&self, segments: Vec<Segment>) -> Result<usize> {
        let index = self.build(segments).await?;
        save_index(&self.dir, &index, self.embedder.model_name())?;
        let count = index.len();
        *self.index.write().await = Some(index);
        Ok(count)
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SegmentHit>> {
        {
            let mut guard = self.index.write().await;
            if guard.is_none() {
                match load_index(&self.dir)? {
                    Some((index, model)) => {
                        if model != self.embedder.model_name() {
                            tracing::warn!(
                                stored = %model,
                                configured = self.embedder.model_name(),
                                "index was built with a different embedding model"
                            );
                        }
                        *guard = Some(index);
                    }
                    None => return Ok(Vec::new()),
                }
            }
        }

        let query_vec = self.embedder.embed_query(query).await?;
        let guard = self.index.read().await;
        match guard.as_ref() {
            Some(index) => Ok(index.search(&query_vec, k)?),
            None => Ok(Vec::new()),
        }
    }

    fn artifact_present(&self) -> bool {
        index_present(&self.dir)
    }

    async fn clear(&self) -> Result<()> {
        let mut guard = self.index.write().await;
        remove_if_present(&self.dir.join(INDEX_FILE))?;
        remove_if_present(&self.dir.join(VECTORS_FILE))?;
        *guard = None;
        Ok(())
    }
}

// ============ Keyword table ============

pub struct KeywordRetriever {
    path: PathBuf,
    table: RwLock<Option<KeywordTable>>,
}

impl KeywordRetriever {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            table: RwLock::new(None),
        }
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Keyword
    }

    async fn rebuild(&self, segments: Vec<Segment>) -> Result<usize> {
        let table = KeywordTable::from_segments(&segments);
        json_file::save(&self.path, &table.entries())?;
        let count = table.len();
        *self.table.write().await = Some(table);
        Ok(count)
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SegmentHit>> {
        let mut guard = self.table.write().await;
        if guard.is_none() {
            match json_file::load::<Vec<KeywordEntry>>(&self.path)? {
                Some(entries) => *guard = Some(KeywordTable::from_entries(entries)),
                None => return Ok(Vec::new()),
            }
        }
        Ok(guard
            .as_ref()
            .map(|table| table.search(query, k))
            .unwrap_or_default())
    }

    fn artifact_present(&self) -> bool {
        self.path.is_file()
    }

    async fn clear(&self) -> Result<()> {
        let mut guard = self.table.write().await;
        remove_if_present(&self.path)?;
        *guard = None;
        Ok(())
    }
}
