//! Persisted ingestion manifest.
//!
//! Wraps the freshness rules in [`normcheck_core::manifest`] with the JSON
//! file they are stored in. Reading problems are treated as a cache miss so
//! a damaged manifest only ever causes a rebuild.

use anyhow::Result;
use std::path::PathBuf;

use normcheck_core::manifest::{Manifest, RetrievalMode, Staleness};
use normcheck_core::models::FileRecord;

use crate::json_file;

#[derive(Debug, Clone, PartialEq)]
pub enum CacheState {
    Fresh(Manifest),
    Missing,
    Stale(Staleness),
}

pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Option<Manifest> {
        match json_file::load::<Manifest>(&self.path) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring unreadable manifest");
                None
            }
        }
    }

    pub fn check(
        &self,
        current: &[FileRecord],
        mode: RetrievalMode,
        artifact_present: bool,
    ) -> CacheState {
        let Some(manifest) = self.load() else {
            return CacheState::Missing;
        };
        match manifest.staleness(current, mode, artifact_present) {
            None => CacheState::Fresh(manifest),
            Some(reason) => CacheState::Stale(reason),
        }
    }

    /// Persist a fresh manifest after a full rebuild.
    pub fn record(
        &self,
        files: Vec<FileRecord>,
        processed: usize,
        total_chunks: usize,
        mode: RetrievalMode,
    ) -> Result<Manifest> {
        let manifest = Manifest::new(files, processed, total_chunks, mode);
        json_file::save(&self.path, &manifest)?;
        tracing::info!(
            files = processed,
            chunks = total_chunks,
            "manifest saved"
        );
        Ok(manifest)
    }

    /// Delete the manifest; absent is fine.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
