//! Ingestion manifest and cache freshness rules.
//!
//! The manifest records the source files seen by the last successful
//! ingestion run. A later run may be skipped only when the current file set
//! matches it exactly (names, count, and modification times within
//! [`MTIME_TOLERANCE_SECS`]) and the index artifact is still on disk. Any
//! drift forces a full rebuild of the corpus.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::FileRecord;

pub const MTIME_TOLERANCE_SECS: f64 = 1.0;
pub const CACHE_VERSION: &str = "1.0";

/// Which retrieval backend produced the persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Vector,
    Keyword,
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMode::Vector => write!(f, "vector"),
            RetrievalMode::Keyword => write!(f, "keyword"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub processed_date: DateTime<Utc>,
    /// Documents that yielded text and were indexed.
    pub file_count: usize,
    pub total_chunks: usize,
    pub retrieval_mode: RetrievalMode,
    /// Every source file present when the run started.
    pub processed_files: Vec<FileRecord>,
    pub cache_version: String,
}

/// Why a stored manifest no longer describes the corpus.
#[derive(Debug, Clone, PartialEq)]
pub enum Staleness {
    FileCountChanged { cached: usize, current: usize },
    NewFile(String),
    Modified(String),
    ArtifactMissing,
    ModeChanged {
        cached: RetrievalMode,
        current: RetrievalMode,
    },
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::FileCountChanged { cached, current } => {
                write!(f, "file count changed: {} -> {}", cached, current)
            }
            Staleness::NewFile(name) => write!(f, "new file: {}", name),
            Staleness::Modified(name) => write!(f, "modified: {}", name),
            Staleness::ArtifactMissing => write!(f, "index artifact missing"),
            Staleness::ModeChanged { cached, current } => {
                write!(f, "retrieval mode changed: {} -> {}", cached, current)
            }
        }
    }
}

impl Manifest {
    pub fn new(
        files: Vec<FileRecord>,
        processed_count: usize,
        total_chunks: usize,
        retrieval_mode: RetrievalMode,
    ) -> Self {
        Self {
            processed_date: Utc::now(),
            file_count: processed_count,
            total_chunks,
            retrieval_mode,
            processed_files: files,
            cache_version: CACHE_VERSION.to_string(),
        }
    }

    /// First reason this manifest is stale for `current`, or `None` when a
    /// cache hit may be declared.
    pub fn staleness(
        &self,
        current: &[FileRecord],
        mode: RetrievalMode,
        artifact_present: bool,
    ) -> Option<Staleness> {
        if self.retrieval_mode != mode {
            return Some(Staleness::ModeChanged {
                cached: self.retrieval_mode,
                current: mode,
            });
        }
        if self.processed_files.len() != current.len() {
            return Some(Staleness::FileCountChanged {
                cached: self.processed_files.len(),
                current: current.len(),
            });
        }
        for file in current {
            let Some(cached) = self
                .processed_files
                .iter()
                .find(|c| c.filename == file.filename)
            else {
                return Some(Staleness::NewFile(file.filename.clone()));
            };
            if (file.last_modified - cached.last_modified).abs() > MTIME_TOLERANCE_SECS {
                return Some(Staleness::Modified(file.filename.clone()));
            }
        }
        if !artifact_present {
            return Some(Staleness::ArtifactMissing);
        }
        None
    }
}

/// True when `stored` exists and matches the current corpus.
pub fn is_up_to_date(
    current: &[FileRecord],
    stored: Option<&Manifest>,
    mode: RetrievalMode,
    artifact_present: bool,
) -> bool {
    stored
        .map(|m| m.staleness(current, mode, artifact_present).is_none())
        .unwrap_or(false)
}
