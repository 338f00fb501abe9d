//! Standard-document ingestion: scan → extract → chunk.
//!
//! Produces the segments the retriever indexes. A document that fails to
//! extract, or yields no text, is logged and skipped; it never aborts the
//! rest of the corpus. Persistence is the caller's job.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use normcheck_core::chunk::Chunker;
use normcheck_core::models::{FileRecord, Segment};

use crate::extract::TextExtractor;

/// List the source files directly inside `dir` that match `include_globs`.
///
/// A missing directory yields an empty list.
pub fn scan_sources(dir: &Path, include_globs: &[String]) -> Result<Vec<FileRecord>> {
    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "standards directory not found");
        return Ok(Vec::new());
    }

    let include_set = build_globset(include_globs)?;
    let mut candidates = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !include_set.is_match(&name) {
            continue;
        }
        candidates.push((entry.into_path(), name));
    }

    let mut files = records_for(candidates);
    // Sort for deterministic ordering
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

/// Stat each candidate. Files that vanished or cannot be read are skipped.
fn records_for(candidates: Vec<(PathBuf, String)>) -> Vec<FileRecord> {
    candidates
        .into_iter()
        .filter_map(|(path, name)| match file_record(&path, name) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping unreadable source file");
                None
            }
        })
        .collect()
}

pub fn file_record(path: &Path, filename: String) -> Result<FileRecord> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let last_modified = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();

    Ok(FileRecord {
        filename,
        last_modified,
        size: metadata.len(),
        path: path.display().to_string(),
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Result of one ingestion pass over the corpus.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub segments: Vec<Segment>,
    /// Documents that produced text.
    pub processed: usize,
    /// File names that were skipped.
    pub skipped: Vec<String>,
}

pub struct Ingestor {
    extractor: Arc<TextExtractor>,
    chunker: Chunker,
}

impl Ingestor {
    pub fn new(extractor: Arc<TextExtractor>, chunker: Chunker) -> Self {
        Self { extractor, chunker }
    }

    /// Extract and segment every file, one at a time.
    pub async fn ingest(&self, files: &[FileRecord]) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();

        for file in files {
            tracing::info!(file = %file.filename, "processing");
            let path = Path::new(&file.path);

            let text = match self.extractor.extract(path, true).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(file = %file.filename, error = %e, "skipping document");
                    outcome.skipped.push(file.filename.clone());
                    continue;
                }
            };
            if text.trim().is_empty() {
                tracing::warn!(file = %file.filename, "no text content, skipping document");
                outcome.skipped.push(file.filename.clone());
                continue;
            }

            let document_id = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| file.filename.clone());
            let segments = self.chunker.segment(&document_id, &file.filename, &text);
            tracing::info!(
                file = %file.filename,
                segments = segments.len(),
                "document segmented"
            );

            outcome.segments.extend(segments);
            outcome.processed += 1;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory_is_empty() {
        let files = scan_sources(Path::new("/nonexistent/din_norms"), &["*.pdf".into()]).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("DIN_b.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("DIN_a.pdf"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("din_index")).unwrap();
        std::fs::write(dir.path().join("din_index/nested.pdf"), b"x").unwrap();

        let files = scan_sources(dir.path(), &["*.pdf".into()]).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["DIN_a.pdf", "DIN_b.pdf"]);
        assert_eq!(files[0].size, 8);
        assert!(files[0].last_modified > 0.0);
    }

    #[test]
    fn test_vanished_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("DIN_18065.pdf");
        std::fs::write(&present, b"%PDF-1.4").unwrap();

        let files = records_for(vec![
            (dir.path().join("DIN_4109.pdf"), "DIN_4109.pdf".to_string()),
            (present, "DIN_18065.pdf".to_string()),
        ]);
        let names: Vec<_> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["DIN_18065.pdf"]);
    }
}
