//! Uploaded construction plans and their analysis records.
//!
//! Each plan is stored twice: the PDF as `<uploads_dir>/<id>_<name>` and a
//! JSON record as `<results_dir>/<id>_analysis.json`. The record collects
//! the latest compliance check and every feedback entry for the plan.
//! Record writes are serialised through one mutex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use normcheck_core::feedback::{classify, Feedback, FeedbackError};
use normcheck_core::models::truncate_chars;

use crate::analyzer::CheckResult;
use crate::extract::{page_count, ExtractError, TextExtractor};
use crate::json_file;

pub const SCANNED_PLACEHOLDER: &str = "# Scanned PDF - visual analysis only";
pub const STATUS_UPLOADED: &str = "uploaded";
pub const STATUS_CHECKED: &str = "din_checked";
const PREVIEW_CHARS: usize = 500;
const RESULT_SUFFIX: &str = "_analysis.json";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan not found: {0}")]
    NotFound(String),
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
    #[error(transparent)]
    InvalidFeedback(#[from] FeedbackError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFeedbackEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub feedback: Feedback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub id: String,
    pub filename: String,
    pub original_filename: String,
    pub upload_time: DateTime<Utc>,
    pub file_size: u64,
    pub page_count: usize,
    pub text_preview: String,
    pub text_length: usize,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub din_check: Option<CheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub din_check_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback: Vec<PlanFeedbackEntry>,
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        format!("{}...", truncate_chars(text, PREVIEW_CHARS))
    } else {
        text.to_string()
    }
}

/// Ids are generated here; anything else is rejected before touching disk.
fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn new_plan_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

/// Reduce an uploaded name to its final path component with spaces
/// replaced by underscores.
fn safe_name(original: &str) -> Option<String> {
    let name = Path::new(original).file_name()?.to_string_lossy().replace(' ', "_");
    if name.is_empty() || name.starts_with('.') {
        return None;
    }
    Some(name)
}

pub struct PlanStore {
    uploads_dir: PathBuf,
    results_dir: PathBuf,
    max_upload_bytes: usize,
    extractor: Arc<TextExtractor>,
    lock: Mutex<()>,
}

impl PlanStore {
    pub fn new(
        uploads_dir: PathBuf,
        results_dir: PathBuf,
        max_upload_bytes: usize,
        extractor: Arc<TextExtractor>,
    ) -> Self {
        Self {
            uploads_dir,
            results_dir,
            max_upload_bytes,
            extractor,
            lock: Mutex::new(()),
        }
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, PlanError> {
        if !valid_id(id) {
            return Err(PlanError::NotFound(id.to_string()));
        }
        Ok(self.results_dir.join(format!("{}{}", id, RESULT_SUFFIX)))
    }

    fn read_record(&self, id: &str) -> Result<PlanRecord, PlanError> {
        let path = self.record_path(id)?;
        json_file::load(&path)?.ok_or_else(|| PlanError::NotFound(id.to_string()))
    }

    /// Extract plan text; image-only plans get a placeholder.
    async fn extract_text(&self, path: &Path) -> Result<String, PlanError> {
        let text = self.extractor.extract(path, false).await?;
        if text.trim().is_empty() {
            tracing::warn!(file = %path.display(), "no text in plan, using placeholder");
            return Ok(SCANNED_PLACEHOLDER.to_string());
        }
        Ok(text)
    }

    /// Store an uploaded PDF and create its record.
    pub async fn upload(&self, original_name: &str, bytes: &[u8]) -> Result<PlanRecord, PlanError> {
        let name = safe_name(original_name)
            .ok_or_else(|| PlanError::InvalidUpload("missing file name".to_string()))?;
        if !name.to_lowercase().ends_with(".pdf") {
            return Err(PlanError::InvalidUpload(
                "only PDF files are accepted".to_string(),
            ));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(PlanError::InvalidUpload(format!(
                "file too large ({} bytes, max {})",
                bytes.len(),
                self.max_upload_bytes
            )));
        }

        let now = Utc::now();
        let id = new_plan_id(now);
        let filename = format!("{}_{}", id, name);
        let pdf_path = self.uploads_dir.join(&filename);
        tokio::fs::create_dir_all(&self.uploads_dir)
            .await
            .map_err(|e| PlanError::Storage(e.into()))?;
        tokio::fs::write(&pdf_path, bytes)
            .await
            .map_err(|e| PlanError::Storage(e.into()))?;
        tracing::info!(plan = %id, file = %pdf_path.display(), "plan saved");

        let text = match self.extract_text(&pdf_path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(plan = %id, error = %e, "plan upload failed");
                let _ = tokio::fs::remove_file(&pdf_path).await;
                return Err(e);
            }
        };

        let record = PlanRecord {
            id: id.clone(),
            filename,
            original_filename: original_name.to_string(),
            upload_time: now,
            file_size: bytes.len() as u64,
            page_count: page_count(bytes).unwrap_or(0),
            text_preview: preview(&text),
            text_length: text.chars().count(),
            status: STATUS_UPLOADED.to_string(),
            din_check: None,
            din_check_timestamp: None,
            feedback: Vec::new(),
        };

        let _guard = self.lock.lock().await;
        json_file::save(&self.record_path(&id)?, &record)?;
        Ok(record)
    }

    /// All plan records, newest first. Unreadable records are skipped.
    pub async fn list(&self) -> Result<Vec<PlanRecord>, PlanError> {
        let mut plans = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.results_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(plans),
            Err(e) => return Err(PlanError::Storage(e.into())),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PlanError::Storage(e.into()))?
        {
            let path = entry.path();
            let is_record = path
                .file_name()
                .map(|n| n.to_string_lossy().ends_with(RESULT_SUFFIX))
                .unwrap_or(false);
            if !is_record {
                continue;
            }
            match json_file::load::<PlanRecord>(&path) {
                Ok(Some(record)) => plans.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping plan record"),
            }
        }
        plans.sort_by(|a, b| b.upload_time.cmp(&a.upload_time));
        Ok(plans)
    }

    pub async fn get(&self, id: &str) -> Result<PlanRecord, PlanError> {
        self.read_record(id)
    }

    /// Full text of the stored PDF, re-extracted on every call.
    pub async fn plan_text(&self, id: &str) -> Result<String, PlanError> {
        let record = self.read_record(id)?;
        let pdf_path = self.uploads_dir.join(&record.filename);
        if !pdf_path.exists() {
            return Err(PlanError::NotFound(format!("{} (original PDF missing)", id)));
        }
        self.extract_text(&pdf_path).await
    }

    /// Remove the record and the stored PDF.
    pub async fn delete(&self, id: &str) -> Result<(), PlanError> {
        let _guard = self.lock.lock().await;
        let record = self.read_record(id)?;
        let pdf_path = self.uploads_dir.join(&record.filename);
        if pdf_path.exists() {
            std::fs::remove_file(&pdf_path).map_err(|e| PlanError::Storage(e.into()))?;
        }
        std::fs::remove_file(self.record_path(id)?).map_err(|e| PlanError::Storage(e.into()))?;
        tracing::info!(plan = %id, "plan deleted");
        Ok(())
    }

    /// Attach a compliance check result to the plan.
    pub async fn record_check(&self, id: &str, result: CheckResult) -> Result<PlanRecord, PlanError> {
        let _guard = self.lock.lock().await;
        let mut record = self.read_record(id)?;
        record.din_check_timestamp = Some(result.timestamp);
        record.din_check = Some(result);
        record.status = STATUS_CHECKED.to_string();
        json_file::save(&self.record_path(id)?, &record)?;
        Ok(record)
    }

    /// Append a feedback entry to the plan's record.
    pub async fn add_feedback(
        &self,
        id: &str,
        feedback: Feedback,
    ) -> Result<PlanFeedbackEntry, PlanError> {
        classify(feedback.rating)?;
        let _guard = self.lock.lock().await;
        let mut record = self.read_record(id)?;
        let entry = PlanFeedbackEntry {
            timestamp: Utc::now(),
            feedback,
        };
        record.feedback.push(entry.clone());
        json_file::save(&self.record_path(id)?, &record)?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{minimal_pdf, text_only_extractor};

    fn store(dir: &tempfile::TempDir, max_upload_bytes: usize) -> PlanStore {
        PlanStore::new(
            dir.path().join("uploads"),
            dir.path().join("analysis_results"),
            max_upload_bytes,
            text_only_extractor(dir.path()),
        )
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1024);

        let err = store.upload("grundriss.png", b"png").await.unwrap_err();
        assert!(matches!(err, PlanError::InvalidUpload(_)));

        let err = store.upload("gross.pdf", &[0u8; 2048]).await.unwrap_err();
        assert!(err.to_string().contains("too large"));

        let err = store.upload("kaputt.pdf", b"not a pdf").await.unwrap_err();
        assert!(matches!(err, PlanError::Extract(_)));
        let leftovers = std::fs::read_dir(dir.path().join("uploads")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_upload_check_feedback_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1 << 20);

        let record = store
            .upload("Grundriss EG.pdf", &minimal_pdf("Treppe Laufbreite"))
            .await
            .unwrap();
        assert_eq!(record.status, STATUS_UPLOADED);
        assert_eq!(record.original_filename, "Grundriss EG.pdf");
        assert!(record.filename.ends_with("_Grundriss_EG.pdf"));
        assert!(dir.path().join("uploads").join(&record.filename).exists());
        assert!(!store.plan_text(&record.id).await.unwrap().is_empty());

        let check: CheckResult = serde_json::from_value(serde_json::json!({
            "timestamp": "2024-05-01T10:00:00Z",
            "standards_found": 0,
            "top_standards": [],
            "error": "no relevant standards found"
        }))
        .unwrap();
        let checked = store.record_check(&record.id, check).await.unwrap();
        assert_eq!(checked.status, STATUS_CHECKED);
        assert!(checked.din_check_timestamp.is_some());

        let entry = store
            .add_feedback(
                &record.id,
                Feedback {
                    rating: 4,
                    comments: Some("gut".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(entry.feedback.rating, 4);
        let bad = store
            .add_feedback(&record.id, Feedback { rating: 9, ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(bad, PlanError::InvalidFeedback(_)));

        let stored = store.get(&record.id).await.unwrap();
        assert_eq!(stored.feedback.len(), 1);
        assert!(stored.din_check.is_some());

        store.delete(&record.id).await.unwrap();
        assert!(matches!(
            store.get(&record.id).await.unwrap_err(),
            PlanError::NotFound(_)
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1 << 20);
        let first = store.upload("a.pdf", &minimal_pdf("eins")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.upload("b.pdf", &minimal_pdf("zwei")).await.unwrap();

        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_path_like_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1024);
        assert!(matches!(
            store.get("../usage_log").await.unwrap_err(),
            PlanError::NotFound(_)
        ));
    }

    #[test]
    fn test_preview_is_char_bounded() {
        assert_eq!(preview("kurz"), "kurz");
        let long = "ä".repeat(600);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 503);
    }
}
