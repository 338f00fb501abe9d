//! The checker service: one context object owning every collaborator.
//!
//! [`Checker`] is built once from a [`Config`] and a set of injected
//! [`Components`]. The retrieval backend is chosen at construction: vector
//! search when an embedder is available, keyword overlap otherwise. The
//! CLI and the HTTP server both call into the same operations.
//!
//! Re-ingestion is serialised by an internal mutex; two concurrent
//! `process_standards` calls run one after the other.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use normcheck_core::chunk::Chunker;
use normcheck_core::embedding::Embedder;
use normcheck_core::feedback::{Feedback, FeedbackError, FeedbackStats};
use normcheck_core::manifest::{Manifest, RetrievalMode};
use normcheck_core::models::SegmentHit;

use crate::analyzer::{load_system_prompt, Analyzer, CheckResult};
use crate::cache::{CacheState, ManifestStore};
use crate::completion::{Completer, OpenAiCompleter};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::TextExtractor;
use crate::feedback::FeedbackLog;
use crate::ingest::{scan_sources, Ingestor};
use crate::ocr::{OcrEngine, PageRenderer, Pdftoppm, Tesseract};
use crate::plans::{PlanError, PlanFeedbackEntry, PlanStore};
use crate::retrieval::{create_retriever, Retriever};
use crate::usage::{round_to, BudgetStatus, UsageLedger};
use crate::vision::{ImageDescriber, OpenAiVision};

const COMPLETION_TIMEOUT_SECS: u64 = 120;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// External collaborators. Anything left `None` is treated as unavailable.
pub struct Components {
    pub embedder: Option<Arc<dyn Embedder>>,
    pub completer: Option<Arc<dyn Completer>>,
    pub renderer: Arc<dyn PageRenderer>,
    pub ocr: Option<Arc<dyn OcrEngine>>,
    pub describer: Option<Arc<dyn ImageDescriber>>,
}

impl Default for Components {
    fn default() -> Self {
        Self {
            embedder: None,
            completer: None,
            renderer: Arc::new(Pdftoppm::default()),
            ocr: None,
            describer: None,
        }
    }
}

impl Components {
    /// Production collaborators as configured. Services that cannot be
    /// constructed (usually a missing API key) are logged and left out.
    pub fn from_config(config: &Config) -> Self {
        let completer = match OpenAiCompleter::from_config(&config.analysis, COMPLETION_TIMEOUT_SECS) {
            Ok(completer) => Some(Arc::new(completer) as Arc<dyn Completer>),
            Err(e) => {
                tracing::warn!(error = %e, "compliance analysis unavailable");
                None
            }
        };

        let describer = if config.extraction.vision_enabled {
            match OpenAiVision::from_config(config) {
                Ok(vision) => Some(Arc::new(vision) as Arc<dyn ImageDescriber>),
                Err(e) => {
                    tracing::warn!(error = %e, "image analysis unavailable");
                    None
                }
            }
        } else {
            None
        };

        let ocr = config
            .extraction
            .ocr_enabled
            .then(|| Arc::new(Tesseract::default()) as Arc<dyn OcrEngine>);

        Self {
            embedder: create_embedder(config),
            completer,
            renderer: Arc::new(Pdftoppm::default()),
            ocr,
            describer,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub files_found: usize,
    pub processed: usize,
    pub skipped: Vec<String>,
    pub segments: usize,
    pub cached: bool,
    pub mode: RetrievalMode,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingInfo {
    pub mode: RetrievalMode,
    pub files_on_disk: usize,
    pub artifact_present: bool,
    pub cache: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormEntry {
    pub name: String,
    pub filename: String,
    pub size_mb: f64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StandardsStatus {
    pub status: &'static str,
    pub count: usize,
    pub total_chunks: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub norms: Vec<NormEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StandardUpload {
    pub filename: String,
    pub size: usize,
    pub processing: ProcessReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_plans: usize,
    pub plans_with_feedback: usize,
    pub average_rating: Option<f64>,
    pub din_norms_count: usize,
    pub din_chunks_count: usize,
    pub feedback_stats: FeedbackStats,
    pub last_analysis: Option<DateTime<Utc>>,
}

/// Canonical file name for an uploaded standard: spaces become `_`,
/// parentheses are dropped and a `DIN_` prefix is added when missing.
pub fn normalize_standard_name(name: &str) -> Option<String> {
    let base = Path::new(name).file_name()?.to_string_lossy().to_string();
    let mut normalized: String = base
        .replace(' ', "_")
        .chars()
        .filter(|c| *c != '(' && *c != ')')
        .collect();
    if normalized.is_empty() || normalized.starts_with('.') {
        return None;
    }
    if !normalized.starts_with("DIN") {
        normalized = format!("DIN_{}", normalized);
    }
    Some(normalized)
}

fn epoch_to_utc(secs: f64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32).unwrap_or_default()
}

pub struct Checker {
    config: Config,
    retriever: Arc<dyn Retriever>,
    manifest: ManifestStore,
    ingestor: Ingestor,
    analyzer: Analyzer,
    feedback: Arc<FeedbackLog>,
    usage: Arc<UsageLedger>,
    plans: PlanStore,
    extractor: Arc<TextExtractor>,
    ingest_lock: Mutex<()>,
}

impl Checker {
    pub fn from_config(config: Config) -> Self {
        let components = Components::from_config(&config);
        Self::new(config, components)
    }

    pub fn new(config: Config, components: Components) -> Self {
        let usage = Arc::new(UsageLedger::new(
            config.paths.usage_log.clone(),
            config.budget.clone(),
        ));
        let feedback = Arc::new(FeedbackLog::new(config.paths.feedback.clone()));
        let extractor = Arc::new(TextExtractor::new(
            config.extraction.clone(),
            components.renderer,
            components.ocr,
            components.describer,
            usage.clone(),
        ));
        let chunker = Chunker::new(
            config.chunking.chunk_size,
            config.chunking.overlap,
            config.chunking.min_chars,
        );
        let retriever = create_retriever(&config, components.embedder);
        tracing::info!(mode = %retriever.mode(), "retrieval backend selected");

        let analyzer = Analyzer::new(
            retriever.clone(),
            components.completer,
            feedback.clone(),
            usage.clone(),
            config.analysis.clone(),
        )
        .with_system_prompt(load_system_prompt(config.paths.system_prompt.as_deref()));

        let plans = PlanStore::new(
            config.paths.uploads_dir.clone(),
            config.paths.results_dir.clone(),
            config.server.max_upload_bytes,
            extractor.clone(),
        );

        Self {
            manifest: ManifestStore::new(config.paths.manifest.clone()),
            ingestor: Ingestor::new(extractor.clone(), chunker),
            extractor,
            retriever,
            analyzer,
            feedback,
            usage,
            plans,
            ingest_lock: Mutex::new(()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mode(&self) -> RetrievalMode {
        self.retriever.mode()
    }

    pub fn plans(&self) -> &PlanStore {
        &self.plans
    }

    /// Ingest the standards directory unless the manifest says the stored
    /// index is current. `force` skips the freshness check.
    pub async fn process_standards(&self, force: bool) -> Result<ProcessReport, ServiceError> {
        let _guard = self.ingest_lock.lock().await;
        let mode = self.retriever.mode();
        let files = scan_sources(
            &self.config.paths.standards_dir,
            &self.config.extraction.include_globs,
        )?;
        let mut report = ProcessReport {
            files_found: files.len(),
            processed: 0,
            skipped: Vec::new(),
            segments: 0,
            cached: false,
            mode,
            timestamp: Utc::now(),
        };

        if files.is_empty() {
            tracing::warn!(
                dir = %self.config.paths.standards_dir.display(),
                "no standard documents found"
            );
            if self.manifest.load().is_some() {
                tracing::info!("standards removed, clearing stored index");
                self.retriever.clear().await?;
                self.manifest.clear()?;
            }
            return Ok(report);
        }

        if !force {
            match self
                .manifest
                .check(&files, mode, self.retriever.artifact_present())
            {
                CacheState::Fresh(manifest) => {
                    tracing::info!(
                        files = manifest.file_count,
                        chunks = manifest.total_chunks,
                        "standards unchanged, using cached index"
                    );
                    report.processed = manifest.file_count;
                    report.segments = manifest.total_chunks;
                    report.cached = true;
                    return Ok(report);
                }
                CacheState::Missing => tracing::info!("no manifest, processing standards"),
                CacheState::Stale(reason) => {
                    tracing::info!(%reason, "standards changed, reprocessing")
                }
            }
        }

        let outcome = self.ingestor.ingest(&files).await;
        report.processed = outcome.processed;
        report.skipped = outcome.skipped;
        if outcome.segments.is_empty() {
            tracing::warn!(
                previous_index_kept = self.retriever.artifact_present(),
                "no text segments extracted from standards"
            );
            return Ok(report);
        }

        let segments = match self.retriever.rebuild(outcome.segments).await {
            Ok(count) => count,
            Err(e) => {
                let detail = format!("{:#}", e);
                tracing::error!(error = %detail, "index build failed");
                if self.retriever.artifact_present() {
                    tracing::warn!(
                        "previous index kept and still served until the next successful run"
                    );
                }
                return Ok(report);
            }
        };
        report.segments = segments;
        self.manifest
            .record(files, outcome.processed, segments, mode)?;
        tracing::info!(
            processed = report.processed,
            skipped = report.skipped.len(),
            segments,
            "standards processed"
        );
        Ok(report)
    }

    pub async fn find_relevant(&self, query: &str, k: usize) -> Result<Vec<SegmentHit>, ServiceError> {
        if query.trim().is_empty() {
            return Err(ServiceError::Invalid("query must not be empty".to_string()));
        }
        Ok(self.retriever.search(query, k).await?)
    }

    pub async fn check_plan_text(&self, plan_text: &str) -> CheckResult {
        self.analyzer.check(plan_text).await
    }

    /// Plan text from a local file: PDFs go through extraction without
    /// image analysis, anything else is read as text.
    pub async fn read_plan_file(&self, path: &Path) -> Result<String, ServiceError> {
        let text = self
            .extractor
            .extract(path, false)
            .await
            .map_err(PlanError::from)?;
        if text.trim().is_empty() {
            return Err(ServiceError::Invalid(format!(
                "no text found in {}",
                path.display()
            )));
        }
        Ok(text)
    }

    /// Check a stored plan and attach the result to its record.
    pub async fn check_plan(&self, plan_id: &str) -> Result<CheckResult, ServiceError> {
        tracing::info!(plan = %plan_id, "starting compliance check");
        let text = self.plans.plan_text(plan_id).await?;
        let result = self.analyzer.check(&text).await;
        self.plans.record_check(plan_id, result.clone()).await?;
        tracing::info!(plan = %plan_id, success = result.is_success(), "compliance check finished");
        Ok(result)
    }

    pub async fn processing_info(&self) -> Result<ProcessingInfo, ServiceError> {
        let files = scan_sources(
            &self.config.paths.standards_dir,
            &self.config.extraction.include_globs,
        )?;
        let mode = self.retriever.mode();
        let artifact_present = self.retriever.artifact_present();
        let cache = match self.manifest.check(&files, mode, artifact_present) {
            CacheState::Fresh(_) => "fresh".to_string(),
            CacheState::Missing => "missing".to_string(),
            CacheState::Stale(reason) => format!("stale ({})", reason),
        };
        Ok(ProcessingInfo {
            mode,
            files_on_disk: files.len(),
            artifact_present,
            cache,
            manifest: self.manifest.load(),
        })
    }

    pub async fn standards_status(&self) -> Result<StandardsStatus, ServiceError> {
        let files = scan_sources(
            &self.config.paths.standards_dir,
            &self.config.extraction.include_globs,
        )?;
        let manifest = self.manifest.load();
        let norms: Vec<NormEntry> = files
            .iter()
            .map(|f| NormEntry {
                name: Path::new(&f.filename)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| f.filename.clone()),
                filename: f.filename.clone(),
                size_mb: round_to(f.size as f64 / BYTES_PER_MB, 2),
                last_modified: epoch_to_utc(f.last_modified),
            })
            .collect();
        Ok(StandardsStatus {
            status: if norms.is_empty() { "empty" } else { "available" },
            count: norms.len(),
            total_chunks: manifest.as_ref().map(|m| m.total_chunks).unwrap_or(0),
            last_update: manifest.map(|m| m.processed_date),
            norms,
        })
    }

    /// Store a standard document and reprocess the corpus.
    pub async fn add_standard(&self, name: &str, bytes: &[u8]) -> Result<StandardUpload, ServiceError> {
        let filename = normalize_standard_name(name)
            .ok_or_else(|| ServiceError::Invalid("missing file name".to_string()))?;
        if !filename.to_lowercase().ends_with(".pdf") {
            return Err(ServiceError::Invalid(
                "only PDF files are accepted".to_string(),
            ));
        }
        if bytes.len() > self.config.server.max_upload_bytes {
            return Err(ServiceError::Invalid(format!(
                "file too large ({} bytes, max {})",
                bytes.len(),
                self.config.server.max_upload_bytes
            )));
        }

        let dir = &self.config.paths.standards_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;
        tokio::fs::write(dir.join(&filename), bytes)
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;
        tracing::info!(file = %filename, size = bytes.len(), "standard uploaded");

        let processing = self.process_standards(false).await?;
        Ok(StandardUpload {
            filename,
            size: bytes.len(),
            processing,
        })
    }

    /// Delete a standard document and reprocess the remaining corpus.
    pub async fn remove_standard(&self, filename: &str) -> Result<ProcessReport, ServiceError> {
        let is_plain_name = Path::new(filename)
            .file_name()
            .map(|n| n == filename)
            .unwrap_or(false);
        let path = self.config.paths.standards_dir.join(filename);
        if !is_plain_name || !path.is_file() {
            return Err(ServiceError::NotFound(filename.to_string()));
        }
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;
        tracing::info!(file = %filename, "standard deleted");
        self.process_standards(false).await
    }

    /// Attach feedback to a plan and learn from it for later analyses.
    pub async fn learn_from_feedback(
        &self,
        plan_id: &str,
        feedback: Feedback,
    ) -> Result<PlanFeedbackEntry, ServiceError> {
        let entry = self.plans.add_feedback(plan_id, feedback.clone()).await?;
        match self.plans.plan_text(plan_id).await {
            Ok(text) => {
                if let Err(e) = self.feedback.record(&text, feedback).await {
                    tracing::warn!(plan = %plan_id, error = %e, "feedback learning failed");
                }
            }
            Err(e) => tracing::warn!(plan = %plan_id, error = %e, "plan text unavailable for learning"),
        }
        Ok(entry)
    }

    pub async fn statistics(&self) -> Result<Statistics, ServiceError> {
        let plans = self.plans.list().await?;
        let ratings: Vec<f64> = plans
            .iter()
            .flat_map(|p| p.feedback.iter().map(|f| f.feedback.rating as f64))
            .collect();
        let average_rating = (!ratings.is_empty())
            .then(|| round_to(ratings.iter().sum::<f64>() / ratings.len() as f64, 2));
        let manifest = self.manifest.load();

        Ok(Statistics {
            total_plans: plans.len(),
            plans_with_feedback: plans.iter().filter(|p| !p.feedback.is_empty()).count(),
            average_rating,
            din_norms_count: manifest.as_ref().map(|m| m.file_count).unwrap_or(0),
            din_chunks_count: manifest.as_ref().map(|m| m.total_chunks).unwrap_or(0),
            feedback_stats: self.feedback.stats().await?,
            last_analysis: plans.iter().filter_map(|p| p.din_check_timestamp).max(),
        })
    }

    pub async fn budget_status(&self) -> Result<BudgetStatus, ServiceError> {
        Ok(self.usage.status().await?)
    }
}
