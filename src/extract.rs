//! PDF text extraction with OCR and vision fallbacks.
//!
//! Extraction runs in up to three stages:
//!
//! 1. **Native text.** `pdf-extract` returns text per page. If it rejects the
//!    file, `lopdf` retries page by page and skips pages it cannot decode.
//! 2. **OCR.** When the native text is shorter than
//!    `extraction.ocr_threshold_chars`, the document is treated as a scan:
//!    the first `ocr_max_pages` pages are rendered and recognized.
//! 3. **Vision.** Standard documents whose file name matches one of
//!    `extraction.vision_keywords` get their first pages described by the
//!    image-understanding service, one call per page with a fixed pause.
//!
//! Files without a `.pdf` extension are read as UTF-8 text and skip all
//! three stages.
//!
//! Each later stage appends its output under a tag (`[OCR]`,
//! `[IMAGE ANALYSIS]`) so retrieved passages show where the text came from.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::ExtractionConfig;
use crate::ocr::{OcrEngine, PageRenderer};
use crate::usage::UsageLedger;
use crate::vision::{page_prompt, ImageDescriber};

pub const OCR_TAG: &str = "[OCR]";
pub const VISION_TAG: &str = "[IMAGE ANALYSIS]";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("{tool} failed: {detail}")]
    Tool { tool: &'static str, detail: String },
}

/// Native per-page text. Pages that cannot be decoded come back empty.
///
/// A parser panic on a malformed file is reported as [`ExtractError::Pdf`];
/// it does not fall back to `lopdf`.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    match catch_parser_panic(|| pdf_extract::extract_text_from_mem_by_pages(bytes))? {
        Ok(pages) => Ok(pages),
        Err(e) => {
            tracing::debug!(error = %e, "pdf-extract failed, retrying page by page");
            extract_pages_lopdf(bytes)
        }
    }
}

fn extract_pages_lopdf(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let doc = catch_parser_panic(|| lopdf::Document::load_mem(bytes))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let pages = doc.get_pages();
    let mut out = Vec::with_capacity(pages.len());
    for &number in pages.keys() {
        let page = catch_parser_panic(|| doc.extract_text(&[number]))
            .and_then(|r| r.map_err(|e| ExtractError::Pdf(e.to_string())));
        match page {
            Ok(text) => out.push(text),
            Err(e) => {
                tracing::warn!(page = number, error = %e, "skipping unreadable page");
                out.push(String::new());
            }
        }
    }
    Ok(out)
}

/// Run a PDF parser call, turning a panic into an extraction error.
fn catch_parser_panic<T>(f: impl FnOnce() -> T) -> Result<T, ExtractError> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown cause".to_string());
        ExtractError::Pdf(format!("parser panicked: {}", detail))
    })
}

/// Number of pages, if the file parses as a PDF.
pub fn page_count(bytes: &[u8]) -> Option<usize> {
    catch_parser_panic(|| lopdf::Document::load_mem(bytes))
        .ok()?
        .ok()
        .map(|doc| doc.get_pages().len())
}

/// Join non-empty pages as `[Page N]` sections.
pub fn format_pages(pages: &[String]) -> String {
    let mut text = String::new();
    for (i, page) in pages.iter().enumerate() {
        if page.trim().is_empty() {
            continue;
        }
        text.push_str(&format!("[Page {}]\n{}\n\n", i + 1, page.trim_end()));
    }
    text
}

pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Whether a file name looks like a technical standard worth describing.
pub fn wants_vision(filename: &str, keywords: &[String]) -> bool {
    let lower = filename.to_lowercase();
    keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
}

/// Text extraction with the configured fallbacks.
pub struct TextExtractor {
    settings: ExtractionConfig,
    renderer: Arc<dyn PageRenderer>,
    ocr: Option<Arc<dyn OcrEngine>>,
    describer: Option<Arc<dyn ImageDescriber>>,
    usage: Arc<UsageLedger>,
}

impl TextExtractor {
    pub fn new(
        settings: ExtractionConfig,
        renderer: Arc<dyn PageRenderer>,
        ocr: Option<Arc<dyn OcrEngine>>,
        describer: Option<Arc<dyn ImageDescriber>>,
        usage: Arc<UsageLedger>,
    ) -> Self {
        Self {
            settings,
            renderer,
            ocr,
            describer,
            usage,
        }
    }

    fn ocr_engine(&self) -> Option<&Arc<dyn OcrEngine>> {
        self.ocr.as_ref().filter(|_| self.settings.ocr_enabled)
    }

    /// Extract all text from a PDF on disk.
    ///
    /// `describe_images` enables the vision stage (used for standards, not
    /// for plans). Returns `Err` only when native extraction failed and no
    /// fallback produced any text.
    pub async fn extract(&self, path: &Path, describe_images: bool) -> Result<String, ExtractError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ExtractError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !is_pdf(path) {
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }

        let native = tokio::task::spawn_blocking(move || extract_pages(&bytes))
            .await
            .unwrap_or_else(|e| Err(ExtractError::Pdf(format!("extraction task failed: {}", e))));
        let (mut text, native_err) = match native {
            Ok(pages) => (format_pages(&pages), None),
            Err(e) => {
                tracing::warn!(file = %filename, error = %e, "native text extraction failed");
                (String::new(), Some(e))
            }
        };

        let chars = text.trim().chars().count();
        if chars < self.settings.ocr_threshold_chars {
            if let Some(engine) = self.ocr_engine() {
                tracing::info!(file = %filename, chars, "little native text, running OCR");
                let ocr_text = self.ocr_pages(engine.as_ref(), path).await;
                if !ocr_text.is_empty() {
                    text.push_str(&format!("\n\n{}\n{}", OCR_TAG, ocr_text));
                }
            }
        }

        if let Some(err) = native_err {
            if text.trim().is_empty() {
                return Err(err);
            }
        }

        if describe_images
            && self.settings.vision_enabled
            && wants_vision(&filename, &self.settings.vision_keywords)
        {
            if let Some(describer) = &self.describer {
                let analysis = self.describe_pages(describer.as_ref(), path, &filename).await;
                if !analysis.is_empty() {
                    text.push_str(&format!("\n\n{}\n{}", VISION_TAG, analysis));
                }
            }
        }

        Ok(text)
    }

    async fn ocr_pages(&self, engine: &dyn OcrEngine, path: &Path) -> String {
        let pages = match self
            .renderer
            .render(path, self.settings.ocr_max_pages, self.settings.ocr_dpi)
            .await
        {
            Ok(pages) => pages,
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "OCR rendering failed");
                return String::new();
            }
        };

        let mut out = String::new();
        for page in pages {
            match engine.recognize(&page.jpeg, &self.settings.ocr_language).await {
                Ok(text) if !text.trim().is_empty() => {
                    out.push_str(&format!("[OCR Page {}]\n{}\n\n", page.number, text.trim()));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(page = page.number, error = %e, "OCR failed for page");
                }
            }
        }
        tracing::info!(file = %path.display(), chars = out.len(), "OCR finished");
        out
    }

    async fn describe_pages(
        &self,
        describer: &dyn ImageDescriber,
        path: &Path,
        filename: &str,
    ) -> String {
        let pages = match self
            .renderer
            .render(path, self.settings.vision_max_pages, self.settings.vision_dpi)
            .await
        {
            Ok(pages) => pages,
            Err(e) => {
                tracing::error!(file = %filename, error = %e, "rendering for image analysis failed");
                return String::new();
            }
        };

        let delay = Duration::from_millis(self.settings.vision_delay_ms);
        let mut analyses = Vec::new();
        for (i, page) in pages.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match describer
                .describe(&page.jpeg, &page_prompt(page.number, filename))
                .await
            {
                Ok(completion) => {
                    self.usage
                        .record_or_warn("vision", completion.total_tokens)
                        .await;
                    if !completion.text.trim().is_empty() {
                        analyses.push(format!(
                            "[Page {} image analysis]\n{}",
                            page.number,
                            completion.text.trim()
                        ));
                    }
                }
                Err(e) => {
                    tracing::warn!(page = page.number, error = %e, "image analysis failed for page");
                }
            }
        }
        analyses.join("\n\n")
    }
}
