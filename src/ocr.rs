//! Page rendering and optical character recognition.
//!
//! Both collaborators shell out to the usual command-line tools:
//! `pdftoppm` (poppler) renders pages to JPEG, `tesseract` recognizes text.
//! They sit behind traits so the pipeline can run with fakes in tests or
//! with OCR switched off entirely.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::extract::ExtractError;

/// One rendered page as JPEG bytes. `number` is 1-based.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub number: u32,
    pub jpeg: Vec<u8>,
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render pages `1..=max_pages` (or fewer, if the document is shorter).
    async fn render(
        &self,
        pdf: &Path,
        max_pages: u32,
        dpi: u32,
    ) -> Result<Vec<RenderedPage>, ExtractError>;
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &[u8], language: &str) -> Result<String, ExtractError>;
}

/// Renders pages with poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct Pdftoppm {
    program: String,
}

impl Default for Pdftoppm {
    fn default() -> Self {
        Self {
            program: "pdftoppm".to_string(),
        }
    }
}

#[async_trait]
impl PageRenderer for Pdftoppm {
    async fn render(
        &self,
        pdf: &Path,
        max_pages: u32,
        dpi: u32,
    ) -> Result<Vec<RenderedPage>, ExtractError> {
        let dir = tempfile::tempdir().map_err(|source| ExtractError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let prefix = dir.path().join("page");

        let output = Command::new(&self.program)
            .arg("-f")
            .arg("1")
            .arg("-l")
            .arg(max_pages.to_string())
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-jpeg")
            .arg(pdf)
            .arg(&prefix)
            .output()
            .await
            .map_err(|e| ExtractError::Tool {
                tool: "pdftoppm",
                detail: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(ExtractError::Tool {
                tool: "pdftoppm",
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.path())
            .await
            .map_err(|source| ExtractError::Io {
                path: dir.path().to_path_buf(),
                source,
            })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| ExtractError::Io {
                path: dir.path().to_path_buf(),
                source,
            })?
        {
            let path = entry.path();
            let Some(number) = page_number(&path) else {
                continue;
            };
            let jpeg = tokio::fs::read(&path)
                .await
                .map_err(|source| ExtractError::Io {
                    path: path.clone(),
                    source,
                })?;
            pages.push(RenderedPage { number, jpeg });
        }
        pages.sort_by_key(|p| p.number);
        Ok(pages)
    }
}

/// `page-07.jpg` → 7. pdftoppm zero-pads according to the page count.
fn page_number(path: &Path) -> Option<u32> {
    if path.extension()? != "jpg" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    stem.rsplit('-').next()?.parse().ok()
}

/// Recognizes text with the `tesseract` CLI.
#[derive(Debug, Clone)]
pub struct Tesseract {
    program: String,
}

impl Default for Tesseract {
    fn default() -> Self {
        Self {
            program: "tesseract".to_string(),
        }
    }
}

#[async_trait]
impl OcrEngine for Tesseract {
    async fn recognize(&self, image: &[u8], language: &str) -> Result<String, ExtractError> {
        let file = tempfile::Builder::new()
            .suffix(".jpg")
            .tempfile()
            .map_err(|source| ExtractError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        tokio::fs::write(file.path(), image)
            .await
            .map_err(|source| ExtractError::Io {
                path: file.path().to_path_buf(),
                source,
            })?;

        // Block segmentation with the LSTM engine.
        let output = Command::new(&self.program)
            .arg(file.path())
            .arg("stdout")
            .args(["-l", language, "--psm", "6", "--oem", "3"])
            .output()
            .await
            .map_err(|e| ExtractError::Tool {
                tool: "tesseract",
                detail: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(ExtractError::Tool {
                tool: "tesseract",
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
