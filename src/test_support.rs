//! Fixtures shared by unit tests.

use std::path::Path;
use std::sync::Arc;

use crate::config::{BudgetConfig, ExtractionConfig};
use crate::extract::TextExtractor;
use crate::ocr::Pdftoppm;
use crate::usage::UsageLedger;

const FONT_RESOURCES: &str = "/Resources << /Font << /F1 5 0 R >> >>";

/// Single-page PDF drawing `phrase` in Helvetica, with a correct xref table.
pub fn minimal_pdf(phrase: &str) -> Vec<u8> {
    single_page_pdf(phrase, FONT_RESOURCES)
}

/// Like [`minimal_pdf`] but the page has no `/Resources`, so the font the
/// content stream selects cannot be resolved.
pub fn pdf_without_resources(phrase: &str) -> Vec<u8> {
    single_page_pdf(phrase, "")
}

fn single_page_pdf(phrase: &str, resources: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(
        format!(
            "3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R {} >> endobj\n",
            resources
        )
        .as_bytes(),
    );
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Extractor with OCR and vision switched off.
pub fn text_only_extractor(dir: &Path) -> Arc<TextExtractor> {
    let settings = ExtractionConfig {
        ocr_enabled: false,
        vision_enabled: false,
        ..Default::default()
    };
    Arc::new(TextExtractor::new(
        settings,
        Arc::new(Pdftoppm::default()),
        None,
        None,
        Arc::new(UsageLedger::new(
            dir.join("usage_log.json"),
            BudgetConfig::default(),
        )),
    ))
}
