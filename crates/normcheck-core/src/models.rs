//! Core data models shared by the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum characters of segment content returned in a [`SegmentHit`].
pub const HIT_PREVIEW_CHARS: usize = 1000;

/// A bounded slice of extracted standard text; the unit of retrieval.
///
/// Segments are immutable. Re-ingesting a changed document discards and
/// rebuilds all of its segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    /// Identifier of the parent standard (the PDF file stem, e.g. `DIN_18065`).
    pub document_id: String,
    /// File name the segment was extracted from.
    pub source: String,
    /// Ordinal position of the window within the parent document.
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// A retrieval result: segment metadata plus a truncated content preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentHit {
    pub document_id: String,
    pub source: String,
    pub chunk_index: usize,
    pub content: String,
    /// Squared distance for vector search (lower is closer) or the number of
    /// matching terms in keyword mode (higher is better).
    pub score: f64,
}

impl SegmentHit {
    pub fn from_segment(segment: &Segment, score: f64) -> Self {
        Self {
            document_id: segment.document_id.clone(),
            source: segment.source.clone(),
            chunk_index: segment.chunk_index,
            content: truncate_chars(&segment.text, HIT_PREVIEW_CHARS),
            score,
        }
    }
}

/// A source file as seen on disk at ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    /// Modification time in fractional seconds since the Unix epoch.
    pub last_modified: f64,
    pub size: u64,
    pub path: String,
}

/// Returns at most `max` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
