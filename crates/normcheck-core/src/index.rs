//! In-memory similarity structures.
//!
//! - [`FlatIndex`] stores one embedding per [`Segment`] and answers exact
//!   nearest-neighbour queries by brute-force squared Euclidean distance.
//!   Indexes built from separate batches are combined with
//!   [`FlatIndex::merge`].
//! - [`KeywordTable`] is the degraded-mode substitute: it scores stored raw
//!   texts by how many query terms they contain.
//!
//! Both rank deterministically: equal scores keep insertion order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::squared_l2;
use crate::models::{Segment, SegmentHit};

#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    #[error("cannot build an index from an empty batch")]
    EmptyBatch,
    #[error("batch has {segments} segments but {vectors} vectors")]
    LengthMismatch { segments: usize, vectors: usize },
    #[error("vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Exact nearest-neighbour index over segment embeddings.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dims: usize,
    segments: Vec<Segment>,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    /// Build an index from one batch of segments and their vectors.
    pub fn from_batch(segments: Vec<Segment>, vectors: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        if segments.len() != vectors.len() {
            return Err(IndexError::LengthMismatch {
                segments: segments.len(),
                vectors: vectors.len(),
            });
        }
        let dims = vectors.first().map(Vec::len).ok_or(IndexError::EmptyBatch)?;
        Self::from_parts(dims, segments, vectors)
    }

    /// Reassemble an index from persisted parts, validating every row.
    pub fn from_parts(
        dims: usize,
        segments: Vec<Segment>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if segments.len() != vectors.len() {
            return Err(IndexError::LengthMismatch {
                segments: segments.len(),
                vectors: vectors.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                actual: bad.len(),
            });
        }
        Ok(Self {
            dims,
            segments,
            vectors,
        })
    }

    /// Append every record of `other` after the records already held.
    pub fn merge(&mut self, other: FlatIndex) -> Result<(), IndexError> {
        if other.dims != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: other.dims,
            });
        }
        self.segments.extend(other.segments);
        self.vectors.extend(other.vectors);
        Ok(())
    }

    /// Return the `k` segments closest to `query`, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SegmentHit>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, squared_l2(query, v)))
            .collect();
        // Stable sort: equal distances stay in insertion order.
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, dist)| SegmentHit::from_segment(&self.segments[i], dist as f64))
            .collect())
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }
}

/// One record of the degraded-mode keyword table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordEntry {
    pub document_id: String,
    pub source: String,
    pub chunk_index: usize,
    pub content: String,
    pub processed: DateTime<Utc>,
}

/// Term-overlap scorer used when no embedding backend is available.
#[derive(Debug, Clone, Default)]
pub struct KeywordTable {
    entries: Vec<KeywordEntry>,
}

impl KeywordTable {
    pub fn from_entries(entries: Vec<KeywordEntry>) -> Self {
        Self { entries }
    }

    pub fn from_segments(segments: &[Segment]) -> Self {
        let entries = segments
            .iter()
            .map(|s| KeywordEntry {
                document_id: s.document_id.clone(),
                source: s.source.clone(),
                chunk_index: s.chunk_index,
                content: s.text.clone(),
                processed: s.created_at,
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[KeywordEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Score every entry by the number of (lower-cased, whitespace-split)
    /// query terms its text contains and return the best `k` with a score
    /// above zero.
    pub fn search(&self, query: &str, k: usize) -> Vec<SegmentHit> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, usize)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let content_lower = entry.content.to_lowercase();
                let score = terms.iter().filter(|t| content_lower.contains(*t)).count();
                (score > 0).then_some((i, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| {
                let entry = &self.entries[i];
                SegmentHit {
                    document_id: entry.document_id.clone(),
                    source: entry.source.clone(),
                    chunk_index: entry.chunk_index,
                    content: crate::models::truncate_chars(
                        &entry.content,
                        crate::models::HIT_PREVIEW_CHARS,
                    ),
                    score: score as f64,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(doc: &str, index: usize, text: &str) -> Segment {
        Segment {
            id: format!("{}-{}", doc, index),
            document_id: doc.to_string(),
            source: format!("{}.pdf", doc),
            chunk_index: index,
            text: text.to_string(),
            hash: String::new(),
            created_at: Utc::now(),
        }
    }

    fn fixture() -> FlatIndex {
        FlatIndex::from_batch(
            vec![
                segment("DIN_A", 0, "a0"),
                segment("DIN_A", 1, "a1"),
                segment("DIN_B", 0, "b0"),
                segment("DIN_C", 0, "c0"),
            ],
            vec![
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![0.0, 1.0],
                vec![5.0, 5.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_search_returns_nearest_first() {
        let index = fixture();
        let hits = index.search(&[0.9, 0.1], 2).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a0"]);
        assert!(hits[0].score <= hits[1].score);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = fixture();
        // (1,0) and (0,1) are equidistant from (0.5,0.5); (0,0) too.
        let hits = index.search(&[0.5, 0.5], 3).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(ids, vec!["a0", "a1", "b0"]);
    }

    #[test]
    fn test_k_larger_than_index() {
        let index = fixture();
        assert_eq!(index.search(&[0.0, 0.0], 50).unwrap().len(), 4);
    }

    #[test]
    fn test_merge_appends_after_existing() {
        let mut index = FlatIndex::from_batch(vec![segment("X", 0, "x0")], vec![vec![2.0, 2.0]]).unwrap();
        let batch = FlatIndex::from_batch(vec![segment("Y", 0, "y0")], vec![vec![2.0, 2.0]]).unwrap();
        index.merge(batch).unwrap();
        assert_eq!(index.len(), 2);
        let hits = index.search(&[2.0, 2.0], 2).unwrap();
        assert_eq!(hits[0].content, "x0");
        assert_eq!(hits[1].content, "y0");
    }

    #[test]
    fn test_merge_rejects_other_dimensions() {
        let mut index = fixture();
        let other = FlatIndex::from_batch(vec![segment("Z", 0, "z")], vec![vec![1.0, 2.0, 3.0]]).unwrap();
        assert_eq!(
            index.merge(other),
            Err(IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_batch_validation() {
        assert_eq!(
            FlatIndex::from_batch(vec![], vec![]).unwrap_err(),
            IndexError::EmptyBatch
        );
        assert!(matches!(
            FlatIndex::from_batch(vec![segment("A", 0, "a")], vec![]),
            Err(IndexError::LengthMismatch { .. })
        ));
        assert!(fixture().search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_keyword_ranking_by_overlap() {
        let table = KeywordTable::from_segments(&[
            segment("DIN_18065", 0, "Treppen Steigung Auftritt"),
            segment("DIN_1045", 0, "Beton Stahlbeton Bewehrung"),
            segment("DIN_1045", 1, "Beton Betondeckung"),
        ]);
        let hits = table.search("beton BEWEHRUNG Fenster", 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_index, 0);
        assert_eq!(hits[0].document_id, "DIN_1045");
        assert_eq!(hits[0].score, 2.0);
        assert_eq!(hits[1].score, 1.0);
    }

    #[test]
    fn test_keyword_ties_keep_insertion_order() {
        let table = KeywordTable::from_segments(&[
            segment("A", 0, "wand"),
            segment("B", 0, "decke"),
            segment("C", 0, "wand decke"),
            segment("D", 0, "wand"),
        ]);
        let hits = table.search("wand", 10);
        let docs: Vec<_> = hits.iter().map(|h| h.document_id.as_str()).collect();
        assert_eq!(docs, vec!["A", "C", "D"]);
    }

    #[test]
    fn test_keyword_empty_query() {
        let table = KeywordTable::from_segments(&[segment("A", 0, "wand")]);
        assert!(table.search("   ", 3).is_empty());
    }
}
