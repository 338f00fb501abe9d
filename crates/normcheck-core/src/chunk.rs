//! Recursive, overlap-aware text chunker.
//!
//! Splits extracted standard text into fixed-size windows measured in
//! characters. The splitter prefers coarse boundaries: it splits on paragraph
//! breaks first, then line breaks, then spaces, and finally between
//! individual characters when a piece still exceeds the window size.
//!
//! Adjacent small pieces are merged back into windows of at most
//! `chunk_size` characters; each new window starts with up to `overlap`
//! characters carried over from the end of the previous one.
//!
//! # Example
//!
//! ```rust
//! use normcheck_core::chunk::RecursiveSplitter;
//!
//! let splitter = RecursiveSplitter::new(500, 100);
//! let windows = splitter.split("Erster Absatz.\n\nZweiter Absatz.");
//! assert_eq!(windows, vec!["Erster Absatz.\n\nZweiter Absatz.".to_string()]);
//! ```

use std::collections::VecDeque;

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Segment;

/// Separators in order of preference.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Character-window splitter over [`DEFAULT_SEPARATORS`]. The list ends in
/// `""`, so every window can be split down to `chunk_size`.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Split `text` into windows of at most `chunk_size` characters.
    ///
    /// Windows are trimmed; whitespace-only windows are dropped.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &DEFAULT_SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&'static str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&'static str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(*sep) {
                separator = *sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut windows = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                windows.extend(self.merge(&pending, separator));
                pending.clear();
            }
            if finer.is_empty() {
                windows.push(piece.to_string());
            } else {
                windows.extend(self.split_with(piece, finer));
            }
        }

        if !pending.is_empty() {
            windows.extend(self.merge(&pending, separator));
        }

        windows
    }

    /// Greedily join small pieces into windows, carrying an overlap tail.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut windows = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joiner = if current.is_empty() { 0 } else { sep_len };

            if total + len + joiner > self.chunk_size && !current.is_empty() {
                push_joined(&mut windows, &current, separator);

                // Drop from the front until only the overlap tail remains and
                // the next piece fits.
                while let Some(front_len) = current.front().map(|f| char_len(f)) {
                    let over_overlap = total > self.overlap;
                    let too_big = total + len + sep_len > self.chunk_size && total > 0;
                    if !over_overlap && !too_big {
                        break;
                    }
                    let extra = if current.len() > 1 { sep_len } else { 0 };
                    total = total.saturating_sub(front_len + extra);
                    current.pop_front();
                }
            }

            current.push_back(piece);
            total += len + if current.len() > 1 { sep_len } else { 0 };
        }

        push_joined(&mut windows, &current, separator);
        windows
    }
}

fn push_joined(windows: &mut Vec<String>, current: &VecDeque<&str>, separator: &str) {
    let joined = current.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        windows.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Turns a document's text into indexable [`Segment`]s.
#[derive(Debug, Clone)]
pub struct Chunker {
    splitter: RecursiveSplitter,
    min_chars: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize, min_chars: usize) -> Self {
        Self {
            splitter: RecursiveSplitter::new(chunk_size, overlap),
            min_chars,
        }
    }

    /// Split `text` and wrap each window as a segment of `document_id`.
    ///
    /// Windows shorter than `min_chars` after trimming are discarded; the
    /// survivors keep their original ordinal index.
    pub fn segment(&self, document_id: &str, source: &str, text: &str) -> Vec<Segment> {
        self.splitter
            .split(text)
            .into_iter()
            .enumerate()
            .filter(|(_, window)| char_len(window.trim()) >= self.min_chars)
            .map(|(index, window)| make_segment(document_id, source, index, window))
            .collect()
    }
}

fn make_segment(document_id: &str, source: &str, index: usize, text: String) -> Segment {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Segment {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        source: source.to_string(),
        chunk_index: index,
        text,
        hash,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_small_text_single_window() {
        let splitter = RecursiveSplitter::new(500, 100);
        let windows = splitter.split("  Bewehrung nach DIN 1045.  ");
        assert_eq!(windows, vec!["Bewehrung nach DIN 1045.".to_string()]);
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        let splitter = RecursiveSplitter::new(500, 100);
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("   \n\n  ").is_empty());
    }

    #[test]
    fn test_windows_never_exceed_chunk_size() {
        let splitter = RecursiveSplitter::new(500, 100);
        let text = words(2000);
        let windows = splitter.split(&text);
        assert!(windows.len() > 1);
        for w in &windows {
            assert!(char_len(w) <= 500, "window too long: {}", char_len(w));
        }
    }

    #[test]
    fn test_unbroken_text_is_split_by_characters() {
        let splitter = RecursiveSplitter::new(100, 20);
        let text = "Ü".repeat(450);
        let windows = splitter.split(&text);
        assert!(windows.len() >= 5);
        assert!(windows.iter().all(|w| char_len(w) <= 100));
    }

    #[test]
    fn test_paragraph_breaks_preferred() {
        let a = "a".repeat(300);
        let b = "b".repeat(300);
        let splitter = RecursiveSplitter::new(500, 100);
        let windows = splitter.split(&format!("{}\n\n{}", a, b));
        assert_eq!(windows, vec![a, b]);
    }

    #[test]
    fn test_consecutive_windows_overlap() {
        let splitter = RecursiveSplitter::new(50, 10);
        let windows = splitter.split(&words(100));
        assert!(windows.len() > 2);
        for pair in windows.windows(2) {
            let first_word = pair[1].split(' ').next().unwrap();
            assert!(
                pair[0].split(' ').any(|w| w == first_word),
                "{:?} does not overlap {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_unbroken_text_falls_back_to_characters() {
        let splitter = RecursiveSplitter::new(100, 20);
        let windows = splitter.split(&"ä".repeat(250));
        assert!(windows.len() >= 3);
        for w in &windows {
            assert!(char_len(w) <= 100);
        }
    }

    #[test]
    fn test_short_windows_are_discarded() {
        let chunker = Chunker::new(500, 100, 50);
        let long = "x".repeat(498);
        let segments = chunker.segment("DIN_1045", "DIN_1045.pdf", &format!("{}\n\nKurz.", long));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, long);
        assert_eq!(segments[0].chunk_index, 0);
    }

    #[test]
    fn test_surviving_segments_keep_ordinal_index() {
        let chunker = Chunker::new(500, 100, 50);
        let long = "y".repeat(498);
        let segments = chunker.segment("DIN_1052", "DIN_1052.pdf", &format!("Kurz.\n\n{}", long));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].chunk_index, 1);
        assert_eq!(segments[0].document_id, "DIN_1052");
        assert_eq!(segments[0].source, "DIN_1052.pdf");
    }

    #[test]
    fn test_segment_hash_is_deterministic() {
        let chunker = Chunker::new(500, 100, 10);
        let text = "Treppen in Wohngebäuden müssen eine Mindestlaufbreite haben.";
        let a = chunker.segment("d", "d.pdf", text);
        let b = chunker.segment("d", "d.pdf", text);
        assert_eq!(a[0].hash, b[0].hash);
        assert_ne!(a[0].id, b[0].id);
    }
}
