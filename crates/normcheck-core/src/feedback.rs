//! Reviewer feedback records and the digest injected into analysis prompts.
//!
//! Feedback is rated on a 1–5 scale. High ratings are kept as positive
//! examples, low ratings as negative examples, and the middle rating is
//! dropped. The two lists only ever grow; the digest summarises them by
//! deduplicating aspects and counting how often each was mentioned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::truncate_chars;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;
/// Ratings at or above this value are positive examples.
pub const POSITIVE_FROM: u8 = 4;
/// Ratings at or below this value are negative examples.
pub const NEGATIVE_UP_TO: u8 = 2;
pub const EXCERPT_CHARS: usize = 1000;
pub const TOP_ASPECTS: usize = 5;

#[derive(Debug, Error, PartialEq)]
pub enum FeedbackError {
    #[error("rating {0} is outside {MIN_RATING}..={MAX_RATING}")]
    RatingOutOfRange(u8),
}

/// Feedback as submitted by a reviewer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: u8,
    #[serde(default)]
    pub positive_aspects: Vec<String>,
    #[serde(default)]
    pub negative_aspects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// One stored example in the feedback log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackExample {
    #[serde(alias = "plan_excerpt")]
    pub excerpt: String,
    #[serde(default, alias = "positive_aspects", alias = "negative_aspects")]
    pub aspects: Vec<String>,
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

/// Which list a rating belongs to, or `None` for the neutral middle.
pub fn classify(rating: u8) -> Result<Option<Polarity>, FeedbackError> {
    if !(MIN_RATING..=MAX_RATING).contains(&rating) {
        return Err(FeedbackError::RatingOutOfRange(rating));
    }
    Ok(if rating >= POSITIVE_FROM {
        Some(Polarity::Positive)
    } else if rating <= NEGATIVE_UP_TO {
        Some(Polarity::Negative)
    } else {
        None
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackStats {
    pub positive: usize,
    pub negative: usize,
    pub average_rating: Option<f64>,
}

/// The on-disk feedback log: two append-only lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackDb {
    #[serde(default)]
    pub positive_examples: Vec<FeedbackExample>,
    #[serde(default)]
    pub negative_examples: Vec<FeedbackExample>,
}

impl FeedbackDb {
    /// Append `feedback` to the list its rating selects.
    ///
    /// Returns the list it went to, `None` when the rating was neutral and
    /// nothing was stored.
    pub fn add(
        &mut self,
        plan_text: &str,
        feedback: Feedback,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Polarity>, FeedbackError> {
        let polarity = classify(feedback.rating)?;
        let Some(polarity) = polarity else {
            return Ok(None);
        };

        let (list, aspects) = match polarity {
            Polarity::Positive => (&mut self.positive_examples, feedback.positive_aspects),
            Polarity::Negative => (&mut self.negative_examples, feedback.negative_aspects),
        };
        list.push(FeedbackExample {
            excerpt: truncate_chars(plan_text, EXCERPT_CHARS),
            aspects,
            rating: feedback.rating,
            comments: feedback.comments,
            timestamp,
        });
        Ok(Some(polarity))
    }

    pub fn is_empty(&self) -> bool {
        self.positive_examples.is_empty() && self.negative_examples.is_empty()
    }

    pub fn stats(&self) -> FeedbackStats {
        let ratings: Vec<u8> = self
            .positive_examples
            .iter()
            .chain(&self.negative_examples)
            .map(|e| e.rating)
            .collect();
        let average_rating = (!ratings.is_empty())
            .then(|| ratings.iter().map(|&r| r as f64).sum::<f64>() / ratings.len() as f64);
        FeedbackStats {
            positive: self.positive_examples.len(),
            negative: self.negative_examples.len(),
            average_rating,
        }
    }

    /// Render the prompt section summarising all stored feedback.
    ///
    /// Empty when no feedback has been stored.
    pub fn digest(&self) -> String {
        let mut lines: Vec<String> = Vec::new();

        if !self.positive_examples.is_empty() {
            lines.push("=== BEST PRACTICES (from all positive feedback) ===".to_string());
            let counts = aspect_counts(&self.positive_examples);
            for (aspect, _) in &counts {
                lines.push(format!("+ Proven practice: {}", aspect));
            }
            if !counts.is_empty() {
                lines.push("Most praised aspects:".to_string());
                for (aspect, n) in top(&counts) {
                    lines.push(format!("  - {} (mentioned {}x)", aspect, n));
                }
            }
        }

        if !self.negative_examples.is_empty() {
            lines.push("=== COMMON MISTAKES (from all negative feedback) ===".to_string());
            let counts = aspect_counts(&self.negative_examples);
            for (aspect, _) in &counts {
                lines.push(format!("- Avoid: {}", aspect));
            }
            if !counts.is_empty() {
                lines.push("Most criticised aspects:".to_string());
                for (aspect, n) in top(&counts) {
                    lines.push(format!("  - {} (criticised {}x)", aspect, n));
                }
            }
        }

        if !self.is_empty() {
            lines.push(format!(
                "Feedback totals: {} positive, {} negative",
                self.positive_examples.len(),
                self.negative_examples.len()
            ));
        }

        lines.join("\n")
    }
}

/// Distinct aspects in first-seen order with their mention counts.
fn aspect_counts(examples: &[FeedbackExample]) -> Vec<(&str, usize)> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for aspect in examples.iter().flat_map(|e| e.aspects.iter()) {
        match counts.iter_mut().find(|(a, _)| *a == aspect.as_str()) {
            Some((_, n)) => *n += 1,
            None => counts.push((aspect.as_str(), 1)),
        }
    }
    counts
}

fn top<'a>(counts: &[(&'a str, usize)]) -> Vec<(&'a str, usize)> {
    let mut ranked = counts.to_vec();
    // Stable: equal counts keep first-seen order.
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(TOP_ASPECTS);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positive(rating: u8, aspects: &[&str]) -> Feedback {
        Feedback {
            rating,
            positive_aspects: aspects.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn negative(rating: u8, aspects: &[&str]) -> Feedback {
        Feedback {
            rating,
            negative_aspects: aspects.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_bands() {
        assert_eq!(classify(5), Ok(Some(Polarity::Positive)));
        assert_eq!(classify(4), Ok(Some(Polarity::Positive)));
        assert_eq!(classify(3), Ok(None));
        assert_eq!(classify(2), Ok(Some(Polarity::Negative)));
        assert_eq!(classify(1), Ok(Some(Polarity::Negative)));
        assert_eq!(classify(0), Err(FeedbackError::RatingOutOfRange(0)));
        assert_eq!(classify(6), Err(FeedbackError::RatingOutOfRange(6)));
    }

    #[test]
    fn test_add_routes_by_rating() {
        let mut db = FeedbackDb::default();
        let now = Utc::now();
        db.add("plan a", positive(5, &["clear dimensions"]), now).unwrap();
        db.add("plan b", negative(1, &["missing railing"]), now).unwrap();
        assert_eq!(db.add("plan c", positive(3, &["ignored"]), now), Ok(None));
        assert!(db.add("plan d", positive(9, &[]), now).is_err());

        assert_eq!(db.positive_examples.len(), 1);
        assert_eq!(db.negative_examples.len(), 1);
        assert_eq!(db.positive_examples[0].aspects, vec!["clear dimensions"]);
        assert_eq!(db.negative_examples[0].aspects, vec!["missing railing"]);
    }

    #[test]
    fn test_excerpt_is_truncated() {
        let mut db = FeedbackDb::default();
        let text = "ü".repeat(1500);
        db.add(&text, positive(4, &[]), Utc::now()).unwrap();
        assert_eq!(db.positive_examples[0].excerpt.chars().count(), EXCERPT_CHARS);
    }

    #[test]
    fn test_digest_empty_when_no_feedback() {
        assert_eq!(FeedbackDb::default().digest(), "");
    }

    #[test]
    fn test_digest_dedups_and_ranks() {
        let mut db = FeedbackDb::default();
        let now = Utc::now();
        db.add("p", positive(5, &["a", "b"]), now).unwrap();
        db.add("p", positive(4, &["b", "c"]), now).unwrap();
        db.add("p", positive(5, &["c", "b"]), now).unwrap();
        db.add("p", negative(2, &["x"]), now).unwrap();

        let digest = db.digest();
        assert_eq!(digest.matches("+ Proven practice: b").count(), 1);
        let b = digest.find("  - b (mentioned 3x)").unwrap();
        let c = digest.find("  - c (mentioned 2x)").unwrap();
        let a = digest.find("  - a (mentioned 1x)").unwrap();
        assert!(b < c && c < a);
        assert!(digest.contains("- Avoid: x"));
        assert!(digest.contains("  - x (criticised 1x)"));
        assert!(digest.ends_with("Feedback totals: 3 positive, 1 negative"));
    }

    #[test]
    fn test_digest_keeps_top_five() {
        let mut db = FeedbackDb::default();
        let aspects = ["a", "b", "c", "d", "e", "f", "g"];
        db.add("p", positive(5, &aspects), Utc::now()).unwrap();
        let digest = db.digest();
        assert_eq!(digest.matches("(mentioned 1x)").count(), TOP_ASPECTS);
        assert!(digest.contains("  - e (mentioned 1x)"));
        assert!(!digest.contains("  - f (mentioned"));
    }

    #[test]
    fn test_stats_average() {
        let mut db = FeedbackDb::default();
        assert_eq!(db.stats().average_rating, None);
        db.add("p", positive(5, &[]), Utc::now()).unwrap();
        db.add("p", negative(2, &[]), Utc::now()).unwrap();
        let stats = db.stats();
        assert_eq!(stats.positive, 1);
        assert_eq!(stats.negative, 1);
        assert_eq!(stats.average_rating, Some(3.5));
    }

    #[test]
    fn test_reads_legacy_field_names() {
        let json = r#"{
            "positive_examples": [
                {"plan_excerpt": "x", "positive_aspects": ["gut"], "rating": 5,
                 "timestamp": "2024-05-01T10:00:00Z"}
            ]
        }"#;
        let db: FeedbackDb = serde_json::from_str(json).unwrap();
        assert_eq!(db.positive_examples[0].excerpt, "x");
        assert_eq!(db.positive_examples[0].aspects, vec!["gut"]);
        assert!(db.negative_examples.is_empty());
    }
}
