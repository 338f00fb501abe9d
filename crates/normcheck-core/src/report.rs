//! Compliance prompt construction and reply parsing.
//!
//! The analyzer sends the reasoning service a plan excerpt, the retrieved
//! standard passages and the feedback digest, and asks for a JSON object
//! with six fields. [`parse_reply`] turns the reply into a
//! [`ComplianceReport`]; replies wrapped in a Markdown code fence are
//! accepted, and the German field names used by earlier prompt revisions
//! are read as aliases.

use serde::{Deserialize, Serialize};

use crate::models::{truncate_chars, SegmentHit};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert for German DIN standards in \
building construction. Check the given construction plan against the relevant DIN \
standards and give a detailed analysis. Answer only with a single JSON object.";

/// Closed three-value verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallRating {
    #[serde(alias = "gut")]
    Good,
    #[serde(alias = "akzeptabel")]
    Acceptable,
    #[serde(alias = "problematisch")]
    Problematic,
}

/// A list entry in a report: usually a sentence, sometimes an object with
/// a reference and a description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportItem {
    Text(String),
    Detail(serde_json::Map<String, serde_json::Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    #[serde(default, alias = "erfuellte_anforderungen")]
    pub fulfilled_requirements: Vec<ReportItem>,
    #[serde(default, alias = "moegliche_verstoesse")]
    pub possible_violations: Vec<ReportItem>,
    #[serde(default, alias = "empfehlungen")]
    pub recommendations: Vec<ReportItem>,
    #[serde(default, alias = "kritische_punkte")]
    pub critical_points: Vec<ReportItem>,
    #[serde(default, alias = "anwendbare_normen")]
    pub applicable_standards: Vec<ReportItem>,
    #[serde(alias = "gesamtbewertung")]
    pub overall_rating: OverallRating,
}

/// Join the best `context_k` hits into the standards section of the prompt,
/// each passage cut to `context_chars` characters.
pub fn build_norm_context(hits: &[SegmentHit], context_k: usize, context_chars: usize) -> String {
    hits.iter()
        .take(context_k)
        .map(|hit| {
            format!(
                "{}:\n{}",
                hit.document_id,
                truncate_chars(&hit.content, context_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Assemble the user prompt. `plan_payload` is used as given; callers bound
/// its length.
pub fn build_user_prompt(plan_payload: &str, norm_context: &str, feedback_digest: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("Check this construction plan excerpt against the DIN standards.\n\n");
    prompt.push_str("PLAN:\n");
    prompt.push_str(plan_payload);
    prompt.push_str("\n\nRELEVANT DIN STANDARDS:\n");
    prompt.push_str(norm_context);
    prompt.push_str("\n\n");
    if !feedback_digest.is_empty() {
        prompt.push_str(feedback_digest);
        prompt.push_str("\n\n");
    }
    prompt.push_str(
        "Reply with a JSON object containing:\n\
         1. \"fulfilled_requirements\": list of DIN requirements that are met\n\
         2. \"possible_violations\": list of possible violations or problems\n\
         3. \"recommendations\": concrete recommendations for improvement\n\
         4. \"critical_points\": especially important points that should be checked\n\
         5. \"applicable_standards\": list of relevant DIN standards with references\n\
         6. \"overall_rating\": one of \"good\", \"acceptable\", \"problematic\"\n\n\
         Take the best practices above into account and avoid the common mistakes.\n\
         JSON only, no other text.",
    );
    prompt
}

/// Parse a reasoning-service reply into a report.
pub fn parse_reply(raw: &str) -> Result<ComplianceReport, serde_json::Error> {
    serde_json::from_str(strip_code_fence(raw))
}

/// Remove a surrounding ```json ... ``` fence if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string (e.g. `json`) on the opening line.
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
