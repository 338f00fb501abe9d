//! Retrieval-augmented compliance check.
//!
//! # Flow
//!
//! ```text
//! plan text ──▶ first query_chars chars ──▶ Retriever::search(k = retrieval_k)
//!                                               │
//!                         no hits ◀─────────────┤
//!                  "no relevant standards found"│
//!                                               ▼
//!          top context_k hits + feedback digest + first payload_chars chars
//!                                               │
//!                                               ▼
//!                         Completer::complete ──▶ parse_reply
//! ```
//!
//! [`Analyzer::check`] never returns an error: every failure becomes a
//! [`CheckResult`] whose outcome carries an `error` message. All results
//! carry the timestamp, the number of standards retrieved and the top three
//! standard identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use normcheck_core::models::{truncate_chars, SegmentHit};
use normcheck_core::report::{
    build_norm_context, build_user_prompt, parse_reply, ComplianceReport, DEFAULT_SYSTEM_PROMPT,
};

use crate::client::ClientError;
use crate::completion::Completer;
use crate::config::AnalysisConfig;
use crate::feedback::FeedbackLog;
use crate::retrieval::Retriever;
use crate::usage::UsageLedger;

pub const NO_STANDARDS_ERROR: &str = "no relevant standards found";
pub const PARSE_FAILURE_ERROR: &str = "parse failure";
const NO_STANDARDS_SUGGESTION: &str =
    "Upload DIN standards and process them before checking plans.";
const RAW_RESPONSE_CHARS: usize = 500;
const TOP_STANDARDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub timestamp: DateTime<Utc>,
    pub standards_found: usize,
    pub top_standards: Vec<String>,
    #[serde(flatten)]
    pub outcome: CheckOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckOutcome {
    Report {
        report: ComplianceReport,
        model: String,
    },
    Failed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggestion: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_response: Option<String>,
    },
}

impl CheckResult {
    fn new(hits: &[SegmentHit], outcome: CheckOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            standards_found: hits.len(),
            top_standards: hits
                .iter()
                .take(TOP_STANDARDS)
                .map(|h| h.document_id.clone())
                .collect(),
            outcome,
        }
    }

    fn failed(hits: &[SegmentHit], error: impl Into<String>) -> Self {
        Self::new(
            hits,
            CheckOutcome::Failed {
                error: error.into(),
                suggestion: None,
                raw_response: None,
            },
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CheckOutcome::Report { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            CheckOutcome::Failed { error, .. } => Some(error),
            CheckOutcome::Report { .. } => None,
        }
    }
}

/// Read the system prompt override, falling back to the built-in prompt.
pub fn load_system_prompt(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_SYSTEM_PROMPT.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(prompt) if !prompt.trim().is_empty() => prompt.trim().to_string(),
        Ok(_) => DEFAULT_SYSTEM_PROMPT.to_string(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "using built-in system prompt");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

pub struct Analyzer {
    retriever: Arc<dyn Retriever>,
    completer: Option<Arc<dyn Completer>>,
    feedback: Arc<FeedbackLog>,
    usage: Arc<UsageLedger>,
    settings: AnalysisConfig,
    system_prompt: String,
}

impl Analyzer {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        completer: Option<Arc<dyn Completer>>,
        feedback: Arc<FeedbackLog>,
        usage: Arc<UsageLedger>,
        settings: AnalysisConfig,
    ) -> Self {
        Self {
            retriever,
            completer,
            feedback,
            usage,
            settings,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = prompt;
        self
    }

    /// Check `plan_text` against the indexed standards.
    pub async fn check(&self, plan_text: &str) -> CheckResult {
        let query = truncate_chars(plan_text, self.settings.query_chars);
        let hits = match self.retriever.search(&query, self.settings.retrieval_k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::error!(error = %e, "standard retrieval failed");
                return CheckResult::failed(&[], format!("retrieval failed: {:#}", e));
            }
        };

        if hits.is_empty() {
            tracing::info!("no relevant standards found for plan");
            return CheckResult::new(
                &hits,
                CheckOutcome::Failed {
                    error: NO_STANDARDS_ERROR.to_string(),
                    suggestion: Some(NO_STANDARDS_SUGGESTION.to_string()),
                    raw_response: None,
                },
            );
        }

        let Some(completer) = &self.completer else {
            return CheckResult::failed(
                &hits,
                format!("reasoning service unavailable: {}", ClientError::MissingApiKey),
            );
        };

        let context = build_norm_context(&hits, self.settings.context_k, self.settings.context_chars);
        let digest = self.feedback.digest().await;
        let payload = truncate_chars(plan_text, self.settings.payload_chars);
        let prompt = build_user_prompt(&payload, &context, &digest);

        tracing::info!(
            standards = hits.len(),
            model = completer.model_name(),
            "requesting compliance analysis"
        );
        let completion = match completer.complete(&self.system_prompt, &prompt).await {
            Ok(completion) => completion,
            Err(e) => {
                tracing::error!(error = %e, "compliance analysis request failed");
                return CheckResult::failed(&hits, e.to_string());
            }
        };
        self.usage
            .record_or_warn("din_check", completion.total_tokens)
            .await;

        match parse_reply(&completion.text) {
            Ok(report) => CheckResult::new(
                &hits,
                CheckOutcome::Report {
                    report,
                    model: completer.model_name().to_string(),
                },
            ),
            Err(e) => {
                tracing::warn!(error = %e, "analysis reply is not valid report JSON");
                CheckResult::new(
                    &hits,
                    CheckOutcome::Failed {
                        error: PARSE_FAILURE_ERROR.to_string(),
                        suggestion: None,
                        raw_response: Some(truncate_chars(&completion.text, RAW_RESPONSE_CHARS)),
                    },
                )
            }
        }
    }
}
