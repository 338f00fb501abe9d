//! End-to-end checks of the service with in-process fakes for the
//! embedding and reasoning services.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use normcheck::client::{ClientError, Completion};
use normcheck::completion::Completer;
use normcheck::config::Config;
use normcheck::feedback::FeedbackLog;
use normcheck::server::router;
use normcheck::service::{Checker, Components};
use normcheck_core::embedding::Embedder;
use normcheck_core::feedback::Feedback;
use normcheck_core::manifest::RetrievalMode;

const TOPICS: [&str; 3] = ["treppe", "schall", "brand"];

/// One dimension per topic word plus a bias so no vector is all zeros.
struct TopicEmbedder;

#[async_trait]
impl Embedder for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let mut v: Vec<f32> = TOPICS
                    .iter()
                    .map(|t| lower.matches(t).count().min(5) as f32)
                    .collect();
                v.push(1.0);
                v
            })
            .collect())
    }
}

struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding service unreachable")
    }
}

/// Replies with a fixed text and remembers the user prompts it saw.
struct RecordingCompleter {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl RecordingCompleter {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Completer for RecordingCompleter {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _system: &str, user: &str) -> Result<Completion, ClientError> {
        self.prompts.lock().unwrap().push(user.to_string());
        Ok(Completion {
            text: self.reply.clone(),
            total_tokens: Some(1000),
        })
    }
}

const GOOD_REPORT: &str = r#"```json
{
  "fulfilled_requirements": ["Laufbreite 1,00 m eingehalten"],
  "possible_violations": [],
  "recommendations": ["Handlauf beidseitig vorsehen"],
  "critical_points": [],
  "applicable_standards": ["DIN 18065"],
  "overall_rating": "good"
}
```"#;

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.standards_dir = root.join("din_norms");
    config.paths.index_dir = root.join("din_norms/din_index");
    config.paths.manifest = root.join("din_norms/processing_metadata.json");
    config.paths.keyword_db = root.join("din_norms/simple_din_db.json");
    config.paths.feedback = root.join("din_norms/feedback_db.json");
    config.paths.uploads_dir = root.join("uploads");
    config.paths.results_dir = root.join("analysis_results");
    config.paths.usage_log = root.join("usage_log.json");
    config.extraction.include_globs = vec!["*.pdf".into(), "*.txt".into()];
    config.extraction.ocr_enabled = false;
    config.extraction.vision_enabled = false;
    config
}

fn write_corpus(root: &Path) {
    let dir = root.join("din_norms");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("DIN_18065.txt"),
        "Treppe: Die nutzbare Laufbreite einer Treppe in Wohngebäuden beträgt mindestens 1,00 m.\n\n"
            .repeat(6),
    )
    .unwrap();
    std::fs::write(
        dir.join("DIN_4109.txt"),
        "Schallschutz: Der Schallschutz zwischen Wohnungen erfordert ein Schalldämmmaß von 53 dB.\n\n"
            .repeat(6),
    )
    .unwrap();
}

fn checker(root: &Path, embedder: Arc<dyn Embedder>, completer: Arc<dyn Completer>) -> Checker {
    Checker::new(
        test_config(root),
        Components {
            embedder: Some(embedder),
            completer: Some(completer),
            ..Components::default()
        },
    )
}

#[tokio::test]
async fn vector_pipeline_produces_report() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path());
    let completer = RecordingCompleter::new(GOOD_REPORT);
    let checker = checker(dir.path(), Arc::new(TopicEmbedder), completer.clone());
    assert_eq!(checker.mode(), RetrievalMode::Vector);

    let report = checker.process_standards(false).await.unwrap();
    assert_eq!(report.processed, 2);
    assert!(report.segments > 0);
    assert!(dir.path().join("din_norms/processing_metadata.json").exists());

    let hits = checker.find_relevant("Treppe Treppe Treppe", 1).await.unwrap();
    assert_eq!(hits[0].document_id, "DIN_18065");

    let result = checker
        .check_plan_text("Grundriss EG: Treppe mit Laufbreite 1,10 m")
        .await;
    assert!(result.is_success(), "unexpected failure: {:?}", result.error());
    assert!(result.standards_found > 0);
    assert!(result.top_standards.len() <= 3);

    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["report"]["overall_rating"], "good");
    assert_eq!(value["model"], "scripted");

    let prompt = completer.last_prompt();
    assert!(prompt.contains("PLAN:\nGrundriss EG"));
    assert!(prompt.contains("DIN_18065"));

    let budget = serde_json::to_value(checker.budget_status().await.unwrap()).unwrap();
    assert_eq!(budget["monthly_cost"], 0.03);
}

#[tokio::test]
async fn unparseable_reply_keeps_raw_response() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path());
    let completer = RecordingCompleter::new("Die Treppe ist in Ordnung.");
    let checker = checker(dir.path(), Arc::new(TopicEmbedder), completer);
    checker.process_standards(false).await.unwrap();

    let result = checker.check_plan_text("Treppe im Treppenhaus").await;
    assert!(!result.is_success());
    assert_eq!(result.error(), Some("parse failure"));
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["raw_response"], "Die Treppe ist in Ordnung.");
}

#[tokio::test]
async fn failed_index_build_leaves_no_manifest() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path());
    let completer = RecordingCompleter::new(GOOD_REPORT);
    let checker = checker(dir.path(), Arc::new(BrokenEmbedder), completer.clone());

    let report = checker.process_standards(false).await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.segments, 0);
    assert!(!dir.path().join("din_norms/processing_metadata.json").exists());

    let info = checker.processing_info().await.unwrap();
    assert_eq!(info.cache, "missing");
    assert!(!info.artifact_present);
}

#[tokio::test]
async fn failed_rebuild_keeps_previous_index() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path());
    let completer = RecordingCompleter::new(GOOD_REPORT);
    let healthy = checker(dir.path(), Arc::new(TopicEmbedder), completer.clone());
    let built = healthy.process_standards(false).await.unwrap();
    assert!(built.segments > 0);
    let manifest_path = dir.path().join("din_norms/processing_metadata.json");
    let manifest_before = std::fs::read_to_string(&manifest_path).unwrap();

    let outage = checker(dir.path(), Arc::new(BrokenEmbedder), completer);
    let report = outage.process_standards(true).await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.segments, 0);

    let info = outage.processing_info().await.unwrap();
    assert!(info.artifact_present);
    assert_eq!(std::fs::read_to_string(&manifest_path).unwrap(), manifest_before);

    let hits = healthy.find_relevant("Treppe Treppe", 1).await.unwrap();
    assert_eq!(hits[0].document_id, "DIN_18065");
}

#[tokio::test]
async fn stored_feedback_reaches_the_prompt() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path());
    let completer = RecordingCompleter::new(GOOD_REPORT);
    let checker = checker(dir.path(), Arc::new(TopicEmbedder), completer.clone());
    checker.process_standards(false).await.unwrap();

    checker.check_plan_text("Treppe").await;
    assert!(!completer.last_prompt().contains("BEST PRACTICES"));

    let log = FeedbackLog::new(dir.path().join("din_norms/feedback_db.json"));
    log.record(
        "Treppe mit Podest",
        Feedback {
            rating: 5,
            positive_aspects: vec!["Podest nach 18 Steigungen".into()],
            ..Default::default()
        },
    )
    .await
    .unwrap();

    checker.check_plan_text("Treppe").await;
    let prompt = completer.last_prompt();
    assert!(prompt.contains("BEST PRACTICES"));
    assert!(prompt.contains("Podest nach 18 Steigungen"));
}

#[tokio::test]
async fn http_api_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path());
    let completer = RecordingCompleter::new(GOOD_REPORT);
    let checker = Arc::new(checker(dir.path(), Arc::new(TopicEmbedder), completer));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, router(checker)).await.unwrap();
    });
    let http = reqwest::Client::new();

    let health: serde_json::Value = http
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["retrieval_mode"], "vector");

    let processed: serde_json::Value = http
        .post(format!("{}/standards/process", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(processed["processed"], 2);
    assert_eq!(processed["cached"], false);

    let standards: serde_json::Value = http
        .get(format!("{}/standards", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(standards["status"], "available");
    assert_eq!(standards["count"], 2);

    let query: serde_json::Value = http
        .post(format!("{}/standards/query", base))
        .json(&json!({"query": "Schallschutz Schallschutz", "limit": 2}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(query["results"][0]["document_id"], "DIN_4109");

    let bad_limit = http
        .post(format!("{}/standards/query", base))
        .json(&json!({"query": "Treppe", "limit": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_limit.status(), 400);
    let body: serde_json::Value = bad_limit.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let analyzed: serde_json::Value = http
        .post(format!("{}/analyze", base))
        .json(&json!({"text": "Treppe mit Laufbreite 1,10 m"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(analyzed["report"]["overall_rating"], "good");

    let empty = http
        .post(format!("{}/analyze", base))
        .json(&json!({"text": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 400);

    let missing = http
        .get(format!("{}/plans/20240101_000000_deadbeef", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let body: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let not_pdf = http
        .put(format!("{}/plans/grundriss.png", base))
        .body("png")
        .send()
        .await
        .unwrap();
    assert_eq!(not_pdf.status(), 400);

    let plans: serde_json::Value = http
        .get(format!("{}/plans", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(plans, json!([]));
}
