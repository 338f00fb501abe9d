//! Outbound service clients against a local mock server.

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use normcheck::client::{ApiClient, ClientError};
use normcheck::completion::{Completer, OpenAiCompleter};
use normcheck::config::AnalysisConfig;
use normcheck::embedding::{OllamaEmbedder, OpenAiEmbedder};
use normcheck::vision::{ImageDescriber, OpenAiVision};
use normcheck_core::embedding::Embedder;

fn client(server: &MockServer, service: &'static str, max_retries: u32) -> ApiClient {
    ApiClient::new(
        service,
        &format!("{}/v1", server.uri()),
        Some("test-key".to_string()),
        5,
        max_retries,
    )
    .unwrap()
}

fn chat_reply(content: &str) -> serde_json::Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 900, "completion_tokens": 100, "total_tokens": 1000}
    })
}

#[tokio::test]
async fn completer_sends_prompts_and_reads_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_string_contains("RELEVANT DIN STANDARDS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
            "{\"overall_rating\": \"good\"}",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let completer = OpenAiCompleter::new(client(&server, "chat", 0), &AnalysisConfig::default());
    assert_eq!(completer.model_name(), "gpt-4");
    let completion = completer
        .complete("system", "PLAN:\nx\n\nRELEVANT DIN STANDARDS:\ny")
        .await
        .unwrap();
    assert_eq!(completion.text, "{\"overall_rating\": \"good\"}");
    assert_eq!(completion.total_tokens, Some(1000));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let completer = OpenAiCompleter::new(client(&server, "chat", 3), &AnalysisConfig::default());
    let err = completer.complete("s", "u").await.unwrap_err();
    match err {
        ClientError::Status { status, body, .. } => {
            assert_eq!(status, 401);
            assert_eq!(body, "invalid api key");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn server_errors_are_retried_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let completer = OpenAiCompleter::new(client(&server, "chat", 1), &AnalysisConfig::default());
    assert_eq!(completer.complete("s", "u").await.unwrap().text, "ok");
}

#[tokio::test]
async fn server_errors_are_terminal_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let completer = OpenAiCompleter::new(client(&server, "chat", 0), &AnalysisConfig::default());
    assert!(matches!(
        completer.complete("s", "u").await.unwrap_err(),
        ClientError::Status { status: 500, .. }
    ));
}

#[tokio::test]
async fn openai_embedder_orders_vectors_by_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_string_contains("text-embedding-3-small"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                {"index": 0, "embedding": [1.0, 0.0, 0.0]}
            ]
        })))
        .mount(&server)
        .await;

    let embedder = OpenAiEmbedder::new(client(&server, "openai embeddings", 0), "text-embedding-3-small");
    let vectors = embedder
        .embed(&["Treppen".to_string(), "Schallschutz".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
}

#[tokio::test]
async fn embedder_rejects_wrong_vector_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "embedding": [1.0]}]
        })))
        .mount(&server)
        .await;

    let embedder = OpenAiEmbedder::new(client(&server, "openai embeddings", 0), "m");
    let err = embedder
        .embed(&["a".to_string(), "b".to_string()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("expected 2 embeddings, got 1"));
}

#[tokio::test]
async fn ollama_embedder_uses_api_embed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_string_contains("nomic-embed-text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.5, 0.25]]
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new("ollama", &server.uri(), None, 5, 0).unwrap();
    let embedder = OllamaEmbedder::new(client, "nomic-embed-text");
    let vector = embedder.embed_query("Brandschutz").await.unwrap();
    assert_eq!(vector, vec![0.5, 0.25]);
}

#[tokio::test]
async fn vision_sends_inline_jpeg() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("data:image/jpeg;base64,/9j/"))
        .and(body_string_contains("\"detail\":\"high\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
            "Tabelle 1: Steigungsverhältnis 17/29",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let vision = OpenAiVision::new(client(&server, "vision", 0), "gpt-4o");
    let completion = vision
        .describe(&[0xFF, 0xD8, 0xFF, 0xE0], "Analyse page 1")
        .await
        .unwrap();
    assert!(completion.text.contains("Steigungsverhältnis"));
}
