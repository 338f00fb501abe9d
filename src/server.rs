//! JSON HTTP API over the [`Checker`] service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (version, retrieval mode) |
//! | `GET`    | `/budget` | Monthly token budget status |
//! | `GET`    | `/statistics` | Plan, feedback and corpus statistics |
//! | `GET`    | `/standards` | Standard documents on disk |
//! | `PUT`    | `/standards/{filename}` | Upload a standard (raw PDF body) and reprocess |
//! | `DELETE` | `/standards/{filename}` | Delete a standard and reprocess |
//! | `POST`   | `/standards/process` | Reprocess the corpus (`?force=true` skips the cache) |
//! | `POST`   | `/standards/query` | Retrieve relevant passages |
//! | `GET`    | `/plans` | Plan records, newest first |
//! | `PUT`    | `/plans/{filename}` | Upload a plan (raw PDF body) |
//! | `GET`    | `/plans/{id}` | One plan record |
//! | `DELETE` | `/plans/{id}` | Delete a plan |
//! | `POST`   | `/plans/{id}/check` | Start a compliance check in the background |
//! | `GET`    | `/plans/{id}/check` | Check status and result |
//! | `POST`   | `/plans/{id}/feedback` | Submit reviewer feedback |
//! | `POST`   | `/analyze` | Check posted plan text synchronously |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "plan not found: 20240501_101500_ab12cd34" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `extraction_failed` (422), `internal` (500).

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use normcheck_core::feedback::Feedback;
use normcheck_core::manifest::RetrievalMode;
use normcheck_core::models::SegmentHit;

use crate::analyzer::CheckResult;
use crate::plans::{PlanError, PlanFeedbackEntry, PlanRecord};
use crate::service::{
    Checker, ProcessReport, ServiceError, StandardUpload, StandardsStatus, Statistics,
};
use crate::usage::BudgetStatus;

const DEFAULT_QUERY_LIMIT: usize = 5;

type AppState = Arc<Checker>;

/// Build the router. Used by [`run_server`] and by tests that bind their
/// own listener.
pub fn router(checker: Arc<Checker>) -> Router {
    let body_limit = checker.config().server.max_upload_bytes;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/budget", get(handle_budget))
        .route("/statistics", get(handle_statistics))
        .route("/standards", get(handle_standards))
        .route("/standards/process", post(handle_process))
        .route("/standards/query", post(handle_query))
        .route(
            "/standards/{filename}",
            put(handle_upload_standard).delete(handle_delete_standard),
        )
        .route("/plans", get(handle_list_plans))
        .route(
            "/plans/{id}",
            put(handle_upload_plan)
                .get(handle_get_plan)
                .delete(handle_delete_plan),
        )
        .route(
            "/plans/{id}/check",
            post(handle_start_check).get(handle_check_status),
        )
        .route("/plans/{id}/feedback", post(handle_feedback))
        .route("/analyze", post(handle_analyze))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(checker)
}

/// Serve the API on `[server].bind` until the process is terminated.
pub async fn run_server(checker: Arc<Checker>) -> anyhow::Result<()> {
    let bind_addr = checker.config().server.bind.clone();
    let app = router(checker);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "normcheck server listening");
    println!("normcheck server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        let message = err.to_string();
        match err {
            PlanError::NotFound(_) => not_found(message),
            PlanError::InvalidUpload(_) | PlanError::InvalidFeedback(_) => bad_request(message),
            PlanError::Extract(_) => AppError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                code: "extraction_failed",
                message,
            },
            PlanError::Storage(_) => {
                tracing::error!(error = %message, "plan storage failed");
                internal(message)
            }
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(what) => not_found(format!("not found: {}", what)),
            ServiceError::Invalid(msg) => bad_request(msg),
            ServiceError::Feedback(e) => bad_request(e.to_string()),
            ServiceError::Plan(e) => e.into(),
            ServiceError::Internal(e) => {
                let message = format!("{:#}", e);
                tracing::error!(error = %message, "request failed");
                internal(message)
            }
        }
    }
}

// ============ Status ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    retrieval_mode: RetrievalMode,
}

async fn handle_health(State(checker): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        retrieval_mode: checker.mode(),
    })
}

async fn handle_budget(State(checker): State<AppState>) -> Result<Json<BudgetStatus>, AppError> {
    Ok(Json(checker.budget_status().await?))
}

async fn handle_statistics(
    State(checker): State<AppState>,
) -> Result<Json<Statistics>, AppError> {
    Ok(Json(checker.statistics().await?))
}

// ============ Standards ============

async fn handle_standards(
    State(checker): State<AppState>,
) -> Result<Json<StandardsStatus>, AppError> {
    Ok(Json(checker.standards_status().await?))
}

#[derive(Deserialize)]
struct ProcessParams {
    #[serde(default)]
    force: bool,
}

async fn handle_process(
    State(checker): State<AppState>,
    Query(params): Query<ProcessParams>,
) -> Result<Json<ProcessReport>, AppError> {
    Ok(Json(checker.process_standards(params.force).await?))
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    results: Vec<SegmentHit>,
}

async fn handle_query(
    State(checker): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let limit = request.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
    if limit == 0 {
        return Err(bad_request("limit must be >= 1"));
    }
    let results = checker.find_relevant(&request.query, limit).await?;
    Ok(Json(QueryResponse { results }))
}

async fn handle_upload_standard(
    State(checker): State<AppState>,
    Path(filename): Path<String>,
    body: Bytes,
) -> Result<Json<StandardUpload>, AppError> {
    Ok(Json(checker.add_standard(&filename, &body).await?))
}

async fn handle_delete_standard(
    State(checker): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<ProcessReport>, AppError> {
    Ok(Json(checker.remove_standard(&filename).await?))
}

// ============ Plans ============

async fn handle_list_plans(
    State(checker): State<AppState>,
) -> Result<Json<Vec<PlanRecord>>, AppError> {
    Ok(Json(checker.plans().list().await?))
}

async fn handle_upload_plan(
    State(checker): State<AppState>,
    Path(filename): Path<String>,
    body: Bytes,
) -> Result<Json<PlanRecord>, AppError> {
    Ok(Json(checker.plans().upload(&filename, &body).await?))
}

async fn handle_get_plan(
    State(checker): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PlanRecord>, AppError> {
    Ok(Json(checker.plans().get(&id).await?))
}

async fn handle_delete_plan(
    State(checker): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    checker.plans().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct CheckStarted {
    message: &'static str,
    plan_id: String,
    status: &'static str,
}

async fn handle_start_check(
    State(checker): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CheckStarted>), AppError> {
    checker.plans().get(&id).await?;

    let task_checker = checker.clone();
    let task_id = id.clone();
    tokio::spawn(async move {
        if let Err(e) = task_checker.check_plan(&task_id).await {
            tracing::error!(plan = %task_id, error = %e, "background compliance check failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(CheckStarted {
            message: "compliance check started",
            plan_id: id,
            status: "in_progress",
        }),
    ))
}

#[derive(Serialize)]
struct CheckStatus {
    plan_id: String,
    has_din_check: bool,
    status: String,
    din_check: Option<CheckResult>,
}

async fn handle_check_status(
    State(checker): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckStatus>, AppError> {
    let record = checker.plans().get(&id).await?;
    Ok(Json(CheckStatus {
        plan_id: record.id,
        has_din_check: record.din_check.is_some(),
        status: record.status,
        din_check: record.din_check,
    }))
}

#[derive(Serialize)]
struct FeedbackResponse {
    message: &'static str,
    feedback: PlanFeedbackEntry,
}

async fn handle_feedback(
    State(checker): State<AppState>,
    Path(id): Path<String>,
    Json(feedback): Json<Feedback>,
) -> Result<Json<FeedbackResponse>, AppError> {
    let entry = checker.learn_from_feedback(&id, feedback).await?;
    Ok(Json(FeedbackResponse {
        message: "feedback saved",
        feedback: entry,
    }))
}

// ============ POST /analyze ============

#[derive(Deserialize)]
struct AnalyzeRequest {
    text: String,
}

async fn handle_analyze(
    State(checker): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<CheckResult>, AppError> {
    if request.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    Ok(Json(checker.check_plan_text(&request.text).await))
}
