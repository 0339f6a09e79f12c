//! JSON HTTP API over the pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/query` | Ask a question (JSON body or form fields) |
//! | `GET`  | `/api/query` | Ask a question via `?question=..&include_context=..` |
//! | `GET`  | `/api/history` | Conversation history, oldest first |
//! | `DELETE` | `/api/history` | Clear the conversation history |
//! | `GET`  | `/api/health` | Readiness of the index and answer chain |
//!
//! # Response Envelope
//!
//! ```json
//! { "status": "success", "data": { "question": "…", "answer": "…" } }
//! { "status": "error", "message": "问题不能为空" }
//! ```
//!
//! A blank question is a 400; a failed query is a 500 carrying the
//! pipeline's error message.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so that browser front
//! ends on other ports can call the API.

use axum::{
    extract::{FromRequest, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::models::{ContextItem, ConversationTurn, QueryResult};
use crate::pipeline::RagPipeline;

/// Message returned for a missing or blank question.
pub const EMPTY_QUESTION_MESSAGE: &str = "问题不能为空";

const SERVICE_NAME: &str = "rag-qa-system";

#[derive(Clone)]
struct AppState {
    pipeline: Arc<RagPipeline>,
}

/// Build the API router. Exposed separately from [`run_server`] so tests
/// and embedding applications can mount it on their own listener.
pub fn router(pipeline: Arc<RagPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/query", get(handle_query_get).post(handle_query_post))
        .route("/api/history", get(handle_history).delete(handle_clear_history))
        .route("/api/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { pipeline })
}

/// Serve the API on `bind` until Ctrl-C.
pub async fn run_server(pipeline: Arc<RagPipeline>, bind: &str) -> anyhow::Result<()> {
    let app = router(pipeline);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "RAG QA server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: "error",
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.into(),
    }
}

#[derive(Serialize)]
struct Success<T: Serialize> {
    status: &'static str,
    data: T,
}

fn success<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success {
        status: "success",
        data,
    })
}

// ============ /api/query ============

#[derive(Debug, Default, Deserialize)]
struct QueryRequest {
    #[serde(default)]
    question: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    include_context: bool,
}

/// Accepts `true`/`false` as well as the strings `"true"`, `"1"`, `"yes"`
/// (any case) so query strings and form fields work.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
    })
}

/// Request body as JSON or `application/x-www-form-urlencoded`.
struct QueryBody(QueryRequest);

impl<S> FromRequest<S> for QueryBody
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);

        if is_json {
            let Json(body) = Json::<QueryRequest>::from_request(req, state)
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            Ok(QueryBody(body))
        } else {
            let Form(body) = Form::<QueryRequest>::from_request(req, state)
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            Ok(QueryBody(body))
        }
    }
}

#[derive(Serialize)]
struct QueryData {
    question: String,
    answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    contexts: Option<Vec<ContextItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_count: Option<usize>,
}

async fn handle_query_get(
    State(state): State<AppState>,
    Query(req): Query<QueryRequest>,
) -> Result<Json<Success<QueryData>>, AppError> {
    answer(&state, req).await
}

async fn handle_query_post(
    State(state): State<AppState>,
    QueryBody(req): QueryBody,
) -> Result<Json<Success<QueryData>>, AppError> {
    answer(&state, req).await
}

async fn answer(state: &AppState, req: QueryRequest) -> Result<Json<Success<QueryData>>, AppError> {
    let question = req.question.unwrap_or_default();
    if question.trim().is_empty() {
        return Err(bad_request(EMPTY_QUESTION_MESSAGE));
    }

    let data = match state.pipeline.query(&question, req.include_context).await {
        QueryResult::Answer { answer } => QueryData {
            question,
            answer,
            contexts: None,
            context_count: None,
        },
        QueryResult::WithContexts { answer, contexts } => QueryData {
            question,
            answer,
            context_count: Some(contexts.len()),
            contexts: Some(contexts),
        },
        QueryResult::Error { error } => return Err(internal_error(error)),
    };

    Ok(success(data))
}

// ============ /api/history ============

#[derive(Serialize)]
struct HistoryData {
    history: Vec<ConversationTurn>,
    count: usize,
}

async fn handle_history(State(state): State<AppState>) -> Json<Success<HistoryData>> {
    let history = state.pipeline.history();
    success(HistoryData {
        count: history.len(),
        history,
    })
}

#[derive(Serialize)]
struct ClearedData {
    message: &'static str,
}

async fn handle_clear_history(State(state): State<AppState>) -> Json<Success<ClearedData>> {
    success(ClearedData {
        message: state.pipeline.clear_history(),
    })
}

// ============ /api/health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    vector_store: &'static str,
    chain: &'static str,
    version: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let health = state.pipeline.health_status();
    Json(HealthResponse {
        status: if health.vector_store_loaded && health.chain_built {
            "healthy"
        } else {
            "unhealthy"
        },
        service: SERVICE_NAME,
        vector_store: if health.vector_store_loaded {
            "loaded"
        } else {
            "not_loaded"
        },
        chain: if health.chain_built {
            "built"
        } else {
            "not_built"
        },
        version: env!("CARGO_PKG_VERSION"),
    })
}
