//! HTTP API server for integration with other systems.
//!
//! Provides REST endpoints for search and question answering, plus a
//! server-sent events endpoint that streams the answer token by token.

use crate::cli::Output;
use crate::config::Settings;
use crate::error::DocentError;
use crate::orchestrator::Orchestrator;
use crate::rag::{Citation, RagEngine};
use crate::vector_store::{IndexedSource, SearchResult};
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

/// Shared application state.
struct AppState {
    orchestrator: Orchestrator,
    engine: RagEngine,
}

/// Run the HTTP API server.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(settings).await?;
    let app = router(orchestrator);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Docent API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Stats", "GET  /stats");
    Output::kv("Sources", "GET  /sources");
    Output::kv("Search", "POST /search");
    Output::kv("Ask", "POST /ask");
    Output::kv("Ask (streaming)", "POST /ask/stream");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(orchestrator: Orchestrator) -> Router {
    let engine = orchestrator.rag_engine();
    let state = Arc::new(AppState { orchestrator, engine });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/sources", get(sources))
        .route("/search", post(search))
        .route("/ask", post(ask))
        .route("/ask/stream", post(ask_stream))
        .layer(cors)
        .with_state(state)
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    /// Overrides retrieval.default_k.
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    /// Overrides retrieval.default_k.
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    grounded: bool,
    citations: Vec<Citation>,
}

#[derive(Serialize)]
struct SourcesResponse {
    sources: Vec<IndexedSource>,
    total: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn status_for(error: &DocentError) -> StatusCode {
    match error {
        DocentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        DocentError::GenerationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        DocentError::GenerationBackend(_) => StatusCode::BAD_GATEWAY,
        DocentError::EmbeddingBackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: DocentError) -> Response {
    (
        status_for(&error),
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn json_event(name: &str, data: serde_json::Value) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator.index().stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(e),
    }
}

async fn sources(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator.index().list_sources().await {
        Ok(sources) => Json(SourcesResponse {
            total: sources.len(),
            sources,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn search(State(state): State<Arc<AppState>>, Json(req): Json<SearchRequest>) -> Response {
    let k = req.k.unwrap_or(state.orchestrator.settings().retrieval.default_k);
    match state.orchestrator.index().search(&req.query, k).await {
        Ok(results) => Json(SearchResponse { results }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn ask(State(state): State<Arc<AppState>>, Json(req): Json<AskRequest>) -> Response {
    match state.engine.ask(&req.question, req.k).await {
        Ok(response) => Json(AskResponse {
            answer: response.answer,
            grounded: response.grounded,
            citations: response.citations,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// Stream the answer as server-sent events.
///
/// Emits one `sources` event, then `token` events, then either an `error`
/// event or nothing, and always a final `done` event. Closing the connection
/// drops the answer stream, which releases the backend.
async fn ask_stream(State(state): State<Arc<AppState>>, Json(req): Json<AskRequest>) -> Response {
    let response = match state.engine.query(&req.question, req.k).await {
        Ok(response) => response,
        Err(e) => return error_response(e),
    };

    let grounded = response.grounded;
    let sources = json_event(
        "sources",
        serde_json::json!({ "grounded": grounded, "citations": response.citations }),
    );

    let tokens = response.answer.map(|item| match item {
        Ok(token) => json_event("token", serde_json::json!({ "text": token })),
        Err(e) => {
            warn!("Streaming answer failed: {}", e);
            json_event(
                "error",
                serde_json::json!({
                    "error": e.to_string(),
                    "status": status_for(&e).as_u16(),
                }),
            )
        }
    });

    let events = stream::once(future::ready(sources))
        .chain(tokens)
        .chain(stream::once(future::ready(json_event(
            "done",
            serde_json::json!({ "grounded": grounded }),
        ))))
        .map(Ok::<_, Infallible>);

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}
