//! REST API server for the dilemma chat backend
//!
//! `GET /` serves the chat page, `POST /chat` runs one exchange.

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::conversational::ChatService;
use crate::models::{ChatRequest, ChatResponse};

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<ChatService>,
    pub page_path: Arc<PathBuf>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Page
/// =============================

async fn serve_ui(State(state): State<ApiState>) -> Response {
    let page = match tokio::fs::read_to_string(state.page_path.as_ref()).await {
        Ok(page) => page,
        Err(e) => {
            warn!("Failed to read chat page {}: {}", state.page_path.display(), e);
            return (StatusCode::NOT_FOUND, "chat page not found").into_response();
        }
    };

    let mut response = Html(page).into_response();
    if state.service.variant().no_cache_page() {
        // Pages embedded in survey iframes must pick up redeploys immediately
        let headers = response.headers_mut();
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    }
    response
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> Json<ChatResponse> {
    let response = state.service.handle_chat(&req).await;
    Json(ChatResponse { response })
}

/// =============================
/// Router
/// =============================

pub fn create_router(service: Arc<ChatService>, page_path: PathBuf) -> Router {
    let state = ApiState {
        service,
        page_path: Arc::new(page_path),
    };

    Router::new()
        .route("/", get(serve_ui))
        .route("/health", get(health))
        .route("/chat", post(chat_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    service: Arc<ChatService>,
    page_path: PathBuf,
    port: u16,
) -> crate::Result<()> {
    let router = create_router(service, page_path);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
