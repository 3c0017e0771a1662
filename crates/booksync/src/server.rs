//! HTTP server for health, readiness, metrics and book views

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use booksync_lib::metrics::encode_metrics;
use booksync_lib::{BookRegistry, BookView, SubscriptionKey, SyncStatus};
use serde::Serialize;

/// One line of the `/books` and `/ready` listings
#[derive(Debug, Serialize)]
pub struct BookSummary {
    pub market_id: String,
    pub granularity: u32,
    pub status: SyncStatus,
    pub last_sequence: u64,
    pub resyncs: u64,
}

impl From<&BookView> for BookSummary {
    fn from(view: &BookView) -> Self {
        Self {
            market_id: view.key.market_id.clone(),
            granularity: view.key.granularity,
            status: view.status,
            last_sequence: view.book.last_sequence,
            resyncs: view.resyncs,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub books: Vec<BookSummary>,
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BookRegistry>,
}

fn summaries(registry: &BookRegistry) -> Vec<BookSummary> {
    registry
        .keys()
        .iter()
        .filter_map(|key| registry.view(key))
        .map(|view| BookSummary::from(&view))
        .collect()
}

/// Health endpoint - the process is up
async fn health() -> &'static str {
    "ok"
}

/// Ready endpoint - 200 only when every book is live
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let books = summaries(&state.registry);
    let ready = !books.is_empty() && books.iter().all(|b| b.status == SyncStatus::Live);
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(ReadyResponse { ready, books }))
}

/// Metrics endpoint - returns Prometheus text format
async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

async fn list_books(State(state): State<AppState>) -> Json<Vec<BookSummary>> {
    Json(summaries(&state.registry))
}

async fn get_book(
    State(state): State<AppState>,
    Path((market, granularity)): Path<(String, u32)>,
) -> Result<Json<BookView>, StatusCode> {
    state
        .registry
        .view(&SubscriptionKey::new(market, granularity))
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/books", get(list_books))
        .route("/book/:market/:granularity", get(get_book))
        .with_state(state)
}
