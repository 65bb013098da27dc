pub mod contracts;
pub mod feed;
pub mod offers;

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the acting user's id. Authentication happens upstream.
pub const ACTOR_HEADER: &str = "x-user-id";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(contracts::router())
        .merge(offers::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/feed/ws", get(feed::ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub(crate) fn actor_id(headers: &HeaderMap) -> Result<i64, AppError> {
    let raw = headers
        .get(ACTOR_HEADER)
        .ok_or_else(|| AppError::BadRequest(format!("missing {ACTOR_HEADER} header")))?;

    raw.to_str()
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .ok_or_else(|| AppError::BadRequest(format!("{ACTOR_HEADER} must be an integer id")))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    contracts: usize,
    offers: usize,
    active_feeds: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        contracts: state.contracts.len(),
        offers: state.offers.len(),
        active_feeds: state.metrics.active_feeds.get(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
