use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::api::rest::actor_id;
use crate::engine::ledger;
use crate::error::AppError;
use crate::models::offer::{Offer, OfferStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/contracts/:id/offers", post(create_offer).get(list_offers))
        .route("/offers/:id/status", patch(update_offer_status))
}

#[derive(Deserialize)]
pub struct UpdateOfferStatusRequest {
    pub status: OfferStatus,
}

async fn create_offer(
    State(state): State<Arc<AppState>>,
    Path(contract_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Offer>, AppError> {
    let driver_id = actor_id(&headers)?;
    ledger::create_offer(&state, contract_id, driver_id).map(Json)
}

async fn list_offers(
    State(state): State<Arc<AppState>>,
    Path(contract_id): Path<i64>,
) -> Result<Json<Vec<Offer>>, AppError> {
    ledger::list_offers(&state, contract_id).map(Json)
}

async fn update_offer_status(
    State(state): State<Arc<AppState>>,
    Path(offer_id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<UpdateOfferStatusRequest>,
) -> Result<Json<Offer>, AppError> {
    let actor = actor_id(&headers)?;
    ledger::set_offer_status(&state, offer_id, actor, payload.status).map(Json)
}
