use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::api::rest::actor_id;
use crate::engine::contracts::{self, ContractChanges, NewContract, NewRating};
use crate::engine::discovery::FeedQuery;
use crate::engine::ledger::{self, Withdrawal};
use crate::error::AppError;
use crate::models::contract::{Contract, GeoPoint, Rating};
use crate::models::filter::FilterParams;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/contracts", post(create_contract).get(list_contracts))
        .route(
            "/contracts/:id",
            get(get_contract)
                .patch(update_contract)
                .delete(delete_contract),
        )
        .route("/contracts/:id/rating", post(submit_rating))
}

#[derive(Deserialize)]
pub struct CenterQuery {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Deserialize)]
pub struct WithdrawQuery {
    pub intent: Option<Withdrawal>,
}

async fn create_contract(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<NewContract>,
) -> Result<Json<Contract>, AppError> {
    let owner_id = actor_id(&headers)?;
    contracts::create_contract(&state, owner_id, payload).map(Json)
}

async fn list_contracts(
    State(state): State<Arc<AppState>>,
    Query(center): Query<CenterQuery>,
    Query(filter): Query<FilterParams>,
) -> Result<Json<Vec<Contract>>, AppError> {
    let query = FeedQuery::new(
        GeoPoint {
            lat: center.lat,
            lng: center.lng,
        },
        filter,
    );
    query.validate()?;

    Ok(Json(contracts::list_contracts(
        &state,
        &query.center,
        &query.filter,
    )))
}

async fn get_contract(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Contract>, AppError> {
    contracts::get_contract(&state, id).map(Json)
}

async fn update_contract(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(changes): Json<ContractChanges>,
) -> Result<Json<Contract>, AppError> {
    let actor = actor_id(&headers)?;
    contracts::update_contract(&state, id, actor, changes).map(Json)
}

async fn delete_contract(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<WithdrawQuery>,
    headers: HeaderMap,
) -> Result<Json<Contract>, AppError> {
    let actor = actor_id(&headers)?;
    ledger::cancel_contract(&state, id, actor, query.intent.unwrap_or_default()).map(Json)
}

async fn submit_rating(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<NewRating>,
) -> Result<Json<Rating>, AppError> {
    let actor = actor_id(&headers)?;
    contracts::submit_rating(&state, id, actor, payload).map(Json)
}
