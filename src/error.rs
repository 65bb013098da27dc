use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::contract::ContractStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("driver {driver_id} already holds an offer on contract {contract_id}")]
    DuplicateOffer { contract_id: i64, driver_id: i64 },

    #[error("contract {contract_id} is {status:?} and does not take offers")]
    ContractNotOfferable {
        contract_id: i64,
        status: ContractStatus,
    },

    #[error("user {actor_id} does not own contract {contract_id}")]
    NotOwner { contract_id: i64, actor_id: i64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("contract {contract_id} changed concurrently (expected {expected})")]
    ConcurrentModification { contract_id: i64, expected: String },

    #[error("fetch failed: {0}")]
    TransientFetchFailure(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidTransition(_)
            | AppError::DuplicateOffer { .. }
            | AppError::ContractNotOfferable { .. }
            | AppError::ConcurrentModification { .. } => StatusCode::CONFLICT,
            AppError::NotOwner { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidLocation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::TransientFetchFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
