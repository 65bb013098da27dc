use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::engine::lifecycle::{self, ActorRole, LifecycleEvent};
use crate::error::AppError;
use crate::models::contract::{
    Contract, ContractStatus, Dimensions, GeoPoint, Location, Rating, MAX_PHOTOS,
};
use crate::models::filter::FilterParams;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct NewContract {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub move_date: DateTime<Utc>,
    pub origin: Location,
    pub destination: Location,
    #[serde(default)]
    pub dimensions: Dimensions,
    #[serde(default)]
    pub fragile: bool,
    #[serde(default)]
    pub cooling_required: bool,
    #[serde(default)]
    pub ride_along: bool,
    #[serde(default)]
    pub required_helpers: u32,
    pub price: f64,
    #[serde(default)]
    pub photos: Vec<String>,
}

/// Partial update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub move_date: Option<DateTime<Utc>>,
    pub origin: Option<Location>,
    pub destination: Option<Location>,
    pub dimensions: Option<Dimensions>,
    pub fragile: Option<bool>,
    pub cooling_required: Option<bool>,
    pub ride_along: Option<bool>,
    pub required_helpers: Option<u32>,
    pub price: Option<f64>,
    pub photos: Option<Vec<String>>,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRating {
    pub value: u8,
    #[serde(default)]
    pub flag_issues: bool,
    #[serde(default)]
    pub comment: String,
}

fn validate_location(label: &str, location: &Location) -> Result<(), AppError> {
    if !location.point().is_valid() {
        return Err(AppError::InvalidLocation(format!(
            "{label} ({}, {}) is not a valid coordinate",
            location.lat, location.lng
        )));
    }
    Ok(())
}

fn validate_contract(contract: &Contract) -> Result<(), AppError> {
    if contract.title.trim().is_empty() {
        return Err(AppError::BadRequest("title cannot be empty".to_string()));
    }
    if !contract.price.is_finite() || contract.price < 0.0 {
        return Err(AppError::BadRequest("price must be >= 0".to_string()));
    }
    if !contract.dimensions.is_valid() {
        return Err(AppError::BadRequest(
            "dimensions must be non-negative".to_string(),
        ));
    }
    if contract.photos.len() > MAX_PHOTOS {
        return Err(AppError::BadRequest(format!(
            "at most {MAX_PHOTOS} photos are allowed"
        )));
    }

    validate_location("origin", &contract.origin)?;
    validate_location("destination", &contract.destination)
}

fn ensure_owner(contract: &Contract, actor_id: i64) -> Result<(), AppError> {
    if contract.owner_id != actor_id {
        return Err(AppError::NotOwner {
            contract_id: contract.id,
            actor_id,
        });
    }
    Ok(())
}

pub(crate) fn not_found(contract_id: i64) -> AppError {
    AppError::NotFound(format!("contract {contract_id} not found"))
}

pub fn create_contract(
    state: &AppState,
    owner_id: i64,
    payload: NewContract,
) -> Result<Contract, AppError> {
    let mut contract = Contract {
        id: 0,
        owner_id,
        title: payload.title.trim().to_string(),
        description: payload.description,
        move_date: payload.move_date,
        created_at: Utc::now(),
        origin: payload.origin,
        destination: payload.destination,
        dimensions: payload.dimensions,
        fragile: payload.fragile,
        cooling_required: payload.cooling_required,
        ride_along: payload.ride_along,
        required_helpers: payload.required_helpers,
        price: payload.price,
        photos: payload.photos,
        status: ContractStatus::Requested,
        winning_driver: None,
        version: 0,
    };
    validate_contract(&contract)?;

    contract.id = state.next_contract_id();
    state.contracts.insert(contract.id, contract.clone());

    info!(contract_id = contract.id, owner_id, "contract created");
    Ok(contract)
}

pub fn get_contract(state: &AppState, contract_id: i64) -> Result<Contract, AppError> {
    state
        .contracts
        .get(&contract_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| not_found(contract_id))
}

pub fn update_contract(
    state: &AppState,
    contract_id: i64,
    actor_id: i64,
    changes: ContractChanges,
) -> Result<Contract, AppError> {
    let mut guard = state
        .contracts
        .get_mut(&contract_id)
        .ok_or_else(|| not_found(contract_id))?;

    ensure_owner(&guard, actor_id)?;

    if let Some(expected) = changes.expected_version {
        if guard.version != expected {
            return Err(AppError::ConcurrentModification {
                contract_id,
                expected: format!("version {expected}, found {}", guard.version),
            });
        }
    }

    // Edits are only legal while REQUESTED; check before touching any field.
    lifecycle::next_status(guard.status, LifecycleEvent::Edit, ActorRole::Requester)?;

    let mut edited = guard.clone();
    if let Some(title) = changes.title {
        edited.title = title.trim().to_string();
    }
    if let Some(description) = changes.description {
        edited.description = description;
    }
    if let Some(move_date) = changes.move_date {
        edited.move_date = move_date;
    }
    if let Some(origin) = changes.origin {
        edited.origin = origin;
    }
    if let Some(destination) = changes.destination {
        edited.destination = destination;
    }
    if let Some(dimensions) = changes.dimensions {
        edited.dimensions = dimensions;
    }
    if let Some(fragile) = changes.fragile {
        edited.fragile = fragile;
    }
    if let Some(cooling_required) = changes.cooling_required {
        edited.cooling_required = cooling_required;
    }
    if let Some(ride_along) = changes.ride_along {
        edited.ride_along = ride_along;
    }
    if let Some(required_helpers) = changes.required_helpers {
        edited.required_helpers = required_helpers;
    }
    if let Some(price) = changes.price {
        edited.price = price;
    }
    if let Some(photos) = changes.photos {
        edited.photos = photos;
    }
    validate_contract(&edited)?;

    lifecycle::apply(state, &mut edited, LifecycleEvent::Edit, ActorRole::Requester)?;
    *guard = edited;

    Ok(guard.clone())
}

/// Server-side coarse prefilter for the discovery feed: withdrawn contracts
/// are dropped and the predicate is evaluated against `center`.
pub fn list_contracts(state: &AppState, center: &GeoPoint, filter: &FilterParams) -> Vec<Contract> {
    let mut contracts: Vec<Contract> = state
        .contracts
        .iter()
        .filter(|entry| {
            let contract = entry.value();
            !contract.status.is_withdrawn() && filter.matches(contract, center)
        })
        .map(|entry| entry.value().clone())
        .collect();

    contracts.sort_by_key(|contract| contract.id);
    contracts
}

pub fn submit_rating(
    state: &AppState,
    contract_id: i64,
    actor_id: i64,
    payload: NewRating,
) -> Result<Rating, AppError> {
    if !(1..=5).contains(&payload.value) {
        return Err(AppError::BadRequest(
            "rating value must be between 1 and 5".to_string(),
        ));
    }

    let mut guard = state
        .contracts
        .get_mut(&contract_id)
        .ok_or_else(|| not_found(contract_id))?;

    ensure_owner(&guard, actor_id)?;

    let driver_id = guard.winning_driver.ok_or_else(|| {
        AppError::InvalidTransition(format!(
            "contract {contract_id} has no driver to rate"
        ))
    })?;

    let now = Utc::now();
    let mut rated = guard.clone();
    if rated.status == ContractStatus::Accepted && rated.move_date <= now {
        lifecycle::apply(
            state,
            &mut rated,
            LifecycleEvent::MoveDatePassed,
            ActorRole::Requester,
        )?;
    }
    lifecycle::apply(
        state,
        &mut rated,
        LifecycleEvent::RatingSubmitted,
        ActorRole::Requester,
    )?;

    let rating = Rating {
        contract_id,
        driver_id,
        value: payload.value,
        flag_issues: payload.flag_issues,
        comment: payload.comment,
        created_at: now,
    };

    state.ratings.insert(contract_id, rating.clone());
    *guard = rated;

    info!(contract_id, driver_id, value = rating.value, "rating submitted");
    Ok(rating)
}
