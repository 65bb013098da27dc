//! Fixtures shared by the engine unit tests.

use chrono::{Duration, Utc};

use crate::engine::contracts::NewContract;
use crate::models::contract::{Contract, ContractStatus, Dimensions, Location};
use crate::state::AppState;

pub fn state() -> AppState {
    AppState::new()
}

pub fn new_contract(lat: f64, lng: f64) -> NewContract {
    NewContract {
        title: "two-seat sofa".to_string(),
        description: "third floor, no elevator".to_string(),
        move_date: Utc::now() + Duration::days(3),
        origin: Location {
            lat,
            lng,
            address: "Bahnhofstrasse 1, Zurich".to_string(),
        },
        destination: Location {
            lat: 47.05,
            lng: 8.31,
            address: "Pilatusstrasse 5, Lucerne".to_string(),
        },
        dimensions: Dimensions {
            length: 180.0,
            width: 85.0,
            height: 75.0,
            mass: 40.0,
        },
        fragile: false,
        cooling_required: false,
        ride_along: false,
        required_helpers: 1,
        price: 150.0,
        photos: Vec::new(),
    }
}

pub fn contract_at(id: i64, owner_id: i64, lat: f64, lng: f64, status: ContractStatus) -> Contract {
    let payload = new_contract(lat, lng);
    Contract {
        id,
        owner_id,
        title: payload.title,
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
        status,
        winning_driver: None,
        version: 0,
    }
}

/// Inserts a contract in `status` at Zurich and returns its id.
pub fn seed_contract(state: &AppState, owner_id: i64, status: ContractStatus) -> i64 {
    let id = state.next_contract_id();
    state
        .contracts
        .insert(id, contract_at(id, owner_id, 47.37, 8.54, status));
    id
}
