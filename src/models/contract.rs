use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_PHOTOS: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A pickup or drop-off point with the address the requester entered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

impl Location {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

/// Physical size of the load. Lengths in centimetres, mass in kilograms.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Dimensions {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub mass: f64,
}

impl Dimensions {
    /// Volume in cubic metres.
    pub fn volume_m3(&self) -> f64 {
        self.length * self.width * self.height / 1_000_000.0
    }

    pub fn is_valid(&self) -> bool {
        [self.length, self.width, self.height, self.mass]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Requested,
    Offered,
    Accepted,
    Completed,
    Finalized,
    Canceled,
    Deleted,
}

impl ContractStatus {
    /// Canceled and deleted contracts are withdrawn from every feed.
    pub fn is_withdrawn(self) -> bool {
        matches!(self, ContractStatus::Canceled | ContractStatus::Deleted)
    }

    pub fn is_offerable(self) -> bool {
        matches!(self, ContractStatus::Requested | ContractStatus::Offered)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub description: String,
    pub move_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub origin: Location,
    pub destination: Location,
    pub dimensions: Dimensions,
    pub fragile: bool,
    pub cooling_required: bool,
    pub ride_along: bool,
    pub required_helpers: u32,
    pub price: f64,
    pub photos: Vec<String>,
    pub status: ContractStatus,
    pub winning_driver: Option<i64>,
    pub version: u64,
}

impl Contract {
    pub fn has_valid_locations(&self) -> bool {
        self.origin.point().is_valid() && self.destination.point().is_valid()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub contract_id: i64,
    pub driver_id: i64,
    pub value: u8,
    pub flag_issues: bool,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}
