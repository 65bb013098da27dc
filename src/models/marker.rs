use serde::{Deserialize, Serialize};

use crate::models::contract::ContractStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarkerColor {
    /// Accepted, and the viewer is the winning driver.
    Green,
    /// Completed or finalized.
    Dark,
    Red,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Marker {
    pub contract_id: i64,
    pub lat: f64,
    pub lng: f64,
    pub title: String,
    pub price: f64,
    pub status: ContractStatus,
    pub color: MarkerColor,
}
