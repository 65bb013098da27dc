use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;

use crate::engine::scheduler::RefreshSettings;
use crate::models::contract::{Contract, Rating};
use crate::models::offer::Offer;
use crate::observability::metrics::Metrics;

/// In-memory backing store.
///
/// Writes to a contract and to its offers happen while holding the
/// contract's `get_mut` guard, which serializes all mutations per contract.
/// Lock order is always `contracts` before `offers`.
pub struct AppState {
    pub contracts: DashMap<i64, Contract>,
    pub offers: DashMap<i64, Offer>,
    pub contract_offers: DashMap<i64, Vec<i64>>,
    pub ratings: DashMap<i64, Rating>,
    pub metrics: Metrics,
    /// Polling settings for every discovery feed opened against this store.
    pub refresh: RefreshSettings,
    next_contract_id: AtomicI64,
    next_offer_id: AtomicI64,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            contracts: DashMap::new(),
            offers: DashMap::new(),
            contract_offers: DashMap::new(),
            ratings: DashMap::new(),
            metrics: Metrics::new(),
            refresh: RefreshSettings::default(),
            next_contract_id: AtomicI64::new(1),
            next_offer_id: AtomicI64::new(1),
        }
    }

    pub fn with_refresh(mut self, refresh: RefreshSettings) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn next_contract_id(&self) -> i64 {
        self.next_contract_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_offer_id(&self) -> i64 {
        self.next_offer_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn offers_for(&self, contract_id: i64) -> Vec<Offer> {
        let ids = self
            .contract_offers
            .get(&contract_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        ids.iter()
            .filter_map(|id| self.offers.get(id).map(|offer| offer.value().clone()))
            .collect()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
