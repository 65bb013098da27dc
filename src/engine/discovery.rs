use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::geo::LocationIndex;
use crate::models::contract::{Contract, ContractStatus, GeoPoint};
use crate::models::filter::{FilterParams, Viewport};
use crate::models::marker::{Marker, MarkerColor};

/// What the feed asks the backing store for: a center point and a predicate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedQuery {
    pub center: GeoPoint,
    #[serde(default)]
    pub filter: FilterParams,
}

impl FeedQuery {
    pub fn new(center: GeoPoint, filter: FilterParams) -> Self {
        Self { center, filter }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !self.center.is_valid() {
            return Err(AppError::InvalidLocation(format!(
                "query center ({}, {}) is not a valid coordinate",
                self.center.lat, self.center.lng
            )));
        }
        self.filter.validate()
    }
}

pub fn marker_color(contract: &Contract, viewer_id: Option<i64>) -> MarkerColor {
    match contract.status {
        ContractStatus::Accepted
            if viewer_id.is_some() && contract.winning_driver == viewer_id =>
        {
            MarkerColor::Green
        }
        ContractStatus::Completed | ContractStatus::Finalized => MarkerColor::Dark,
        _ => MarkerColor::Red,
    }
}

pub fn to_marker(contract: &Contract, viewer_id: Option<i64>) -> Marker {
    Marker {
        contract_id: contract.id,
        lat: contract.origin.lat,
        lng: contract.origin.lng,
        title: contract.title.clone(),
        price: contract.price,
        status: contract.status,
        color: marker_color(contract, viewer_id),
    }
}

/// Contracts that are not withdrawn, have valid coordinates, sit inside
/// `viewport` and satisfy the query predicate. Input order is preserved.
pub fn select_visible<'a, I>(contracts: I, viewport: &Viewport, query: &FeedQuery) -> Vec<&'a Contract>
where
    I: IntoIterator<Item = &'a Contract>,
{
    contracts
        .into_iter()
        .filter(|contract| {
            if contract.status.is_withdrawn() {
                return false;
            }
            if !contract.has_valid_locations() {
                warn!(
                    contract_id = contract.id,
                    lat = contract.origin.lat,
                    lng = contract.origin.lng,
                    "skipping contract with invalid location"
                );
                return false;
            }
            viewport.contains(&contract.origin.point())
                && query.filter.matches(contract, &query.center)
        })
        .collect()
}

/// Identifies one fetch issued by a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub seq: u64,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    /// The fetch failed; the previous snapshot is kept.
    Failed,
    /// Older than an applied fetch, or issued for a superseded query.
    Stale,
}

/// Per-viewer discovery state: the last fetched snapshot, its spatial index
/// and the marker set for the current viewport.
#[derive(Debug)]
pub struct DiscoveryFeed {
    viewer_id: Option<i64>,
    query: FeedQuery,
    generation: u64,
    viewport: Option<Viewport>,
    snapshot: HashMap<i64, Contract>,
    index: LocationIndex,
    next_seq: u64,
    applied_seq: Option<u64>,
    markers: Vec<Marker>,
}

impl DiscoveryFeed {
    pub fn new(viewer_id: Option<i64>, query: FeedQuery) -> Self {
        Self {
            viewer_id,
            query,
            generation: 0,
            viewport: None,
            snapshot: HashMap::new(),
            index: LocationIndex::default(),
            next_seq: 0,
            applied_seq: None,
            markers: Vec::new(),
        }
    }

    pub fn query(&self) -> &FeedQuery {
        &self.query
    }

    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref()
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn snapshot_len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn begin_fetch(&mut self) -> (FetchTicket, FeedQuery) {
        let ticket = FetchTicket {
            seq: self.next_seq,
            generation: self.generation,
        };
        self.next_seq += 1;
        (ticket, self.query.clone())
    }

    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<Contract>, AppError>,
    ) -> FetchOutcome {
        if ticket.generation != self.generation {
            debug!(seq = ticket.seq, "discarding fetch for a superseded query");
            return FetchOutcome::Stale;
        }
        if self.applied_seq.is_some_and(|applied| ticket.seq < applied) {
            debug!(seq = ticket.seq, "discarding out-of-order fetch");
            return FetchOutcome::Stale;
        }

        match result {
            Ok(contracts) => {
                self.applied_seq = Some(ticket.seq);
                self.ingest(contracts);
                self.refresh_markers();
                FetchOutcome::Applied
            }
            Err(err) => {
                warn!(seq = ticket.seq, error = %err, "feed fetch failed; keeping previous markers");
                FetchOutcome::Failed
            }
        }
    }

    /// Re-clips the current snapshot to `viewport` without fetching.
    pub fn set_viewport(&mut self, viewport: Viewport) -> &[Marker] {
        self.viewport = Some(viewport);
        self.refresh_markers();
        &self.markers
    }

    /// Replaces the query. Returns `true` when it changed, meaning the
    /// snapshot must be fetched again; results of earlier fetches are then
    /// ignored.
    pub fn set_query(&mut self, query: FeedQuery) -> bool {
        if query == self.query {
            return false;
        }

        self.query = query;
        self.generation += 1;
        self.refresh_markers();
        true
    }

    fn ingest(&mut self, contracts: Vec<Contract>) {
        self.snapshot.clear();
        self.index.clear();

        for contract in contracts {
            if contract.status.is_withdrawn() {
                continue;
            }
            if !contract.destination.point().is_valid() {
                warn!(contract_id = contract.id, "skipping contract with invalid destination");
                continue;
            }
            if let Err(err) = self.index.insert(contract.id, contract.origin.point()) {
                warn!(contract_id = contract.id, error = %err, "skipping contract");
                continue;
            }
            self.snapshot.insert(contract.id, contract);
        }
    }

    fn refresh_markers(&mut self) {
        let Some(viewport) = self.viewport else {
            self.markers.clear();
            return;
        };

        let ids = self.index.query(&viewport);
        let candidates = ids.iter().filter_map(|id| self.snapshot.get(id));
        self.markers = select_visible(candidates, &viewport, &self.query)
            .into_iter()
            .map(|contract| to_marker(contract, self.viewer_id))
            .collect();
    }
}
