use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::models::contract::{Contract, ContractStatus};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Edit,
    OfferCreated,
    OfferAccepted,
    MoveDatePassed,
    RatingSubmitted,
    Cancel,
    Delete,
}

impl LifecycleEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::Edit => "edit",
            LifecycleEvent::OfferCreated => "offer_created",
            LifecycleEvent::OfferAccepted => "offer_accepted",
            LifecycleEvent::MoveDatePassed => "move_date_passed",
            LifecycleEvent::RatingSubmitted => "rating_submitted",
            LifecycleEvent::Cancel => "cancel",
            LifecycleEvent::Delete => "delete",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Owner of the contract.
    Requester,
    Driver,
    /// Background jobs such as the completion sweeper.
    System,
}

/// Pure transition function. Returns the status a contract moves to when
/// `role` triggers `event` in `status`.
pub fn next_status(
    status: ContractStatus,
    event: LifecycleEvent,
    role: ActorRole,
) -> Result<ContractStatus, AppError> {
    use ActorRole::*;
    use ContractStatus::*;
    use LifecycleEvent::*;

    let next = match (status, event, role) {
        (Requested, Edit, Requester) => Some(Requested),
        (Requested | Offered, OfferCreated, Driver) => Some(Offered),
        (Requested | Offered, OfferAccepted, Requester) => Some(Accepted),
        (Accepted, MoveDatePassed, System | Requester) => Some(Completed),
        (Completed, RatingSubmitted, Requester) => Some(Finalized),
        (Requested | Offered | Accepted, Cancel, Requester) => Some(Canceled),
        (Requested | Offered | Accepted, Delete, Requester) => Some(Deleted),
        _ => None,
    };

    next.ok_or_else(|| {
        AppError::InvalidTransition(format!("{event} by {role:?} is not allowed from {status:?}"))
    })
}

/// Applies a transition to a contract the caller already holds exclusively.
/// The contract is left untouched on error.
pub(crate) fn apply(
    state: &AppState,
    contract: &mut Contract,
    event: LifecycleEvent,
    role: ActorRole,
) -> Result<ContractStatus, AppError> {
    let from = contract.status;
    let outcome = next_status(from, event, role);
    let label = if outcome.is_ok() { "applied" } else { "rejected" };
    state
        .metrics
        .contract_transitions_total
        .with_label_values(&[event.as_str(), label])
        .inc();

    let to = outcome?;
    contract.status = to;
    contract.version += 1;

    if from != to {
        info!(
            contract_id = contract.id,
            from = ?from,
            to = ?to,
            event = %event,
            "contract transitioned"
        );
    }

    Ok(to)
}

/// Compare-and-swap transition against the store: fails with
/// `ConcurrentModification` if the contract is no longer in `expected`.
pub fn transition_contract(
    state: &AppState,
    contract_id: i64,
    expected: ContractStatus,
    event: LifecycleEvent,
    role: ActorRole,
) -> Result<Contract, AppError> {
    let mut contract = state
        .contracts
        .get_mut(&contract_id)
        .ok_or_else(|| AppError::NotFound(format!("contract {contract_id} not found")))?;

    if contract.status != expected {
        return Err(AppError::ConcurrentModification {
            contract_id,
            expected: format!("{expected:?}, found {:?}", contract.status),
        });
    }

    apply(state, &mut contract, event, role)?;
    Ok(contract.clone())
}

/// Moves every accepted contract whose move date lies before `now` to
/// COMPLETED. Returns how many contracts were completed.
pub fn complete_past_due(state: &AppState, now: DateTime<Utc>) -> usize {
    let due: Vec<i64> = state
        .contracts
        .iter()
        .filter(|entry| {
            let contract = entry.value();
            contract.status == ContractStatus::Accepted && contract.move_date <= now
        })
        .map(|entry| *entry.key())
        .collect();

    let mut completed = 0;
    for contract_id in due {
        match transition_contract(
            state,
            contract_id,
            ContractStatus::Accepted,
            LifecycleEvent::MoveDatePassed,
            ActorRole::System,
        ) {
            Ok(_) => completed += 1,
            Err(AppError::ConcurrentModification { .. }) => {
                debug!(contract_id, "contract changed before completion; skipping");
            }
            Err(err) => warn!(contract_id, error = %err, "failed to complete contract"),
        }
    }

    completed
}

pub async fn run_completion_sweeper(
    state: Arc<AppState>,
    every: Duration,
    cancel: CancellationToken,
) {
    info!(interval_secs = every.as_secs(), "completion sweeper started");

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let completed = complete_past_due(&state, Utc::now());
                if completed > 0 {
                    info!(completed, "past-due contracts completed");
                }
            }
        }
    }

    info!("completion sweeper stopped");
}
