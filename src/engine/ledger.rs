use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::engine::contracts::not_found;
use crate::engine::lifecycle::{self, ActorRole, LifecycleEvent};
use crate::error::AppError;
use crate::models::contract::Contract;
use crate::models::offer::{Offer, OfferStatus};
use crate::state::AppState;

/// How an owner withdraws a contract.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Withdrawal {
    Cancel,
    #[default]
    Delete,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptedOffer {
    pub contract: Contract,
    pub offer: Offer,
    pub rejected: Vec<i64>,
}

fn offer_not_found(offer_id: i64) -> AppError {
    AppError::NotFound(format!("offer {offer_id} not found"))
}

fn count(state: &AppState, outcome: &str) {
    state.metrics.offers_total.with_label_values(&[outcome]).inc();
}

pub fn create_offer(state: &AppState, contract_id: i64, driver_id: i64) -> Result<Offer, AppError> {
    let mut contract = state
        .contracts
        .get_mut(&contract_id)
        .ok_or_else(|| not_found(contract_id))?;

    let already_bid = state
        .offers_for(contract_id)
        .iter()
        .any(|offer| offer.driver_id == driver_id && offer.is_live());
    if already_bid {
        count(state, "duplicate");
        return Err(AppError::DuplicateOffer {
            contract_id,
            driver_id,
        });
    }

    if !contract.status.is_offerable() {
        count(state, "not_offerable");
        return Err(AppError::ContractNotOfferable {
            contract_id,
            status: contract.status,
        });
    }

    let role = if contract.owner_id == driver_id {
        ActorRole::Requester
    } else {
        ActorRole::Driver
    };
    let mut promoted = contract.clone();
    lifecycle::apply(state, &mut promoted, LifecycleEvent::OfferCreated, role)?;

    let offer = Offer {
        id: state.next_offer_id(),
        contract_id,
        driver_id,
        status: OfferStatus::Created,
        created_at: Utc::now(),
    };
    state.offers.insert(offer.id, offer.clone());
    state
        .contract_offers
        .entry(contract_id)
        .or_default()
        .push(offer.id);
    *contract = promoted;

    count(state, "created");
    info!(offer_id = offer.id, contract_id, driver_id, "offer created");
    Ok(offer)
}

pub fn list_offers(state: &AppState, contract_id: i64) -> Result<Vec<Offer>, AppError> {
    if !state.contracts.contains_key(&contract_id) {
        return Err(not_found(contract_id));
    }

    let mut offers = state.offers_for(contract_id);
    offers.sort_by_key(|offer| offer.id);
    Ok(offers)
}

/// Accepts one offer: the offer becomes ACCEPTED, every pending sibling
/// REJECTED and the contract ACCEPTED, all under the contract's write guard.
pub fn accept_offer(
    state: &AppState,
    offer_id: i64,
    requester_id: i64,
) -> Result<AcceptedOffer, AppError> {
    let contract_id = state
        .offers
        .get(&offer_id)
        .map(|offer| offer.contract_id)
        .ok_or_else(|| offer_not_found(offer_id))?;

    let mut contract = state
        .contracts
        .get_mut(&contract_id)
        .ok_or_else(|| not_found(contract_id))?;

    if contract.owner_id != requester_id {
        return Err(AppError::NotOwner {
            contract_id,
            actor_id: requester_id,
        });
    }

    if !contract.status.is_offerable() {
        count(state, "not_offerable");
        return Err(AppError::ContractNotOfferable {
            contract_id,
            status: contract.status,
        });
    }

    let offer = state
        .offers
        .get(&offer_id)
        .map(|offer| offer.value().clone())
        .ok_or_else(|| offer_not_found(offer_id))?;
    if offer.status != OfferStatus::Created {
        return Err(AppError::InvalidTransition(format!(
            "offer {offer_id} is {:?} and cannot be accepted",
            offer.status
        )));
    }

    let mut promoted = contract.clone();
    lifecycle::apply(
        state,
        &mut promoted,
        LifecycleEvent::OfferAccepted,
        ActorRole::Requester,
    )?;
    promoted.winning_driver = Some(offer.driver_id);

    let rejected: Vec<i64> = state
        .offers_for(contract_id)
        .iter()
        .filter(|sibling| sibling.id != offer_id && sibling.status == OfferStatus::Created)
        .map(|sibling| sibling.id)
        .collect();

    let mut plan = vec![(offer_id, OfferStatus::Accepted)];
    plan.extend(rejected.iter().map(|id| (*id, OfferStatus::Rejected)));
    let updated = apply_offer_plan(state, &plan)?;

    *contract = promoted;

    count(state, "accepted");
    info!(
        offer_id,
        contract_id,
        driver_id = offer.driver_id,
        rejected = rejected.len(),
        "offer accepted"
    );

    Ok(AcceptedOffer {
        contract: contract.clone(),
        offer: updated[0].clone(),
        rejected,
    })
}

/// `setOfferStatus`: ACCEPTED runs the accept cascade, REJECTED declines one
/// offer (owner), DELETED withdraws a pending offer (its driver).
pub fn set_offer_status(
    state: &AppState,
    offer_id: i64,
    actor_id: i64,
    status: OfferStatus,
) -> Result<Offer, AppError> {
    match status {
        OfferStatus::Accepted => accept_offer(state, offer_id, actor_id).map(|done| done.offer),
        OfferStatus::Rejected | OfferStatus::Deleted => {
            settle_single_offer(state, offer_id, actor_id, status)
        }
        OfferStatus::Created => Err(AppError::BadRequest(
            "offers cannot be moved back to CREATED".to_string(),
        )),
    }
}

fn settle_single_offer(
    state: &AppState,
    offer_id: i64,
    actor_id: i64,
    status: OfferStatus,
) -> Result<Offer, AppError> {
    let contract_id = state
        .offers
        .get(&offer_id)
        .map(|offer| offer.contract_id)
        .ok_or_else(|| offer_not_found(offer_id))?;

    let contract = state
        .contracts
        .get_mut(&contract_id)
        .ok_or_else(|| not_found(contract_id))?;

    let mut offer = state
        .offers
        .get_mut(&offer_id)
        .ok_or_else(|| offer_not_found(offer_id))?;

    let authorized = match status {
        OfferStatus::Rejected => contract.owner_id == actor_id,
        _ => offer.driver_id == actor_id,
    };
    if !authorized {
        return Err(AppError::NotOwner {
            contract_id,
            actor_id,
        });
    }

    if status == OfferStatus::Rejected && !contract.status.is_offerable() {
        return Err(AppError::ContractNotOfferable {
            contract_id,
            status: contract.status,
        });
    }

    if offer.status != OfferStatus::Created {
        return Err(AppError::InvalidTransition(format!(
            "offer {offer_id} is {:?} and cannot become {status:?}",
            offer.status
        )));
    }

    offer.status = status;
    let outcome = if status == OfferStatus::Rejected {
        "rejected"
    } else {
        "withdrawn"
    };
    count(state, outcome);
    info!(offer_id, contract_id, status = ?status, "offer settled");

    Ok(offer.clone())
}

/// Withdraws a contract on behalf of its owner and deletes all of its offers.
pub fn cancel_contract(
    state: &AppState,
    contract_id: i64,
    owner_id: i64,
    intent: Withdrawal,
) -> Result<Contract, AppError> {
    let mut contract = state
        .contracts
        .get_mut(&contract_id)
        .ok_or_else(|| not_found(contract_id))?;

    if contract.status.is_withdrawn() {
        return Err(AppError::NotFound(format!(
            "contract {contract_id} is already {:?}",
            contract.status
        )));
    }

    if contract.owner_id != owner_id {
        return Err(AppError::NotOwner {
            contract_id,
            actor_id: owner_id,
        });
    }

    let event = match intent {
        Withdrawal::Cancel => LifecycleEvent::Cancel,
        Withdrawal::Delete => LifecycleEvent::Delete,
    };
    let mut withdrawn = contract.clone();
    lifecycle::apply(state, &mut withdrawn, event, ActorRole::Requester)?;

    let plan: Vec<(i64, OfferStatus)> = state
        .offers_for(contract_id)
        .iter()
        .filter(|offer| offer.is_live())
        .map(|offer| (offer.id, OfferStatus::Deleted))
        .collect();
    apply_offer_plan(state, &plan)?;

    *contract = withdrawn;

    info!(
        contract_id,
        intent = ?intent,
        offers_deleted = plan.len(),
        "contract withdrawn"
    );
    Ok(contract.clone())
}

/// Writes every `(offer, status)` pair. If any offer is missing, the ones
/// already written are restored and nothing is left half-applied.
fn apply_offer_plan(
    state: &AppState,
    plan: &[(i64, OfferStatus)],
) -> Result<Vec<Offer>, AppError> {
    let mut previous: Vec<(i64, OfferStatus)> = Vec::with_capacity(plan.len());
    let mut updated = Vec::with_capacity(plan.len());

    for &(offer_id, status) in plan {
        let Some(mut offer) = state.offers.get_mut(&offer_id) else {
            warn!(offer_id, "offer vanished mid-update; rolling back");
            rollback_offer_plan(state, &previous);
            return Err(AppError::Internal(format!(
                "offer {offer_id} disappeared while updating; {} change(s) rolled back",
                previous.len()
            )));
        };

        previous.push((offer_id, offer.status));
        offer.status = status;
        updated.push(offer.clone());
    }

    Ok(updated)
}

fn rollback_offer_plan(state: &AppState, previous: &[(i64, OfferStatus)]) {
    for &(offer_id, status) in previous.iter().rev() {
        match state.offers.get_mut(&offer_id) {
            Some(mut offer) => offer.status = status,
            None => error!(offer_id, "offer lost during rollback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        accept_offer, apply_offer_plan, cancel_contract, create_offer, list_offers,
        set_offer_status, Withdrawal,
    };
    use crate::engine::test_support::{seed_contract, state};
    use crate::error::AppError;
    use crate::models::contract::ContractStatus;
    use crate::models::offer::OfferStatus;

    const OWNER: i64 = 1;
    const D1: i64 = 11;
    const D2: i64 = 12;
    const D3: i64 = 13;

    fn status_of(state: &crate::state::AppState, contract_id: i64) -> ContractStatus {
        state.contracts.get(&contract_id).unwrap().status
    }

    #[test]
    fn full_offer_scenario() {
        let state = state();
        let contract = seed_contract(&state, OWNER, ContractStatus::Requested);

        let first = create_offer(&state, contract, D1).unwrap();
        assert_eq!(status_of(&state, contract), ContractStatus::Offered);

        let second = create_offer(&state, contract, D2).unwrap();
        assert_eq!(status_of(&state, contract), ContractStatus::Offered);

        let accepted = accept_offer(&state, first.id, OWNER).unwrap();
        assert_eq!(accepted.offer.status, OfferStatus::Accepted);
        assert_eq!(accepted.rejected, vec![second.id]);
        assert_eq!(accepted.contract.status, ContractStatus::Accepted);
        assert_eq!(accepted.contract.winning_driver, Some(D1));
        assert_eq!(
            state.offers.get(&second.id).unwrap().status,
            OfferStatus::Rejected
        );

        let late = create_offer(&state, contract, D3);
        assert!(matches!(
            late,
            Err(AppError::ContractNotOfferable {
                status: ContractStatus::Accepted,
                ..
            })
        ));
        assert_eq!(list_offers(&state, contract).unwrap().len(), 2);
    }

    #[test]
    fn second_offer_from_same_driver_is_duplicate() {
        let state = state();
        let contract = seed_contract(&state, OWNER, ContractStatus::Requested);

        create_offer(&state, contract, D1).unwrap();
        let again = create_offer(&state, contract, D1);

        assert!(matches!(again, Err(AppError::DuplicateOffer { .. })));
        assert_eq!(state.offers.len(), 1);
    }

    #[test]
    fn withdrawn_offer_allows_a_fresh_bid() {
        let state = state();
        let contract = seed_contract(&state, OWNER, ContractStatus::Requested);

        let offer = create_offer(&state, contract, D1).unwrap();
        set_offer_status(&state, offer.id, D1, OfferStatus::Deleted).unwrap();

        assert!(create_offer(&state, contract, D1).is_ok());
    }

    #[test]
    fn owner_cannot_bid_on_own_contract() {
        let state = state();
        let contract = seed_contract(&state, OWNER, ContractStatus::Requested);

        let result = create_offer(&state, contract, OWNER);

        assert!(matches!(result, Err(AppError::InvalidTransition(_))));
        assert!(state.offers.is_empty());
        assert_eq!(status_of(&state, contract), ContractStatus::Requested);
    }

    #[test]
    fn second_accept_on_same_contract_is_not_offerable() {
        let state = state();
        let contract = seed_contract(&state, OWNER, ContractStatus::Requested);
        let first = create_offer(&state, contract, D1).unwrap();
        let second = create_offer(&state, contract, D2).unwrap();

        accept_offer(&state, first.id, OWNER).unwrap();
        let again = accept_offer(&state, second.id, OWNER);

        assert!(matches!(again, Err(AppError::ContractNotOfferable { .. })));
        let accepted = state
            .offers
            .iter()
            .filter(|offer| offer.status == OfferStatus::Accepted)
            .count();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn only_owner_may_accept() {
        let state = state();
        let contract = seed_contract(&state, OWNER, ContractStatus::Requested);
        let offer = create_offer(&state, contract, D1).unwrap();

        let result = accept_offer(&state, offer.id, D2);

        assert!(matches!(result, Err(AppError::NotOwner { .. })));
        assert_eq!(status_of(&state, contract), ContractStatus::Offered);
        assert_eq!(
            state.offers.get(&offer.id).unwrap().status,
            OfferStatus::Created
        );
    }

    #[test]
    fn rejected_offer_cannot_be_accepted() {
        let state = state();
        let contract = seed_contract(&state, OWNER, ContractStatus::Requested);
        let offer = create_offer(&state, contract, D1).unwrap();

        set_offer_status(&state, offer.id, OWNER, OfferStatus::Rejected).unwrap();
        let result = accept_offer(&state, offer.id, OWNER);

        assert!(matches!(result, Err(AppError::InvalidTransition(_))));
        assert_eq!(status_of(&state, contract), ContractStatus::Offered);
    }

    #[test]
    fn driver_cannot_withdraw_someone_elses_offer() {
        let state = state();
        let contract = seed_contract(&state, OWNER, ContractStatus::Requested);
        let offer = create_offer(&state, contract, D1).unwrap();

        let result = set_offer_status(&state, offer.id, D2, OfferStatus::Deleted);

        assert!(matches!(result, Err(AppError::NotOwner { .. })));
    }

    #[test]
    fn cancel_cascades_offer_deletion() {
        let state = state();
        let contract = seed_contract(&state, OWNER, ContractStatus::Requested);
        let first = create_offer(&state, contract, D1).unwrap();
        let second = create_offer(&state, contract, D2).unwrap();

        let canceled = cancel_contract(&state, contract, OWNER, Withdrawal::Cancel).unwrap();

        assert_eq!(canceled.status, ContractStatus::Canceled);
        for id in [first.id, second.id] {
            assert_eq!(state.offers.get(&id).unwrap().status, OfferStatus::Deleted);
        }
    }

    #[test]
    fn deleting_twice_is_not_found() {
        let state = state();
        let contract = seed_contract(&state, OWNER, ContractStatus::Requested);

        cancel_contract(&state, contract, OWNER, Withdrawal::Delete).unwrap();
        let again = cancel_contract(&state, contract, OWNER, Withdrawal::Delete);

        assert!(matches!(again, Err(AppError::NotFound(_))));
        assert_eq!(status_of(&state, contract), ContractStatus::Deleted);
    }

    #[test]
    fn stranger_cannot_cancel_and_completed_cannot_be_withdrawn() {
        let state = state();
        let open = seed_contract(&state, OWNER, ContractStatus::Requested);
        let done = seed_contract(&state, OWNER, ContractStatus::Completed);

        assert!(matches!(
            cancel_contract(&state, open, D1, Withdrawal::Cancel),
            Err(AppError::NotOwner { .. })
        ));
        assert!(matches!(
            cancel_contract(&state, done, OWNER, Withdrawal::Cancel),
            Err(AppError::InvalidTransition(_))
        ));
        assert_eq!(status_of(&state, done), ContractStatus::Completed);
    }

    #[test]
    fn partial_offer_plan_is_rolled_back() {
        let state = state();
        let contract = seed_contract(&state, OWNER, ContractStatus::Requested);
        let first = create_offer(&state, contract, D1).unwrap();
        let second = create_offer(&state, contract, D2).unwrap();

        let plan = [
            (first.id, OfferStatus::Accepted),
            (second.id, OfferStatus::Rejected),
            (9_999, OfferStatus::Rejected),
        ];
        let result = apply_offer_plan(&state, &plan);

        assert!(matches!(result, Err(AppError::Internal(_))));
        for id in [first.id, second.id] {
            assert_eq!(state.offers.get(&id).unwrap().status, OfferStatus::Created);
        }
    }

    #[test]
    fn concurrent_accepts_pick_a_single_winner() {
        let state = std::sync::Arc::new(state());
        let contract = seed_contract(&state, OWNER, ContractStatus::Requested);
        let offers: Vec<i64> = (0..8)
            .map(|driver| create_offer(&state, contract, 100 + driver).unwrap().id)
            .collect();

        let handles: Vec<_> = offers
            .iter()
            .map(|offer_id| {
                let state = state.clone();
                let offer_id = *offer_id;
                std::thread::spawn(move || accept_offer(&state, offer_id, OWNER).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        let accepted = state
            .offers
            .iter()
            .filter(|offer| offer.status == OfferStatus::Accepted)
            .count();
        let rejected = state
            .offers
            .iter()
            .filter(|offer| offer.status == OfferStatus::Rejected)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(rejected, 7);
    }
}
