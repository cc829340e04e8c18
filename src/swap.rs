//! Swap negotiation between slot owners
//!
//! Owns every slot status transition. A request claims both slots with
//! conditional updates and records the proposal in one transaction; a
//! response settles the request and both slots in one transaction.

use crate::db::Database;
use crate::error::{Result, SwapError};
use crate::types::{
    NewSlot, RequestStatus, Slot, SlotStatus, SlotUpdate, SwapFilter, SwapOutcome, SwapRequest,
};
use chrono::Utc;
use sqlx::sqlite::SqliteConnection;
use tracing::{info, warn};
use uuid::Uuid;

/// Upper bound on list sizes
pub const MAX_LIST_LIMIT: i64 = 500;

/// Drives slot and swap request state
pub struct SwapEngine {
    db: Database,
}

impl SwapEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create an available slot for `owner_id`
    pub async fn create_slot(&self, owner_id: &str, new_slot: NewSlot) -> Result<Slot> {
        let title = new_slot.title.trim();
        if title.is_empty() {
            return Err(SwapError::InvalidInput("Title is required".to_string()));
        }

        let slot = Slot {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            date: new_slot.date,
            is_swappable: new_slot.is_swappable,
            status: SlotStatus::Available,
            created_at: Utc::now(),
        };

        self.db.create_slot(&slot).await?;

        info!("Slot {} created by {} (swappable: {})", slot.id, owner_id, slot.is_swappable);
        Ok(slot)
    }

    /// Toggle whether a slot is offered in the marketplace
    pub async fn set_swappable(&self, slot_id: &str, owner_id: &str, swappable: bool) -> Result<Slot> {
        self.update_slot(
            slot_id,
            owner_id,
            SlotUpdate {
                is_swappable: swappable,
                status: None,
            },
        )
        .await
    }

    /// Owner-side update of swappability and the busy marker
    pub async fn update_slot(&self, slot_id: &str, owner_id: &str, update: SlotUpdate) -> Result<Slot> {
        let slot = self
            .db
            .get_slot(slot_id)
            .await?
            .filter(|s| s.owner_id == owner_id)
            .ok_or_else(|| SwapError::NotFound(format!("Slot {} not found", slot_id)))?;

        if slot.status == SlotStatus::Pending {
            return Err(SwapError::InvalidState(format!(
                "Slot {} is part of a pending swap",
                slot_id
            )));
        }

        let status = update.status.unwrap_or(slot.status);
        if status == SlotStatus::Pending {
            return Err(SwapError::InvalidState(
                "Pending status is only set by swap requests".to_string(),
            ));
        }
        if update.is_swappable && status == SlotStatus::Swapped {
            return Err(SwapError::InvalidState(
                "A busy slot cannot be offered for swapping".to_string(),
            ));
        }

        let updated = self
            .db
            .update_slot_flags(slot_id, owner_id, update.is_swappable, status)
            .await?;

        // A swap request or an accepted swap got to the slot first.
        if !updated {
            return Err(SwapError::InvalidState(format!(
                "Slot {} changed while updating",
                slot_id
            )));
        }

        info!(
            "Slot {} updated by {}: swappable={}, status={}",
            slot_id, owner_id, update.is_swappable, status
        );

        Ok(Slot {
            is_swappable: update.is_swappable,
            status,
            ..slot
        })
    }

    /// Propose exchanging the requester's `offered_slot_id` for `desired_slot_id`
    pub async fn request_swap(
        &self,
        requester_id: &str,
        offered_slot_id: &str,
        desired_slot_id: &str,
    ) -> Result<SwapOutcome> {
        if offered_slot_id == desired_slot_id {
            return Err(SwapError::InvalidSwap("Cannot swap a slot with itself".to_string()));
        }

        let mut tx = self.db.begin().await?;

        match Self::propose(&mut tx, requester_id, offered_slot_id, desired_slot_id).await {
            Ok(proposal) => {
                tx.commit()
                    .await
                    .map_err(|e| SwapError::TransactionFailed(e.to_string()))?;

                info!(
                    "Swap request {}: {} offers slot {} to {} for slot {}",
                    proposal.request.id,
                    proposal.request.from_user_id,
                    offered_slot_id,
                    proposal.request.to_user_id,
                    desired_slot_id
                );
                Ok(proposal)
            }
            Err(err) => {
                if let Err(e) = tx.rollback().await {
                    warn!("Rollback after failed swap request: {}", e);
                }
                Err(err)
            }
        }
    }

    async fn propose(
        conn: &mut SqliteConnection,
        requester_id: &str,
        offered_slot_id: &str,
        desired_slot_id: &str,
    ) -> Result<SwapOutcome> {
        if !Database::claim_offered_slot(conn, offered_slot_id, requester_id)
            .await
            .map_err(tx_err)?
        {
            return Err(SwapError::InvalidSwap(format!(
                "Slot {} is not yours or is not available for swapping",
                offered_slot_id
            )));
        }

        if !Database::claim_desired_slot(conn, desired_slot_id, requester_id)
            .await
            .map_err(tx_err)?
        {
            return Err(SwapError::InvalidSwap(format!(
                "Slot {} is not available for swapping",
                desired_slot_id
            )));
        }

        let offered = load_slot(conn, offered_slot_id).await?;
        let requested = load_slot(conn, desired_slot_id).await?;

        let request = SwapRequest {
            id: Uuid::new_v4().to_string(),
            from_user_id: offered.owner_id.clone(),
            to_user_id: requested.owner_id.clone(),
            offered_slot_id: offered.id.clone(),
            requested_slot_id: requested.id.clone(),
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            responded_at: None,
        };

        Database::insert_swap_request(conn, &request)
            .await
            .map_err(tx_err)?;

        Ok(SwapOutcome {
            request,
            offered,
            requested,
        })
    }

    /// Accept or reject a pending request addressed to `responder_id`
    pub async fn respond_to_swap(
        &self,
        responder_id: &str,
        request_id: &str,
        accept: bool,
    ) -> Result<SwapOutcome> {
        let request = self
            .db
            .get_swap_request(request_id)
            .await?
            .ok_or_else(|| SwapError::NotFound(format!("Swap request {} not found", request_id)))?;

        if request.to_user_id != responder_id {
            return Err(SwapError::Forbidden(
                "Not authorized to respond to this swap".to_string(),
            ));
        }

        if request.status != RequestStatus::Pending {
            return Err(SwapError::InvalidState(format!(
                "Swap request {} is already {}",
                request_id, request.status
            )));
        }

        let mut tx = self.db.begin().await?;

        match Self::resolve(&mut tx, request, accept).await {
            Ok(resolution) => {
                tx.commit()
                    .await
                    .map_err(|e| SwapError::TransactionFailed(e.to_string()))?;

                info!(
                    "Swap request {} {} by {}",
                    request_id, resolution.request.status, responder_id
                );
                Ok(resolution)
            }
            Err(err) => {
                warn!("Swap response for {} rolled back: {}", request_id, err);
                if let Err(e) = tx.rollback().await {
                    warn!("Rollback after failed swap response: {}", e);
                }
                Err(err)
            }
        }
    }

    async fn resolve(
        conn: &mut SqliteConnection,
        request: SwapRequest,
        accept: bool,
    ) -> Result<SwapOutcome> {
        let responded_at = Utc::now();
        let status = if accept {
            RequestStatus::Accepted
        } else {
            RequestStatus::Rejected
        };

        // Conditional on the request still being pending, so a concurrent
        // second response cannot apply twice.
        if !Database::resolve_swap_request(
            conn,
            &request.id,
            &request.to_user_id,
            status,
            &responded_at,
        )
        .await
        .map_err(tx_err)?
        {
            return Err(SwapError::InvalidState(format!(
                "Swap request {} is no longer pending",
                request.id
            )));
        }

        let offered = load_slot(conn, &request.offered_slot_id).await?;
        let requested = load_slot(conn, &request.requested_slot_id).await?;

        // Accepting exchanges owners and takes both slots off the market;
        // rejecting puts both back on offer with their owners unchanged.
        let (offered_owner, requested_owner) = if accept {
            (requested.owner_id.clone(), offered.owner_id.clone())
        } else {
            (offered.owner_id.clone(), requested.owner_id.clone())
        };
        let swappable = !accept;

        let mut settled = Vec::with_capacity(2);
        for (slot, owner_id) in [(offered, offered_owner), (requested, requested_owner)] {
            let released = Database::settle_slot(
                conn,
                &slot.id,
                &owner_id,
                swappable,
                SlotStatus::Available,
            )
            .await
            .map_err(tx_err)?;

            if !released {
                return Err(SwapError::TransactionFailed(format!(
                    "Slot {} is not pending",
                    slot.id
                )));
            }

            settled.push(Slot {
                owner_id,
                is_swappable: swappable,
                status: SlotStatus::Available,
                ..slot
            });
        }

        let requested = settled.pop().ok_or_else(|| {
            SwapError::TransactionFailed("Requested slot missing after settle".to_string())
        })?;
        let offered = settled.pop().ok_or_else(|| {
            SwapError::TransactionFailed("Offered slot missing after settle".to_string())
        })?;

        Ok(SwapOutcome {
            request: SwapRequest {
                status,
                responded_at: Some(responded_at),
                ..request
            },
            offered,
            requested,
        })
    }

    /// Slots owned by the caller
    pub async fn my_slots(&self, owner_id: &str) -> Result<Vec<Slot>> {
        self.db.list_slots_by_owner(owner_id).await
    }

    /// Other users' slots currently on offer
    pub async fn marketplace(&self, caller_id: &str) -> Result<Vec<Slot>> {
        self.db.list_swappable_slots(caller_id).await
    }

    /// The caller's own slots currently on offer
    pub async fn my_swappable(&self, owner_id: &str) -> Result<Vec<Slot>> {
        self.db.list_owner_swappable(owner_id).await
    }

    /// Requests the caller has sent
    pub async fn swaps_sent(&self, user_id: &str, filter: SwapFilter) -> Result<Vec<SwapRequest>> {
        self.db
            .list_swap_requests_from(user_id, clamp_filter(filter))
            .await
    }

    /// Requests addressed to the caller
    pub async fn swaps_received(&self, user_id: &str, filter: SwapFilter) -> Result<Vec<SwapRequest>> {
        self.db
            .list_swap_requests_to(user_id, clamp_filter(filter))
            .await
    }
}

fn clamp_filter(filter: SwapFilter) -> SwapFilter {
    SwapFilter {
        limit: filter.limit.clamp(1, MAX_LIST_LIMIT),
        ..filter
    }
}

fn tx_err(e: sqlx::Error) -> SwapError {
    SwapError::TransactionFailed(e.to_string())
}

async fn load_slot(conn: &mut SqliteConnection, slot_id: &str) -> Result<Slot> {
    Database::fetch_slot(conn, slot_id)
        .await
        .map_err(tx_err)?
        .ok_or_else(|| SwapError::NotFound(format!("Slot {} not found", slot_id)))
}
