//! In-process stores for tests and `STORE=memory` development runs.
//!
//! Each conditional update runs while holding the map shard guard for the
//! record, which gives the same single-record atomicity as the SQL backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{ClubTrekkingMembership, NewTicket, Ticket, TicketStatus};
use crate::store::{
    MembershipStore, StoreError, StoreResult, TicketStore, LIVE_MEMBERSHIP_CONSTRAINT,
    TICKET_CODE_CONSTRAINT, TICKET_OWNER_CONSTRAINT,
};

#[derive(Default, Clone)]
pub struct MemoryTicketStore {
    by_code: Arc<DashMap<String, Ticket>>,
    by_owner: Arc<DashMap<(Uuid, Uuid), String>>,
    event_names: Arc<DashMap<Uuid, String>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_event(&self, event_id: Uuid, name: impl Into<String>) {
        self.event_names.insert(event_id, name.into());
    }

    /// Puts a ticket in place as-is, bypassing issuance. Used to seed
    /// fixtures such as voided tickets.
    pub fn put(&self, ticket: Ticket) {
        self.by_owner
            .insert((ticket.user_id, ticket.event_id), ticket.code.clone());
        self.by_code.insert(ticket.code.clone(), ticket);
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn insert(&self, ticket: NewTicket) -> StoreResult<Ticket> {
        // Lock order is owner index, then code index.
        match self.by_owner.entry((ticket.user_id, ticket.event_id)) {
            Entry::Occupied(_) => Err(StoreError::UniqueViolation(
                TICKET_OWNER_CONSTRAINT.to_string(),
            )),
            Entry::Vacant(owner) => match self.by_code.entry(ticket.code.clone()) {
                Entry::Occupied(_) => Err(StoreError::UniqueViolation(
                    TICKET_CODE_CONSTRAINT.to_string(),
                )),
                Entry::Vacant(slot) => {
                    let ticket = ticket.into_ticket();
                    owner.insert(ticket.code.clone());
                    slot.insert(ticket.clone());
                    Ok(ticket)
                }
            },
        }
    }

    async fn redeem_if_issued(
        &self,
        code: &str,
        staff_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Ticket>> {
        let Some(mut ticket) = self.by_code.get_mut(code) else {
            return Ok(None);
        };
        if ticket.status != TicketStatus::Issued {
            return Ok(None);
        }

        ticket.status = TicketStatus::Redeemed;
        ticket.redeemed_at = Some(at);
        ticket.redeemed_by = Some(staff_id);
        Ok(Some(ticket.clone()))
    }

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Ticket>> {
        Ok(self.by_code.get(code).map(|ticket| ticket.value().clone()))
    }

    async fn find_event_name(&self, event_id: Uuid) -> StoreResult<Option<String>> {
        Ok(self.event_names.get(&event_id).map(|name| name.value().clone()))
    }

    async fn mark_email_sent(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(mut ticket) = self
            .by_code
            .iter_mut()
            .find(|ticket| ticket.id == ticket_id)
        {
            ticket.email_sent_at = Some(at);
        }
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MemoryMembershipStore {
    memberships: Arc<DashMap<Uuid, ClubTrekkingMembership>>,
    live_by_user: Arc<DashMap<Uuid, Uuid>>,
}

impl MemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<ClubTrekkingMembership> {
        self.memberships.get(&id).map(|m| m.value().clone())
    }
}

#[async_trait]
impl MembershipStore for MemoryMembershipStore {
    async fn insert(&self, membership: &ClubTrekkingMembership) -> StoreResult<()> {
        if !membership.estado.is_live() {
            self.memberships.insert(membership.id, membership.clone());
            return Ok(());
        }

        // Lock order is user index, then memberships. `save` never holds both.
        match self.live_by_user.entry(membership.user_id) {
            Entry::Occupied(mut existing) => {
                let still_live = self
                    .memberships
                    .get(existing.get())
                    .is_some_and(|current| current.estado.is_live());
                if still_live {
                    return Err(StoreError::UniqueViolation(
                        LIVE_MEMBERSHIP_CONSTRAINT.to_string(),
                    ));
                }
                self.memberships.insert(membership.id, membership.clone());
                existing.insert(membership.id);
            }
            Entry::Vacant(slot) => {
                self.memberships.insert(membership.id, membership.clone());
                slot.insert(membership.id);
            }
        }
        Ok(())
    }

    async fn find_live_by_user(&self, user_id: Uuid) -> StoreResult<Option<ClubTrekkingMembership>> {
        let Some(id) = self.live_by_user.get(&user_id).map(|id| *id.value()) else {
            return Ok(None);
        };
        Ok(self
            .memberships
            .get(&id)
            .filter(|membership| membership.estado.is_live())
            .map(|membership| membership.value().clone()))
    }

    async fn save(&self, membership: &ClubTrekkingMembership) -> StoreResult<i64> {
        let version = {
            let mut stored = self
                .memberships
                .get_mut(&membership.id)
                .ok_or(StoreError::VersionConflict)?;
            if stored.version != membership.version {
                return Err(StoreError::VersionConflict);
            }
            let mut updated = membership.clone();
            updated.version += 1;
            let version = updated.version;
            *stored = updated;
            version
        };

        if !membership.estado.is_live() {
            self.live_by_user
                .remove_if(&membership.user_id, |_, id| *id == membership.id);
        }
        Ok(version)
    }
}
