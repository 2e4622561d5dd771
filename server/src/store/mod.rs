//! Persistence for tickets and memberships.
//!
//! Both backends must honour the same two guarantees: unique constraints
//! reported as [`StoreError::UniqueViolation`] with the constraint name, and
//! single-record conditional updates that are atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ClubTrekkingMembership, NewTicket, Ticket};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryMembershipStore, MemoryTicketStore};
pub use postgres::{PgMembershipStore, PgTicketStore};

pub const TICKET_CODE_CONSTRAINT: &str = "tickets_code_key";
pub const TICKET_OWNER_CONSTRAINT: &str = "tickets_user_salida_key";
pub const LIVE_MEMBERSHIP_CONSTRAINT: &str = "club_memberships_one_live_per_user";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("record was modified concurrently")]
    VersionConflict,

    #[error("stored record is malformed: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::VersionConflict | StoreError::Database(_))
    }

    pub(crate) fn from_insert(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return StoreError::UniqueViolation(db.constraint().unwrap_or_default().to_string());
            }
        }
        StoreError::Database(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Inserts a ticket in `issued` state.
    async fn insert(&self, ticket: NewTicket) -> StoreResult<Ticket>;

    /// Atomically flips `issued → redeemed`. Returns `None` when no ticket
    /// with that code is currently `issued`.
    async fn redeem_if_issued(
        &self,
        code: &str,
        staff_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Ticket>>;

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Ticket>>;

    async fn find_event_name(&self, event_id: Uuid) -> StoreResult<Option<String>>;

    async fn mark_email_sent(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    async fn ping(&self) -> StoreResult<()>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Fails with [`LIVE_MEMBERSHIP_CONSTRAINT`] when the user already holds
    /// an `activa` or `pausada` membership.
    async fn insert(&self, membership: &ClubTrekkingMembership) -> StoreResult<()>;

    async fn find_live_by_user(&self, user_id: Uuid) -> StoreResult<Option<ClubTrekkingMembership>>;

    /// Writes the membership if its stored version still equals
    /// `membership.version`, returning the new version.
    async fn save(&self, membership: &ClubTrekkingMembership) -> StoreResult<i64>;
}
