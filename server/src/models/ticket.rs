use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Issued,
    Redeemed,
    Invalid,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Issued => "issued",
            TicketStatus::Redeemed => "redeemed",
            TicketStatus::Invalid => "invalid",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issued" => Ok(TicketStatus::Issued),
            "redeemed" => Ok(TicketStatus::Redeemed),
            "invalid" => Ok(TicketStatus::Invalid),
            other => Err(format!("unknown ticket status '{}'", other)),
        }
    }
}

/// A redeemable entry pass bound to one user and one salida.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub payment_ref: Option<String>,
    pub code: String,
    pub status: TicketStatus,
    pub issued_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub redeemed_by: Option<Uuid>,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

/// Raw `tickets` row. Converted into [`Ticket`] so that unknown statuses and
/// half-written redemptions are rejected at the store boundary.
#[derive(Debug, Clone, FromRow)]
pub struct TicketRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub salida_id: Uuid,
    pub payment_ref: Option<String>,
    pub code: String,
    pub status: String,
    pub issued_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub redeemed_by: Option<Uuid>,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = String;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status: TicketStatus = row.status.parse()?;
        if status == TicketStatus::Redeemed && row.redeemed_at.is_none() {
            return Err(format!("ticket {} is redeemed without redeemed_at", row.id));
        }

        Ok(Ticket {
            id: row.id,
            user_id: row.user_id,
            event_id: row.salida_id,
            payment_ref: row.payment_ref,
            code: row.code,
            status,
            issued_at: row.issued_at,
            redeemed_at: row.redeemed_at,
            redeemed_by: row.redeemed_by,
            email_sent_at: row.email_sent_at,
            expires_at: row.expires_at,
        })
    }
}

/// Insert payload for a freshly issued ticket.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub payment_ref: Option<String>,
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewTicket {
    pub fn into_ticket(self) -> Ticket {
        Ticket {
            id: self.id,
            user_id: self.user_id,
            event_id: self.event_id,
            payment_ref: self.payment_ref,
            code: self.code,
            status: TicketStatus::Issued,
            issued_at: self.issued_at,
            redeemed_at: None,
            redeemed_by: None,
            email_sent_at: None,
            expires_at: self.expires_at,
        }
    }
}

/// Outcome of a successful scan. A second scan of an already redeemed code
/// is still a success, flagged with `already_redeemed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionResult {
    pub ok: bool,
    pub already_redeemed: bool,
    pub redeemed_at: DateTime<Utc>,
    pub redeemed_by: Option<Uuid>,
}

/// Read-only view served to both the holder page and the staff scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketVerification {
    pub status: TicketStatus,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub event_name: Option<String>,
    pub expired: bool,
}
