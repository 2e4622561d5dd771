//! Ticket issuance and exactly-once redemption.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::events::{DomainEvent, EventBus};
use crate::models::{NewTicket, RedemptionResult, Ticket, TicketStatus, TicketVerification};
use crate::notify::{render_ticket_email, Notifier};
use crate::store::{StoreError, TicketStore, TICKET_CODE_CONSTRAINT};

/// 21 alphanumeric characters, roughly 125 bits of entropy.
pub const CODE_LENGTH: usize = 21;
const MAX_CODE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("A ticket already exists for this user and event")]
    DuplicateTicket,

    #[error("Ticket code does not exist")]
    InvalidCode,

    #[error("Ticket is not redeemable")]
    NotIssuable,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CODE_LENGTH)
            .map(char::from)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct IssueTicket {
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub payment_ref: Option<String>,
    /// Where to email the code. Nothing is sent when absent.
    pub recipient: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct TicketService {
    store: Arc<dyn TicketStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    codes: Arc<dyn CodeGenerator>,
    events: EventBus,
    app_url: String,
}

/// Shortened code for log lines; full codes are bearer credentials.
fn code_hint(code: &str) -> &str {
    code.get(..4).unwrap_or(code)
}

impl TicketService {
    pub fn new(
        store: Arc<dyn TicketStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            codes: Arc::new(RandomCodeGenerator),
            events,
            app_url: app_url.into(),
        }
    }

    pub fn with_code_generator(mut self, codes: Arc<dyn CodeGenerator>) -> Self {
        self.codes = codes;
        self
    }

    pub fn redeem_url(&self, code: &str) -> String {
        format!("{}/r/{}", self.app_url.trim_end_matches('/'), code)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    /// Issues the ticket for (user, event). Uniqueness is enforced by the
    /// store; the emailed copy of the code is sent in the background.
    pub async fn issue(&self, request: IssueTicket) -> Result<Ticket, TicketError> {
        let ticket = self.insert_with_fresh_code(&request).await?;

        tracing::info!(
            ticket_id = %ticket.id,
            user_id = %ticket.user_id,
            event_id = %ticket.event_id,
            code = code_hint(&ticket.code),
            "Ticket issued"
        );

        self.events.publish(DomainEvent::TicketIssued {
            ticket_id: ticket.id,
            user_id: ticket.user_id,
            event_id: ticket.event_id,
        });

        if let Some(recipient) = request.recipient {
            self.dispatch_email(&ticket, recipient);
        }

        Ok(ticket)
    }

    async fn insert_with_fresh_code(&self, request: &IssueTicket) -> Result<Ticket, TicketError> {
        let mut last_error = None;

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let new_ticket = NewTicket {
                id: Uuid::new_v4(),
                user_id: request.user_id,
                event_id: request.event_id,
                payment_ref: request.payment_ref.clone(),
                code: self.codes.generate(),
                issued_at: self.clock.now(),
                expires_at: request.expires_at,
            };

            match self.store.insert(new_ticket).await {
                Ok(ticket) => return Ok(ticket),
                Err(StoreError::UniqueViolation(constraint))
                    if constraint == TICKET_CODE_CONSTRAINT =>
                {
                    tracing::warn!(attempt, "Ticket code collision, regenerating");
                    last_error = Some(StoreError::UniqueViolation(constraint));
                }
                Err(StoreError::UniqueViolation(_)) => return Err(TicketError::DuplicateTicket),
                Err(err) => return Err(err.into()),
            }
        }

        Err(last_error
            .unwrap_or_else(|| StoreError::UniqueViolation(TICKET_CODE_CONSTRAINT.to_string()))
            .into())
    }

    /// Sends the code without holding up the caller. A failed delivery is
    /// logged and leaves the ticket valid.
    fn dispatch_email(&self, ticket: &Ticket, recipient: String) {
        let store = Arc::clone(&self.store);
        let notifier = Arc::clone(&self.notifier);
        let clock = Arc::clone(&self.clock);
        let redeem_url = self.redeem_url(&ticket.code);
        let ticket_id = ticket.id;
        let event_id = ticket.event_id;

        tokio::spawn(async move {
            let event_name = match store.find_event_name(event_id).await {
                Ok(name) => name,
                Err(err) => {
                    tracing::warn!(error = %err, %event_id, "Could not load event name for email");
                    None
                }
            };

            let message = match render_ticket_email(&recipient, event_name.as_deref(), &redeem_url) {
                Ok(message) => message,
                Err(err) => {
                    tracing::error!(error = %err, %ticket_id, "Could not render ticket email");
                    return;
                }
            };
            match notifier.send(message).await {
                Ok(message_id) => {
                    tracing::info!(%ticket_id, %message_id, "Ticket email sent");
                    if let Err(err) = store.mark_email_sent(ticket_id, clock.now()).await {
                        tracing::warn!(error = %err, %ticket_id, "Could not record email delivery");
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, %ticket_id, "Ticket email delivery failed");
                }
            }
        });
    }

    /// Redeems `code` at most once. Losing a race, or scanning the same
    /// ticket twice, reports the original redemption instead of failing.
    pub async fn redeem(&self, code: &str, staff_id: Uuid) -> Result<RedemptionResult, TicketError> {
        let now = self.clock.now();

        if let Some(ticket) = self.store.redeem_if_issued(code, staff_id, now).await? {
            let redeemed_at = ticket.redeemed_at.unwrap_or(now);
            tracing::info!(
                ticket_id = %ticket.id,
                %staff_id,
                code = code_hint(code),
                "Ticket redeemed"
            );
            self.events.publish(DomainEvent::TicketRedeemed {
                ticket_id: ticket.id,
                event_id: ticket.event_id,
                staff_id,
                redeemed_at,
            });
            return Ok(RedemptionResult {
                ok: true,
                already_redeemed: false,
                redeemed_at,
                redeemed_by: ticket.redeemed_by,
            });
        }

        // The conditional update matched nothing: find out why.
        let Some(existing) = self.store.find_by_code(code).await? else {
            tracing::warn!(code = code_hint(code), "Redemption attempted with unknown code");
            return Err(TicketError::InvalidCode);
        };

        match existing.status {
            TicketStatus::Redeemed => {
                let redeemed_at = existing.redeemed_at.ok_or_else(|| {
                    StoreError::Corrupt(format!("ticket {} lacks redeemed_at", existing.id))
                })?;
                tracing::info!(
                    ticket_id = %existing.id,
                    %staff_id,
                    "Ticket already redeemed"
                );
                Ok(RedemptionResult {
                    ok: true,
                    already_redeemed: true,
                    redeemed_at,
                    redeemed_by: existing.redeemed_by,
                })
            }
            TicketStatus::Invalid => Err(TicketError::NotIssuable),
            // Tickets never return to `issued`; treat as a retryable race.
            TicketStatus::Issued => Err(StoreError::VersionConflict.into()),
        }
    }

    pub async fn verify(&self, code: &str) -> Result<TicketVerification, TicketError> {
        let ticket = self
            .store
            .find_by_code(code)
            .await?
            .ok_or(TicketError::InvalidCode)?;
        let event_name = self.store.find_event_name(ticket.event_id).await?;

        Ok(TicketVerification {
            status: ticket.status,
            redeemed_at: ticket.redeemed_at,
            event_name,
            expired: ticket.is_expired(self.clock.now()),
        })
    }
}
