use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 256;

/// Domain events fanned out to realtime subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    TicketIssued {
        ticket_id: Uuid,
        user_id: Uuid,
        event_id: Uuid,
    },
    TicketRedeemed {
        ticket_id: Uuid,
        event_id: Uuid,
        staff_id: Uuid,
        redeemed_at: DateTime<Utc>,
    },
    PenaltyApplied {
        membership_id: Uuid,
        user_id: Uuid,
        until: DateTime<Utc>,
    },
    MembershipCancelled {
        membership_id: Uuid,
        user_id: Uuid,
    },
}

/// Process-wide publish/subscribe channel, built once in `main` and handed
/// to the services that publish.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: DomainEvent) {
        // Publishing with nobody listening is not an error.
        if self.sender.send(event).is_err() {
            tracing::trace!("Event published without subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
