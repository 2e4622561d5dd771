//! Application state shared across handlers.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::events::EventBus;
use crate::notify::Notifier;
use crate::services::{MembershipService, TicketService};
use crate::store::{MembershipStore, TicketStore};

#[derive(Clone)]
pub struct AppState {
    pub tickets: Arc<TicketService>,
    pub club: Arc<MembershipService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        config: Config,
        ticket_store: Arc<dyn TicketStore>,
        membership_store: Arc<dyn MembershipStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        let tickets = TicketService::new(
            ticket_store,
            notifier,
            Arc::clone(&clock),
            events.clone(),
            config.app_url.clone(),
        );
        let club = MembershipService::new(membership_store, clock, events)
            .with_weekly_limit(config.club_weekly_limit);

        Self {
            tickets: Arc::new(tickets),
            club: Arc::new(club),
            config: Arc::new(config),
        }
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        self.config.request_timeout
    }
}
