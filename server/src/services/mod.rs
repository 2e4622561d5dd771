pub mod membership;
pub mod tickets;

pub use membership::{MembershipService, PendingConfirmations, ResetOutcome};
pub use tickets::{IssueTicket, TicketError, TicketService};
