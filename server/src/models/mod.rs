pub mod membership;
pub mod ticket;

pub use membership::{
    AttendanceOutcome, ClubTrekkingMembership, HistorialSalida, MembershipError, MembershipStatus,
    MembershipStats, MembershipSummary, Penalizacion, PenaltyView,
};
pub use ticket::{NewTicket, RedemptionResult, Ticket, TicketStatus, TicketVerification};
