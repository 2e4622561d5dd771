use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::MembershipError;
use crate::services::tickets::TicketError;
use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Ticket has expired")]
    TicketExpired,

    #[error(transparent)]
    Ticket(#[from] TicketError),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    fn store_error(&self) -> Option<&StoreError> {
        match self {
            AppError::Store(e)
            | AppError::Ticket(TicketError::Store(e))
            | AppError::Membership(MembershipError::Store(e)) => Some(e),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        if let Some(e) = self.store_error() {
            return if e.is_transient() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
        }

        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::TicketExpired => StatusCode::GONE,
            AppError::Ticket(e) => match e {
                TicketError::DuplicateTicket | TicketError::NotIssuable => StatusCode::CONFLICT,
                TicketError::InvalidCode => StatusCode::NOT_FOUND,
                TicketError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Membership(e) => match e {
                MembershipError::NoActiveMembership => StatusCode::NOT_FOUND,
                MembershipError::NoSuchPendingConfirmation => StatusCode::BAD_REQUEST,
                MembershipError::PenaltyActive { .. } => StatusCode::FORBIDDEN,
                MembershipError::WeeklyLimitReached { .. }
                | MembershipError::SalidaAlreadyRecorded
                | MembershipError::MembershipExists
                | MembershipError::InvalidTransition { .. } => StatusCode::CONFLICT,
                MembershipError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Store(_) | AppError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        if let Some(e) = self.store_error() {
            return if e.is_transient() {
                "SERVICE_UNAVAILABLE"
            } else {
                "INTERNAL_SERVER_ERROR"
            };
        }

        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::TicketExpired => "TICKET_EXPIRED",
            AppError::Ticket(e) => match e {
                TicketError::DuplicateTicket => "DUPLICATE_TICKET",
                TicketError::InvalidCode => "INVALID_CODE",
                TicketError::NotIssuable => "NOT_ISSUABLE",
                TicketError::Store(_) => "INTERNAL_SERVER_ERROR",
            },
            AppError::Membership(e) => match e {
                MembershipError::NoActiveMembership => "NO_ACTIVE_MEMBERSHIP",
                MembershipError::NoSuchPendingConfirmation => "NO_SUCH_PENDING_CONFIRMATION",
                MembershipError::PenaltyActive { .. } => "PENALTY_ACTIVE",
                MembershipError::WeeklyLimitReached { .. } => "WEEKLY_LIMIT_REACHED",
                MembershipError::SalidaAlreadyRecorded => "SALIDA_ALREADY_RECORDED",
                MembershipError::MembershipExists => "MEMBERSHIP_EXISTS",
                MembershipError::InvalidTransition { .. } => "INVALID_TRANSITION",
                MembershipError::Store(_) => "INTERNAL_SERVER_ERROR",
            },
            AppError::Store(_) | AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        if let Some(e) = self.store_error() {
            error!(error = ?e, "Store error");
            return;
        }

        match self {
            AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            // Client-side outcomes are expected traffic.
            _ => {
                warn!(code = self.code(), message = %self, "Request rejected");
            }
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Membership(MembershipError::PenaltyActive { dias_restantes }) => {
                Some(json!({ "diasRestantes": dias_restantes }))
            }
            AppError::Membership(MembershipError::WeeklyLimitReached { limite }) => {
                Some(json!({ "limiteSemanal": limite }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            _ if self.store_error().is_some() => {
                if status == StatusCode::SERVICE_UNAVAILABLE {
                    "Temporarily unavailable, please retry".to_string()
                } else {
                    "A storage error occurred".to_string()
                }
            }
            AppError::InternalServerError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        error_response(code, public_message, self.details(), status)
    }
}
