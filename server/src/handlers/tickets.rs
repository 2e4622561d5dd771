use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::TicketStatus;
use crate::services::IssueTicket;
use crate::state::AppState;
use crate::utils::auth::{IssuerAuth, ScannerAuth};
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTicketRequest {
    pub user_id: Uuid,
    #[serde(alias = "salidaId")]
    pub event_id: Uuid,
    pub payment_ref: Option<String>,
    pub email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IssuedTicketPayload {
    id: Uuid,
    code: String,
    status: TicketStatus,
    redeem_url: String,
    issued_at: DateTime<Utc>,
}

pub async fn issue_ticket(
    _auth: IssuerAuth,
    State(state): State<AppState>,
    Json(request): Json<IssueTicketRequest>,
) -> Result<Response, AppError> {
    let recipient = request
        .email
        .map(|email| email.trim().to_string())
        .filter(|email| !email.is_empty());
    if let Some(email) = &recipient {
        if !email.contains('@') {
            return Err(AppError::ValidationError(
                "email must be a valid address".to_string(),
            ));
        }
    }

    let ticket = state
        .tickets
        .issue(IssueTicket {
            user_id: request.user_id,
            event_id: request.event_id,
            payment_ref: request.payment_ref,
            recipient,
            expires_at: request.expires_at,
        })
        .await?;

    let payload = IssuedTicketPayload {
        id: ticket.id,
        redeem_url: state.tickets.redeem_url(&ticket.code),
        code: ticket.code,
        status: ticket.status,
        issued_at: ticket.issued_at,
    };

    Ok(created(payload, "Ticket issued").into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub code: String,
    pub staff_id: Uuid,
}

pub async fn redeem_ticket(
    _auth: ScannerAuth,
    State(state): State<AppState>,
    Json(request): Json<RedeemRequest>,
) -> Result<Response, AppError> {
    let code = request.code.trim();
    if code.is_empty() {
        return Err(AppError::ValidationError("code is required".to_string()));
    }

    let result = state.tickets.redeem(code, request.staff_id).await?;
    let message = if result.already_redeemed {
        "Ticket was already redeemed"
    } else {
        "Ticket redeemed"
    };

    Ok(success(result, message).into_response())
}

pub async fn verify_ticket(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let verification = state.tickets.verify(code.trim()).await?;
    if verification.expired {
        return Err(AppError::TicketExpired);
    }

    Ok(success(verification, "Ticket found").into_response())
}
