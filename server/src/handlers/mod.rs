use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub mod club;
pub mod tickets;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

/// Liveness plus a round trip to the ticket store.
pub async fn health_check(State(state): State<AppState>) -> Response {
    if let Err(err) = state.tickets.ping().await {
        return AppError::from(err).into_response();
    }

    let payload = HealthPayload {
        status: "ok",
        service: "trivo-api",
    };

    success(payload, "Health check successful").into_response()
}
