use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;
use crate::utils::auth::{CurrentUser, IssuerAuth};
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub limite_semanal: Option<u32>,
}

pub async fn subscribe(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    body: Option<Json<SubscribeRequest>>,
) -> Result<Response, AppError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    if request.limite_semanal == Some(0) {
        return Err(AppError::ValidationError(
            "limiteSemanal must be at least 1".to_string(),
        ));
    }

    let membership = state.club.suscribir(user_id, request.limite_semanal).await?;
    Ok(created(membership, "Membership activated").into_response())
}

pub async fn membership(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let summary = state.club.estado(user_id).await?;
    Ok(success(summary, "Membership found").into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRequest {
    pub salida_id: Uuid,
    pub fecha: DateTime<Utc>,
    #[serde(default = "default_check_in")]
    pub check_in_realizado: bool,
}

fn default_check_in() -> bool {
    true
}

pub async fn check_in(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    Json(request): Json<CheckInRequest>,
) -> Result<Response, AppError> {
    let summary = state
        .club
        .registrar_salida(
            user_id,
            request.salida_id,
            request.fecha,
            request.check_in_realizado,
        )
        .await?;

    Ok(success(summary, "Salida recorded").into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmAttendanceRequest {
    pub salida_id: Uuid,
    pub asistio: bool,
}

pub async fn confirmar_asistencia(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    Json(request): Json<ConfirmAttendanceRequest>,
) -> Result<Response, AppError> {
    let outcome = state
        .club
        .confirmar_asistencia(user_id, request.salida_id, request.asistio)
        .await?;

    let message = if outcome.penalizacion_aplicada {
        "Attendance recorded; booking suspended"
    } else {
        "Attendance recorded"
    };
    Ok(success(outcome, message).into_response())
}

pub async fn salidas_pendientes(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let pending = state.club.salidas_pendientes(user_id).await?;
    Ok(success(pending, "Pending confirmations").into_response())
}

pub async fn stats(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let stats = state.club.estadisticas(user_id).await?;
    Ok(success(stats, "Membership stats").into_response())
}

pub async fn pause(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let summary = state.club.pausar(user_id).await?;
    Ok(success(summary, "Membership paused").into_response())
}

pub async fn resume(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let summary = state.club.reanudar(user_id).await?;
    Ok(success(summary, "Membership resumed").into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub motivo: String,
}

pub async fn cancel(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    Json(request): Json<CancelRequest>,
) -> Result<Response, AppError> {
    let motivo = request.motivo.trim();
    if motivo.is_empty() {
        return Err(AppError::ValidationError("motivo is required".to_string()));
    }

    let summary = state.club.cancelar(user_id, motivo).await?;
    Ok(success(summary, "Membership cancelled").into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewRequest {
    pub user_id: Uuid,
}

/// Called by the payment flow once a renewal charge has gone through.
pub async fn renew(
    _auth: IssuerAuth,
    State(state): State<AppState>,
    Json(request): Json<RenewRequest>,
) -> Result<Response, AppError> {
    let summary = state.club.renovar(request.user_id).await?;
    Ok(success(summary, "Membership renewed").into_response())
}
