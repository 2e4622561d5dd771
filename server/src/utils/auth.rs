//! Request extractors for the three kinds of caller: staff scanners, the
//! payment flow that issues tickets, and signed-in club members.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::state::AppState;
use crate::utils::error::AppError;

pub const SCANNER_KEY_HEADER: &str = "x-scanner-key";
pub const ISSUER_KEY_HEADER: &str = "x-issuer-key";
pub const USER_ID_HEADER: &str = "x-user-id";

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn secrets_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn check_secret(parts: &Parts, header: &'static str, expected: &str) -> Result<(), AppError> {
    let presented = header_str(parts, header)
        .ok_or_else(|| AppError::AuthError(format!("Missing {} header", header)))?;

    if !secrets_match(presented, expected) {
        tracing::warn!(header, "Rejected request with wrong shared secret");
        return Err(AppError::AuthError("Invalid credentials".to_string()));
    }
    Ok(())
}

/// Proof that the request came from a staff scanner.
#[derive(Debug, Clone, Copy)]
pub struct ScannerAuth;

#[axum::async_trait]
impl<S> FromRequestParts<S> for ScannerAuth
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        check_secret(parts, SCANNER_KEY_HEADER, &state.config.scanner_key)?;
        Ok(ScannerAuth)
    }
}

/// Proof that the request came from the payment/issuing side.
#[derive(Debug, Clone, Copy)]
pub struct IssuerAuth;

#[axum::async_trait]
impl<S> FromRequestParts<S> for IssuerAuth
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        check_secret(parts, ISSUER_KEY_HEADER, &state.config.issuer_key)?;
        Ok(IssuerAuth)
    }
}

/// Member identity asserted by the upstream session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = header_str(parts, USER_ID_HEADER)
            .ok_or_else(|| AppError::AuthError("Missing user identity".to_string()))?;
        let user_id = Uuid::parse_str(raw)
            .map_err(|_| AppError::AuthError("Malformed user identity".to_string()))?;
        Ok(CurrentUser(user_id))
    }
}
