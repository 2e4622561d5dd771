use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{club, health_check, tickets};
use crate::state::AppState;

fn ticket_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(tickets::issue_ticket))
        .route("/redeem", post(tickets::redeem_ticket))
        .route("/verify/:code", get(tickets::verify_ticket))
}

fn club_routes() -> Router<AppState> {
    Router::new()
        .route("/subscribe", post(club::subscribe))
        .route("/membership", get(club::membership))
        .route("/check-in", post(club::check_in))
        .route("/confirmar-asistencia", post(club::confirmar_asistencia))
        .route("/salidas-pendientes", get(club::salidas_pendientes))
        .route("/stats", get(club::stats))
        .route("/pause", post(club::pause))
        .route("/resume", post(club::resume))
        .route("/cancel", post(club::cancel))
        .route("/renew", post(club::renew))
}

pub fn create_routes(state: AppState) -> Router {
    let timeout = state.request_timeout();
    let production = state.config.production;
    let cors = create_cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/tickets", ticket_routes())
        .nest("/api/club-trekking", club_routes())
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer(production))
        .layer(cors)
}
