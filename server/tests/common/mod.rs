#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use trivo_server::clock::ManualClock;
use trivo_server::config::Config;
use trivo_server::events::EventBus;
use trivo_server::notify::LogNotifier;
use trivo_server::routes::create_routes;
use trivo_server::state::AppState;
use trivo_server::store::{MemoryMembershipStore, MemoryTicketStore};

pub const SCANNER_KEY: &str = "scanner-secret";
pub const ISSUER_KEY: &str = "issuer-secret";

/// Wednesday noon, so a few hours either way stay in the same week.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap()
}

pub struct TestApp {
    pub router: Router,
    pub clock: ManualClock,
    pub tickets: MemoryTicketStore,
    pub memberships: MemoryMembershipStore,
    pub events: EventBus,
}

impl TestApp {
    pub fn new() -> Self {
        let vars: HashMap<&str, &str> = [
            ("SCANNER_KEY", SCANNER_KEY),
            ("ISSUER_KEY", ISSUER_KEY),
            ("STORE", "memory"),
            ("APP_URL", "https://trivo.test"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        let clock = ManualClock::new(start_time());
        let tickets = MemoryTicketStore::new();
        let memberships = MemoryMembershipStore::new();
        let events = EventBus::default();

        let state = AppState::new(
            config,
            Arc::new(tickets.clone()),
            Arc::new(memberships.clone()),
            Arc::new(LogNotifier),
            Arc::new(clock.clone()),
            events.clone(),
        );

        Self {
            router: create_routes(state),
            clock,
            tickets,
            memberships,
            events,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str, headers: &[(&str, String)]) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post(
        &self,
        uri: &str,
        headers: &[(&str, String)],
        body: Value,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }
}

pub fn issuer() -> Vec<(&'static str, String)> {
    vec![("x-issuer-key", ISSUER_KEY.to_string())]
}

pub fn scanner() -> Vec<(&'static str, String)> {
    vec![("x-scanner-key", SCANNER_KEY.to_string())]
}

pub fn member(user_id: Uuid) -> Vec<(&'static str, String)> {
    vec![("x-user-id", user_id.to_string())]
}
