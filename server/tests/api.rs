mod common;

use axum::http::StatusCode;
use chrono::Duration;
use serde_json::json;
use uuid::Uuid;

use common::{issuer, member, scanner, TestApp};
use trivo_server::events::DomainEvent;

async fn issue(app: &TestApp, user_id: Uuid, event_id: Uuid) -> String {
    let (status, body) = app
        .post(
            "/api/tickets",
            &issuer(),
            json!({ "userId": user_id, "eventId": event_id, "paymentRef": "mp-123" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["data"]["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new();
    let (status, body) = app.get("/health", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn ticket_endpoints_require_shared_secrets() {
    let app = TestApp::new();

    let (status, body) = app
        .post(
            "/api/tickets/redeem",
            &[],
            json!({ "code": "whatever", "staffId": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH_ERROR");

    let (status, _) = app
        .post(
            "/api/tickets/redeem",
            &[("x-scanner-key", "wrong".to_string())],
            json!({ "code": "whatever", "staffId": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post(
            "/api/tickets",
            &scanner(),
            json!({ "userId": Uuid::new_v4(), "eventId": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app.tickets.is_empty());
}

#[tokio::test]
async fn ticket_is_issued_verified_and_redeemed_once() {
    let app = TestApp::new();
    let event_id = Uuid::new_v4();
    app.tickets.insert_event(event_id, "Cerro Champaquí");
    let mut events = app.events.subscribe();

    let code = issue(&app, Uuid::new_v4(), event_id).await;
    assert_eq!(code.len(), 21);
    assert!(matches!(
        events.recv().await.unwrap(),
        DomainEvent::TicketIssued { .. }
    ));

    let (status, body) = app.get(&format!("/api/tickets/verify/{}", code), &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "issued");
    assert_eq!(body["data"]["eventName"], "Cerro Champaquí");
    assert_eq!(body["data"]["expired"], false);

    let staff_id = Uuid::new_v4();
    let (status, body) = app
        .post(
            "/api/tickets/redeem",
            &scanner(),
            json!({ "code": code, "staffId": staff_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ok"], true);
    assert_eq!(body["data"]["alreadyRedeemed"], false);
    let first_redeemed_at = body["data"]["redeemedAt"].clone();

    app.clock.advance(Duration::minutes(5));
    let (status, body) = app
        .post(
            "/api/tickets/redeem",
            &scanner(),
            json!({ "code": code, "staffId": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["alreadyRedeemed"], true);
    assert_eq!(body["data"]["redeemedAt"], first_redeemed_at);
    assert_eq!(body["data"]["redeemedBy"], json!(staff_id));

    let (_, body) = app.get(&format!("/api/tickets/verify/{}", code), &[]).await;
    assert_eq!(body["data"]["status"], "redeemed");
}

#[tokio::test]
async fn ticket_error_statuses() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let event_id = Uuid::new_v4();
    issue(&app, user_id, event_id).await;

    let (status, body) = app
        .post(
            "/api/tickets",
            &issuer(),
            json!({ "userId": user_id, "eventId": event_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DUPLICATE_TICKET");

    let (status, body) = app
        .post(
            "/api/tickets/redeem",
            &scanner(),
            json!({ "code": "doesnotexist", "staffId": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "INVALID_CODE");

    let (status, body) = app
        .post(
            "/api/tickets/redeem",
            &scanner(),
            json!({ "code": "   ", "staffId": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = app.get("/api/tickets/verify/doesnotexist", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn expired_ticket_verifies_as_gone() {
    let app = TestApp::new();
    let expires_at = common::start_time() + Duration::hours(1);
    let (status, body) = app
        .post(
            "/api/tickets",
            &issuer(),
            json!({
                "userId": Uuid::new_v4(),
                "salidaId": Uuid::new_v4(),
                "expiresAt": expires_at,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let code = body["data"]["code"].as_str().unwrap().to_string();

    app.clock.advance(Duration::hours(2));
    let (status, body) = app.get(&format!("/api/tickets/verify/{}", code), &[]).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"]["code"], "TICKET_EXPIRED");
}

#[tokio::test]
async fn responses_carry_security_headers() {
    let app = TestApp::new();
    let response = tower::ServiceExt::oneshot(
        app.router.clone(),
        axum::http::Request::builder()
            .uri("/api/tickets/verify/abc")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-store");
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
}

#[tokio::test]
async fn club_endpoints_require_identity() {
    let app = TestApp::new();
    let (status, _) = app.get("/api/club-trekking/membership", &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .get(
            "/api/club-trekking/membership",
            &[("x-user-id", "nobody".to_string())],
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .get("/api/club-trekking/membership", &member(Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NO_ACTIVE_MEMBERSHIP");
}

#[tokio::test]
async fn club_attendance_flow_applies_penalty() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let headers = member(user);

    let (status, body) = app
        .post("/api/club-trekking/subscribe", &headers, json!({}))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["estado"], "activa");

    let (status, body) = app
        .post("/api/club-trekking/subscribe", &headers, json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "MEMBERSHIP_EXISTS");

    let now = common::start_time();
    let salida_a = Uuid::new_v4();
    let salida_b = Uuid::new_v4();
    for (salida, offset) in [(salida_a, 1), (salida_b, 2)] {
        let (status, body) = app
            .post(
                "/api/club-trekking/check-in",
                &headers,
                json!({ "salidaId": salida, "fecha": now + Duration::hours(offset) }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
    }

    let (status, body) = app
        .post(
            "/api/club-trekking/check-in",
            &headers,
            json!({ "salidaId": Uuid::new_v4(), "fecha": now + Duration::hours(3) }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "WEEKLY_LIMIT_REACHED");
    assert_eq!(body["error"]["details"]["limiteSemanal"], 2);

    // Nothing is pending before the outings happen.
    let (_, body) = app
        .get("/api/club-trekking/salidas-pendientes", &headers)
        .await;
    assert_eq!(body["data"]["salidasPendientes"].as_array().unwrap().len(), 0);

    app.clock.advance(Duration::hours(4));
    let (status, body) = app
        .get("/api/club-trekking/salidas-pendientes", &headers)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["salidasPendientes"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["penalizacion"]["activa"], false);

    let mut events = app.events.subscribe();

    let (status, body) = app
        .post(
            "/api/club-trekking/confirmar-asistencia",
            &headers,
            json!({ "salidaId": salida_a, "asistio": false }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["penalizacionAplicada"], false);
    assert_eq!(body["data"]["inasistenciasConsecutivas"], 1);

    let (status, body) = app
        .post(
            "/api/club-trekking/confirmar-asistencia",
            &headers,
            json!({ "salidaId": salida_b, "asistio": false }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["penalizacionAplicada"], true);
    assert_eq!(body["data"]["penalizacionActiva"], true);
    assert_eq!(body["data"]["diasRestantes"], 3);
    assert!(matches!(
        events.recv().await.unwrap(),
        DomainEvent::PenaltyApplied { user_id, .. } if user_id == user
    ));

    let (status, body) = app
        .post(
            "/api/club-trekking/confirmar-asistencia",
            &headers,
            json!({ "salidaId": salida_a, "asistio": true }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "NO_SUCH_PENDING_CONFIRMATION");

    // A penalized member cannot book next week's outing either.
    let next_week = now + Duration::days(7);
    let (status, body) = app
        .post(
            "/api/club-trekking/check-in",
            &headers,
            json!({ "salidaId": Uuid::new_v4(), "fecha": next_week }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "PENALTY_ACTIVE");
    assert_eq!(body["error"]["details"]["diasRestantes"], 3);

    app.clock.advance(Duration::days(3));
    let (status, body) = app
        .post(
            "/api/club-trekking/check-in",
            &headers,
            json!({ "salidaId": Uuid::new_v4(), "fecha": next_week }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["penalizacion"]["activa"], false);
}

#[tokio::test]
async fn club_lifecycle_pause_resume_cancel() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let headers = member(user);

    let (status, _) = app
        .post(
            "/api/club-trekking/subscribe",
            &headers,
            json!({ "limiteSemanal": 3 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.post("/api/club-trekking/pause", &headers, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["estado"], "pausada");
    assert_eq!(body["data"]["limiteSemanal"], 3);

    let (status, body) = app.post("/api/club-trekking/pause", &headers, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    let (status, body) = app.post("/api/club-trekking/resume", &headers, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["estado"], "activa");

    let (status, _) = app
        .post("/api/club-trekking/cancel", &headers, json!({ "motivo": " " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            "/api/club-trekking/cancel",
            &headers,
            json!({ "motivo": "Me mudo de ciudad" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["estado"], "cancelada");

    let (status, body) = app.get("/api/club-trekking/membership", &headers).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NO_ACTIVE_MEMBERSHIP");

    // A fresh subscription is allowed once the old one is gone.
    let (status, _) = app
        .post("/api/club-trekking/subscribe", &headers, json!({}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn renewal_extends_the_paid_period() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let headers = member(user);

    app.post("/api/club-trekking/subscribe", &headers, json!({}))
        .await;
    let (_, before) = app.get("/api/club-trekking/membership", &headers).await;

    let (status, _) = app
        .post("/api/club-trekking/renew", &headers, json!({ "userId": user }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, after) = app
        .post("/api/club-trekking/renew", &issuer(), json!({ "userId": user }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(after["data"]["fechaFin"], before["data"]["fechaFin"]);
    assert_eq!(after["data"]["proximaFechaPago"], after["data"]["fechaFin"]);
}

#[tokio::test]
async fn stats_summarise_member_activity() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let headers = member(user);

    let (status, body) = app.get("/api/club-trekking/stats", &headers).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NO_ACTIVE_MEMBERSHIP");

    app.post("/api/club-trekking/subscribe", &headers, json!({}))
        .await;
    let fecha = common::start_time() + Duration::hours(1);
    app.post(
        "/api/club-trekking/check-in",
        &headers,
        json!({ "salidaId": Uuid::new_v4(), "fecha": fecha }),
    )
    .await;

    let (status, body) = app.get("/api/club-trekking/stats", &headers).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let stats = &body["data"];
    assert_eq!(stats["totalSalidas"], 1);
    assert_eq!(stats["totalSalidasConCheckIn"], 1);
    assert_eq!(stats["salidasEsteMes"], 1);
    assert_eq!(stats["diasConsecutivos"], 1);
    assert_eq!(stats["badge"]["tipo"], "bronce");
    assert_eq!(stats["badge"]["color"], "#CD7F32");
    assert_eq!(stats["membership"]["estado"], "activa");
    assert_eq!(stats["membership"]["salidasRestantes"], 1);
}
