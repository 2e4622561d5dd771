use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use trivo_server::clock::SystemClock;
use trivo_server::config::{Config, StoreBackend};
use trivo_server::events::EventBus;
use trivo_server::notify::{LogNotifier, Notifier, ResendNotifier};
use trivo_server::routes::create_routes;
use trivo_server::state::AppState;
use trivo_server::store::{
    MemoryMembershipStore, MemoryTicketStore, MembershipStore, PgMembershipStore, PgTicketStore,
    TicketStore,
};

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("trivo_server=debug,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("Invalid configuration");
    tracing::info!(?config, "Configuration loaded");

    let (ticket_store, membership_store) = connect_stores(&config).await;

    let notifier: Arc<dyn Notifier> = match &config.resend_api_key {
        Some(api_key) => Arc::new(ResendNotifier::new(api_key.clone(), config.resend_from.clone())),
        None => {
            tracing::warn!("RESEND_API_KEY not set, ticket emails will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let events = EventBus::default();
    spawn_event_logger(&events);

    let port = config.http_port;
    let state = AppState::new(
        config,
        ticket_store,
        membership_store,
        notifier,
        Arc::new(SystemClock),
        events,
    );
    let app: Router = create_routes(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed");
}

async fn connect_stores(config: &Config) -> (Arc<dyn TicketStore>, Arc<dyn MembershipStore>) {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, data is lost on restart");
            let tickets: Arc<dyn TicketStore> = Arc::new(MemoryTicketStore::new());
            let memberships: Arc<dyn MembershipStore> = Arc::new(MemoryMembershipStore::new());
            (tickets, memberships)
        }
        StoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(&config.database_url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Successfully connected to database");

            sqlx::migrate!()
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            tracing::info!("Migrations run successfully");

            let tickets: Arc<dyn TicketStore> = Arc::new(PgTicketStore::new(pool.clone()));
            let memberships: Arc<dyn MembershipStore> = Arc::new(PgMembershipStore::new(pool));
            (tickets, memberships)
        }
    }
}

/// Logs every domain event; stands in for realtime fan-out.
fn spawn_event_logger(events: &EventBus) {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(event = %json, "Domain event"),
                    Err(err) => tracing::warn!(error = %err, "Could not serialize domain event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
