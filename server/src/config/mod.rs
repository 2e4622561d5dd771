use std::env;
use std::fmt;
use std::time::Duration;

use crate::models::membership::DEFAULT_WEEKLY_LIMIT;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/trivo";
const DEFAULT_APP_URL: &str = "http://localhost:3000";
const DEFAULT_RESEND_FROM: &str = "Trivo <onboarding@resend.dev>";
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub store_backend: StoreBackend,
    pub http_port: u16,
    /// Shared secret presented by staff scanners in `x-scanner-key`.
    pub scanner_key: String,
    /// Shared secret presented by the payment flow in `x-issuer-key`.
    pub issuer_key: String,
    pub app_url: String,
    pub resend_api_key: Option<String>,
    pub resend_from: String,
    pub club_weekly_limit: u32,
    pub request_timeout: Duration,
    pub production: bool,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        fn parsed<T: std::str::FromStr>(
            value: Option<String>,
            key: &'static str,
            default: T,
        ) -> Result<T, ConfigError> {
            match value {
                Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
                None => Ok(default),
            }
        }

        let store_backend = match get("STORE").as_deref() {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(_) => return Err(ConfigError::Invalid("STORE")),
        };

        let club_weekly_limit = parsed(
            get("CLUB_LIMITE_SEMANAL"),
            "CLUB_LIMITE_SEMANAL",
            DEFAULT_WEEKLY_LIMIT,
        )?;
        if club_weekly_limit == 0 {
            return Err(ConfigError::Invalid("CLUB_LIMITE_SEMANAL"));
        }

        let request_timeout_secs: u64 =
            parsed(get("REQUEST_TIMEOUT_SECS"), "REQUEST_TIMEOUT_SECS", 30)?;

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            database_max_connections: parsed(
                get("DATABASE_MAX_CONNECTIONS"),
                "DATABASE_MAX_CONNECTIONS",
                5,
            )?,
            store_backend,
            http_port: parsed(get("HTTP_PORT"), "HTTP_PORT", 3001)?,
            scanner_key: required("SCANNER_KEY")?,
            issuer_key: required("ISSUER_KEY")?,
            app_url: get("APP_URL").unwrap_or_else(|| DEFAULT_APP_URL.to_string()),
            resend_api_key: get("RESEND_API_KEY"),
            resend_from: get("RESEND_FROM").unwrap_or_else(|| DEFAULT_RESEND_FROM.to_string()),
            club_weekly_limit,
            request_timeout: Duration::from_secs(request_timeout_secs),
            production: get("RUST_ENV")
                .map(|v| v.to_lowercase() == "production")
                .unwrap_or(false),
            cors_allowed_origins,
        })
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("store_backend", &self.store_backend)
            .field("database_max_connections", &self.database_max_connections)
            .field("http_port", &self.http_port)
            .field("app_url", &self.app_url)
            .field("email_enabled", &self.resend_api_key.is_some())
            .field("club_weekly_limit", &self.club_weekly_limit)
            .field("request_timeout", &self.request_timeout)
            .field("production", &self.production)
            .finish_non_exhaustive()
    }
}
