use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;

/// Placeholder secret shipped in sample `.env` files. Never acceptable in production.
pub const PLACEHOLDER_SECRET: &str = "dev-secret-change-me";

/// Session token lifetime: 7 days.
pub const TOKEN_TTL_SECS: i64 = 60 * 60 * 24 * 7;
/// Rate bucket population above which stale buckets are evicted.
pub const MAX_BUCKETS: usize = 5000;
/// Per-message character cap applied before content reaches the model.
pub const CONTENT_CAP_CHARS: usize = 2000;
/// Number of messages kept in the assembled context.
pub const HISTORY_WINDOW: usize = 30;
/// Number of persisted messages fetched per request (newest first).
pub const HISTORY_FETCH_LIMIT: i64 = 50;
/// Maximum number of messages accepted in one request body.
pub const MAX_INCOMING_MESSAGES: usize = 100;
/// Deadline for the downstream model call before the local fallback takes over.
pub const MODEL_DEADLINE: Duration = Duration::from_secs(25);
/// Deadline for individual persistence calls.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(3);

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("APP_SECRET must be set to a non-placeholder value in production")]
    WeakSecret,

    #[error("invalid rate limit '{0}': expected '<limit>:<window_ms>' with both values > 0")]
    InvalidRateLimit(String),
}

/// A `(limit, window)` pair for one rate-limited endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLimit {
    pub limit: u32,
    pub window_ms: u64,
}

impl EndpointLimit {
    pub const fn new(limit: u32, window_ms: u64) -> Self {
        Self { limit, window_ms }
    }

    /// Parses `"<limit>:<window_ms>"`, e.g. `"20:60000"`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidRateLimit(raw.to_string());
        let (limit, window_ms) = raw.trim().split_once(':').ok_or_else(invalid)?;
        let limit: u32 = limit.trim().parse().map_err(|_| invalid())?;
        let window_ms: u64 = window_ms.trim().parse().map_err(|_| invalid())?;
        if limit == 0 || window_ms == 0 {
            return Err(invalid());
        }
        Ok(Self { limit, window_ms })
    }
}

pub const DEFAULT_CHAT_LIMIT: EndpointLimit = EndpointLimit::new(20, 60_000);

/// Application configuration loaded from environment variables.
/// Startup fails if the signing secret is unusable in production.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_secret: String,
    pub production: bool,
    pub database_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub model_inference_url: Option<String>,
    pub chat_limit: EndpointLimit,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let production = optional_env("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let app_secret = resolve_secret(optional_env("APP_SECRET"), production)?;

        let chat_limit = match optional_env("RATE_LIMIT_CHAT") {
            Some(raw) => EndpointLimit::parse(&raw)?,
            None => DEFAULT_CHAT_LIMIT,
        };

        Ok(Config {
            app_secret,
            production,
            database_url: optional_env("DATABASE_URL"),
            openai_api_key: optional_env("OPENAI_API_KEY"),
            openai_model: optional_env("OPENAI_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            model_inference_url: optional_env("MODEL_INFERENCE_URL"),
            chat_limit,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
        })
    }
}

/// Picks the signing secret. Production refuses a missing or placeholder secret;
/// development falls back to the placeholder.
pub fn resolve_secret(raw: Option<String>, production: bool) -> Result<String, ConfigError> {
    match raw {
        Some(secret) if secret != PLACEHOLDER_SECRET => Ok(secret),
        _ if production => Err(ConfigError::WeakSecret),
        Some(secret) => Ok(secret),
        None => {
            tracing::warn!("APP_SECRET not set; signing sessions with the development placeholder");
            Ok(PLACEHOLDER_SECRET.to_string())
        }
    }
}

/// Reads an env var, treating empty values as unset.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
