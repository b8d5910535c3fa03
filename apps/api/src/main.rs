mod config;
mod conversation;
mod db;
mod errors;
mod llm_client;
mod mediator;
mod models;
mod rate_limit;
mod routes;
mod session;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::config::Config;
use crate::conversation::store::{DisabledMessageStore, MessageStore, PgMessageStore};
use crate::db::create_pool;
use crate::llm_client::proxy::InferenceProxy;
use crate::llm_client::{ChatModel, LlmClient};
use crate::mediator::{MediatorSettings, RequestMediator};
use crate::routes::build_router;
use crate::session::token::TokenCodec;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging before config so secret warnings are visible
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Fails on a missing/placeholder secret in production
    let config = Config::from_env()?;

    info!(
        "Starting Feelos API v{} (production: {})",
        env!("CARGO_PKG_VERSION"),
        config.production
    );

    let codec = TokenCodec::new(&config.app_secret, config.production)?;

    // Initialize persistence (optional)
    let store: Arc<dyn MessageStore> = match &config.database_url {
        Some(url) => Arc::new(PgMessageStore::new(create_pool(url)?)),
        None => {
            warn!("DATABASE_URL not set; conversation history is disabled");
            Arc::new(DisabledMessageStore)
        }
    };

    let model = build_model(&config)?;

    let mediator = RequestMediator::new(
        codec,
        store,
        model,
        MediatorSettings::new(config.production, config.chat_limit),
    );
    info!(
        "Chat rate limit: {} requests / {}ms",
        config.chat_limit.limit, config.chat_limit.window_ms
    );

    let state = AppState {
        config: config.clone(),
        mediator: Arc::new(mediator),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict to the web frontend origin once it is configurable

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Picks the model backend: self-hosted inference URL first, then OpenAI,
/// else none (every reply comes from the local fallback).
fn build_model(config: &Config) -> Result<Option<Arc<dyn ChatModel>>> {
    if let Some(url) = &config.model_inference_url {
        info!("Model backend: inference proxy at {url}");
        let proxy: Arc<dyn ChatModel> = Arc::new(InferenceProxy::new(url.clone())?);
        return Ok(Some(proxy));
    }

    if let Some(key) = &config.openai_api_key {
        let client = LlmClient::new(key.clone(), config.openai_model.clone())?;
        info!("Model backend: OpenAI (model: {})", client.model());
        let client: Arc<dyn ChatModel> = Arc::new(client);
        return Ok(Some(client));
    }

    warn!("No model backend configured; replies will use the local fallback");
    Ok(None)
}
