use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /api/health
/// Reports which backends are configured. 503 when no model backend is set,
/// since every reply would come from the local fallback.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let config = &state.config;
    let ok = state.mediator.model_backend().is_some();

    let body = Json(json!({
        "ok": ok,
        "product": "feelos-api",
        "version": env!("CARGO_PKG_VERSION"),
        "env": {
            "openaiConfigured": config.openai_api_key.is_some(),
            "modelInferenceUrlConfigured": config.model_inference_url.is_some(),
            "openaiModel": config.openai_model,
            "databaseConfigured": config.database_url.is_some(),
            "production": config.production,
        },
        "backends": {
            "model": state.mediator.model_backend(),
            "store": state.mediator.store_backend(),
        },
        "now": Utc::now().to_rfc3339(),
    }));

    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, body)
}
