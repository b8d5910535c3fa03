pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::conversation::handlers as conversation;
use crate::session::handlers as session;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health_handler))
        // Sessions
        .route("/api/auth/login", post(session::handle_login))
        .route("/api/auth/me", get(session::handle_me))
        .route("/api/auth/logout", post(session::handle_logout))
        // Companion
        .route("/api/companion/chat", post(conversation::handle_companion_chat))
        .with_state(state)
}
