use std::sync::Arc;

use crate::config::Config;
use crate::mediator::RequestMediator;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Owns the token codec, the rate limiter and the storage/model collaborators.
    pub mediator: Arc<RequestMediator>,
}
