use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::session::cookie::clear_session_cookie;
use crate::state::AppState;

/// Body of `POST /api/auth/login`. Both fields are optional.
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub name: Option<String>,
}

impl LoginRequest {
    /// An empty body counts as `{}`.
    pub fn from_json(body: &[u8]) -> Result<Self, AppError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("Invalid login body: {e}")))
    }
}

/// Trims a field; blank means absent.
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// POST /api/auth/login
///
/// Upserts the user by email (or creates a guest) and sets a fresh session cookie.
pub async fn handle_login(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let request = LoginRequest::from_json(&body)?;
    let signed = state
        .mediator
        .login(non_blank(request.email), non_blank(request.name))
        .await?;

    Ok((
        [(header::SET_COOKIE, signed.set_cookie)],
        Json(json!({ "user": signed.user })),
    ))
}

/// GET /api/auth/me
///
/// Reports the caller's session identity. Never mints a new one.
pub async fn handle_me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let user = state.mediator.current_user(&headers).await?;
    Ok(Json(json!({ "user": user })))
}

/// POST /api/auth/logout
///
/// Tokens cannot be revoked server-side; logging out drops the cookie.
pub async fn handle_logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie(state.config.production))],
    )
}
