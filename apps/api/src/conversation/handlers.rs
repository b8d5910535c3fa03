use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;

use crate::errors::AppError;
use crate::state::AppState;

/// POST /api/companion/chat
///
/// The body is read raw so the rate check runs before payload validation and
/// every malformed payload maps to a 400. A freshly minted session cookie is
/// attached to error responses too.
pub async fn handle_companion_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let mediated = state.mediator.handle_chat(&headers, &body).await;

    let mut response = match mediated.result {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => e.into_response(),
    };
    if let Some(cookie) = mediated.set_cookie {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid Set-Cookie value: {e}")))?;
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    Ok(response)
}
