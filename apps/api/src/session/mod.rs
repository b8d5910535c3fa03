// Guest sessions: signed cookie tokens, no server-side session store.

pub mod cookie;
pub mod handlers;
pub mod token;

use axum::http::HeaderMap;
use tracing::debug;
use uuid::Uuid;

use crate::session::cookie::{session_cookie, token_from_headers};
use crate::session::token::TokenCodec;

/// The caller's identity for one request.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub user_id: String,
    /// Present when the identity was minted on this request and the
    /// response must carry the new cookie.
    pub set_cookie: Option<String>,
}

impl ResolvedIdentity {
    pub fn is_new(&self) -> bool {
        self.set_cookie.is_some()
    }
}

/// Returns the user id from a valid session cookie, if any.
pub fn session_user_id(codec: &TokenCodec, headers: &HeaderMap) -> Option<String> {
    let token = token_from_headers(headers)?;
    match codec.verify(&token) {
        Ok(claims) => Some(claims.user_id),
        Err(e) => {
            debug!("Ignoring session cookie: {e}");
            None
        }
    }
}

/// Uses the existing session when valid; otherwise mints a guest identity
/// and prepares the cookie that hands it to the client.
pub fn resolve_or_mint(codec: &TokenCodec, headers: &HeaderMap, secure: bool) -> ResolvedIdentity {
    if let Some(user_id) = session_user_id(codec, headers) {
        return ResolvedIdentity {
            user_id,
            set_cookie: None,
        };
    }

    let user_id = new_guest_id();
    let issued = codec.issue(&user_id);

    ResolvedIdentity {
        user_id,
        set_cookie: Some(session_cookie(&issued.token, issued.max_age_secs, secure)),
    }
}

pub fn new_guest_id() -> String {
    format!("guest_{}", Uuid::new_v4())
}
