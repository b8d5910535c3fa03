use axum::http::{header, HeaderMap};

pub const SESSION_COOKIE: &str = "feelos_session";

/// Builds the `Set-Cookie` value for a freshly issued token.
///
/// Tokens only contain base64url characters, `.` and hex digits, all of which
/// are unreserved in URL encoding, so the value is written as-is.
pub fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> String {
    let mut parts = vec![
        format!("{SESSION_COOKIE}={token}"),
        "Path=/".to_string(),
        "HttpOnly".to_string(),
        "SameSite=Lax".to_string(),
        format!("Max-Age={max_age_secs}"),
    ];
    if secure {
        parts.push("Secure".to_string());
    }
    parts.join("; ")
}

/// `Set-Cookie` value that removes the session cookie.
pub fn clear_session_cookie(secure: bool) -> String {
    let mut value = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        value.push_str("; Secure");
    }
    value
}

/// Extracts the session token from the request's `Cookie` header(s).
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .map(|value| value.trim_matches('"').to_string())
        .find(|value| !value.is_empty())
}
