use axum::http::HeaderMap;

/// Shared bucket for callers whose address cannot be determined.
pub const UNKNOWN_CALLER: &str = "unknown";

/// Derives the rate-limit identifier for a request: the first hop of
/// `x-forwarded-for`, then `x-real-ip`, then the shared `unknown` bucket.
///
/// A non-empty `x-forwarded-for` is authoritative: if its first hop is blank
/// or unreadable the caller is `unknown`, without consulting `x-real-ip`.
pub fn caller_identifier(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").filter(|v| !v.is_empty()) {
        return forwarded
            .to_str()
            .ok()
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(UNKNOWN_CALLER)
            .to_string();
    }

    header_str(headers, "x-real-ip")
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_CALLER)
        .to_string()
}

/// Bucket key for one endpoint and caller.
pub fn bucket_key(endpoint: &str, caller: &str) -> String {
    format!("{endpoint}:{caller}")
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
