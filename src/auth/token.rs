//! Token extraction and auth cookie handling.

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;

/// Cookie value the gateway writes when it clears the auth cookie.
pub const DELETED_COOKIE_VALUE: &str = "deleted";

const BEARER_PREFIX: &str = "Bearer ";

/// The caller's token: `Authorization: Bearer <token>` first, then the auth
/// cookie. A cookie holding `deleted` counts as absent.
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    bearer_token(headers).or_else(|| cookie_token(headers, cookie_name))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix(BEARER_PREFIX)?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Value of the named cookie, ignoring the `deleted` sentinel.
pub fn cookie_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty() && value != DELETED_COOKIE_VALUE)
}

/// `Set-Cookie` value that makes the browser drop the auth cookie.
pub fn expired_cookie(cookie_name: &str) -> String {
    format!("{cookie_name}={DELETED_COOKIE_VALUE}; path=/; expires=Thu, 01 Jan 1970 00:00:00 GMT")
}
