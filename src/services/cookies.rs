//! Cookie building utilities for session management
//!
//! Centralizes Set-Cookie formatting so the auth endpoints (login, refresh,
//! logout) stay consistent about flags and lifetimes.

use axum::http::{HeaderValue, StatusCode};

/// Access token cookie name
pub const ACCESS_TOKEN_NAME: &str = "access_token";
/// Refresh token cookie name
pub const REFRESH_TOKEN_NAME: &str = "refresh_token";
/// Access token max-age in seconds (10 minutes)
const ACCESS_TOKEN_MAX_AGE_SECS: u32 = 600;
/// Refresh token max-age in seconds (30 days)
const REFRESH_TOKEN_MAX_AGE_SECS: u32 = 30 * 24 * 60 * 60;
/// Both cookies live at the root path. Frontend proxies rewrite the
/// request path, so anything narrower would strand the cookie.
const COOKIE_PATH: &str = "/";

fn is_dev() -> bool {
    std::env::var("ENV").as_deref() != Ok("prod")
}

fn cookie_same_site() -> &'static str {
    match std::env::var("COOKIE_SAMESITE")
        .unwrap_or_else(|_| "Lax".to_string())
        .to_lowercase()
        .as_str()
    {
        "none" => "None",
        "strict" => "Strict",
        "lax" => "Lax",
        _ => "Lax",
    }
}

fn build(name: &str, value: &str, max_age: u32) -> Result<HeaderValue, StatusCode> {
    let secure = if is_dev() { "" } else { " Secure;" };
    let cookie = format!(
        "{}={}; HttpOnly;{} SameSite={}; Path={}; Max-Age={}",
        name,
        value,
        secure,
        cookie_same_site(),
        COOKIE_PATH,
        max_age
    );
    cookie.parse().map_err(|_| {
        eprintln!("Failed to build {} cookie header", name);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn clear(name: &str) -> HeaderValue {
    format!(
        "{}=; HttpOnly; Secure; SameSite=Lax; Path={}; Max-Age=0",
        name, COOKIE_PATH
    )
    .parse()
    .expect("static cookie string should always parse")
}

/// Build an access token Set-Cookie header value
pub fn access_cookie(token: &str) -> Result<HeaderValue, StatusCode> {
    build(ACCESS_TOKEN_NAME, token, ACCESS_TOKEN_MAX_AGE_SECS)
}

/// Build a refresh token Set-Cookie header value
pub fn refresh_cookie(token: &str) -> Result<HeaderValue, StatusCode> {
    build(REFRESH_TOKEN_NAME, token, REFRESH_TOKEN_MAX_AGE_SECS)
}

/// Build a Set-Cookie header to clear the access token
pub fn clear_access_cookie() -> HeaderValue {
    clear(ACCESS_TOKEN_NAME)
}

/// Build a Set-Cookie header to clear the refresh token
pub fn clear_refresh_cookie() -> HeaderValue {
    clear(REFRESH_TOKEN_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_cookie_shape() {
        let value = access_cookie("tok123").unwrap();
        let s = value.to_str().unwrap();
        assert!(s.starts_with("access_token=tok123;"));
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("Max-Age=600"));
    }

    #[test]
    fn test_clear_cookie_expires_immediately() {
        let s = clear_refresh_cookie();
        let s = s.to_str().unwrap();
        assert!(s.starts_with("refresh_token=;"));
        assert!(s.contains("Max-Age=0"));
    }
}
