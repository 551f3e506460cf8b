//! Cookie helpers shared by the session and CSRF flows.
//!
//! Production deployments (TLS terminated in front of us) get `Secure` and
//! `SameSite=Strict`; local development gets `SameSite=Lax` without `Secure`
//! so plain-http browsers keep the cookies.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use std::time::Duration;

pub const SESSION_COOKIE_NAME: &str = "session_token";
pub const CSRF_COOKIE_NAME: &str = "csrf_token";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CookiePolicy {
    production: bool,
}

impl CookiePolicy {
    #[must_use]
    pub fn new(production: bool) -> Self {
        Self { production }
    }

    fn attributes(self) -> &'static str {
        if self.production {
            "SameSite=Strict; Secure"
        } else {
            "SameSite=Lax"
        }
    }

    /// `HttpOnly` session cookie.
    ///
    /// # Errors
    /// Returns an error if the token contains bytes invalid in a header.
    pub fn session(self, token: &str, ttl: Duration) -> Result<HeaderValue, InvalidHeaderValue> {
        HeaderValue::from_str(&format!(
            "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; {}; Max-Age={}",
            self.attributes(),
            ttl.as_secs()
        ))
    }

    /// # Errors
    /// Never fails for the fixed cookie name; the `Result` mirrors [`Self::session`].
    pub fn clear_session(self) -> Result<HeaderValue, InvalidHeaderValue> {
        HeaderValue::from_str(&format!(
            "{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; {}; Max-Age=0",
            self.attributes()
        ))
    }

    /// CSRF cookie. Readable by page scripts so forms can echo it back.
    ///
    /// # Errors
    /// Returns an error if the token contains bytes invalid in a header.
    pub fn csrf(self, token: &str, ttl: Duration) -> Result<HeaderValue, InvalidHeaderValue> {
        HeaderValue::from_str(&format!(
            "{CSRF_COOKIE_NAME}={token}; Path=/; {}; Max-Age={}",
            self.attributes(),
            ttl.as_secs()
        ))
    }
}

/// Find a cookie by name in the `Cookie` request headers.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| val.trim().to_string())
        })
        .find(|val| !val.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_session_cookie() {
        let cookie = CookiePolicy::new(false).session("abc", Duration::from_secs(86_400));
        assert_eq!(
            cookie.ok().as_ref().and_then(|v| v.to_str().ok()),
            Some("session_token=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=86400")
        );
    }

    #[test]
    fn production_session_cookie() {
        let cookie = CookiePolicy::new(true).session("abc", Duration::from_secs(60));
        assert_eq!(
            cookie.ok().as_ref().and_then(|v| v.to_str().ok()),
            Some("session_token=abc; Path=/; HttpOnly; SameSite=Strict; Secure; Max-Age=60")
        );
    }

    #[test]
    fn clear_session_cookie_expires_now() {
        let cookie = CookiePolicy::new(false).clear_session();
        let value = cookie.ok().and_then(|v| v.to_str().ok().map(str::to_string));
        assert!(value.as_deref().is_some_and(|v| v.contains("Max-Age=0")));
    }

    #[test]
    fn csrf_cookie_is_not_http_only() {
        let cookie = CookiePolicy::new(true).csrf("xyz", Duration::from_secs(7200));
        let value = cookie.ok().and_then(|v| v.to_str().ok().map(str::to_string));
        assert_eq!(
            value.as_deref(),
            Some("csrf_token=xyz; Path=/; SameSite=Strict; Secure; Max-Age=7200")
        );
    }

    #[test]
    fn cookie_value_parses_pairs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; session_token=abc ; csrf_token=xyz"),
        );
        assert_eq!(
            cookie_value(&headers, SESSION_COOKIE_NAME),
            Some("abc".to_string())
        );
        assert_eq!(cookie_value(&headers, CSRF_COOKIE_NAME), Some("xyz".to_string()));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn cookie_value_ignores_empty() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("session_token="));
        assert_eq!(cookie_value(&headers, SESSION_COOKIE_NAME), None);
    }
}
