//! Small helpers shared by the auth handlers: input validation, opaque token
//! generation, and request metadata.

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use std::{net::SocketAddr, sync::LazyLock};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};

pub const MAX_EMAIL_LEN: usize = 254;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 50;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok());

/// Email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    email_normalized.len() <= MAX_EMAIL_LEN
        && EMAIL_RE
            .as_ref()
            .is_some_and(|regex| regex.is_match(email_normalized))
}

/// Check the password policy, returning the message shown to the client on failure.
pub(crate) fn validate_password(password: &str) -> Result<(), &'static str> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LEN {
        return Err("Password must be at least 8 characters long");
    }
    if length > MAX_PASSWORD_LEN {
        return Err("Password must be at most 128 characters long");
    }
    if !password.chars().any(char::is_uppercase) {
        return Err("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(char::is_lowercase) {
        return Err("Password must contain at least one lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one number");
    }
    if !password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
    {
        return Err("Password must contain at least one special character");
    }
    Ok(())
}

/// Resolve the username to store: the trimmed input, or the email local part.
///
/// Length bounds apply to chosen usernames; a derived one is only capped.
pub(crate) fn resolve_username(username: Option<&str>, email_normalized: &str) -> Result<String, &'static str> {
    let candidate = match username.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => {
            let length = value.chars().count();
            if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&length) {
                return Err("Username must be between 3 and 50 characters");
            }
            value.to_string()
        }
        None => email_normalized
            .split('@')
            .next()
            .unwrap_or_default()
            .chars()
            .take(MAX_USERNAME_LEN)
            .collect(),
    };

    if candidate.is_empty() || candidate.chars().any(char::is_control) {
        return Err("Username contains invalid characters");
    }
    Ok(candidate)
}

/// 32 random bytes, URL-safe base64 without padding.
///
/// Used for session cookies, CSRF tokens, refresh tokens and reset links.
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash an opaque token so raw values never touch the database.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Build the frontend reset link included in outbound emails.
pub(crate) fn build_reset_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/reset-password?token={token}")
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Client address for rate limiting: the first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the TCP peer.
pub(crate) fn extract_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}
