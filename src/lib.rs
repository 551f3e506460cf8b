//! # Warden (Authentication & Session Lifecycle)
//!
//! `warden` proves identity, issues and revokes credentials, and guards
//! state-changing requests for the applications mounted behind it.
//!
//! ## Credentials
//!
//! - **Cookie sessions:** opaque 32-byte tokens stored (hashed) in Postgres with a
//!   24 hour expiry and one-shot flash messages.
//! - **Bearer tokens:** HS256 JWTs valid for 5 minutes, paired with rotating refresh
//!   tokens kept in Redis. Logout blacklists the access token `jti` for exactly its
//!   remaining lifetime and revokes every refresh token of the user.
//!
//! ## Request Guards
//!
//! Every request passes through the auth middleware, which resolves an
//! [`Identity`](api::handlers::auth::Identity) from a bearer token or session cookie.
//! Cookie-authenticated mutations must also pass the double-submit CSRF check.
//! A blacklist store outage fails closed with `503 Service Unavailable`.
//!
//! ## Password Reset
//!
//! Reset requests never reveal whether an account exists. They are protected by a
//! honeypot field, a signed render stamp, and a per-email/per-IP sliding window.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
