//! Authentication and session lifecycle.
//!
//! Two ways in, one identity out:
//!
//! - **Bearer tokens** (`/v1/auth/*`): HS256 access tokens valid for five minutes,
//!   refresh tokens held in the token cache and rotated on every use, and a jti
//!   blacklist that revokes access tokens on logout until they would have expired.
//! - **Cookie sessions** (`/session/*`): opaque tokens stored hashed in Postgres,
//!   with one-shot flash messages and double-submit CSRF tokens on form posts.
//!
//! The middleware resolves either into an [`Identity`] so handlers match once.
//!
//! ## Password Reset
//!
//! Reset requests never reveal whether an account exists. A honeypot field and a
//! signed render stamp screen out automated posts; 3 attempts per email and 10 per
//! IP per hour are allowed. Attempt rows older than 24 hours are swept in the
//! background.
//!
//! ## Cache Outages
//!
//! When the token cache cannot be reached, token checks fail closed with a 503
//! rather than treating a revoked token as valid.

pub(crate) mod bearer;
mod context;
mod cookies;
mod csrf;
mod error;
mod issuer;
mod middleware;
mod password;
pub(crate) mod rate_limit;
mod render_stamp;
pub(crate) mod reset;
mod session;
mod state;
mod storage;
mod token_store;
pub(crate) mod types;
pub(crate) mod utils;
pub(crate) mod web;

pub use context::{Authenticated, CurrentAuth, Identity, RequestAuth};
pub use cookies::{CookiePolicy, CSRF_COOKIE_NAME, SESSION_COOKIE_NAME};
pub use csrf::{csrf_guard, CSRF_FIELD, CSRF_HEADER};
pub use error::ApiError;
pub use issuer::{Claims, TokenConfig, TokenError, TokenIssuer};
pub use middleware::{optional_auth, require_api_auth, require_page_auth, LOGIN_PATH};
pub use password::PasswordError;
pub use session::{prune_expired_sessions, SessionManager};
pub use state::{AuthConfig, AuthState};
pub use storage::{apply_schema, find_user_by_id, list_users, update_user, UpdateOutcome};
pub use token_store::{
    CacheError, LifecycleError, MemoryTokenStore, RedisTokenStore, TokenLifecycle, TokenStore,
};
pub use types::User;

#[cfg(test)]
pub(crate) use state::{lazy_pool, test_state};
#[cfg(test)]
pub(crate) use token_store::UnavailableTokenStore;
