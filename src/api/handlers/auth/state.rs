//! Auth configuration and the shared state handed to handlers and middleware.

use std::{sync::Arc, time::Duration};

use super::{
    issuer::{TokenConfig, TokenIssuer},
    rate_limit::RateLimitPolicy,
    render_stamp::RenderStamper,
    token_store::{TokenLifecycle, TokenStore, DEFAULT_REFRESH_TTL},
};
use crate::api::email::EmailSender;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_RESET_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_STAMP_MIN_AGE: Duration = Duration::from_secs(2);
pub const DEFAULT_STAMP_MAX_AGE: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_HONEYPOT_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_RESET_RESPONSE_FLOOR: Duration = Duration::from_millis(750);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    production: bool,
    session_ttl: Duration,
    refresh_ttl: Duration,
    reset_token_ttl: Duration,
    stamp_min_age: Duration,
    stamp_max_age: Duration,
    honeypot_delay: Duration,
    reset_response_floor: Duration,
    rate_limit: RateLimitPolicy,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url: frontend_base_url.trim_end_matches('/').to_string(),
            production: false,
            session_ttl: DEFAULT_SESSION_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            reset_token_ttl: DEFAULT_RESET_TOKEN_TTL,
            stamp_min_age: DEFAULT_STAMP_MIN_AGE,
            stamp_max_age: DEFAULT_STAMP_MAX_AGE,
            honeypot_delay: DEFAULT_HONEYPOT_DELAY,
            reset_response_floor: DEFAULT_RESET_RESPONSE_FLOOR,
            rate_limit: RateLimitPolicy::default(),
        }
    }

    /// Production deployments get `Secure` + `SameSite=Strict` cookies.
    #[must_use]
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl(mut self, ttl: Duration) -> Self {
        self.reset_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_stamp_window(mut self, min_age: Duration, max_age: Duration) -> Self {
        self.stamp_min_age = min_age;
        self.stamp_max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_honeypot_delay(mut self, delay: Duration) -> Self {
        self.honeypot_delay = delay;
        self
    }

    #[must_use]
    pub fn with_reset_response_floor(mut self, floor: Duration) -> Self {
        self.reset_response_floor = floor;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = policy;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn production(&self) -> bool {
        self.production
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    #[must_use]
    pub fn reset_token_ttl(&self) -> Duration {
        self.reset_token_ttl
    }

    #[must_use]
    pub fn honeypot_delay(&self) -> Duration {
        self.honeypot_delay
    }

    #[must_use]
    pub fn reset_response_floor(&self) -> Duration {
        self.reset_response_floor
    }

    #[must_use]
    pub fn rate_limit(&self) -> &RateLimitPolicy {
        &self.rate_limit
    }
}

pub struct AuthState {
    config: AuthConfig,
    issuer: TokenIssuer,
    tokens: TokenLifecycle,
    stamper: RenderStamper,
    email: Arc<dyn EmailSender>,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .field("issuer", &self.issuer)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl AuthState {
    /// The token secret signs both access tokens and form render stamps.
    #[must_use]
    pub fn new(
        config: AuthConfig,
        token_config: &TokenConfig,
        store: Arc<dyn TokenStore>,
        email: Arc<dyn EmailSender>,
    ) -> Self {
        let stamper = RenderStamper::new(
            token_config.secret().clone(),
            config.stamp_min_age,
            config.stamp_max_age,
        );
        let tokens = TokenLifecycle::new(store, config.refresh_ttl);

        Self {
            issuer: TokenIssuer::new(token_config),
            tokens,
            stamper,
            email,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenLifecycle {
        &self.tokens
    }

    #[must_use]
    pub fn stamper(&self) -> &RenderStamper {
        &self.stamper
    }

    #[must_use]
    pub fn email(&self) -> &Arc<dyn EmailSender> {
        &self.email
    }
}

#[cfg(test)]
pub(crate) const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";

/// Auth state over `store` with a fixed secret and log-only email delivery.
#[cfg(test)]
pub(crate) fn test_state(config: AuthConfig, store: Arc<dyn TokenStore>) -> Arc<AuthState> {
    let token_config = TokenConfig::new(secrecy::SecretString::from(TEST_SECRET));
    Arc::new(AuthState::new(
        config,
        &token_config,
        store,
        Arc::new(crate::api::email::LogEmailSender),
    ))
}

/// Pool that never connects unless a query runs.
#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) fn lazy_pool() -> sqlx::PgPool {
    sqlx::postgres::PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(200))
        .connect_lazy("postgres://warden@127.0.0.1:1/warden")
        .expect("lazy pool")
}
