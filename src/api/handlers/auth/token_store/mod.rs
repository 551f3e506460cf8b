//! Refresh tokens and the access-token blacklist.
//!
//! Key layout in the shared key-value store:
//!
//! - `refresh:{token_id}` → user id, expiring with the refresh token.
//! - `user_tokens:{user_id}` → set of live refresh token ids, for batch revocation.
//! - `blacklist:{jti}` → `"1"`, expiring when the revoked access token would have.
//!
//! Multi-key writes are pipelined, not transactional: a partition can leave a stale
//! set member or an orphaned mapping behind. Both expire on their own TTL, and
//! refresh tokens rotate on every use, so this is accepted.
//!
//! Rotation deletes the old entry before storing the new one. Two concurrent
//! refreshes with the same token can both pass the lookup and both mint a new
//! token before either delete lands; this short double-valid window is accepted.

mod memory;
mod redis_store;

pub use self::memory::MemoryTokenStore;
pub use self::redis_store::RedisTokenStore;

use super::{issuer::Claims, utils::generate_token};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("token cache unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("failed to generate refresh token")]
    Generate,
}

#[must_use]
pub fn refresh_key(token_id: &str) -> String {
    format!("refresh:{token_id}")
}

#[must_use]
pub fn user_tokens_key(user_id: Uuid) -> String {
    format!("user_tokens:{user_id}")
}

#[must_use]
pub fn blacklist_key(jti: &str) -> String {
    format!("blacklist:{jti}")
}

/// Primitive operations over the external key-value store.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Map `token_id` to `user_id`, add it to the user's set and refresh the set TTL.
    async fn store_refresh(
        &self,
        token_id: &str,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn get_refresh(&self, token_id: &str) -> Result<Option<Uuid>, CacheError>;

    async fn delete_refresh(&self, token_id: &str, user_id: Uuid) -> Result<(), CacheError>;

    /// Delete every refresh token in the user's set, then the set itself.
    async fn delete_all_refresh(&self, user_id: Uuid) -> Result<(), CacheError>;

    /// A zero `ttl` writes nothing.
    async fn blacklist(&self, jti: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Refresh issuance, rotation and logout revocation on top of a [`TokenStore`].
#[derive(Clone)]
pub struct TokenLifecycle {
    store: Arc<dyn TokenStore>,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLifecycle")
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenLifecycle {
    #[must_use]
    pub fn new(store: Arc<dyn TokenStore>, refresh_ttl: Duration) -> Self {
        Self { store, refresh_ttl }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Mint and store a new refresh token for `user_id`.
    ///
    /// # Errors
    /// Returns an error if token generation fails or the store is unreachable.
    pub async fn issue_refresh(&self, user_id: Uuid) -> Result<String, LifecycleError> {
        let token_id = generate_token().map_err(|_| LifecycleError::Generate)?;
        self.store
            .store_refresh(&token_id, user_id, self.refresh_ttl)
            .await?;
        Ok(token_id)
    }

    /// Resolve a presented refresh token to its user.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    pub async fn lookup_refresh(&self, token_id: &str) -> Result<Option<Uuid>, CacheError> {
        if token_id.is_empty() {
            return Ok(None);
        }
        self.store.get_refresh(token_id).await
    }

    /// Replace `old_token_id` with a fresh refresh token.
    ///
    /// A failed delete of the old entry is logged and rotation continues; storing
    /// the new entry must succeed.
    ///
    /// # Errors
    /// Returns an error if the new token cannot be generated or stored.
    pub async fn rotate(&self, old_token_id: &str, user_id: Uuid) -> Result<String, LifecycleError> {
        let new_token_id = generate_token().map_err(|_| LifecycleError::Generate)?;

        if let Err(err) = self.store.delete_refresh(old_token_id, user_id).await {
            warn!("Failed to delete rotated refresh token for {user_id}: {err}");
        }

        self.store
            .store_refresh(&new_token_id, user_id, self.refresh_ttl)
            .await?;

        Ok(new_token_id)
    }

    /// Revoke the presented access token and every refresh token of its user.
    ///
    /// The blacklist entry lives exactly as long as the token it blocks would have.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    pub async fn revoke(&self, claims: &Claims, now: i64) -> Result<(), CacheError> {
        let remaining = claims.remaining_seconds(now);
        if remaining > 0 {
            let ttl = Duration::from_secs(remaining.unsigned_abs());
            self.store.blacklist(&claims.jti, ttl).await?;
        } else {
            debug!("Access token already expired, skipping blacklist");
        }

        self.store.delete_all_refresh(claims.user_id).await
    }

    /// # Errors
    /// Returns an error if the store is unreachable.
    pub async fn is_revoked(&self, jti: &str) -> Result<bool, CacheError> {
        self.store.is_blacklisted(jti).await
    }
}

/// Store double where every call fails, for the fail-closed paths.
#[cfg(test)]
pub(crate) struct UnavailableTokenStore;

#[cfg(test)]
#[async_trait]
impl TokenStore for UnavailableTokenStore {
    async fn store_refresh(&self, _: &str, _: Uuid, _: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn get_refresh(&self, _: &str) -> Result<Option<Uuid>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete_refresh(&self, _: &str, _: Uuid) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete_all_refresh(&self, _: Uuid) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn blacklist(&self, _: &str, _: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn is_blacklisted(&self, _: &str) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}
