use super::{blacklist_key, refresh_key, user_tokens_key, CacheError, TokenStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, RedisError};
use std::time::Duration;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

impl From<RedisError> for CacheError {
    fn from(err: RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Redis-backed token store. The connection manager reconnects on its own after
/// an outage; calls made while Redis is down fail with [`CacheError::Unavailable`].
#[derive(Clone)]
pub struct RedisTokenStore {
    conn: ConnectionManager,
}

impl RedisTokenStore {
    /// Connect and verify the server answers before serving traffic.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or Redis is unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid cache url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to token cache")?;
        let store = Self { conn };
        store
            .ping()
            .await
            .context("Token cache did not answer PING")?;
        Ok(store)
    }
}

fn span(operation: &'static str) -> tracing::Span {
    info_span!(
        "cache.command",
        cache.system = "redis",
        cache.operation = operation
    )
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn store_refresh(
        &self,
        token_id: &str,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let set_key = user_tokens_key(user_id);
        let ttl_seconds = ttl.as_secs().max(1);

        redis::pipe()
            .set_ex(refresh_key(token_id), user_id.to_string(), ttl_seconds)
            .ignore()
            .sadd(&set_key, token_id)
            .ignore()
            .expire(&set_key, i64::try_from(ttl_seconds).unwrap_or(i64::MAX))
            .ignore()
            .query_async::<()>(&mut conn)
            .instrument(span("SETEX+SADD+EXPIRE"))
            .await?;

        Ok(())
    }

    async fn get_refresh(&self, token_id: &str) -> Result<Option<Uuid>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(refresh_key(token_id))
            .instrument(span("GET"))
            .await?;

        Ok(value.and_then(|value| match Uuid::parse_str(&value) {
            Ok(user_id) => Some(user_id),
            Err(err) => {
                warn!("Ignoring refresh entry with invalid user id: {err}");
                None
            }
        }))
    }

    async fn delete_refresh(&self, token_id: &str, user_id: Uuid) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();

        redis::pipe()
            .del(refresh_key(token_id))
            .ignore()
            .srem(user_tokens_key(user_id), token_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .instrument(span("DEL+SREM"))
            .await?;

        Ok(())
    }

    async fn delete_all_refresh(&self, user_id: Uuid) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let set_key = user_tokens_key(user_id);

        let token_ids: Vec<String> = conn
            .smembers(&set_key)
            .instrument(span("SMEMBERS"))
            .await?;

        let mut pipe = redis::pipe();
        for token_id in &token_ids {
            pipe.del(refresh_key(token_id)).ignore();
        }
        pipe.del(&set_key).ignore();

        pipe.query_async::<()>(&mut conn)
            .instrument(span("DEL"))
            .await?;

        Ok(())
    }

    async fn blacklist(&self, jti: &str, ttl: Duration) -> Result<(), CacheError> {
        let ttl_seconds = ttl.as_secs();
        if ttl_seconds == 0 {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(blacklist_key(jti), "1", ttl_seconds)
            .instrument(span("SETEX"))
            .await?;

        Ok(())
    }

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(blacklist_key(jti))
            .instrument(span("EXISTS"))
            .await?;
        Ok(exists)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .instrument(span("PING"))
            .await?;
        Ok(())
    }
}
