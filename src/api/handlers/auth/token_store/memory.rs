use super::{blacklist_key, refresh_key, user_tokens_key, CacheError, TokenStore};
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};
use tokio::{sync::RwLock, time::Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// Process-local token store with the same semantics as Redis, including TTLs.
///
/// Used in tests and single-instance development setups.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn live_text(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::Text(text) => Some(text.clone()),
                Value::Set(_) => None,
            },
            _ => None,
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Drop expired keys. Runs on every write.
fn evict_expired(entries: &mut HashMap<String, Entry>, now: Instant) {
    entries.retain(|_, entry| !entry.is_expired(now));
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn store_refresh(
        &self,
        token_id: &str,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let expires_at = Some(now + ttl);
        let set_key = user_tokens_key(user_id);
        let mut entries = self.entries.write().await;
        evict_expired(&mut entries, now);

        entries.insert(
            refresh_key(token_id),
            Entry {
                value: Value::Text(user_id.to_string()),
                expires_at,
            },
        );

        let mut members = match entries.remove(&set_key) {
            Some(Entry {
                value: Value::Set(members),
                expires_at,
            }) if !expires_at.is_some_and(|exp| now >= exp) => members,
            _ => HashSet::new(),
        };
        members.insert(token_id.to_string());
        entries.insert(
            set_key,
            Entry {
                value: Value::Set(members),
                expires_at,
            },
        );

        Ok(())
    }

    async fn get_refresh(&self, token_id: &str) -> Result<Option<Uuid>, CacheError> {
        Ok(self
            .live_text(&refresh_key(token_id))
            .await
            .and_then(|value| Uuid::parse_str(&value).ok()))
    }

    async fn delete_refresh(&self, token_id: &str, user_id: Uuid) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.remove(&refresh_key(token_id));
        if let Some(Entry {
            value: Value::Set(members),
            ..
        }) = entries.get_mut(&user_tokens_key(user_id))
        {
            members.remove(token_id);
        }
        Ok(())
    }

    async fn delete_all_refresh(&self, user_id: Uuid) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        if let Some(Entry {
            value: Value::Set(members),
            ..
        }) = entries.remove(&user_tokens_key(user_id))
        {
            for token_id in members {
                entries.remove(&refresh_key(&token_id));
            }
        }
        Ok(())
    }

    async fn blacklist(&self, jti: &str, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        evict_expired(&mut entries, now);
        entries.insert(
            blacklist_key(jti),
            Entry {
                value: Value::Text("1".to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, CacheError> {
        Ok(self.live_text(&blacklist_key(jti)).await.is_some())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
