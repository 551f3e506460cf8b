//! Cookie sessions backed by the `sessions` table.
//!
//! Flow Overview:
//! 1) Login/registration creates a row keyed by the SHA-256 of a random token and
//!    hands the raw token to the browser in the `session_token` cookie.
//! 2) Each request resolves the cookie by joining `sessions` to `users`, filtered by
//!    `expires_at > NOW()`; expired and unknown tokens look the same to the caller.
//! 3) A flash message can be parked on the session and is cleared by the read that
//!    returns it.
//! 4) Logout deletes the row. Unknown tokens are a no-op.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use super::{
    storage::{user_from_row, USER_COLUMNS},
    types::User,
    utils::{generate_token, hash_token},
};

#[derive(Clone, Debug)]
pub struct SessionManager {
    pool: PgPool,
    ttl: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create a session and return the raw token for the cookie.
    ///
    /// # Errors
    /// Returns an error if token generation or the insert fails.
    pub async fn create(&self, user_id: Uuid) -> Result<String> {
        let token = generate_token()?;
        let query = "INSERT INTO sessions (session_token_hash, user_id, expires_at) VALUES ($1, $2, NOW() + $3::interval)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(hash_token(&token))
            .bind(user_id)
            .bind(format!("{} seconds", self.ttl.as_secs()))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to create session")?;
        Ok(token)
    }

    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn destroy(&self, token: &str) -> Result<()> {
        let query = "DELETE FROM sessions WHERE session_token_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(hash_token(token))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Resolve a live session to its user.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn resolve(&self, token: &str) -> Result<Option<User>> {
        let columns = USER_COLUMNS
            .split(", ")
            .map(|column| format!("u.{column}"))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT {columns} FROM sessions s JOIN users u ON u.id = s.user_id WHERE s.session_token_hash = $1 AND s.expires_at > NOW()"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = "SELECT sessions JOIN users"
        );
        let row = sqlx::query(&query)
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("Failed to resolve session")?;
        Ok(row.as_ref().map(user_from_row))
    }

    /// # Errors
    /// Returns an error if the update fails.
    pub async fn set_flash(&self, token: &str, message: &str) -> Result<()> {
        let query = "UPDATE sessions SET flash_message = $2 WHERE session_token_hash = $1 AND expires_at > NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(hash_token(token))
            .bind(message)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to set flash message")?;
        Ok(())
    }

    /// Return the pending flash message and clear it in the same statement, so
    /// concurrent requests cannot both read it.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn take_flash(&self, token: &str) -> Result<Option<String>> {
        let query = r"
            UPDATE sessions s
            SET flash_message = NULL
            FROM (
                SELECT session_token_hash, flash_message
                FROM sessions
                WHERE session_token_hash = $1
                  AND expires_at > NOW()
                  AND flash_message IS NOT NULL
                FOR UPDATE
            ) previous
            WHERE s.session_token_hash = previous.session_token_hash
            RETURNING previous.flash_message
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = "UPDATE sessions RETURNING flash_message"
        );
        let flash: Option<Option<String>> = sqlx::query_scalar(query)
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("Failed to take flash message")?;
        Ok(flash.flatten().filter(|message| !message.is_empty()))
    }
}

/// Delete every session of `user_id` inside an open transaction.
///
/// # Errors
/// Returns an error if the delete fails.
pub(crate) async fn delete_user_sessions(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<u64> {
    let query = "DELETE FROM sessions WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to delete user sessions")?;
    Ok(result.rows_affected())
}

/// Remove sessions past their expiry. Returns the number of rows removed.
///
/// # Errors
/// Returns an error if the delete fails.
pub async fn prune_expired_sessions(pool: &PgPool) -> Result<u64> {
    let query = "DELETE FROM sessions WHERE expires_at <= NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to prune expired sessions")?;
    Ok(result.rows_affected())
}
