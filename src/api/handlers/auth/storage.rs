//! Database helpers for user accounts.
//!
//! Session and reset-token persistence live next to their flows
//! (`session.rs`, `reset.rs`); this module owns the `users` table.

use anyhow::{Context, Result};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{password::PasswordHash, types::User, utils::is_unique_violation};

#[derive(Debug)]
pub enum CreateOutcome {
    Created(User),
    Conflict,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Updated(User),
    Conflict,
    NotFound,
}

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

pub(crate) const USER_COLUMNS: &str =
    "id, username, email, password_hash, password_salt, last_login_at, created_at, updated_at";

pub(crate) fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        password_salt: row.get("password_salt"),
        last_login_at: row.get("last_login_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Insert a new account. A duplicate email is reported as a conflict, not an error.
///
/// # Errors
/// Returns an error for database failures other than the unique violation.
pub async fn create_user(
    pool: &PgPool,
    username: &str,
    email: &str,
    credentials: &PasswordHash,
) -> Result<CreateOutcome> {
    let query = format!(
        "INSERT INTO users (id, username, email, password_hash, password_salt) VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = "INSERT INTO users"
    );
    let result = sqlx::query(&query)
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(email)
        .bind(&credentials.digest)
        .bind(&credentials.salt)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match result {
        Ok(row) => Ok(CreateOutcome::Created(user_from_row(&row))),
        Err(err) if is_unique_violation(&err) => Ok(CreateOutcome::Conflict),
        Err(err) => Err(err).context("Failed to insert user"),
    }
}

/// # Errors
/// Returns an error if the query fails.
pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = "SELECT users WHERE email"
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("Failed to look up user by email")?;
    Ok(row.as_ref().map(user_from_row))
}

/// # Errors
/// Returns an error if the query fails.
pub async fn find_user_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<User>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = "SELECT users WHERE id"
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("Failed to look up user by id")?;
    Ok(row.as_ref().map(user_from_row))
}

/// # Errors
/// Returns an error if the query fails.
pub async fn list_users(pool: &PgPool) -> Result<Vec<User>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = "SELECT users"
    );
    let rows = sqlx::query(&query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("Failed to list users")?;
    Ok(rows.iter().map(user_from_row).collect())
}

/// Record a successful login.
///
/// # Errors
/// Returns an error if the update fails.
pub async fn touch_last_login(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = "UPDATE users SET last_login_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to update last login")?;
    Ok(())
}

/// Update profile fields; `None` keeps the current value.
///
/// # Errors
/// Returns an error for database failures other than the unique violation.
pub async fn update_user(
    pool: &PgPool,
    user_id: Uuid,
    username: Option<&str>,
    email: Option<&str>,
) -> Result<UpdateOutcome> {
    let query = format!(
        "UPDATE users SET username = COALESCE($2, username), email = COALESCE($3, email), updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = "UPDATE users"
    );
    let result = sqlx::query(&query)
        .bind(user_id)
        .bind(username)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await;

    match result {
        Ok(Some(row)) => Ok(UpdateOutcome::Updated(user_from_row(&row))),
        Ok(None) => Ok(UpdateOutcome::NotFound),
        Err(err) if is_unique_violation(&err) => Ok(UpdateOutcome::Conflict),
        Err(err) => Err(err).context("Failed to update user"),
    }
}

/// Apply the bundled schema. Every statement is idempotent.
///
/// # Errors
/// Returns an error if any statement fails.
pub async fn apply_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(pool)
        .await
        .context("Failed to apply database schema")?;
    Ok(())
}
