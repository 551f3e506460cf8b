//! Database-backed rate limiting for password reset requests.
//!
//! Flow Overview:
//! 1) Count attempts for the email and for the client IP inside the sliding window.
//! 2) Record the current attempt, whatever the outcome.
//! 3) Reject when either count already reached its limit (3 per email, 10 per IP per hour).
//!
//! Attempt rows older than 24 hours are removed by the background sweep.
//! Using `PostgreSQL` keeps limits consistent across service instances.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{warn, Instrument};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_EMAIL_LIMIT: i64 = 3;
pub const DEFAULT_IP_LIMIT: i64 = 10;
pub const ATTEMPT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Attempts without a resolvable client address share one bucket.
pub const UNKNOWN_IP: &str = "unknown";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

#[derive(Clone, Debug)]
pub struct RateLimitPolicy {
    window: Duration,
    email_limit: i64,
    ip_limit: i64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_EMAIL_LIMIT, DEFAULT_IP_LIMIT)
    }
}

impl RateLimitPolicy {
    #[must_use]
    pub fn new(window: Duration, email_limit: i64, ip_limit: i64) -> Self {
        Self {
            window,
            email_limit,
            ip_limit,
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn email_limit(&self) -> i64 {
        self.email_limit
    }

    #[must_use]
    pub fn ip_limit(&self) -> i64 {
        self.ip_limit
    }

    /// Decide from the number of attempts already inside the window.
    #[must_use]
    pub fn decide(&self, email_attempts: i64, ip_attempts: i64) -> RateLimitDecision {
        if email_attempts >= self.email_limit || ip_attempts >= self.ip_limit {
            RateLimitDecision::Limited
        } else {
            RateLimitDecision::Allowed
        }
    }
}

/// Check both windows, then record this attempt.
///
/// # Errors
/// Returns an error if the attempt log cannot be read or written.
pub async fn check_and_record(
    pool: &PgPool,
    policy: &RateLimitPolicy,
    email: &str,
    ip: &str,
) -> Result<RateLimitDecision> {
    let window = format!("{} seconds", policy.window.as_secs());

    let email_attempts = count_email_attempts(pool, email, &window).await?;
    let ip_attempts = count_ip_attempts(pool, ip, &window).await?;

    record_attempt(pool, email, ip).await?;

    let decision = policy.decide(email_attempts, ip_attempts);
    if decision == RateLimitDecision::Limited {
        warn!(
            email_attempts,
            ip_attempts, "Password reset rate limit reached"
        );
    }
    Ok(decision)
}

async fn count_email_attempts(pool: &PgPool, email: &str, window: &str) -> Result<i64> {
    let query = "SELECT COUNT(*) FROM password_reset_attempts WHERE email = $1 AND created_at > NOW() - $2::interval";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(window)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("Failed to count reset attempts by email")?;
    Ok(row.get(0))
}

async fn count_ip_attempts(pool: &PgPool, ip: &str, window: &str) -> Result<i64> {
    let query = "SELECT COUNT(*) FROM password_reset_attempts WHERE ip_address = $1 AND created_at > NOW() - $2::interval";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(ip)
        .bind(window)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("Failed to count reset attempts by IP")?;
    Ok(row.get(0))
}

async fn record_attempt(pool: &PgPool, email: &str, ip: &str) -> Result<()> {
    let query = "INSERT INTO password_reset_attempts (email, ip_address) VALUES ($1, $2)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(ip)
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to record reset attempt")?;
    Ok(())
}

/// Delete attempt rows older than `retention`. Returns the number of rows removed.
///
/// # Errors
/// Returns an error if the delete fails.
pub async fn prune_attempts(pool: &PgPool, retention: Duration) -> Result<u64> {
    let query = "DELETE FROM password_reset_attempts WHERE created_at < NOW() - $1::interval";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(format!("{} seconds", retention.as_secs()))
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to prune reset attempts")?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.window(), Duration::from_secs(3600));
        assert_eq!(policy.email_limit(), 3);
        assert_eq!(policy.ip_limit(), 10);
    }

    #[test]
    fn email_limit_applies_at_three_prior_attempts() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.decide(2, 0), RateLimitDecision::Allowed);
        assert_eq!(policy.decide(3, 0), RateLimitDecision::Limited);
    }

    #[test]
    fn ip_limit_applies_regardless_of_email() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.decide(0, 9), RateLimitDecision::Allowed);
        assert_eq!(policy.decide(0, 10), RateLimitDecision::Limited);
    }
}
