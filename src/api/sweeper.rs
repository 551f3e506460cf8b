//! Periodic cleanup of expired auth rows.
//!
//! Reset attempts older than 24 hours no longer count toward any limit, expired
//! sessions can never resolve again, and used or expired reset tokens can never be
//! consumed. Each pass deletes all three; a failing step is logged and the next
//! pass retries it.

use sqlx::PgPool;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::handlers::auth::{
    prune_expired_sessions, rate_limit::{prune_attempts, ATTEMPT_RETENTION}, reset::prune_reset_tokens,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub attempts: u64,
    pub sessions: u64,
    pub reset_tokens: u64,
}

/// Run one cleanup pass.
pub async fn sweep(pool: &PgPool) -> SweepReport {
    let mut report = SweepReport::default();

    match prune_attempts(pool, ATTEMPT_RETENTION).await {
        Ok(count) => report.attempts = count,
        Err(err) => error!("Failed to prune reset attempts: {err:#}"),
    }
    match prune_expired_sessions(pool).await {
        Ok(count) => report.sessions = count,
        Err(err) => error!("Failed to prune sessions: {err:#}"),
    }
    match prune_reset_tokens(pool).await {
        Ok(count) => report.reset_tokens = count,
        Err(err) => error!("Failed to prune reset tokens: {err:#}"),
    }

    if report == SweepReport::default() {
        debug!("Sweep found nothing to delete");
    } else {
        info!(
            attempts = report.attempts,
            sessions = report.sessions,
            reset_tokens = report.reset_tokens,
            "Sweep removed stale rows"
        );
    }
    report
}

/// Spawn the sweep loop. The first pass runs immediately.
pub fn spawn_sweeper(pool: PgPool, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            sweep(&pool).await;
        }
    })
}
