//! Scheduling watchdog background job using apalis
//!
//! Runs as a scheduled cron job that flags scheduled posts whose fire time
//! passed without a queue callback, and sweeps expired sessions and stale
//! OAuth state rows.

use apalis::prelude::*;
use apalis_cron::{CronStream, Schedule};
use apalis_sql::postgres::PostgresStorage;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::env;
use std::str::FromStr;

use crate::domain::posts::queries as posts;
use crate::services::session;

const SWEEP_BATCH_SIZE: i64 = 100;
const DEFAULT_CRON_SECONDS: u64 = 30;
const DEFAULT_GRACE_SECONDS: i64 = 600;

/// Job input - marker for a sweep pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogJob {
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
}

impl From<chrono::DateTime<chrono::Utc>> for WatchdogJob {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        WatchdogJob { scheduled_at: dt }
    }
}

/// Shared context for watchdog sweeps
#[derive(Clone)]
pub struct WatchdogContext {
    pub pool: PgPool,
}

/// Job handler - one sweep pass
/// Always returns Ok - sweep failures are logged and the next tick retries
async fn run_watchdog_sweep(_job: WatchdogJob, ctx: Data<WatchdogContext>) -> Result<(), Error> {
    if let Err(e) = flag_overdue_posts(&ctx.pool).await {
        eprintln!("[watchdog] Overdue scan error (will retry): {}", e);
    }

    match session::cleanup_expired_tokens(&ctx.pool).await {
        Ok(swept) if swept > 0 => {
            println!("[watchdog] Swept {} expired refresh tokens", swept);
        }
        Ok(_) => {}
        Err(e) => eprintln!("[watchdog] Refresh token sweep error: {}", e),
    }

    match session::cleanup_expired_oauth_states(&ctx.pool).await {
        Ok(swept) if swept > 0 => {
            println!("[watchdog] Swept {} stale oauth states", swept);
        }
        Ok(_) => {}
        Err(e) => eprintln!("[watchdog] OAuth state sweep error: {}", e),
    }

    Ok(())
}

/// Flag scheduled posts the queue never fired. The stamp is guarded, so a
/// callback racing the sweep keeps its outcome.
async fn flag_overdue_posts(pool: &PgPool) -> Result<(), sqlx::Error> {
    let grace = watchdog_grace_seconds();
    let overdue = posts::find_overdue_scheduled(pool, grace, SWEEP_BATCH_SIZE).await?;

    for post in overdue {
        let stamped = posts::stamp_missed_deadline(pool, post.id).await?;
        if stamped {
            eprintln!(
                "[watchdog] Post {} (user {}) missed its fire deadline: scheduled for {:?}, never fired",
                post.id, post.user_id, post.scheduled_at
            );
        }
    }

    Ok(())
}

/// Start the watchdog worker
pub async fn run_watchdog(pool: PgPool) {
    let ctx = WatchdogContext { pool: pool.clone() };

    let cron_seconds = watchdog_cron_seconds();
    let schedule_expr = format!("*/{} * * * * *", cron_seconds);

    // Run apalis migrations
    PostgresStorage::setup(&pool)
        .await
        .expect("Failed to set up apalis storage");

    let storage: PostgresStorage<WatchdogJob> = PostgresStorage::new(pool.clone());
    let schedule = Schedule::from_str(&schedule_expr).expect("Invalid watchdog schedule");
    let cron = CronStream::new(schedule);
    let backend = cron.pipe_to_storage(storage);

    println!(
        "[watchdog] Apalis worker starting (every {}s, {}s grace)",
        cron_seconds,
        watchdog_grace_seconds()
    );

    let worker = WorkerBuilder::new("watchdog-worker")
        .data(ctx)
        .backend(backend)
        .build_fn(run_watchdog_sweep);

    Monitor::new()
        .register(worker)
        .run()
        .await
        .expect("Watchdog monitor failed");
}

fn watchdog_cron_seconds() -> u64 {
    env::var("WATCHDOG_CRON_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0 && *v <= 59)
        .unwrap_or(DEFAULT_CRON_SECONDS)
}

fn watchdog_grace_seconds() -> i64 {
    env::var("WATCHDOG_GRACE_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_GRACE_SECONDS)
}
