//! Quillbox Background Worker
//!
//! Runs the scheduled billing jobs:
//! - Downgrade sweep (every 5 minutes): applies due scheduled downgrades
//! - Gateway event cleanup (daily): trims old webhook claim rows
//! - Heartbeat (every 5 minutes)
//!
//! The sweep is a single predicate-qualified update, so overlapping or
//! redundant worker instances are safe.

use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use quillbox_billing::{run_downgrade_sweep, run_event_cleanup, PgStore};
use quillbox_shared::db::{create_pool, run_migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting Quillbox billing worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;
    run_migrations(&pool).await?;
    info!("Database pool created, migrations applied");

    let scheduler = JobScheduler::new().await?;

    // Job 1: Apply due scheduled downgrades every 5 minutes
    let sweep_store = PgStore::new(pool.clone());
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            let store = sweep_store.clone();
            Box::pin(async move {
                match run_downgrade_sweep(&store, OffsetDateTime::now_utc()).await {
                    Ok(applied) => {
                        if applied > 0 {
                            info!(applied, "Downgrade sweep complete");
                        }
                    }
                    Err(e) => error!(error = %e, "Downgrade sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Downgrade sweep (every 5 minutes)");

    // Job 2: Trim old webhook event claims daily. Retention stays well past
    // Stripe's redelivery window so a late duplicate still lands as one.
    let retention_days: i64 = std::env::var("EVENT_RETENTION_DAYS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);
    let cleanup_store = PgStore::new(pool.clone());
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let store = cleanup_store.clone();
            Box::pin(async move {
                let cutoff = OffsetDateTime::now_utc() - time::Duration::days(retention_days);
                match run_event_cleanup(&store, cutoff).await {
                    Ok(purged) => {
                        if purged > 0 {
                            info!(purged, "Event cleanup complete");
                        }
                    }
                    Err(e) => error!(error = %e, "Event cleanup failed"),
                }
            })
        })?)
        .await?;
    info!(retention_days, "Scheduled: Gateway event cleanup (daily)");

    // Job 3: Heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker started, all jobs scheduled");

    loop {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
    }
}
