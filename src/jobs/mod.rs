//! Scheduled Jobs
//!
//! Background maintenance: outbox relay passes, expired idempotency key
//! deletion, and purging of delivered outbox rows.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;

use crate::outbox::{OutboxRelay, RelayError};
use crate::store::{OutboxStore, StoreError, TransferStore};

/// Delete idempotency keys whose expiry has passed
pub async fn delete_expired_idempotency_keys(store: &dyn TransferStore) -> Result<u64, JobError> {
    let rows_deleted = store.delete_expired_idempotency(Utc::now()).await?;

    if rows_deleted > 0 {
        tracing::info!(rows_deleted = rows_deleted, "Deleted expired idempotency keys");
    }

    Ok(rows_deleted)
}

/// Delete outbox messages delivered more than `retention` ago
pub async fn purge_delivered_outbox(
    store: &dyn OutboxStore,
    retention: Duration,
) -> Result<u64, JobError> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|e| JobError::InvalidRetention(e.to_string()))?;
    let rows_deleted = store.purge_delivered(Utc::now() - retention).await?;

    if rows_deleted > 0 {
        tracing::info!(rows_deleted = rows_deleted, "Purged delivered outbox messages");
    }

    Ok(rows_deleted)
}

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval between outbox relay passes (default: 1 second)
    pub relay_interval: Duration,
    /// Interval for idempotency key cleanup (default: 1 minute)
    pub idempotency_cleanup_interval: Duration,
    /// Interval for outbox purge (default: 1 hour)
    pub outbox_purge_interval: Duration,
    /// How long delivered outbox rows are kept (default: 7 days)
    pub outbox_retention: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            relay_interval: Duration::from_secs(1),
            idempotency_cleanup_interval: Duration::from_secs(60),
            outbox_purge_interval: Duration::from_secs(3600),
            outbox_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    transfers: Arc<dyn TransferStore>,
    outbox: Arc<dyn OutboxStore>,
    relay: OutboxRelay,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(
        transfers: Arc<dyn TransferStore>,
        outbox: Arc<dyn OutboxStore>,
        relay: OutboxRelay,
    ) -> Self {
        let config = JobSchedulerConfig {
            relay_interval: relay.config().interval,
            ..JobSchedulerConfig::default()
        };
        Self::with_config(transfers, outbox, relay, config)
    }

    pub fn with_config(
        transfers: Arc<dyn TransferStore>,
        outbox: Arc<dyn OutboxStore>,
        relay: OutboxRelay,
        config: JobSchedulerConfig,
    ) -> Self {
        Self {
            transfers,
            outbox,
            relay,
            config,
        }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut relay_interval = interval(self.config.relay_interval);
        let mut idempotency_interval = interval(self.config.idempotency_cleanup_interval);
        let mut purge_interval = interval(self.config.outbox_purge_interval);

        loop {
            tokio::select! {
                _ = relay_interval.tick() => {
                    if let Err(e) = self.relay.relay_once().await {
                        tracing::error!(error = %e, "Outbox relay pass failed");
                    }
                }
                _ = idempotency_interval.tick() => {
                    if let Err(e) = delete_expired_idempotency_keys(self.transfers.as_ref()).await {
                        tracing::error!(error = %e, "Idempotency key deletion failed");
                    }
                }
                _ = purge_interval.tick() => {
                    if let Err(e) = purge_delivered_outbox(self.outbox.as_ref(), self.config.outbox_retention).await {
                        tracing::error!(error = %e, "Outbox purge failed");
                    }
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.relay.relay_once().await {
            Ok(relay) => {
                report.outbox_delivered = relay.delivered;
                report.outbox_failed = relay.failed;
                report.outbox_dead_lettered = relay.dead_lettered;
            }
            Err(e) => report.errors.push(format!("Outbox relay: {}", e)),
        }

        match delete_expired_idempotency_keys(self.transfers.as_ref()).await {
            Ok(count) => report.idempotency_keys_deleted = count,
            Err(e) => report.errors.push(format!("Idempotency deletion: {}", e)),
        }

        match purge_delivered_outbox(self.outbox.as_ref(), self.config.outbox_retention).await {
            Ok(count) => report.outbox_purged = count,
            Err(e) => report.errors.push(format!("Outbox purge: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub outbox_delivered: u64,
    pub outbox_failed: u64,
    pub outbox_dead_lettered: u64,
    pub idempotency_keys_deleted: u64,
    pub outbox_purged: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Invalid retention: {0}")]
    InvalidRetention(String),
}
