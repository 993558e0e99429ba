//! The publisher worker loop.

use anyhow::{Context, Result};
use chrono::Utc;
use ldk_bus::EventBus;
use ldk_db::{
    claim_pending_outbox, mark_outbox_failed, mark_outbox_published, mark_outbox_retry, OutboxRow,
};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::RetryPolicy;

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Delay between scans that claimed nothing.
    pub poll_interval: Duration,
    /// Max rows claimed per scan.
    pub batch_size: i64,
    /// Per-message ack deadline on the bus.
    pub publish_timeout: Duration,
    /// Age after which a PROCESSING claim counts as abandoned.  Keep well
    /// above the publish timeout (recommended 5x) so a slow ack is never
    /// mistaken for a dead worker.
    pub claim_lease: Duration,
    pub retry: RetryPolicy,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
            publish_timeout: Duration::from_secs(10),
            claim_lease: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// One publisher worker.  Deployments scale horizontally by running several;
/// the claim query partitions rows between them safely.
pub struct Publisher<B: EventBus> {
    pool: PgPool,
    bus: Arc<B>,
    cfg: PublisherConfig,
    worker_id: String,
    rng: SmallRng,
}

impl<B: EventBus> Publisher<B> {
    /// Build a worker with an explicit jitter RNG (tests pass a seeded one).
    pub fn new(
        pool: PgPool,
        bus: Arc<B>,
        cfg: PublisherConfig,
        worker_id: impl Into<String>,
        rng: SmallRng,
    ) -> Self {
        Self {
            pool,
            bus,
            cfg,
            worker_id: worker_id.into(),
            rng,
        }
    }

    /// Build a worker with an entropy-seeded jitter RNG.
    pub fn with_entropy(
        pool: PgPool,
        bus: Arc<B>,
        cfg: PublisherConfig,
        worker_id: impl Into<String>,
    ) -> Self {
        Self::new(pool, bus, cfg, worker_id, SmallRng::from_entropy())
    }

    /// Run until `shutdown` flips to `true`.
    ///
    /// A failed iteration is logged and retried after the poll interval — a
    /// broken database connection must not kill the worker, only delay it.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "outbox publisher worker starting");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let claimed = match self.run_once().await {
                Ok(n) => n,
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = ?e, "publisher iteration failed");
                    0
                }
            };

            if claimed == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.cfg.poll_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }

        info!(worker_id = %self.worker_id, "outbox publisher worker stopped");
    }

    /// One claim-publish-settle iteration.  Returns the number of rows
    /// claimed (not necessarily published).  Public so tests can drive the
    /// loop deterministically.
    pub async fn run_once(&mut self) -> Result<usize> {
        let batch = claim_pending_outbox(
            &self.pool,
            self.cfg.batch_size,
            self.cfg.claim_lease,
            Utc::now(),
        )
        .await
        .context("outbox claim failed")?;

        let claimed = batch.len();
        for record in batch {
            self.dispatch_record(record).await?;
        }
        Ok(claimed)
    }

    /// Publish one claimed record and settle its row.  Only settle-write
    /// failures propagate; a publish failure is normal operation and feeds
    /// the retry state machine.
    async fn dispatch_record(&mut self, record: OutboxRow) -> Result<()> {
        let key = record.aggregate_id.to_string();

        let outcome = self
            .bus
            .publish(
                &record.topic,
                &key,
                &record.payload,
                self.cfg.publish_timeout,
            )
            .await;

        match outcome {
            Ok(()) => {
                let settled = mark_outbox_published(&self.pool, record.event_id, Utc::now())
                    .await
                    .context("mark published failed")?;
                if !settled {
                    // The lease sweep took the claim while we were waiting on
                    // the ack. The event shipped; the new owner will ship it
                    // again. Consumers dedupe.
                    warn!(
                        worker_id = %self.worker_id,
                        event_id = %record.event_id,
                        "published event but claim was lost; duplicate delivery expected"
                    );
                }
                Ok(())
            }
            Err(bus_err) => self.settle_failure(&record, &bus_err.to_string()).await,
        }
    }

    async fn settle_failure(&mut self, record: &OutboxRow, err_msg: &str) -> Result<()> {
        let new_retry_count = record.retry_count + 1;

        if new_retry_count >= record.max_retries {
            let settled = mark_outbox_failed(&self.pool, record.event_id, err_msg)
                .await
                .context("mark failed failed")?;
            if settled {
                error!(
                    worker_id = %self.worker_id,
                    event_id = %record.event_id,
                    aggregate_id = %record.aggregate_id,
                    retry_count = new_retry_count,
                    error = err_msg,
                    "outbox event exhausted retries; operator attention required"
                );
            }
            return Ok(());
        }

        let delay = self.cfg.retry.delay_for(new_retry_count, &mut self.rng);
        let next_retry_at = Utc::now()
            + chrono::Duration::from_std(delay).context("retry delay out of chrono range")?;

        let settled = mark_outbox_retry(
            &self.pool,
            record.event_id,
            new_retry_count,
            next_retry_at,
            err_msg,
        )
        .await
        .context("mark retry failed")?;

        if settled {
            warn!(
                worker_id = %self.worker_id,
                event_id = %record.event_id,
                retry_count = new_retry_count,
                next_retry_at = %next_retry_at,
                error = err_msg,
                "publish failed; scheduled retry"
            );
        }
        Ok(())
    }
}
