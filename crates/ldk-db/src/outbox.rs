//! Outbox rows: staging, atomic claim, and settlement.
//!
//! # State machine
//!
//! ```text
//! PENDING ──claim──► PROCESSING ──ack──────► PUBLISHED (terminal)
//!    ▲                    │
//!    └────retryable───────┼──exhausted────► FAILED    (terminal)
//! ```
//!
//! Claims use `FOR UPDATE SKIP LOCKED`, so concurrent workers never receive
//! the same row.  A PROCESSING row whose claim timestamp has outlived the
//! lease is treated as abandoned (worker crash) and becomes claimable again
//! through the same query.
//!
//! The caller MUST settle every claimed row with exactly one of
//! [`mark_outbox_published`], [`mark_outbox_retry`], or
//! [`mark_outbox_failed`].  A caller that crashes instead is covered by the
//! lease sweep.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use crate::{truncate_error, StoreError, UnitOfWork};

/// Hard cap on the stored `last_error` text, in bytes.
const LAST_ERROR_MAX_BYTES: usize = 2000;

/// Publication status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSING" => Ok(OutboxStatus::Processing),
            "PUBLISHED" => Ok(OutboxStatus::Published),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(anyhow::anyhow!("invalid outbox status: {}", other)),
        }
    }
}

/// An event to stage.  Inserted with status=PENDING, retry_count=0.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub event_id: Uuid,
    /// Partition key on the bus; the owning transaction's id.
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    /// Opaque serialized payload.  The publisher ships these bytes verbatim.
    pub payload: Vec<u8>,
    pub topic: String,
    pub max_retries: i32,
}

/// A stored outbox row.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub topic: String,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub processing_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn row_to_outbox(row: &sqlx::postgres::PgRow) -> Result<OutboxRow, StoreError> {
    let status_raw: String = row.try_get("status")?;
    Ok(OutboxRow {
        event_id: row.try_get("id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        event_type: row.try_get("type")?,
        payload: row.try_get("payload")?,
        topic: row.try_get("topic")?,
        status: OutboxStatus::parse(&status_raw).map_err(|e| StoreError::Decode(e.to_string()))?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        next_retry_at: row.try_get("next_retry_at")?,
        processing_at: row.try_get("processing_at")?,
        published_at: row.try_get("published_at")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
    })
}

const OUTBOX_COLUMNS: &str = "id, aggregate_id, aggregate_type, type, payload, topic, status, \
     retry_count, max_retries, next_retry_at, processing_at, published_at, last_error, created_at";

/// Stage an event inside the caller's unit of work.
///
/// This is the only insert path: an outbox row exists exactly when the
/// business write it describes committed.
pub async fn insert_outbox(uow: &mut UnitOfWork, event: &NewOutboxEvent) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        insert into outbox_events
            (id, aggregate_id, aggregate_type, type, payload, topic, status, retry_count, max_retries)
        values
            ($1, $2, $3, $4, $5, $6, 'PENDING', 0, $7)
        "#,
    )
    .bind(event.event_id)
    .bind(event.aggregate_id)
    .bind(&event.aggregate_type)
    .bind(&event.event_type)
    .bind(&event.payload)
    .bind(&event.topic)
    .bind(event.max_retries)
    .execute(uow.conn())
    .await?;
    Ok(())
}

/// Atomically claim up to `batch_size` publishable rows for exclusive
/// dispatch.
///
/// Claimable rows, oldest first:
/// - PENDING with no `next_retry_at`, or one at/before `now`;
/// - PROCESSING whose `processing_at` is older than `lease` (abandoned by a
///   crashed worker).
///
/// The statement is a single CTE `UPDATE` and commits on its own — the claim
/// never rides along with the caller's other work.  `FOR UPDATE SKIP LOCKED`
/// guarantees no two concurrent callers receive the same row.  Claimed rows
/// come back in status PROCESSING with `processing_at = now`.
pub async fn claim_pending_outbox(
    pool: &PgPool,
    batch_size: i64,
    lease: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<OutboxRow>, StoreError> {
    let rows = sqlx::query(&format!(
        r#"
        with claimable as (
            select id
              from outbox_events
             where (status = 'PENDING'
                    and (next_retry_at is null or next_retry_at <= $2))
                or (status = 'PROCESSING'
                    and processing_at < $2 - make_interval(secs => $3))
             order by created_at asc
             limit $1
               for update skip locked
        )
        update outbox_events
           set status        = 'PROCESSING',
               processing_at = $2
         where id in (select id from claimable)
        returning {OUTBOX_COLUMNS}
        "#
    ))
    .bind(batch_size)
    .bind(now)
    .bind(lease.as_secs_f64())
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(row_to_outbox(&row)?);
    }
    // Postgres returns UPDATE..RETURNING rows in no guaranteed order; the
    // caller relies on claim order, so restore it here.
    out.sort_by_key(|r| r.created_at);
    Ok(out)
}

/// PROCESSING → PUBLISHED after a durable bus acknowledgement.
///
/// Returns `false` if the row was not in PROCESSING — the claim was lost to
/// the lease sweep and another worker owns the row now.
pub async fn mark_outbox_published(
    pool: &PgPool,
    event_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update outbox_events
           set status       = 'PUBLISHED',
               published_at = $2,
               last_error   = null
         where id = $1
           and status = 'PROCESSING'
        returning id
        "#,
    )
    .bind(event_id)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

/// PROCESSING → PENDING after a retryable publish failure.
///
/// Records the new retry count, the earliest time the row becomes claimable
/// again, and the failure message (truncated to 2000 bytes).  Returns
/// `false` when the row was not in PROCESSING.
pub async fn mark_outbox_retry(
    pool: &PgPool,
    event_id: Uuid,
    new_retry_count: i32,
    next_retry_at: DateTime<Utc>,
    err_msg: &str,
) -> Result<bool, StoreError> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update outbox_events
           set status        = 'PENDING',
               retry_count   = $2,
               next_retry_at = $3,
               processing_at = null,
               last_error    = $4
         where id = $1
           and status = 'PROCESSING'
        returning id
        "#,
    )
    .bind(event_id)
    .bind(new_retry_count)
    .bind(next_retry_at)
    .bind(truncate_error(err_msg, LAST_ERROR_MAX_BYTES))
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

/// PROCESSING → FAILED once retries are exhausted.  Terminal; the row
/// requires operator attention.  Returns `false` when the row was not in
/// PROCESSING.
pub async fn mark_outbox_failed(
    pool: &PgPool,
    event_id: Uuid,
    err_msg: &str,
) -> Result<bool, StoreError> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update outbox_events
           set status     = 'FAILED',
               last_error = $2
         where id = $1
           and status = 'PROCESSING'
        returning id
        "#,
    )
    .bind(event_id)
    .bind(truncate_error(err_msg, LAST_ERROR_MAX_BYTES))
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

/// Fetch a single outbox row by id.
pub async fn fetch_outbox(pool: &PgPool, event_id: Uuid) -> Result<Option<OutboxRow>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        select {OUTBOX_COLUMNS}
        from outbox_events
        where id = $1
        "#
    ))
    .bind(event_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(row_to_outbox(&row)?)),
        None => Ok(None),
    }
}

/// Aggregate counts for the ops surface.
#[derive(Debug, Clone, Default)]
pub struct OutboxStats {
    pub pending: i64,
    pub processing: i64,
    pub published: i64,
    pub failed: i64,
    /// Age of the oldest non-terminal row, in seconds.  Zero when the
    /// backlog is empty.
    pub oldest_unpublished_age_secs: i64,
}

/// Count rows per status and the age of the oldest unpublished row.
pub async fn outbox_stats(pool: &PgPool) -> Result<OutboxStats, StoreError> {
    let row = sqlx::query(
        r#"
        select
            count(*) filter (where status = 'PENDING')::bigint    as pending,
            count(*) filter (where status = 'PROCESSING')::bigint as processing,
            count(*) filter (where status = 'PUBLISHED')::bigint  as published,
            count(*) filter (where status = 'FAILED')::bigint     as failed,
            coalesce(
                extract(epoch from (now() - min(created_at)
                    filter (where status in ('PENDING','PROCESSING'))))::bigint,
                0
            ) as oldest_age
        from outbox_events
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(OutboxStats {
        pending: row.try_get("pending")?,
        processing: row.try_get("processing")?,
        published: row.try_get("published")?,
        failed: row.try_get("failed")?,
        oldest_unpublished_age_secs: row.try_get("oldest_age")?,
    })
}
