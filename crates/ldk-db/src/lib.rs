//! Postgres store adapter for the ledger.
//!
//! Every write primitive either participates in a caller-held [`UnitOfWork`]
//! (account locking, ledger inserts, outbox staging) or runs as its own
//! atomic statement (outbox claim/settle).  Connections run at READ COMMITTED
//! — Postgres' default — and rely on explicit `FOR UPDATE` row locks for
//! serialization, not on a stricter isolation level.

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::fmt;

pub const ENV_DB_URL: &str = "LDK_DATABASE_URL";

mod accounts;
mod ledger;
mod outbox;

pub use accounts::{fetch_account, lock_account, save_account, AccountRow};
pub use ledger::{
    exists_idempotency_key, fetch_entries_for_transaction, find_by_idempotency_key,
    insert_transaction_with_entries, EntryDirection, EntryRow, NewEntry, NewTransaction,
    TransactionRow, TxStatus,
};
pub use outbox::{
    claim_pending_outbox, fetch_outbox, insert_outbox, mark_outbox_failed, mark_outbox_published,
    mark_outbox_retry, outbox_stats, NewOutboxEvent, OutboxRow, OutboxStats, OutboxStatus,
};

/// Connect to Postgres using LDK_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper used by integration tests:
/// - Connect using LDK_DATABASE_URL
/// - Ensure migrations are applied
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='accounts'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_accounts_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_accounts_table: bool,
}

// ---------------------------------------------------------------------------
// Unit of work
// ---------------------------------------------------------------------------

/// An open database transaction.
///
/// All writes issued through a `UnitOfWork` become visible atomically at
/// [`UnitOfWork::commit`].  Dropping the value without committing rolls the
/// transaction back, so an early `?` return leaves no partial state behind.
pub struct UnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl UnitOfWork {
    /// Acquire a connection from the pool and open a transaction.
    pub async fn begin(pool: &PgPool) -> Result<Self, StoreError> {
        let tx = pool.begin().await?;
        Ok(Self { tx })
    }

    /// Make every staged write visible atomically.
    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Discard every staged write.  Equivalent to dropping the value; offered
    /// for call sites that want the rollback explicit.
    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }

    pub(crate) fn conn(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Store-level failures surfaced to the engine and the publisher.
///
/// Implements `std::error::Error` so it can be boxed and propagated through
/// `anyhow`/`Box<dyn Error>` chains without extra wrapping.
#[derive(Debug)]
pub enum StoreError {
    /// The referenced row does not exist.
    NotFound,
    /// The transaction's idempotency key collides with committed history.
    DuplicateIdempotencyKey,
    /// A versioned update matched no row: the snapshot is stale.
    StaleVersion,
    /// A stored value failed to decode into its domain type.
    Decode(String),
    /// Underlying driver/connection failure.
    Db(sqlx::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "row not found"),
            StoreError::DuplicateIdempotencyKey => {
                write!(f, "idempotency key already committed")
            }
            StoreError::StaleVersion => write!(f, "stale version: row changed since snapshot"),
            StoreError::Decode(msg) => write!(f, "stored value failed to decode: {msg}"),
            StoreError::Db(e) => write!(f, "database error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Db(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Db(e)
    }
}

/// Detect a Postgres unique constraint violation by name.
pub(crate) fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint)
                || (db_err.code().as_deref() == Some("23505")
                    && db_err.constraint() == Some(constraint))
        }
        _ => false,
    }
}

/// Truncate an error message to at most `max` bytes on a char boundary.
/// The outbox `last_error` column is capped so a pathological driver message
/// cannot bloat the row.
pub(crate) fn truncate_error(msg: &str, max: usize) -> &str {
    if msg.len() <= max {
        return msg;
    }
    let mut end = max;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    &msg[..end]
}

#[cfg(test)]
mod tests {
    use super::truncate_error;

    #[test]
    fn truncate_error_short_message_untouched() {
        assert_eq!(truncate_error("boom", 2000), "boom");
    }

    #[test]
    fn truncate_error_cuts_at_limit() {
        let long = "x".repeat(3000);
        assert_eq!(truncate_error(&long, 2000).len(), 2000);
    }

    #[test]
    fn truncate_error_respects_char_boundary() {
        // 'é' is 2 bytes; a 3-byte limit must not split it.
        let s = "aéé";
        let cut = truncate_error(s, 2);
        assert_eq!(cut, "a");
    }
}
