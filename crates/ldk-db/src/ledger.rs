//! Transaction headers and double-entry rows.
//!
//! Both tables are append-only: rows are inserted inside the transfer's
//! unit of work and never updated afterwards.  The unique constraint on
//! `idempotency_key` is the authoritative duplicate guard — the existence
//! probe is a fast pre-check only.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use ldk_money::Amount;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{is_unique_constraint_violation, StoreError, UnitOfWork};

const IDEMPOTENCY_KEY_CONSTRAINT: &str = "transactions_idempotency_key_key";

/// Terminal status of a transaction header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Posted,
    Failed,
    Reversed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Posted => "POSTED",
            TxStatus::Failed => "FAILED",
            TxStatus::Reversed => "REVERSED",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "POSTED" => Ok(TxStatus::Posted),
            "FAILED" => Ok(TxStatus::Failed),
            "REVERSED" => Ok(TxStatus::Reversed),
            other => Err(anyhow!("invalid transaction status: {}", other)),
        }
    }
}

/// Which side of the double entry a row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDirection {
    Debit,
    Credit,
}

impl EntryDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryDirection::Debit => "DEBIT",
            EntryDirection::Credit => "CREDIT",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "DEBIT" => Ok(EntryDirection::Debit),
            "CREDIT" => Ok(EntryDirection::Credit),
            other => Err(anyhow!("invalid entry direction: {}", other)),
        }
    }
}

/// A transaction header to insert.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_id: Uuid,
    pub idempotency_key: String,
    pub reference_id: Option<String>,
    pub status: TxStatus,
    pub booked_at: DateTime<Utc>,
}

/// One side of the double entry to insert.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub account_id: Uuid,
    pub amount: Amount,
    pub direction: EntryDirection,
}

/// A committed transaction header.
#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub transaction_id: Uuid,
    pub idempotency_key: String,
    pub reference_id: Option<String>,
    pub status: TxStatus,
    pub booked_at: DateTime<Utc>,
}

/// A committed double-entry row.
#[derive(Debug, Clone)]
pub struct EntryRow {
    pub entry_id: i64,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub amount: Amount,
    pub direction: EntryDirection,
}

/// Insert the header and its entries inside the caller's unit of work.
///
/// Fails with [`StoreError::DuplicateIdempotencyKey`] when the header's key
/// collides with committed history; the caller is expected to roll back and
/// resolve the original transaction.
pub async fn insert_transaction_with_entries(
    uow: &mut UnitOfWork,
    transaction: &NewTransaction,
    entries: &[NewEntry],
) -> Result<(), StoreError> {
    let res = sqlx::query(
        r#"
        insert into transactions (id, idempotency_key, reference_id, status, booked_at)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(transaction.transaction_id)
    .bind(&transaction.idempotency_key)
    .bind(&transaction.reference_id)
    .bind(transaction.status.as_str())
    .bind(transaction.booked_at)
    .execute(uow.conn())
    .await;

    if let Err(e) = res {
        if is_unique_constraint_violation(&e, IDEMPOTENCY_KEY_CONSTRAINT) {
            return Err(StoreError::DuplicateIdempotencyKey);
        }
        return Err(e.into());
    }

    for entry in entries {
        sqlx::query(
            r#"
            insert into transaction_entries (transaction_id, account_id, amount, direction)
            values ($1, $2, cast($3 as numeric), $4)
            "#,
        )
        .bind(transaction.transaction_id)
        .bind(entry.account_id)
        .bind(entry.amount.to_string())
        .bind(entry.direction.as_str())
        .execute(uow.conn())
        .await?;
    }

    Ok(())
}

/// Resolve a committed transaction by its idempotency key.
pub async fn find_by_idempotency_key(
    pool: &PgPool,
    key: &str,
) -> Result<Option<TransactionRow>, StoreError> {
    let row = sqlx::query(
        r#"
        select id, idempotency_key, reference_id, status, booked_at
        from transactions
        where idempotency_key = $1
        "#,
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else { return Ok(None) };

    let status_raw: String = row.try_get("status")?;
    Ok(Some(TransactionRow {
        transaction_id: row.try_get("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        reference_id: row.try_get("reference_id")?,
        status: TxStatus::parse(&status_raw).map_err(|e| StoreError::Decode(e.to_string()))?,
        booked_at: row.try_get("booked_at")?,
    }))
}

/// Non-locking existence probe on the idempotency key.
///
/// An optimization only: two concurrent callers can both see `false` here
/// and race to the insert, where the unique constraint decides the winner.
pub async fn exists_idempotency_key(pool: &PgPool, key: &str) -> Result<bool, StoreError> {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (select 1 from transactions where idempotency_key = $1)
        "#,
    )
    .bind(key)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// All entries of one transaction, in insertion order.
pub async fn fetch_entries_for_transaction(
    pool: &PgPool,
    transaction_id: Uuid,
) -> Result<Vec<EntryRow>, StoreError> {
    let rows = sqlx::query(
        r#"
        select id, transaction_id, account_id, amount::text as amount_text, direction
        from transaction_entries
        where transaction_id = $1
        order by id asc
        "#,
    )
    .bind(transaction_id)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let amount_raw: String = row.try_get("amount_text")?;
        let direction_raw: String = row.try_get("direction")?;
        out.push(EntryRow {
            entry_id: row.try_get("id")?,
            transaction_id: row.try_get("transaction_id")?,
            account_id: row.try_get("account_id")?,
            amount: Amount::parse(&amount_raw)
                .map_err(|e| StoreError::Decode(format!("amount {amount_raw:?}: {e}")))?,
            direction: EntryDirection::parse(&direction_raw)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
        });
    }
    Ok(out)
}
