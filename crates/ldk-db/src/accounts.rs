//! Account row operations: pessimistic locking, non-locking reads, and the
//! optimistic-version save.
//!
//! The row lock taken by [`lock_account`] is the correctness guard for
//! balance mutation; the version check in [`save_account`] is a cheap
//! corruption detector layered on top of it.

use chrono::{DateTime, Utc};
use ldk_money::{Amount, Currency};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{StoreError, UnitOfWork};

/// Snapshot of one account row.
#[derive(Debug, Clone)]
pub struct AccountRow {
    pub account_id: Uuid,
    pub user_id: String,
    pub currency: Currency,
    pub balance: Amount,
    /// Monotonic counter bumped on every balance mutation.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<AccountRow, StoreError> {
    let currency_raw: String = row.try_get("currency")?;
    let balance_raw: String = row.try_get("balance_text")?;

    let currency = Currency::parse(currency_raw.trim())
        .map_err(|e| StoreError::Decode(format!("currency {currency_raw:?}: {e}")))?;
    let balance = Amount::parse(&balance_raw)
        .map_err(|e| StoreError::Decode(format!("balance {balance_raw:?}: {e}")))?;

    Ok(AccountRow {
        account_id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        currency,
        balance,
        version: row.try_get("version")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Acquire a blocking write lock on the account row (`SELECT … FOR UPDATE`)
/// and return the post-lock snapshot.
///
/// Blocks until any concurrent holder commits or rolls back; the snapshot
/// therefore reflects every previously committed mutation.  The lock is held
/// until the surrounding [`UnitOfWork`] ends.
pub async fn lock_account(uow: &mut UnitOfWork, id: Uuid) -> Result<AccountRow, StoreError> {
    let row = sqlx::query(
        r#"
        select id, user_id, currency, balance::text as balance_text, version, updated_at
        from accounts
        where id = $1
        for update
        "#,
    )
    .bind(id)
    .fetch_optional(uow.conn())
    .await?;

    match row {
        Some(row) => row_to_account(&row),
        None => Err(StoreError::NotFound),
    }
}

/// Non-locking account read (balance queries).
pub async fn fetch_account(pool: &PgPool, id: Uuid) -> Result<AccountRow, StoreError> {
    let row = sqlx::query(
        r#"
        select id, user_id, currency, balance::text as balance_text, version, updated_at
        from accounts
        where id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row_to_account(&row),
        None => Err(StoreError::NotFound),
    }
}

/// Persist a mutated balance, bumping the version counter.
///
/// The update is keyed on `(id, version)`: if the stored version no longer
/// matches the snapshot the caller mutated, no row matches and the call
/// fails with [`StoreError::StaleVersion`].  Under the `lock_account`
/// protocol this cannot happen; a hit indicates the caller wrote without
/// holding the lock.
pub async fn save_account(uow: &mut UnitOfWork, account: &AccountRow) -> Result<(), StoreError> {
    let res = sqlx::query(
        r#"
        update accounts
           set balance    = cast($3 as numeric),
               version    = version + 1,
               updated_at = now()
         where id = $1
           and version = $2
        "#,
    )
    .bind(account.account_id)
    .bind(account.version)
    .bind(account.balance.to_string())
    .execute(uow.conn())
    .await?;

    if res.rows_affected() == 0 {
        return Err(StoreError::StaleVersion);
    }
    Ok(())
}
