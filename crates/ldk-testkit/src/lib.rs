//! Deterministic test surface: an in-process event bus with failure
//! injection, and direct-SQL seeding helpers for the tables the engine
//! treats as externally provisioned.

use anyhow::{Context, Result};
use ldk_money::{Amount, Currency};
use sqlx::PgPool;
use uuid::Uuid;

mod memory_bus;

pub use memory_bus::{MemoryBus, RecordedMessage};

/// Insert an account row directly.
///
/// Account provisioning is outside the engine's surface, so tests seed rows
/// here rather than through any production API.
pub async fn seed_account(
    pool: &PgPool,
    account_id: Uuid,
    user_id: &str,
    currency: Currency,
    balance: Amount,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into accounts (id, user_id, currency, balance, version)
        values ($1, $2, $3, cast($4 as numeric), 0)
        "#,
    )
    .bind(account_id)
    .bind(user_id)
    .bind(currency.as_str())
    .bind(balance.to_string())
    .execute(pool)
    .await
    .context("seed_account failed")?;
    Ok(())
}

/// Current balance as the canonical scale-4 string, read raw.
pub async fn read_balance(pool: &PgPool, account_id: Uuid) -> Result<Amount> {
    let (text,): (String,) =
        sqlx::query_as("select balance::text from accounts where id = $1")
            .bind(account_id)
            .fetch_one(pool)
            .await
            .context("read_balance failed")?;
    Amount::parse(&text).map_err(|e| anyhow::anyhow!("balance {text:?}: {e}"))
}

/// Row counts used by idempotency assertions.
pub async fn count_transactions_for_key(pool: &PgPool, key: &str) -> Result<i64> {
    let (n,): (i64,) =
        sqlx::query_as("select count(*)::bigint from transactions where idempotency_key = $1")
            .bind(key)
            .fetch_one(pool)
            .await
            .context("count_transactions_for_key failed")?;
    Ok(n)
}

/// Number of outbox rows staged for one aggregate.
pub async fn count_outbox_for_aggregate(pool: &PgPool, aggregate_id: Uuid) -> Result<i64> {
    let (n,): (i64,) =
        sqlx::query_as("select count(*)::bigint from outbox_events where aggregate_id = $1")
            .bind(aggregate_id)
            .fetch_one(pool)
            .await
            .context("count_outbox_for_aggregate failed")?;
    Ok(n)
}
