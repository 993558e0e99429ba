//! The posting algorithm.

use chrono::{DateTime, Utc};
use ldk_db::{
    fetch_account, insert_outbox, insert_transaction_with_entries, lock_account, save_account,
    EntryDirection, NewEntry, NewOutboxEvent, NewTransaction, StoreError, TxStatus, UnitOfWork,
};
use ldk_money::{Amount, Currency};
use ldk_schemas::{
    TransactionEventV1, AGGREGATE_TYPE_TRANSACTION, EVENT_TYPE_TRANSACTION_CREATED,
    TRANSACTIONS_TOPIC,
};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::request::{mask_key, TransferRequest, ValidTransfer};
use crate::TransferError;

/// Posting-time options, passed in explicitly so the engine carries no
/// global state.
#[derive(Debug, Clone)]
pub struct PostingConfig {
    /// Destination topic stamped on the staged outbox row.
    pub topic: String,
    /// Retry budget stamped on the staged outbox row.
    pub outbox_max_retries: i32,
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            topic: TRANSACTIONS_TOPIC.to_string(),
            outbox_max_retries: 5,
        }
    }
}

/// The stable result of a posted transfer.  Repeat calls with the same
/// idempotency key resolve to the same receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transaction_id: Uuid,
    pub status: TxStatus,
    pub booked_at: DateTime<Utc>,
}

/// Non-locking balance read.
#[derive(Debug, Clone)]
pub struct BalanceView {
    pub account_id: Uuid,
    pub currency: Currency,
    pub balance: Amount,
    pub version: i64,
}

/// Validate and post one transfer.
///
/// On success the transaction header, both double-entry rows, both balance
/// updates, and one staged outbox row are committed atomically.  See the
/// crate docs for the invariants; see [`TransferError`] for the failure
/// taxonomy.
///
/// A `StaleVersion` store failure (possible only if something bypassed the
/// row locks) is retried once with fresh locks, then surfaced as
/// `Internal`.
pub async fn create_transfer(
    pool: &PgPool,
    req: &TransferRequest,
    cfg: &PostingConfig,
) -> Result<TransferReceipt, TransferError> {
    let valid = req.validate()?;

    // Fast-path dedup probe. Purely an optimization: the authoritative guard
    // is the unique constraint hit inside attempt_post.
    if let Some(existing) = ldk_db::find_by_idempotency_key(pool, &valid.idempotency_key).await? {
        return Err(TransferError::AlreadyExists {
            transaction_id: existing.transaction_id,
        });
    }

    match attempt_post(pool, &valid, cfg).await {
        Ok(receipt) => Ok(receipt),
        Err(PostFailure::Stale) => {
            warn!(
                idempotency_key = %mask_key(&valid.idempotency_key),
                "stale version under account lock; retrying transfer once"
            );
            match attempt_post(pool, &valid, cfg).await {
                Ok(receipt) => Ok(receipt),
                Err(PostFailure::Stale) => Err(TransferError::Internal(anyhow::anyhow!(
                    "account version changed twice under lock"
                ))),
                Err(PostFailure::Terminal(e)) => Err(e),
            }
        }
        Err(PostFailure::Terminal(e)) => Err(e),
    }
}

/// Outcome of a single posting attempt.  `Stale` is retryable with fresh
/// locks; everything else is final for this call.
enum PostFailure {
    Stale,
    Terminal(TransferError),
}

impl From<TransferError> for PostFailure {
    fn from(e: TransferError) -> Self {
        PostFailure::Terminal(e)
    }
}

async fn attempt_post(
    pool: &PgPool,
    valid: &ValidTransfer,
    cfg: &PostingConfig,
) -> Result<TransferReceipt, PostFailure> {
    // Canonical lock order: ascending UUID byte order, regardless of which
    // side is the source. Every caller locking the same pair agrees on the
    // order, so circular wait cannot arise.
    let (first_id, second_id) = lock_order(valid.source_account_id, valid.destination_account_id);

    // Dropping the unit of work on any early return rolls everything back.
    let mut uow = UnitOfWork::begin(pool).await.map_err(internal)?;

    let first = lock_row(&mut uow, first_id).await?;
    let second = lock_row(&mut uow, second_id).await?;

    let (mut source, mut destination) = if first.account_id == valid.source_account_id {
        (first, second)
    } else {
        (second, first)
    };

    // Business validation under the locks.
    for account in [&source, &destination] {
        if account.currency != valid.currency {
            return Err(PostFailure::Terminal(TransferError::InvalidArgument(
                format!(
                    "currency mismatch: account {} holds {}, request is {}",
                    account.account_id, account.currency, valid.currency
                ),
            )));
        }
    }

    if source.balance < valid.amount {
        return Err(PostFailure::Terminal(TransferError::InsufficientFunds {
            account_id: source.account_id,
        }));
    }

    source.balance = source
        .balance
        .checked_sub(valid.amount)
        .ok_or_else(|| internal_msg("source balance underflow"))?;
    destination.balance = destination
        .balance
        .checked_add(valid.amount)
        .ok_or_else(|| internal_msg("destination balance overflow"))?;

    save_row(&mut uow, &source).await?;
    save_row(&mut uow, &destination).await?;

    let transaction_id = Uuid::new_v4();
    let booked_at = Utc::now();

    let header = NewTransaction {
        transaction_id,
        idempotency_key: valid.idempotency_key.clone(),
        reference_id: valid.description.clone(),
        status: TxStatus::Posted,
        booked_at,
    };
    let entries = [
        NewEntry {
            account_id: source.account_id,
            amount: valid.amount,
            direction: EntryDirection::Debit,
        },
        NewEntry {
            account_id: destination.account_id,
            amount: valid.amount,
            direction: EntryDirection::Credit,
        },
    ];

    match insert_transaction_with_entries(&mut uow, &header, &entries).await {
        Ok(()) => {}
        Err(StoreError::DuplicateIdempotencyKey) => {
            // Lost the insert race: a concurrent call with the same key
            // committed first. Roll back and report the winner's identity.
            uow.rollback().await.map_err(internal)?;
            let existing = ldk_db::find_by_idempotency_key(pool, &valid.idempotency_key)
                .await
                .map_err(internal)?
                .ok_or_else(|| internal_msg("duplicate key reported but no committed row found"))?;
            return Err(PostFailure::Terminal(TransferError::AlreadyExists {
                transaction_id: existing.transaction_id,
            }));
        }
        Err(e) => return Err(PostFailure::Terminal(e.into())),
    }

    let payload = TransactionEventV1 {
        transaction_id,
        idempotency_key: valid.idempotency_key.clone(),
        from_account_id: source.account_id,
        to_account_id: destination.account_id,
        amount: valid.amount.to_string(),
        currency: valid.currency.to_string(),
        status: TxStatus::Posted.as_str().to_string(),
        booked_at,
    };
    let payload_bytes = serde_json::to_vec(&payload)
        .map_err(|e| internal_msg(&format!("event payload serialization: {e}")))?;

    insert_outbox(
        &mut uow,
        &NewOutboxEvent {
            event_id: Uuid::new_v4(),
            aggregate_id: transaction_id,
            aggregate_type: AGGREGATE_TYPE_TRANSACTION.to_string(),
            event_type: EVENT_TYPE_TRANSACTION_CREATED.to_string(),
            payload: payload_bytes,
            topic: cfg.topic.clone(),
            max_retries: cfg.outbox_max_retries,
        },
    )
    .await
    .map_err(|e| PostFailure::Terminal(e.into()))?;

    uow.commit().await.map_err(internal)?;

    info!(
        transaction_id = %transaction_id,
        idempotency_key = %mask_key(&valid.idempotency_key),
        from = %source.account_id,
        to = %destination.account_id,
        amount = %valid.amount,
        currency = %valid.currency,
        "transfer posted"
    );

    Ok(TransferReceipt {
        transaction_id,
        status: TxStatus::Posted,
        booked_at,
    })
}

async fn lock_row(
    uow: &mut UnitOfWork,
    account_id: Uuid,
) -> Result<ldk_db::AccountRow, PostFailure> {
    match lock_account(uow, account_id).await {
        Ok(row) => Ok(row),
        Err(StoreError::NotFound) => {
            Err(PostFailure::Terminal(TransferError::NotFound { account_id }))
        }
        Err(e) => Err(PostFailure::Terminal(e.into())),
    }
}

async fn save_row(uow: &mut UnitOfWork, row: &ldk_db::AccountRow) -> Result<(), PostFailure> {
    match save_account(uow, row).await {
        Ok(()) => Ok(()),
        Err(StoreError::StaleVersion) => Err(PostFailure::Stale),
        Err(e) => Err(PostFailure::Terminal(e.into())),
    }
}

fn internal(e: StoreError) -> PostFailure {
    PostFailure::Terminal(TransferError::Internal(anyhow::Error::new(e)))
}

fn internal_msg(msg: &str) -> PostFailure {
    PostFailure::Terminal(TransferError::Internal(anyhow::anyhow!(msg.to_string())))
}

/// Total order on an account pair: ascending UUID byte order.
fn lock_order(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a.as_bytes() <= b.as_bytes() {
        (a, b)
    } else {
        (b, a)
    }
}

/// Read one account's balance without locking it.
pub async fn get_balance(pool: &PgPool, account_id: Uuid) -> Result<BalanceView, TransferError> {
    match fetch_account(pool, account_id).await {
        Ok(row) => Ok(BalanceView {
            account_id: row.account_id,
            currency: row.currency,
            balance: row.balance,
            version: row.version,
        }),
        Err(StoreError::NotFound) => Err(TransferError::NotFound { account_id }),
        Err(e) => Err(TransferError::Internal(anyhow::Error::new(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_order_is_symmetric() {
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = Uuid::parse_str("ffffffff-ffff-ffff-ffff-ffffffffffff").unwrap();
        assert_eq!(lock_order(a, b), (a, b));
        assert_eq!(lock_order(b, a), (a, b));
    }

    #[test]
    fn lock_order_compares_bytes_not_strings() {
        let a = Uuid::parse_str("10000000-0000-0000-0000-000000000000").unwrap();
        let b = Uuid::parse_str("0fffffff-ffff-ffff-ffff-ffffffffffff").unwrap();
        let (first, second) = lock_order(a, b);
        assert_eq!(first, b);
        assert_eq!(second, a);
    }

    #[test]
    fn posting_config_defaults_match_contract() {
        let cfg = PostingConfig::default();
        assert_eq!(cfg.topic, TRANSACTIONS_TOPIC);
        assert_eq!(cfg.outbox_max_retries, 5);
    }
}
