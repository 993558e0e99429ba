//! Failure taxonomy of the transfer engine.

use std::fmt;
use uuid::Uuid;

/// Why a transfer did not post.
///
/// Implements `std::error::Error` so it can be boxed and propagated through
/// `Box<dyn Error>` chains without extra wrapping.  The `Display` text is
/// stable: callers and tests match on it.
#[derive(Debug)]
pub enum TransferError {
    /// Malformed or semantically invalid input.  Not retryable.
    InvalidArgument(String),
    /// The idempotency key was already committed; carries the original
    /// transaction's id.  Callers may treat this as idempotent success.
    AlreadyExists { transaction_id: Uuid },
    /// One of the referenced accounts does not exist.
    NotFound { account_id: Uuid },
    /// Source balance is smaller than the requested amount.  Terminal for
    /// this request; not retryable.
    InsufficientFunds { account_id: Uuid },
    /// Store I/O, conflict, or decode failure.  The caller may retry with
    /// the same idempotency key.
    Internal(anyhow::Error),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            TransferError::AlreadyExists { transaction_id } => {
                write!(f, "idempotency key already used by transaction {transaction_id}")
            }
            TransferError::NotFound { account_id } => {
                write!(f, "account not found: {account_id}")
            }
            TransferError::InsufficientFunds { account_id } => {
                write!(f, "insufficient funds on account {account_id}")
            }
            TransferError::Internal(e) => write!(f, "internal transfer error: {e:#}"),
        }
    }
}

impl std::error::Error for TransferError {}

impl From<ldk_db::StoreError> for TransferError {
    fn from(e: ldk_db::StoreError) -> Self {
        TransferError::Internal(anyhow::Error::new(e))
    }
}
