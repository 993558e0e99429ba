//! Transfer engine: validated, deadlock-free double-entry posting with an
//! outbox row staged in the same unit of work.
//!
//! # Invariants enforced here
//!
//! 1. Both account locks are taken in canonical order (ascending UUID byte
//!    order), so concurrent transfers cannot form a circular wait.
//! 2. The debit and credit entries always have equal magnitude and currency.
//! 3. The transaction header, both entries, the balance updates, and exactly
//!    one outbox row commit atomically — or none of them do.
//! 4. A repeated idempotency key resolves to the original transaction's
//!    identity; the unique constraint at insert time is the authoritative
//!    guard, the pre-check is only a fast path.

pub mod engine;
mod error;
mod request;

pub use engine::{create_transfer, get_balance, BalanceView, PostingConfig, TransferReceipt};
pub use error::TransferError;
pub use request::{mask_key, TransferRequest, ValidTransfer};
