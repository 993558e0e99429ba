//! Outbox publisher: the claim → publish → settle loop.
//!
//! # Structure (mandatory)
//!
//! Each iteration is three independent database interactions:
//!
//! 1. **Claim** — one atomic statement that flips a batch of due rows to
//!    PROCESSING and commits (see `ldk_db::claim_pending_outbox`).
//! 2. **Publish** — per record, transaction-free, bounded by the publish
//!    timeout.  No database transaction is ever held across the bus call.
//! 3. **Settle** — per record, a fresh single-statement update: PUBLISHED on
//!    ack, PENDING-with-backoff on retryable failure, FAILED when the retry
//!    budget is exhausted.
//!
//! Delivery is at-least-once: if the process dies between ack and settle,
//! the lease sweep re-claims the row and the event ships again.  Consumers
//! dedupe on aggregate id / event id.

mod retry;
mod worker;

pub use retry::RetryPolicy;
pub use worker::{Publisher, PublisherConfig};
