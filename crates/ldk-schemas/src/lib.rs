//! Wire-contract types shared between the transfer engine, the outbox
//! publisher, and downstream consumers.
//!
//! Field names, types, and ordering of [`TransactionEventV1`] are part of the
//! compatibility contract with consumers: never rename or reorder, only add.
//! Decimals cross the wire as strings at fixed scale 4; timestamps are
//! RFC-3339 UTC (chrono's serde default).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default topic for transaction events.
pub const TRANSACTIONS_TOPIC: &str = "transaction-events";

/// Aggregate type recorded on every outbox row staged by the transfer engine.
pub const AGGREGATE_TYPE_TRANSACTION: &str = "TRANSACTION";

/// Event type for a freshly posted transfer.
pub const EVENT_TYPE_TRANSACTION_CREATED: &str = "TRANSACTION_CREATED";

/// Payload of a `TRANSACTION_CREATED` event.
///
/// Serialized once by the transfer engine into the outbox row; the publisher
/// ships the stored bytes verbatim.  Consumers must tolerate additive fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEventV1 {
    pub transaction_id: Uuid,
    /// The caller-supplied deduplication token.
    pub idempotency_key: String,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    /// Decimal string at scale 4, e.g. `"100.0000"`.
    pub amount: String,
    pub currency: String,
    /// Always `"POSTED"` for this event type.
    pub status: String,
    pub booked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn event_field_names_are_frozen() {
        let ev = TransactionEventV1 {
            transaction_id: Uuid::nil(),
            idempotency_key: "tok-1".to_string(),
            from_account_id: Uuid::nil(),
            to_account_id: Uuid::nil(),
            amount: "100.0000".to_string(),
            currency: "USD".to_string(),
            status: "POSTED".to_string(),
            booked_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        };

        let v: serde_json::Value = serde_json::to_value(&ev).unwrap();
        let obj = v.as_object().unwrap();
        for key in [
            "transactionId",
            "idempotencyKey",
            "fromAccountId",
            "toAccountId",
            "amount",
            "currency",
            "status",
            "bookedAt",
        ] {
            assert!(obj.contains_key(key), "missing contract field {key}");
        }
        assert_eq!(obj["amount"], "100.0000");
        assert_eq!(obj["status"], "POSTED");
    }

    #[test]
    fn event_roundtrips_through_json() {
        let ev = TransactionEventV1 {
            transaction_id: Uuid::new_v4(),
            idempotency_key: "tok-2".to_string(),
            from_account_id: Uuid::new_v4(),
            to_account_id: Uuid::new_v4(),
            amount: "0.0001".to_string(),
            currency: "EUR".to_string(),
            status: "POSTED".to_string(),
            booked_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&ev).unwrap();
        let back: TransactionEventV1 = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn consumers_tolerate_additive_fields() {
        let json = r#"{
            "transactionId": "00000000-0000-0000-0000-000000000000",
            "idempotencyKey": "t",
            "fromAccountId": "00000000-0000-0000-0000-000000000000",
            "toAccountId": "00000000-0000-0000-0000-000000000000",
            "amount": "1.0000",
            "currency": "USD",
            "status": "POSTED",
            "bookedAt": "2024-06-01T12:00:00Z",
            "someFutureField": 42
        }"#;
        let ev: TransactionEventV1 = serde_json::from_str(json).unwrap();
        assert_eq!(ev.amount, "1.0000");
    }
}
