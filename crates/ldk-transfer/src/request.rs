//! Request parsing and validation.
//!
//! The engine accepts raw caller strings and validates them in one pass up
//! front, before any database work.  Everything after validation operates on
//! typed values only.

use ldk_money::{Amount, Currency};
use uuid::Uuid;

use crate::TransferError;

/// A transfer request as received from the caller, fields unparsed.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Caller-supplied deduplication token.  Non-empty.
    pub idempotency_key: String,
    pub source_account_id: String,
    pub destination_account_id: String,
    /// Decimal string, strictly positive, scale <= 4.
    pub amount: String,
    /// 3-letter uppercase code.
    pub currency: String,
    pub description: Option<String>,
}

/// A fully validated transfer, ready for the posting algorithm.
#[derive(Debug, Clone)]
pub struct ValidTransfer {
    pub idempotency_key: String,
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount: Amount,
    pub currency: Currency,
    pub description: Option<String>,
}

impl TransferRequest {
    /// Parse and validate every field.  Fails with
    /// [`TransferError::InvalidArgument`] naming the offending field.
    pub fn validate(&self) -> Result<ValidTransfer, TransferError> {
        if self.idempotency_key.is_empty() {
            return Err(TransferError::InvalidArgument(
                "idempotency_key must be non-empty".to_string(),
            ));
        }

        let source_account_id = parse_account_id(&self.source_account_id, "source_account_id")?;
        let destination_account_id =
            parse_account_id(&self.destination_account_id, "destination_account_id")?;

        if source_account_id == destination_account_id {
            return Err(TransferError::InvalidArgument(
                "source and destination accounts must differ".to_string(),
            ));
        }

        let amount = Amount::parse(&self.amount)
            .map_err(|e| TransferError::InvalidArgument(format!("amount: {e}")))?;
        if !amount.is_positive() {
            return Err(TransferError::InvalidArgument(
                "amount must be strictly positive".to_string(),
            ));
        }

        let currency = Currency::parse(&self.currency)
            .map_err(|e| TransferError::InvalidArgument(format!("currency: {e}")))?;

        Ok(ValidTransfer {
            idempotency_key: self.idempotency_key.clone(),
            source_account_id,
            destination_account_id,
            amount,
            currency,
            description: self.description.clone(),
        })
    }
}

fn parse_account_id(raw: &str, field: &str) -> Result<Uuid, TransferError> {
    Uuid::parse_str(raw)
        .map_err(|_| TransferError::InvalidArgument(format!("{field} is not a well-formed id")))
}

/// Mask a sensitive identifier down to its last four characters for logging.
pub fn mask_key(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> TransferRequest {
        TransferRequest {
            idempotency_key: "tok-1".to_string(),
            source_account_id: "0aa5d3a8-5c58-4e39-a7dd-6887a1b9a1a0".to_string(),
            destination_account_id: "7b0f7a3c-6b2f-4a1a-9f0a-2a3b4c5d6e7f".to_string(),
            amount: "100.00".to_string(),
            currency: "USD".to_string(),
            description: None,
        }
    }

    #[test]
    fn valid_request_passes() {
        let v = base_request().validate().unwrap();
        assert_eq!(v.amount, Amount::from_minor(1_000_000));
        assert_eq!(v.currency.as_str(), "USD");
    }

    #[test]
    fn empty_idempotency_key_rejected() {
        let mut req = base_request();
        req.idempotency_key.clear();
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("idempotency_key"));
    }

    #[test]
    fn malformed_source_id_rejected() {
        let mut req = base_request();
        req.source_account_id = "not-a-uuid".to_string();
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("source_account_id"));
    }

    #[test]
    fn self_transfer_rejected() {
        let mut req = base_request();
        req.destination_account_id = req.source_account_id.clone();
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn zero_amount_rejected() {
        let mut req = base_request();
        req.amount = "0.0000".to_string();
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("strictly positive"));
    }

    #[test]
    fn negative_amount_rejected_as_malformed() {
        let mut req = base_request();
        req.amount = "-5".to_string();
        assert!(matches!(
            req.validate().unwrap_err(),
            TransferError::InvalidArgument(_)
        ));
    }

    #[test]
    fn scale_five_amount_rejected() {
        let mut req = base_request();
        req.amount = "1.00001".to_string();
        assert!(matches!(
            req.validate().unwrap_err(),
            TransferError::InvalidArgument(_)
        ));
    }

    #[test]
    fn lowercase_currency_rejected() {
        let mut req = base_request();
        req.currency = "usd".to_string();
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("currency"));
    }

    #[test]
    fn mask_key_keeps_last_four() {
        assert_eq!(mask_key("transfer-2024-0001"), "***0001");
        assert_eq!(mask_key("ab"), "***ab");
    }
}
