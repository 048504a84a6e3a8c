use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Account, Entry, Transfer};
use crate::utils::validate_currency;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(custom(function = "validate_currency"))]
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ListAccountsQuery {
    #[validate(range(min = 1, max = 1_000_000, message = "page_id must be between 1 and 1000000"))]
    pub page_id: i64,

    #[validate(range(min = 5, max = 10, message = "page_size must be between 5 and 10"))]
    pub page_size: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TransferRequest {
    #[validate(range(min = 1, message = "from_account_id must be positive"))]
    pub from_account_id: i64,

    #[validate(range(min = 1, message = "to_account_id must be positive"))]
    pub to_account_id: i64,

    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount: i64,

    #[validate(custom(function = "validate_currency"))]
    pub currency: String,
}

/// Transfer outcome returned to clients.
#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

impl From<crate::models::TransferTxResult> for TransferResponse {
    fn from(r: crate::models::TransferTxResult) -> Self {
        Self {
            transfer: r.transfer,
            from_account: r.from_account,
            to_account: r.to_account,
            from_entry: r.from_entry,
            to_entry: r.to_entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_request_rules() {
        let ok = TransferRequest {
            from_account_id: 1,
            to_account_id: 2,
            amount: 10,
            currency: "USD".into(),
        };
        assert!(ok.validate().is_ok());

        let bad = TransferRequest {
            from_account_id: 0,
            to_account_id: 2,
            amount: -5,
            currency: "GBP".into(),
        };
        let errors = bad.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("from_account_id"));
        assert!(fields.contains_key("amount"));
        assert!(fields.contains_key("currency"));
        assert!(!fields.contains_key("to_account_id"));
    }

    #[test]
    fn page_size_is_bounded() {
        let q = ListAccountsQuery {
            page_id: 1,
            page_size: 11,
        };
        assert!(q.validate().is_err());
        let q = ListAccountsQuery {
            page_id: 1,
            page_size: 5,
        };
        assert!(q.validate().is_ok());
    }
}
