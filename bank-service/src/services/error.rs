use service_core::error::AppError;
use thiserror::Error;

use crate::models::Currency;
use crate::services::metrics::ERRORS_TOTAL;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email address has not been verified")]
    UnverifiedAccount,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("From account {0} not found")]
    InvalidFromAccount(i64),

    #[error("To account {0} not found")]
    InvalidToAccount(i64),

    #[error("Account {account_id} currency mismatch: {actual} vs {expected}")]
    CurrencyMismatch {
        account_id: i64,
        expected: Currency,
        actual: Currency,
    },

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Account {0} balance is not zero")]
    BalanceNotZero(i64),

    /// Serialization failure or deadlock reported by the store; the atomic
    /// unit may be rerun.
    #[error("Transaction conflict")]
    TransactionConflict,

    #[error("Deadline exceeded")]
    Timeout,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::TransactionConflict)
    }

    /// Label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::InvalidArgument(_) => "invalid_argument",
            ServiceError::Validation(_) => "validation_error",
            ServiceError::Duplicate(_) => "duplicate",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::InvalidCredentials => "invalid_credentials",
            ServiceError::UnverifiedAccount => "unverified_account",
            ServiceError::InvalidToken => "invalid_token",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::InvalidFromAccount(_) => "invalid_from_account",
            ServiceError::InvalidToAccount(_) => "invalid_to_account",
            ServiceError::CurrencyMismatch { .. } => "currency_mismatch",
            ServiceError::InsufficientFunds => "insufficient_funds",
            ServiceError::BalanceNotZero(_) => "balance_not_zero",
            ServiceError::TransactionConflict => "transaction_conflict",
            ServiceError::Timeout => "timeout",
            ServiceError::Internal(_) => "internal",
        }
    }
}

/// SQLSTATE codes the repository boundary translates.
pub mod sqlstate {
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const CHECK_VIOLATION: &str = "23514";
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
}

/// Name of the CHECK constraint guarding `accounts.balance >= 0`.
pub const BALANCE_CHECK_CONSTRAINT: &str = "accounts_balance_non_negative";

/// Domain wording for constraint names, so callers never see the schema.
fn describe_constraint(constraint: Option<&str>) -> String {
    match constraint {
        Some("users_pkey") => "username",
        Some("users_email_key") => "email",
        Some("owner_currency_key") => "account in this currency for owner",
        Some("accounts_owner_fkey") => "account owner",
        Some("entries_account_id_fkey")
        | Some("transfers_from_account_id_fkey")
        | Some("transfers_to_account_id_fkey") => "account ledger history",
        Some("sessions_username_fkey") | Some("verify_emails_username_fkey") => "user",
        Some("transfers_amount_positive") => "amount must be positive",
        _ => "record",
    }
    .to_string()
}

/// Translates a store error into the service taxonomy. Raw driver errors
/// never cross this boundary except wrapped in `Internal`.
pub fn map_db_error(err: sqlx::Error) -> ServiceError {
    match err {
        sqlx::Error::RowNotFound => ServiceError::NotFound("record"),
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            let constraint = db_err.constraint();
            match code.as_str() {
                sqlstate::UNIQUE_VIOLATION => {
                    ServiceError::Duplicate(describe_constraint(constraint))
                }
                sqlstate::FOREIGN_KEY_VIOLATION => {
                    ServiceError::Conflict(describe_constraint(constraint))
                }
                sqlstate::CHECK_VIOLATION if constraint == Some(BALANCE_CHECK_CONSTRAINT) => {
                    ServiceError::InsufficientFunds
                }
                sqlstate::CHECK_VIOLATION => {
                    ServiceError::InvalidArgument(describe_constraint(constraint))
                }
                sqlstate::SERIALIZATION_FAILURE | sqlstate::DEADLOCK_DETECTED => {
                    ServiceError::TransactionConflict
                }
                _ => ServiceError::Internal(anyhow::anyhow!("database error: {}", db_err)),
            }
        }
        other => ServiceError::Internal(anyhow::anyhow!("database error: {}", other)),
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();

        match err {
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::InvalidArgument(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::Validation(e) => AppError::ValidationError(e),
            ServiceError::Duplicate(msg) => {
                AppError::Duplicate(anyhow::anyhow!("already exists: {}", msg))
            }
            ServiceError::Conflict(msg) => {
                AppError::Conflict(anyhow::anyhow!("conflicts with existing records: {}", msg))
            }
            ServiceError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("invalid username or password"))
            }
            ServiceError::UnverifiedAccount => {
                AppError::Forbidden(anyhow::anyhow!("email address has not been verified"))
            }
            ServiceError::InvalidToken => AppError::Unauthorized(anyhow::anyhow!("invalid token")),
            ServiceError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            e @ ServiceError::InvalidFromAccount(_) | e @ ServiceError::InvalidToAccount(_) => {
                AppError::NotFound(anyhow::anyhow!(e.to_string()))
            }
            e @ ServiceError::CurrencyMismatch { .. } => {
                AppError::CurrencyMismatch(anyhow::anyhow!(e.to_string()))
            }
            ServiceError::InsufficientFunds => {
                AppError::InsufficientFunds(anyhow::anyhow!("insufficient funds"))
            }
            e @ ServiceError::BalanceNotZero(_) => {
                AppError::BalanceNotZero(anyhow::anyhow!(e.to_string()))
            }
            ServiceError::TransactionConflict => {
                AppError::InternalError(anyhow::anyhow!("transaction conflict"))
            }
            ServiceError::Timeout => AppError::Timeout,
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn token_failures_collapse_to_unauthorized() {
        let app: AppError = ServiceError::InvalidToken.into();
        assert_eq!(app.code(), "unauthorized");
        let app: AppError = ServiceError::InvalidCredentials.into();
        assert_eq!(app.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn ledger_failures_have_stable_codes() {
        let cases: Vec<(ServiceError, &str)> = vec![
            (ServiceError::InsufficientFunds, "insufficient_funds"),
            (ServiceError::BalanceNotZero(1), "balance_not_zero"),
            (ServiceError::InvalidFromAccount(1), "not_found"),
            (
                ServiceError::CurrencyMismatch {
                    account_id: 1,
                    expected: Currency::Usd,
                    actual: Currency::Eur,
                },
                "currency_mismatch",
            ),
            (ServiceError::Duplicate("x".into()), "duplicate"),
            (ServiceError::Conflict("x".into()), "conflict"),
            (ServiceError::Timeout, "timeout"),
            (ServiceError::TransactionConflict, "internal"),
        ];
        for (err, code) in cases {
            assert_eq!(AppError::from(err).code(), code);
        }
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(ServiceError::TransactionConflict.is_retryable());
        assert!(!ServiceError::InsufficientFunds.is_retryable());
        assert!(!ServiceError::Timeout.is_retryable());
    }

    #[test]
    fn constraint_names_are_translated() {
        assert_eq!(describe_constraint(Some("users_email_key")), "email");
        assert_eq!(
            describe_constraint(Some("entries_account_id_fkey")),
            "account ledger history"
        );
        assert_eq!(describe_constraint(Some("some_new_index")), "record");
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(
            map_db_error(sqlx::Error::RowNotFound),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            map_db_error(sqlx::Error::PoolTimedOut),
            ServiceError::Internal(_)
        ));
    }
}
