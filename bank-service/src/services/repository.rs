//! Storage capabilities the engines depend on.
//!
//! `Database` implements them against PostgreSQL and `MemoryStore` in
//! process. Implementations translate their own failures into
//! `ServiceError` before returning.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Account, CreateAccountParams, CreateSessionParams, CreateUserParams, CreateUserTxParams,
    CreateUserTxResult, CreateVerifyEmailParams, ListAccountsParams, Session, TransferTxParams,
    TransferTxResult, UpdateUserParams, User, VerifyEmail, VerifyEmailTxResult,
};
use crate::services::ServiceError;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// `Duplicate` when the username or email is taken.
    async fn create_user(&self, params: CreateUserParams) -> Result<User, ServiceError>;

    /// Inserts the user and its pending verification record as one unit.
    /// When either insert fails neither row is kept.
    async fn create_user_tx(
        &self,
        params: CreateUserTxParams,
    ) -> Result<CreateUserTxResult, ServiceError>;

    async fn get_user(&self, username: &str) -> Result<User, ServiceError>;

    /// `NotFound` for an unknown username, `Duplicate` when the new email
    /// is taken.
    async fn update_user(&self, params: UpdateUserParams) -> Result<User, ServiceError>;
}

#[async_trait]
pub trait VerifyEmailRepository: Send + Sync {
    async fn create_verify_email(
        &self,
        params: CreateVerifyEmailParams,
    ) -> Result<VerifyEmail, ServiceError>;

    /// Atomically consumes the pending record matching `id` and
    /// `secret_code` and marks its user verified. A used, expired or
    /// unknown record fails with `InvalidArgument`.
    async fn verify_email_tx(
        &self,
        id: i64,
        secret_code: &str,
    ) -> Result<VerifyEmailTxResult, ServiceError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, params: CreateSessionParams) -> Result<Session, ServiceError>;

    async fn get_session(&self, id: Uuid) -> Result<Session, ServiceError>;

    /// Sets `is_blocked`; the row itself is kept.
    async fn block_session(&self, id: Uuid) -> Result<Session, ServiceError>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// `Duplicate` when the owner already holds an account in the currency.
    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, ServiceError>;

    async fn get_account(&self, id: i64) -> Result<Account, ServiceError>;

    /// Owner's accounts ordered by id.
    async fn list_accounts(&self, params: ListAccountsParams)
        -> Result<Vec<Account>, ServiceError>;

    /// Deletes the account if its balance is zero, re-checking the balance
    /// under the same lock that performs the delete.
    async fn delete_account(&self, id: i64) -> Result<Account, ServiceError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// One atomic unit: insert the transfer and both entries, then apply the
    /// balance deltas lower account id first. A debit that would leave the
    /// source negative fails with `InsufficientFunds` and nothing is written.
    async fn transfer_tx(&self, params: TransferTxParams)
        -> Result<TransferTxResult, ServiceError>;
}
