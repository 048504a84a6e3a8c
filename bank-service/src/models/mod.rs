pub mod account;
pub mod role;
pub mod session;
pub mod transfer;
pub mod user;
pub mod verify_email;

pub use account::{Account, CreateAccountParams, Currency, ListAccountsParams};
pub use role::Role;
pub use session::{CreateSessionParams, Session};
pub use transfer::{Entry, Transfer, TransferTxParams, TransferTxResult};
pub use user::{
    CreateUserParams, CreateUserTxParams, CreateUserTxResult, UpdateUserParams, User, UserResponse,
};
pub use verify_email::{CreateVerifyEmailParams, VerifyEmail, VerifyEmailTxResult};

/// Returned when a stored or submitted string names no known variant.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
