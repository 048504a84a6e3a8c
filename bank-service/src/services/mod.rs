//! Services layer for bank-service.
//!
//! The auth and ledger engines depend only on the capability traits in
//! `repository` and `token`; `Database` and `MemoryStore` provide them.

pub mod auth;
mod database;
pub mod error;
pub mod ledger;
mod memory;
pub mod metrics;
pub mod notifier;
pub mod policy;
pub mod repository;
pub mod retry;
pub mod token;

pub use auth::{AuthService, AuthSettings, ClientInfo};
pub use database::Database;
pub use error::ServiceError;
pub use ledger::LedgerService;
pub use memory::MemoryStore;
pub use notifier::{LogNotifier, MockNotifier, VerificationNotice, VerificationNotifier};
pub use policy::Caller;
pub use retry::RetryConfig;
pub use token::{JwtMaker, TokenKind, TokenMaker, TokenPayload};
