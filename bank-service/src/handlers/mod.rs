//! HTTP handlers for bank-service.

pub mod accounts;
pub mod metrics;
pub mod transfers;
pub mod users;

pub use accounts::*;
pub use transfers::*;
pub use users::*;
