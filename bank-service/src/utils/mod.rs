pub mod password;
pub mod random;
pub mod validation;

pub use password::{hash_password, verify_password, Password, PasswordError, PasswordHashString};
pub use random::random_string;
pub use validation::{validate_currency, validate_username, ValidatedJson, ValidatedQuery};
