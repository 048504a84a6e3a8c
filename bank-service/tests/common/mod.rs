//! Common test utilities for bank-service integration tests.
#![allow(dead_code)]

use bank_service::{
    config::BankConfig,
    dtos::auth::{CreateUserRequest, LoginRequest, LoginResponse, VerifyEmailQuery},
    models::{Account, CreateAccountParams, CreateUserParams, CreateVerifyEmailParams, Currency, Role},
    services::{
        repository::{AccountRepository, UserRepository, VerifyEmailRepository},
        AuthService, AuthSettings, Caller, ClientInfo, JwtMaker, LedgerService, MemoryStore,
        MockNotifier, RetryConfig, TokenMaker,
    },
    utils::{hash_password, random_string, Password},
    AppState,
};
use chrono::{Duration, Utc};
use secrecy::Secret;
use service_core::config::Config as CommonConfig;
use std::sync::{Arc, Once};
pub const PASSWORD: &str = "secret123";
pub const SYMMETRIC_KEY: &str = "0123456789abcdef0123456789abcdef";

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,bank_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestEnv {
    pub store: MemoryStore,
    pub notifier: MockNotifier,
    pub tokens: Arc<dyn TokenMaker>,
    pub auth: AuthService,
    pub ledger: LedgerService,
}

pub fn test_config() -> BankConfig {
    let common = CommonConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
    };
    BankConfig::from_lookup(common, |key| match key {
        "TOKEN_SYMMETRIC_KEY" => Some(SYMMETRIC_KEY.to_string()),
        "LOG_LEVEL" => Some("debug".to_string()),
        _ => None,
    })
    .expect("Failed to build test config")
}

pub fn spawn_env() -> TestEnv {
    spawn_env_with(MemoryStore::new(), AuthSettings::default())
}

pub fn spawn_env_with(store: MemoryStore, settings: AuthSettings) -> TestEnv {
    init_tracing();

    let notifier = MockNotifier::default();
    let tokens: Arc<dyn TokenMaker> = Arc::new(
        JwtMaker::new(&Secret::new(SYMMETRIC_KEY.to_string())).expect("Failed to build token maker"),
    );

    let auth = AuthService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        tokens.clone(),
        Arc::new(notifier.clone()),
        settings,
    );
    let retry = RetryConfig {
        add_jitter: false,
        initial_backoff: std::time::Duration::from_millis(1),
        ..RetryConfig::default()
    };
    let ledger = LedgerService::new(Arc::new(store.clone()), Arc::new(store.clone()), retry);

    TestEnv {
        store,
        notifier,
        tokens,
        auth,
        ledger,
    }
}

/// Memory-backed state for driving the router.
pub fn spawn_state() -> (AppState, MemoryStore, MockNotifier) {
    init_tracing();

    let store = MemoryStore::new();
    let notifier = MockNotifier::default();
    let state = AppState::new(test_config(), store.clone(), Arc::new(notifier.clone()))
        .expect("Failed to build app state");
    (state, store, notifier)
}

pub fn unique_username(prefix: &str) -> String {
    format!("{}_{}", prefix, random_string(8).to_lowercase())
}

pub fn create_user_request(username: &str) -> CreateUserRequest {
    CreateUserRequest {
        username: username.to_string(),
        password: PASSWORD.to_string(),
        full_name: format!("{} Test", username),
        email: format!("{}@example.com", username),
    }
}

pub fn login_request(username: &str) -> LoginRequest {
    LoginRequest {
        username: username.to_string(),
        password: PASSWORD.to_string(),
    }
}

pub fn client() -> ClientInfo {
    ClientInfo {
        user_agent: "integration-test".to_string(),
        client_ip: "127.0.0.1".to_string(),
    }
}

/// Waits for the spawned verification notice of `username`.
pub async fn wait_for_notice(
    notifier: &MockNotifier,
    username: &str,
) -> bank_service::services::VerificationNotice {
    for _ in 0..50 {
        if let Some(notice) = notifier.last_for(username) {
            return notice;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("no verification notice sent to {}", username);
}

/// Registers a depositor through the auth engine and verifies their email
/// with the code from the notice.
pub async fn register_verified(env: &TestEnv, username: &str) {
    env.auth
        .create_user(create_user_request(username))
        .await
        .expect("Failed to create user");

    let notice = wait_for_notice(&env.notifier, username).await;
    env.auth
        .verify_email(VerifyEmailQuery {
            email_id: notice.email_id,
            secret_code: notice.secret_code,
        })
        .await
        .expect("Failed to verify email");
}

pub async fn login(env: &TestEnv, username: &str) -> LoginResponse {
    env.auth
        .login(login_request(username), client())
        .await
        .expect("Failed to log in")
}

/// Seeds a verified user with any role directly in the store.
pub async fn seed_user<S>(store: &S, username: &str, role: Role)
where
    S: UserRepository + VerifyEmailRepository,
{
    let hashed = hash_password(&Password::new(PASSWORD.to_string()))
        .expect("Failed to hash password")
        .into_string();

    store
        .create_user(CreateUserParams {
            username: username.to_string(),
            role,
            hashed_password: hashed,
            full_name: format!("{} Test", username),
            email: format!("{}@example.com", username),
        })
        .await
        .expect("Failed to seed user");

    let secret_code = random_string(32);
    let record = store
        .create_verify_email(CreateVerifyEmailParams {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            secret_code: secret_code.clone(),
            expired_at: Utc::now() + Duration::minutes(15),
        })
        .await
        .expect("Failed to seed verification");
    store
        .verify_email_tx(record.id, &secret_code)
        .await
        .expect("Failed to verify seeded user");
}

pub fn caller(username: &str, role: Role) -> Caller {
    Caller {
        username: username.to_string(),
        role,
    }
}

/// Opens an account with an opening balance, bypassing the engine.
pub async fn fund_account<S: AccountRepository>(
    store: &S,
    owner: &str,
    currency: Currency,
    balance: i64,
) -> Account {
    store
        .create_account(CreateAccountParams {
            owner: owner.to_string(),
            balance,
            currency,
        })
        .await
        .expect("Failed to create account")
}
