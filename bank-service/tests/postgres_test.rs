//! PostgreSQL-backed store tests.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -p bank-service -- --ignored

mod common;

use bank_service::{
    dtos::ledger::TransferRequest,
    models::{
        CreateUserParams, CreateUserTxParams, Currency, Role, TransferTxParams, UpdateUserParams,
    },
    services::{
        repository::{AccountRepository, LedgerStore, UserRepository},
        Database, MockNotifier, ServiceError,
    },
    AppState,
};
use common::{caller, fund_account, init_tracing, seed_user, test_config, unique_username};
use futures::future::join_all;
use serial_test::serial;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

async fn connect() -> Database {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run PostgreSQL tests");
    let db = Database::new(&database_url, 10, 1)
        .await
        .expect("Failed to connect to PostgreSQL");
    db.run_migrations().await.expect("Failed to run migrations");
    db
}

async fn two_accounts(db: &Database, a_balance: i64, b_balance: i64) -> (String, i64, String, i64) {
    let alice = unique_username("alice");
    let bob = unique_username("bob");
    seed_user(db, &alice, Role::Depositor).await;
    seed_user(db, &bob, Role::Depositor).await;
    let a = fund_account(db, &alice, Currency::Usd, a_balance).await.id;
    let b = fund_account(db, &bob, Currency::Usd, b_balance).await.id;
    (alice, a, bob, b)
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_transfer_tx_writes_atomically() {
    let db = connect().await;
    let (_, a, _, b) = two_accounts(&db, 100, 0).await;

    let result = db
        .transfer_tx(TransferTxParams {
            from_account_id: a,
            to_account_id: b,
            amount: 40,
        })
        .await
        .expect("Transfer failed");

    assert_eq!(result.from_account.balance, 60);
    assert_eq!(result.to_account.balance, 40);
    assert_eq!(result.from_entry.amount + result.to_entry.amount, 0);

    let overdraw = db
        .transfer_tx(TransferTxParams {
            from_account_id: a,
            to_account_id: b,
            amount: 61,
        })
        .await;
    assert!(matches!(overdraw, Err(ServiceError::InsufficientFunds)));
    assert_eq!(db.get_account(a).await.unwrap().balance, 60);
    assert_eq!(db.get_account(b).await.unwrap().balance, 40);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_duplicate_and_missing_rows_map_to_domain_errors() {
    let db = connect().await;
    let (alice, a, _, _) = two_accounts(&db, 0, 0).await;

    let dup = db
        .create_account(bank_service::models::CreateAccountParams {
            owner: alice,
            balance: 0,
            currency: Currency::Usd,
        })
        .await;
    assert!(matches!(dup, Err(ServiceError::Duplicate(_))));

    let orphan = db
        .create_account(bank_service::models::CreateAccountParams {
            owner: unique_username("ghost"),
            balance: 0,
            currency: Currency::Usd,
        })
        .await;
    assert!(matches!(orphan, Err(ServiceError::Conflict(_))));

    let missing = db.get_account(a + 1_000_000).await;
    assert!(matches!(missing, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_concurrent_opposing_transfers_do_not_deadlock() {
    let db = connect().await;
    let (alice, a, bob, b) = two_accounts(&db, 1_000, 1_000).await;

    let state = AppState::new(test_config(), db.clone(), Arc::new(MockNotifier::default()))
        .expect("Failed to build state");
    let ledger = state.ledger_service.clone();

    let transfers = (0..20).map(|i| {
        let ledger = ledger.clone();
        let (from, to, who) = if i % 2 == 0 {
            (a, b, alice.clone())
        } else {
            (b, a, bob.clone())
        };
        tokio::spawn(async move {
            ledger
                .create_transfer(
                    &caller(&who, Role::Depositor),
                    TransferRequest {
                        from_account_id: from,
                        to_account_id: to,
                        amount: 10,
                        currency: "USD".to_string(),
                    },
                    Instant::now() + Duration::from_secs(10),
                )
                .await
        })
    });

    for result in join_all(transfers).await {
        result.unwrap().expect("Transfer failed");
    }

    assert_eq!(db.get_account(a).await.unwrap().balance, 1_000);
    assert_eq!(db.get_account(b).await.unwrap().balance, 1_000);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_delete_account_checks_balance_under_lock() {
    let db = connect().await;
    let (_, a, _, b) = two_accounts(&db, 10, 0).await;

    let res = db.delete_account(a).await;
    assert!(matches!(res, Err(ServiceError::BalanceNotZero(id)) if id == a));

    let deleted = db.delete_account(b).await.expect("Failed to delete");
    assert_eq!(deleted.id, b);
    assert!(matches!(db.get_account(b).await, Err(ServiceError::NotFound(_))));
}

fn new_user(username: &str) -> CreateUserParams {
    CreateUserParams {
        username: username.to_string(),
        role: Role::Depositor,
        hashed_password: "not-a-real-hash".to_string(),
        full_name: format!("{} Test", username),
        email: format!("{}@example.com", username),
    }
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_create_user_tx_rolls_back_user_on_verification_failure() {
    let db = connect().await;
    let username = unique_username("alice");

    // Postgres refuses NUL bytes in text, so the second insert fails.
    let res = db
        .create_user_tx(CreateUserTxParams {
            user: new_user(&username),
            secret_code: "bad\0code".to_string(),
            verify_email_expired_at: Utc::now() + chrono::Duration::minutes(15),
        })
        .await;
    assert!(res.is_err());
    assert!(matches!(
        db.get_user(&username).await,
        Err(ServiceError::NotFound(_))
    ));

    let created = db
        .create_user_tx(CreateUserTxParams {
            user: new_user(&username),
            secret_code: "a".repeat(32),
            verify_email_expired_at: Utc::now() + chrono::Duration::minutes(15),
        })
        .await
        .expect("Failed to create user");
    assert_eq!(created.verify_email.username, username);
    assert!(!created.user.is_email_verified);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_update_user_columns() {
    let db = connect().await;
    let alice = unique_username("alice");
    let bob = unique_username("bob");
    seed_user(&db, &alice, Role::Depositor).await;
    seed_user(&db, &bob, Role::Depositor).await;

    let changed_at = Utc::now();
    let user = db
        .update_user(UpdateUserParams {
            username: alice.clone(),
            hashed_password: Some("rehashed".to_string()),
            password_changed_at: Some(changed_at),
            ..Default::default()
        })
        .await
        .expect("Failed to update user");
    assert_eq!(user.hashed_password, "rehashed");
    assert_eq!(user.full_name, format!("{} Test", alice));
    assert!(user.password_changed_at > chrono::DateTime::<Utc>::MIN_UTC);

    let taken = db
        .update_user(UpdateUserParams {
            username: alice.clone(),
            email: Some(format!("{}@example.com", bob)),
            ..Default::default()
        })
        .await;
    assert!(matches!(taken, Err(ServiceError::Duplicate(_))));

    let missing = db
        .update_user(UpdateUserParams {
            username: unique_username("nobody"),
            full_name: Some("Nobody".to_string()),
            ..Default::default()
        })
        .await;
    assert!(matches!(missing, Err(ServiceError::NotFound(_))));
}
