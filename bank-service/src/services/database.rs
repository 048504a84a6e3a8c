//! PostgreSQL store for bank-service.

use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgExecutor, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    Account, CreateAccountParams, CreateSessionParams, CreateUserParams, CreateUserTxParams,
    CreateUserTxResult, CreateVerifyEmailParams, Entry, ListAccountsParams, Session, Transfer,
    TransferTxParams, TransferTxResult, UpdateUserParams, User, VerifyEmail, VerifyEmailTxResult,
};
use crate::services::error::map_db_error;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::{
    AccountRepository, LedgerStore, SessionStore, UserRepository, VerifyEmailRepository,
};
use crate::services::ServiceError;

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const USER_COLUMNS: &str = "username, role, hashed_password, full_name, email, \
     is_email_verified, password_changed_at, created_at";
const SESSION_COLUMNS: &str = "id, username, refresh_token, user_agent, client_ip, \
     is_blocked, expires_at, created_at";
const VERIFY_EMAIL_COLUMNS: &str = "id, username, email, secret_code, is_used, created_at, expired_at";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "bank-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn insert_user<'e>(
        executor: impl PgExecutor<'e>,
        params: &CreateUserParams,
    ) -> Result<User, ServiceError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, role, hashed_password, full_name, email)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&params.username)
        .bind(params.role.as_str())
        .bind(&params.hashed_password)
        .bind(&params.full_name)
        .bind(&params.email)
        .fetch_one(executor)
        .await
        .map_err(map_db_error)
    }

    async fn insert_verify_email<'e>(
        executor: impl PgExecutor<'e>,
        params: &CreateVerifyEmailParams,
    ) -> Result<VerifyEmail, ServiceError> {
        sqlx::query_as::<_, VerifyEmail>(&format!(
            r#"
            INSERT INTO verify_emails (username, email, secret_code, expired_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            VERIFY_EMAIL_COLUMNS
        ))
        .bind(&params.username)
        .bind(&params.email)
        .bind(&params.secret_code)
        .bind(params.expired_at)
        .fetch_one(executor)
        .await
        .map_err(map_db_error)
    }

    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        account_id: i64,
        amount: i64,
    ) -> Result<Entry, ServiceError> {
        sqlx::query_as::<_, Entry>(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_db_error)
    }

    /// Row-locking balance update. A negative result trips the balance CHECK
    /// constraint, which maps to `InsufficientFunds`.
    async fn add_account_balance(
        tx: &mut Transaction<'_, Postgres>,
        account_id: i64,
        amount: i64,
    ) -> Result<Account, ServiceError> {
        sqlx::query_as::<_, Account>(&format!(
            "UPDATE accounts SET balance = balance + $2 WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .bind(amount)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_db_error)?
        .ok_or(ServiceError::NotFound("account"))
    }
}

#[async_trait]
impl UserRepository for Database {
    #[instrument(skip(self, params), fields(username = %params.username))]
    async fn create_user(&self, params: CreateUserParams) -> Result<User, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["create_user"])
            .start_timer();

        Self::insert_user(&self.pool, &params).await
    }

    #[instrument(skip(self, params), fields(username = %params.user.username))]
    async fn create_user_tx(
        &self,
        params: CreateUserTxParams,
    ) -> Result<CreateUserTxResult, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["create_user_tx"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        let user = Self::insert_user(&mut *tx, &params.user).await?;
        let verify_email = Self::insert_verify_email(
            &mut *tx,
            &CreateVerifyEmailParams {
                username: user.username.clone(),
                email: user.email.clone(),
                secret_code: params.secret_code,
                expired_at: params.verify_email_expired_at,
            },
        )
        .await?;

        tx.commit().await.map_err(map_db_error)?;

        Ok(CreateUserTxResult { user, verify_email })
    }

    #[instrument(skip(self, params), fields(username = %params.username))]
    async fn update_user(&self, params: UpdateUserParams) -> Result<User, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["update_user"])
            .start_timer();

        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET full_name = COALESCE($2, full_name),
                email = COALESCE($3, email),
                hashed_password = COALESCE($4, hashed_password),
                password_changed_at = COALESCE($5, password_changed_at)
            WHERE username = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&params.username)
        .bind(&params.full_name)
        .bind(&params.email)
        .bind(&params.hashed_password)
        .bind(params.password_changed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?
        .ok_or(ServiceError::NotFound("user"))
    }

    #[instrument(skip(self))]
    async fn get_user(&self, username: &str) -> Result<User, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["get_user"])
            .start_timer();

        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE username = $1",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?
        .ok_or(ServiceError::NotFound("user"))
    }
}

#[async_trait]
impl VerifyEmailRepository for Database {
    #[instrument(skip(self, params), fields(username = %params.username))]
    async fn create_verify_email(
        &self,
        params: CreateVerifyEmailParams,
    ) -> Result<VerifyEmail, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["create_verify_email"])
            .start_timer();

        Self::insert_verify_email(&self.pool, &params).await
    }

    #[instrument(skip(self, secret_code))]
    async fn verify_email_tx(
        &self,
        id: i64,
        secret_code: &str,
    ) -> Result<VerifyEmailTxResult, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["verify_email_tx"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        let verify_email = sqlx::query_as::<_, VerifyEmail>(&format!(
            r#"
            UPDATE verify_emails
            SET is_used = TRUE
            WHERE id = $1
              AND secret_code = $2
              AND is_used = FALSE
              AND expired_at > now()
            RETURNING {}
            "#,
            VERIFY_EMAIL_COLUMNS
        ))
        .bind(id)
        .bind(secret_code)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| {
            ServiceError::InvalidArgument("invalid or expired verification code".to_string())
        })?;

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET is_email_verified = TRUE WHERE username = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&verify_email.username)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_error)?;

        tx.commit().await.map_err(map_db_error)?;

        Ok(VerifyEmailTxResult { user, verify_email })
    }
}

#[async_trait]
impl SessionStore for Database {
    #[instrument(skip(self, params), fields(session_id = %params.id, username = %params.username))]
    async fn create_session(&self, params: CreateSessionParams) -> Result<Session, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["create_session"])
            .start_timer();

        sqlx::query_as::<_, Session>(&format!(
            r#"
            INSERT INTO sessions (id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(params.id)
        .bind(&params.username)
        .bind(&params.refresh_token)
        .bind(&params.user_agent)
        .bind(&params.client_ip)
        .bind(params.is_blocked)
        .bind(params.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)
    }

    #[instrument(skip(self))]
    async fn get_session(&self, id: Uuid) -> Result<Session, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["get_session"])
            .start_timer();

        sqlx::query_as::<_, Session>(&format!(
            "SELECT {} FROM sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?
        .ok_or(ServiceError::NotFound("session"))
    }

    #[instrument(skip(self))]
    async fn block_session(&self, id: Uuid) -> Result<Session, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["block_session"])
            .start_timer();

        sqlx::query_as::<_, Session>(&format!(
            "UPDATE sessions SET is_blocked = TRUE WHERE id = $1 RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?
        .ok_or(ServiceError::NotFound("session"))
    }
}

#[async_trait]
impl AccountRepository for Database {
    #[instrument(skip(self, params), fields(owner = %params.owner, currency = %params.currency))]
    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(&params.owner)
        .bind(params.balance)
        .bind(params.currency.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        info!(account_id = account.id, "Account created");
        Ok(account)
    }

    #[instrument(skip(self))]
    async fn get_account(&self, id: i64) -> Result<Account, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?
        .ok_or(ServiceError::NotFound("account"))
    }

    #[instrument(skip(self, params), fields(owner = %params.owner))]
    async fn list_accounts(
        &self,
        params: ListAccountsParams,
    ) -> Result<Vec<Account>, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["list_accounts"])
            .start_timer();

        sqlx::query_as::<_, Account>(&format!(
            r#"
            SELECT {} FROM accounts
            WHERE owner = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(&params.owner)
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)
    }

    #[instrument(skip(self))]
    async fn delete_account(&self, id: i64) -> Result<Account, ServiceError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["delete_account"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        // Holding the row lock keeps a concurrent transfer from crediting the
        // account between the balance check and the delete.
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?
        .ok_or(ServiceError::NotFound("account"))?;

        if account.balance != 0 {
            return Err(ServiceError::BalanceNotZero(id));
        }

        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        tx.commit().await.map_err(map_db_error)?;

        info!(account_id = id, "Account deleted");
        Ok(account)
    }
}

#[async_trait]
impl LedgerStore for Database {
    #[instrument(
        skip(self, params),
        fields(
            from_account_id = params.from_account_id,
            to_account_id = params.to_account_id,
            amount = params.amount
        )
    )]
    async fn transfer_tx(
        &self,
        params: TransferTxParams,
    ) -> Result<TransferTxResult, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["transfer_tx"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        let transfer = sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_error)?;

        let from_entry = Self::insert_entry(&mut tx, params.from_account_id, -params.amount).await?;
        let to_entry = Self::insert_entry(&mut tx, params.to_account_id, params.amount).await?;

        // Lower id first, whatever the direction, so two opposite transfers
        // over the same pair queue on the same row instead of deadlocking.
        let (first, second) = params.lock_order();
        let delta = |id: i64| {
            if id == params.from_account_id {
                -params.amount
            } else {
                params.amount
            }
        };

        let first_account = Self::add_account_balance(&mut tx, first, delta(first)).await?;
        let second_account = Self::add_account_balance(&mut tx, second, delta(second)).await?;

        let (from_account, to_account) = if first == params.from_account_id {
            (first_account, second_account)
        } else {
            (second_account, first_account)
        };

        if from_account.balance < 0 {
            warn!(account_id = from_account.id, "Debit would overdraw account");
            return Err(ServiceError::InsufficientFunds);
        }

        tx.commit().await.map_err(map_db_error)?;
        timer.observe_duration();

        info!(transfer_id = transfer.id, "Transfer committed");

        Ok(TransferTxResult {
            transfer,
            from_account,
            to_account,
            from_entry,
            to_entry,
        })
    }
}
