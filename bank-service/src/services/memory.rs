//! In-process store implementing every repository capability.
//!
//! A single mutex serialises each atomic unit, so every operation is
//! trivially isolated. Used by the integration tests and for running the
//! service without PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::models::{
    Account, CreateAccountParams, CreateSessionParams, CreateUserParams, CreateUserTxParams,
    CreateUserTxResult, CreateVerifyEmailParams, Entry, ListAccountsParams, Session, Transfer,
    TransferTxParams, TransferTxResult, UpdateUserParams, User, VerifyEmail, VerifyEmailTxResult,
};
use crate::services::repository::{
    AccountRepository, LedgerStore, SessionStore, UserRepository, VerifyEmailRepository,
};
use crate::services::ServiceError;

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    verify_emails: BTreeMap<i64, VerifyEmail>,
    sessions: HashMap<Uuid, Session>,
    accounts: BTreeMap<i64, Account>,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
    last_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn insert_user(&mut self, params: CreateUserParams) -> Result<User, ServiceError> {
        if self.users.contains_key(&params.username) {
            return Err(ServiceError::Duplicate("username".to_string()));
        }
        if self.users.values().any(|u| u.email == params.email) {
            return Err(ServiceError::Duplicate("email".to_string()));
        }

        let user = User {
            username: params.username,
            role: params.role,
            hashed_password: params.hashed_password,
            full_name: params.full_name,
            email: params.email,
            is_email_verified: false,
            password_changed_at: DateTime::<Utc>::MIN_UTC,
            created_at: now(),
        };
        self.users.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    fn insert_verify_email(
        &mut self,
        params: CreateVerifyEmailParams,
    ) -> Result<VerifyEmail, ServiceError> {
        if !self.users.contains_key(&params.username) {
            return Err(ServiceError::Conflict("user".to_string()));
        }

        let record = VerifyEmail {
            id: self.next_id(),
            username: params.username,
            email: params.email,
            secret_code: params.secret_code,
            is_used: false,
            created_at: now(),
            expired_at: params.expired_at,
        };
        self.verify_emails.insert(record.id, record.clone());
        Ok(record)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    pending_conflicts: Arc<AtomicU32>,
    fail_verify_email_insert: Arc<AtomicBool>,
    transfer_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transfer sleeps this long before taking the store lock,
    /// standing in for a wait on a contended row lock.
    pub fn with_transfer_delay(mut self, delay: Duration) -> Self {
        self.transfer_delay = Some(delay);
        self
    }

    /// The next `n` transfers fail with `TransactionConflict` before writing
    /// anything.
    pub fn inject_conflicts(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// The next verification-record insert fails, as a write error would.
    pub fn fail_next_verify_email_insert(&self) {
        self.fail_verify_email_insert.store(true, Ordering::SeqCst);
    }

    pub fn users(&self) -> Vec<User> {
        self.lock()
            .map(|s| s.users.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.lock().map(|s| s.transfers.clone()).unwrap_or_default()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.lock().map(|s| s.entries.clone()).unwrap_or_default()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.lock()
            .map(|s| s.sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, ServiceError> {
        self.state
            .lock()
            .map_err(|_| ServiceError::Internal(anyhow::anyhow!("memory store lock poisoned")))
    }

    fn take_verify_email_failure(&self) -> Result<(), ServiceError> {
        if self.fail_verify_email_insert.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "verify_emails insert failed"
            )));
        }
        Ok(())
    }

    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, params: CreateUserParams) -> Result<User, ServiceError> {
        self.lock()?.insert_user(params)
    }

    async fn create_user_tx(
        &self,
        params: CreateUserTxParams,
    ) -> Result<CreateUserTxResult, ServiceError> {
        let mut state = self.lock()?;

        let user = state.insert_user(params.user)?;
        let inserted = self.take_verify_email_failure().and_then(|_| {
            state.insert_verify_email(CreateVerifyEmailParams {
                username: user.username.clone(),
                email: user.email.clone(),
                secret_code: params.secret_code,
                expired_at: params.verify_email_expired_at,
            })
        });

        match inserted {
            Ok(verify_email) => Ok(CreateUserTxResult { user, verify_email }),
            Err(e) => {
                state.users.remove(&user.username);
                Err(e)
            }
        }
    }

    async fn get_user(&self, username: &str) -> Result<User, ServiceError> {
        self.lock()?
            .users
            .get(username)
            .cloned()
            .ok_or(ServiceError::NotFound("user"))
    }

    async fn update_user(&self, params: UpdateUserParams) -> Result<User, ServiceError> {
        let mut state = self.lock()?;

        if !state.users.contains_key(&params.username) {
            return Err(ServiceError::NotFound("user"));
        }
        if let Some(email) = &params.email {
            if state
                .users
                .values()
                .any(|u| &u.email == email && u.username != params.username)
            {
                return Err(ServiceError::Duplicate("email".to_string()));
            }
        }

        let user = state
            .users
            .get_mut(&params.username)
            .ok_or(ServiceError::NotFound("user"))?;
        if let Some(full_name) = params.full_name {
            user.full_name = full_name;
        }
        if let Some(email) = params.email {
            user.email = email;
        }
        if let Some(hashed_password) = params.hashed_password {
            user.hashed_password = hashed_password;
        }
        if let Some(changed_at) = params.password_changed_at {
            user.password_changed_at = changed_at;
        }
        Ok(user.clone())
    }
}

#[async_trait]
impl VerifyEmailRepository for MemoryStore {
    async fn create_verify_email(
        &self,
        params: CreateVerifyEmailParams,
    ) -> Result<VerifyEmail, ServiceError> {
        let mut state = self.lock()?;
        self.take_verify_email_failure()?;
        state.insert_verify_email(params)
    }

    async fn verify_email_tx(
        &self,
        id: i64,
        secret_code: &str,
    ) -> Result<VerifyEmailTxResult, ServiceError> {
        let mut state = self.lock()?;
        let now = now();

        let record = state
            .verify_emails
            .get_mut(&id)
            .filter(|r| r.accepts(secret_code, now))
            .ok_or_else(|| {
                ServiceError::InvalidArgument("invalid or expired verification code".to_string())
            })?;
        record.is_used = true;
        let verify_email = record.clone();

        let user = state
            .users
            .get_mut(&verify_email.username)
            .ok_or(ServiceError::NotFound("user"))?;
        user.is_email_verified = true;
        let user = user.clone();

        Ok(VerifyEmailTxResult { user, verify_email })
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, params: CreateSessionParams) -> Result<Session, ServiceError> {
        let mut state = self.lock()?;

        if state.sessions.contains_key(&params.id) {
            return Err(ServiceError::Duplicate("session".to_string()));
        }
        if !state.users.contains_key(&params.username) {
            return Err(ServiceError::Conflict("user".to_string()));
        }

        let session = Session {
            id: params.id,
            username: params.username,
            refresh_token: params.refresh_token,
            user_agent: params.user_agent,
            client_ip: params.client_ip,
            is_blocked: params.is_blocked,
            expires_at: params.expires_at,
            created_at: now(),
        };
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, ServiceError> {
        self.lock()?
            .sessions
            .get(&id)
            .cloned()
            .ok_or(ServiceError::NotFound("session"))
    }

    async fn block_session(&self, id: Uuid) -> Result<Session, ServiceError> {
        let mut state = self.lock()?;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or(ServiceError::NotFound("session"))?;
        session.is_blocked = true;
        Ok(session.clone())
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, ServiceError> {
        let mut state = self.lock()?;

        if !state.users.contains_key(&params.owner) {
            return Err(ServiceError::Conflict("account owner".to_string()));
        }
        if state
            .accounts
            .values()
            .any(|a| a.owner == params.owner && a.currency == params.currency)
        {
            return Err(ServiceError::Duplicate(
                "account in this currency for owner".to_string(),
            ));
        }
        if params.balance < 0 {
            return Err(ServiceError::InsufficientFunds);
        }

        let account = Account {
            id: state.next_id(),
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: now(),
        };
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: i64) -> Result<Account, ServiceError> {
        self.lock()?
            .accounts
            .get(&id)
            .cloned()
            .ok_or(ServiceError::NotFound("account"))
    }

    async fn list_accounts(
        &self,
        params: ListAccountsParams,
    ) -> Result<Vec<Account>, ServiceError> {
        let state = self.lock()?;
        Ok(state
            .accounts
            .values()
            .filter(|a| a.owner == params.owner)
            .skip(params.offset.max(0) as usize)
            .take(params.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn delete_account(&self, id: i64) -> Result<Account, ServiceError> {
        let mut state = self.lock()?;

        let account = state
            .accounts
            .get(&id)
            .cloned()
            .ok_or(ServiceError::NotFound("account"))?;

        if account.balance != 0 {
            return Err(ServiceError::BalanceNotZero(id));
        }
        let has_history = state.entries.iter().any(|e| e.account_id == id)
            || state
                .transfers
                .iter()
                .any(|t| t.from_account_id == id || t.to_account_id == id);
        if has_history {
            return Err(ServiceError::Conflict("account ledger history".to_string()));
        }

        state.accounts.remove(&id);
        Ok(account)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn transfer_tx(
        &self,
        params: TransferTxParams,
    ) -> Result<TransferTxResult, ServiceError> {
        if let Some(delay) = self.transfer_delay {
            tokio::time::sleep(delay).await;
        }
        if self.take_conflict() {
            return Err(ServiceError::TransactionConflict);
        }
        if params.amount <= 0 {
            return Err(ServiceError::InvalidArgument(
                "amount must be positive".to_string(),
            ));
        }

        let mut state = self.lock()?;

        // Stage against copies; nothing is written until every check passes.
        let (first, second) = params.lock_order();
        let mut staged = Vec::with_capacity(2);
        for id in [first, second] {
            let mut account = state
                .accounts
                .get(&id)
                .cloned()
                .ok_or(ServiceError::Conflict("account ledger history".to_string()))?;
            account.balance += if id == params.from_account_id {
                -params.amount
            } else {
                params.amount
            };
            staged.push(account);
        }

        let from_account = staged
            .iter()
            .find(|a| a.id == params.from_account_id)
            .cloned()
            .ok_or(ServiceError::NotFound("account"))?;
        let to_account = staged
            .iter()
            .find(|a| a.id == params.to_account_id)
            .cloned()
            .ok_or(ServiceError::NotFound("account"))?;

        if from_account.balance < 0 {
            return Err(ServiceError::InsufficientFunds);
        }

        let created_at = now();
        let transfer = Transfer {
            id: state.next_id(),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at,
        };
        let from_entry = Entry {
            id: state.next_id(),
            account_id: params.from_account_id,
            amount: -params.amount,
            created_at,
        };
        let to_entry = Entry {
            id: state.next_id(),
            account_id: params.to_account_id,
            amount: params.amount,
            created_at,
        };

        state.transfers.push(transfer.clone());
        state.entries.push(from_entry.clone());
        state.entries.push(to_entry.clone());
        state.accounts.insert(from_account.id, from_account.clone());
        state.accounts.insert(to_account.id, to_account.clone());

        Ok(TransferTxResult {
            transfer,
            from_account,
            to_account,
            from_entry,
            to_entry,
        })
    }
}
