use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    dtos::ledger::{CreateAccountRequest, ListAccountsQuery, TransferRequest},
    models::{
        Account, CreateAccountParams, Currency, ListAccountsParams, TransferTxParams,
        TransferTxResult,
    },
    services::{
        metrics::TRANSFERS_TOTAL,
        policy::{Caller, ACCOUNT_ADMIN_ROLES, ACCOUNT_ROLES, TRANSFER_ROLES},
        repository::{AccountRepository, LedgerStore},
        retry::{run_in_transaction, RetryConfig},
        ServiceError,
    },
};

/// Accounts and the atomic transfer operation, gated by the permission
/// policy on every call.
#[derive(Clone)]
pub struct LedgerService {
    accounts: Arc<dyn AccountRepository>,
    ledger: Arc<dyn LedgerStore>,
    retry: RetryConfig,
}

impl LedgerService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        ledger: Arc<dyn LedgerStore>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            accounts,
            ledger,
            retry,
        }
    }

    /// Opens a zero-balance account owned by the caller.
    #[instrument(skip(self, caller, req), fields(caller = %caller.username, currency = %req.currency))]
    pub async fn create_account(
        &self,
        caller: &Caller,
        req: CreateAccountRequest,
    ) -> Result<Account, ServiceError> {
        require(caller, ACCOUNT_ROLES)?;
        req.validate()?;
        let currency = parse_currency(&req.currency)?;

        self.accounts
            .create_account(CreateAccountParams {
                owner: caller.username.clone(),
                balance: 0,
                currency,
            })
            .await
    }

    /// Accounts the caller may not see are reported as missing.
    #[instrument(skip(self, caller), fields(caller = %caller.username))]
    pub async fn get_account(&self, caller: &Caller, id: i64) -> Result<Account, ServiceError> {
        require(caller, ACCOUNT_ROLES)?;

        let account = self.accounts.get_account(id).await?;
        if !caller.may_act_for(&account.owner, ACCOUNT_ROLES) {
            return Err(ServiceError::NotFound("account"));
        }
        Ok(account)
    }

    /// One page of the caller's own accounts, ordered by id.
    #[instrument(skip(self, caller, query), fields(caller = %caller.username, page_id = query.page_id))]
    pub async fn list_accounts(
        &self,
        caller: &Caller,
        query: ListAccountsQuery,
    ) -> Result<Vec<Account>, ServiceError> {
        require(caller, ACCOUNT_ROLES)?;
        query.validate()?;

        let offset = (query.page_id - 1)
            .checked_mul(query.page_size)
            .ok_or_else(|| ServiceError::InvalidArgument("page_id is out of range".to_string()))?;

        self.accounts
            .list_accounts(ListAccountsParams {
                owner: caller.username.clone(),
                limit: query.page_size,
                offset,
            })
            .await
    }

    /// Deletes a zero-balance account. Staff only.
    #[instrument(skip(self, caller), fields(caller = %caller.username))]
    pub async fn delete_account(&self, caller: &Caller, id: i64) -> Result<Account, ServiceError> {
        require(caller, ACCOUNT_ADMIN_ROLES)?;

        let account = self.accounts.get_account(id).await?;
        if !caller.may_act_for(&account.owner, ACCOUNT_ADMIN_ROLES) {
            return Err(ServiceError::Forbidden(
                "account belongs to another user".to_string(),
            ));
        }

        self.accounts.delete_account(id).await
    }

    /// Moves `amount` from one account to another. Everything, including
    /// retries of the atomic unit, must finish before `deadline`; on expiry
    /// the in-flight transaction is dropped and rolled back.
    #[instrument(
        skip(self, caller, req, deadline),
        fields(
            caller = %caller.username,
            from_account_id = req.from_account_id,
            to_account_id = req.to_account_id,
            amount = req.amount
        )
    )]
    pub async fn create_transfer(
        &self,
        caller: &Caller,
        req: TransferRequest,
        deadline: Instant,
    ) -> Result<TransferTxResult, ServiceError> {
        let result = match timeout_at(deadline, self.transfer(caller, req)).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout),
        };

        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        TRANSFERS_TOTAL.with_label_values(&[status]).inc();

        if let Ok(result) = &result {
            info!(
                transfer_id = result.transfer.id,
                from_balance = result.from_account.balance,
                to_balance = result.to_account.balance,
                "Transfer completed"
            );
        }

        result
    }

    async fn transfer(
        &self,
        caller: &Caller,
        req: TransferRequest,
    ) -> Result<TransferTxResult, ServiceError> {
        require(caller, TRANSFER_ROLES)?;
        req.validate()?;
        let currency = parse_currency(&req.currency)?;

        if req.from_account_id == req.to_account_id {
            return Err(ServiceError::InvalidArgument(
                "from and to accounts must differ".to_string(),
            ));
        }

        let from_account = match self.accounts.get_account(req.from_account_id).await {
            Ok(account) => account,
            Err(ServiceError::NotFound(_)) => {
                return Err(ServiceError::InvalidFromAccount(req.from_account_id))
            }
            Err(e) => return Err(e),
        };
        check_currency(&from_account, currency)?;

        if !caller.may_act_for(&from_account.owner, TRANSFER_ROLES) {
            return Err(ServiceError::Forbidden(
                "from account doesn't belong to the authenticated user".to_string(),
            ));
        }

        let to_account = match self.accounts.get_account(req.to_account_id).await {
            Ok(account) => account,
            Err(ServiceError::NotFound(_)) => {
                return Err(ServiceError::InvalidToAccount(req.to_account_id))
            }
            Err(e) => return Err(e),
        };
        check_currency(&to_account, currency)?;

        let params = TransferTxParams {
            from_account_id: from_account.id,
            to_account_id: to_account.id,
            amount: req.amount,
        };

        run_in_transaction(&self.retry, "transfer_tx", || {
            self.ledger.transfer_tx(params)
        })
        .await
    }
}

fn require(caller: &Caller, allowed: &[crate::models::Role]) -> Result<(), ServiceError> {
    if caller.has_permission(allowed) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "role {} may not perform this operation",
            caller.role
        )))
    }
}

fn parse_currency(value: &str) -> Result<Currency, ServiceError> {
    value
        .parse()
        .map_err(|e: crate::models::UnknownVariant| ServiceError::InvalidArgument(e.to_string()))
}

fn check_currency(account: &Account, expected: Currency) -> Result<(), ServiceError> {
    if account.currency != expected {
        return Err(ServiceError::CurrencyMismatch {
            account_id: account.id,
            expected,
            actual: account.currency,
        });
    }
    Ok(())
}
