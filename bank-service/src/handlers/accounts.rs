use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::ledger::{CreateAccountRequest, ListAccountsQuery},
    middleware::AuthUser,
    utils::{ValidatedJson, ValidatedQuery},
    AppState,
};

pub async fn create_account(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ValidatedJson(req): ValidatedJson<CreateAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account = state.ledger_service.create_account(&caller, req).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn get_account(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .ledger_service
        .get_account(&caller, account_id(id)?)
        .await?;
    Ok(Json(account))
}

pub async fn list_accounts(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ValidatedQuery(query): ValidatedQuery<ListAccountsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let accounts = state.ledger_service.list_accounts(&caller, query).await?;
    Ok(Json(accounts))
}

pub async fn delete_account(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .ledger_service
        .delete_account(&caller, account_id(id)?)
        .await?;
    Ok(Json(account))
}

fn account_id(id: i64) -> Result<i64, AppError> {
    if id < 1 {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "account id must be positive"
        )));
    }
    Ok(id)
}
