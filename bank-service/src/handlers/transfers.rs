use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;
use tokio::time::Instant;

use crate::{
    dtos::ledger::{TransferRequest, TransferResponse},
    middleware::AuthUser,
    utils::ValidatedJson,
    AppState,
};

pub async fn create_transfer(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ValidatedJson(req): ValidatedJson<TransferRequest>,
) -> Result<impl IntoResponse, AppError> {
    let deadline = Instant::now() + state.config.ledger.request_timeout();

    let result = state
        .ledger_service
        .create_transfer(&caller, req, deadline)
        .await?;
    Ok((StatusCode::CREATED, Json(TransferResponse::from(result))))
}
