use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use std::net::SocketAddr;

use crate::{
    dtos::auth::{
        CreateUserRequest, LoginRequest, LogoutRequest, RenewAccessTokenRequest,
        UpdateUserRequest, VerifyEmailQuery,
    },
    middleware::AuthUser,
    services::ClientInfo,
    utils::{ValidatedJson, ValidatedQuery},
    AppState,
};

pub async fn create_user(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth_service.create_user(req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client = ClientInfo {
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        client_ip: client_ip(&headers, connect_info),
    };

    let res = state.auth_service.login(req, client).await?;
    Ok(Json(res))
}

pub async fn renew_access_token(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RenewAccessTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state
        .auth_service
        .renew_access_token(&req.refresh_token)
        .await?;
    Ok(Json(res))
}

pub async fn logout(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ValidatedJson(req): ValidatedJson<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .revoke_session(&caller, &req.refresh_token)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<VerifyEmailQuery>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth_service.verify_email(query).await?;
    Ok(Json(res))
}

pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth_service.get_user(&caller, &username).await?;
    Ok(Json(user))
}

pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .auth_service
        .update_user(&caller, &username, req)
        .await?;
    Ok(Json(user))
}

/// Peer address, falling back to the first `x-forwarded-for` hop when the
/// server was not started with connect info.
fn client_ip(headers: &HeaderMap, connect_info: Option<ConnectInfo<SocketAddr>>) -> String {
    if let Some(ConnectInfo(addr)) = connect_info {
        return addr.ip().to_string();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}
