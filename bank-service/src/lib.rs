pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::from_fn,
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use service_core::error::AppError;
use service_core::middleware::{
    request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::BankConfig;
use crate::services::{
    repository::{
        AccountRepository, LedgerStore, SessionStore, UserRepository, VerifyEmailRepository,
    },
    AuthService, AuthSettings, Database, JwtMaker, LedgerService, RetryConfig, TokenMaker,
    VerificationNotifier,
};

#[derive(Clone)]
pub struct AppState {
    pub config: BankConfig,
    pub auth_service: AuthService,
    pub ledger_service: LedgerService,
    pub tokens: Arc<dyn TokenMaker>,
    /// Set when the state is backed by PostgreSQL; used by the health check.
    pub db: Option<Database>,
}

impl AppState {
    /// Wires both engines over one store. The token maker is keyed from
    /// `config.token`.
    pub fn new<S>(
        config: BankConfig,
        store: S,
        notifier: Arc<dyn VerificationNotifier>,
    ) -> Result<Self, AppError>
    where
        S: UserRepository
            + VerifyEmailRepository
            + SessionStore
            + AccountRepository
            + LedgerStore
            + Clone
            + 'static,
    {
        let tokens: Arc<dyn TokenMaker> = Arc::new(
            JwtMaker::new(&config.token.symmetric_key).map_err(AppError::ConfigError)?,
        );

        let settings = AuthSettings {
            access_token_duration: config.token.access_token_duration(),
            refresh_token_duration: config.token.refresh_token_duration(),
            verify_email_expiry: Duration::minutes(config.verify_email.expiry_minutes),
            verify_email_base_url: config.verify_email.base_url.clone(),
        };

        let auth_service = AuthService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            tokens.clone(),
            notifier,
            settings,
        );

        let ledger_service = LedgerService::new(
            Arc::new(store.clone()),
            Arc::new(store),
            RetryConfig::with_max_retries(config.ledger.tx_max_retries),
        );

        Ok(Self {
            config,
            auth_service,
            ledger_service,
            tokens,
            db: None,
        })
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/users", post(handlers::create_user))
        .route("/users/login", post(handlers::login))
        .route("/users/logout", post(handlers::logout))
        .route(
            "/users/:username",
            get(handlers::get_user).patch(handlers::update_user),
        )
        .route("/tokens/renew_access", post(handlers::renew_access_token))
        .route("/verify_email", get(handlers::verify_email))
        .route(
            "/accounts",
            post(handlers::create_account).get(handlers::list_accounts),
        )
        .route(
            "/accounts/:id",
            get(handlers::get_account).delete(handlers::delete_account),
        )
        .route("/transfers", post(handlers::create_transfer));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(HeaderValue::from_static("*"))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(REQUEST_ID_HEADER),
                ]),
        )
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let storage = match &state.db {
        Some(db) => {
            db.health_check().await.map_err(|e| {
                tracing::error!(error = %e, "PostgreSQL health check failed");
                e
            })?;
            "postgres"
        }
        None => "memory",
    };

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "storage": storage
        }
    })))
}
