use chrono::{Duration, Utc};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::{
    dtos::auth::{
        CreateUserRequest, LoginRequest, LoginResponse, RenewAccessTokenResponse,
        UpdateUserRequest, VerifyEmailQuery, VerifyEmailResponse,
    },
    models::{
        CreateSessionParams, CreateUserParams, CreateUserTxParams, Role, UpdateUserParams,
        UserResponse,
    },
    services::{
        metrics::LOGINS_TOTAL,
        notifier::{VerificationNotice, VerificationNotifier},
        policy::{Caller, SESSION_ROLES, USER_UPDATE_ROLES},
        repository::{SessionStore, UserRepository, VerifyEmailRepository},
        token::{TokenKind, TokenMaker, TokenPayload},
        ServiceError,
    },
    utils::{hash_password, random_string, verify_password, Password, PasswordError, PasswordHashString},
};

/// Length of the emailed verification secret.
pub const VERIFY_SECRET_LEN: usize = 32;

/// Lifetimes and link settings for the auth engine.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub access_token_duration: Duration,
    pub refresh_token_duration: Duration,
    pub verify_email_expiry: Duration,
    pub verify_email_base_url: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            access_token_duration: Duration::minutes(15),
            refresh_token_duration: Duration::hours(24),
            verify_email_expiry: Duration::minutes(15),
            verify_email_base_url: "http://localhost:8080/api/v1/verify_email".to_string(),
        }
    }
}

/// Where a login came from, recorded on the session.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: String,
    pub client_ip: String,
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    verify_emails: Arc<dyn VerifyEmailRepository>,
    sessions: Arc<dyn SessionStore>,
    tokens: Arc<dyn TokenMaker>,
    notifier: Arc<dyn VerificationNotifier>,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        verify_emails: Arc<dyn VerifyEmailRepository>,
        sessions: Arc<dyn SessionStore>,
        tokens: Arc<dyn TokenMaker>,
        notifier: Arc<dyn VerificationNotifier>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            users,
            verify_emails,
            sessions,
            tokens,
            notifier,
            settings,
        }
    }

    /// Registers a depositor together with its pending verification record
    /// and hands the notice to the notifier without waiting for delivery.
    #[instrument(skip(self, req), fields(username = %req.username))]
    pub async fn create_user(&self, req: CreateUserRequest) -> Result<UserResponse, ServiceError> {
        req.validate()?;

        let password_hash = hash_password(&Password::new(req.password)).map_err(|e| {
            ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e))
        })?;

        let created = self
            .users
            .create_user_tx(CreateUserTxParams {
                user: CreateUserParams {
                    username: req.username,
                    role: Role::Depositor,
                    hashed_password: password_hash.into_string(),
                    full_name: req.full_name,
                    email: req.email,
                },
                secret_code: random_string(VERIFY_SECRET_LEN),
                verify_email_expired_at: Utc::now() + self.settings.verify_email_expiry,
            })
            .await?;
        let (user, verify_email) = (created.user, created.verify_email);

        info!(username = %user.username, "User created");

        let notice = VerificationNotice::new(
            &self.settings.verify_email_base_url,
            user.username.clone(),
            user.full_name.clone(),
            user.email.clone(),
            verify_email.id,
            verify_email.secret_code,
        );
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let username = notice.username.clone();
            if let Err(e) = notifier.send_verification(notice).await {
                tracing::error!(username = %username, error = %e, "Failed to send verification email");
            }
        });

        Ok(user.into())
    }

    /// Reads a user profile. Other users' profiles are reported as missing
    /// unless the caller is an admin.
    #[instrument(skip(self, caller), fields(caller = %caller.username))]
    pub async fn get_user(&self, caller: &Caller, username: &str) -> Result<UserResponse, ServiceError> {
        if !caller.has_permission(SESSION_ROLES) {
            return Err(ServiceError::Forbidden("role may not read users".to_string()));
        }
        if caller.username != username && caller.role != Role::Admin {
            return Err(ServiceError::NotFound("user"));
        }

        Ok(self.users.get_user(username).await?.into())
    }

    /// Changes any of full name, email and password. Owners may update
    /// themselves; bankers may update depositors and admins anyone.
    #[instrument(skip(self, caller, req), fields(caller = %caller.username))]
    pub async fn update_user(
        &self,
        caller: &Caller,
        username: &str,
        req: UpdateUserRequest,
    ) -> Result<UserResponse, ServiceError> {
        if !caller.has_permission(USER_UPDATE_ROLES) {
            return Err(ServiceError::Forbidden("role may not update users".to_string()));
        }
        if !caller.may_act_for(username, USER_UPDATE_ROLES) {
            return Err(ServiceError::Forbidden(
                "user doesn't belong to the authenticated user".to_string(),
            ));
        }
        req.validate()?;
        if req.is_empty() {
            return Err(ServiceError::InvalidArgument("no fields to update".to_string()));
        }

        let target = self.users.get_user(username).await?;
        if caller.username != target.username
            && caller.role != Role::Admin
            && target.role != Role::Depositor
        {
            return Err(ServiceError::Forbidden(
                "only admins may update staff users".to_string(),
            ));
        }

        let (hashed_password, password_changed_at) = match req.password {
            Some(password) => {
                let hash = hash_password(&Password::new(password)).map_err(|e| {
                    ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e))
                })?;
                (Some(hash.into_string()), Some(Utc::now()))
            }
            None => (None, None),
        };

        let user = self
            .users
            .update_user(UpdateUserParams {
                username: target.username,
                full_name: req.full_name,
                email: req.email,
                hashed_password,
                password_changed_at,
            })
            .await?;

        info!(username = %user.username, "User updated");
        Ok(user.into())
    }

    #[instrument(skip(self, req, client), fields(username = %req.username))]
    pub async fn login(
        &self,
        req: LoginRequest,
        client: ClientInfo,
    ) -> Result<LoginResponse, ServiceError> {
        let result = self.login_inner(req, client).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        LOGINS_TOTAL.with_label_values(&[status]).inc();
        result
    }

    async fn login_inner(
        &self,
        req: LoginRequest,
        client: ClientInfo,
    ) -> Result<LoginResponse, ServiceError> {
        req.validate()?;

        let user = match self.users.get_user(&req.username).await {
            Ok(user) => user,
            Err(ServiceError::NotFound(_)) => return Err(ServiceError::InvalidCredentials),
            Err(e) => return Err(e),
        };

        verify_password(
            &Password::new(req.password),
            &PasswordHashString::new(user.hashed_password.clone()),
        )
        .map_err(|e| match e {
            PasswordError::Mismatch => ServiceError::InvalidCredentials,
            other => ServiceError::Internal(anyhow::anyhow!(other)),
        })?;

        if !user.is_email_verified {
            return Err(ServiceError::UnverifiedAccount);
        }

        let (access_token, access_payload) = self.tokens.create_token(
            &user.username,
            user.role,
            TokenKind::Access,
            self.settings.access_token_duration,
        )?;
        let (refresh_token, refresh_payload) = self.tokens.create_token(
            &user.username,
            user.role,
            TokenKind::Refresh,
            self.settings.refresh_token_duration,
        )?;

        let session = self
            .sessions
            .create_session(CreateSessionParams {
                id: refresh_payload.id,
                username: user.username.clone(),
                refresh_token: refresh_token.clone(),
                user_agent: client.user_agent,
                client_ip: client.client_ip,
                is_blocked: false,
                expires_at: refresh_payload.expired_at,
            })
            .await?;

        info!(username = %user.username, session_id = %session.id, "User logged in");

        Ok(LoginResponse {
            session_id: session.id,
            access_token,
            access_token_expires_at: access_payload.expired_at,
            refresh_token,
            refresh_token_expires_at: refresh_payload.expired_at,
            user: user.into(),
        })
    }

    /// Mints a new access token from a live refresh session. The refresh
    /// token itself is not rotated.
    #[instrument(skip(self, refresh_token))]
    pub async fn renew_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RenewAccessTokenResponse, ServiceError> {
        let payload = self.tokens.verify_token_kind(refresh_token, TokenKind::Refresh)?;
        self.live_session(&payload, refresh_token).await?;

        let (access_token, access_payload) = self.tokens.create_token(
            &payload.username,
            payload.role,
            TokenKind::Access,
            self.settings.access_token_duration,
        )?;

        Ok(RenewAccessTokenResponse {
            access_token,
            access_token_expires_at: access_payload.expired_at,
        })
    }

    /// Blocks the session behind `refresh_token`. Only its owner or an admin
    /// may do so.
    #[instrument(skip(self, caller, refresh_token), fields(caller = %caller.username))]
    pub async fn revoke_session(&self, caller: &Caller, refresh_token: &str) -> Result<(), ServiceError> {
        let payload = self.tokens.verify_token_kind(refresh_token, TokenKind::Refresh)?;

        let session = match self.sessions.get_session(payload.id).await {
            Ok(session) => session,
            Err(ServiceError::NotFound(_)) => return Err(ServiceError::InvalidToken),
            Err(e) => return Err(e),
        };

        if session.username != caller.username && caller.role != Role::Admin {
            warn!(session_id = %session.id, "Session revoke by non-owner rejected");
            return Err(ServiceError::Forbidden(
                "session belongs to another user".to_string(),
            ));
        }

        self.sessions.block_session(session.id).await?;
        info!(session_id = %session.id, username = %session.username, "Session revoked");
        Ok(())
    }

    #[instrument(skip(self, query), fields(email_id = query.email_id))]
    pub async fn verify_email(
        &self,
        query: VerifyEmailQuery,
    ) -> Result<VerifyEmailResponse, ServiceError> {
        query.validate()?;

        let result = self
            .verify_emails
            .verify_email_tx(query.email_id, &query.secret_code)
            .await?;

        info!(username = %result.user.username, "Email verified");

        Ok(VerifyEmailResponse {
            is_verified: result.user.is_email_verified,
        })
    }

    /// Loads the session backing a verified refresh token and applies every
    /// renewal check. All failures are `InvalidToken`.
    async fn live_session(
        &self,
        payload: &TokenPayload,
        refresh_token: &str,
    ) -> Result<(), ServiceError> {
        let session = match self.sessions.get_session(payload.id).await {
            Ok(session) => session,
            Err(ServiceError::NotFound(_)) => return Err(ServiceError::InvalidToken),
            Err(e) => return Err(e),
        };

        if session.is_blocked {
            warn!(session_id = %session.id, "Blocked session used for renewal");
            return Err(ServiceError::InvalidToken);
        }

        if session.username != payload.username {
            warn!(session_id = %session.id, "Session user mismatch");
            return Err(ServiceError::InvalidToken);
        }

        let matches: bool = session
            .refresh_token
            .as_bytes()
            .ct_eq(refresh_token.as_bytes())
            .into();
        if !matches {
            warn!(session_id = %session.id, "Session token mismatch");
            return Err(ServiceError::InvalidToken);
        }

        if session.is_expired_at(Utc::now()) {
            return Err(ServiceError::InvalidToken);
        }

        Ok(())
    }
}
