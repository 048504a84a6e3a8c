use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use service_core::error::AppError;

use crate::{
    services::{Caller, TokenKind},
    AppState,
};

/// Returns the token of a `Bearer` authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("authorization header is not provided")))?
        .to_str()
        .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("invalid authorization header format")))?;

    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        (Some(_), Some(_), None) => Err(AppError::Unauthorized(anyhow::anyhow!(
            "unsupported authorization type"
        ))),
        _ => Err(AppError::Unauthorized(anyhow::anyhow!(
            "invalid authorization header format"
        ))),
    }
}

/// Verified caller of a protected route.
///
/// The access token is verified here on every request, so a handler that
/// takes `AuthUser` cannot run without a valid identity. Refresh tokens are
/// refused.
pub struct AuthUser(pub Caller);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;

        let payload = state
            .tokens
            .verify_token_kind(token, TokenKind::Access)
            .map_err(|_| {
                AppError::Unauthorized(anyhow::anyhow!("invalid or expired access token"))
            })?;

        Ok(AuthUser(payload.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert_eq!(bearer_token(&headers("bearer abc")).unwrap(), "abc");

        assert!(bearer_token(&HeaderMap::new()).is_err());
        assert!(bearer_token(&headers("Bearer")).is_err());
        assert!(bearer_token(&headers("Basic dXNlcjpwYXNz")).is_err());
        assert!(bearer_token(&headers("Bearer a b")).is_err());
    }
}
