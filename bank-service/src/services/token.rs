use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MIN_SYMMETRIC_KEY_LEN;
use crate::models::Role;
use crate::services::ServiceError;

/// What a token may be presented for. Access tokens authorize API calls;
/// refresh tokens only renew or revoke their session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Identity, role and validity window carried inside a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPayload {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub kind: TokenKind,
    pub issued_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

impl TokenPayload {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expired_at
    }
}

/// Mints and verifies signed bearer tokens.
pub trait TokenMaker: Send + Sync {
    /// Returns the compact token and the payload it carries, with
    /// `expired_at = issued_at + duration`.
    fn create_token(
        &self,
        username: &str,
        role: Role,
        kind: TokenKind,
        duration: Duration,
    ) -> Result<(String, TokenPayload), ServiceError>;

    /// Every failure (bad signature, unexpected algorithm, expiry, malformed
    /// input) is reported as `ServiceError::InvalidToken`.
    fn verify_token(&self, token: &str) -> Result<TokenPayload, ServiceError>;

    /// `verify_token`, additionally rejecting tokens minted for another use.
    fn verify_token_kind(&self, token: &str, kind: TokenKind) -> Result<TokenPayload, ServiceError> {
        let payload = self.verify_token(token)?;
        if payload.kind != kind {
            tracing::debug!(expected = kind.as_str(), got = payload.kind.as_str(), "Token kind rejected");
            return Err(ServiceError::InvalidToken);
        }
        Ok(payload)
    }
}

/// Wire claims. Timestamps are whole seconds since the epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    jti: String,
    sub: String,
    role: Role,
    typ: TokenKind,
    iat: i64,
    exp: i64,
}

impl Claims {
    fn into_payload(self) -> Option<TokenPayload> {
        Some(TokenPayload {
            id: Uuid::parse_str(&self.jti).ok()?,
            username: self.sub,
            role: self.role,
            kind: self.typ,
            issued_at: DateTime::from_timestamp(self.iat, 0)?,
            expired_at: DateTime::from_timestamp(self.exp, 0)?,
        })
    }
}

/// HS256 token maker keyed by the configured symmetric secret.
#[derive(Clone)]
pub struct JwtMaker {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtMaker {
    pub fn new(symmetric_key: &Secret<String>) -> Result<Self, anyhow::Error> {
        let key = symmetric_key.expose_secret().as_bytes();
        if key.len() < MIN_SYMMETRIC_KEY_LEN {
            anyhow::bail!(
                "invalid key size: must be at least {} bytes",
                MIN_SYMMETRIC_KEY_LEN
            );
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(key),
            decoding_key: DecodingKey::from_secret(key),
        })
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation
    }
}

impl TokenMaker for JwtMaker {
    fn create_token(
        &self,
        username: &str,
        role: Role,
        kind: TokenKind,
        duration: Duration,
    ) -> Result<(String, TokenPayload), ServiceError> {
        let issued_at = Utc::now().timestamp();
        let expired_at = issued_at + duration.num_seconds();

        let claims = Claims {
            jti: Uuid::new_v4().to_string(),
            sub: username.to_string(),
            role,
            typ: kind,
            iat: issued_at,
            exp: expired_at,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode token: {}", e))?;

        let payload = claims
            .into_payload()
            .ok_or_else(|| anyhow::anyhow!("token timestamps out of range"))?;

        Ok((token, payload))
    }

    fn verify_token(&self, token: &str) -> Result<TokenPayload, ServiceError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Self::validation())
            .map_err(|e| {
                tracing::debug!(error = %e, "Token rejected");
                ServiceError::InvalidToken
            })?;

        let payload = data.claims.into_payload().ok_or(ServiceError::InvalidToken)?;

        if payload.is_expired_at(Utc::now()) {
            return Err(ServiceError::InvalidToken);
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn maker() -> JwtMaker {
        JwtMaker::new(&Secret::new(KEY.to_string())).unwrap()
    }

    #[test]
    fn test_create_and_verify() -> Result<(), anyhow::Error> {
        let maker = maker();
        let (token, payload) = maker.create_token("alice", Role::Depositor, TokenKind::Access, Duration::minutes(1))?;

        assert_eq!(payload.username, "alice");
        assert_eq!(payload.expired_at - payload.issued_at, Duration::minutes(1));

        let verified = maker.verify_token(&token)?;
        assert_eq!(verified, payload);
        Ok(())
    }

    #[test]
    fn test_expired_token() -> Result<(), anyhow::Error> {
        let maker = maker();
        let (token, _) = maker.create_token("alice", Role::Banker, TokenKind::Access, Duration::minutes(-1))?;

        assert!(matches!(
            maker.verify_token(&token),
            Err(ServiceError::InvalidToken)
        ));
        Ok(())
    }

    #[test]
    fn test_wrong_key() -> Result<(), anyhow::Error> {
        let (token, _) = maker().create_token("alice", Role::Admin, TokenKind::Access, Duration::minutes(1))?;
        let other = JwtMaker::new(&Secret::new("x".repeat(32)))?;

        assert!(matches!(
            other.verify_token(&token),
            Err(ServiceError::InvalidToken)
        ));
        Ok(())
    }

    #[test]
    fn test_unexpected_algorithm() -> Result<(), anyhow::Error> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            jti: Uuid::new_v4().to_string(),
            sub: "alice".into(),
            role: Role::Depositor,
            typ: TokenKind::Access,
            iat: now,
            exp: now + 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(KEY.as_bytes()),
        )?;

        assert!(matches!(
            maker().verify_token(&token),
            Err(ServiceError::InvalidToken)
        ));
        Ok(())
    }

    #[test]
    fn test_garbage_and_tampered_tokens() -> Result<(), anyhow::Error> {
        let maker = maker();
        assert!(maker.verify_token("not.a.token").is_err());

        let (alice, _) = maker.create_token("alice", Role::Depositor, TokenKind::Access, Duration::minutes(1))?;
        let (mallory, _) = maker.create_token("mallory", Role::Admin, TokenKind::Access, Duration::minutes(1))?;
        let alice_parts: Vec<&str> = alice.split('.').collect();
        let mallory_parts: Vec<&str> = mallory.split('.').collect();

        // Admin claims under alice's signature.
        let spliced = format!("{}.{}.{}", alice_parts[0], mallory_parts[1], alice_parts[2]);
        assert!(matches!(
            maker.verify_token(&spliced),
            Err(ServiceError::InvalidToken)
        ));
        Ok(())
    }

    #[test]
    fn test_token_kind_is_checked() -> Result<(), anyhow::Error> {
        let maker = maker();
        let (access, _) = maker.create_token("alice", Role::Depositor, TokenKind::Access, Duration::minutes(1))?;
        let (refresh, payload) = maker.create_token("alice", Role::Depositor, TokenKind::Refresh, Duration::hours(1))?;
        assert_eq!(payload.kind, TokenKind::Refresh);

        assert!(maker.verify_token_kind(&access, TokenKind::Access).is_ok());
        assert!(maker.verify_token_kind(&refresh, TokenKind::Refresh).is_ok());
        assert!(matches!(
            maker.verify_token_kind(&refresh, TokenKind::Access),
            Err(ServiceError::InvalidToken)
        ));
        assert!(matches!(
            maker.verify_token_kind(&access, TokenKind::Refresh),
            Err(ServiceError::InvalidToken)
        ));
        Ok(())
    }

    #[test]
    fn test_token_without_kind_rejected() -> Result<(), anyhow::Error> {
        #[derive(Serialize)]
        struct Untyped {
            jti: String,
            sub: String,
            role: Role,
            iat: i64,
            exp: i64,
        }
        let now = Utc::now().timestamp();
        let claims = Untyped {
            jti: Uuid::new_v4().to_string(),
            sub: "alice".into(),
            role: Role::Depositor,
            iat: now,
            exp: now + 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(KEY.as_bytes()),
        )?;

        assert!(matches!(
            maker().verify_token(&token),
            Err(ServiceError::InvalidToken)
        ));
        Ok(())
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(JwtMaker::new(&Secret::new("short".to_string())).is_err());
    }
}
