use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Duplicate: {0}")]
    Duplicate(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(anyhow::Error),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(anyhow::Error),

    #[error("Balance not zero: {0}")]
    BalanceNotZero(anyhow::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

/// One rejected field of a request body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub tag: String,
    pub message: String,
}

impl AppError {
    /// Stable machine-readable code carried in every error body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "validation_error",
            AppError::BadRequest(_) => "invalid_argument",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Duplicate(_) => "duplicate",
            AppError::Conflict(_) => "conflict",
            AppError::CurrencyMismatch(_) => "currency_mismatch",
            AppError::InsufficientFunds(_) => "insufficient_funds",
            AppError::BalanceNotZero(_) => "balance_not_zero",
            AppError::Timeout => "timeout",
            AppError::InternalError(_) | AppError::DatabaseError(_) | AppError::ConfigError(_) => {
                "internal"
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) | AppError::CurrencyMismatch(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Duplicate(_) | AppError::Conflict(_) | AppError::BalanceNotZero(_) => {
                StatusCode::CONFLICT
            }
            AppError::InsufficientFunds(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::InternalError(_) | AppError::DatabaseError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Flattens `validator` output into a list sorted by field name.
pub fn field_violations(errors: &validator::ValidationErrors) -> Vec<FieldViolation> {
    let mut violations: Vec<FieldViolation> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            let field = field.to_string();
            errs.iter().map(move |e| FieldViolation {
                field: field.clone(),
                tag: e.code.to_string(),
                message: e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid", field)),
            })
        })
        .collect();
    violations.sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.tag.cmp(&b.tag)));
    violations
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            validations: Option<Vec<FieldViolation>>,
        }

        let status = self.status();
        let code = self.code();

        let (error_message, validations) = match self {
            AppError::ValidationError(err) => {
                ("Validation error".to_string(), Some(field_violations(&err)))
            }
            AppError::InternalError(err) => {
                tracing::error!(error = %err, "Internal error");
                ("Internal server error".to_string(), None)
            }
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                ("Internal server error".to_string(), None)
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                ("Internal server error".to_string(), None)
            }
            AppError::Timeout => ("Request timed out".to_string(), None),
            AppError::BadRequest(err)
            | AppError::NotFound(err)
            | AppError::Unauthorized(err)
            | AppError::Forbidden(err)
            | AppError::Duplicate(err)
            | AppError::Conflict(err)
            | AppError::CurrencyMismatch(err)
            | AppError::InsufficientFunds(err)
            | AppError::BalanceNotZero(err) => (err.to_string(), None),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                code,
                validations,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use validator::Validate;

    #[derive(Validate)]
    struct Signup {
        #[validate(length(min = 6, message = "password too short"))]
        password: String,
        #[validate(email)]
        email: String,
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn validation_error_lists_fields() {
        let err = Signup {
            password: "abc".into(),
            email: "nope".into(),
        }
        .validate()
        .unwrap_err();

        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = body_json(response).await;
        assert_eq!(body["code"], "validation_error");
        let validations = body["validations"].as_array().unwrap();
        assert_eq!(validations.len(), 2);
        assert_eq!(validations[0]["field"], "email");
        assert_eq!(validations[1]["field"], "password");
        assert_eq!(validations[1]["message"], "password too short");
    }

    #[tokio::test]
    async fn internal_error_hides_cause() {
        let response =
            AppError::InternalError(anyhow::anyhow!("pq: relation missing")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["code"], "internal");
        assert_eq!(body["error"], "Internal server error");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(AppError::Timeout.code(), "timeout");
        assert_eq!(
            AppError::InsufficientFunds(anyhow::anyhow!("x")).code(),
            "insufficient_funds"
        );
        assert_eq!(
            AppError::Duplicate(anyhow::anyhow!("x")).status(),
            StatusCode::CONFLICT
        );
    }
}
