//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Entity declaration faults. These surface while the registry is built and
/// should abort startup; they never reach a request.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("model {model}: {message}")]
    InvalidPrimaryKey { model: String, message: String },
    #[error("model {model}, attribute {attribute}: {message}")]
    InvalidAnnotation {
        model: String,
        attribute: String,
        message: String,
    },
    #[error("model {model}: duplicate {what} '{name}'")]
    Duplicate {
        model: String,
        what: &'static str,
        name: String,
    },
    #[error("model {model} declares media fields but no media service is configured")]
    MediaServiceRequired { model: String },
    #[error("settings: {0}")]
    Settings(String),
}

impl ConfigError {
    pub(crate) fn annotation(model: &str, attribute: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidAnnotation {
            model: model.to_string(),
            attribute: attribute.to_string(),
            message: message.into(),
        }
    }
}

/// Caller-facing classification of an [`AppError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Conflict,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("internal: {0}")]
    Internal(String),
    #[error("{op} {model}: {source}")]
    Operation {
        op: &'static str,
        model: String,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    pub(crate) fn invalid_value(field: &str, reason: impl ToString) -> Self {
        AppError::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Attach operation context. Caller-input errors stay unwrapped so their
    /// message reaches the client as-is.
    pub fn context(self, op: &'static str, model: &str) -> Self {
        match self {
            AppError::Db(_) | AppError::Internal(_) | AppError::Config(_) => AppError::Operation {
                op,
                model: model.to_string(),
                source: Box::new(self),
            },
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::BadRequest(_) | AppError::Validation(_) | AppError::InvalidValue { .. } => {
                ErrorKind::BadRequest
            }
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Db(sqlx::Error::RowNotFound) => ErrorKind::NotFound,
            AppError::Db(_) | AppError::Internal(_) | AppError::Config(_) => ErrorKind::Internal,
            AppError::Operation { source, .. } => source.kind(),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match self.kind() {
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorKind::BadRequest => match &self {
                AppError::Validation(_) | AppError::InvalidValue { .. } => {
                    (StatusCode::BAD_REQUEST, "validation_error")
                }
                _ => (StatusCode::BAD_REQUEST, "bad_request"),
            },
            ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict"),
            ErrorKind::Internal => {
                tracing::error!(error = %self, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };
        let details = match &self {
            AppError::InvalidValue { field, .. } => Some(serde_json::json!({ "field": field })),
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_only_internal_errors() {
        let wrapped = AppError::Internal("boom".into()).context("create", "examples");
        assert!(matches!(wrapped, AppError::Operation { op: "create", .. }));
        assert_eq!(wrapped.kind(), ErrorKind::Internal);
        assert_eq!(wrapped.to_string(), "create examples: internal: boom");

        let passthrough = AppError::Conflict("name".into()).context("create", "examples");
        assert!(matches!(passthrough, AppError::Conflict(_)));
    }

    #[test]
    fn invalid_value_is_bad_request() {
        let err = AppError::invalid_value("price", "expected a number");
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn status_codes_follow_kind() {
        assert_eq!(
            AppError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Conflict("x".into()).into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Db(sqlx::Error::RowNotFound).into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
