use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{db::DbError, observability::metrics, retention::RetentionError};

/// Standard error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Error classification, e.g. `validation_error`, `security_error`.
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub code: &'static str,
    pub message: String,
    /// Rows already deleted when a prune failed partway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_count: Option<u64>,
}

#[derive(Debug)]
pub enum AdminError {
    Validation(String),
    SafetyViolation(String),
    /// Prune token rejected.
    InvalidToken(String),
    NotFound(String),
    /// The data changed underneath the request; retrying may succeed.
    Conflict(String),
    PartialFailure {
        deleted: u64,
        message: String,
    },
    DatabaseRequired,
    Database(DbError),
    Internal(String),
}

impl From<DbError> for AdminError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotConfigured => AdminError::DatabaseRequired,
            _ => AdminError::Database(err),
        }
    }
}

impl From<RetentionError> for AdminError {
    fn from(err: RetentionError) -> Self {
        match err {
            RetentionError::Validation(msg) => AdminError::Validation(msg),
            RetentionError::SafetyViolation(msg) => AdminError::SafetyViolation(msg),
            RetentionError::Security(msg) => AdminError::InvalidToken(msg),
            RetentionError::NotFound(msg) => AdminError::NotFound(msg),
            RetentionError::PartialFailure { deleted, source } => {
                tracing::error!(deleted, error = %source, "Prune aborted after partial deletion");
                AdminError::PartialFailure {
                    deleted,
                    message: format!(
                        "Prune failed after deleting {deleted} records. Deleted records are not \
                         restored; retry to remove the remainder."
                    ),
                }
            }
            RetentionError::Database(db) => AdminError::from(db),
            RetentionError::StreamAborted { records_written } => {
                AdminError::Internal(format!("Export aborted after {records_written} records"))
            }
            RetentionError::CandidatesChanged { .. } => AdminError::Conflict(
                "Records changed during export; request a new export".to_string(),
            ),
            RetentionError::Serialization(e) => {
                AdminError::Internal(format!("Failed to serialize export envelope: {e}"))
            }
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let mut deleted_count = None;
        let (status, code, message, error_type) = match self {
            AdminError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                msg,
                "validation_error",
            ),
            AdminError::SafetyViolation(msg) => (
                StatusCode::BAD_REQUEST,
                "safety_violation",
                msg,
                "safety_violation",
            ),
            AdminError::InvalidToken(msg) => (
                StatusCode::UNAUTHORIZED,
                "invalid_prune_token",
                msg,
                "security_error",
            ),
            AdminError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, "not_found"),
            AdminError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, "conflict"),
            AdminError::PartialFailure { deleted, message } => {
                deleted_count = Some(deleted);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "partial_failure",
                    message,
                    "partial_failure",
                )
            }
            AdminError::DatabaseRequired => (
                StatusCode::SERVICE_UNAVAILABLE,
                "database_required",
                "Retention endpoints require a configured database".to_string(),
                "internal_error",
            ),
            AdminError::Database(err) => {
                tracing::error!(error = %err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "An internal database error occurred".to_string(),
                    "internal_error",
                )
            }
            AdminError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    "internal_error",
                )
            }
        };

        metrics::record_error(error_type, code);

        let body = ErrorResponse {
            error: ErrorInfo {
                error_type,
                code,
                message,
                deleted_count,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::Value;

    use super::*;

    async fn render(err: AdminError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[rstest]
    #[case(RetentionError::Validation("bad".into()), StatusCode::BAD_REQUEST, "validation_error")]
    #[case(RetentionError::SafetyViolation("current month".into()), StatusCode::BAD_REQUEST, "safety_violation")]
    #[case(RetentionError::Security("forged".into()), StatusCode::UNAUTHORIZED, "security_error")]
    #[case(RetentionError::NotFound("nothing".into()), StatusCode::NOT_FOUND, "not_found")]
    #[case(RetentionError::Database(DbError::Internal("boom".into())), StatusCode::INTERNAL_SERVER_ERROR, "internal_error")]
    #[case(RetentionError::CandidatesChanged { expected: 3, exported: 2 }, StatusCode::CONFLICT, "conflict")]
    #[tokio::test]
    async fn test_retention_error_status(
        #[case] err: RetentionError,
        #[case] status: StatusCode,
        #[case] error_type: &str,
    ) {
        let (actual, body) = render(err.into()).await;
        assert_eq!(actual, status);
        assert_eq!(body["error"]["type"], error_type);
        assert!(body["error"].get("deletedCount").is_none());
    }

    #[tokio::test]
    async fn test_partial_failure_carries_deleted_count() {
        let err = RetentionError::PartialFailure {
            deleted: 2000,
            source: DbError::Internal("connection reset".into()),
        };
        let (status, body) = render(err.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "partial_failure");
        assert_eq!(body["error"]["deletedCount"], 2000);
    }

    #[tokio::test]
    async fn test_database_details_not_leaked() {
        let (_, body) = render(AdminError::Database(DbError::Internal("secret dsn".into()))).await;
        assert!(!body["error"]["message"].as_str().unwrap().contains("secret"));
    }

    #[tokio::test]
    async fn test_serialization_error_is_not_reported_as_database() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let (status, body) = render(RetentionError::from(json_err).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "internal_error");
        assert_ne!(body["error"]["code"], "database_error");
    }
}
