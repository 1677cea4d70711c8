use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use worldline_core::error::CoreError;
use worldline_providers::ProviderError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors, [`sqlx::Error`] for persistence
/// failures, and [`ProviderError`] for upstream LLM failures that surface
/// synchronously (model listing, provider validation). Implements
/// [`IntoResponse`] to produce consistent `{error, code}` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `worldline_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A provider error reaching the HTTP layer.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Busy(msg) => (StatusCode::CONFLICT, "BUSY", msg.clone()),
                CoreError::PreconditionFailed { code, message } => {
                    (StatusCode::CONFLICT, *code, message.clone())
                }
                CoreError::Config(msg) => {
                    tracing::error!(error = %msg, "Configuration error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "CONFIG_ERROR",
                        "A configuration error occurred".to_string(),
                    )
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- Database errors ---
            AppError::Database(err) => classify_sqlx_error(err),

            // --- Provider errors reaching HTTP ---
            AppError::Provider(err) => classify_provider_error(err),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique constraint violations map to 409.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => (
            StatusCode::CONFLICT,
            "CONFLICT",
            "Duplicate value violates a unique constraint".to_string(),
        ),
        other => {
            tracing::error!(error = %other, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

/// Map a provider error to a transport status.
///
/// Upstream failures (4xx/5xx/timeouts from the provider) surface as 502
/// with a sanitized excerpt; local misconfiguration is the caller's fault
/// and maps to 400.
fn classify_provider_error(err: &ProviderError) -> (StatusCode, &'static str, String) {
    let code = err.code();
    match err {
        ProviderError::ApiKeyRequired(_)
        | ProviderError::BaseUrlMissing(_)
        | ProviderError::Unsupported(_)
        | ProviderError::ModelInvalid(_) => (StatusCode::BAD_REQUEST, code, err.to_string()),
        ProviderError::NotReady => (StatusCode::CONFLICT, code, err.to_string()),
        ProviderError::SecretMissing => {
            tracing::error!("APP_SECRET_KEY missing while handling provider secrets");
            (StatusCode::INTERNAL_SERVER_ERROR, code, err.to_string())
        }
        _ => (StatusCode::BAD_GATEWAY, code, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn busy_maps_to_409_with_busy_code() {
        let response =
            AppError::Core(CoreError::Busy("runner is writing".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn precondition_carries_its_code() {
        let err = AppError::Core(CoreError::PreconditionFailed {
            code: "NO_MODEL_SELECTED",
            message: "select a model first".into(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn provider_upstream_maps_to_502() {
        let err = AppError::Provider(ProviderError::Upstream {
            status: 503,
            message: "down".into(),
        });
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn provider_misconfig_maps_to_400() {
        let err = AppError::Provider(ProviderError::ApiKeyRequired("OpenAI"));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
