use crate::types::Id;

/// Domain-level error shared across the workspace.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: Id },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A concurrent writer currently holds the branch; the caller should
    /// pause the runner and retry.
    #[error("Busy: {0}")]
    Busy(String),

    /// An operation's precondition is unmet; carries a stable code the
    /// transport layer exposes to clients.
    #[error("Precondition failed ({code}): {message}")]
    PreconditionFailed { code: &'static str, message: String },

    /// Missing or broken operator configuration (secret key, decryption).
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable code for the error event schema.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::Busy(_) => "BUSY",
            CoreError::PreconditionFailed { code, .. } => code,
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
