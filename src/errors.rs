use thiserror::Error;

/// Coarse failure classes the conversation store reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Generation credentials are missing; surfaced out-of-band.
    Configuration,
    /// Network or backend failure on a remote call.
    Transport,
    /// Loading history from the store failed.
    StoreRead,
    /// Writing a conversation or message to the store failed.
    StoreWrite,
    /// The backend answered successfully but produced nothing usable.
    EmptyResult,
    /// The request was rejected before reaching any collaborator.
    Validation,
}

/// Top-level application error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("API_KEY is not set. Please configure your environment variables in your deployment settings.")]
    MissingApiKey,

    // ── Generation errors ────────────────────────────────────────────────────
    #[error("Cannot reach generation service: {message}")]
    Transport { message: String },

    #[error("Generation service error ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("{what} failed, no result returned from API.")]
    EmptyResult { what: String },

    // ── Store errors ─────────────────────────────────────────────────────────
    #[error("Database query failed: {message}")]
    DatabaseQueryFailed {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database write failed: {message}")]
    DatabaseWriteFailed {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to load conversations: {message}")]
    StoreRead { message: String },

    #[error("Failed to save to store: {message}")]
    StoreWrite { message: String },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn db_read(message: impl Into<String>, source: sqlx::Error) -> Self {
        AppError::DatabaseQueryFailed { message: message.into(), source }
    }

    pub fn db_write(message: impl Into<String>, source: sqlx::Error) -> Self {
        AppError::DatabaseWriteFailed { message: message.into(), source }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        AppError::Transport { message: message.into() }
    }

    pub fn empty_result(what: impl Into<String>) -> Self {
        AppError::EmptyResult { what: what.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::MissingApiKey => ErrorKind::Configuration,
            AppError::Transport { .. } | AppError::Backend { .. } | AppError::Unexpected(_) => {
                ErrorKind::Transport
            }
            AppError::EmptyResult { .. } => ErrorKind::EmptyResult,
            AppError::DatabaseQueryFailed { .. } | AppError::StoreRead { .. } => ErrorKind::StoreRead,
            AppError::DatabaseWriteFailed { .. } | AppError::StoreWrite { .. } => ErrorKind::StoreWrite,
            AppError::EmptyField { .. } | AppError::FieldTooLong { .. } => ErrorKind::Validation,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, AppError::MissingApiKey)
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::EmptyField { .. } | AppError::FieldTooLong { .. })
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => AppError::Backend { status: status.as_u16(), message: err.to_string() },
            None => AppError::transport(err.to_string()),
        }
    }
}
