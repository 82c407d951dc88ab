use thiserror::Error;

/// Failure kinds surfaced by the ledger operations.
///
/// Validation and not-found conditions are detected before any write. Anything
/// raised once a transaction is open rolls that transaction back.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<rust_decimal::Error> for LedgerError {
    fn from(err: rust_decimal::Error) -> Self {
        Self::Internal(format!("invalid stored decimal: {err}"))
    }
}

impl From<uuid::Error> for LedgerError {
    fn from(err: uuid::Error) -> Self {
        Self::Internal(format!("invalid stored id: {err}"))
    }
}

impl From<chrono::ParseError> for LedgerError {
    fn from(err: chrono::ParseError) -> Self {
        Self::Internal(format!("invalid stored date: {err}"))
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
