//! Error types for configuration, persistence, and case operations.

use thiserror::Error;

/// Configuration resolution failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse settings file: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence failures, independent of the backend in use.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for DatabaseError {
    fn from(e: tokio_postgres::Error) -> Self {
        if let Some(db_err) = e.as_db_error()
            && *db_err.code() == tokio_postgres::error::SqlState::UNIQUE_VIOLATION
        {
            let constraint = db_err.constraint().unwrap_or("unknown constraint");
            return Self::UniqueViolation(constraint.to_string());
        }
        Self::Query(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for DatabaseError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        Self::Pool(e.to_string())
    }
}

#[cfg(feature = "libsql")]
impl From<libsql::Error> for DatabaseError {
    fn from(e: libsql::Error) -> Self {
        let message = e.to_string();
        if message.contains("UNIQUE constraint failed") {
            return Self::UniqueViolation(message);
        }
        Self::Query(message)
    }
}

/// Coarse classification of a [`CaseError`], for callers that map errors onto
/// response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseErrorKind {
    NotFound,
    Validation,
    Authorization,
    Conflict,
    Internal,
}

/// Failures raised by case allocation, status changes, ratings, and intake review.
#[derive(Debug, Error)]
pub enum CaseError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Database(DatabaseError),
}

impl CaseError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> CaseErrorKind {
        match self {
            Self::NotFound { .. } => CaseErrorKind::NotFound,
            Self::Validation(_) => CaseErrorKind::Validation,
            Self::Authorization(_) => CaseErrorKind::Authorization,
            Self::Conflict(_) => CaseErrorKind::Conflict,
            Self::Database(_) => CaseErrorKind::Internal,
        }
    }
}

impl From<DatabaseError> for CaseError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::UniqueViolation(what) => Self::Conflict(what),
            other => Self::Database(other),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for CaseError {
    fn from(e: tokio_postgres::Error) -> Self {
        DatabaseError::from(e).into()
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for CaseError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        DatabaseError::from(e).into()
    }
}

#[cfg(feature = "libsql")]
impl From<libsql::Error> for CaseError {
    fn from(e: libsql::Error) -> Self {
        DatabaseError::from(e).into()
    }
}
