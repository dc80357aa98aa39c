//! Error types for the storage layer.
//!
//! This module defines all error types using `thiserror`. Variants follow the
//! failure classes of the layer: setup/programming errors, connection
//! establishment, backend execution failures and row decoding.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Setup or programming error (malformed table metadata, factory mismatch,
    /// unknown key group). Never retried.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("No type mapper registered for {type_name}")]
    UnregisteredType { type_name: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23000" for an integrity constraint violation
        sql_state: Option<String>,
        suggestion: String,
    },

    /// A statement failed on a connection that is still usable.
    #[error("Failing sql statement: {sql}")]
    Statement {
        sql: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Decode error in column '{column}': {message}")]
    Decode { column: String, message: String },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unregistered type error.
    pub fn unregistered_type(type_name: impl Into<String>) -> Self {
        Self::UnregisteredType {
            type_name: type_name.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Wrap the cause of a failed statement together with its SQL text.
    pub fn statement(sql: impl Into<String>, source: DbError) -> Self {
        Self::Statement {
            sql: sql.into(),
            source: Box::new(source),
        }
    }

    /// Create a decode error.
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::Statement { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// The innermost cause, looking through statement wrappers.
    pub fn root_cause(&self) -> &DbError {
        match self {
            Self::Statement { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection settings and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let suggestion = if db_err.is_unique_violation() {
                    "A row with the same key already exists"
                } else {
                    "Check the SQL syntax and referenced objects"
                };
                DbError::database(db_err.message(), code, suggestion)
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::decode(col.clone(), format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::decode(index, source.to_string())
            }
            sqlx::Error::Decode(source) => DbError::decode("?", source.to_string()),
            sqlx::Error::PoolTimedOut => DbError::timeout("driver pool acquire", 0),
            sqlx::Error::PoolClosed => DbError::PoolClosed,
            sqlx::Error::WorkerCrashed => DbError::connection(
                "Database worker crashed",
                "The connection is no longer usable and will be replaced",
            ),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Duplicate entry",
            Some("23000".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
    }

    #[test]
    fn test_statement_wrapper_keeps_cause() {
        let cause = DbError::database("no such table: missing", None, "Create the table");
        let err = DbError::statement("SELECT 1 FROM missing", cause);
        assert!(err.to_string().contains("SELECT 1 FROM missing"));
        assert!(matches!(err.root_cause(), DbError::Database { .. }));
        assert_eq!(err.suggestion(), Some("Create the table"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_pool_errors_have_no_suggestion() {
        assert_eq!(DbError::timeout("connection acquire", 30).suggestion(), None);
        assert_eq!(DbError::PoolClosed.suggestion(), None);
    }
}
