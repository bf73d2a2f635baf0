//! Error types for the relmap engine.
//!
//! All failures funnel into a single [`OrmError`] enum built with `thiserror`.
//! The variants follow the engine's taxonomy: configuration errors are fatal
//! and never retried, execution errors carry the offending statement and its
//! bound parameters, and transaction errors are re-raised after the physical
//! side effect has been attempted.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrmError {
    /// A mapping or usage problem that no retry can fix: missing or ambiguous
    /// primary key, mutating a read-only property, placeholder/argument count
    /// mismatch, re-assigning the data source, and similar.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// No converter registered between the two value kinds.
    #[error("Unable to convert {from} to {to}{}", detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Conversion {
        from: &'static str,
        to: &'static str,
        detail: Option<String>,
    },

    /// A statement failed at the backend. Carries the SQL text and the
    /// rendered parameters so the caller can see exactly what was sent.
    #[error("Unable to execute '{sql}'{}: {message}", if params.is_empty() { String::new() } else { format!(" -- [{params}]") })]
    Execution {
        message: String,
        sql: String,
        params: String,
        /// e.g. "23505" for a unique violation
        sql_state: Option<String>,
    },

    /// A begin/commit/rollback/close step failed.
    #[error("Transaction error: {message}")]
    Transaction { message: String },

    /// The connection could not be established or was lost.
    #[error("Connection error: {message}")]
    Connection { message: String },
}

impl OrmError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn conversion(from: &'static str, to: &'static str) -> Self {
        Self::Conversion {
            from,
            to,
            detail: None,
        }
    }

    pub fn conversion_with(
        from: &'static str,
        to: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self::Conversion {
            from,
            to,
            detail: Some(detail.into()),
        }
    }

    pub fn execution(
        message: impl Into<String>,
        sql: impl Into<String>,
        params: impl Into<String>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            sql: sql.into(),
            params: params.into(),
            sql_state: None,
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Attach statement context to an error that came out of the driver.
    pub(crate) fn with_statement(self, sql: &str, params: &str) -> Self {
        match self {
            Self::Execution {
                message, sql_state, ..
            } => Self::Execution {
                message,
                sql: sql.to_string(),
                params: params.to_string(),
                sql_state,
            },
            other => other,
        }
    }

    /// True for errors that describe a mapping problem rather than a runtime
    /// failure; these are never worth retrying.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Conversion { .. })
    }
}

/// Convert sqlx errors into the engine taxonomy.
impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => OrmError::connection(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let sql_state = db_err.code().map(|c| c.to_string());
                OrmError::Execution {
                    message: db_err.message().to_string(),
                    sql: String::new(),
                    params: String::new(),
                    sql_state,
                }
            }
            sqlx::Error::PoolTimedOut => OrmError::connection("Connection pool acquire timed out"),
            sqlx::Error::PoolClosed => OrmError::connection("Connection pool is closed"),
            sqlx::Error::Io(io_err) => OrmError::connection(format!("I/O error: {io_err}")),
            sqlx::Error::Protocol(msg) => OrmError::connection(format!("Protocol error: {msg}")),
            sqlx::Error::ColumnNotFound(col) => OrmError::config(format!("Column not found: {col}")),
            sqlx::Error::ColumnDecode { index, source } => OrmError::Execution {
                message: format!("Failed to decode column {index}: {source}"),
                sql: String::new(),
                params: String::new(),
                sql_state: None,
            },
            sqlx::Error::Decode(source) => OrmError::Execution {
                message: format!("Decode error: {source}"),
                sql: String::new(),
                params: String::new(),
                sql_state: None,
            },
            other => OrmError::Execution {
                message: other.to_string(),
                sql: String::new(),
                params: String::new(),
                sql_state: None,
            },
        }
    }
}

/// Result type alias for engine operations.
pub type OrmResult<T> = Result<T, OrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = OrmError::config("No primary key found");
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.is_config());
    }

    #[test]
    fn test_execution_error_carries_statement() {
        let err = OrmError::execution("boom", "SELECT 1", "42");
        let text = err.to_string();
        assert!(text.contains("SELECT 1"));
        assert!(text.contains("42"));
    }

    #[test]
    fn test_execution_error_without_params() {
        let err = OrmError::execution("boom", "SELECT 1", "");
        assert!(!err.to_string().contains("--"));
    }

    #[test]
    fn test_conversion_error_names_both_kinds() {
        let err = OrmError::conversion("Text", "Timestamp");
        let text = err.to_string();
        assert!(text.contains("Text"));
        assert!(text.contains("Timestamp"));
        assert!(err.is_config());
    }

    #[test]
    fn test_with_statement_preserves_message() {
        let err = OrmError::Execution {
            message: "bad".into(),
            sql: String::new(),
            params: String::new(),
            sql_state: Some("23505".into()),
        };
        let err = err.with_statement("INSERT INTO t VALUES (?)", "1");
        match err {
            OrmError::Execution {
                message,
                sql,
                sql_state,
                ..
            } => {
                assert_eq!(message, "bad");
                assert_eq!(sql, "INSERT INTO t VALUES (?)");
                assert_eq!(sql_state.as_deref(), Some("23505"));
            }
            other => panic!("unexpected: {other}"),
        }
    }
}
