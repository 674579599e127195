//! Error types for QueryDesk.
//!
//! This module defines all error types using `thiserror` for ergonomic error
//! handling. Driver errors are classified once here, at the adapter boundary,
//! so callers can distinguish "your SQL is wrong" from "the link is down"
//! without re-matching message substrings at every call site.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeskError {
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Connection '{connection_id}' is disconnected; reconnect it before running queries")]
    Disconnected { connection_id: String },

    #[error("Could not connect after {attempts} attempts: {message}")]
    ConnectFailed { attempts: u32, message: String },

    #[error("Query timed out after {elapsed_secs}s")]
    QueryTimeout { elapsed_secs: u64 },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Access denied: {principal} has no grant for {item}")]
    Unauthorized { principal: String, item: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

impl DeskError {
    /// Create a not-found error for a connection id.
    pub fn connection_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            what: "connection",
            id: id.into(),
        }
    }

    /// Create a not-found error for a folder id.
    pub fn folder_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            what: "folder",
            id: id.into(),
        }
    }

    /// Create a not-found error for a query id.
    pub fn query_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            what: "query",
            id: id.into(),
        }
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a disconnected fast-fail error.
    pub fn disconnected(connection_id: impl Into<String>) -> Self {
        Self::Disconnected {
            connection_id: connection_id.into(),
        }
    }

    /// Create a connect-failed error wrapping the last underlying failure.
    pub fn connect_failed(attempts: u32, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            attempts,
            message: message.into(),
        }
    }

    /// Create a query-timeout error.
    pub fn query_timeout(elapsed_secs: u64) -> Self {
        Self::QueryTimeout { elapsed_secs }
    }

    /// Create a network-class error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an unauthorized error.
    pub fn unauthorized(principal: impl Into<String>, item: impl Into<String>) -> Self {
        Self::Unauthorized {
            principal: principal.into(),
            item: item.into(),
        }
    }

    /// Create a database (statement-level) error.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    /// Create an unknown error wrapping the underlying message.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Machine-checkable kind tag for callers that log or route on error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::Disconnected { .. } => "connection_disconnected",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::QueryTimeout { .. } => "query_timeout",
            Self::Network { .. } => "network_error",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Database { .. } => "database_error",
            Self::Unknown { .. } => "unknown",
        }
    }

    /// True for failures that imply the link itself is down.
    ///
    /// The execution engine flips the health tracker and persists a
    /// disconnected status exactly for these. A query timeout is not
    /// network-class: one slow query does not mean the link is dead.
    pub fn is_network_class(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::ConnectFailed { .. })
    }
}

/// Convert sqlx errors to DeskError.
///
/// Socket, TLS and protocol failures become `Network`; engine-reported
/// statement errors become `Database`; everything else is wrapped unchanged.
impl From<sqlx::Error> for DeskError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => DeskError::network(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => DeskError::network(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => DeskError::network(format!("Protocol error: {}", msg)),
            sqlx::Error::PoolTimedOut => DeskError::network("Connection acquire timed out"),
            sqlx::Error::PoolClosed => DeskError::network("Connection closed"),
            sqlx::Error::WorkerCrashed => DeskError::network("Database worker crashed"),
            sqlx::Error::Configuration(msg) => {
                DeskError::invalid_argument(format!("Connection configuration: {}", msg))
            }
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DeskError::database(db_err.message(), code)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DeskError::unknown(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DeskError::unknown(format!("Decode error: {}", source)),
            _ => DeskError::unknown(err.to_string()),
        }
    }
}

/// Result type alias for QueryDesk operations.
pub type DeskResult<T> = Result<T, DeskError>;
