//! Engine error types
//!
//! Every failure surfaced by a driver, the session manager or the service
//! layer is an `EngineError`. Drivers never recover locally: the error carries
//! the failing operation and the underlying cause up to the caller.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Opening the handle or the liveness probe failed
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The server rejected the supplied credentials
    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    /// An introspection query failed to execute or its rows could not be read
    #[error("Query failed during {operation}: {message}")]
    QueryFailed {
        operation: &'static str,
        message: String,
    },

    /// The target engine cannot express the requested alteration
    #[error("Cannot alter table {table}: {message}")]
    AlterationFailed { table: String, message: String },

    #[error("Syntax error: {message}")]
    SyntaxError { message: String },

    #[error("Execution error: {message}")]
    ExecutionError { message: String },

    #[error("Driver not found: {driver}")]
    DriverNotFound { driver: String },

    #[error("Session not found: {session}")]
    SessionNotFound { session: String },

    /// A handle opened by one engine was passed to another engine's driver
    #[error("Handle mismatch: {driver} driver received a {actual} handle")]
    HandleMismatch {
        driver: &'static str,
        actual: &'static str,
    },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A statement was refused by the read-only or production policy
    #[error("{message}")]
    Blocked { message: String },

    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed {
            message: message.into(),
        }
    }

    pub fn query_failed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::QueryFailed {
            operation,
            message: message.into(),
        }
    }

    pub fn alteration_failed(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AlterationFailed {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::SyntaxError {
            message: message.into(),
        }
    }

    pub fn execution_error(message: impl Into<String>) -> Self {
        Self::ExecutionError {
            message: message.into(),
        }
    }

    pub fn driver_not_found(driver: impl Into<String>) -> Self {
        Self::DriverNotFound {
            driver: driver.into(),
        }
    }

    pub fn session_not_found(session: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session: session.into(),
        }
    }

    pub fn handle_mismatch(driver: &'static str, actual: &'static str) -> Self {
        Self::HandleMismatch { driver, actual }
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::Blocked {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Prefixes the message of a statement failure, keeping its kind
    pub fn with_context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Self::SyntaxError { message } => Self::SyntaxError {
                message: format!("{}: {}", context, message),
            },
            Self::ExecutionError { message } => Self::ExecutionError {
                message: format!("{}: {}", context, message),
            },
            other => other,
        }
    }

    /// True for failures that happened while opening or probing a handle
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::AuthFailed { .. } | Self::Timeout { .. }
        )
    }
}
