mod diagnostics;

pub use diagnostics::{translate, translate_or_fallback, DiagnosticRecord, DriverError};

use crate::driver::HandleKind;
use thiserror::Error;

/// Error category for decision-making (retry, abort, reconnect, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient error - retry may resolve
    Transient,
    /// Fatal error - should abort operation
    Fatal,
    /// Validation error - invalid user input
    Validation,
    /// Connection lost - should reconnect
    ConnectionLost,
}

#[derive(Error, Debug, Clone)]
pub enum OdbcError {
    #[error("{0}")]
    Driver(DriverError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid {kind:?} handle: {handle:#x}")]
    InvalidHandle { kind: HandleKind, handle: usize },

    #[error("Connection string is empty")]
    EmptyConnectionString,

    #[error("Environment not initialized")]
    EnvironmentNotInitialized,

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<DriverError> for OdbcError {
    fn from(err: DriverError) -> Self {
        OdbcError::Driver(err)
    }
}

impl OdbcError {
    pub fn sqlstate(&self) -> [u8; 5] {
        match self {
            OdbcError::Driver(err) => err.sqlstate_bytes(),
            _ => [0u8; 5],
        }
    }

    pub fn native_code(&self) -> i32 {
        match self {
            OdbcError::Driver(err) => err.native_code,
            _ => 0,
        }
    }

    pub fn message(&self) -> String {
        match self {
            OdbcError::Driver(err) => err.message.clone(),
            _ => self.to_string(),
        }
    }

    /// Handle kind the diagnostics were read from, for driver errors.
    pub fn handle_kind(&self) -> Option<HandleKind> {
        match self {
            OdbcError::Driver(err) => Some(err.handle_kind),
            OdbcError::InvalidHandle { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn as_driver_error(&self) -> Option<&DriverError> {
        match self {
            OdbcError::Driver(err) => Some(err),
            _ => None,
        }
    }

    pub fn to_structured(&self) -> StructuredError {
        StructuredError {
            sqlstate: self.sqlstate(),
            native_code: self.native_code(),
            message: self.message(),
        }
    }

    /// Returns true if the error is transient and may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            // 08xxx connection exceptions, HYT00/HYT01 timeouts
            OdbcError::Driver(err) => {
                err.sqlstate.starts_with("08")
                    || err.sqlstate == "HYT00"
                    || err.sqlstate == "HYT01"
            }
            OdbcError::InternalError(msg) => msg.contains("timeout") || msg.contains("Timeout"),
            _ => false,
        }
    }

    /// Returns true if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        match self {
            OdbcError::EmptyConnectionString | OdbcError::EnvironmentNotInitialized => true,
            OdbcError::Driver(err) => err.sqlstate.starts_with("08"),
            _ => false,
        }
    }

    /// Returns true for errors raised before any driver call was made.
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            OdbcError::InvalidArgument(_)
                | OdbcError::EmptyConnectionString
                | OdbcError::ValidationError(_)
        )
    }

    /// Returns the error category for decision-making
    pub fn error_category(&self) -> ErrorCategory {
        if self.is_argument_error() {
            return ErrorCategory::Validation;
        }
        if self.is_connection_error() {
            return ErrorCategory::ConnectionLost;
        }
        if self.is_retryable() {
            return ErrorCategory::Transient;
        }
        ErrorCategory::Fatal
    }
}

/// Flat error form for hosts that marshal errors across a language boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredError {
    pub sqlstate: [u8; 5],
    pub native_code: i32,
    pub message: String,
}

impl StructuredError {
    /// Layout: `[sqlstate:5][native_code:4 LE][len:4 LE][message:len]`.
    pub fn serialize(&self) -> Vec<u8> {
        let msg_bytes = self.message.as_bytes();
        let mut buffer = Vec::with_capacity(13 + msg_bytes.len());
        buffer.extend_from_slice(&self.sqlstate);
        buffer.extend_from_slice(&self.native_code.to_le_bytes());
        buffer.extend_from_slice(&(msg_bytes.len() as u32).to_le_bytes());
        buffer.extend_from_slice(msg_bytes);
        buffer
    }

    pub fn deserialize(data: &[u8]) -> Option<Self> {
        if data.len() < 13 {
            return None;
        }

        let mut sqlstate = [0u8; 5];
        sqlstate.copy_from_slice(&data[0..5]);

        let native_code = i32::from_le_bytes([data[5], data[6], data[7], data[8]]);
        let msg_len = u32::from_le_bytes([data[9], data[10], data[11], data[12]]) as usize;

        if data.len() < 13 + msg_len {
            return None;
        }

        let message = String::from_utf8(data[13..13 + msg_len].to_vec()).ok()?;

        Some(Self {
            sqlstate,
            native_code,
            message,
        })
    }
}

pub type Result<T> = std::result::Result<T, OdbcError>;
