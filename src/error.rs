//! Error handling for the s7-logger engine
//!
//! This module defines the engine's error taxonomy and a Result alias for use
//! throughout the crate. Nothing here is process-fatal: every variant is
//! surfaced to the caller, which decides how to present it to the operator.

use crate::types::VariableDescriptor;
use thiserror::Error;

/// Main error type for s7-logger operations
#[derive(Error, Debug)]
pub enum LoggerError {
    /// The PLC could not be reached at Connect time
    #[error("Connection error: {0}")]
    Connection(String),

    /// Start was requested with an empty registry or a zero interval
    #[error("Invalid start parameters: {0}")]
    InvalidStartParameters(String),

    /// A single variable could not be read this tick
    #[error("Read error for {variable}: {message}")]
    Read {
        variable: VariableDescriptor,
        message: String,
    },

    /// A read did not complete within the configured timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A variable failed several ticks in a row
    #[error("Variable {variable} unreachable after {failures} consecutive failures")]
    VariableUnreachable {
        variable: VariableDescriptor,
        failures: u32,
    },

    /// Journal write/delete failures and other filesystem errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Export requested while no samples exist
    #[error("Nothing to export: no samples recorded")]
    EmptyDataset,

    /// The variable is already registered
    #[error("Variable {0} is already registered")]
    DuplicateVariable(VariableDescriptor),

    /// The variable is not registered
    #[error("Variable {0} is not registered")]
    NotFound(VariableDescriptor),

    /// Removal attempted while polling is running
    #[error("Cannot remove {0} while polling is running")]
    RemovalWhileRunning(VariableDescriptor),

    /// Addition attempted while polling is running
    #[error("Cannot add {0} while polling is running")]
    AdditionWhileRunning(VariableDescriptor),

    /// The requested operation is not legal in the current session state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: crate::types::SessionState,
    },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to journal record encoding
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Errors raised by a table sink while writing an export
    #[error("Export error: {0}")]
    Export(String),

    /// Internal invariant failures such as a poisoned lock
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<LoggerError>,
    },
}

impl LoggerError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        LoggerError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with any context layers stripped
    pub fn root(&self) -> &LoggerError {
        match self {
            LoggerError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for per-variable, per-tick conditions that never stop the scheduler
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            LoggerError::Read { .. } | LoggerError::Timeout(_) | LoggerError::VariableUnreachable { .. }
        )
    }
}

impl From<serde_json::Error> for LoggerError {
    fn from(err: serde_json::Error) -> Self {
        LoggerError::Serialization(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for LoggerError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        LoggerError::Export(err.to_string())
    }
}

impl From<csv::Error> for LoggerError {
    fn from(err: csv::Error) -> Self {
        LoggerError::Export(err.to_string())
    }
}

/// Result type alias for s7-logger operations
pub type Result<T> = std::result::Result<T, LoggerError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| LoggerError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| LoggerError::Io(e).with_context(f()))
    }
}
