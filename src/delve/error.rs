//! Error types for the debugger backend
//!
//! Launch configuration problems, process failures and RPC failures are kept
//! apart so the session can map each to its own response code.

use std::path::PathBuf;

use crate::delve::rpc::RpcError;
use crate::io::ProcessError;

// ============================================================================
// Backend Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Configuration error: {0}")]
    Config(#[from] DelveConfigError),

    /// The debugger started but its RPC endpoint could not be reached
    #[error("Failed to connect to debugger: {0}")]
    ConnectFailed(String),

    /// A call was made on a backend that was closed before connecting
    #[error("Debugger not connected")]
    NotConnected,
}

// ============================================================================
// Launch Configuration Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DelveConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid port {port}: {reason}")]
    InvalidPort { port: u16, reason: String },

    #[error("Invalid program: {path} - {reason}")]
    InvalidProgram { path: PathBuf, reason: String },

    #[error("Invalid flag {flag}: {reason}")]
    InvalidFlag { flag: String, reason: String },
}

impl DelveConfigError {
    pub fn missing_field(field: &str) -> Self {
        Self::MissingField {
            field: field.to_string(),
        }
    }

    pub fn invalid_program(path: impl Into<PathBuf>, reason: &str) -> Self {
        Self::InvalidProgram {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_flag(flag: &str, reason: &str) -> Self {
        Self::InvalidFlag {
            flag: flag.to_string(),
            reason: reason.to_string(),
        }
    }
}
