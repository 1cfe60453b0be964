//! Failures surfaced to the front end as error responses
//!
//! Every handler failure becomes a [`SessionError`]: a numeric code plus a
//! message template whose `{name}` placeholders are filled from `variables`.
//! Placeholders starting with `_` carry no personal data and are the only ones
//! substituted into the response's top-level message.

use serde_json::{Map, Value};
use std::fmt;

use crate::dap::protocol::{ErrorDestination, ErrorMessage, format_pii};
use crate::delve::error::BackendError;
use crate::session::commands::Command;

// ============================================================================
// Error Codes
// ============================================================================

pub const UNHANDLED_REQUEST: i64 = 1014;
pub const INTERNAL_ERROR: i64 = 1104;
pub const LAUNCH_FAILED: i64 = 3000;
pub const NOT_LAUNCHED: i64 = 3001;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionError {
    pub code: i64,
    pub format: String,
    pub variables: Map<String, Value>,
    pub destination: ErrorDestination,
}

impl SessionError {
    pub fn new(code: i64, format: impl Into<String>, destination: ErrorDestination) -> Self {
        Self {
            code,
            format: format.into(),
            variables: Map::new(),
            destination,
        }
    }

    pub fn with_variable(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.variables
            .insert(name.to_string(), Value::String(value.to_string()));
        self
    }

    pub fn unhandled(command: &str) -> Self {
        Self::new(
            UNHANDLED_REQUEST,
            "unhandled request: {_command}",
            ErrorDestination::Telemetry,
        )
        .with_variable("_command", command)
    }

    pub fn internal(reason: impl fmt::Display) -> Self {
        Self::new(
            INTERNAL_ERROR,
            "internal error: {_reason}",
            ErrorDestination::Telemetry,
        )
        .with_variable("_reason", reason)
    }

    /// Request arguments that do not have the expected shape
    pub fn invalid_arguments(command: Command, reason: impl fmt::Display) -> Self {
        Self::new(
            INTERNAL_ERROR,
            "invalid arguments for {_command}: {_reason}",
            ErrorDestination::User,
        )
        .with_variable("_command", command.name())
        .with_variable("_reason", reason)
    }

    /// A backend call made on behalf of `command` failed
    pub fn backend(command: Command, error: &BackendError) -> Self {
        Self::new(
            command.error_code(),
            format!("{}: {{_error}}", command.failure_summary()),
            ErrorDestination::User,
        )
        .with_variable("_error", error)
    }

    pub fn launch(command: Command, error: impl fmt::Display) -> Self {
        Self::new(
            LAUNCH_FAILED,
            format!("{}: {{_error}}", command.failure_summary()),
            ErrorDestination::User,
        )
        .with_variable("_error", error)
    }

    pub fn not_launched(command: Command) -> Self {
        Self::new(
            NOT_LAUNCHED,
            "{_command}: the debugger has not been launched",
            ErrorDestination::User,
        )
        .with_variable("_command", command.name())
    }

    /// Reading a source file failed; the path is personal data
    pub fn source_unreadable(path: &str, error: impl fmt::Display) -> Self {
        Self::new(
            Command::Source.error_code(),
            "Unable to read source {path}: {_error}",
            ErrorDestination::User,
        )
        .with_variable("path", path)
        .with_variable("_error", error)
    }

    pub fn to_error_message(&self) -> ErrorMessage {
        let mut message = ErrorMessage::new(self.code, self.format.clone(), self.destination);
        message.variables = self.variables.clone();
        message
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_pii(&self.format, false, &self.variables))
    }
}

impl std::error::Error for SessionError {}
