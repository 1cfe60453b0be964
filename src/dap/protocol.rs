//! Debug adapter protocol envelope
//!
//! Every message on the front-end stream is one of three kinds, discriminated
//! by its `type` field. Argument and body payloads stay opaque JSON records at
//! this layer; handlers deserialize them into the typed shapes in
//! [`crate::dap::types`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// A decoded front-end message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    Request(Request),
    Response(Response),
    Event(Event),
}

impl ProtocolMessage {
    /// Sequence number assigned by the sender
    pub fn seq(&self) -> i64 {
        match self {
            ProtocolMessage::Request(r) => r.seq,
            ProtocolMessage::Response(r) => r.seq,
            ProtocolMessage::Event(e) => e.seq,
        }
    }

    pub(crate) fn set_seq(&mut self, seq: i64) {
        match self {
            ProtocolMessage::Request(r) => r.seq = seq,
            ProtocolMessage::Response(r) => r.seq = seq,
            ProtocolMessage::Event(e) => e.seq = seq,
        }
    }

    /// Name used in logs: the command or event name
    pub fn name(&self) -> &str {
        match self {
            ProtocolMessage::Request(r) => &r.command,
            ProtocolMessage::Response(r) => &r.command,
            ProtocolMessage::Event(e) => &e.event,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub seq: i64,

    #[serde(default)]
    pub command: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
}

impl Request {
    pub fn new(command: impl Into<String>, arguments: Value) -> Self {
        Self {
            seq: 0,
            command: command.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub seq: i64,

    #[serde(default)]
    pub request_seq: i64,

    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub command: String,

    /// Human-readable failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

impl Response {
    /// Successful response to `request`
    pub fn success(request: &Request, body: Value) -> Self {
        Self {
            seq: 0,
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body,
        }
    }

    /// Failed response carrying only a message
    pub fn failure(request_seq: i64, command: &str, message: impl Into<String>) -> Self {
        Self {
            seq: 0,
            request_seq,
            success: false,
            command: command.to_string(),
            message: Some(message.into()),
            body: Value::Null,
        }
    }

    /// Failed response carrying a structured error message
    ///
    /// The top-level `message` is rendered with PII exclusion; the front end
    /// gets the full template and variables in `body.error`.
    pub fn error(request: &Request, error: ErrorMessage) -> Self {
        let message = format_pii(&error.format, true, &error.variables);
        Self {
            seq: 0,
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(message),
            body: serde_json::json!({ "error": error }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub seq: i64,

    #[serde(default)]
    pub event: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

impl Event {
    pub fn new(event: impl Into<String>, body: Value) -> Self {
        Self {
            seq: 0,
            event: event.into(),
            body,
        }
    }
}

// ============================================================================
// Structured error messages
// ============================================================================

/// Where an error should be surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDestination {
    User,
    Telemetry,
}

/// Error payload carried in `body.error` of a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub id: i64,

    pub format: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub show_user: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub send_telemetry: bool,
}

impl ErrorMessage {
    pub fn new(id: i64, format: impl Into<String>, destination: ErrorDestination) -> Self {
        Self {
            id,
            format: format.into(),
            variables: Map::new(),
            show_user: destination == ErrorDestination::User,
            send_telemetry: destination == ErrorDestination::Telemetry,
        }
    }

    pub fn with_variable(mut self, name: &str, value: impl Into<String>) -> Self {
        self.variables
            .insert(name.to_string(), Value::String(value.into()));
        self
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Intentional .expect() - the pattern is a literal
    PATTERN.get_or_init(|| Regex::new(r"\{([^}]+)\}").expect("valid placeholder pattern"))
}

/// Substitute `{name}` placeholders in `format` from `variables`
///
/// With `exclude_pii`, placeholders whose name does not start with `_` are
/// left as-is. Placeholders without a matching variable are left as-is too.
pub fn format_pii(format: &str, exclude_pii: bool, variables: &Map<String, Value>) -> String {
    placeholder_pattern()
        .replace_all(format, |caps: &regex::Captures<'_>| {
            let whole = caps[0].to_string();
            let name = &caps[1];
            if exclude_pii && !name.starts_with('_') {
                return whole;
            }
            match variables.get(name) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => whole,
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_field_discriminates_kind() {
        let request: ProtocolMessage = serde_json::from_value(json!({
            "seq": 3, "type": "request", "command": "next", "arguments": {"threadId": 1}
        }))
        .unwrap();
        assert!(matches!(request, ProtocolMessage::Request(ref r) if r.command == "next"));

        let event: ProtocolMessage =
            serde_json::from_value(json!({"type": "event", "seq": 1, "event": "initialized"}))
                .unwrap();
        assert_eq!(event.name(), "initialized");

        let response: ProtocolMessage = serde_json::from_value(json!({
            "type": "response", "seq": 9, "request_seq": 4, "success": true, "command": "threads"
        }))
        .unwrap();
        match response {
            ProtocolMessage::Response(r) => {
                assert_eq!(r.request_seq, 4);
                assert!(r.body.is_null());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_serialized_envelope_shape() {
        let message = ProtocolMessage::Event(Event {
            seq: 5,
            event: "stopped".to_string(),
            body: json!({"reason": "step", "threadId": 2}),
        });
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"seq": 5, "type": "event", "event": "stopped",
                   "body": {"reason": "step", "threadId": 2}})
        );

        let ack = ProtocolMessage::Response(Response::success(
            &Request {
                seq: 7,
                command: "pause".to_string(),
                arguments: Value::Null,
            },
            Value::Null,
        ));
        let value = serde_json::to_value(&ack).unwrap();
        assert_eq!(value["request_seq"], 7);
        assert!(value.get("body").is_none());
        assert!(value.get("message").is_none());
    }

    #[test]
    fn test_format_pii_keeps_private_placeholders_when_excluding() {
        let mut variables = Map::new();
        variables.insert("path".to_string(), json!("/home/me/main.go"));
        variables.insert("_reason".to_string(), json!("no such file"));

        assert_eq!(
            format_pii("cannot open {path}: {_reason}", true, &variables),
            "cannot open {path}: no such file"
        );
        assert_eq!(
            format_pii("cannot open {path}: {_reason}", false, &variables),
            "cannot open /home/me/main.go: no such file"
        );
    }

    #[test]
    fn test_format_pii_leaves_unknown_placeholders() {
        let variables = Map::new();
        assert_eq!(format_pii("{_missing} here", false, &variables), "{_missing} here");
    }

    #[test]
    fn test_error_response_carries_template_and_message() {
        let request = Request {
            seq: 12,
            command: "frobnicate".to_string(),
            arguments: Value::Null,
        };
        let error = ErrorMessage::new(1014, "unhandled request: {_command}", ErrorDestination::Telemetry)
            .with_variable("_command", "frobnicate");

        let response = Response::error(&request, error);

        assert!(!response.success);
        assert_eq!(response.request_seq, 12);
        assert_eq!(response.message.as_deref(), Some("unhandled request: frobnicate"));
        assert_eq!(response.body["error"]["id"], 1014);
        assert_eq!(response.body["error"]["sendTelemetry"], true);
        assert!(response.body["error"].get("showUser").is_none());
    }
}
