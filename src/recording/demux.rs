//! # Control/Data Demultiplexer
//!
//! Audio and control signals share one WebSocket. Every inbound message is
//! classified here before the connection actor acts on it.
//!
//! ## Message Format:
//! - **Client → Server**: Binary audio payload, or JSON control signals
//!   `{"conversationId": 42}` and `{"done": true}`
//! - **Server → Client**: JSON notifications, see [`Notification`]
//!
//! ## Classification rules:
//! - A **binary** frame is control only if it parses as a recognized signal.
//!   Anything else, JSON-looking or not, is audio and goes to the sink untouched.
//! - A **text** frame is always a control attempt. If it is not a recognized
//!   signal it is rejected (logged by the caller) and never written to the artifact.
//!   This departs from writing every non-signal message: text payload such as
//!   `"hello, not json"` is dropped, so clients must send audio as binary frames.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// A recognized control signal.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlSignal {
    /// Bind the session to a conversation and acknowledge with `ready`.
    BindConversation(i64),
    /// Finish cleanly. A conversation id sent in the same message is bound first.
    Done { conversation_id: Option<i64> },
}

/// The classification of one inbound message.
#[derive(Debug, PartialEq)]
pub enum Inbound<'a> {
    Control(ControlSignal),
    Payload(&'a [u8]),
    /// A text frame that is not a recognized control signal.
    Rejected(ControlParseError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlParseError {
    NotJson,
    NotAnObject,
    Unrecognized(String),
}

impl fmt::Display for ControlParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlParseError::NotJson => write!(f, "not valid JSON"),
            ControlParseError::NotAnObject => write!(f, "not a JSON object"),
            ControlParseError::Unrecognized(reason) => write!(f, "unrecognized control signal: {}", reason),
        }
    }
}

/// Server → client notification frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Notification {
    /// Acknowledges a `conversationId` binding
    Ready,
    /// Recording pinned and recorded
    Complete { cid: String, url: String },
    /// Upload or metadata write failed
    Error { message: String },
}

impl Notification {
    pub fn to_json(&self) -> String {
        // Serializing these plain variants cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"status":"error","message":"internal"}"#.to_string())
    }
}

pub fn classify_binary(bytes: &[u8]) -> Inbound<'_> {
    match parse_control(bytes) {
        Ok(signal) => Inbound::Control(signal),
        Err(_) => Inbound::Payload(bytes),
    }
}

pub fn classify_text(text: &str) -> Inbound<'static> {
    match parse_control(text.as_bytes()) {
        Ok(signal) => Inbound::Control(signal),
        Err(err) => Inbound::Rejected(err),
    }
}

/// Parse a control signal.
///
/// `conversationId` is integer-like: a JSON integer or a string holding one.
/// `done` must be literally `true`; `{"done": false}` is not a signal.
pub fn parse_control(bytes: &[u8]) -> Result<ControlSignal, ControlParseError> {
    let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
    if first != Some(&b'{') {
        // Cheap reject for audio before handing megabytes to the JSON parser
        return Err(if first.is_none() { ControlParseError::NotJson } else { ControlParseError::NotAnObject });
    }

    let value: Value = serde_json::from_slice(bytes).map_err(|_| ControlParseError::NotJson)?;
    let object = value.as_object().ok_or(ControlParseError::NotAnObject)?;

    let conversation_id = match object.get("conversationId") {
        None => None,
        Some(raw) => Some(parse_conversation_id(raw)?),
    };

    match object.get("done") {
        Some(Value::Bool(true)) => Ok(ControlSignal::Done { conversation_id }),
        Some(other) => Err(ControlParseError::Unrecognized(format!("done must be true, got {}", other))),
        None => match conversation_id {
            Some(id) => Ok(ControlSignal::BindConversation(id)),
            None => Err(ControlParseError::Unrecognized("no conversationId or done field".to_string())),
        },
    }
}

fn parse_conversation_id(raw: &Value) -> Result<i64, ControlParseError> {
    let parsed = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ControlParseError::Unrecognized(format!("conversationId is not an integer: {}", raw)))
}
