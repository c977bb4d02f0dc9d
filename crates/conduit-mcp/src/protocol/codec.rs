//! JSON-RPC 2.0 envelope and frame codec.
//!
//! Message kinds are discriminated by field presence, checked in a fixed
//! order: `error`, then `result`, then `method` + `id`, then `method`
//! alone. Batch arrays are accepted on input but never produced on output.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::codes;

/// JSON-RPC version constant carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

fn version() -> Cow<'static, str> {
    Cow::Borrowed(JSONRPC_VERSION)
}

/// Request identifier: a string or an integer, unique per sender for the
/// lifetime of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// The integer form of this id, if it has one.
    #[must_use]
    pub const fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(_) => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// A call expecting a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "version")]
    pub jsonrpc: Cow<'static, str>,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: version(), id: id.into(), method: method.into(), params }
    }
}

/// A successful reply, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "version")]
    pub jsonrpc: Cow<'static, str>,
    pub id: RequestId,
    pub result: Value,
}

impl Response {
    #[must_use]
    pub fn new(id: RequestId, result: Value) -> Self {
        Self { jsonrpc: version(), id, result }
    }
}

/// A failed reply. `id` is null when the request could not be parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default = "version")]
    pub jsonrpc: Cow<'static, str>,
    pub id: Option<RequestId>,
    pub error: RpcError,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(id: Option<RequestId>, error: RpcError) -> Self {
        Self { jsonrpc: version(), id, error }
    }
}

/// The error object inside an [`ErrorResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn parse_error(detail: impl fmt::Display) -> Self {
        Self::new(codes::PARSE_ERROR, format!("Parse error: {detail}"))
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    #[must_use]
    pub fn invalid_params(detail: impl fmt::Display) -> Self {
        Self::new(codes::INVALID_PARAMS, format!("Invalid params: {detail}"))
    }

    /// Internal fault; the textual reason travels in `error.data`.
    #[must_use]
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, "Internal error").with_data(Value::String(reason.into()))
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// A call expecting no reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default = "version")]
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: version(), method: method.into(), params }
    }
}

/// Any JSON-RPC frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Error(ErrorResponse),
    Response(Response),
    Request(Request),
    Notification(Notification),
}

impl Message {
    /// Classify a decoded JSON value by field presence.
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let obj = value.as_object().ok_or(CodecError::NotAnObject)?;
        if obj.contains_key("error") {
            return Ok(Self::Error(serde_json::from_value(value)?));
        }
        if obj.contains_key("result") {
            return Ok(Self::Response(serde_json::from_value(value)?));
        }
        if obj.contains_key("method") {
            if obj.contains_key("id") {
                return Ok(Self::Request(serde_json::from_value(value)?));
            }
            return Ok(Self::Notification(serde_json::from_value(value)?));
        }
        Err(CodecError::UnknownShape)
    }

    /// The method name, for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) | Self::Error(_) => None,
        }
    }

    /// The correlation id, where the frame carries one.
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Response(r) => Some(&r.id),
            Self::Error(e) => e.id.as_ref(),
            Self::Notification(_) => None,
        }
    }

    #[must_use]
    pub const fn is_notification(&self) -> bool {
        matches!(self, Self::Notification(_))
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Frame decoding failures.
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has neither method, result, nor error")]
    UnknownShape,

    #[error("empty batch")]
    EmptyBatch,
}

/// Decode a single frame.
pub fn decode_frame(raw: &str) -> Result<Message, CodecError> {
    let value: Value = serde_json::from_str(raw)?;
    Message::from_value(value)
}

/// Decode a frame that may be a batch array. A non-array input yields a
/// one-element vector; an element that fails classification fails the call.
pub fn decode_frames(raw: &str) -> Result<Vec<Message>, CodecError> {
    let value: Value = serde_json::from_str(raw)?;
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(CodecError::EmptyBatch);
            }
            items.into_iter().map(Message::from_value).collect()
        }
        other => Ok(vec![Message::from_value(other)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_discriminates_request() {
        let msg = decode_frame(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert!(matches!(msg, Message::Request(ref r) if r.method == "ping"));
        assert_eq!(msg.id(), Some(&RequestId::Number(1)));
    }

    #[test]
    fn test_discriminates_notification() {
        let msg =
            decode_frame(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(msg.is_notification());
        assert_eq!(msg.method(), Some("notifications/initialized"));
    }

    #[test]
    fn test_discriminates_response() {
        let msg = decode_frame(r#"{"jsonrpc":"2.0","id":"a","result":{"ok":true}}"#).unwrap();
        assert!(matches!(msg, Message::Response(_)));
    }

    #[test]
    fn test_error_wins_over_result() {
        // A frame carrying both fields classifies as an error response.
        let msg = decode_frame(
            r#"{"jsonrpc":"2.0","id":1,"result":null,"error":{"code":-32603,"message":"boom"}}"#,
        )
        .unwrap();
        assert!(matches!(msg, Message::Error(ref e) if e.error.code == -32603));
    }

    #[test]
    fn test_error_with_null_id() {
        let msg = decode_frame(
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#,
        )
        .unwrap();
        match msg {
            Message::Error(e) => assert!(e.id.is_none()),
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_shapeless_frame() {
        assert!(matches!(
            decode_frame(r#"{"jsonrpc":"2.0","id":7}"#),
            Err(CodecError::UnknownShape)
        ));
        assert!(matches!(decode_frame("[1,2"), Err(CodecError::Json(_))));
        assert!(matches!(decode_frame("42"), Err(CodecError::NotAnObject)));
    }

    #[test]
    fn test_batch_accepted_on_input() {
        let frames = decode_frames(
            r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notifications/initialized"}]"#,
        )
        .unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[1].is_notification());

        assert!(matches!(decode_frames("[]"), Err(CodecError::EmptyBatch)));
    }

    #[test]
    fn test_round_trip_semantic_equality() {
        let original = Message::Request(Request::new(
            42,
            "tools/call",
            Some(json!({"name":"echo","arguments":{"text":"hi"}})),
        ));
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(original, decoded);

        // Key order must not matter.
        let reordered =
            r#"{"method":"tools/call","params":{"arguments":{"text":"hi"},"name":"echo"},"id":42,"jsonrpc":"2.0"}"#;
        assert_eq!(original, decode_frame(reordered).unwrap());
    }

    #[test]
    fn test_string_and_number_ids() {
        assert_eq!(RequestId::from(3).to_string(), "3");
        assert_eq!(RequestId::from("req-9").to_string(), "req-9");
        assert_eq!(RequestId::Number(3).as_number(), Some(3));
        assert_eq!(RequestId::from("x").as_number(), None);
    }
}
