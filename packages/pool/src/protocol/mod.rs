// packages/pool/src/protocol/mod.rs
//! Wire protocol between the pool and its workers
//!
//! Both transports speak the same message set:
//!
//! - **Pool → worker**: the terminate sentinel (a bare string) or an RPC
//!   request `{id, method, params}`.
//! - **Worker → pool**: the ready signal (a bare string), a terminal response
//!   `{id, result, error}` with exactly one of `result`/`error` non-null, or a
//!   mid-task event `{id, isEvent: true, payload}`.
//!
//! The process transport carries these as newline-delimited JSON over piped
//! stdio; the thread transport passes the typed values through channels
//! without serializing. Errors travel as plain records so that `name`,
//! `message`, `stack`, and any custom fields survive the hop.

pub mod transfer;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use transfer::{Reply, TaskOutput, Transfer};

/// Literal message requesting a graceful worker exit.
pub const TERMINATE_SENTINEL: &str = "__workerpool-terminate__";

/// Literal message a worker sends once its registration is complete.
pub const READY_SIGNAL: &str = "ready";

/// RPC call sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
    /// Binary frames accompanying the call. Moved by the thread transport,
    /// copied (base64) by the process transport.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "b64_frames")]
    pub transferables: Vec<Bytes>,
}

/// Terminal reply for one request. Exactly one of `result`/`error` is
/// non-null; both fields are always present on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<ErrorObject>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "b64_frames")]
    pub transferables: Vec<Bytes>,
}

impl Response {
    pub fn success(id: u64, result: Value, transferables: Vec<Bytes>) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
            transferables,
        }
    }

    pub fn failure(id: u64, error: ErrorObject) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
            transferables: Vec::new(),
        }
    }
}

/// Mid-task event emitted by a worker while a request is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    #[serde(rename = "isEvent")]
    pub is_event: bool,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "b64_frames")]
    pub transferables: Vec<Bytes>,
}

impl Event {
    pub fn new(id: u64, payload: Value, transferables: Vec<Bytes>) -> Self {
        Self {
            id,
            is_event: true,
            payload,
            transferables,
        }
    }
}

/// Message travelling from the pool to a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ParentMessage {
    Terminate,
    Request(Request),
}

/// Message travelling from a worker to the pool.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Ready,
    Response(Response),
    Event(Event),
}

impl ParentMessage {
    /// Encode as a single JSON line (no trailing newline).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            ParentMessage::Terminate => serde_json::to_string(TERMINATE_SENTINEL),
            ParentMessage::Request(req) => serde_json::to_string(req),
        }
    }

    pub fn from_json(line: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(line)?;
        match value {
            Value::String(s) if s == TERMINATE_SENTINEL => Ok(ParentMessage::Terminate),
            Value::String(s) => Err(ProtocolError::UnexpectedMessage(s)),
            v @ Value::Object(_) => {
                let req: Request = serde_json::from_value(v)?;
                Ok(ParentMessage::Request(req))
            }
            other => Err(ProtocolError::UnexpectedMessage(other.to_string())),
        }
    }
}

impl WorkerMessage {
    /// Encode as a single JSON line (no trailing newline).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            WorkerMessage::Ready => serde_json::to_string(READY_SIGNAL),
            WorkerMessage::Response(resp) => serde_json::to_string(resp),
            WorkerMessage::Event(ev) => serde_json::to_string(ev),
        }
    }

    pub fn from_json(line: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(line)?;
        match value {
            Value::String(s) if s == READY_SIGNAL => Ok(WorkerMessage::Ready),
            Value::String(s) => Err(ProtocolError::UnexpectedMessage(s)),
            Value::Object(map) => {
                let v = Value::Object(map);
                let is_event = v
                    .get("isEvent")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if is_event {
                    Ok(WorkerMessage::Event(serde_json::from_value(v)?))
                } else {
                    Ok(WorkerMessage::Response(serde_json::from_value(v)?))
                }
            }
            other => Err(ProtocolError::UnexpectedMessage(other.to_string())),
        }
    }
}

/// Decoding failure for an inbound line.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
}

/// An error crossing the transport as a plain record.
///
/// `name` and `message` are captured explicitly, `stack` when available, and
/// any custom fields ride along flattened so they survive round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, Value>,
}

impl ErrorObject {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new("UnknownMethodError", format!("Unknown method \"{method}\""))
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl std::fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl From<&str> for ErrorObject {
    fn from(message: &str) -> Self {
        ErrorObject::new("Error", message)
    }
}

impl From<String> for ErrorObject {
    fn from(message: String) -> Self {
        ErrorObject::new("Error", message)
    }
}

mod b64_frames {
    //! Base64 framing for binary buffers on the JSON wire.

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(frames: &[Bytes], ser: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = frames.iter().map(|b| STANDARD.encode(b)).collect();
        ser.collect_seq(encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Bytes>, D::Error> {
        let encoded = Vec::<String>::deserialize(de)?;
        encoded
            .into_iter()
            .map(|s| {
                STANDARD
                    .decode(s.as_bytes())
                    .map(Bytes::from)
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sentinel_and_ready_are_bare_strings() {
        assert_eq!(
            ParentMessage::Terminate.to_json().unwrap(),
            format!("\"{TERMINATE_SENTINEL}\"")
        );
        assert_eq!(WorkerMessage::Ready.to_json().unwrap(), "\"ready\"");
        assert_eq!(
            ParentMessage::from_json("\"__workerpool-terminate__\"").unwrap(),
            ParentMessage::Terminate
        );
        assert_eq!(
            WorkerMessage::from_json("\"ready\"").unwrap(),
            WorkerMessage::Ready
        );
    }

    #[test]
    fn test_request_shape() {
        let req = Request {
            id: 7,
            method: "add".into(),
            params: vec![json!(2), json!(3)],
            transferables: Vec::new(),
        };
        let line = ParentMessage::Request(req.clone()).to_json().unwrap();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, json!({"id": 7, "method": "add", "params": [2, 3]}));

        match ParentMessage::from_json(&line).unwrap() {
            ParentMessage::Request(back) => assert_eq!(back, req),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_response_carries_both_fields() {
        let ok = WorkerMessage::Response(Response::success(1, json!(5), Vec::new()));
        let parsed: Value = serde_json::from_str(&ok.to_json().unwrap()).unwrap();
        assert_eq!(parsed, json!({"id": 1, "result": 5, "error": null}));

        let err = WorkerMessage::Response(Response::failure(
            2,
            ErrorObject::unknown_method("nope"),
        ));
        let parsed: Value = serde_json::from_str(&err.to_json().unwrap()).unwrap();
        assert_eq!(parsed["result"], Value::Null);
        assert_eq!(parsed["error"]["name"], "UnknownMethodError");
        assert_eq!(parsed["error"]["message"], "Unknown method \"nope\"");
    }

    #[test]
    fn test_event_shape() {
        let ev = WorkerMessage::Event(Event::new(3, json!("progress: 50"), Vec::new()));
        let line = ev.to_json().unwrap();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            parsed,
            json!({"id": 3, "isEvent": true, "payload": "progress: 50"})
        );
        match WorkerMessage::from_json(&line).unwrap() {
            WorkerMessage::Event(back) => assert_eq!(back.payload, json!("progress: 50")),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_error_object_keeps_custom_fields() {
        let err = ErrorObject::new("ValidationError", "bad input")
            .with_field("code", json!(42))
            .with_field("hint", json!("check the args"));
        let line = serde_json::to_string(&err).unwrap();
        let back: ErrorObject = serde_json::from_str(&line).unwrap();
        assert_eq!(back, err);
        assert_eq!(back.extra["code"], json!(42));
    }

    #[test]
    fn test_transferables_round_trip_as_base64() {
        let req = Request {
            id: 9,
            method: "blob".into(),
            params: Vec::new(),
            transferables: vec![Bytes::from_static(b"\x00\x01\x02")],
        };
        let line = ParentMessage::Request(req.clone()).to_json().unwrap();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["transferables"][0], json!("AAEC"));
        match ParentMessage::from_json(&line).unwrap() {
            ParentMessage::Request(back) => assert_eq!(back.transferables, req.transferables),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_bare_string_is_rejected() {
        assert!(ParentMessage::from_json("\"hello\"").is_err());
        assert!(WorkerMessage::from_json("[1,2]").is_err());
    }
}
