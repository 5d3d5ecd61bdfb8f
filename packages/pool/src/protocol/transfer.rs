// packages/pool/src/protocol/transfer.rs
//! Ownership-transfer envelope
//!
//! A [`Transfer`] wraps a result or event payload together with the binary
//! buffers that should move rather than copy. The thread transport passes the
//! `Bytes` handles through its channel, relinquishing them at the worker side;
//! the process transport cannot move ownership across the process boundary and
//! copies the frames onto the wire instead.

use bytes::Bytes;
use serde_json::Value;

/// Immutable `(message, transferables)` envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub message: Value,
    pub transferables: Vec<Bytes>,
}

impl Transfer {
    pub fn new(message: Value, transferables: Vec<Bytes>) -> Self {
        Self {
            message,
            transferables,
        }
    }
}

/// What a worker method yields: a plain value, or a value with buffers to
/// hand over.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Value(Value),
    Transfer(Transfer),
}

impl Reply {
    pub fn into_parts(self) -> (Value, Vec<Bytes>) {
        match self {
            Reply::Value(value) => (value, Vec::new()),
            Reply::Transfer(t) => (t.message, t.transferables),
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

impl From<Transfer> for Reply {
    fn from(t: Transfer) -> Self {
        Reply::Transfer(t)
    }
}

/// Settled value delivered to the caller: the result (or event payload) plus
/// any buffers that travelled with it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    pub value: Value,
    pub transferables: Vec<Bytes>,
}

impl TaskOutput {
    pub fn new(value: Value, transferables: Vec<Bytes>) -> Self {
        Self {
            value,
            transferables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_reply_has_no_buffers() {
        let (value, buffers) = Reply::from(json!({"ok": true})).into_parts();
        assert_eq!(value, json!({"ok": true}));
        assert!(buffers.is_empty());
    }

    #[test]
    fn test_transfer_reply_exposes_message_and_buffers() {
        let buf = Bytes::from_static(b"payload");
        let reply = Reply::from(Transfer::new(json!("done"), vec![buf.clone()]));
        let (value, buffers) = reply.into_parts();
        assert_eq!(value, json!("done"));
        assert_eq!(buffers, vec![buf]);
    }
}
