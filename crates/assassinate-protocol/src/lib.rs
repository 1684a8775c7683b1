//! RPC envelopes for the assassinate IPC transport.
//!
//! Every frame on a ring carries one envelope, encoded as a MessagePack
//! map. Field names are the wire contract shared with the daemon:
//!
//! ```text
//! request: {call_id: u64, request: {method: str, args: [any, ...]}}
//! reply:   {call_id: u64, response: {result: any}}
//!        | {call_id: u64, error: {code: str, message: str}}
//! ```
//!
//! `args` elements and `result` may be any MessagePack value, including
//! nested maps and byte strings; binary payloads pass through as `bin`
//! without transcoding. Structs are encoded with
//! [`rmp_serde::to_vec_named`] so fields land as map keys rather than
//! positional arrays.

use rmpv::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A method call travelling from client to daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlates the eventual reply with the caller.
    pub call_id: u64,
    pub request: CallBody,
}

/// The method/argument pair inside a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallBody {
    pub method: String,
    pub args: Vec<Value>,
}

/// A reply travelling from daemon to client.
///
/// Exactly one of `response` / `error` is present; the absent key is not
/// serialized at all. [`ReplyEnvelope::into_outcome`] enforces this on
/// the decode side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub call_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Successful result wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub result: Value,
}

/// Daemon-reported failure. `code` is a stable machine-readable
/// identifier; `message` is free text for humans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// What a decoded reply means for the waiting caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Result(Value),
    Error { code: String, message: String },
}

impl RequestEnvelope {
    pub fn new(call_id: u64, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            call_id,
            request: CallBody {
                method: method.into(),
                args,
            },
        }
    }
}

impl ReplyEnvelope {
    /// Build a success reply.
    pub fn result(call_id: u64, result: Value) -> Self {
        Self {
            call_id,
            response: Some(ResponseBody { result }),
            error: None,
        }
    }

    /// Build an error reply.
    pub fn error(call_id: u64, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id,
            response: None,
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// Collapse the two optional bodies into the one thing a caller can
    /// act on. A reply carrying neither body is malformed.
    pub fn into_outcome(self) -> Result<ReplyOutcome, CodecError> {
        match (self.response, self.error) {
            (Some(body), _) => Ok(ReplyOutcome::Result(body.result)),
            (None, Some(err)) => Ok(ReplyOutcome::Error {
                code: err.code,
                message: err.message,
            }),
            (None, None) => Err(CodecError::MalformedReply {
                call_id: self.call_id,
            }),
        }
    }
}

/// Codec failures, kept distinct from transport errors so a bad frame
/// fails only the affected call.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The envelope could not be serialized.
    #[error("failed to serialize envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    /// The bytes did not decode as a valid envelope.
    #[error("failed to deserialize envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    /// A reply must carry exactly one of `response` / `error`.
    #[error("reply for call {call_id} carries neither result nor error")]
    MalformedReply { call_id: u64 },
}

/// Encode a request envelope to MessagePack bytes.
pub fn encode_request(envelope: &RequestEnvelope) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(envelope)?)
}

/// Decode a request envelope (daemon side of the request ring).
pub fn decode_request(bytes: &[u8]) -> Result<RequestEnvelope, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Encode a reply envelope to MessagePack bytes.
pub fn encode_reply(envelope: &ReplyEnvelope) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(envelope)?)
}

/// Decode a reply envelope (client side of the response ring).
pub fn decode_reply(bytes: &[u8]) -> Result<ReplyEnvelope, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
