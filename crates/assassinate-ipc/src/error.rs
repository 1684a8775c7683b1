//! Error taxonomy surfaced by the IPC client.

use std::time::Duration;

use assassinate_protocol::CodecError;
use thiserror::Error;

/// Everything a caller of the client can observe going wrong.
///
/// Codec failures and timeouts fail only the affected call; ring-level
/// hiccups in the reader are logged and retried internally. Only
/// [`IpcError::RegionMissing`] and an explicit disconnect terminate the
/// client.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Operation issued before `connect` or after `disconnect`.
    #[error("not connected to the daemon; call connect() first")]
    NotConnected,

    /// The named region does not exist, i.e. the daemon is not running.
    #[error("shared memory region {name:?} not found; is the daemon running?")]
    RegionMissing { name: String },

    /// The request ring stayed full past the call deadline, or the
    /// request can never fit the ring at all.
    #[error("request ring full; the daemon is not draining requests")]
    Backpressure,

    /// Local serialization or deserialization failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// No reply arrived within the deadline. The pending entry has been
    /// removed; a late reply will be dropped by the reader.
    #[error("call to {method:?} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The daemon reported a failure; `code` and `message` are passed
    /// through verbatim.
    #[error("{code}: {message}")]
    Remote { code: String, message: String },

    /// The client shut down while the call was in flight.
    #[error("call cancelled by client shutdown")]
    Cancelled,

    /// Low-level shared memory failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IpcError {
    /// Stable machine-readable identifier for this error kind, matching
    /// the codes used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            IpcError::NotConnected => "NOT_CONNECTED",
            IpcError::RegionMissing { .. } => "REGION_MISSING",
            IpcError::Backpressure => "BACKPRESSURE",
            IpcError::Codec(CodecError::Encode(_)) => "SERIALIZATION_ERROR",
            IpcError::Codec(_) => "DESERIALIZATION_ERROR",
            IpcError::Timeout { .. } => "TIMEOUT",
            IpcError::Remote { .. } => "REMOTE_ERROR",
            IpcError::Cancelled => "CANCELLED",
            IpcError::Io(_) => "IO_ERROR",
        }
    }
}
