//! Shared-memory IPC client for the assassinate daemon.
//!
//! The daemon hosts an embedded interpreter that must be driven from
//! its initializing thread, so clients cannot call it directly: they
//! marshal requests over a pair of lock-free SPSC ring buffers in named
//! shared memory and correlate replies by call id. No kernel syscalls
//! sit on the hot path.
//!
//! # Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ sync:   blocking façade on a private worker thread   │
//! │ client: async pump: writes, reader task, timeouts    │
//! │ codec:  MessagePack envelopes (assassinate-protocol) │
//! │ ring:   SPSC byte queues, length-prefixed frames     │
//! │ shm:    named POSIX shared memory mappings           │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! One client uses two rings: it writes requests into `<name>_req` and
//! a single background task drains replies from `<name>_resp`, routing
//! each to its waiting caller by `call_id`. Replies may arrive in any
//! order.
//!
//! # Example
//!
//! ```no_run
//! use assassinate_ipc::{ClientConfig, SyncIpcClient, Value};
//!
//! let client = SyncIpcClient::new(ClientConfig::default());
//! client.connect()?;
//! let version = client.call("framework_version", vec![])?;
//! println!("daemon version: {version}");
//! client.disconnect()?;
//! # Ok::<(), assassinate_ipc::IpcError>(())
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod global;
pub mod ring;
pub mod shm;
pub mod sync;

pub use client::{Caller, IpcClient};
pub use config::ClientConfig;
pub use error::IpcError;
pub use sync::SyncIpcClient;

// Re-exported so callers can build argument vectors without naming the
// encoding crate themselves.
pub use rmpv::Value;

pub use assassinate_protocol as protocol;
