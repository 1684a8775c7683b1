//! Process-wide client handle.
//!
//! Tools built on this transport typically want one daemon connection
//! per process rather than one per subsystem. The handle is created
//! lazily on first use, is safe to initialize from any number of
//! threads concurrently, and registers a process-exit hook that
//! disconnects best-effort.

use std::sync::OnceLock;

use crate::config::ClientConfig;
use crate::sync::SyncIpcClient;

static GLOBAL: OnceLock<SyncIpcClient> = OnceLock::new();

/// The process-wide blocking client, created with `config` on first
/// call. Later calls return the existing handle and ignore `config`
/// (initialization is idempotent).
pub fn init(config: ClientConfig) -> &'static SyncIpcClient {
    GLOBAL.get_or_init(|| {
        // Static clients never run Drop, so teardown rides on atexit.
        unsafe {
            libc::atexit(disconnect_at_exit);
        }
        SyncIpcClient::new(config)
    })
}

/// The process-wide blocking client with default configuration.
pub fn global() -> &'static SyncIpcClient {
    init(ClientConfig::default())
}

extern "C" fn disconnect_at_exit() {
    if let Some(client) = GLOBAL.get() {
        let _ = client.disconnect();
    }
}
