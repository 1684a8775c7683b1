//! Client configuration.

use std::time::Duration;

/// Default shared memory base name; must match the daemon's.
pub const DEFAULT_SHM_NAME: &str = "/assassinate_msf_ipc";

/// Default per-ring data capacity: 8 MiB.
pub const DEFAULT_CAPACITY: usize = 8 * 1024 * 1024;

/// Default per-call deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default idle back-off for the response reader. Trades sub-
/// microsecond latency for a small idle-CPU floor.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Default wait for the reader task to exit on shutdown.
pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Tunables for one client. The shared memory name and capacity are a
/// contract with the daemon; the rest only shape client behavior.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base name for the ring pair; `_req` / `_resp` are appended.
    pub shm_name: String,
    /// Bytes per ring data area. Must match the daemon's value.
    pub capacity: usize,
    /// Per-call wait cap when the caller does not override it.
    pub default_timeout: Duration,
    /// Idle back-off for the reader and for full-ring retries.
    pub poll_interval: Duration,
    /// How long `disconnect` waits for the reader before aborting it.
    pub disconnect_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            shm_name: DEFAULT_SHM_NAME.to_string(),
            capacity: DEFAULT_CAPACITY,
            default_timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shm_name(mut self, name: impl Into<String>) -> Self {
        self.shm_name = name.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    /// Name of the request ring region (client writes, daemon reads).
    pub fn request_name(&self) -> String {
        format!("{}_req", self.shm_name)
    }

    /// Name of the response ring region (daemon writes, client reads).
    pub fn response_name(&self) -> String {
        format!("{}_resp", self.shm_name)
    }
}
