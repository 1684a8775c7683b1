//! Blocking façade over the async client.
//!
//! Callers with no event loop of their own get a plain blocking API.
//! Each façade instance hosts exactly one current-thread tokio runtime
//! on a private OS thread; every operation is spawned onto that runtime
//! and the calling thread blocks on a oneshot for the outcome. Errors
//! cross the boundary as the same [`IpcError`] values the async client
//! produces. Callers never observe the worker thread.

use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rmpv::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::client::IpcClient;
use crate::config::ClientConfig;
use crate::error::IpcError;

/// The private executor: a current-thread runtime parked on `stop`.
/// Work arrives via `handle.spawn` from caller threads.
struct Worker {
    handle: tokio::runtime::Handle,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
    /// Dropped by the worker thread on exit; lets `disconnect` join
    /// with a bounded wait.
    done: std::sync::mpsc::Receiver<()>,
}

/// Blocking IPC client.
///
/// The worker thread starts lazily on first use and is torn down by
/// [`disconnect`](SyncIpcClient::disconnect) or on drop (best effort).
pub struct SyncIpcClient {
    client: Arc<IpcClient>,
    worker: Mutex<Option<Worker>>,
    grace: Duration,
}

impl SyncIpcClient {
    pub fn new(config: ClientConfig) -> Self {
        let grace = config.disconnect_grace;
        Self {
            client: Arc::new(IpcClient::new(config)),
            worker: Mutex::new(None),
            grace,
        }
    }

    /// Connect to the daemon, starting the worker thread if this is the
    /// first use.
    pub fn connect(&self) -> Result<(), IpcError> {
        let client = Arc::clone(&self.client);
        self.run(async move { client.connect().await })
    }

    /// Invoke `method` with the default timeout.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, IpcError> {
        let client = Arc::clone(&self.client);
        let method = method.to_string();
        self.run(async move { client.call(&method, args).await })
    }

    /// Invoke `method`, waiting at most `timeout` for the reply.
    pub fn call_with_timeout(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, IpcError> {
        let client = Arc::clone(&self.client);
        let method = method.to_string();
        self.run(async move { client.call_with_timeout(&method, args, timeout).await })
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Disconnect from the daemon, then stop the executor and join the
    /// worker thread with a bounded wait. A no-op when never used.
    pub fn disconnect(&self) -> Result<(), IpcError> {
        let worker = self.worker.lock().unwrap().take();
        let Some(mut worker) = worker else {
            return Ok(());
        };

        let client = Arc::clone(&self.client);
        let (tx, rx) = oneshot::channel();
        worker.handle.spawn(async move {
            let _ = tx.send(client.disconnect().await);
        });
        let result = rx
            .blocking_recv()
            .unwrap_or(Err(IpcError::Cancelled));

        if let Some(stop) = worker.stop.take() {
            let _ = stop.send(());
        }
        match worker.done.recv_timeout(self.grace) {
            // The sender is only dropped when the thread runs off the
            // end, so Disconnected means it is ready to join.
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = worker.thread.take() {
                    let _ = thread.join();
                }
                debug!("worker thread joined");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("worker thread missed the shutdown grace period; detaching");
            }
            Ok(()) => unreachable!("worker thread never sends on the done channel"),
        }

        result
    }

    /// Run one future on the worker and block for its outcome.
    fn run<F, T>(&self, fut: F) -> Result<T, IpcError>
    where
        F: Future<Output = Result<T, IpcError>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.ensure_worker()?;
        let (tx, rx) = oneshot::channel();
        handle.spawn(async move {
            let _ = tx.send(fut.await);
        });
        rx.blocking_recv().unwrap_or(Err(IpcError::Cancelled))
    }

    fn ensure_worker(&self) -> Result<tokio::runtime::Handle, IpcError> {
        let mut worker = self.worker.lock().unwrap();
        if let Some(worker) = worker.as_ref() {
            return Ok(worker.handle.clone());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("assassinate-ipc".to_string())
            .spawn(move || {
                debug!("ipc worker thread started");
                runtime.block_on(async move {
                    let _ = stop_rx.await;
                });
                // Dropping the runtime here cancels anything still
                // spawned on it.
                debug!("ipc worker thread stopping");
                drop(done_tx);
            })?;

        *worker = Some(Worker {
            handle: handle.clone(),
            stop: Some(stop_tx),
            thread: Some(thread),
            done: done_rx,
        });
        Ok(handle)
    }
}

impl Drop for SyncIpcClient {
    fn drop(&mut self) {
        // Blocking from inside a runtime would panic; in that case the
        // caller is async anyway and owns an IpcClient it can close.
        if tokio::runtime::Handle::try_current().is_ok() {
            return;
        }
        let _ = self.disconnect();
    }
}
