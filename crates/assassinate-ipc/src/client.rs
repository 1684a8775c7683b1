//! Asynchronous RPC client: the request/response pump.
//!
//! One client owns the write end of the request ring and the read end of
//! the response ring. All response consumption is centralized in a
//! single background reader task which routes replies to waiting callers
//! by `call_id`; callers never touch the response ring themselves. With
//! the rings being strictly single-consumer, any scheme where each call
//! polls the ring inline would have to re-queue other callers' replies,
//! which the SPSC discipline forbids; it would break as soon as two
//! calls were in flight.
//!
//! Replies may arrive in any order; the pending table keyed by `call_id`
//! absorbs the reordering.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rmpv::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, error, info, warn};

use assassinate_protocol::{ReplyOutcome, RequestEnvelope, decode_reply, encode_request};

use crate::config::ClientConfig;
use crate::error::IpcError;
use crate::ring::{ReadError, RingReader, RingWriter, WriteError};
use crate::shm::SharedRegion;

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<ReplyOutcome>>>>;

/// Live connection state: the request-ring writer plus the reader task.
struct Conn {
    writer: RingWriter,
    shutdown: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

/// Asynchronous IPC client.
///
/// Created disconnected; [`connect`](IpcClient::connect) attaches to the
/// daemon's ring pair, [`disconnect`](IpcClient::disconnect) detaches.
/// Reconnecting after a disconnect is allowed; call ids keep counting up
/// across reconnects so they stay unique for the client's lifetime.
pub struct IpcClient {
    config: ClientConfig,
    next_call_id: AtomicU64,
    pending: PendingTable,
    conn: Mutex<Option<Conn>>,
}

impl IpcClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            next_call_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            conn: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().unwrap().is_some()
    }

    /// Attach to the daemon's ring pair and start the response reader.
    ///
    /// A no-op when already connected. Fails with
    /// [`IpcError::RegionMissing`] when the daemon has not created the
    /// regions.
    pub async fn connect(&self) -> Result<(), IpcError> {
        let mut conn = self.conn.lock().unwrap();
        if conn.is_some() {
            debug!("connect() while already connected; ignoring");
            return Ok(());
        }

        info!(
            shm = %self.config.shm_name,
            capacity = self.config.capacity,
            "connecting to daemon"
        );
        let request_region = SharedRegion::open(&self.config.request_name(), self.config.capacity)?;
        let response_region =
            SharedRegion::open(&self.config.response_name(), self.config.capacity)?;

        let writer = RingWriter::new(request_region);
        let reader_ring = RingReader::new(response_region);
        let shutdown = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            reader_ring,
            Arc::clone(&self.pending),
            Arc::clone(&shutdown),
            self.config.poll_interval,
        ));

        *conn = Some(Conn {
            writer,
            shutdown,
            reader,
        });
        info!("connected to daemon");
        Ok(())
    }

    /// Stop the reader, fail every outstanding call with
    /// [`IpcError::Cancelled`] and unmap both rings. A no-op when
    /// already disconnected.
    pub async fn disconnect(&self) -> Result<(), IpcError> {
        let conn = self.conn.lock().unwrap().take();
        let Some(conn) = conn else {
            return Ok(());
        };

        info!("disconnecting from daemon");
        conn.shutdown.store(true, Ordering::Relaxed);

        let mut reader = conn.reader;
        match timeout_at(Instant::now() + self.config.disconnect_grace, &mut reader).await {
            Ok(_) => debug!("response reader exited cleanly"),
            Err(_) => {
                warn!("response reader missed the shutdown grace period; aborting it");
                reader.abort();
            }
        }

        // Dropping the senders resolves every waiting caller with
        // `Cancelled`.
        let cancelled = {
            let mut pending = self.pending.lock().unwrap();
            let count = pending.len();
            pending.clear();
            count
        };
        if cancelled > 0 {
            debug!(cancelled, "cancelled outstanding calls");
        }

        // `conn.writer` drops here, unmapping the request ring.
        info!("disconnected from daemon");
        Ok(())
    }

    /// Invoke `method` on the daemon with the default timeout.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, IpcError> {
        self.call_with_timeout(method, args, self.config.default_timeout)
            .await
    }

    /// Invoke `method` on the daemon, waiting at most `timeout` for the
    /// reply.
    ///
    /// Back-pressure policy: when the request ring is full the write is
    /// retried every `poll_interval` until the deadline, then the call
    /// fails with [`IpcError::Backpressure`]. `Backpressure` means the
    /// request never reached the daemon; [`IpcError::Timeout`] means it
    /// was sent but no reply arrived in time.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, IpcError> {
        if !self.is_connected() {
            return Err(IpcError::NotConnected);
        }

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(call_id, tx);
        // The pending entry must not outlive this call, whichever path
        // it leaves by: reply, timeout, or the caller dropping the
        // future.
        let _cleanup = PendingGuard {
            pending: &self.pending,
            call_id,
        };

        debug!(call_id, method, args = args.len(), ?timeout, "submitting call");
        let envelope = RequestEnvelope::new(call_id, method, args);
        let bytes = encode_request(&envelope)?;
        self.write_request(&bytes, deadline).await?;

        let outcome = match timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                debug!(call_id, method, "client shut down while call was pending");
                return Err(IpcError::Cancelled);
            }
            Err(_) => {
                debug!(call_id, method, "call timed out");
                return Err(IpcError::Timeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        };

        match outcome {
            ReplyOutcome::Result(value) => {
                debug!(call_id, method, "call succeeded");
                Ok(value)
            }
            ReplyOutcome::Error { code, message } => {
                debug!(call_id, method, %code, "daemon returned error");
                Err(IpcError::Remote { code, message })
            }
        }
    }

    /// Occupancy of the request ring, 0.0 .. 1.0. Zero when
    /// disconnected.
    pub fn request_utilization(&self) -> f64 {
        self.conn
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0.0, |conn| conn.writer.utilization())
    }

    async fn write_request(&self, bytes: &[u8], deadline: Instant) -> Result<(), IpcError> {
        loop {
            {
                let mut conn = self.conn.lock().unwrap();
                // The caller checked the connection before entering the
                // loop, so losing it here means a concurrent disconnect
                // tore it down; that is a cancellation, not a misuse.
                let Some(conn) = conn.as_mut() else {
                    return Err(IpcError::Cancelled);
                };
                if bytes.len() > conn.writer.max_payload() {
                    warn!(
                        len = bytes.len(),
                        max = conn.writer.max_payload(),
                        "request larger than the ring can ever hold"
                    );
                    return Err(IpcError::Backpressure);
                }
                match conn.writer.try_write(bytes) {
                    Ok(()) => return Ok(()),
                    Err(WriteError::Full { needed, available }) => {
                        debug!(needed, available, "request ring full; backing off");
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(IpcError::Backpressure);
            }
            sleep(self.config.poll_interval).await;
        }
    }
}

/// Removes a call's pending entry on drop. By the time the guard runs
/// the reader has usually removed the entry already; removing an absent
/// key is a no-op.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<u64, oneshot::Sender<ReplyOutcome>>>,
    call_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.call_id);
        }
    }
}

/// The single long-lived response reader.
///
/// A malformed frame fails only itself: it is logged and the loop keeps
/// going. Replies whose `call_id` has no pending entry belong to calls
/// that already timed out and are dropped quietly.
async fn read_loop(
    mut ring: RingReader,
    pending: PendingTable,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    debug!("response reader started");
    while !shutdown.load(Ordering::Relaxed) {
        match ring.try_read() {
            Ok(frame) => match decode_reply(&frame) {
                Ok(reply) => {
                    let call_id = reply.call_id;
                    match reply.into_outcome() {
                        Ok(outcome) => {
                            let waiter = pending.lock().unwrap().remove(&call_id);
                            match waiter {
                                Some(tx) => {
                                    if tx.send(outcome).is_err() {
                                        debug!(call_id, "caller went away before the reply landed");
                                    }
                                }
                                None => {
                                    debug!(call_id, "reply for unknown call id; dropping");
                                }
                            }
                        }
                        Err(err) => {
                            error!(call_id, %err, "malformed reply; dropping");
                            // Fail the waiting caller now rather than
                            // leaving it to run out its timeout: removing
                            // the entry drops the sender and the caller
                            // observes `Cancelled` immediately.
                            pending.lock().unwrap().remove(&call_id);
                        }
                    }
                }
                Err(err) => error!(%err, "undecodable frame on response ring; dropping"),
            },
            Err(ReadError::Empty) => sleep(poll_interval).await,
        }
    }
    debug!("response reader stopped");
}

/// Capability to issue raw RPC calls.
///
/// Typed domain wrappers take `impl Caller` so they work over the async
/// client directly or over whatever façade ends up holding one.
pub trait Caller {
    fn call(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<Value, IpcError>> + Send;
}

impl Caller for IpcClient {
    fn call(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<Value, IpcError>> + Send {
        IpcClient::call(self, method, args)
    }
}
