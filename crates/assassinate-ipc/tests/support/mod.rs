//! In-process daemon stub for end-to-end tests.
//!
//! The stub plays the daemon's role exactly: it creates the region pair
//! (clients only attach), reads the request ring and writes the
//! response ring. A handler closure decides what, if anything, to reply
//! to each request; returning several envelopes lets tests exercise
//! out-of-order and late replies.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use assassinate_ipc::ClientConfig;
use assassinate_ipc::protocol::{
    ReplyEnvelope, RequestEnvelope, decode_request, encode_reply,
};
use assassinate_ipc::ring::{ReadError, RingReader, RingWriter, WriteError};
use assassinate_ipc::shm::SharedRegion;

/// Config with a unique shared memory name so tests cannot collide.
pub fn unique_config(tag: &str, capacity: usize) -> ClientConfig {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    ClientConfig::new()
        .with_shm_name(format!(
            "/assassinate-e2e-{tag}-{}-{nanos}",
            std::process::id()
        ))
        .with_capacity(capacity)
}

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct DaemonStub {
    stop: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DaemonStub {
    /// Create the region pair and start serving. Must be called before
    /// the client connects.
    pub fn start<F>(config: &ClientConfig, mut handler: F) -> Self
    where
        F: FnMut(RequestEnvelope) -> Vec<ReplyEnvelope> + Send + 'static,
    {
        let requests = SharedRegion::create(&config.request_name(), config.capacity).unwrap();
        let responses = SharedRegion::create(&config.response_name(), config.capacity).unwrap();
        let mut request_ring = RingReader::new(requests);
        let mut response_ring = RingWriter::new(responses);

        let stop = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));

        let thread = thread::spawn({
            let stop = Arc::clone(&stop);
            let paused = Arc::clone(&paused);
            move || {
                while !stop.load(Ordering::Relaxed) {
                    if paused.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_micros(200));
                        continue;
                    }
                    match request_ring.try_read() {
                        Ok(frame) => {
                            let request = decode_request(&frame).unwrap();
                            for reply in handler(request) {
                                let bytes = encode_reply(&reply).unwrap();
                                loop {
                                    match response_ring.try_write(&bytes) {
                                        Ok(()) => break,
                                        Err(WriteError::Full { .. }) => {
                                            thread::sleep(Duration::from_micros(200));
                                        }
                                    }
                                }
                            }
                        }
                        Err(ReadError::Empty) => thread::sleep(Duration::from_micros(200)),
                    }
                }
            }
        });

        Self {
            stop,
            paused,
            thread: Some(thread),
        }
    }

    /// Stop draining the request ring, letting it fill up.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }
}

impl Drop for DaemonStub {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Reply to every request with its first argument, the classic echo.
pub fn echo(request: RequestEnvelope) -> Vec<ReplyEnvelope> {
    let value = request
        .request
        .args
        .first()
        .cloned()
        .unwrap_or(assassinate_ipc::Value::Nil);
    vec![ReplyEnvelope::result(request.call_id, value)]
}
