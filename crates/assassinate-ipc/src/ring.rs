//! Lock-free SPSC ring buffers over a shared region.
//!
//! Each ring has exactly one writer and one reader, living in different
//! processes. The role types take their region by value and expose the
//! mutating operations through `&mut self`, so a second producer or
//! consumer on the same mapping cannot be constructed.
//!
//! Positions are 64-bit monotonic counters; the physical offset of
//! logical position `p` is `p % capacity` into the data area. Frames are
//! `[len: u32 LE][payload]` and may wrap the end of the data area, in
//! which case the copy is split at the modulus. Both sides of the
//! transport implement the split identically.
//!
//! Ordering: the producer publishes `write_pos` with release after the
//! payload bytes are in place, and the consumer loads it with acquire
//! before touching them; the symmetric pair on `read_pos` lets the
//! producer observe freed space. Each side loads its own counter relaxed
//! since it is the only mutator.

use std::ptr;
use std::sync::atomic::Ordering;

use thiserror::Error;

use crate::shm::SharedRegion;

/// Length prefix prepended to every frame.
pub const FRAME_HEADER: usize = 4;

/// Producer-side failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    /// Not enough free space; nothing was written.
    #[error("ring buffer full: frame needs {needed} bytes, {available} free")]
    Full { needed: usize, available: usize },
}

/// Consumer-side failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    /// No frame available; nothing was consumed.
    #[error("ring buffer empty")]
    Empty,
}

/// Write end of a ring. One per region, by construction.
pub struct RingWriter {
    region: SharedRegion,
}

/// Read end of a ring. One per region, by construction.
pub struct RingReader {
    region: SharedRegion,
}

impl RingWriter {
    pub fn new(region: SharedRegion) -> Self {
        Self { region }
    }

    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Largest payload this ring can ever carry.
    pub fn max_payload(&self) -> usize {
        self.capacity() - FRAME_HEADER
    }

    /// Append one frame without blocking. On [`WriteError::Full`] no
    /// state is mutated and the caller may retry after the consumer
    /// drains.
    pub fn try_write(&mut self, payload: &[u8]) -> Result<(), WriteError> {
        let needed = FRAME_HEADER + payload.len();
        let capacity = self.capacity();

        let write_pos = self.region.write_pos().load(Ordering::Relaxed);
        let read_pos = self.region.read_pos().load(Ordering::Acquire);
        let available = capacity - (write_pos - read_pos) as usize;
        if needed > available {
            return Err(WriteError::Full { needed, available });
        }

        let len_bytes = (payload.len() as u32).to_le_bytes();
        copy_in(&self.region, write_pos, &len_bytes);
        copy_in(&self.region, write_pos + FRAME_HEADER as u64, payload);

        self.region
            .write_pos()
            .store(write_pos + needed as u64, Ordering::Release);
        Ok(())
    }

    /// Fraction of the data area currently occupied (0.0 .. 1.0).
    pub fn utilization(&self) -> f64 {
        utilization(&self.region)
    }
}

impl RingReader {
    pub fn new(region: SharedRegion) -> Self {
        Self { region }
    }

    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Pop one frame without blocking. The payload is copied out;
    /// references into the shared region never escape.
    pub fn try_read(&mut self) -> Result<Vec<u8>, ReadError> {
        let read_pos = self.region.read_pos().load(Ordering::Relaxed);
        let write_pos = self.region.write_pos().load(Ordering::Acquire);
        if write_pos == read_pos {
            return Err(ReadError::Empty);
        }

        let mut len_bytes = [0u8; 4];
        copy_out(&self.region, read_pos, &mut len_bytes);
        let len = u32::from_le_bytes(len_bytes) as usize;

        let mut payload = vec![0u8; len];
        copy_out(&self.region, read_pos + FRAME_HEADER as u64, &mut payload);

        self.region
            .read_pos()
            .store(read_pos + (FRAME_HEADER + len) as u64, Ordering::Release);
        Ok(payload)
    }

    /// Fraction of the data area currently occupied (0.0 .. 1.0).
    pub fn utilization(&self) -> f64 {
        utilization(&self.region)
    }
}

fn utilization(region: &SharedRegion) -> f64 {
    let write_pos = region.write_pos().load(Ordering::Acquire);
    let read_pos = region.read_pos().load(Ordering::Acquire);
    (write_pos - read_pos) as f64 / region.capacity() as f64
}

/// Copy `bytes` into the data area at logical position `pos`, splitting
/// at the end of the region when the frame wraps.
fn copy_in(region: &SharedRegion, pos: u64, bytes: &[u8]) {
    let capacity = region.capacity();
    let at = (pos % capacity as u64) as usize;
    let first = (capacity - at).min(bytes.len());
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), region.data_ptr().add(at), first);
        if first < bytes.len() {
            ptr::copy_nonoverlapping(
                bytes.as_ptr().add(first),
                region.data_ptr(),
                bytes.len() - first,
            );
        }
    }
}

/// Copy out of the data area at logical position `pos`, the mirror of
/// [`copy_in`].
fn copy_out(region: &SharedRegion, pos: u64, buf: &mut [u8]) {
    let capacity = region.capacity();
    let at = (pos % capacity as u64) as usize;
    let first = (capacity - at).min(buf.len());
    unsafe {
        ptr::copy_nonoverlapping(region.data_ptr().add(at), buf.as_mut_ptr(), first);
        if first < buf.len() {
            ptr::copy_nonoverlapping(
                region.data_ptr(),
                buf.as_mut_ptr().add(first),
                buf.len() - first,
            );
        }
    }
}
