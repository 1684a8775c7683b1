//! POSIX shared memory regions backing the ring pair.
//!
//! # Memory layout
//!
//! ```text
//! ┌──────────────────┬─────────────────┬─────────────┬──────────────────┐
//! │ write_pos: u64   │ read_pos: u64   │ pad to 64   │ data: [u8; cap]  │
//! └──────────────────┴─────────────────┴─────────────┴──────────────────┘
//! 0                  8                 16            64
//! ```
//!
//! Little-endian, both counters monotonic. The 48 bytes of padding keep
//! the producer-owned and consumer-owned counters on separate cache
//! lines. This layout is the compatibility contract with the daemon.
//!
//! The daemon is the creator ([`SharedRegion::create`]); clients only
//! attach ([`SharedRegion::open`]) and never format the header. An
//! absent region means the daemon is not running, which is reported as
//! [`IpcError::RegionMissing`] so callers can show an actionable
//! diagnostic instead of a generic I/O failure.

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::AtomicU64;

use crate::error::IpcError;

/// Byte offset of the data area within a region.
pub const DATA_OFFSET: usize = 64;

const WRITE_POS_OFFSET: usize = 0;
const READ_POS_OFFSET: usize = 8;

/// One mapped shared memory region holding a single ring.
#[derive(Debug)]
pub struct SharedRegion {
    ptr: *mut u8,
    len: usize,
    name: String,
    fd: RawFd,
    /// Creator unlinks the object on drop; attachers leave it alone.
    owned: bool,
}

// Safety: the header is only touched through the AtomicU64 accessors,
// and the data area discipline (one writer, one reader) is enforced by
// the ring role types.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create and map a fresh region (daemon side). The object starts
    /// zeroed, which is exactly the initial header state.
    pub fn create(name: &str, capacity: usize) -> Result<Self, IpcError> {
        let c_name = shm_name(name)?;
        let len = DATA_OFFSET + capacity;

        unsafe {
            let fd = libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            );
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }

            if libc::ftruncate(fd, len as libc::off_t) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
                return Err(err.into());
            }

            match map(fd, len) {
                Ok(ptr) => Ok(Self {
                    ptr,
                    len,
                    name: name.to_string(),
                    fd,
                    owned: true,
                }),
                Err(err) => {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                    Err(err.into())
                }
            }
        }
    }

    /// Attach to an existing region (client side). Fails with
    /// [`IpcError::RegionMissing`] when the daemon has not created it.
    pub fn open(name: &str, capacity: usize) -> Result<Self, IpcError> {
        let c_name = shm_name(name)?;
        let len = DATA_OFFSET + capacity;

        unsafe {
            let fd = libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0);
            if fd < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::NotFound {
                    return Err(IpcError::RegionMissing {
                        name: name.to_string(),
                    });
                }
                return Err(err.into());
            }

            // A capacity mismatch with the daemon must fail here, not
            // SIGBUS on first access past the real end of the object.
            let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
            if libc::fstat(fd, stat.as_mut_ptr()) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err.into());
            }
            let actual = stat.assume_init().st_size as usize;
            if actual < len {
                libc::close(fd);
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "region {name:?} is {actual} bytes but capacity {capacity} needs {len}; \
                         does the configured capacity match the daemon's?"
                    ),
                )
                .into());
            }

            match map(fd, len) {
                Ok(ptr) => Ok(Self {
                    ptr,
                    len,
                    name: name.to_string(),
                    fd,
                    owned: false,
                }),
                Err(err) => {
                    libc::close(fd);
                    Err(err.into())
                }
            }
        }
    }

    /// Size of the data area in bytes.
    pub fn capacity(&self) -> usize {
        self.len - DATA_OFFSET
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn write_pos(&self) -> &AtomicU64 {
        // Safety: offset 0 of a page-aligned mapping, within bounds.
        unsafe { &*(self.ptr.add(WRITE_POS_OFFSET) as *const AtomicU64) }
    }

    pub(crate) fn read_pos(&self) -> &AtomicU64 {
        // Safety: offset 8 is 8-aligned within the mapping.
        unsafe { &*(self.ptr.add(READ_POS_OFFSET) as *const AtomicU64) }
    }

    pub(crate) fn data_ptr(&self) -> *mut u8 {
        unsafe { self.ptr.add(DATA_OFFSET) }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
            libc::close(self.fd);
            if self.owned {
                if let Ok(c_name) = shm_name(&self.name) {
                    libc::shm_unlink(c_name.as_ptr());
                }
            }
        }
    }
}

fn shm_name(name: &str) -> Result<CString, io::Error> {
    CString::new(name).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("shared memory name contains NUL: {name:?}"),
        )
    })
}

unsafe fn map(fd: RawFd, len: usize) -> Result<*mut u8, io::Error> {
    unsafe {
        let ptr = libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        );
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(ptr as *mut u8)
    }
}
