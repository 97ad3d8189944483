//! wl_shm pool bookkeeping
//!
//! Pools are never mapped: the render backend only needs buffer
//! geometry, so the pool keeps the client's fd alive and validates
//! buffer placement against its size.

use std::os::unix::io::OwnedFd;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use wayland_server::protocol::wl_shm;

use crate::compositor::{BufferFormat, ClientId};

/// SHM errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ShmError {
    #[error("unsupported format {0:#x}")]
    InvalidFormat(u32),
    #[error("invalid stride {stride} for width {width}")]
    InvalidStride { stride: i32, width: i32 },
    #[error("invalid buffer size {width}x{height}")]
    InvalidSize { width: i32, height: i32 },
    #[error("buffer does not fit in a pool of {pool_size} bytes")]
    OutOfBounds { pool_size: usize },
    #[error("pools cannot shrink ({from} to {to} bytes)")]
    Shrink { from: usize, to: usize },
}

impl ShmError {
    /// Protocol error code to post
    pub fn code(&self) -> wl_shm::Error {
        match self {
            ShmError::InvalidFormat(_) => wl_shm::Error::InvalidFormat,
            ShmError::InvalidStride { .. }
            | ShmError::InvalidSize { .. }
            | ShmError::OutOfBounds { .. } => wl_shm::Error::InvalidStride,
            ShmError::Shrink { .. } => wl_shm::Error::InvalidFd,
        }
    }
}

/// User data of a wl_shm_pool
#[derive(Debug)]
pub struct ShmPoolData {
    pub client: ClientId,
    size: AtomicUsize,
    _fd: OwnedFd,
}

impl ShmPoolData {
    pub fn new(client: ClientId, fd: OwnedFd, size: i32) -> Result<Self, ShmError> {
        if size <= 0 {
            return Err(ShmError::OutOfBounds { pool_size: 0 });
        }
        Ok(Self {
            client,
            size: AtomicUsize::new(size as usize),
            _fd: fd,
        })
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Grow the pool
    pub fn resize(&self, size: i32) -> Result<(), ShmError> {
        let from = self.size();
        let to = size.max(0) as usize;
        if to < from {
            return Err(ShmError::Shrink { from, to });
        }
        self.size.store(to, Ordering::Release);
        debug!("Resized shm pool from {} to {} bytes", from, to);
        Ok(())
    }
}

/// Check a buffer request against its pool
pub fn validate_buffer(
    pool_size: usize,
    offset: i32,
    width: i32,
    height: i32,
    stride: i32,
    format: u32,
) -> Result<BufferFormat, ShmError> {
    let format = match BufferFormat::from_wayland(format) {
        BufferFormat::Other(raw) => return Err(ShmError::InvalidFormat(raw)),
        known => known,
    };
    if width <= 0 || height <= 0 {
        return Err(ShmError::InvalidSize { width, height });
    }

    let min_stride = width as i64 * format.bytes_per_pixel() as i64;
    if (stride as i64) < min_stride {
        return Err(ShmError::InvalidStride { stride, width });
    }

    let end = offset as i64 + stride as i64 * height as i64;
    if offset < 0 || end > pool_size as i64 {
        return Err(ShmError::OutOfBounds { pool_size });
    }
    Ok(format)
}
