//! Buffer allocation and management.
//!
//! Collection of types around the kernel memory the video output scans out of:
//!
//! - [`DumbBuffer`], a CPU-mappable dumb buffer exported as a dma-buf
//! - [`DumbFramebuffer`], a dumb buffer registered as a DRM framebuffer
//! - [`FrameBuffer`], the shared pool entry handed between decoder and display

use std::io;
use std::ops::{Deref, DerefMut};
use std::os::unix::io::BorrowedFd;
use std::ptr::NonNull;
use std::{fmt, ptr};

use rustix::mm::{MapFlags, ProtFlags};

use crate::backend::drm::AccessError;

mod buffer;
pub mod dumb;

pub use self::buffer::{BufferRef, FrameBuffer};
pub use self::dumb::{DumbBuffer, DumbFramebuffer};

pub use drm_fourcc::{DrmFourcc as Fourcc, UnrecognizedFourcc};

/// Common trait describing common properties of most types of buffers.
pub trait Buffer {
    /// Width of the two-dimensional buffer
    fn width(&self) -> u32;
    /// Height of the two-dimensional buffer
    fn height(&self) -> u32;
    /// Size (w x h) of the two-dimensional buffer
    fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
    /// Pixel format of the buffer
    fn format(&self) -> Option<Fourcc>;
}

/// Errors of the buffer allocator and the buffer pool
#[derive(thiserror::Error, Debug)]
pub enum BufferError {
    /// Only `ARGB8888` and `NV12` buffers can be allocated
    #[error("Unsupported pixel format {0:?}")]
    UnsupportedFormat(Fourcc),
    /// Width or height is zero or too large
    #[error("Invalid buffer size {0}x{1}")]
    InvalidSize(u32, u32),
    /// A kernel call failed
    #[error(transparent)]
    Access(#[from] AccessError),
    /// The display released a buffer it did not hold
    #[error("Buffer {0} released without being referenced")]
    NotReferenced(usize),
}

enum Mapping {
    Mmap { ptr: NonNull<u8>, len: usize },
    Heap(Box<[u8]>),
}

/// A CPU mapping of buffer memory
///
/// Either a shared memory mapping of a device buffer, unmapped on drop,
/// or plain heap memory for devices without mappable memory.
pub struct MappedBuffer {
    inner: Mapping,
}

// The mapping is exclusively owned.
unsafe impl Send for MappedBuffer {}
unsafe impl Sync for MappedBuffer {}

impl MappedBuffer {
    /// Maps `len` bytes of `fd` at `offset` read/write and shared.
    ///
    /// # Safety
    ///
    /// `fd` and `offset` have to describe mappable memory of at least `len` bytes,
    /// which is not mapped as a mutable slice anywhere else.
    pub unsafe fn mmap(fd: BorrowedFd<'_>, offset: u64, len: usize) -> io::Result<MappedBuffer> {
        let ptr = rustix::mm::mmap(
            ptr::null_mut(),
            len,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            offset,
        )?;
        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| io::Error::from(io::ErrorKind::InvalidData))?;
        Ok(MappedBuffer {
            inner: Mapping::Mmap { ptr, len },
        })
    }

    /// Zero-initialized heap memory of `len` bytes
    pub fn heap(len: usize) -> MappedBuffer {
        MappedBuffer {
            inner: Mapping::Heap(vec![0; len].into_boxed_slice()),
        }
    }

    /// Whether this is a mapping of device memory
    pub fn is_device_memory(&self) -> bool {
        matches!(self.inner, Mapping::Mmap { .. })
    }
}

impl Deref for MappedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.inner {
            // SAFETY: the mapping stays valid until drop
            Mapping::Mmap { ptr, len } => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), *len) },
            Mapping::Heap(mem) => mem,
        }
    }
}

impl DerefMut for MappedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.inner {
            // SAFETY: the mapping stays valid until drop and we hold the only reference
            Mapping::Mmap { ptr, len } => unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), *len) },
            Mapping::Heap(mem) => mem,
        }
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        if let Mapping::Mmap { ptr, len } = self.inner {
            // SAFETY: the region was mapped by us and is not referenced anymore
            if let Err(err) = unsafe { rustix::mm::munmap(ptr.as_ptr().cast(), len) } {
                tracing::warn!("Failed to unmap buffer: {}", err);
            }
        }
    }
}

impl fmt::Debug for MappedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedBuffer")
            .field("len", &self.len())
            .field("device_memory", &self.is_device_memory())
            .finish()
    }
}
