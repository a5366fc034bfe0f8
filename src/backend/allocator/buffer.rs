use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{BufferError, DumbFramebuffer};
use crate::backend::drm::KmsDevice;

/// Shared handle to a pool buffer
pub type BufferRef = Arc<FrameBuffer>;

/// A framebuffer shared between the decoder and the display
///
/// The decoder marks a buffer as not `free` while the codec engine owns it and as `locked`
/// once it was handed out for display. The display counts how many queued frames reference
/// the buffer and unlocks it when the last of them retires. A buffer can be reused once it is
/// free and unlocked.
#[derive(Debug)]
pub struct FrameBuffer {
    fb: Mutex<DumbFramebuffer>,
    fb_id: AtomicU32,
    index: AtomicUsize,
    free: AtomicBool,
    locked: AtomicBool,
    refs: AtomicUsize,
}

impl FrameBuffer {
    /// Wraps a framebuffer into a new pool entry
    pub fn new(fb: DumbFramebuffer) -> BufferRef {
        Arc::new(FrameBuffer {
            fb_id: AtomicU32::new(fb.id()),
            fb: Mutex::new(fb),
            index: AtomicUsize::new(0),
            free: AtomicBool::new(true),
            locked: AtomicBool::new(false),
            refs: AtomicUsize::new(0),
        })
    }

    /// Access to the framebuffer
    pub fn framebuffer(&self) -> MutexGuard<'_, DumbFramebuffer> {
        self.fb.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// DRM framebuffer id, zero once the buffer was destroyed
    pub fn id(&self) -> u32 {
        self.fb_id.load(Ordering::Acquire)
    }

    /// Whether the framebuffer still exists
    pub fn is_valid(&self) -> bool {
        self.id() != 0
    }

    /// Position of the buffer in its owner's pool
    pub fn index(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    /// Sets the position of the buffer in its owner's pool
    pub fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Relaxed);
    }

    /// Whether the codec engine released the buffer
    pub fn is_free(&self) -> bool {
        self.free.load(Ordering::Acquire)
    }

    /// Marks the buffer as released by (or handed to) the codec engine
    pub fn set_free(&self, free: bool) {
        self.free.store(free, Ordering::Release);
    }

    /// Whether the display still holds the buffer
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Marks the buffer as held by the display
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Release);
    }

    /// Free and unlocked
    pub fn is_available(&self) -> bool {
        self.is_free() && !self.is_locked()
    }

    /// Number of queued frames referencing this buffer
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Adds a display reference
    pub fn acquire_display(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops a display reference, unlocking the buffer when it was the last one
    ///
    /// Returns whether the buffer got unlocked. Releasing an unreferenced buffer is an error
    /// and leaves the count at zero.
    pub fn release_display(&self) -> Result<bool, BufferError> {
        let prev = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1))
            .map_err(|_| BufferError::NotReferenced(self.index()))?;
        if prev == 1 {
            self.set_locked(false);
            return Ok(true);
        }
        Ok(false)
    }

    /// Drops all display references and the lock
    pub fn reset(&self) {
        self.refs.store(0, Ordering::Release);
        self.set_locked(false);
    }

    /// Destroys the underlying framebuffer
    pub fn destroy<D: KmsDevice + ?Sized>(&self, dev: &D) {
        self.framebuffer().destroy(dev);
        self.fb_id.store(0, Ordering::Release);
    }
}
