use std::collections::VecDeque;

use tracing::error;

use crate::backend::allocator::BufferRef;

/// Frames waiting to be shown, oldest first
///
/// The entry at the front is on screen (or about to be), the one behind it is the next to
/// be flipped to. Entries are only ever appended at the back and removed at the front.
///
/// With hardware decoding the buffers are shared with the decoder, every entry then holds a
/// display reference on its buffer which is dropped when the entry retires.
#[derive(Debug, Default)]
pub struct FrameQueue {
    entries: VecDeque<BufferRef>,
    hwdec: bool,
}

impl FrameQueue {
    /// An empty queue
    pub fn new(hwdec: bool) -> FrameQueue {
        FrameQueue {
            entries: VecDeque::new(),
            hwdec,
        }
    }

    /// Whether entries hold display references
    pub fn hwdec(&self) -> bool {
        self.hwdec
    }

    /// Appends a frame
    pub fn enqueue(&mut self, buffer: BufferRef) {
        if self.hwdec {
            buffer.acquire_display();
        }
        self.entries.push_back(buffer);
    }

    /// Retires the oldest frame
    pub fn dequeue(&mut self) -> Option<BufferRef> {
        let buffer = self.entries.pop_front()?;
        if self.hwdec {
            if let Err(err) = buffer.release_display() {
                error!("{}", err);
            }
        }
        Some(buffer)
    }

    /// Retires the oldest frame, if any
    pub fn step(&mut self) {
        let _ = self.dequeue();
    }

    /// Retires all frames
    pub fn drain(&mut self) {
        while !self.entries.is_empty() {
            self.step();
        }
    }

    /// Number of queued frames
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no frame is queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The frame at `index`, counted from the oldest
    pub fn get(&self, index: usize) -> Option<&BufferRef> {
        self.entries.get(index)
    }
}
