//! Deferred resource deletion for multi-frame-in-flight rendering.
//!
//! When a buffer is outgrown or replaced while frames are in flight, it
//! cannot be freed immediately: a previous frame may still be reading it.
//! Buffers are queued with the frame number and only freed once enough
//! frames have passed to guarantee they are no longer in use.

use crate::error::Result;
use crate::memory::{GpuAllocator, GpuBuffer};
use std::collections::VecDeque;

/// A buffer pending deletion.
struct PendingDeletion {
    buffer: GpuBuffer,
    frame_queued: u64,
}

/// Queue for deferred buffer deletions.
pub struct DeferredDeletionQueue {
    pending: VecDeque<PendingDeletion>,
    frames_in_flight: usize,
}

impl DeferredDeletionQueue {
    /// Create a queue that holds buffers for `frames_in_flight` frames.
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            frames_in_flight,
        }
    }

    /// Queue a buffer for deletion at the given frame number.
    pub fn queue(&mut self, buffer: GpuBuffer, frame_number: u64) {
        self.pending.push_back(PendingDeletion {
            buffer,
            frame_queued: frame_number,
        });
    }

    /// Free buffers whose retirement frame is old enough to be safe.
    ///
    /// Call at the start of each frame after the fence wait.
    pub fn process(
        &mut self,
        allocator: &mut GpuAllocator,
        current_frame_number: u64,
    ) -> Result<()> {
        let cutoff = current_frame_number.saturating_sub(self.frames_in_flight as u64);

        // Queue order is FIFO and frame numbers are non-decreasing, so only
        // the front can mature.
        while matches!(self.pending.front(), Some(p) if p.frame_queued < cutoff) {
            let mut pending = self.pending.pop_front().expect("front just matched");
            allocator.free_buffer(&mut pending.buffer)?;
        }

        Ok(())
    }

    /// Flush all pending deletions immediately.
    ///
    /// Call during shutdown after `device_wait_idle`.
    pub fn flush(&mut self, allocator: &mut GpuAllocator) -> Result<()> {
        while let Some(mut pending) = self.pending.pop_front() {
            allocator.free_buffer(&mut pending.buffer)?;
        }
        Ok(())
    }

    /// Get the number of pending deletions.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
