//! Per-frame command and synchronization resources.

use ash::vk;
use nereid_gpu::error::Result;
use nereid_gpu::sync::{create_fence, create_semaphore};
use nereid_gpu::CommandPool;

/// Number of frame contexts kept in flight.
///
/// The CPU records frame N while the GPU may still be executing frame N-1;
/// the per-context fence bounds how far ahead the CPU can get.
pub const FRAME_OVERLAP: usize = 2;

/// The frame context index for a given frame number.
pub fn frame_index(frame_number: u64, overlap: usize) -> usize {
    (frame_number % overlap as u64) as usize
}

/// One frame's command recording and synchronization resources.
pub struct FrameResources {
    pub command_pool: CommandPool,
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the acquired swapchain image is ready.
    pub swapchain_semaphore: vk::Semaphore,
    /// Signaled when rendering to the image completes.
    pub render_semaphore: vk::Semaphore,
    /// CPU/GPU fence; created signaled so the first frame does not block.
    pub render_fence: vk::Fence,
}

impl FrameResources {
    /// Create one frame's resources.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let command_pool = CommandPool::new(
            device,
            queue_family,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let command_buffer = command_pool.allocate_command_buffer(device)?;

        Ok(Self {
            command_pool,
            command_buffer,
            swapchain_semaphore: create_semaphore(device)?,
            render_semaphore: create_semaphore(device)?,
            render_fence: create_fence(device, true)?,
        })
    }

    /// Destroy this frame's resources.
    ///
    /// # Safety
    /// The device must be valid and the resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.swapchain_semaphore, None);
        device.destroy_semaphore(self.render_semaphore, None);
        device.destroy_fence(self.render_fence, None);
        self.command_pool.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_through_contexts() {
        assert_eq!(frame_index(0, FRAME_OVERLAP), 0);
        assert_eq!(frame_index(1, FRAME_OVERLAP), 1);
        assert_eq!(frame_index(2, FRAME_OVERLAP), 0);
        assert_eq!(frame_index(3, FRAME_OVERLAP), 1);
    }

    #[test]
    fn revisits_context_zero_after_overlap_frames() {
        for start in [0u64, 7, 1024] {
            let index = frame_index(start, FRAME_OVERLAP);
            assert_eq!(frame_index(start + FRAME_OVERLAP as u64, FRAME_OVERLAP), index);
        }
    }

    #[test]
    fn large_frame_numbers_stay_in_range() {
        for frame in (0..10_000u64).step_by(997) {
            assert!(frame_index(frame, FRAME_OVERLAP) < FRAME_OVERLAP);
        }
    }
}
