//! Per-frame uniform data and the dynamic transform buffer.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use gpu_allocator::MemoryLocation;
use nereid_gpu::error::Result;
use nereid_gpu::{write_dynamic_uniform_buffer, DeferredDeletionQueue, GpuBuffer, RenderContext};

/// Camera data uploaded into a small fixed-size uniform buffer each frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ViewUniforms {
    pub projection: Mat4,
    pub view: Mat4,
}

impl ViewUniforms {
    /// Size in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

/// Round a per-element size up to the device's dynamic-offset alignment.
pub fn aligned_stride(size: u64, min_alignment: u64) -> u64 {
    if min_alignment == 0 {
        size
    } else {
        size.div_ceil(min_alignment) * min_alignment
    }
}

/// Decision record for one dynamic-uniform upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadPlan {
    /// Bytes the upload needs.
    pub required: u64,
    /// Whether the backing buffer must be reallocated.
    pub needs_realloc: bool,
}

/// Plan an upload of `count` elements at `stride` bytes each against the
/// current buffer capacity. Reallocation happens only when the requirement
/// exceeds capacity; a shrinking or equal count reuses the buffer.
pub fn plan_upload(count: usize, stride: u64, capacity: u64) -> UploadPlan {
    let required = count as u64 * stride;
    UploadPlan {
        required,
        needs_realloc: required > capacity,
    }
}

/// Persistently mapped host-coherent buffer of per-mesh model matrices.
///
/// The buffer grows only when the tracked mesh count outgrows it, and the
/// descriptor is rewritten only on reallocation. The outgrown buffer is
/// retired through the deferred deletion queue because in-flight frames may
/// still read it.
pub struct DynamicTransformBuffer {
    buffer: Option<GpuBuffer>,
    capacity: u64,
    stride: u64,
}

impl DynamicTransformBuffer {
    /// Create an empty buffer with the stride derived from device limits.
    pub fn new(min_alignment: u64) -> Self {
        Self {
            buffer: None,
            capacity: 0,
            stride: aligned_stride(std::mem::size_of::<Mat4>() as u64, min_alignment),
        }
    }

    /// The per-draw stride in bytes.
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// The dynamic offset for the mesh at `index`.
    pub fn dynamic_offset(&self, index: usize) -> u32 {
        (index as u64 * self.stride) as u32
    }

    /// Upload the frame's model matrices, growing the buffer if needed.
    ///
    /// Rewrites the descriptor set only when the buffer was reallocated.
    /// Returns whether a reallocation (and thus a rebind) happened.
    pub fn update(
        &mut self,
        ctx: &RenderContext,
        deferred: &mut DeferredDeletionQueue,
        frame_number: u64,
        descriptor_set: vk::DescriptorSet,
        binding: u32,
        transforms: &[Mat4],
    ) -> Result<bool> {
        if transforms.is_empty() {
            return Ok(false);
        }

        let plan = plan_upload(transforms.len(), self.stride, self.capacity);

        let reallocated = if plan.needs_realloc || self.buffer.is_none() {
            let mut allocator = ctx.allocator().lock();
            let buffer = allocator.create_buffer(
                plan.required,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                "model_transforms",
            )?;
            drop(allocator);

            if let Some(old) = self.buffer.take() {
                deferred.queue(old, frame_number);
            }

            unsafe {
                write_dynamic_uniform_buffer(
                    ctx.device(),
                    descriptor_set,
                    binding,
                    buffer.buffer,
                    self.stride,
                );
            }

            self.buffer = Some(buffer);
            self.capacity = plan.required;
            true
        } else {
            false
        };

        let buffer = self.buffer.as_ref().expect("buffer allocated above");
        for (i, transform) in transforms.iter().enumerate() {
            buffer.write_range(i as u64 * self.stride, std::slice::from_ref(transform))?;
        }

        Ok(reallocated)
    }

    /// Retire the buffer through the deferred deletion queue.
    pub fn destroy(&mut self, deferred: &mut DeferredDeletionQueue, frame_number: u64) {
        if let Some(buffer) = self.buffer.take() {
            deferred.queue(buffer, frame_number);
        }
        self.capacity = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_rounds_up_to_alignment() {
        assert_eq!(aligned_stride(64, 256), 256);
        assert_eq!(aligned_stride(64, 64), 64);
        assert_eq!(aligned_stride(96, 64), 128);
        assert_eq!(aligned_stride(64, 0), 64);
    }

    #[test]
    fn grows_only_when_capacity_exceeded() {
        let stride = 256u64;
        let mut capacity = 0u64;

        // Monotonically increasing counts: realloc exactly when the
        // requirement first exceeds capacity.
        let mut reallocs = 0;
        for count in [1usize, 2, 3, 5, 8] {
            let plan = plan_upload(count, stride, capacity);
            if plan.needs_realloc {
                capacity = plan.required;
                reallocs += 1;
            }
        }
        assert_eq!(reallocs, 5);
        assert_eq!(capacity, 8 * stride);
    }

    #[test]
    fn non_increasing_counts_never_realloc() {
        let stride = 256u64;
        let capacity = 8 * stride;

        for count in [8usize, 8, 5, 3, 1, 0] {
            let plan = plan_upload(count, stride, capacity);
            assert!(!plan.needs_realloc, "count {count} must not realloc");
        }
    }

    #[test]
    fn equal_requirement_reuses_buffer() {
        let plan = plan_upload(4, 64, 256);
        assert_eq!(plan.required, 256);
        assert!(!plan.needs_realloc);
    }
}
