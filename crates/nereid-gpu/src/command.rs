//! Command pools, the command encoder, and submission.

use crate::error::Result;
use ash::vk;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a single primary command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffer(
        &self,
        device: &ash::Device,
    ) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = device.allocate_command_buffers(&alloc_info)?;
        Ok(buffers[0])
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Compute the aspect mask implied by a transition's destination layout.
pub fn aspect_mask_for_layout(new_layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if new_layout == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Scopes a single command-buffer recording session.
///
/// Every method records into the wrapped buffer; `finish` ends recording and
/// hands the buffer back for submission. Only `begin`, `reset`, and `finish`
/// can fail.
pub struct CommandEncoder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl<'a> CommandEncoder<'a> {
    /// Wrap a command buffer for recording.
    pub fn new(device: &'a ash::Device, cmd: vk::CommandBuffer) -> Self {
        Self { device, cmd }
    }

    /// Reset the command buffer for re-recording.
    ///
    /// # Safety
    /// The buffer must not be in use by the GPU.
    pub unsafe fn reset(&self) -> Result<()> {
        self.device
            .reset_command_buffer(self.cmd, vk::CommandBufferResetFlags::empty())?;
        Ok(())
    }

    /// Begin a one-time-submit recording session.
    ///
    /// # Safety
    /// The buffer must be in the initial state.
    pub unsafe fn begin(&self) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.device.begin_command_buffer(self.cmd, &begin_info)?;
        Ok(())
    }

    /// End recording and return the buffer for submission.
    ///
    /// # Safety
    /// The buffer must be in the recording state.
    pub unsafe fn finish(&self) -> Result<vk::CommandBuffer> {
        self.device.end_command_buffer(self.cmd)?;
        Ok(self.cmd)
    }

    /// Transition an image between layouts.
    ///
    /// Issues a full-subresource barrier with all-commands / all-memory
    /// stage and access masks. Conservative but correct for a single-queue
    /// workload with non-overlapping passes; the layout transitions double
    /// as the only execution dependencies between passes.
    ///
    /// # Safety
    /// Must be called inside a recording session.
    pub unsafe fn transition_image(
        &self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask_for_layout(new_layout))
                    .base_mip_level(0)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .base_array_layer(0)
                    .layer_count(vk::REMAINING_ARRAY_LAYERS),
            );

        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));

        self.device.cmd_pipeline_barrier2(self.cmd, &dependency_info);
    }

    /// Open a dynamic-rendering scope.
    ///
    /// # Safety
    /// Must be called inside a recording session; attachments must be in
    /// the layouts named by their infos.
    pub unsafe fn start_rendering(
        &self,
        render_area: vk::Rect2D,
        color_attachments: &[vk::RenderingAttachmentInfo<'_>],
        depth_attachment: Option<&vk::RenderingAttachmentInfo<'_>>,
        stencil_attachment: Option<&vk::RenderingAttachmentInfo<'_>>,
    ) {
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(color_attachments);

        if let Some(depth) = depth_attachment {
            rendering_info = rendering_info.depth_attachment(depth);
        }
        if let Some(stencil) = stencil_attachment {
            rendering_info = rendering_info.stencil_attachment(stencil);
        }

        self.device.cmd_begin_rendering(self.cmd, &rendering_info);
    }

    /// Close the current dynamic-rendering scope.
    ///
    /// # Safety
    /// A rendering scope must be open.
    pub unsafe fn end_rendering(&self) {
        self.device.cmd_end_rendering(self.cmd);
    }

    /// Set the viewport to cover the given size.
    ///
    /// # Safety
    /// Must be called inside a recording session.
    pub unsafe fn set_viewport(&self, width: u32, height: u32) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        self.device.cmd_set_viewport(self.cmd, 0, &[viewport]);
    }

    /// Set the scissor to cover the given size.
    ///
    /// # Safety
    /// Must be called inside a recording session.
    pub unsafe fn set_scissor(&self, width: u32, height: u32) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D { width, height },
        };
        self.device.cmd_set_scissor(self.cmd, 0, &[scissor]);
    }

    /// Bind a pipeline at the given bind point.
    ///
    /// # Safety
    /// Must be called inside a recording session.
    pub unsafe fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.device.cmd_bind_pipeline(self.cmd, bind_point, pipeline);
    }

    /// Bind descriptor sets at the given bind point.
    ///
    /// # Safety
    /// Must be called inside a recording session.
    pub unsafe fn bind_descriptor_set(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.device.cmd_bind_descriptor_sets(
            self.cmd,
            bind_point,
            layout,
            first_set,
            sets,
            dynamic_offsets,
        );
    }

    /// Bind a vertex buffer to binding zero.
    ///
    /// # Safety
    /// Must be called inside a recording session.
    pub unsafe fn bind_vertex_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        self.device
            .cmd_bind_vertex_buffers(self.cmd, 0, &[buffer], &[offset]);
    }

    /// Bind an index buffer of 32-bit indices.
    ///
    /// # Safety
    /// Must be called inside a recording session.
    pub unsafe fn bind_index_buffer(&self, buffer: vk::Buffer) {
        self.device
            .cmd_bind_index_buffer(self.cmd, buffer, 0, vk::IndexType::UINT32);
    }

    /// Push constants to the bound pipeline layout.
    ///
    /// # Safety
    /// Must be called inside a recording session; `data` must match the
    /// layout's push constant range.
    pub unsafe fn push_constants(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        self.device.cmd_push_constants(self.cmd, layout, stages, 0, data);
    }

    /// Record a non-indexed draw.
    ///
    /// # Safety
    /// A rendering scope must be open with a graphics pipeline bound.
    pub unsafe fn draw(&self, vertex_count: u32) {
        self.device.cmd_draw(self.cmd, vertex_count, 1, 0, 0);
    }

    /// Record an indexed draw over a sub-range of the bound index buffer.
    ///
    /// # Safety
    /// A rendering scope must be open with a graphics pipeline bound.
    pub unsafe fn draw_indexed(&self, index_count: u32, first_index: u32) {
        self.device
            .cmd_draw_indexed(self.cmd, index_count, 1, first_index, 0, 0);
    }

    /// Record a compute dispatch.
    ///
    /// # Safety
    /// A compute pipeline must be bound.
    pub unsafe fn dispatch(&self, x: u32, y: u32, z: u32) {
        self.device.cmd_dispatch(self.cmd, x, y, z);
    }

    /// Record a buffer-to-buffer copy.
    ///
    /// # Safety
    /// Must be called inside a recording session; the regions must be in
    /// bounds for both buffers.
    pub unsafe fn copy_buffer(
        &self,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.device.cmd_copy_buffer(self.cmd, src, dst, regions);
    }

    /// Blit one image into another, converting between extents.
    ///
    /// The source must be in TRANSFER_SRC_OPTIMAL and the destination in
    /// TRANSFER_DST_OPTIMAL layout.
    ///
    /// # Safety
    /// Must be called inside a recording session.
    pub unsafe fn copy_image_to_image(
        &self,
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    ) {
        let subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);

        let blit_region = vk::ImageBlit2::default()
            .src_subresource(subresource)
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: src_extent.width as i32,
                    y: src_extent.height as i32,
                    z: 1,
                },
            ])
            .dst_subresource(subresource)
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: dst_extent.width as i32,
                    y: dst_extent.height as i32,
                    z: 1,
                },
            ]);

        let blit_info = vk::BlitImageInfo2::default()
            .src_image(src)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .filter(vk::Filter::LINEAR)
            .regions(std::slice::from_ref(&blit_region));

        self.device.cmd_blit_image2(self.cmd, &blit_info);
    }
}

/// Submit a command buffer with synchronization2 semaphore info.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn submit_command_buffer(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    wait: Option<(vk::Semaphore, vk::PipelineStageFlags2)>,
    signal: Option<(vk::Semaphore, vk::PipelineStageFlags2)>,
    fence: vk::Fence,
) -> Result<()> {
    let cmd_info = vk::CommandBufferSubmitInfo::default()
        .command_buffer(cmd)
        .device_mask(0);

    let wait_infos: Vec<vk::SemaphoreSubmitInfo> = wait
        .into_iter()
        .map(|(semaphore, stage)| {
            vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore)
                .stage_mask(stage)
                .value(1)
                .device_index(0)
        })
        .collect();

    let signal_infos: Vec<vk::SemaphoreSubmitInfo> = signal
        .into_iter()
        .map(|(semaphore, stage)| {
            vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore)
                .stage_mask(stage)
                .value(1)
                .device_index(0)
        })
        .collect();

    let submit_info = vk::SubmitInfo2::default()
        .command_buffer_infos(std::slice::from_ref(&cmd_info))
        .wait_semaphore_infos(&wait_infos)
        .signal_semaphore_infos(&signal_infos);

    device.queue_submit2(queue, &[submit_info], fence)?;
    Ok(())
}

/// One-off blocking submission machinery for load-time work.
///
/// Records a single-use command buffer through a closure, submits it, and
/// blocks on a dedicated fence until the GPU finishes. Shares the graphics
/// queue with the frame loop, so an immediate submit fully serializes
/// against rendering; it must never be used for per-frame uploads.
pub struct ImmediateContext {
    pool: CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
}

impl ImmediateContext {
    /// Create the pool, buffer, and fence for immediate submission.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let pool = CommandPool::new(
            device,
            queue_family,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let cmd = pool.allocate_command_buffer(device)?;

        let fence_info = vk::FenceCreateInfo::default();
        let fence = device.create_fence(&fence_info, None)?;

        Ok(Self { pool, cmd, fence })
    }

    /// Record and submit commands, blocking until the GPU completes them.
    ///
    /// # Safety
    /// The device and queue must be valid; the closure must only record
    /// commands legal outside a rendering scope.
    pub unsafe fn submit<F>(&self, device: &ash::Device, queue: vk::Queue, record: F) -> Result<()>
    where
        F: FnOnce(&CommandEncoder<'_>),
    {
        let encoder = CommandEncoder::new(device, self.cmd);
        encoder.reset()?;
        encoder.begin()?;
        record(&encoder);
        let cmd = encoder.finish()?;

        submit_command_buffer(device, queue, cmd, None, None, self.fence)?;

        device.wait_for_fences(&[self.fence], true, u64::MAX)?;
        device.reset_fences(&[self.fence])?;

        Ok(())
    }

    /// Destroy the immediate-submit resources.
    ///
    /// # Safety
    /// No submission may be in flight.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_fence(self.fence, None);
        self.pool.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_attachment_layout_selects_depth_aspect() {
        assert_eq!(
            aspect_mask_for_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn other_layouts_select_color_aspect() {
        for layout in [
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::UNDEFINED,
        ] {
            assert_eq!(aspect_mask_for_layout(layout), vk::ImageAspectFlags::COLOR);
        }
    }
}
