//! Full-screen background generation via compute.

use ash::vk;
use nereid_gpu::error::Result;
use nereid_gpu::{
    write_storage_image, CommandEncoder, ComputePipeline, DescriptorPool,
    DescriptorSetLayoutBuilder, GpuImage, RenderContext,
};

/// Workgroup edge length of the gradient compute shader.
const WORKGROUP_SIZE: u32 = 16;

/// Compute pass that fills the draw image with a gradient each frame.
pub struct BackgroundPass {
    pipeline: ComputePipeline,
    set_layout: vk::DescriptorSetLayout,
    descriptor_set: vk::DescriptorSet,
}

impl BackgroundPass {
    /// Build the gradient pipeline and bind its storage-image descriptor to
    /// the draw image. The set is allocated once and updated in place.
    ///
    /// # Safety
    /// The context must be valid; the draw image must outlive this pass.
    pub unsafe fn new(
        ctx: &RenderContext,
        pool: &DescriptorPool,
        shader: &[u32],
        draw_image: &GpuImage,
    ) -> Result<Self> {
        let set_layout = DescriptorSetLayoutBuilder::new()
            .storage_image(0, vk::ShaderStageFlags::COMPUTE)
            .build(ctx.device())?;

        let descriptor_set = pool.allocate(ctx.device(), &[set_layout])?[0];
        write_storage_image(
            ctx.device(),
            descriptor_set,
            0,
            draw_image.view,
            vk::ImageLayout::GENERAL,
        );

        let pipeline = ComputePipeline::new(ctx.device(), shader, &[set_layout], &[])?;

        Ok(Self {
            pipeline,
            set_layout,
            descriptor_set,
        })
    }

    /// Dispatch the gradient over the draw image.
    ///
    /// The draw image must be in GENERAL layout.
    ///
    /// # Safety
    /// Must be recorded inside an open session, outside a rendering scope.
    pub unsafe fn record(&self, encoder: &CommandEncoder<'_>, extent: vk::Extent2D) {
        encoder.bind_pipeline(vk::PipelineBindPoint::COMPUTE, self.pipeline.pipeline);
        encoder.bind_descriptor_set(
            vk::PipelineBindPoint::COMPUTE,
            self.pipeline.layout,
            0,
            &[self.descriptor_set],
            &[],
        );
        encoder.dispatch(
            extent.width.div_ceil(WORKGROUP_SIZE),
            extent.height.div_ceil(WORKGROUP_SIZE),
            1,
        );
    }

    /// Destroy the pass's pipeline and layout.
    ///
    /// # Safety
    /// The pass must not be in use.
    pub unsafe fn destroy(&self, ctx: &RenderContext) {
        self.pipeline.destroy(ctx.device());
        ctx.device()
            .destroy_descriptor_set_layout(self.set_layout, None);
    }
}
