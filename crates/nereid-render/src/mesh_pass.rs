//! Forward geometry pass over the scene's meshes.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use gpu_allocator::MemoryLocation;
use nereid_gpu::error::Result;
use nereid_gpu::{
    write_uniform_buffer, DescriptorPool, DescriptorSetLayoutBuilder, GpuBuffer, GraphicsPipeline,
    GraphicsPipelineConfig, RenderContext,
};

use crate::uniforms::ViewUniforms;

/// Per-draw push constants: the combined projection-view matrix and the
/// device address the vertex shader pulls vertices through.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub render_matrix: Mat4,
    pub vertex_buffer: vk::DeviceAddress,
    pub _padding: u64,
}

impl DrawPushConstants {
    /// Size in bytes.
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;
}

/// The graphics pipeline and descriptor objects for mesh rendering.
///
/// Set 0 holds the per-mesh model matrix as a dynamic uniform buffer; set 1
/// holds the fixed-size view uniforms. Both sets are allocated once and
/// updated in place.
pub struct MeshPass {
    pub pipeline: GraphicsPipeline,
    model_set_layout: vk::DescriptorSetLayout,
    view_set_layout: vk::DescriptorSetLayout,
    pub model_set: vk::DescriptorSet,
    pub view_set: vk::DescriptorSet,
    view_buffer: GpuBuffer,
}

impl MeshPass {
    /// Build the mesh pipeline and its descriptor objects.
    ///
    /// No vertex input state is declared: the mesh path pulls vertices
    /// through the pushed buffer address instead of a vertex binding.
    ///
    /// # Safety
    /// The context must be valid.
    pub unsafe fn new(
        ctx: &RenderContext,
        pool: &DescriptorPool,
        vertex_shader: Vec<u32>,
        fragment_shader: Vec<u32>,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let model_set_layout = DescriptorSetLayoutBuilder::new()
            .uniform_buffer_dynamic(0, vk::ShaderStageFlags::VERTEX)
            .build(ctx.device())?;
        let view_set_layout = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(ctx.device())?;

        let sets = pool.allocate(ctx.device(), &[model_set_layout, view_set_layout])?;
        let (model_set, view_set) = (sets[0], sets[1]);

        let view_buffer = ctx.allocator().lock().create_buffer(
            ViewUniforms::SIZE,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            "view_uniforms",
        )?;
        write_uniform_buffer(
            ctx.device(),
            view_set,
            0,
            view_buffer.buffer,
            0,
            ViewUniforms::SIZE,
        );

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(DrawPushConstants::SIZE);

        let config = GraphicsPipelineConfig {
            vertex_shader,
            fragment_shader,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            color_formats: vec![color_format],
            depth_format: Some(depth_format),
            ..Default::default()
        };

        let pipeline = GraphicsPipeline::new(
            ctx.device(),
            &config,
            &[model_set_layout, view_set_layout],
            &[push_constant_range],
        )?;

        Ok(Self {
            pipeline,
            model_set_layout,
            view_set_layout,
            model_set,
            view_set,
            view_buffer,
        })
    }

    /// Upload this frame's camera uniforms into the persistently mapped
    /// view buffer.
    pub fn write_view(&self, view: &ViewUniforms) -> Result<()> {
        self.view_buffer.write(std::slice::from_ref(view))
    }

    /// Destroy the pass's GPU objects.
    ///
    /// # Safety
    /// The pass must not be in use.
    pub unsafe fn destroy(&mut self, ctx: &RenderContext) -> Result<()> {
        ctx.allocator().lock().free_buffer(&mut self.view_buffer)?;
        self.pipeline.destroy(ctx.device());
        ctx.device()
            .destroy_descriptor_set_layout(self.model_set_layout, None);
        ctx.device()
            .destroy_descriptor_set_layout(self.view_set_layout, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_fit_the_guaranteed_range() {
        // 128 bytes is the minimum maxPushConstantsSize
        assert!(DrawPushConstants::SIZE <= 128);
    }

    #[test]
    fn push_constants_layout() {
        assert_eq!(std::mem::offset_of!(DrawPushConstants, render_matrix), 0);
        assert_eq!(std::mem::offset_of!(DrawPushConstants, vertex_buffer), 64);
    }
}
