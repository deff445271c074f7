//! The frame loop.
//!
//! Owns the swapchain, the off-screen draw targets, the per-frame contexts,
//! and the passes, and drives the per-frame sequence: wait, acquire, record,
//! submit, present.

use ash::vk;
use glam::Mat4;
use nereid_gpu::error::{GpuError, Result};
use nereid_gpu::{
    CommandEncoder, DeferredDeletionQueue, DescriptorPool, GpuImage, ImageDesc, ImmediateContext,
    PoolSizeRatio, RenderContext, Swapchain,
};
use std::path::PathBuf;

use crate::background::BackgroundPass;
use crate::frame::{frame_index, FrameResources, FRAME_OVERLAP};
use crate::mesh::{upload_mesh, GpuMeshBuffers, Vertex};
use crate::mesh_pass::{DrawPushConstants, MeshPass};
use crate::scene::{MeshInstance, SceneView};
use crate::shaders::load_shader;
use crate::uniforms::{DynamicTransformBuffer, ViewUniforms};

/// Renderer configuration.
#[derive(Clone)]
pub struct RendererConfig {
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Prefer FIFO over MAILBOX presentation.
    pub vsync: bool,
    /// Directory holding the compiled `.spv` shaders.
    pub shader_dir: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            vsync: false,
            shader_dir: PathBuf::from("assets/shaders"),
        }
    }
}

/// Pick the first depth format the device can use as a depth attachment.
///
/// # Safety
/// The context must be valid.
unsafe fn select_depth_format(ctx: &RenderContext) -> Result<vk::Format> {
    let candidates = [
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D16_UNORM_S8_UINT,
        vk::Format::D16_UNORM,
    ];

    for format in candidates {
        let props = ctx
            .instance()
            .get_physical_device_format_properties(ctx.physical_device().raw, format);
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return Ok(format);
        }
    }

    Err(GpuError::InvalidState(
        "No supported depth attachment format".to_string(),
    ))
}

/// The renderer: per-frame contexts, render targets, passes, and the loop.
pub struct Renderer {
    swapchain: Swapchain,
    swapchain_dirty: bool,
    vsync: bool,

    draw_image: GpuImage,
    depth_image: GpuImage,

    frames: Vec<FrameResources>,
    frame_number: u64,

    immediate: ImmediateContext,
    descriptor_pool: DescriptorPool,
    background: BackgroundPass,
    mesh_pass: MeshPass,
    transforms: DynamicTransformBuffer,
    deferred: DeferredDeletionQueue,
}

impl Renderer {
    /// Build the renderer against the context.
    ///
    /// Reads compiled shaders from `config.shader_dir`, creates the
    /// swapchain and the window-resolution draw and depth images, and sets
    /// up the double-buffered frame contexts.
    pub fn new(ctx: &RenderContext, config: &RendererConfig) -> Result<Self> {
        unsafe {
            let swapchain = Swapchain::new(ctx, config.width, config.height, config.vsync, None)?;

            let draw_image = ctx.allocator().lock().create_image(
                &ImageDesc {
                    format: vk::Format::R16G16B16A16_SFLOAT,
                    width: config.width,
                    height: config.height,
                    usage: vk::ImageUsageFlags::TRANSFER_SRC
                        | vk::ImageUsageFlags::TRANSFER_DST
                        | vk::ImageUsageFlags::STORAGE
                        | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                    aspect: vk::ImageAspectFlags::COLOR,
                },
                "draw_image",
            )?;

            let depth_format = select_depth_format(ctx)?;
            let depth_image = ctx.allocator().lock().create_image(
                &ImageDesc {
                    format: depth_format,
                    width: config.width,
                    height: config.height,
                    usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                    aspect: vk::ImageAspectFlags::DEPTH,
                },
                "depth_image",
            )?;

            let mut frames = Vec::with_capacity(FRAME_OVERLAP);
            for _ in 0..FRAME_OVERLAP {
                frames.push(FrameResources::new(
                    ctx.device(),
                    ctx.graphics_queue_family(),
                )?);
            }

            let immediate = ImmediateContext::new(ctx.device(), ctx.graphics_queue_family())?;

            let descriptor_pool = DescriptorPool::new(
                ctx.device(),
                10,
                &[
                    PoolSizeRatio {
                        ty: vk::DescriptorType::STORAGE_IMAGE,
                        ratio: 1,
                    },
                    PoolSizeRatio {
                        ty: vk::DescriptorType::UNIFORM_BUFFER,
                        ratio: 1,
                    },
                    PoolSizeRatio {
                        ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                        ratio: 1,
                    },
                ],
            )?;

            let gradient_shader = load_shader(&config.shader_dir, "gradient.comp")?;
            let background =
                BackgroundPass::new(ctx, &descriptor_pool, &gradient_shader, &draw_image)?;

            let mesh_vert = load_shader(&config.shader_dir, "mesh.vert")?;
            let mesh_frag = load_shader(&config.shader_dir, "mesh.frag")?;
            let mesh_pass = MeshPass::new(
                ctx,
                &descriptor_pool,
                mesh_vert,
                mesh_frag,
                draw_image.format,
                depth_format,
            )?;

            let min_alignment = ctx
                .physical_device()
                .properties
                .limits
                .min_uniform_buffer_offset_alignment;
            let transforms = DynamicTransformBuffer::new(min_alignment);

            tracing::info!(
                width = config.width,
                height = config.height,
                ?depth_format,
                "Renderer initialized"
            );

            Ok(Self {
                swapchain,
                swapchain_dirty: false,
                vsync: config.vsync,
                draw_image,
                depth_image,
                frames,
                frame_number: 0,
                immediate,
                descriptor_pool,
                background,
                mesh_pass,
                transforms,
                deferred: DeferredDeletionQueue::new(FRAME_OVERLAP),
            })
        }
    }

    /// Upload a mesh through the blocking staging path.
    pub fn upload_mesh(
        &self,
        ctx: &RenderContext,
        indices: &[u32],
        vertices: &[Vertex],
    ) -> Result<GpuMeshBuffers> {
        upload_mesh(ctx, &self.immediate, indices, vertices)
    }

    /// The number of frames rendered so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Flag the swapchain for recreation at the next opportunity.
    pub fn request_resize(&mut self) {
        self.swapchain_dirty = true;
    }

    /// Render one frame from the scene view.
    pub fn render(&mut self, ctx: &RenderContext, scene: &dyn SceneView) -> Result<()> {
        let device = ctx.device();
        let frame_idx = frame_index(self.frame_number, FRAME_OVERLAP);

        unsafe {
            nereid_gpu::sync::wait_for_fence(
                device,
                self.frames[frame_idx].render_fence,
                u64::MAX,
            )?;
        }

        self.deferred
            .process(&mut ctx.allocator().lock(), self.frame_number)?;

        // Pull this frame's data out of the scene before touching the GPU.
        let instances: Vec<MeshInstance> = scene.mesh_instances().collect();
        let camera = scene.active_camera();

        let view_proj = if let Some(camera) = camera {
            self.mesh_pass.write_view(&ViewUniforms {
                projection: camera.projection,
                view: camera.view,
            })?;
            camera.projection * camera.view
        } else {
            Mat4::IDENTITY
        };

        let model_matrices: Vec<Mat4> = instances.iter().map(|i| i.transform).collect();
        let rebound = self.transforms.update(
            ctx,
            &mut self.deferred,
            self.frame_number,
            self.mesh_pass.model_set,
            0,
            &model_matrices,
        )?;
        if rebound {
            tracing::debug!(
                count = model_matrices.len(),
                "Transform buffer grown and descriptor rebound"
            );
        }

        let frame = &self.frames[frame_idx];

        // Acquire before resetting the fence so an early bail-out for
        // recreation leaves the fence signaled.
        let (image_index, suboptimal) = unsafe {
            match self.swapchain.acquire_next_image(
                ctx,
                frame.swapchain_semaphore,
                u64::MAX,
            ) {
                Ok(acquired) => acquired,
                Err(GpuError::Vulkan(result)) if result == vk::Result::ERROR_OUT_OF_DATE_KHR => {
                    self.recreate_swapchain(ctx)?;
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        };
        if suboptimal {
            self.swapchain_dirty = true;
        }

        unsafe {
            nereid_gpu::sync::reset_fence(device, frame.render_fence)?;
        }

        let draw_extent = self.draw_image.extent_2d();
        let swapchain_image = self.swapchain.images[image_index as usize];

        let encoder = CommandEncoder::new(device, frame.command_buffer);
        let cmd = unsafe {
            encoder.reset()?;
            encoder.begin()?;

            // Background: gradient compute writes the draw image in GENERAL
            encoder.transition_image(
                self.draw_image.image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
            );
            self.background.record(&encoder, draw_extent);

            // Geometry on top of the generated background
            encoder.transition_image(
                self.draw_image.image,
                vk::ImageLayout::GENERAL,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            );
            encoder.transition_image(
                self.depth_image.image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            );

            self.record_geometry(&encoder, draw_extent, view_proj, &instances);

            // Blit the draw image into the acquired swapchain image; the
            // extents may differ, the blit converts
            encoder.transition_image(
                self.draw_image.image,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            );
            encoder.transition_image(
                swapchain_image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            encoder.copy_image_to_image(
                self.draw_image.image,
                swapchain_image,
                draw_extent,
                self.swapchain.extent,
            );
            encoder.transition_image(
                swapchain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            );

            encoder.finish()?
        };

        unsafe {
            nereid_gpu::submit_command_buffer(
                device,
                ctx.graphics_queue(),
                cmd,
                Some((
                    frame.swapchain_semaphore,
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                )),
                Some((
                    frame.render_semaphore,
                    vk::PipelineStageFlags2::ALL_GRAPHICS,
                )),
                frame.render_fence,
            )?;

            let present_suboptimal =
                self.swapchain
                    .present(ctx, image_index, &[frame.render_semaphore])?;
            if present_suboptimal {
                self.swapchain_dirty = true;
            }
        }

        if self.swapchain_dirty {
            self.recreate_swapchain(ctx)?;
        }

        self.frame_number += 1;
        Ok(())
    }

    /// Record the dynamic-rendering geometry scope.
    ///
    /// # Safety
    /// The encoder must be in a recording session with the draw and depth
    /// images in attachment layouts.
    unsafe fn record_geometry(
        &self,
        encoder: &CommandEncoder<'_>,
        draw_extent: vk::Extent2D,
        view_proj: Mat4,
        instances: &[MeshInstance],
    ) {
        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.draw_image.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE);

        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.depth_image.view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });

        encoder.start_rendering(
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: draw_extent,
            },
            std::slice::from_ref(&color_attachment),
            Some(&depth_attachment),
            None,
        );

        encoder.set_viewport(draw_extent.width, draw_extent.height);
        encoder.set_scissor(draw_extent.width, draw_extent.height);

        encoder.bind_pipeline(
            vk::PipelineBindPoint::GRAPHICS,
            self.mesh_pass.pipeline.pipeline,
        );

        for (i, instance) in instances.iter().enumerate() {
            let layout = self.mesh_pass.pipeline.layout;

            encoder.bind_descriptor_set(
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[self.mesh_pass.model_set],
                &[self.transforms.dynamic_offset(i)],
            );
            encoder.bind_descriptor_set(
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                1,
                &[self.mesh_pass.view_set],
                &[],
            );

            let push = DrawPushConstants {
                render_matrix: view_proj,
                vertex_buffer: instance.mesh.buffers.vertex_buffer_address,
                _padding: 0,
            };
            encoder.push_constants(
                layout,
                vk::ShaderStageFlags::VERTEX,
                bytemuck::bytes_of(&push),
            );

            let buffers = &instance.mesh.buffers;
            if let Some(index_buffer) = &buffers.index_buffer {
                encoder.bind_index_buffer(index_buffer.buffer);
                for surface in &instance.mesh.surfaces {
                    encoder.draw_indexed(surface.count, surface.start_index);
                }
            } else {
                encoder.draw(buffers.vertex_count);
            }
        }

        encoder.end_rendering();
    }

    /// Recreate the swapchain after a resize or a suboptimal/out-of-date
    /// result.
    ///
    /// The draw and depth images persist at their initial resolution; the
    /// size-converting blit absorbs the extent difference.
    fn recreate_swapchain(&mut self, ctx: &RenderContext) -> Result<()> {
        ctx.wait_idle()?;

        unsafe {
            self.swapchain.recreate(
                ctx,
                self.draw_image.extent.width,
                self.draw_image.extent.height,
                self.vsync,
            )?;
        }
        self.swapchain_dirty = false;

        tracing::info!(extent = ?self.swapchain.extent, "Swapchain recreated");
        Ok(())
    }

    /// Tear down all renderer-owned GPU objects.
    ///
    /// Waits for the device to go idle, then destroys in reverse creation
    /// order. Uploaded meshes are owned by their assets and freed by the
    /// caller before this.
    pub fn destroy(&mut self, ctx: &RenderContext) -> Result<()> {
        ctx.wait_idle()?;

        {
            let mut allocator = ctx.allocator().lock();
            self.transforms.destroy(&mut self.deferred, self.frame_number);
            self.deferred.flush(&mut allocator)?;
        }

        unsafe {
            self.mesh_pass.destroy(ctx)?;
            self.background.destroy(ctx);
            self.descriptor_pool.destroy(ctx.device());
            self.immediate.destroy(ctx.device());

            for frame in &self.frames {
                frame.destroy(ctx.device());
            }

            let mut allocator = ctx.allocator().lock();
            allocator.free_image(&mut self.depth_image)?;
            allocator.free_image(&mut self.draw_image)?;
            drop(allocator);

            self.swapchain.destroy(ctx);
        }

        Ok(())
    }
}
