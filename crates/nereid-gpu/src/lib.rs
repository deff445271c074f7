//! Vulkan abstraction layer for the Nereid engine.
//!
//! This crate provides:
//! - Instance, surface, and device bootstrap behind a single [`RenderContext`]
//! - Memory allocation via gpu-allocator
//! - Swapchain creation and recreation
//! - A one-shot command encoder over a single recording session
//! - Descriptor, pipeline, and synchronization primitives

pub mod command;
pub mod context;
pub mod deferred;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use command::{
    aspect_mask_for_layout, submit_command_buffer, CommandEncoder, CommandPool, ImmediateContext,
};
pub use context::{RenderContext, RenderContextBuilder};
pub use deferred::DeferredDeletionQueue;
pub use descriptors::{
    pool_sizes_from_ratios, write_dynamic_uniform_buffer, write_storage_image,
    write_uniform_buffer, DescriptorPool, DescriptorSetLayoutBuilder, PoolSizeRatio,
};
pub use error::{GpuError, Result};
pub use instance::PhysicalDeviceInfo;
pub use memory::{find_memory_type_index, GpuAllocator, GpuBuffer, GpuImage, ImageDesc};
pub use pipeline::{ComputePipeline, GraphicsPipeline, GraphicsPipelineConfig};
pub use surface::{query_surface_support, SurfaceSupport};
pub use swapchain::Swapchain;
