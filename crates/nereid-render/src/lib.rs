//! Frame loop, render passes, and mesh upload for the Nereid engine.
//!
//! This crate provides:
//! - The double-buffered frame loop over the swapchain
//! - The compute background pass and the forward mesh pass
//! - The staging upload path for device-local mesh buffers
//! - The scene-view contract the renderer pulls per-frame data through

pub mod background;
pub mod frame;
pub mod mesh;
pub mod mesh_pass;
pub mod renderer;
pub mod scene;
pub mod shaders;
pub mod uniforms;

pub use frame::{frame_index, FrameResources, FRAME_OVERLAP};
pub use mesh::{
    destroy_mesh, upload_mesh, GpuMeshBuffers, MeshAsset, MeshSurface, StagingLayout, Vertex,
};
pub use mesh_pass::DrawPushConstants;
pub use renderer::{Renderer, RendererConfig};
pub use scene::{CameraView, MeshInstance, SceneView};
pub use shaders::{bytes_to_spirv, load_shader};
pub use uniforms::{aligned_stride, plan_upload, DynamicTransformBuffer, ViewUniforms};
