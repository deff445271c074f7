//! GPU mesh resources and the staging upload path.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use gpu_allocator::MemoryLocation;
use nereid_gpu::error::{GpuError, Result};
use nereid_gpu::{CommandEncoder, GpuBuffer, ImmediateContext, RenderContext};

/// Interleaved vertex layout matching the shader's buffer-reference struct.
///
/// UVs are split around the position/normal vectors to keep the struct at
/// two 16-byte blocks plus the color without padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub uv_x: f32,
    pub normal: Vec3,
    pub uv_y: f32,
    pub color: Vec4,
}

impl Vertex {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// A contiguous index sub-range of a mesh, one draw call each.
#[derive(Clone, Copy, Debug)]
pub struct MeshSurface {
    pub start_index: u32,
    pub count: u32,
}

/// Device-resident mesh buffers.
pub struct GpuMeshBuffers {
    pub vertex_buffer: GpuBuffer,
    pub index_buffer: Option<GpuBuffer>,
    /// Raw device address of the vertex buffer, pushed to the shader for
    /// bindless vertex pulling.
    pub vertex_buffer_address: vk::DeviceAddress,
    pub vertex_count: u32,
    pub index_count: u32,
}

/// A named mesh asset with its surfaces and GPU buffers.
pub struct MeshAsset {
    pub name: String,
    pub surfaces: Vec<MeshSurface>,
    pub buffers: GpuMeshBuffers,
}

/// Byte layout of the combined staging buffer: vertex bytes first, index
/// bytes immediately after.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagingLayout {
    pub vertex_offset: u64,
    pub vertex_size: u64,
    pub index_offset: u64,
    pub index_size: u64,
}

impl StagingLayout {
    /// Compute the layout for the given array lengths.
    pub fn new(vertex_count: usize, index_count: usize) -> Self {
        let vertex_size = (vertex_count * Vertex::SIZE) as u64;
        let index_size = (index_count * std::mem::size_of::<u32>()) as u64;
        Self {
            vertex_offset: 0,
            vertex_size,
            index_offset: vertex_size,
            index_size,
        }
    }

    /// Total staging buffer size.
    pub fn total_size(&self) -> u64 {
        self.vertex_size + self.index_size
    }
}

/// Upload vertex and index arrays into device-local buffers.
///
/// Allocates the destination buffers, packs both arrays into one
/// host-visible staging buffer, and runs a blocking immediate submit that
/// copies staging into the destinations. Intended for load time only; the
/// wait fully serializes the upload against the frame loop.
pub fn upload_mesh(
    ctx: &RenderContext,
    immediate: &ImmediateContext,
    indices: &[u32],
    vertices: &[Vertex],
) -> Result<GpuMeshBuffers> {
    // A staging path without a host-visible, coherent memory type is a
    // configuration error, not something to recover from.
    if ctx
        .get_memory_type_index(
            u32::MAX,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .is_none()
    {
        return Err(GpuError::NoCompatibleMemoryType {
            type_filter: u32::MAX,
            flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        });
    }

    let layout = StagingLayout::new(vertices.len(), indices.len());
    let mut allocator = ctx.allocator().lock();

    let vertex_buffer = allocator.create_buffer(
        layout.vertex_size,
        vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        MemoryLocation::GpuOnly,
        "mesh_vertices",
    )?;
    let vertex_buffer_address = vertex_buffer.device_address(ctx.device());

    let index_buffer = if indices.is_empty() {
        None
    } else {
        Some(allocator.create_buffer(
            layout.index_size,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            "mesh_indices",
        )?)
    };

    let mut staging = allocator.create_buffer(
        layout.total_size(),
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        "mesh_staging",
    )?;

    staging.write_range(layout.vertex_offset, vertices)?;
    staging.write_range(layout.index_offset, indices)?;

    drop(allocator);

    unsafe {
        immediate.submit(ctx.device(), ctx.graphics_queue(), |encoder| {
            record_upload(encoder, &staging, &vertex_buffer, index_buffer.as_ref(), &layout);
        })?;
    }

    let mut allocator = ctx.allocator().lock();
    allocator.free_buffer(&mut staging)?;

    Ok(GpuMeshBuffers {
        vertex_buffer,
        index_buffer,
        vertex_buffer_address,
        vertex_count: vertices.len() as u32,
        index_count: indices.len() as u32,
    })
}

fn record_upload(
    encoder: &CommandEncoder<'_>,
    staging: &GpuBuffer,
    vertex_buffer: &GpuBuffer,
    index_buffer: Option<&GpuBuffer>,
    layout: &StagingLayout,
) {
    unsafe {
        let vertex_copy = vk::BufferCopy::default()
            .src_offset(layout.vertex_offset)
            .dst_offset(0)
            .size(layout.vertex_size);
        encoder.copy_buffer(
            staging.buffer,
            vertex_buffer.buffer,
            std::slice::from_ref(&vertex_copy),
        );

        if let Some(index_buffer) = index_buffer {
            let index_copy = vk::BufferCopy::default()
                .src_offset(layout.index_offset)
                .dst_offset(0)
                .size(layout.index_size);
            encoder.copy_buffer(
                staging.buffer,
                index_buffer.buffer,
                std::slice::from_ref(&index_copy),
            );
        }
    }
}

/// Free a mesh's GPU buffers.
pub fn destroy_mesh(ctx: &RenderContext, buffers: &mut GpuMeshBuffers) -> Result<()> {
    let mut allocator = ctx.allocator().lock();
    allocator.free_buffer(&mut buffers.vertex_buffer)?;
    if let Some(index_buffer) = buffers.index_buffer.as_mut() {
        allocator.free_buffer(index_buffer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_shader_struct() {
        assert_eq!(Vertex::SIZE, 48);
        assert_eq!(std::mem::offset_of!(Vertex, position), 0);
        assert_eq!(std::mem::offset_of!(Vertex, uv_x), 12);
        assert_eq!(std::mem::offset_of!(Vertex, normal), 16);
        assert_eq!(std::mem::offset_of!(Vertex, uv_y), 28);
        assert_eq!(std::mem::offset_of!(Vertex, color), 32);
    }

    #[test]
    fn staging_layout_packs_indices_after_vertices() {
        let layout = StagingLayout::new(3, 6);
        assert_eq!(layout.vertex_offset, 0);
        assert_eq!(layout.vertex_size, 3 * 48);
        assert_eq!(layout.index_offset, 3 * 48);
        assert_eq!(layout.index_size, 6 * 4);
        assert_eq!(layout.total_size(), 3 * 48 + 6 * 4);
    }

    #[test]
    fn staging_layout_handles_empty_indices() {
        let layout = StagingLayout::new(4, 0);
        assert_eq!(layout.index_offset, layout.vertex_size);
        assert_eq!(layout.index_size, 0);
        assert_eq!(layout.total_size(), layout.vertex_size);
    }

    #[test]
    fn packed_bytes_round_trip_at_expected_offsets() {
        let vertices = [
            Vertex {
                position: Vec3::new(1.0, 2.0, 3.0),
                uv_x: 0.25,
                normal: Vec3::Y,
                uv_y: 0.75,
                color: Vec4::ONE,
            },
            Vertex {
                position: Vec3::new(-1.0, 0.5, 0.0),
                uv_x: 0.0,
                normal: Vec3::X,
                uv_y: 1.0,
                color: Vec4::new(0.0, 1.0, 0.0, 1.0),
            },
        ];
        let indices = [0u32, 1, 0];

        // Pack the way the staging buffer does: vertices at 0, indices after.
        let layout = StagingLayout::new(vertices.len(), indices.len());
        let mut staging = vec![0u8; layout.total_size() as usize];
        staging[..layout.vertex_size as usize].copy_from_slice(bytemuck::cast_slice(&vertices));
        staging[layout.index_offset as usize..].copy_from_slice(bytemuck::cast_slice(&indices));

        // Read both ranges back and compare against the source bytes.
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
        assert_eq!(&staging[..layout.vertex_size as usize], vertex_bytes);
        assert_eq!(&staging[layout.index_offset as usize..], index_bytes);
    }
}
