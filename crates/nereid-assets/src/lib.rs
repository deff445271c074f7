//! glTF mesh loading.
//!
//! A thin adapter over the `gltf` crate: it flattens each mesh's primitives
//! into one interleaved vertex/index pair, records the per-primitive index
//! sub-ranges as surfaces, and hands the arrays to the injected upload
//! function. Parsing details stay inside the library; the engine only sees
//! [`MeshAsset`]s.

use glam::{Vec3, Vec4};
use nereid_gpu::error::GpuError;
use nereid_render::{GpuMeshBuffers, MeshAsset, MeshSurface, Vertex};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Asset loading errors.
#[derive(Error, Debug)]
pub enum AssetError {
    /// The glTF document could not be read or parsed.
    #[error("Failed to load glTF: {0}")]
    Gltf(#[from] gltf::Error),

    /// A primitive is missing required vertex data.
    #[error("Mesh '{mesh}' primitive {primitive} is missing {attribute}")]
    MissingAttribute {
        mesh: String,
        primitive: usize,
        attribute: &'static str,
    },

    /// The GPU upload of the mesh buffers failed.
    #[error("Failed to upload mesh: {0}")]
    Upload(#[from] GpuError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, AssetError>;

/// Load every mesh in a glTF (or GLB) file and upload it through `upload`.
///
/// Each returned asset carries its name, its per-primitive surfaces, and
/// the device-resident buffers produced by the upload function.
pub fn load_gltf_meshes<F>(path: &Path, mut upload: F) -> Result<Vec<Arc<MeshAsset>>>
where
    F: FnMut(&[u32], &[Vertex]) -> nereid_gpu::Result<GpuMeshBuffers>,
{
    let (document, buffers, _images) = gltf::import(path)?;

    let mut meshes = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut vertices: Vec<Vertex> = Vec::new();

    for mesh in document.meshes() {
        let name = mesh.name().unwrap_or("unnamed").to_string();

        indices.clear();
        vertices.clear();
        let mut surfaces = Vec::new();

        for (primitive_index, primitive) in mesh.primitives().enumerate() {
            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

            let index_reader =
                reader
                    .read_indices()
                    .ok_or_else(|| AssetError::MissingAttribute {
                        mesh: name.clone(),
                        primitive: primitive_index,
                        attribute: "indices",
                    })?;

            let initial_vertex = vertices.len() as u32;
            let start_index = indices.len() as u32;

            // Rebase primitive-local indices onto the flattened vertex array
            for index in index_reader.into_u32() {
                indices.push(index + initial_vertex);
            }

            surfaces.push(MeshSurface {
                start_index,
                count: indices.len() as u32 - start_index,
            });

            let positions =
                reader
                    .read_positions()
                    .ok_or_else(|| AssetError::MissingAttribute {
                        mesh: name.clone(),
                        primitive: primitive_index,
                        attribute: "POSITION",
                    })?;

            let base = vertices.len();
            for position in positions {
                vertices.push(Vertex {
                    position: Vec3::from_array(position),
                    uv_x: 0.0,
                    normal: Vec3::X,
                    uv_y: 0.0,
                    color: Vec4::ONE,
                });
            }

            if let Some(normals) = reader.read_normals() {
                for (i, normal) in normals.enumerate() {
                    vertices[base + i].normal = Vec3::from_array(normal);
                }
            }

            if let Some(tex_coords) = reader.read_tex_coords(0) {
                for (i, uv) in tex_coords.into_f32().enumerate() {
                    vertices[base + i].uv_x = uv[0];
                    vertices[base + i].uv_y = uv[1];
                }
            }

            if let Some(colors) = reader.read_colors(0) {
                for (i, color) in colors.into_rgba_f32().enumerate() {
                    vertices[base + i].color = Vec4::from_array(color);
                }
            }
        }

        // Debug visualization: display normals as vertex colors
        for vertex in &mut vertices {
            vertex.color = vertex.normal.extend(1.0);
        }

        let gpu_buffers = upload(&indices, &vertices)?;

        tracing::info!(
            mesh = %name,
            vertices = vertices.len(),
            indices = indices.len(),
            surfaces = surfaces.len(),
            "Loaded glTF mesh"
        );

        meshes.push(Arc::new(MeshAsset {
            name,
            surfaces,
            buffers: gpu_buffers,
        }));
    }

    Ok(meshes)
}
