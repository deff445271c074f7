//! Entity store and scene-view implementation for the Nereid engine.
//!
//! Uses hecs as the ECS backend. The renderer never sees the store itself,
//! only the [`SceneView`] it implements.

use glam::{Mat4, Quat, Vec3};
use nereid_render::{CameraView, MeshAsset, MeshInstance, SceneView};
use std::sync::Arc;

pub use hecs::{Entity, World};

/// Transform component.
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Create a transform at the given position.
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// The world matrix for this transform.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

/// Camera component holding the projection matrix.
///
/// The entity's [`Transform`] is interpreted as the view transform.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub projection: Mat4,
}

impl Camera {
    /// A right-handed perspective projection with zero-to-one depth and the
    /// Y axis flipped for Vulkan clip space.
    pub fn perspective(fov_y_radians: f32, aspect: f32, z_near: f32, z_far: f32) -> Self {
        let mut projection = Mat4::perspective_rh(fov_y_radians, aspect, z_near, z_far);
        projection.y_axis.y *= -1.0;
        Self { projection }
    }
}

/// Reference to an uploaded mesh asset.
#[derive(Clone)]
pub struct MeshRef(pub Arc<MeshAsset>);

/// A hecs-backed scene satisfying the renderer's [`SceneView`] contract.
#[derive(Default)]
pub struct EcsScene {
    world: World,
}

impl EcsScene {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Access the underlying entity store.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access to the underlying entity store.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Spawn a mesh entity.
    pub fn spawn_mesh(&mut self, mesh: Arc<MeshAsset>, transform: Transform) -> Entity {
        self.world.spawn((MeshRef(mesh), transform))
    }

    /// Spawn the camera entity.
    pub fn spawn_camera(&mut self, camera: Camera, transform: Transform) -> Entity {
        self.world.spawn((camera, transform))
    }
}

impl SceneView for EcsScene {
    fn mesh_instances(&self) -> Box<dyn Iterator<Item = MeshInstance> + '_> {
        let instances: Vec<MeshInstance> = self
            .world
            .query::<(&MeshRef, &Transform)>()
            .iter()
            .map(|(_, (mesh, transform))| MeshInstance {
                mesh: mesh.0.clone(),
                transform: transform.matrix(),
            })
            .collect();

        Box::new(instances.into_iter())
    }

    fn active_camera(&self) -> Option<CameraView> {
        self.world
            .query::<(&Camera, &Transform)>()
            .iter()
            .next()
            .map(|(_, (camera, transform))| CameraView {
                projection: camera.projection,
                view: transform.matrix(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nereid_render::{GpuMeshBuffers, MeshSurface};
    use nereid_gpu::GpuBuffer;
    use ash::vk;

    fn dummy_mesh(name: &str) -> Arc<MeshAsset> {
        Arc::new(MeshAsset {
            name: name.to_string(),
            surfaces: vec![MeshSurface {
                start_index: 0,
                count: 3,
            }],
            buffers: GpuMeshBuffers {
                vertex_buffer: GpuBuffer {
                    buffer: vk::Buffer::null(),
                    allocation: None,
                    size: 0,
                },
                index_buffer: None,
                vertex_buffer_address: 0,
                vertex_count: 3,
                index_count: 3,
            },
        })
    }

    #[test]
    fn enumerates_mesh_instances() {
        let mut scene = EcsScene::new();
        scene.spawn_mesh(dummy_mesh("a"), Transform::from_position(Vec3::X));
        scene.spawn_mesh(dummy_mesh("b"), Transform::from_position(Vec3::Y));

        let instances: Vec<_> = scene.mesh_instances().collect();
        assert_eq!(instances.len(), 2);
    }

    #[test]
    fn instances_are_restartable() {
        let mut scene = EcsScene::new();
        scene.spawn_mesh(dummy_mesh("a"), Transform::default());

        assert_eq!(scene.mesh_instances().count(), 1);
        assert_eq!(scene.mesh_instances().count(), 1);
    }

    #[test]
    fn camera_absent_yields_none() {
        let scene = EcsScene::new();
        assert!(scene.active_camera().is_none());
    }

    #[test]
    fn camera_view_uses_transform_matrix() {
        let mut scene = EcsScene::new();
        let camera = Camera::perspective(1.0, 16.0 / 9.0, 0.1, 100.0);
        let transform = Transform::from_position(Vec3::new(0.0, 0.0, -5.0));
        scene.spawn_camera(camera, transform);

        let view = scene.active_camera().expect("camera spawned");
        assert_eq!(view.projection, camera.projection);
        assert_eq!(view.view, transform.matrix());
    }

    #[test]
    fn perspective_flips_y_for_vulkan() {
        let camera = Camera::perspective(1.0, 1.0, 0.1, 100.0);
        assert!(camera.projection.y_axis.y < 0.0);
    }
}
