//! The renderer's view of the scene.
//!
//! The renderer does not own entities or know how they are stored. Each
//! frame it asks a [`SceneView`] for the mesh instances to draw and the
//! active camera; any store that can answer those two queries works.

use crate::mesh::MeshAsset;
use glam::Mat4;
use std::sync::Arc;

/// One mesh to draw with its world transform.
pub struct MeshInstance {
    pub mesh: Arc<MeshAsset>,
    pub transform: Mat4,
}

/// The active camera's projection and view matrices.
#[derive(Clone, Copy, Debug)]
pub struct CameraView {
    pub projection: Mat4,
    pub view: Mat4,
}

/// Per-frame scene queries the renderer depends on.
pub trait SceneView {
    /// The mesh instances to draw this frame.
    ///
    /// Every call yields a fresh sequence, so the view can be consumed
    /// once per frame and again next frame.
    fn mesh_instances(&self) -> Box<dyn Iterator<Item = MeshInstance> + '_>;

    /// The active camera, if the scene has one.
    fn active_camera(&self) -> Option<CameraView>;
}
