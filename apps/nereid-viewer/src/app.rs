//! Window handling and the outer loop.

use glam::{Quat, Vec3};
use nereid_gpu::{RenderContext, RenderContextBuilder};
use nereid_render::{destroy_mesh, MeshAsset, Renderer, RendererConfig};
use nereid_scene::{Camera, EcsScene, Entity, Transform};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowId};

const WINDOW_WIDTH: u32 = 1280;
const WINDOW_HEIGHT: u32 = 720;

/// Live application state, created on `resumed`.
struct ViewerState {
    // The window must outlive the surface the context created from it
    window: Arc<Window>,
    ctx: RenderContext,
    renderer: Renderer,
    scene: EcsScene,
    meshes: Vec<Arc<MeshAsset>>,
    mesh_entities: Vec<Entity>,
    last_frame: Instant,
}

/// The viewer application.
pub struct Viewer {
    mesh_path: String,
    state: Option<ViewerState>,
}

impl Viewer {
    pub fn new(mesh_path: String) -> Self {
        Self {
            mesh_path,
            state: None,
        }
    }

    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<ViewerState> {
        let window_attrs = Window::default_attributes()
            .with_title("Nereid Viewer")
            .with_inner_size(PhysicalSize::new(WINDOW_WIDTH, WINDOW_HEIGHT));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let ctx = RenderContextBuilder::new()
            .app_name("Nereid Viewer")
            .build(window.as_ref())?;

        info!("GPU: {}", ctx.physical_device().name());

        let size = window.inner_size();
        let renderer = Renderer::new(
            &ctx,
            &RendererConfig {
                width: size.width,
                height: size.height,
                ..Default::default()
            },
        )?;

        let meshes = nereid_assets::load_gltf_meshes(
            std::path::Path::new(&self.mesh_path),
            |indices, vertices| renderer.upload_mesh(&ctx, indices, vertices),
        )?;

        let mut scene = EcsScene::new();
        let mut mesh_entities = Vec::new();
        for (i, mesh) in meshes.iter().enumerate() {
            let transform = Transform::from_position(Vec3::new(i as f32 * 3.0, 0.0, 0.0));
            mesh_entities.push(scene.spawn_mesh(mesh.clone(), transform));
        }

        let aspect = size.width as f32 / size.height as f32;
        scene.spawn_camera(
            Camera::perspective(70.0_f32.to_radians(), aspect, 0.1, 10_000.0),
            Transform::from_position(Vec3::new(0.0, 0.0, -5.0)),
        );

        Ok(ViewerState {
            window,
            ctx,
            renderer,
            scene,
            meshes,
            mesh_entities,
            last_frame: Instant::now(),
        })
    }
}

impl ViewerState {
    fn update(&mut self, dt: f32) {
        // Slow spin so depth and winding issues are visible immediately
        let spin = Quat::from_rotation_y(dt * 0.8);
        for &entity in &self.mesh_entities {
            if let Ok(mut transform) = self.scene.world_mut().get::<&mut Transform>(entity) {
                transform.rotation = spin * transform.rotation;
            }
        }
    }

    fn render_frame(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.update(dt);

        if let Err(e) = self.renderer.render(&self.ctx, &self.scene) {
            error!("Render error: {e}");
        }
    }

    fn cleanup(mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            error!("Wait idle failed during shutdown: {e}");
        }

        // Drop scene references first so the assets are uniquely owned
        self.scene = EcsScene::new();
        for mesh in self.meshes.drain(..) {
            match Arc::try_unwrap(mesh) {
                Ok(mut asset) => {
                    if let Err(e) = destroy_mesh(&self.ctx, &mut asset.buffers) {
                        error!("Failed to free mesh '{}': {e}", asset.name);
                    }
                }
                Err(asset) => error!("Mesh '{}' still referenced at shutdown", asset.name),
            }
        }

        if let Err(e) = self.renderer.destroy(&self.ctx) {
            error!("Renderer teardown failed: {e}");
        }
        // RenderContext tears down the device, surface, and instance on drop
    }
}

impl ApplicationHandler for Viewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Viewer ready");
            }
            Err(e) => {
                error!("Failed to initialize: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    state.render_frame();
                    state.window.request_redraw();
                }
            }
            WindowEvent::Resized(_) => {
                if let Some(state) = &mut self.state {
                    state.renderer.request_resize();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}
