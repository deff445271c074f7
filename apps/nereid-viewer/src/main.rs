//! Nereid viewer: loads a glTF mesh and renders it in a window.

mod app;

use tracing_subscriber::EnvFilter;
use winit::event_loop::{ControlFlow, EventLoop};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mesh_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "assets/meshes/basicmesh.glb".to_string());

    tracing::info!("Nereid viewer starting...");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut viewer = app::Viewer::new(mesh_path);
    event_loop.run_app(&mut viewer)?;

    Ok(())
}
