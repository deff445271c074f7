//! Surface capability queries.
//!
//! The swapchain derives its configuration from a live snapshot of the
//! surface's capabilities, formats, and present modes.

use crate::error::Result;
use ash::vk;

/// Surface capabilities query result.
pub struct SurfaceSupport {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Query the current surface support for a physical device.
///
/// # Safety
/// The surface loader, physical device, and surface must be valid.
pub unsafe fn query_surface_support(
    surface_loader: &ash::khr::surface::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<SurfaceSupport> {
    let capabilities =
        surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?;
    let formats = surface_loader.get_physical_device_surface_formats(physical_device, surface)?;
    let present_modes =
        surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?;

    Ok(SurfaceSupport {
        capabilities,
        formats,
        present_modes,
    })
}
