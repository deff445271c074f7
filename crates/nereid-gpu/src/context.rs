//! Render context management.
//!
//! The [`RenderContext`] is the single ownership boundary for the Vulkan
//! instance, surface, logical device, and allocator. It is constructed once
//! at startup, passed by reference to every component, and tears its
//! resources down in reverse construction order on drop.

use crate::error::{GpuError, Result};
use crate::instance::{
    create_debug_messenger, create_instance, select_physical_device, PhysicalDeviceInfo,
};
use crate::memory::{find_memory_type_index, GpuAllocator};
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;
use std::sync::Arc;

/// Main render context holding Vulkan bootstrap objects.
pub struct RenderContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) debug_messenger:
        Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) surface_loader: ash::khr::surface::Instance,
    pub(crate) physical_device: PhysicalDeviceInfo,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) allocator: Mutex<GpuAllocator>,
}

impl RenderContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the selected physical device.
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Get the presentation surface.
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get the surface extension loader.
    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    /// Get the swapchain extension loader.
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Get the combined graphics/present queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.physical_device.graphics_family
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Find the lowest-indexed memory type satisfying the filter and flags.
    ///
    /// Returns `None` when no type qualifies, which callers must treat as a
    /// fatal configuration error rather than something to recover from.
    pub fn get_memory_type_index(
        &self,
        type_filter: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        find_memory_type_index(&self.physical_device.memory_properties, type_filter, flags)
    }

    /// Wait for the device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        // Teardown is the reverse of construction: allocator, device,
        // surface, debug messenger, instance.
        unsafe {
            let _ = self.device.device_wait_idle();

            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a render context.
pub struct RenderContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for RenderContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Nereid".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl RenderContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers and debug reporting.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the render context against a window.
    ///
    /// The surface is created before device selection so the chosen queue
    /// family is guaranteed to support presentation to this window.
    pub fn build<W>(self, window: &W) -> Result<RenderContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        let debug_messenger = if self.enable_validation {
            Some(unsafe { create_debug_messenger(&entry, &instance) }?)
        } else {
            None
        };

        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let physical_device =
            unsafe { select_physical_device(&instance, &surface_loader, surface) }?;

        let (device, graphics_queue) = unsafe { create_device(&instance, &physical_device) }?;
        let device = Arc::new(device);

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let allocator =
            unsafe { GpuAllocator::new(&instance, device.clone(), physical_device.raw) }?;

        Ok(RenderContext {
            entry,
            instance,
            debug_messenger,
            surface,
            surface_loader,
            physical_device,
            device,
            swapchain_loader,
            graphics_queue,
            allocator: Mutex::new(allocator),
        })
    }
}

/// Required device extensions.
fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Create the logical device and retrieve the graphics queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: &PhysicalDeviceInfo,
) -> Result<(ash::Device, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(physical_device.graphics_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let extensions = required_device_extensions();
    let extension_names: Vec<*const i8> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    // Vulkan 1.3 features: dynamic rendering replaces render passes,
    // synchronization2 backs the barrier and submit paths
    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    // Vulkan 1.2 features: buffer device address enables bindless vertex pulling
    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .buffer_device_address(true)
        .descriptor_indexing(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut vulkan_1_2_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device.raw, &device_create_info, None)
        .map_err(GpuError::from)?;

    let graphics_queue = device.get_device_queue(physical_device.graphics_family, 0);

    Ok((device, graphics_queue))
}
