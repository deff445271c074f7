//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// The device or host ran out of memory.
    #[error("Out of {0} memory")]
    OutOfMemory(&'static str),

    /// The logical device was lost.
    #[error("Device lost")]
    DeviceLost,

    /// Driver-side initialization failed.
    #[error("Initialization failed")]
    InitializationFailed,

    /// Any other Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// No memory type satisfies the requested filter and property flags.
    #[error("No memory type matches filter {type_filter:#b} with flags {flags:?}")]
    NoCompatibleMemoryType {
        type_filter: u32,
        flags: vk::MemoryPropertyFlags,
    },

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader module creation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<vk::Result> for GpuError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfMemory("host"),
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::OutOfMemory("device"),
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_INITIALIZATION_FAILED => Self::InitializationFailed,
            other => Self::Vulkan(other),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_memory_errors() {
        assert!(matches!(
            GpuError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GpuError::OutOfMemory("device")
        ));
        assert!(matches!(
            GpuError::from(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            GpuError::OutOfMemory("host")
        ));
    }

    #[test]
    fn classifies_device_lost_and_init() {
        assert!(matches!(
            GpuError::from(vk::Result::ERROR_DEVICE_LOST),
            GpuError::DeviceLost
        ));
        assert!(matches!(
            GpuError::from(vk::Result::ERROR_INITIALIZATION_FAILED),
            GpuError::InitializationFailed
        ));
    }

    #[test]
    fn unrecognized_results_stay_raw() {
        assert!(matches!(
            GpuError::from(vk::Result::ERROR_FRAGMENTED_POOL),
            GpuError::Vulkan(vk::Result::ERROR_FRAGMENTED_POOL)
        ));
    }
}
