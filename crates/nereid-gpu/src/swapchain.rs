//! Swapchain management.
//!
//! Presentation parameters are derived from live surface capabilities by
//! pure functions so the derivation rules stay testable without a device.

use crate::context::RenderContext;
use crate::error::{GpuError, Result};
use crate::surface::{query_surface_support, SurfaceSupport};
use ash::vk;

/// Determine the presentable image count: one more than the surface minimum,
/// clamped to the maximum when the surface reports one.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
}

/// Select the surface format, preferring 8-bit BGRA/RGBA UNORM.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    for format in available {
        if format.format == vk::Format::B8G8R8A8_UNORM
            || format.format == vk::Format::R8G8B8A8_UNORM
        {
            return *format;
        }
    }

    available[0]
}

/// Select the present mode: MAILBOX when vsync is off and the surface offers
/// it, otherwise FIFO, which the platform is required to support.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync {
        for &mode in available {
            if mode == vk::PresentModeKHR::MAILBOX {
                return mode;
            }
        }
    }

    vk::PresentModeKHR::FIFO
}

/// Select the composite alpha mode from a fixed preference list.
pub fn select_composite_alpha(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::CompositeAlphaFlagsKHR {
    let preference = [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ];

    for flag in preference {
        if capabilities.supported_composite_alpha.contains(flag) {
            return flag;
        }
    }

    vk::CompositeAlphaFlagsKHR::OPAQUE
}

/// Determine the swapchain image usage: color attachment always, transfer
/// src/dst when the surface supports them.
pub fn select_image_usage(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
    if capabilities
        .supported_usage_flags
        .contains(vk::ImageUsageFlags::TRANSFER_SRC)
    {
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if capabilities
        .supported_usage_flags
        .contains(vk::ImageUsageFlags::TRANSFER_DST)
    {
        usage |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    usage
}

/// Select the pre-transform, preferring identity.
pub fn select_pre_transform(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

/// Calculate the swapchain extent: the surface's current extent, or the
/// window size clamped to the surface bounds when the surface reports
/// an undefined extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Swapchain wrapper owning the presentable image chain and its views.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for the context's surface.
    ///
    /// # Safety
    /// The context must be valid; `old_swapchain`, when given, must be the
    /// currently live swapchain for the same surface.
    pub unsafe fn new(
        ctx: &RenderContext,
        width: u32,
        height: u32,
        vsync: bool,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        let support = query_surface_support(
            ctx.surface_loader(),
            ctx.physical_device().raw,
            ctx.surface(),
        )?;
        Self::from_support(ctx, &support, width, height, vsync, old_swapchain)
    }

    /// Create a swapchain from an already-queried support snapshot.
    ///
    /// # Safety
    /// See [`Swapchain::new`].
    pub unsafe fn from_support(
        ctx: &RenderContext,
        support: &SurfaceSupport,
        width: u32,
        height: u32,
        vsync: bool,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        let capabilities = &support.capabilities;

        let image_count = select_image_count(capabilities);
        let surface_format = select_surface_format(&support.formats);
        let present_mode = select_present_mode(&support.present_modes, vsync);
        let extent = calculate_extent(capabilities, width, height);
        let composite_alpha = select_composite_alpha(capabilities);
        let image_usage = select_image_usage(capabilities);
        let pre_transform = select_pre_transform(capabilities);

        let queue_families = [ctx.graphics_queue_family()];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(image_usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(pre_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        let swapchain = ctx
            .swapchain_loader()
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = ctx.swapchain_loader().get_swapchain_images(swapchain)?;

        let image_views: Vec<_> = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );

                ctx.device().create_image_view(&view_info, None)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::debug!(
            ?extent,
            format = ?surface_format.format,
            ?present_mode,
            image_count = images.len(),
            "Swapchain created"
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: surface_format.format,
            extent,
        })
    }

    /// Recreate the swapchain in place.
    ///
    /// The replacement is created first with the live handle passed in as
    /// `oldSwapchain`; only once it exists are the previous image views and
    /// the previous swapchain destroyed, so there is never a window with no
    /// valid swapchain if creation fails.
    ///
    /// # Safety
    /// The context must be valid; callers must ensure no in-flight frame
    /// still references the old image views.
    pub unsafe fn recreate(
        &mut self,
        ctx: &RenderContext,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<()> {
        let replacement = Self::new(ctx, width, height, vsync, Some(self.swapchain))?;

        // The old handle's ownership transfers to this destroy step now
        // that the replacement exists.
        for &view in &self.image_views {
            ctx.device().destroy_image_view(view, None);
        }
        ctx.swapchain_loader()
            .destroy_swapchain(self.swapchain, None);

        *self = replacement;
        Ok(())
    }

    /// Acquire the next presentable image.
    ///
    /// Returns the image index and whether the surface reported SUBOPTIMAL.
    /// ERROR_OUT_OF_DATE_KHR is surfaced as an error; no image was acquired
    /// and the caller must recreate the swapchain.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn acquire_next_image(
        &self,
        ctx: &RenderContext,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<(u32, bool)> {
        let result = ctx.swapchain_loader().acquire_next_image(
            self.swapchain,
            timeout_ns,
            semaphore,
            vk::Fence::null(),
        );

        match result {
            Ok((index, suboptimal)) => Ok((index, suboptimal)),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Present an image.
    ///
    /// Returns `true` when the swapchain should be recreated (SUBOPTIMAL or
    /// OUT_OF_DATE).
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn present(
        &self,
        ctx: &RenderContext,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = ctx
            .swapchain_loader()
            .queue_present(ctx.graphics_queue(), &present_info);

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy the swapchain and its image views.
    ///
    /// # Safety
    /// The swapchain must not be in use.
    pub unsafe fn destroy(&self, ctx: &RenderContext) {
        for &view in &self.image_views {
            ctx.device().destroy_image_view(view, None);
        }
        ctx.swapchain_loader()
            .destroy_swapchain(self.swapchain, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    fn format(f: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format: f,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn image_count_is_min_plus_one() {
        assert_eq!(select_image_count(&capabilities(2, 8)), 3);
    }

    #[test]
    fn image_count_clamps_to_max() {
        assert_eq!(select_image_count(&capabilities(3, 3)), 3);
    }

    #[test]
    fn image_count_unbounded_when_max_is_zero() {
        assert_eq!(select_image_count(&capabilities(4, 0)), 5);
    }

    #[test]
    fn format_prefers_bgra_unorm() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT),
            format(vk::Format::B8G8R8A8_UNORM),
            format(vk::Format::R8G8B8A8_UNORM),
        ];
        assert_eq!(
            select_surface_format(&formats).format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn format_accepts_rgba_unorm() {
        let formats = [
            format(vk::Format::B8G8R8A8_SRGB),
            format(vk::Format::R8G8B8A8_UNORM),
        ];
        assert_eq!(
            select_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn format_falls_back_to_first_reported() {
        let formats = [
            format(vk::Format::B8G8R8A8_SRGB),
            format(vk::Format::R16G16B16A16_SFLOAT),
        ];
        assert_eq!(
            select_surface_format(&formats).format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn present_mode_mailbox_without_vsync() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            select_present_mode(&modes, false),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn present_mode_fifo_with_vsync() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(select_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn present_mode_fifo_when_mailbox_missing() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(select_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn composite_alpha_preference_order() {
        let caps = vk::SurfaceCapabilitiesKHR {
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
                | vk::CompositeAlphaFlagsKHR::INHERIT,
            ..Default::default()
        };
        assert_eq!(
            select_composite_alpha(&caps),
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
        );
    }

    #[test]
    fn image_usage_adds_supported_transfer_flags() {
        let caps = vk::SurfaceCapabilitiesKHR {
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
            ..Default::default()
        };
        let usage = select_image_usage(&caps);
        assert!(usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(!usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
    }

    #[test]
    fn extent_uses_surface_extent_when_defined() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&caps, 640, 480);
        assert_eq!(extent.width, 1280);
        assert_eq!(extent.height, 720);
    }

    #[test]
    fn extent_clamps_window_size_when_undefined() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 2048,
                height: 2048,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&caps, 4000, 32);
        assert_eq!(extent.width, 2048);
        assert_eq!(extent.height, 64);
    }
}
