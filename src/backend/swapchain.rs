// Swapchain - Window presentation
//
// The chain of images we render to and hand to the display. Always FIFO
// (vsync). Rebuilt from the previous chain on resize; the caller retires the
// previous chain only after the new one is fully populated.

use ash::extensions::khr;
use ash::vk;

use super::DeviceContext;
use crate::error::{Error, Result};
use crate::{sink_debug, sink_info};

/// Vsync-paced, never tears, always supported
pub const PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::FIFO;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub image_usage: vk::ImageUsageFlags,
}

/// Result of asking the swapchain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// Image index to render into; `suboptimal` still presents fine
    Image { index: u32, suboptimal: bool },
    /// Surface changed under us; rebuild before rendering again
    OutOfDate,
}

impl Swapchain {
    /// Build a swapchain sized to `extent`.
    ///
    /// Returns `Ok(None)` without touching the driver when the surface is
    /// currently zero-sized (minimized); `previous` then stays usable.
    ///
    /// With `previous`, the driver may recycle its resources. `previous` is
    /// left untouched; once the driver was asked for a new chain, `previous`
    /// is retired and must be released with [`Swapchain::destroy`] after
    /// nothing in flight targets its images.
    pub fn build(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        previous: Option<&Swapchain>,
    ) -> Result<Option<Self>> {
        let log = ctx.log();

        let surface_caps = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
        }
        .map_err(Error::swapchain_build("Failed to query surface capabilities"))?;

        let formats = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
        }
        .map_err(Error::swapchain_build("Failed to query surface formats"))?;

        let surface_format = choose_surface_format(&formats)
            .ok_or_else(|| Error::SwapchainBuild("No suitable surface format".into()))?;

        let Some(extent) = target_extent(&surface_caps, extent) else {
            sink_debug!(log, "Surface is zero-sized, no swapchain built");
            return Ok(None);
        };
        sink_info!(log, "Creating swapchain: {}x{}", extent.width, extent.height);

        let image_count = choose_image_count(&surface_caps);
        let composite_alpha = choose_composite_alpha(surface_caps.supported_composite_alpha);
        let image_usage = choose_image_usage(surface_caps.supported_usage_flags);

        let family_indices = ctx.queue_families.unique();
        let sharing_mode = if family_indices.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        let swapchain_loader = khr::Swapchain::new(&ctx.instance, &ctx.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(image_usage)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(PRESENT_MODE)
            .clipped(true)
            .old_swapchain(previous.map_or(vk::SwapchainKHR::null(), |p| p.swapchain));

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(Error::swapchain_build("Failed to create the swapchain"))?;

        // N comes from the driver, never from the frames-in-flight count
        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) if !images.is_empty() => images,
            Ok(_) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(Error::SwapchainBuild("Driver returned no images".into()));
            }
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(Error::swapchain_build("Failed to get swapchain images")(e));
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(color_subresource_range());

            match unsafe { ctx.device.create_image_view(&create_info, None) } {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    unsafe {
                        for view in image_views.drain(..) {
                            ctx.device.destroy_image_view(view, None);
                        }
                        swapchain_loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(Error::swapchain_build("Failed to create image view")(e));
                }
            }
        }

        sink_debug!(
            log,
            "Created Swapchain with {} images ({:?}, {:?})",
            images.len(),
            surface_format.format,
            PRESENT_MODE
        );

        Ok(Some(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            format: surface_format.format,
            extent,
            image_usage,
        }))
    }

    /// Image count N as reported by the driver
    pub fn image_count(&self) -> usize {
        debug_assert_eq!(self.images.len(), self.image_views.len());
        self.images.len()
    }

    /// Images can be copied out after rendering (frame capture)
    pub fn supports_readback(&self) -> bool {
        self.image_usage.contains(vk::ImageUsageFlags::TRANSFER_SRC)
    }

    /// Acquire next image for rendering, signalling `semaphore` when ready
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<Acquired> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(Error::Acquire(e)),
        }
    }

    /// Present rendered image to screen.
    ///
    /// Returns true when the swapchain should be rebuilt (suboptimal or out
    /// of date). Any other failure is fatal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(Error::render("queue present")(e)),
        }
    }

    /// Destroy image views, then the chain itself.
    ///
    /// No submission targeting these images may still be pending.
    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            for &view in &self.image_views {
                device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Whole color aspect, single mip and layer
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Prefer SRGB BGRA, then UNORM BGRA, then whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let find = |format: vk::Format| {
        formats.iter().copied().find(|f| {
            f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
    };

    find(vk::Format::B8G8R8A8_SRGB)
        .or_else(|| find(vk::Format::B8G8R8A8_UNORM))
        .or_else(|| formats.first().copied())
}

/// The surface's own extent wins; otherwise clamp the requested one.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: requested
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: requested
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// Extent to build at, or None while the surface or the request is
/// zero-sized (minimized window).
pub fn target_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> Option<vk::Extent2D> {
    if requested.width == 0 || requested.height == 0 {
        return None;
    }
    let extent = choose_extent(caps, requested);
    (extent.width > 0 && extent.height > 0).then_some(extent)
}

/// Color attachment, plus transfer reads when the surface allows them.
pub fn choose_image_usage(supported: vk::ImageUsageFlags) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
    if supported.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    usage
}

/// One more than the minimum, capped by the maximum (0 = unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        caps.max_image_count
    } else {
        image_count
    }
}

pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|&flag| supported.contains(flag))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn present_mode_is_fifo() {
        assert_eq!(PRESENT_MODE, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn surface_extent_overrides_request() {
        let mut caps = caps(2, 3);
        caps.current_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let extent = choose_extent(&caps, vk::Extent2D { width: 600, height: 800 });
        assert_eq!((extent.width, extent.height), (640, 480));
    }

    #[test]
    fn requested_extent_is_clamped() {
        let extent = choose_extent(
            &caps(2, 3),
            vk::Extent2D {
                width: 10_000,
                height: 800,
            },
        );
        assert_eq!((extent.width, extent.height), (4096, 800));
    }

    #[test]
    fn zero_request_clamps_to_minimum() {
        let extent = choose_extent(&caps(2, 3), vk::Extent2D { width: 0, height: 0 });
        assert_eq!((extent.width, extent.height), (1, 1));
    }

    #[test]
    fn minimized_surface_has_no_target_extent() {
        // surface reports 0x0 even though the window record is still 600x800
        let mut caps = caps(2, 3);
        caps.current_extent = vk::Extent2D { width: 0, height: 0 };
        assert!(target_extent(&caps, vk::Extent2D { width: 600, height: 800 }).is_none());

        caps.current_extent = vk::Extent2D { width: 600, height: 0 };
        assert!(target_extent(&caps, vk::Extent2D { width: 600, height: 800 }).is_none());
    }

    #[test]
    fn zero_request_has_no_target_extent() {
        assert!(target_extent(&caps(2, 3), vk::Extent2D { width: 0, height: 480 }).is_none());

        let extent = target_extent(&caps(2, 3), vk::Extent2D { width: 640, height: 480 });
        assert_eq!(extent.map(|e| (e.width, e.height)), Some((640, 480)));
    }

    #[test]
    fn transfer_reads_only_when_supported() {
        let usage = choose_image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT);
        assert_eq!(usage, vk::ImageUsageFlags::COLOR_ATTACHMENT);

        let usage = choose_image_usage(
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        );
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }

    #[test]
    fn image_count_respects_bounds() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn srgb_format_preferred() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let format = |formats: &[vk::SurfaceFormatKHR]| choose_surface_format(formats).map(|f| f.format);
        assert_eq!(format(&[unorm, srgb]), Some(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(format(&[unorm]), Some(vk::Format::B8G8R8A8_UNORM));
        assert_eq!(format(&[]), None);
    }

    #[test]
    fn exotic_format_is_last_resort() {
        let odd = vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        };
        let chosen = choose_surface_format(&[odd]).unwrap();
        assert_eq!(chosen.format, odd.format);
        assert_eq!(chosen.color_space, odd.color_space);
    }

    #[test]
    fn opaque_alpha_when_available() {
        let supported = vk::CompositeAlphaFlagsKHR::OPAQUE | vk::CompositeAlphaFlagsKHR::INHERIT;
        assert_eq!(choose_composite_alpha(supported), vk::CompositeAlphaFlagsKHR::OPAQUE);
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::INHERIT),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
    }
}
