// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen,
// together with their views and framebuffers. One `Swapchain` is one epoch:
// everything here is torn down and rebuilt together.

use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::image::create_color_view;
use super::DeviceContext;
use crate::error::{RenderError, RenderResult};

/// Format used when the surface has no preference, and preferred otherwise
pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Surface query results the swapchain is derived from
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(device: &DeviceContext) -> RenderResult<Self> {
        let surface = device.surface()?;
        let build_failed = |what: &str, e: vk::Result| RenderError::SwapchainBuildFailed(format!("{what}: {e}"));

        let capabilities = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(device.physical_device, surface.handle)
        }
        .map_err(|e| build_failed("surface capabilities", e))?;

        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(device.physical_device, surface.handle)
        }
        .map_err(|e| build_failed("surface formats", e))?;

        let present_modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(device.physical_device, surface.handle)
        }
        .map_err(|e| build_failed("present modes", e))?;

        if formats.is_empty() || present_modes.is_empty() {
            return Err(RenderError::MissingSurfaceSupport);
        }

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// Pick the surface format.
///
/// A lone `UNDEFINED` entry means the surface accepts anything, so the
/// preferred format is used as-is. Otherwise: exact match, then any entry
/// with the preferred format, then the first entry.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(PREFERRED_FORMAT);
        }
    }

    formats
        .iter()
        .find(|f| f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space)
        .or_else(|| formats.iter().find(|f| f.format == PREFERRED_FORMAT.format))
        .or_else(|| formats.first())
        .copied()
}

/// Mailbox if available, then immediate, otherwise FIFO (always supported)
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    let has = |mode| present_modes.contains(&mode);

    if has(vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else if has(vk::PresentModeKHR::IMMEDIATE) {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Resolve the image extent.
///
/// `current_extent.width == u32::MAX` means the surface lets the swapchain
/// decide; the window framebuffer size is then clamped to the surface limits.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_size: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_size.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_size.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Swapchains cannot be created with a zero-area extent
pub fn has_area(extent: vk::Extent2D) -> bool {
    extent.width > 0 && extent.height > 0
}

/// One more than the minimum (at least two), capped by the maximum if bounded
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = (capabilities.min_image_count + 1).max(2);
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    /// Owned by the presentation engine, never destroyed individually
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    device: Arc<DeviceContext>,
}

impl Swapchain {
    /// Create the image chain and one view per image.
    ///
    /// Any failure tears down what was already created and is reported as
    /// `SwapchainBuildFailed`.
    pub fn new(
        device: Arc<DeviceContext>,
        support: &SwapchainSupport,
        window_size: vk::Extent2D,
    ) -> RenderResult<Self> {
        let surface = device.surface()?;
        let caps = &support.capabilities;

        let surface_format = choose_surface_format(&support.formats).ok_or(RenderError::MissingSurfaceSupport)?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(caps, window_size);
        let image_count = choose_image_count(caps);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}/{:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            surface_format.format,
            surface_format.color_space,
            present_mode
        );

        // Indices are ignored by EXCLUSIVE sharing
        let families = device.queue_families;
        let family_indices = families.unique();
        let sharing_mode = if families.is_shared() {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        };

        let swapchain_loader = khr::Swapchain::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let handle = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| RenderError::SwapchainBuildFailed(format!("create swapchain: {e}")))?;

        let mut swapchain = Self {
            swapchain: handle,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format: surface_format.format,
            extent,
            present_mode,
            device,
        };

        swapchain.images = unsafe { swapchain.swapchain_loader.get_swapchain_images(handle) }
            .map_err(|e| RenderError::SwapchainBuildFailed(format!("get swapchain images: {e}")))?;

        for i in 0..swapchain.images.len() {
            let view = create_color_view(&swapchain.device.device, swapchain.images[i], swapchain.format)
                .map_err(|e| RenderError::SwapchainBuildFailed(format!("image view {i}: {e}")))?;
            swapchain.image_views.push(view);
        }

        log::info!("Created swapchain with {} images", swapchain.images.len());
        Ok(swapchain)
    }

    /// Create one framebuffer per image view, bound to `render_pass`
    pub fn create_framebuffers(&mut self, render_pass: vk::RenderPass) -> RenderResult<()> {
        for (i, &view) in self.image_views.iter().enumerate() {
            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }
                .map_err(|e| RenderError::SwapchainBuildFailed(format!("framebuffer {i}: {e}")))?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next presentable image, signalling `semaphore`.
    ///
    /// Returns the raw Vulkan result so the caller can treat
    /// `ERROR_OUT_OF_DATE_KHR` as a rebuild request.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        }
    }

    /// Present `image_index` once `wait_semaphores` signal. `Ok(true)` means suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Framebuffers, then views, then the chain itself
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
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
    fn undefined_marker_yields_the_fallback_format() {
        let formats = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let chosen = choose_surface_format(&formats).unwrap();

        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn exact_preferred_format_wins() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap(), formats[2]);
    }

    #[test]
    fn preferred_format_in_another_color_space_beats_the_first_entry() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap(), formats[1]);
    }

    #[test]
    fn first_format_is_the_last_resort() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap(), formats[0]);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_priority() {
        use vk::PresentModeKHR as Mode;

        assert_eq!(
            choose_present_mode(&[Mode::FIFO, Mode::IMMEDIATE, Mode::MAILBOX]),
            Mode::MAILBOX
        );
        assert_eq!(choose_present_mode(&[Mode::FIFO, Mode::IMMEDIATE]), Mode::IMMEDIATE);
        assert_eq!(choose_present_mode(&[Mode::FIFO]), Mode::FIFO);
        assert_eq!(choose_present_mode(&[Mode::FIFO_RELAXED, Mode::FIFO]), Mode::FIFO);
    }

    #[test]
    fn oversized_request_is_clamped_to_the_surface_maximum() {
        let caps = capabilities(2, 3);
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 10000,
                height: 10000,
            },
        );
        assert_eq!(
            extent,
            vk::Extent2D {
                width: 4096,
                height: 4096
            }
        );
    }

    #[test]
    fn undersized_request_is_clamped_to_the_surface_minimum() {
        let mut caps = capabilities(2, 3);
        caps.min_image_extent = vk::Extent2D {
            width: 64,
            height: 32,
        };
        let extent = choose_extent(&caps, vk::Extent2D { width: 10, height: 800 });
        assert_eq!(extent, vk::Extent2D { width: 64, height: 800 });
    }

    #[test]
    fn surface_defined_extent_is_used_verbatim() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 1920,
                height: 1080,
            },
        );
        assert_eq!(extent, caps.current_extent);
    }

    #[test]
    fn minimized_surface_yields_an_extent_without_area() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = vk::Extent2D { width: 0, height: 0 };
        caps.min_image_extent = vk::Extent2D { width: 0, height: 0 };
        caps.max_image_extent = vk::Extent2D { width: 0, height: 0 };

        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 1280,
                height: 720,
            },
        );
        assert_eq!(extent, vk::Extent2D { width: 0, height: 0 });
        assert!(!has_area(extent));
    }

    #[test]
    fn area_needs_both_dimensions() {
        assert!(has_area(vk::Extent2D { width: 1, height: 1 }));
        assert!(!has_area(vk::Extent2D { width: 0, height: 720 }));
        assert!(!has_area(vk::Extent2D { width: 1280, height: 0 }));
    }

    #[test]
    fn image_count_stays_within_surface_limits() {
        for min in 1..=8 {
            for max in [0, min, min + 1, min + 4] {
                let caps = capabilities(min, max);
                let count = choose_image_count(&caps);

                assert!(count >= min, "min={min} max={max} count={count}");
                if max > 0 {
                    assert!(count <= max, "min={min} max={max} count={count}");
                } else {
                    assert_eq!(count, min + 1);
                }
            }
        }
    }

    #[test]
    fn image_count_is_at_least_double_buffered_when_allowed() {
        assert_eq!(choose_image_count(&capabilities(0, 0)), 2);
        assert_eq!(choose_image_count(&capabilities(1, 0)), 2);
        assert_eq!(choose_image_count(&capabilities(2, 0)), 3);
        assert_eq!(choose_image_count(&capabilities(2, 2)), 2);
    }
}
