// Device-local images and samplers

use ash::vk;
use std::sync::Arc;

use super::DeviceContext;
use crate::error::{RenderResult, VkResultExt};

/// Single mip, single layer colour range
pub const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Create a 2D colour view with identity swizzle
pub fn create_color_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> RenderResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(COLOR_RANGE);

    unsafe { device.create_image_view(&create_info, None) }.context("Failed to create image view")
}

/// Optimal-tiling 2D image with its memory and view
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    device: Arc<DeviceContext>,
}

impl GpuImage {
    /// Allocate a device-local image. The view is created separately with
    /// [`GpuImage::create_view`] once the contents are in place.
    pub fn new(
        device: Arc<DeviceContext>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> RenderResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .context("Failed to create image")?;

        let mut gpu_image = Self {
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            extent,
            format,
            device,
        };

        let requirements = unsafe { gpu_image.device.device.get_image_memory_requirements(image) };
        let memory_type_index = gpu_image
            .device
            .resolve_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        gpu_image.memory = unsafe { gpu_image.device.device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate image memory")?;

        unsafe { gpu_image.device.device.bind_image_memory(image, gpu_image.memory, 0) }
            .context("Failed to bind image memory")?;

        Ok(gpu_image)
    }

    pub fn create_view(&mut self) -> RenderResult<()> {
        self.view = create_color_view(&self.device.device, self.image, self.format)?;
        Ok(())
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// Fixed linear, repeating sampler
pub struct Sampler {
    pub sampler: vk::Sampler,
    device: Arc<DeviceContext>,
}

impl Sampler {
    pub fn linear(device: Arc<DeviceContext>) -> RenderResult<Self> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST);

        let sampler = unsafe { device.device.create_sampler(&create_info, None) }
            .context("Failed to create sampler")?;

        Ok(Self { sampler, device })
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_sampler(self.sampler, None) };
    }
}
