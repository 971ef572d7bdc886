// Descriptor set layout and per-epoch descriptor pool
//
// Binding 0: uniform buffer (vertex stage), one per presentable image
// Binding 1: combined image sampler (fragment stage), shared texture

use ash::vk;
use std::sync::Arc;

use super::buffer::GpuBuffer;
use super::texture::Texture;
use super::DeviceContext;
use crate::error::{RenderResult, VkResultExt};
use crate::geometry::UniformBufferObject;

pub const UNIFORM_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;

pub fn layout_bindings() -> [vk::DescriptorSetLayoutBinding; 2] {
    [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(UNIFORM_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(SAMPLER_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build(),
    ]
}

pub struct DescriptorSetLayout {
    pub layout: vk::DescriptorSetLayout,
    device: Arc<DeviceContext>,
}

impl DescriptorSetLayout {
    pub fn new(device: Arc<DeviceContext>) -> RenderResult<Self> {
        let bindings = layout_bindings();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        let layout = unsafe { device.device.create_descriptor_set_layout(&create_info, None) }
            .context("Failed to create descriptor set layout")?;

        Ok(Self { layout, device })
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_descriptor_set_layout(self.layout, None) };
    }
}

/// Pool sized for exactly one set per presentable image.
/// Sets are freed with the pool.
pub struct DescriptorPool {
    pub pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
    device: Arc<DeviceContext>,
}

impl DescriptorPool {
    /// Allocate and write one set per uniform buffer, all sharing `texture`
    pub fn new(
        device: Arc<DeviceContext>,
        layout: &DescriptorSetLayout,
        uniform_buffers: &[GpuBuffer],
        texture: &Texture,
    ) -> RenderResult<Self> {
        let set_count = uniform_buffers.len() as u32;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: set_count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: set_count,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(set_count);

        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        let mut descriptors = Self {
            pool,
            sets: Vec::new(),
            device,
        };

        let layouts = vec![layout.layout; uniform_buffers.len()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        descriptors.sets = unsafe { descriptors.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor sets")?;

        for (&set, uniform) in descriptors.sets.iter().zip(uniform_buffers) {
            descriptors.write_set(set, uniform, texture);
        }

        Ok(descriptors)
    }

    fn write_set(&self, set: vk::DescriptorSet, uniform: &GpuBuffer, texture: &Texture) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: uniform.buffer,
            offset: 0,
            range: std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize,
        }];
        let image_info = [vk::DescriptorImageInfo {
            sampler: texture.sampler.sampler,
            image_view: texture.image.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(UNIFORM_BINDING)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(SAMPLER_BINDING)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info)
                .build(),
        ];

        unsafe { self.device.device.update_descriptor_sets(&writes, &[]) };
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_descriptor_pool(self.pool, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_is_vertex_only_and_sampler_is_fragment_only() {
        let [uniform, sampler] = layout_bindings();

        assert_eq!(uniform.binding, 0);
        assert_eq!(uniform.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(uniform.stage_flags, vk::ShaderStageFlags::VERTEX);

        assert_eq!(sampler.binding, 1);
        assert_eq!(sampler.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sampler.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }
}
