// Swapchain epoch
//
// Everything sized or bound to one generation of the swapchain: the image
// chain with its views and framebuffers, the render pass, the pipeline (its
// viewport is baked in), the per-image uniform buffers and descriptor sets,
// and the recorded command buffers. An epoch is built and dropped as a unit.

use ash::vk;
use std::mem::size_of;
use std::sync::Arc;

use crate::backend::buffer::{GpuBuffer, HOST_MEMORY};
use crate::backend::command::{record_draw, CommandBuffers, CommandPool, DrawCommand};
use crate::backend::descriptor::{DescriptorPool, DescriptorSetLayout};
use crate::backend::pipeline::{GraphicsPipeline, PipelineShaders, RenderPass};
use crate::backend::swapchain::{Swapchain, SwapchainSupport};
use crate::backend::texture::Texture;
use crate::backend::DeviceContext;
use crate::error::{RenderError, RenderResult};
use crate::geometry::UniformBufferObject;

/// Epoch-independent inputs an epoch is built against
pub struct EpochInputs<'a> {
    pub descriptor_layout: &'a DescriptorSetLayout,
    pub shaders: PipelineShaders<'a>,
    pub texture: &'a Texture,
    pub vertex_buffer: &'a GpuBuffer,
    pub index_buffer: &'a GpuBuffer,
    pub index_count: u32,
    pub command_pool: &'a CommandPool,
    pub clear_color: [f32; 4],
}

pub struct Epoch {
    // Dropped top to bottom: command buffers first, image chain and render pass last
    pub command_buffers: CommandBuffers,
    pub descriptors: DescriptorPool,
    pub uniform_buffers: Vec<GpuBuffer>,
    pub pipeline: GraphicsPipeline,
    pub swapchain: Swapchain,
    pub render_pass: RenderPass,
}

impl Epoch {
    /// Build a complete epoch for a window of `window_size` pixels against
    /// freshly queried surface `support`.
    ///
    /// The previous epoch must already be gone: a surface only backs one
    /// swapchain at a time.
    pub fn build(
        device: Arc<DeviceContext>,
        generation: u64,
        support: &SwapchainSupport,
        window_size: vk::Extent2D,
        inputs: &EpochInputs<'_>,
    ) -> RenderResult<Self> {
        let mut swapchain = Swapchain::new(device.clone(), support, window_size)?;

        let render_pass = RenderPass::new(device.clone(), swapchain.format)?;
        swapchain.create_framebuffers(render_pass.render_pass)?;

        let pipeline = GraphicsPipeline::new(
            device.clone(),
            &render_pass,
            swapchain.extent,
            inputs.descriptor_layout,
            inputs.shaders,
        )?;

        let image_count = swapchain.image_count();
        let uniform_buffers = (0..image_count)
            .map(|_| {
                GpuBuffer::new(
                    device.clone(),
                    size_of::<UniformBufferObject>() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    HOST_MEMORY,
                )
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let descriptors = DescriptorPool::new(
            device.clone(),
            inputs.descriptor_layout,
            &uniform_buffers,
            inputs.texture,
        )?;

        let command_buffers = inputs.command_pool.allocate(image_count as u32)?;
        for (i, &cmd) in command_buffers.buffers.iter().enumerate() {
            let draw = DrawCommand {
                render_pass: render_pass.render_pass,
                framebuffer: swapchain.framebuffers[i],
                extent: swapchain.extent,
                pipeline: pipeline.pipeline,
                pipeline_layout: pipeline.layout,
                vertex_buffer: inputs.vertex_buffer.buffer,
                index_buffer: inputs.index_buffer.buffer,
                index_count: inputs.index_count,
                descriptor_set: descriptors.sets[i],
                clear_color: inputs.clear_color,
            };
            record_draw(&device.device, cmd, &draw)?;
        }

        log::info!(
            "Swapchain epoch {} ready: {}x{}, {} images, {:?}",
            generation,
            swapchain.extent.width,
            swapchain.extent.height,
            image_count,
            swapchain.present_mode
        );

        Ok(Self {
            command_buffers,
            descriptors,
            uniform_buffers,
            pipeline,
            swapchain,
            render_pass,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn command_buffer(&self, image_index: u32) -> vk::CommandBuffer {
        self.command_buffers.buffers[image_index as usize]
    }

    /// Write uniforms for one image. Its previous reader must have completed.
    pub fn write_uniforms(&self, image_index: u32, ubo: &UniformBufferObject) -> RenderResult<()> {
        let buffer = self
            .uniform_buffers
            .get(image_index as usize)
            .ok_or(RenderError::NoSwapchain)?;
        buffer.write(ubo.as_bytes())
    }
}
