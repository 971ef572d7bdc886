// Command pools, command buffers and the per-image draw recording

use ash::vk;
use std::sync::Arc;

use super::DeviceContext;
use crate::error::{RenderResult, VkResultExt};

pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<DeviceContext>,
}

impl CommandPool {
    pub fn new(
        device: Arc<DeviceContext>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> RenderResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self { pool, device })
    }

    /// Allocate `count` primary command buffers, freed when the result drops
    pub fn allocate(&self, count: u32) -> RenderResult<CommandBuffers> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        Ok(CommandBuffers {
            buffers,
            pool: self.pool,
            device: self.device.clone(),
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

/// Command buffers borrowed from a pool. Must drop before the pool does.
pub struct CommandBuffers {
    pub buffers: Vec<vk::CommandBuffer>,
    pool: vk::CommandPool,
    device: Arc<DeviceContext>,
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            unsafe { self.device.device.free_command_buffers(self.pool, &self.buffers) };
        }
    }
}

/// Everything one presentable image's draw needs
pub struct DrawCommand {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub descriptor_set: vk::DescriptorSet,
    pub clear_color: [f32; 4],
}

/// Record a persistent, re-submittable command buffer for one image.
///
/// The buffer stays valid until the render pass, pipeline or framebuffer
/// changes, i.e. until the next swapchain rebuild.
pub fn record_draw(device: &ash::Device, cmd: vk::CommandBuffer, draw: &DrawCommand) -> RenderResult<()> {
    let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: draw.clear_color,
        },
    }];

    let render_pass_info = vk::RenderPassBeginInfo::builder()
        .render_pass(draw.render_pass)
        .framebuffer(draw.framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: draw.extent,
        })
        .clear_values(&clear_values);

    unsafe {
        device
            .begin_command_buffer(cmd, &begin_info)
            .context("Failed to begin command buffer")?;

        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
        device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer], &[0]);
        device.cmd_bind_index_buffer(cmd, draw.index_buffer, 0, vk::IndexType::UINT16);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            draw.pipeline_layout,
            0,
            &[draw.descriptor_set],
            &[],
        );
        device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);
        device.cmd_end_render_pass(cmd);

        device.end_command_buffer(cmd).context("Failed to end command buffer")?;
    }

    Ok(())
}
