// Staged host -> device uploads
//
// Every transfer goes through a transient host-visible staging buffer and a
// single-use command buffer on the graphics queue. Uploads block on queue
// idle; they only happen at startup or when assets change.

use ash::vk;
use std::sync::Arc;

use super::buffer::{GpuBuffer, HOST_MEMORY};
use super::command::CommandPool;
use super::image::{GpuImage, COLOR_RANGE};
use super::DeviceContext;
use crate::error::{RenderError, RenderResult, VkResultExt};

/// Access masks and pipeline stages for one supported layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier parameters for the two transitions a texture goes through
pub fn transition_masks(from: vk::ImageLayout, to: vk::ImageLayout) -> RenderResult<TransitionMasks> {
    match (from, to) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        _ => Err(RenderError::UnsupportedLayoutTransition { from, to }),
    }
}

/// Record an image layout barrier over mip 0 / layer 0
pub fn record_layout_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) -> RenderResult<()> {
    let masks = transition_masks(from, to)?;

    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access)
        .old_layout(from)
        .new_layout(to)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    Ok(())
}

/// Bytes per texel of the RGBA8 formats `upload_image` is used with
const RGBA8_TEXEL_SIZE: u64 = 4;

/// Pixels must cover a non-empty extent exactly, tightly packed
pub fn check_pixel_data(len: usize, extent: vk::Extent2D) -> RenderResult<()> {
    let expected = u64::from(extent.width) * u64::from(extent.height) * RGBA8_TEXEL_SIZE;
    if expected == 0 || len as u64 != expected {
        return Err(RenderError::PixelDataMismatch {
            width: extent.width,
            height: extent.height,
            len,
        });
    }
    Ok(())
}

/// Moves host data into device-local buffers and images
pub struct Uploader {
    pool: CommandPool,
    device: Arc<DeviceContext>,
}

impl Uploader {
    pub fn new(device: Arc<DeviceContext>) -> RenderResult<Self> {
        let pool = CommandPool::new(
            device.clone(),
            device.queue_families.graphics,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;
        Ok(Self { pool, device })
    }

    /// Upload `bytes` into a new device-local buffer with `usage`
    pub fn upload_buffer(&self, bytes: &[u8], usage: vk::BufferUsageFlags) -> RenderResult<GpuBuffer> {
        let staging = self.staging_buffer(bytes)?;

        let destination = GpuBuffer::new(
            self.device.clone(),
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        self.submit_once(|device, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: staging.size,
            };
            unsafe { device.cmd_copy_buffer(cmd, staging.buffer, destination.buffer, &[region]) };
            Ok(())
        })?;

        log::debug!("Uploaded {} bytes ({:?})", bytes.len(), usage);
        Ok(destination)
    }

    /// Upload tightly packed pixels into a sampled, shader-read-only image
    pub fn upload_image(&self, pixels: &[u8], extent: vk::Extent2D, format: vk::Format) -> RenderResult<GpuImage> {
        check_pixel_data(pixels.len(), extent)?;
        let staging = self.staging_buffer(pixels)?;

        let mut image = GpuImage::new(
            self.device.clone(),
            extent,
            format,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )?;

        self.submit_once(|device, cmd| {
            record_layout_transition(
                device,
                cmd,
                image.image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;

            let region = vk::BufferImageCopy::builder()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .build();

            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            record_layout_transition(
                device,
                cmd,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        image.create_view()?;
        log::debug!("Uploaded {}x{} image ({:?})", extent.width, extent.height, format);
        Ok(image)
    }

    /// Copy a device buffer back into host memory.
    /// `source` must have been created with `TRANSFER_SRC` usage.
    #[cfg(test)]
    pub fn download_buffer(&self, source: &GpuBuffer) -> RenderResult<Vec<u8>> {
        let readback = GpuBuffer::new(
            self.device.clone(),
            source.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            HOST_MEMORY,
        )?;

        self.submit_once(|device, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: source.size,
            };
            unsafe { device.cmd_copy_buffer(cmd, source.buffer, readback.buffer, &[region]) };
            Ok(())
        })?;

        readback.read()
    }

    fn staging_buffer(&self, bytes: &[u8]) -> RenderResult<GpuBuffer> {
        if bytes.is_empty() {
            return Err(RenderError::EmptyUpload);
        }
        let staging = GpuBuffer::new(
            self.device.clone(),
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            HOST_MEMORY,
        )?;
        staging.write(bytes)?;
        Ok(staging)
    }

    /// Record with `record`, submit, and wait for the queue to drain
    fn submit_once<F>(&self, record: F) -> RenderResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> RenderResult<()>,
    {
        // Freed on every exit path when `commands` drops
        let commands = self.pool.allocate(1)?;
        let cmd = commands.buffers[0];
        let device = &self.device.device;

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cmd, &begin_info) }.context("Failed to begin upload commands")?;

        record(device, cmd)?;

        unsafe { device.end_command_buffer(cmd) }.context("Failed to end upload commands")?;

        let submit_info = vk::SubmitInfo::builder().command_buffers(&commands.buffers).build();
        unsafe { device.queue_submit(self.device.graphics_queue, &[submit_info], vk::Fence::null()) }
            .context("Failed to submit upload")?;

        self.device.graphics_queue_wait_idle()
    }
}
