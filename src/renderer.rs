// Renderer - ties the device, the epoch and the frame loop together
//
// Ownership:
// - DeviceContext: shared by everything through Arc
// - Epoch-independent: frame sync slots, shaders, geometry, texture,
//   descriptor set layout, command pool
// - Per epoch: see `Epoch`
//
// Field order matters for Drop: the epoch goes first, the device last.

use ash::vk;
use std::sync::Arc;
use std::time::Instant;
use winit::window::Window;

use crate::backend::buffer::GpuBuffer;
use crate::backend::command::CommandPool;
use crate::backend::descriptor::DescriptorSetLayout;
use crate::backend::pipeline::PipelineShaders;
use crate::backend::shader::ShaderBlob;
use crate::backend::swapchain::{choose_extent, has_area, SwapchainSupport};
use crate::backend::sync::FrameSync;
use crate::backend::texture::{Texture, TextureData};
use crate::backend::upload::Uploader;
use crate::backend::DeviceContext;
use crate::config::Config;
use crate::epoch::{Epoch, EpochInputs};
use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::frame::{
    AcquireOutcome, FrameLoop, FrameStatus, FrameTarget, PresentOutcome, RebuildOutcome, ResizeSignal,
};
use crate::geometry::{UniformBufferObject, QUAD_INDICES, QUAD_VERTICES};

const CHECKERBOARD_SIZE: u32 = 256;
const CHECKERBOARD_CELL: u32 = 32;

pub struct Renderer {
    frames: FrameLoop,
    gpu: GpuState,
}

impl Renderer {
    /// Bring up the device, upload static resources and build the first epoch.
    ///
    /// A window with no area yet is fine: the first epoch is then built by
    /// the first frame that finds the window non-empty.
    pub fn new(config: &Config, window: Arc<Window>) -> RenderResult<Self> {
        let device = DeviceContext::new(&config.window.title, config.debug.validation_layers, window.as_ref())?;

        let vertex_shader = ShaderBlob::load(&config.assets.vertex_shader)?;
        let fragment_shader = ShaderBlob::load(&config.assets.fragment_shader)?;

        let uploader = Uploader::new(device.clone())?;
        let vertex_buffer = uploader.upload_buffer(
            bytemuck::cast_slice(&QUAD_VERTICES),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = uploader.upload_buffer(
            bytemuck::cast_slice(&QUAD_INDICES),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        let texture_data = match &config.assets.texture {
            Some(path) => TextureData::load(path)?,
            None => {
                log::info!("No texture configured, using a generated checkerboard");
                TextureData::checkerboard(CHECKERBOARD_SIZE, CHECKERBOARD_CELL)
            }
        };
        let texture = Texture::upload(device.clone(), &uploader, &texture_data)?;
        // Static resources are resident; the transient pool is no longer needed
        drop(uploader);

        let descriptor_layout = DescriptorSetLayout::new(device.clone())?;
        let command_pool = CommandPool::new(
            device.clone(),
            device.queue_families.graphics,
            vk::CommandPoolCreateFlags::empty(),
        )?;

        let frames_in_flight = config.frames_in_flight();
        let frame_syncs = (0..frames_in_flight)
            .map(|_| FrameSync::new(device.clone()))
            .collect::<RenderResult<Vec<_>>>()?;
        log::info!("{} frames in flight", frames_in_flight);

        let mut gpu = GpuState {
            epoch: None,
            frame_syncs,
            command_pool,
            descriptor_layout,
            texture,
            index_buffer,
            vertex_buffer,
            vertex_shader,
            fragment_shader,
            clear_color: config.graphics.clear_color,
            start_time: Instant::now(),
            generation: 0,
            window,
            device,
        };

        let mut frames = FrameLoop::new(frames_in_flight);
        if gpu.rebuild()? == RebuildOutcome::Deferred {
            log::info!("Window has no area yet, deferring swapchain creation");
            frames.request_rebuild();
        }

        Ok(Self { frames, gpu })
    }

    /// Render and present one frame
    pub fn render_frame(&mut self) -> RenderResult<FrameStatus> {
        self.frames.render_frame(&mut self.gpu)
    }

    /// Mark the swapchain for rebuild after the next present
    pub fn notify_resized(&self) {
        self.frames.resize_signal().notify();
    }

    /// Handle for the windowing side to raise resize notifications
    pub fn resize_signal(&self) -> ResizeSignal {
        self.frames.resize_signal()
    }

    pub fn frame_count(&self) -> u64 {
        self.frames.frame_count()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.gpu.epoch.as_ref().map(Epoch::extent)
    }

    /// Wait for the GPU to go idle, then release every resource
    pub fn shutdown(mut self) -> RenderResult<()> {
        log::info!("Shutting down after {} frames", self.frames.frame_count());
        self.gpu.device.wait_idle()?;
        self.gpu.epoch = None;
        Ok(())
    }
}

struct GpuState {
    epoch: Option<Epoch>,
    frame_syncs: Vec<FrameSync>,
    command_pool: CommandPool,
    descriptor_layout: DescriptorSetLayout,
    texture: Texture,
    index_buffer: GpuBuffer,
    vertex_buffer: GpuBuffer,
    vertex_shader: ShaderBlob,
    fragment_shader: ShaderBlob,
    clear_color: [f32; 4],
    start_time: Instant,
    generation: u64,
    window: Arc<Window>,
    device: Arc<DeviceContext>,
}

impl GpuState {
    fn epoch(&self) -> RenderResult<&Epoch> {
        self.epoch.as_ref().ok_or(RenderError::NoSwapchain)
    }

    fn window_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

impl FrameTarget for GpuState {
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.frame_syncs[slot].wait()
    }

    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
        let Some(epoch) = &self.epoch else {
            return Ok(AcquireOutcome::OutOfDate);
        };

        match epoch.swapchain.acquire_next_image(self.frame_syncs[slot].image_available) {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(result) => Err(RenderError::Vulkan {
                context: "Failed to acquire swapchain image",
                result,
            }),
        }
    }

    fn update_image_resources(&mut self, image_index: u32) -> RenderResult<()> {
        let epoch = self.epoch()?;
        let elapsed = self.start_time.elapsed().as_secs_f32();
        let ubo = UniformBufferObject::at_time(elapsed, epoch.extent());
        epoch.write_uniforms(image_index, &ubo)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> RenderResult<()> {
        let epoch = self.epoch()?;
        let sync = &self.frame_syncs[slot];

        sync.reset()?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [epoch.command_buffer(image_index)];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], sync.in_flight_fence)
        }
        .context("Failed to submit draw command buffer")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome> {
        let epoch = self.epoch()?;
        let wait = [self.frame_syncs[slot].render_finished];

        match epoch.swapchain.present(self.device.present_queue, image_index, &wait) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(result) => Err(RenderError::Vulkan {
                context: "Failed to present swapchain image",
                result,
            }),
        }
    }

    fn rebuild(&mut self) -> RenderResult<RebuildOutcome> {
        let window_size = self.window_extent();
        if !has_area(window_size) {
            return Ok(RebuildOutcome::Deferred);
        }

        // The surface may report no area even when the window still does
        // (minimized between the size read and this query)
        let support = SwapchainSupport::query(&self.device)?;
        let extent = choose_extent(&support.capabilities, window_size);
        if !has_area(extent) {
            log::debug!(
                "Surface extent is {}x{}, deferring rebuild",
                extent.width,
                extent.height
            );
            return Ok(RebuildOutcome::Deferred);
        }

        // Nothing from the old epoch may still be in use
        self.device.wait_idle()?;
        self.epoch = None;

        self.generation += 1;
        let inputs = EpochInputs {
            descriptor_layout: &self.descriptor_layout,
            shaders: PipelineShaders {
                vertex: &self.vertex_shader,
                fragment: &self.fragment_shader,
            },
            texture: &self.texture,
            vertex_buffer: &self.vertex_buffer,
            index_buffer: &self.index_buffer,
            index_count: QUAD_INDICES.len() as u32,
            command_pool: &self.command_pool,
            clear_color: self.clear_color,
        };
        self.epoch = Some(Epoch::build(
            self.device.clone(),
            self.generation,
            &support,
            window_size,
            &inputs,
        )?);

        Ok(RebuildOutcome::Rebuilt)
    }
}

impl Drop for GpuState {
    fn drop(&mut self) {
        // No GPU work may reference what the fields release
        if let Err(e) = self.device.wait_idle() {
            log::error!("Wait for idle failed during teardown: {}", e);
        }
    }
}
