// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync
// One `FrameSync` per frame in flight; these survive swapchain rebuilds.

use ash::vk;
use std::sync::Arc;

use super::DeviceContext;
use crate::error::{RenderResult, VkResultExt};

/// Practically infinite fence timeout
pub const FENCE_TIMEOUT: u64 = u64::MAX;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    device: Arc<DeviceContext>,
}

impl FrameSync {
    pub fn new(device: Arc<DeviceContext>) -> RenderResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        // A partially built set is released by Drop
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
            device,
        };
        unsafe {
            sync.image_available = sync
                .device
                .device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create acquire semaphore")?;
            sync.render_finished = sync
                .device
                .device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create release semaphore")?;
            sync.in_flight_fence = sync
                .device
                .device
                .create_fence(&fence_info, None)
                .context("Failed to create in-flight fence")?;
        }
        Ok(sync)
    }

    /// Block until the GPU has finished the last submission using this slot
    pub fn wait(&self) -> RenderResult<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight_fence], true, FENCE_TIMEOUT)
        }
        .context("Failed to wait for in-flight fence")
    }

    pub fn reset(&self) -> RenderResult<()> {
        unsafe { self.device.device.reset_fences(&[self.in_flight_fence]) }
            .context("Failed to reset in-flight fence")
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        // Destroying a null handle is a no-op
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
