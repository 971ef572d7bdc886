// Buffer utilities for vertex, index, uniform and staging buffers
//
// `GpuBuffer` owns a VkBuffer and its dedicated backing memory.

use ash::vk;
use std::sync::Arc;

use super::DeviceContext;
use crate::error::{RenderError, RenderResult, VkResultExt};

/// Host-visible and coherent: mappable without explicit flushes
pub const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    device: Arc<DeviceContext>,
}

impl GpuBuffer {
    /// Create a buffer with its own memory allocation
    pub fn new(
        device: Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<Self> {
        let sharing = vk::SharingMode::EXCLUSIVE;
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        // From here on Drop releases whatever has been created
        let mut gpu_buffer = Self {
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
            usage,
            device,
        };

        let requirements = unsafe { gpu_buffer.device.device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = gpu_buffer
            .device
            .resolve_memory_type(requirements.memory_type_bits, memory_properties)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        gpu_buffer.memory = unsafe { gpu_buffer.device.device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate buffer memory")?;

        unsafe {
            gpu_buffer
                .device
                .device
                .bind_buffer_memory(buffer, gpu_buffer.memory, 0)
        }
        .context("Failed to bind buffer memory")?;

        Ok(gpu_buffer)
    }

    /// Copy `bytes` to the start of a host-visible buffer
    pub fn write(&self, bytes: &[u8]) -> RenderResult<()> {
        check_fits(bytes.len(), self.size)?;
        unsafe {
            let ptr = self
                .device
                .device
                .map_memory(self.memory, 0, bytes.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .context("Failed to map buffer memory")? as *mut u8;
            ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
            self.device.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Read the whole contents of a host-visible buffer
    pub fn read(&self) -> RenderResult<Vec<u8>> {
        let mut bytes = vec![0u8; self.size as usize];
        unsafe {
            let ptr = self
                .device
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .context("Failed to map buffer memory")? as *const u8;
            ptr.copy_to_nonoverlapping(bytes.as_mut_ptr(), bytes.len());
            self.device.device.unmap_memory(self.memory);
        }
        Ok(bytes)
    }
}

fn check_fits(len: usize, size: vk::DeviceSize) -> RenderResult<()> {
    let len = len as vk::DeviceSize;
    if len > size {
        return Err(RenderError::UploadTooLarge { len, size });
    }
    Ok(())
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}
