// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash. Every wrapper holds an `Arc<DeviceContext>`
// and releases its handles on drop.

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod upload;

pub use device::DeviceContext;
pub use swapchain::Swapchain;
