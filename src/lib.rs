// Vulkan frame renderer
//
// Swapchain lifecycle, frame synchronization and staged resource upload on
// top of ash. The binary in main.rs is a thin winit shell around `Renderer`.

pub mod backend;
pub mod config;
pub mod epoch;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod renderer;

pub use config::Config;
pub use error::{RenderError, RenderResult};
pub use frame::{FrameLoop, FrameStatus, FrameTarget, ResizeSignal};
pub use renderer::Renderer;
