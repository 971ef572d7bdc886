// Error types for the renderer
//
// Fatal conditions are `RenderError` values and propagate to the top level.
// Recoverable presentation states (out of date, suboptimal) never appear
// here; the frame loop consumes them as `AcquireOutcome`/`PresentOutcome`.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// The Vulkan loader could not be found or initialised
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// A Vulkan call failed outside the recoverable presentation cases
    #[error("{context}: {result}")]
    Vulkan {
        context: &'static str,
        result: vk::Result,
    },

    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// The surface reports no formats or no present modes
    #[error("Surface exposes no usable formats or present modes")]
    MissingSurfaceSupport,

    #[error("No memory type in mask {type_bits:#b} has properties {required:?}")]
    NoCompatibleMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("Swapchain build failed: {0}")]
    SwapchainBuildFailed(String),

    #[error("Unsupported image layout transition {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },

    #[error("Failed to load asset {path:?}: {source}")]
    AssetLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid shader blob '{name}': {reason}")]
    InvalidShader { name: String, reason: String },

    #[error("Failed to decode texture: {0}")]
    Texture(#[from] image::ImageError),

    #[error("Refusing to upload an empty payload")]
    EmptyUpload,

    #[error("Payload of {len} bytes does not fit a buffer of {size} bytes")]
    UploadTooLarge { len: vk::DeviceSize, size: vk::DeviceSize },

    /// Pixel data must be non-empty and exactly `width * height * 4` bytes
    #[error("Pixel data of {len} bytes does not match a {width}x{height} RGBA8 image")]
    PixelDataMismatch { width: u32, height: u32, len: usize },

    #[error("Window error: {0}")]
    Window(String),

    /// A frame was requested while no swapchain epoch exists
    #[error("No swapchain has been built")]
    NoSwapchain,
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// Attach a short description to a raw `vk::Result`
pub(crate) trait VkResultExt<T> {
    fn context(self, context: &'static str) -> RenderResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn context(self, context: &'static str) -> RenderResult<T> {
        self.map_err(|result| RenderError::Vulkan { context, result })
    }
}
