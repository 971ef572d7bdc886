// Texture loading and upload
//
// Decoded to RGBA8 on the host, uploaded once through the staging path and
// sampled with a fixed linear sampler. No mip chain.

use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::image::{GpuImage, Sampler};
use super::upload::Uploader;
use super::DeviceContext;
use crate::error::{RenderError, RenderResult};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Tightly packed RGBA8 pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Decode an image file into RGBA8
    pub fn load<P: AsRef<Path>>(path: P) -> RenderResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| RenderError::AssetLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let rgba = image::load_from_memory(&bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        log::info!("Loaded texture {:?} ({}x{})", path, width, height);

        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    /// Two-tone checkerboard with `cell`-pixel squares
    pub fn checkerboard(size: u32, cell: u32) -> Self {
        let cell = cell.max(1);
        let light = [230u8, 230, 230, 255];
        let dark = [40u8, 40, 48, 255];

        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let texel = if (x / cell + y / cell) % 2 == 0 { light } else { dark };
                pixels.extend_from_slice(&texel);
            }
        }

        Self {
            width: size,
            height: size,
            pixels,
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// Device-local sampled image with its sampler
pub struct Texture {
    pub image: GpuImage,
    pub sampler: Sampler,
}

impl Texture {
    pub fn upload(device: Arc<DeviceContext>, uploader: &Uploader, data: &TextureData) -> RenderResult<Self> {
        let image = uploader.upload_image(&data.pixels, data.extent(), TEXTURE_FORMAT)?;
        let sampler = Sampler::linear(device)?;
        log::debug!(
            "Texture resident: {}x{} {:?}",
            image.extent.width,
            image.extent.height,
            image.format
        );
        Ok(Self { image, sampler })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_alternates_cells() {
        let data = TextureData::checkerboard(4, 2);
        assert_eq!(data.pixels.len(), 4 * 4 * 4);

        let texel = |x: usize, y: usize| &data.pixels[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(texel(0, 0), texel(1, 1));
        assert_ne!(texel(0, 0), texel(2, 0));
        assert_ne!(texel(0, 0), texel(0, 2));
        assert_eq!(texel(0, 0), texel(2, 2));
    }

    #[test]
    fn checkerboard_is_opaque() {
        let data = TextureData::checkerboard(8, 3);
        assert!(data.pixels.chunks(4).all(|texel| texel[3] == 255));
    }

    #[test]
    fn png_decodes_to_rgba() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        let img = image::RgbImage::from_fn(3, 2, |x, y| image::Rgb([x as u8 * 10, y as u8 * 20, 7]));
        img.save(&path).unwrap();

        let data = TextureData::load(&path).unwrap();
        assert_eq!((data.width, data.height), (3, 2));
        assert_eq!(data.pixels.len(), 3 * 2 * 4);
        // (x=2, y=1) in a 3-wide image
        let offset = (3 + 2) * 4;
        assert_eq!(&data.pixels[offset..offset + 4], &[20, 20, 7, 255]);
    }

    #[test]
    fn missing_texture_is_an_asset_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TextureData::load(dir.path().join("nope.png")).unwrap_err();
        assert!(matches!(err, RenderError::AssetLoad { .. }));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let err = TextureData::load(&path).unwrap_err();
        assert!(matches!(err, RenderError::Texture(_)));
    }
}
