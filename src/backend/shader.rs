// Shader loading
//
// Vulkan consumes SPIR-V as 32-bit words. Blobs are read once at startup and
// kept as words; a `ShaderModule` is created from them for each pipeline
// build and destroyed right after.

use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::DeviceContext;
use crate::error::{RenderError, RenderResult, VkResultExt};

/// Validated SPIR-V code
#[derive(Debug, Clone)]
pub struct ShaderBlob {
    pub name: String,
    pub code: Vec<u32>,
}

impl ShaderBlob {
    /// Read a compiled shader from disk
    pub fn load<P: AsRef<Path>>(path: P) -> RenderResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| RenderError::AssetLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let blob = Self::from_bytes(path.display().to_string(), &bytes)?;
        log::debug!("Loaded shader {} ({} words)", blob.name, blob.code.len());
        Ok(blob)
    }

    /// Validate raw bytes as SPIR-V words.
    ///
    /// The bytes need not be 4-byte aligned in memory; they are copied into
    /// an aligned word buffer.
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> RenderResult<Self> {
        let name = name.into();
        let invalid = |reason: String| RenderError::InvalidShader {
            name: name.clone(),
            reason,
        };

        if bytes.is_empty() {
            return Err(invalid("blob is empty".into()));
        }
        if bytes.len() % 4 != 0 {
            return Err(invalid(format!(
                "length {} is not a whole number of 32-bit words",
                bytes.len()
            )));
        }

        let code = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| invalid(e.to_string()))?;
        Ok(Self { name, code })
    }
}

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<DeviceContext>,
}

impl ShaderModule {
    pub fn new(device: Arc<DeviceContext>, blob: &ShaderBlob) -> RenderResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&blob.code);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn whole_words_are_accepted() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let blob = ShaderBlob::from_bytes("test", &words_to_bytes(&words)).unwrap();
        assert_eq!(blob.code, words);
    }

    #[test]
    fn unaligned_input_is_copied() {
        let words = [SPIRV_MAGIC, 7, 9];
        let mut bytes = vec![0u8];
        bytes.extend(words_to_bytes(&words));

        let blob = ShaderBlob::from_bytes("offset", &bytes[1..]).unwrap();
        assert_eq!(blob.code, words);
    }

    #[test]
    fn empty_blob_is_rejected() {
        let err = ShaderBlob::from_bytes("empty", &[]).unwrap_err();
        assert!(matches!(err, RenderError::InvalidShader { ref name, .. } if name == "empty"));
    }

    #[test]
    fn partial_word_is_rejected() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 1]);
        bytes.push(0);
        let err = ShaderBlob::from_bytes("ragged", &bytes).unwrap_err();
        assert!(matches!(err, RenderError::InvalidShader { .. }));
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&words_to_bytes(&[SPIRV_MAGIC, 42])).unwrap();

        let blob = ShaderBlob::load(file.path()).unwrap();
        assert_eq!(blob.code, vec![SPIRV_MAGIC, 42]);
    }

    #[test]
    fn missing_file_is_an_asset_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.spv");

        let err = ShaderBlob::load(&path).unwrap_err();
        assert!(matches!(err, RenderError::AssetLoad { path: ref p, .. } if *p == path));
    }
}
