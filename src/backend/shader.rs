// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. Shaders are compiled offline and read
// from disk at startup, the renderer never compiles GLSL itself.

use anyhow::{Context, Result};
use ash::vk;
use std::io::{Read, Seek};
use std::path::Path;

use super::VulkanDevice;

/// Read SPIR-V words from any byte source. `read_spv` takes care of
/// alignment and rejects lengths that aren't a multiple of four.
pub fn read_spv<R: Read + Seek>(source: &mut R) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(source).context("Invalid SPIR-V bytecode")?;

    if words.first() != Some(&SPIRV_MAGIC) {
        anyhow::bail!("Missing SPIR-V magic number");
    }

    Ok(words)
}

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Load a compiled shader file from disk
pub fn read_spv_file(path: &Path) -> Result<Vec<u32>> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open shader file: {:?}", path))?;

    let words = read_spv(&mut file).with_context(|| format!("Failed to load shader: {:?}", path))?;
    log::debug!("Loaded shader {:?} ({} bytes)", path, words.len() * 4);

    Ok(words)
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn spirv_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn reads_little_endian_words() {
        let bytes = spirv_bytes(&[SPIRV_MAGIC, 0x0001_0000, 7, 0]);
        let words = read_spv(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000, 7, 0]);
    }

    #[test]
    fn rejects_truncated_bytecode() {
        let mut bytes = spirv_bytes(&[SPIRV_MAGIC, 1]);
        bytes.pop();
        assert!(read_spv(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn rejects_non_spirv_data() {
        let bytes = spirv_bytes(&[0xdead_beef, 1, 2]);
        assert!(read_spv(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_spv_file(Path::new("no/such/shader.spv")).unwrap_err();
        assert!(format!("{:#}", err).contains("shader.spv"));
    }
}
