//! Compiled shader loading.
//!
//! Shaders are compiled offline; the renderer consumes `.spv` byte blobs
//! from a shader directory at initialization time.

use nereid_gpu::error::{GpuError, Result};
use std::path::Path;

/// Convert a SPIR-V byte blob to the aligned u32 words Vulkan expects.
pub fn bytes_to_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(GpuError::ShaderCompilation(format!(
            "SPIR-V blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Load a compiled shader from `<dir>/<name>.spv`.
pub fn load_shader(dir: &Path, name: &str) -> Result<Vec<u32>> {
    let path = dir.join(format!("{name}.spv"));
    let bytes = std::fs::read(&path).map_err(|e| {
        GpuError::ShaderCompilation(format!("Failed to read {}: {e}", path.display()))
    })?;

    tracing::debug!(path = %path.display(), size = bytes.len(), "Loaded shader");

    bytes_to_spirv(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_little_endian_words() {
        // SPIR-V magic number in little-endian byte order
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        let words = bytes_to_spirv(&bytes).unwrap();
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
    }

    #[test]
    fn rejects_misaligned_blobs() {
        assert!(bytes_to_spirv(&[0x03, 0x02, 0x23]).is_err());
    }

    #[test]
    fn empty_blob_is_empty() {
        assert!(bytes_to_spirv(&[]).unwrap().is_empty());
    }
}
