//! Compression of tile cache layer grids
//!
//! The tile cache never inspects compressed bytes itself. It hands the
//! concatenated height, area and connection grids to a
//! [`TileCacheCompressor`] and gets them back through the same object.

use crate::tile_cache_data::LayerError;

/// Codec used to store layer grids
pub trait TileCacheCompressor {
    /// Upper bound of the compressed size of `buffer_size` input bytes
    fn max_compressed_size(&self, buffer_size: usize) -> usize;

    /// Compresses `buffer`
    fn compress(&self, buffer: &[u8]) -> Result<Vec<u8>, LayerError>;

    /// Decompresses `compressed`, failing when the output would exceed
    /// `max_size` bytes
    fn decompress(&self, compressed: &[u8], max_size: usize) -> Result<Vec<u8>, LayerError>;
}

/// LZ4 block compression with the uncompressed size prepended as a
/// little-endian `u32`
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl Lz4Compressor {
    pub fn new() -> Self {
        Self
    }
}

impl TileCacheCompressor for Lz4Compressor {
    fn max_compressed_size(&self, buffer_size: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(buffer_size) + 4
    }

    fn compress(&self, buffer: &[u8]) -> Result<Vec<u8>, LayerError> {
        Ok(lz4_flex::compress_prepend_size(buffer))
    }

    fn decompress(&self, compressed: &[u8], max_size: usize) -> Result<Vec<u8>, LayerError> {
        if compressed.len() < 4 {
            return Err(LayerError::Truncated {
                expected: 4,
                actual: compressed.len(),
            });
        }
        let size = u32::from_le_bytes([compressed[0], compressed[1], compressed[2], compressed[3]]) as usize;
        if size > max_size {
            return Err(LayerError::Compression(format!(
                "decompressed size {} exceeds limit {}",
                size, max_size
            )));
        }
        lz4_flex::decompress_size_prepended(compressed)
            .map_err(|e| LayerError::Compression(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_round_trip() {
        let comp = Lz4Compressor::new();
        let mut input = vec![0u8; 300];
        for (i, b) in input.iter_mut().enumerate().skip(200) {
            *b = (i % 7) as u8;
        }
        let packed = comp.compress(&input).unwrap();
        assert!(packed.len() <= comp.max_compressed_size(input.len()));
        assert!(packed.len() < input.len());
        assert_eq!(comp.decompress(&packed, 300).unwrap(), input);
    }

    #[test]
    fn test_lz4_rejects_oversized_output() {
        let comp = Lz4Compressor::new();
        let packed = comp.compress(&[1u8; 64]).unwrap();
        assert!(matches!(comp.decompress(&packed, 63), Err(LayerError::Compression(_))));
    }

    #[test]
    fn test_lz4_rejects_garbage() {
        let comp = Lz4Compressor::new();
        assert!(comp.decompress(&[1, 2], 16).is_err());
        assert!(comp.decompress(&[16, 0, 0, 0, 0xff, 0xff, 0xff], 16).is_err());
    }
}
