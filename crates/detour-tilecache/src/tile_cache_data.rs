//! Tile cache layer format
//!
//! A layer blob is a [`TileCacheLayerHeader`] padded to a 4 byte boundary
//! followed by the compressed grids: `width * height` height samples, then
//! as many area ids, then as many connection bytes. Header fields are
//! written in native byte order.
//!
//! A connection byte holds the walkable neighbour directions in its low
//! nibble and the directions leading out of the tile (portals) in its high
//! nibble. Direction 0 is -x, 1 is +z, 2 is +x and 3 is -z.

use std::io::{Cursor, Read, Write};

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use detour::detour_common::dt_align4;
use detour::DtStatus;
use thiserror::Error;

use crate::compressor::TileCacheCompressor;

/// Layer magic, `'D' 'T' 'L' 'R'`
pub const TILECACHE_MAGIC: u32 = (b'D' as u32) << 24 | (b'T' as u32) << 16 | (b'L' as u32) << 8 | b'R' as u32;

/// Layer format version
pub const TILECACHE_VERSION: u32 = 1;

/// Size of the packed header fields
const HEADER_FIELDS_SIZE: usize = 54;

/// Size of the header as stored in a blob
pub const TILECACHE_HEADER_SIZE: usize = 56;

/// Errors produced while encoding or decoding layer data
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("wrong magic number: {0:#010x}")]
    WrongMagic(u32),
    #[error("unsupported version: {0}")]
    WrongVersion(u32),
    #[error("data truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serialization")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<LayerError> for DtStatus {
    fn from(err: LayerError) -> Self {
        match err {
            LayerError::WrongMagic(_) => DtStatus::failure_detail(DtStatus::DT_WRONG_MAGIC),
            LayerError::WrongVersion(_) => DtStatus::failure_detail(DtStatus::DT_WRONG_VERSION),
            LayerError::Compression(_) => DtStatus::failure(),
            _ => DtStatus::invalid_param(),
        }
    }
}

/// Header of a layer blob
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileCacheLayerHeader {
    pub magic: u32,
    pub version: u32,
    /// Tile grid coordinates and layer index
    pub tx: i32,
    pub ty: i32,
    pub tlayer: i32,
    /// World space bounds of the layer
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    /// Height range of the samples, in cell heights
    pub hmin: u16,
    pub hmax: u16,
    /// Grid dimensions in cells
    pub width: u8,
    pub height: u8,
    /// Usable sub-region of the grid, inclusive
    pub minx: u8,
    pub maxx: u8,
    pub miny: u8,
    pub maxy: u8,
}

impl Default for TileCacheLayerHeader {
    fn default() -> Self {
        Self {
            magic: TILECACHE_MAGIC,
            version: TILECACHE_VERSION,
            tx: 0,
            ty: 0,
            tlayer: 0,
            bmin: [0.0; 3],
            bmax: [0.0; 3],
            hmin: 0,
            hmax: 0,
            width: 0,
            height: 0,
            minx: 0,
            maxx: 0,
            miny: 0,
            maxy: 0,
        }
    }
}

impl TileCacheLayerHeader {
    /// Number of cells in the grid
    pub fn grid_size(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Reads a header in native byte order, checking magic and version
    pub fn parse(data: &[u8]) -> Result<Self, LayerError> {
        if data.len() < TILECACHE_HEADER_SIZE {
            return Err(LayerError::Truncated {
                expected: TILECACHE_HEADER_SIZE,
                actual: data.len(),
            });
        }
        let header = Self::read_from(&mut Cursor::new(data))?;
        if header.magic != TILECACHE_MAGIC {
            return Err(LayerError::WrongMagic(header.magic));
        }
        if header.version != TILECACHE_VERSION {
            return Err(LayerError::WrongVersion(header.version));
        }
        Ok(header)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self, LayerError> {
        let mut header = Self {
            magic: reader.read_u32::<NativeEndian>()?,
            version: reader.read_u32::<NativeEndian>()?,
            tx: reader.read_i32::<NativeEndian>()?,
            ty: reader.read_i32::<NativeEndian>()?,
            tlayer: reader.read_i32::<NativeEndian>()?,
            ..Default::default()
        };
        for v in header.bmin.iter_mut() {
            *v = reader.read_f32::<NativeEndian>()?;
        }
        for v in header.bmax.iter_mut() {
            *v = reader.read_f32::<NativeEndian>()?;
        }
        header.hmin = reader.read_u16::<NativeEndian>()?;
        header.hmax = reader.read_u16::<NativeEndian>()?;
        header.width = reader.read_u8()?;
        header.height = reader.read_u8()?;
        header.minx = reader.read_u8()?;
        header.maxx = reader.read_u8()?;
        header.miny = reader.read_u8()?;
        header.maxy = reader.read_u8()?;
        Ok(header)
    }

    /// Writes the header followed by its alignment padding
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), LayerError> {
        writer.write_u32::<NativeEndian>(self.magic)?;
        writer.write_u32::<NativeEndian>(self.version)?;
        writer.write_i32::<NativeEndian>(self.tx)?;
        writer.write_i32::<NativeEndian>(self.ty)?;
        writer.write_i32::<NativeEndian>(self.tlayer)?;
        for v in self.bmin.iter().chain(self.bmax.iter()) {
            writer.write_f32::<NativeEndian>(*v)?;
        }
        writer.write_u16::<NativeEndian>(self.hmin)?;
        writer.write_u16::<NativeEndian>(self.hmax)?;
        writer.write_all(&[
            self.width,
            self.height,
            self.minx,
            self.maxx,
            self.miny,
            self.maxy,
        ])?;
        writer.write_all(&[0u8; TILECACHE_HEADER_SIZE - HEADER_FIELDS_SIZE])?;
        Ok(())
    }
}

/// Decompressed layer grids ready for meshing
#[derive(Debug, Clone)]
pub struct TileCacheLayer {
    pub header: TileCacheLayerHeader,
    /// Number of regions after region building
    pub reg_count: u8,
    pub heights: Vec<u8>,
    pub areas: Vec<u8>,
    pub cons: Vec<u8>,
    /// Region id per cell, 0xff for none
    pub regs: Vec<u8>,
}

impl TileCacheLayer {
    /// Creates a layer from raw grids, each `width * height` long
    pub fn new(
        header: TileCacheLayerHeader,
        heights: Vec<u8>,
        areas: Vec<u8>,
        cons: Vec<u8>,
    ) -> Result<Self, LayerError> {
        let n = header.grid_size();
        for grid in [&heights, &areas, &cons] {
            if grid.len() < n {
                return Err(LayerError::Truncated {
                    expected: n,
                    actual: grid.len(),
                });
            }
        }
        Ok(Self {
            header,
            reg_count: 0,
            heights,
            areas,
            cons,
            regs: vec![0xff; n],
        })
    }

    pub fn width(&self) -> i32 {
        self.header.width as i32
    }

    pub fn height(&self) -> i32 {
        self.header.height as i32
    }
}

/// Packs a header and its grids into a layer blob
pub fn build_tile_cache_layer(
    comp: &dyn TileCacheCompressor,
    header: &TileCacheLayerHeader,
    heights: &[u8],
    areas: &[u8],
    cons: &[u8],
) -> Result<Vec<u8>, LayerError> {
    let grid_size = header.grid_size();
    for grid in [heights, areas, cons] {
        if grid.len() < grid_size {
            return Err(LayerError::Truncated {
                expected: grid_size,
                actual: grid.len(),
            });
        }
    }

    let mut buffer = Vec::with_capacity(grid_size * 3);
    buffer.extend_from_slice(&heights[..grid_size]);
    buffer.extend_from_slice(&areas[..grid_size]);
    buffer.extend_from_slice(&cons[..grid_size]);
    let compressed = comp.compress(&buffer)?;

    let header_size = dt_align4(HEADER_FIELDS_SIZE);
    let mut data = Vec::with_capacity(header_size + compressed.len());
    header.write_to(&mut data)?;
    data.extend_from_slice(&compressed);
    Ok(data)
}

/// Unpacks a layer blob
pub fn decompress_tile_cache_layer(
    comp: &dyn TileCacheCompressor,
    data: &[u8],
) -> Result<TileCacheLayer, LayerError> {
    let header = TileCacheLayerHeader::parse(data)?;
    let grid_size = header.grid_size();

    let grids = comp.decompress(&data[TILECACHE_HEADER_SIZE..], grid_size * 3)?;
    if grids.len() < grid_size * 3 {
        return Err(LayerError::Truncated {
            expected: grid_size * 3,
            actual: grids.len(),
        });
    }

    TileCacheLayer::new(
        header,
        grids[..grid_size].to_vec(),
        grids[grid_size..grid_size * 2].to_vec(),
        grids[grid_size * 2..grid_size * 3].to_vec(),
    )
}

#[inline]
fn swap2(data: &mut [u8], offset: usize) {
    data.swap(offset, offset + 1);
}

#[inline]
fn swap4(data: &mut [u8], offset: usize) {
    data[offset..offset + 4].reverse();
}

/// Swaps the byte order of a layer header in place.
///
/// Accepts a header in either byte order. The compressed payload is a byte
/// stream and is left untouched.
pub fn tile_cache_header_swap_endian(data: &mut [u8]) -> Result<(), LayerError> {
    if data.len() < TILECACHE_HEADER_SIZE {
        return Err(LayerError::Truncated {
            expected: TILECACHE_HEADER_SIZE,
            actual: data.len(),
        });
    }
    let magic = u32::from_ne_bytes([data[0], data[1], data[2], data[3]]);
    let version = u32::from_ne_bytes([data[4], data[5], data[6], data[7]]);
    let native = magic == TILECACHE_MAGIC && version == TILECACHE_VERSION;
    let swapped = magic == TILECACHE_MAGIC.swap_bytes() && version == TILECACHE_VERSION.swap_bytes();
    if !native && !swapped {
        if magic != TILECACHE_MAGIC && magic != TILECACHE_MAGIC.swap_bytes() {
            return Err(LayerError::WrongMagic(magic));
        }
        return Err(LayerError::WrongVersion(version));
    }

    // magic, version, tx, ty, tlayer, bmin, bmax
    for field in 0..11 {
        swap4(data, field * 4);
    }
    swap2(data, 44);
    swap2(data, 46);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::Lz4Compressor;

    fn sample_header() -> TileCacheLayerHeader {
        TileCacheLayerHeader {
            tx: 3,
            ty: -2,
            tlayer: 1,
            bmin: [1.0, 2.0, 3.0],
            bmax: [4.0, 5.5, 6.0],
            hmin: 7,
            hmax: 300,
            width: 4,
            height: 3,
            minx: 0,
            maxx: 3,
            miny: 1,
            maxy: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_header_size_is_aligned() {
        assert_eq!(TILECACHE_HEADER_SIZE, dt_align4(HEADER_FIELDS_SIZE));
        let mut buf = Vec::new();
        sample_header().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), TILECACHE_HEADER_SIZE);
    }

    #[test]
    fn test_layer_round_trip() {
        let comp = Lz4Compressor::new();
        let header = sample_header();
        let heights: Vec<u8> = (0..12).collect();
        let areas = vec![63u8; 12];
        let cons: Vec<u8> = (0..12).map(|i| (i * 17) as u8).collect();

        let data = build_tile_cache_layer(&comp, &header, &heights, &areas, &cons).unwrap();
        let layer = decompress_tile_cache_layer(&comp, &data).unwrap();
        assert_eq!(layer.header, header);
        assert_eq!(layer.heights, heights);
        assert_eq!(layer.areas, areas);
        assert_eq!(layer.cons, cons);
        assert_eq!(layer.regs, vec![0xff; 12]);
    }

    #[test]
    fn test_short_grids_are_rejected() {
        let comp = Lz4Compressor::new();
        let err = build_tile_cache_layer(&comp, &sample_header(), &[0; 12], &[0; 11], &[0; 12]).unwrap_err();
        assert!(matches!(err, LayerError::Truncated { expected: 12, actual: 11 }));
    }

    #[test]
    fn test_bad_magic_and_version() {
        let comp = Lz4Compressor::new();
        let mut data = build_tile_cache_layer(&comp, &sample_header(), &[0; 12], &[0; 12], &[0; 12]).unwrap();

        let mut bad_version = data.clone();
        bad_version[4..8].copy_from_slice(&2u32.to_ne_bytes());
        let err = decompress_tile_cache_layer(&comp, &bad_version).unwrap_err();
        assert!(matches!(err, LayerError::WrongVersion(2)));
        assert!(DtStatus::from(err).has_detail(DtStatus::DT_WRONG_VERSION));

        data[0] ^= 0xff;
        let err = decompress_tile_cache_layer(&comp, &data).unwrap_err();
        assert!(DtStatus::from(err).has_detail(DtStatus::DT_WRONG_MAGIC));
    }

    #[test]
    fn test_header_swap_endian() {
        let comp = Lz4Compressor::new();
        let original = build_tile_cache_layer(&comp, &sample_header(), &[1; 12], &[2; 12], &[3; 12]).unwrap();
        let mut data = original.clone();

        tile_cache_header_swap_endian(&mut data).unwrap();
        assert_eq!(&data[0..4], &TILECACHE_MAGIC.swap_bytes().to_ne_bytes());
        assert_eq!(&data[44..46], &7u16.swap_bytes().to_ne_bytes());
        assert_eq!(&data[46..48], &300u16.swap_bytes().to_ne_bytes());
        // Byte fields and payload are untouched.
        assert_eq!(&data[48..], &original[48..]);
        assert!(TileCacheLayerHeader::parse(&data).is_err());

        tile_cache_header_swap_endian(&mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_header_swap_rejects_foreign_data() {
        let mut data = vec![0u8; TILECACHE_HEADER_SIZE];
        assert!(matches!(
            tile_cache_header_swap_endian(&mut data),
            Err(LayerError::WrongMagic(0))
        ));
        assert!(tile_cache_header_swap_endian(&mut [0u8; 8]).is_err());
    }
}
