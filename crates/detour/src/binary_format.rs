//! Binary tile format
//!
//! A tile blob is a fixed 100 byte [`MeshHeader`] followed by 4-byte aligned
//! sections in this order: vertices, polygons, link placeholder, detail
//! meshes, detail vertices, detail triangles, BV-tree and off-mesh
//! connections. Every multi-byte field is written in native byte order.
//! [`TileLayout`] is the single table of section offsets used by the writer,
//! the reader and the endian swap routines.

use std::io::{Cursor, Read, Write};

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::detour_common::dt_align4;
use crate::nav_mesh::{BVNode, OffMeshConnection, Poly, PolyDetail};
use crate::{DtStatus, PolyFlags, PolyRef, DT_VERTS_PER_POLYGON};

/// Tile magic, `'D' 'N' 'A' 'V'`
pub const DT_NAVMESH_MAGIC: u32 = (b'D' as u32) << 24 | (b'N' as u32) << 16 | (b'A' as u32) << 8 | b'V' as u32;

/// Tile format version
pub const DT_NAVMESH_VERSION: u32 = 7;

/// Tile state magic, `'D' 'N' 'M' 'S'`
pub const DT_NAVMESH_STATE_MAGIC: u32 =
    (b'D' as u32) << 24 | (b'N' as u32) << 16 | (b'M' as u32) << 8 | b'S' as u32;

/// Tile state format version
pub const DT_NAVMESH_STATE_VERSION: u32 = 1;

pub const MESH_HEADER_SIZE: usize = 100;
pub const VERT_SIZE: usize = 12;
pub const POLY_SIZE: usize = 32;
pub const LINK_SIZE: usize = 12;
pub const POLY_DETAIL_SIZE: usize = 12;
pub const DETAIL_TRI_SIZE: usize = 4;
pub const BV_NODE_SIZE: usize = 16;
pub const OFF_MESH_CON_SIZE: usize = 36;

const TILE_STATE_HEADER_SIZE: usize = 12;
const POLY_STATE_SIZE: usize = 4;

/// Errors produced while decoding binary tile data
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("wrong magic number: {0:#010x}")]
    WrongMagic(u32),
    #[error("unsupported version: {0}")]
    WrongVersion(u32),
    #[error("data truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("tile state does not match the target tile")]
    StateMismatch,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serialization")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<FormatError> for DtStatus {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::WrongMagic(_) => DtStatus::failure_detail(DtStatus::DT_WRONG_MAGIC),
            FormatError::WrongVersion(_) => DtStatus::failure_detail(DtStatus::DT_WRONG_VERSION),
            _ => DtStatus::invalid_param(),
        }
    }
}

/// Header of a tile blob
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct MeshHeader {
    pub magic: u32,
    pub version: u32,
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub user_id: u32,
    pub poly_count: i32,
    pub vert_count: i32,
    pub max_link_count: i32,
    pub detail_mesh_count: i32,
    pub detail_vert_count: i32,
    pub detail_tri_count: i32,
    pub bv_node_count: i32,
    pub off_mesh_con_count: i32,
    /// Index of the first off-mesh connection polygon
    pub off_mesh_base: i32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    /// Scale from world units to BV-tree quantized units
    pub bv_quant_factor: f32,
}

impl MeshHeader {
    /// Reads a header in native byte order, checking magic and version
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < MESH_HEADER_SIZE {
            return Err(FormatError::Truncated {
                expected: MESH_HEADER_SIZE,
                actual: data.len(),
            });
        }
        let header = Self::read_from(&mut Cursor::new(data))?;
        if header.magic != DT_NAVMESH_MAGIC {
            return Err(FormatError::WrongMagic(header.magic));
        }
        if header.version != DT_NAVMESH_VERSION {
            return Err(FormatError::WrongVersion(header.version));
        }
        Ok(header)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        Ok(Self {
            magic: reader.read_u32::<NativeEndian>()?,
            version: reader.read_u32::<NativeEndian>()?,
            x: reader.read_i32::<NativeEndian>()?,
            y: reader.read_i32::<NativeEndian>()?,
            layer: reader.read_i32::<NativeEndian>()?,
            user_id: reader.read_u32::<NativeEndian>()?,
            poly_count: reader.read_i32::<NativeEndian>()?,
            vert_count: reader.read_i32::<NativeEndian>()?,
            max_link_count: reader.read_i32::<NativeEndian>()?,
            detail_mesh_count: reader.read_i32::<NativeEndian>()?,
            detail_vert_count: reader.read_i32::<NativeEndian>()?,
            detail_tri_count: reader.read_i32::<NativeEndian>()?,
            bv_node_count: reader.read_i32::<NativeEndian>()?,
            off_mesh_con_count: reader.read_i32::<NativeEndian>()?,
            off_mesh_base: reader.read_i32::<NativeEndian>()?,
            walkable_height: reader.read_f32::<NativeEndian>()?,
            walkable_radius: reader.read_f32::<NativeEndian>()?,
            walkable_climb: reader.read_f32::<NativeEndian>()?,
            bmin: read_vec3(reader)?,
            bmax: read_vec3(reader)?,
            bv_quant_factor: reader.read_f32::<NativeEndian>()?,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), FormatError> {
        writer.write_u32::<NativeEndian>(self.magic)?;
        writer.write_u32::<NativeEndian>(self.version)?;
        writer.write_i32::<NativeEndian>(self.x)?;
        writer.write_i32::<NativeEndian>(self.y)?;
        writer.write_i32::<NativeEndian>(self.layer)?;
        writer.write_u32::<NativeEndian>(self.user_id)?;
        writer.write_i32::<NativeEndian>(self.poly_count)?;
        writer.write_i32::<NativeEndian>(self.vert_count)?;
        writer.write_i32::<NativeEndian>(self.max_link_count)?;
        writer.write_i32::<NativeEndian>(self.detail_mesh_count)?;
        writer.write_i32::<NativeEndian>(self.detail_vert_count)?;
        writer.write_i32::<NativeEndian>(self.detail_tri_count)?;
        writer.write_i32::<NativeEndian>(self.bv_node_count)?;
        writer.write_i32::<NativeEndian>(self.off_mesh_con_count)?;
        writer.write_i32::<NativeEndian>(self.off_mesh_base)?;
        writer.write_f32::<NativeEndian>(self.walkable_height)?;
        writer.write_f32::<NativeEndian>(self.walkable_radius)?;
        writer.write_f32::<NativeEndian>(self.walkable_climb)?;
        write_vec3(writer, &self.bmin)?;
        write_vec3(writer, &self.bmax)?;
        writer.write_f32::<NativeEndian>(self.bv_quant_factor)?;
        Ok(())
    }
}

/// Offset and byte size of one section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Section {
    pub offset: usize,
    pub size: usize,
}

impl Section {
    fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Section table of a tile blob, derived from its header counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileLayout {
    pub verts: Section,
    pub polys: Section,
    pub links: Section,
    pub detail_meshes: Section,
    pub detail_verts: Section,
    pub detail_tris: Section,
    pub bv_tree: Section,
    pub off_mesh_cons: Section,
    pub total: usize,
}

impl TileLayout {
    pub fn new(header: &MeshHeader) -> Self {
        let count = |n: i32| n.max(0) as usize;
        let mut offset = dt_align4(MESH_HEADER_SIZE);
        let mut next = |n: usize, stride: usize| {
            let section = Section {
                offset,
                size: dt_align4(n * stride),
            };
            offset = section.end();
            section
        };

        let verts = next(count(header.vert_count), VERT_SIZE);
        let polys = next(count(header.poly_count), POLY_SIZE);
        let links = next(count(header.max_link_count), LINK_SIZE);
        let detail_meshes = next(count(header.detail_mesh_count), POLY_DETAIL_SIZE);
        let detail_verts = next(count(header.detail_vert_count), VERT_SIZE);
        let detail_tris = next(count(header.detail_tri_count), DETAIL_TRI_SIZE);
        let bv_tree = next(count(header.bv_node_count), BV_NODE_SIZE);
        let off_mesh_cons = next(count(header.off_mesh_con_count), OFF_MESH_CON_SIZE);

        Self {
            verts,
            polys,
            links,
            detail_meshes,
            detail_verts,
            detail_tris,
            bv_tree,
            off_mesh_cons,
            total: off_mesh_cons.end(),
        }
    }
}

/// Decoded contents of a tile blob
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileData {
    pub header: MeshHeader,
    pub verts: Vec<[f32; 3]>,
    pub polys: Vec<Poly>,
    pub detail_meshes: Vec<PolyDetail>,
    pub detail_verts: Vec<[f32; 3]>,
    pub detail_tris: Vec<[u8; 4]>,
    pub bv_tree: Vec<BVNode>,
    pub off_mesh_cons: Vec<OffMeshConnection>,
}

impl TileData {
    /// Decodes a native-endian tile blob. The link section is skipped; links
    /// are rebuilt when the tile is added to a mesh.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        let header = MeshHeader::parse(data)?;
        let layout = TileLayout::new(&header);
        if data.len() < layout.total {
            return Err(FormatError::Truncated {
                expected: layout.total,
                actual: data.len(),
            });
        }

        let count = |n: i32| n.max(0) as usize;
        let mut cur = Cursor::new(data);

        cur.set_position(layout.verts.offset as u64);
        let verts = (0..count(header.vert_count))
            .map(|_| read_vec3(&mut cur))
            .collect::<Result<Vec<_>, _>>()?;

        cur.set_position(layout.polys.offset as u64);
        let polys = (0..count(header.poly_count))
            .map(|_| read_poly(&mut cur))
            .collect::<Result<Vec<_>, _>>()?;

        cur.set_position(layout.detail_meshes.offset as u64);
        let detail_meshes = (0..count(header.detail_mesh_count))
            .map(|_| read_poly_detail(&mut cur))
            .collect::<Result<Vec<_>, _>>()?;

        cur.set_position(layout.detail_verts.offset as u64);
        let detail_verts = (0..count(header.detail_vert_count))
            .map(|_| read_vec3(&mut cur))
            .collect::<Result<Vec<_>, _>>()?;

        cur.set_position(layout.detail_tris.offset as u64);
        let mut detail_tris = Vec::with_capacity(count(header.detail_tri_count));
        for _ in 0..count(header.detail_tri_count) {
            let mut t = [0u8; 4];
            cur.read_exact(&mut t)?;
            detail_tris.push(t);
        }

        cur.set_position(layout.bv_tree.offset as u64);
        let bv_tree = (0..count(header.bv_node_count))
            .map(|_| read_bv_node(&mut cur))
            .collect::<Result<Vec<_>, _>>()?;

        cur.set_position(layout.off_mesh_cons.offset as u64);
        let off_mesh_cons = (0..count(header.off_mesh_con_count))
            .map(|_| read_off_mesh_con(&mut cur))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            header,
            verts,
            polys,
            detail_meshes,
            detail_verts,
            detail_tris,
            bv_tree,
            off_mesh_cons,
        })
    }

    /// Encodes the tile. Header counts must agree with the section vectors.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let layout = TileLayout::new(&self.header);
        let mut buf = Vec::with_capacity(layout.total);

        self.header.write_to(&mut buf)?;

        pad_to(&mut buf, layout.verts.offset);
        for v in &self.verts {
            write_vec3(&mut buf, v)?;
        }

        pad_to(&mut buf, layout.polys.offset);
        for p in &self.polys {
            write_poly(&mut buf, p)?;
        }

        // Link slots are zero filled and rebuilt on load.
        pad_to(&mut buf, layout.links.end());

        pad_to(&mut buf, layout.detail_meshes.offset);
        for d in &self.detail_meshes {
            write_poly_detail(&mut buf, d)?;
        }

        pad_to(&mut buf, layout.detail_verts.offset);
        for v in &self.detail_verts {
            write_vec3(&mut buf, v)?;
        }

        pad_to(&mut buf, layout.detail_tris.offset);
        for t in &self.detail_tris {
            buf.write_all(t)?;
        }

        pad_to(&mut buf, layout.bv_tree.offset);
        for n in &self.bv_tree {
            write_bv_node(&mut buf, n)?;
        }

        pad_to(&mut buf, layout.off_mesh_cons.offset);
        for c in &self.off_mesh_cons {
            write_off_mesh_con(&mut buf, c)?;
        }

        pad_to(&mut buf, layout.total);
        Ok(buf)
    }
}

fn pad_to(buf: &mut Vec<u8>, len: usize) {
    if buf.len() < len {
        buf.resize(len, 0);
    }
}

fn read_vec3<R: Read>(reader: &mut R) -> Result<[f32; 3], FormatError> {
    Ok([
        reader.read_f32::<NativeEndian>()?,
        reader.read_f32::<NativeEndian>()?,
        reader.read_f32::<NativeEndian>()?,
    ])
}

fn write_vec3<W: Write>(writer: &mut W, v: &[f32; 3]) -> Result<(), FormatError> {
    for c in v {
        writer.write_f32::<NativeEndian>(*c)?;
    }
    Ok(())
}

fn read_poly<R: Read>(reader: &mut R) -> Result<Poly, FormatError> {
    let first_link = reader.read_u32::<NativeEndian>()?;
    let mut verts = [0u16; DT_VERTS_PER_POLYGON];
    for v in &mut verts {
        *v = reader.read_u16::<NativeEndian>()?;
    }
    let mut neis = [0u16; DT_VERTS_PER_POLYGON];
    for n in &mut neis {
        *n = reader.read_u16::<NativeEndian>()?;
    }
    Ok(Poly {
        first_link,
        verts,
        neis,
        flags: PolyFlags::from_bits_retain(reader.read_u16::<NativeEndian>()?),
        vert_count: reader.read_u8()?,
        area_and_type: reader.read_u8()?,
    })
}

fn write_poly<W: Write>(writer: &mut W, poly: &Poly) -> Result<(), FormatError> {
    writer.write_u32::<NativeEndian>(poly.first_link)?;
    for v in &poly.verts {
        writer.write_u16::<NativeEndian>(*v)?;
    }
    for n in &poly.neis {
        writer.write_u16::<NativeEndian>(*n)?;
    }
    writer.write_u16::<NativeEndian>(poly.flags.bits())?;
    writer.write_u8(poly.vert_count)?;
    writer.write_u8(poly.area_and_type)?;
    Ok(())
}

fn read_poly_detail<R: Read>(reader: &mut R) -> Result<PolyDetail, FormatError> {
    let detail = PolyDetail {
        vert_base: reader.read_u32::<NativeEndian>()?,
        tri_base: reader.read_u32::<NativeEndian>()?,
        vert_count: reader.read_u8()?,
        tri_count: reader.read_u8()?,
    };
    reader.read_u16::<NativeEndian>()?;
    Ok(detail)
}

fn write_poly_detail<W: Write>(writer: &mut W, detail: &PolyDetail) -> Result<(), FormatError> {
    writer.write_u32::<NativeEndian>(detail.vert_base)?;
    writer.write_u32::<NativeEndian>(detail.tri_base)?;
    writer.write_u8(detail.vert_count)?;
    writer.write_u8(detail.tri_count)?;
    writer.write_u16::<NativeEndian>(0)?;
    Ok(())
}

fn read_bv_node<R: Read>(reader: &mut R) -> Result<BVNode, FormatError> {
    let mut node = BVNode::default();
    for v in &mut node.bmin {
        *v = reader.read_u16::<NativeEndian>()?;
    }
    for v in &mut node.bmax {
        *v = reader.read_u16::<NativeEndian>()?;
    }
    node.i = reader.read_i32::<NativeEndian>()?;
    Ok(node)
}

fn write_bv_node<W: Write>(writer: &mut W, node: &BVNode) -> Result<(), FormatError> {
    for v in node.bmin.iter().chain(node.bmax.iter()) {
        writer.write_u16::<NativeEndian>(*v)?;
    }
    writer.write_i32::<NativeEndian>(node.i)?;
    Ok(())
}

fn read_off_mesh_con<R: Read>(reader: &mut R) -> Result<OffMeshConnection, FormatError> {
    let mut pos = [0.0f32; 6];
    for p in &mut pos {
        *p = reader.read_f32::<NativeEndian>()?;
    }
    Ok(OffMeshConnection {
        pos,
        rad: reader.read_f32::<NativeEndian>()?,
        poly: reader.read_u16::<NativeEndian>()?,
        flags: reader.read_u8()?,
        side: reader.read_u8()?,
        user_id: reader.read_u32::<NativeEndian>()?,
    })
}

fn write_off_mesh_con<W: Write>(writer: &mut W, con: &OffMeshConnection) -> Result<(), FormatError> {
    for p in &con.pos {
        writer.write_f32::<NativeEndian>(*p)?;
    }
    writer.write_f32::<NativeEndian>(con.rad)?;
    writer.write_u16::<NativeEndian>(con.poly)?;
    writer.write_u8(con.flags)?;
    writer.write_u8(con.side)?;
    writer.write_u32::<NativeEndian>(con.user_id)?;
    Ok(())
}

#[inline]
fn swap2(data: &mut [u8], offset: usize) {
    data.swap(offset, offset + 1);
}

#[inline]
fn swap4(data: &mut [u8], offset: usize) {
    data[offset..offset + 4].reverse();
}

/// Swaps the byte order of a tile header in place.
///
/// Accepts a header in either byte order. When converting a foreign blob,
/// call this before [`navmesh_data_swap_endian`]; when converting a native
/// blob to foreign order, call it after.
pub fn navmesh_header_swap_endian(data: &mut [u8]) -> Result<(), FormatError> {
    if data.len() < MESH_HEADER_SIZE {
        return Err(FormatError::Truncated {
            expected: MESH_HEADER_SIZE,
            actual: data.len(),
        });
    }
    let magic = u32::from_ne_bytes([data[0], data[1], data[2], data[3]]);
    if magic != DT_NAVMESH_MAGIC && magic != DT_NAVMESH_MAGIC.swap_bytes() {
        return Err(FormatError::WrongMagic(magic));
    }

    for field in 0..MESH_HEADER_SIZE / 4 {
        swap4(data, field * 4);
    }
    Ok(())
}

/// Swaps the byte order of every multi-byte field after the header.
///
/// The header must be in native byte order so the section sizes can be read.
/// Single-byte arrays and the link placeholder are left untouched.
pub fn navmesh_data_swap_endian(data: &mut [u8]) -> Result<(), FormatError> {
    let header = MeshHeader::parse(data)?;
    let layout = TileLayout::new(&header);
    if data.len() < layout.total {
        return Err(FormatError::Truncated {
            expected: layout.total,
            actual: data.len(),
        });
    }
    let count = |n: i32| n.max(0) as usize;

    for i in 0..count(header.vert_count) * 3 {
        swap4(data, layout.verts.offset + i * 4);
    }

    for i in 0..count(header.poly_count) {
        let base = layout.polys.offset + i * POLY_SIZE;
        swap4(data, base);
        // verts[6], neis[6], flags
        for j in 0..DT_VERTS_PER_POLYGON * 2 + 1 {
            swap2(data, base + 4 + j * 2);
        }
    }

    for i in 0..count(header.detail_mesh_count) {
        let base = layout.detail_meshes.offset + i * POLY_DETAIL_SIZE;
        swap4(data, base);
        swap4(data, base + 4);
    }

    for i in 0..count(header.detail_vert_count) * 3 {
        swap4(data, layout.detail_verts.offset + i * 4);
    }

    for i in 0..count(header.bv_node_count) {
        let base = layout.bv_tree.offset + i * BV_NODE_SIZE;
        for j in 0..6 {
            swap2(data, base + j * 2);
        }
        swap4(data, base + 12);
    }

    for i in 0..count(header.off_mesh_con_count) {
        let base = layout.off_mesh_cons.offset + i * OFF_MESH_CON_SIZE;
        for j in 0..7 {
            swap4(data, base + j * 4);
        }
        swap2(data, base + 28);
        swap4(data, base + 32);
    }

    Ok(())
}

/// Encodes per-polygon flags and areas of a tile as a `DNMS` blob
pub(crate) fn encode_tile_state(tile_ref: PolyRef, polys: &[Poly]) -> Result<Vec<u8>, FormatError> {
    let mut buf = Vec::with_capacity(TILE_STATE_HEADER_SIZE + polys.len() * POLY_STATE_SIZE);
    buf.write_u32::<NativeEndian>(DT_NAVMESH_STATE_MAGIC)?;
    buf.write_u32::<NativeEndian>(DT_NAVMESH_STATE_VERSION)?;
    buf.write_u32::<NativeEndian>(tile_ref.id())?;
    for poly in polys {
        buf.write_u16::<NativeEndian>(poly.flags.bits())?;
        buf.write_u8(poly.area())?;
        buf.write_u8(0)?;
    }
    Ok(buf)
}

/// Decodes a `DNMS` blob written for `tile_ref` holding `poly_count` entries
pub(crate) fn decode_tile_state(
    data: &[u8],
    tile_ref: PolyRef,
    poly_count: usize,
) -> Result<Vec<(PolyFlags, u8)>, FormatError> {
    let expected = TILE_STATE_HEADER_SIZE + poly_count * POLY_STATE_SIZE;
    if data.len() < TILE_STATE_HEADER_SIZE {
        return Err(FormatError::Truncated {
            expected,
            actual: data.len(),
        });
    }
    let mut cur = Cursor::new(data);
    let magic = cur.read_u32::<NativeEndian>()?;
    if magic != DT_NAVMESH_STATE_MAGIC {
        return Err(FormatError::WrongMagic(magic));
    }
    let version = cur.read_u32::<NativeEndian>()?;
    if version != DT_NAVMESH_STATE_VERSION {
        return Err(FormatError::WrongVersion(version));
    }
    if cur.read_u32::<NativeEndian>()? != tile_ref.id() {
        return Err(FormatError::StateMismatch);
    }
    if data.len() < expected {
        return Err(FormatError::Truncated {
            expected,
            actual: data.len(),
        });
    }

    let mut states = Vec::with_capacity(poly_count);
    for _ in 0..poly_count {
        let flags = PolyFlags::from_bits_retain(cur.read_u16::<NativeEndian>()?);
        let area = cur.read_u8()?;
        cur.read_u8()?;
        states.push((flags, area));
    }
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{off_mesh_strip_tile_data, quad_tile_data};

    #[test]
    fn test_magic_spells_dnav() {
        assert_eq!(DT_NAVMESH_MAGIC, 0x444E_4156);
        assert_eq!(DT_NAVMESH_STATE_MAGIC, 0x444E_4D53);
    }

    #[test]
    fn test_layout_sections_are_aligned_and_ordered() {
        let header = MeshHeader {
            vert_count: 5,
            poly_count: 3,
            max_link_count: 7,
            detail_mesh_count: 3,
            detail_vert_count: 1,
            detail_tri_count: 3,
            bv_node_count: 5,
            off_mesh_con_count: 1,
            ..Default::default()
        };
        let layout = TileLayout::new(&header);
        let sections = [
            layout.verts,
            layout.polys,
            layout.links,
            layout.detail_meshes,
            layout.detail_verts,
            layout.detail_tris,
            layout.bv_tree,
            layout.off_mesh_cons,
        ];
        let mut expected = MESH_HEADER_SIZE;
        for s in sections {
            assert_eq!(s.offset, expected);
            assert_eq!(s.offset % 4, 0);
            expected = s.offset + s.size;
        }
        assert_eq!(layout.total, expected);
        assert_eq!(layout.links.size, 7 * LINK_SIZE);
        assert_eq!(layout.detail_tris.size, 3 * DETAIL_TRI_SIZE);
    }

    #[test]
    fn test_tile_data_round_trip() {
        let data = quad_tile_data();
        let tile = TileData::from_bytes(&data).unwrap();
        assert_eq!(tile.header.poly_count, 1);
        assert_eq!(tile.to_bytes().unwrap(), data);
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let mut data = quad_tile_data();
        data[0] ^= 0xff;
        assert!(matches!(
            TileData::from_bytes(&data),
            Err(FormatError::WrongMagic(_))
        ));

        let mut data = quad_tile_data();
        data[4..8].copy_from_slice(&(DT_NAVMESH_VERSION + 1).to_ne_bytes());
        let err = TileData::from_bytes(&data).unwrap_err();
        assert!(matches!(err, FormatError::WrongVersion(_)));
        let status: DtStatus = err.into();
        assert!(status.has_detail(DtStatus::DT_WRONG_VERSION));
    }

    #[test]
    fn test_rejects_truncated_data() {
        let data = quad_tile_data();
        assert!(matches!(
            TileData::from_bytes(&data[..data.len() - 4]),
            Err(FormatError::Truncated { .. })
        ));
        assert!(matches!(
            MeshHeader::parse(&data[..10]),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_endian_swap_round_trip() {
        let original = off_mesh_strip_tile_data();
        let mut data = original.clone();

        // Native to foreign: payload first, header last.
        navmesh_data_swap_endian(&mut data).unwrap();
        navmesh_header_swap_endian(&mut data).unwrap();
        assert_ne!(data, original);
        assert!(MeshHeader::parse(&data).is_err());

        // Foreign to native: header first, payload after.
        navmesh_header_swap_endian(&mut data).unwrap();
        navmesh_data_swap_endian(&mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_data_swap_needs_native_header() {
        let mut data = quad_tile_data();
        navmesh_header_swap_endian(&mut data).unwrap();
        assert!(navmesh_data_swap_endian(&mut data).is_err());
    }

    #[test]
    fn test_swap_leaves_byte_fields_alone() {
        let original = quad_tile_data();
        let header = MeshHeader::parse(&original).unwrap();
        let layout = TileLayout::new(&header);
        let mut data = original.clone();
        navmesh_data_swap_endian(&mut data).unwrap();

        let tris = layout.detail_tris.offset..layout.detail_tris.offset + layout.detail_tris.size;
        assert_eq!(data[tris.clone()], original[tris]);
        // vert_count and area_and_type of the first polygon
        let p = layout.polys.offset;
        assert_eq!(data[p + 30..p + 32], original[p + 30..p + 32]);
    }

    #[test]
    fn test_tile_state_round_trip() {
        let tile = TileData::from_bytes(&quad_tile_data()).unwrap();
        let r = PolyRef::new(0x40001);
        let blob = encode_tile_state(r, &tile.polys).unwrap();
        let states = decode_tile_state(&blob, r, tile.polys.len()).unwrap();
        assert_eq!(states.len(), tile.polys.len());
        assert_eq!(states[0], (tile.polys[0].flags, tile.polys[0].area()));

        assert!(matches!(
            decode_tile_state(&blob, PolyRef::new(7), tile.polys.len()),
            Err(FormatError::StateMismatch)
        ));
    }
}
