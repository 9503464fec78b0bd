//! Navigation mesh tile store
//!
//! Tiles live in a fixed pool allocated up front. A free-index stack hands
//! out slots and a hash keyed on the tile grid coordinate finds them again.
//! Polygon references pack `(salt, tile index, poly index)`; the salt of a
//! slot is bumped every time a tile is removed so stale references are
//! rejected instead of silently resolving to the new occupant.

use crate::binary_format::{self, FormatError, MeshHeader, TileData};
use crate::detour_common::{
    dt_clamp, dt_closest_height_point_triangle, dt_distance_pt_seg_sqr2d, dt_ilog2, dt_next_pow2,
    dt_opposite_tile, dt_overlap_bounds, dt_overlap_quant_bounds, dt_point_in_polygon, dt_sqr,
    dt_vlen_sqr, dt_vlerp, dt_vmax, dt_vmin, dt_vsub,
};
use crate::{
    DtStatus, PolyFlags, PolyRef, PolyType, Result, TileRef, DT_DETAIL_EDGE_BOUNDARY, DT_EXT_LINK,
    DT_NULL_LINK, DT_OFFMESH_CON_BIDIR, DT_TILE_FREE_DATA, DT_VERTS_PER_POLYGON,
};

/// Maximum number of polygons gathered per tile when linking off-mesh
/// connections to the ground surface
const MAX_NEAREST_CANDIDATES: usize = 128;

/// Maximum number of tiles sharing one grid cell that are linked together
const MAX_NEIS: usize = 32;

/// Maximum number of polygons a border edge may connect to
const MAX_CONNECTING_POLYS: usize = 4;

/// Configuration of a tiled navigation mesh
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NavMeshParams {
    /// World space origin of the tile grid
    pub origin: [f32; 3],
    /// Width of a tile along the x-axis
    pub tile_width: f32,
    /// Depth of a tile along the z-axis
    pub tile_height: f32,
    /// Maximum number of tiles the mesh can hold
    pub max_tiles: i32,
    /// Maximum number of polygons a single tile can hold
    pub max_polys_per_tile: i32,
}

impl Default for NavMeshParams {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            tile_width: 32.0,
            tile_height: 32.0,
            max_tiles: 128,
            max_polys_per_tile: 1024,
        }
    }
}

impl NavMeshParams {
    pub fn with_origin(mut self, origin: [f32; 3]) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_tile_size(mut self, width: f32, height: f32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    pub fn with_max_tiles(mut self, max_tiles: i32) -> Self {
        self.max_tiles = max_tiles;
        self
    }

    pub fn with_max_polys_per_tile(mut self, max_polys: i32) -> Self {
        self.max_polys_per_tile = max_polys;
        self
    }

    /// Checks that every size is positive
    pub fn validate(&self) -> Result<()> {
        if !(self.tile_width > 0.0 && self.tile_height > 0.0)
            || self.max_tiles <= 0
            || self.max_polys_per_tile <= 0
            || !self.origin.iter().all(|v| v.is_finite())
        {
            return Err(DtStatus::invalid_param());
        }
        Ok(())
    }

    #[cfg(feature = "serialization")]
    pub fn from_json_str(json: &str) -> std::result::Result<Self, FormatError> {
        Ok(serde_json::from_str(json)?)
    }

    #[cfg(feature = "serialization")]
    pub fn to_json_string(&self) -> std::result::Result<String, FormatError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads parameters from a JSON file
    #[cfg(feature = "serialization")]
    pub fn load_json<P: AsRef<std::path::Path>>(path: P) -> std::result::Result<Self, FormatError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Saves parameters to a JSON file
    #[cfg(feature = "serialization")]
    pub fn save_json<P: AsRef<std::path::Path>>(&self, path: P) -> std::result::Result<(), FormatError> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

/// Link between two polygons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Link {
    /// Neighbour reference
    pub reference: PolyRef,
    /// Index of the next link of the same polygon, or [`DT_NULL_LINK`]
    pub next: u32,
    /// Edge of the owning polygon the link leaves through
    pub edge: u8,
    /// Tile border side for cross-tile links, 0xff otherwise
    pub side: u8,
    /// Start of the usable portal sub-range, 0..255
    pub bmin: u8,
    /// End of the usable portal sub-range, 0..255
    pub bmax: u8,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            reference: PolyRef::NULL,
            next: DT_NULL_LINK,
            edge: 0,
            side: 0,
            bmin: 0,
            bmax: 0,
        }
    }
}

/// Navigation polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Poly {
    /// Head of the polygon's link list
    pub first_link: u32,
    /// Vertex indices into the tile's vertex array
    pub verts: [u16; DT_VERTS_PER_POLYGON],
    /// Per-edge neighbour code: 0 for a wall, `index + 1` for an internal
    /// neighbour, or [`DT_EXT_LINK`] | side for a tile border portal
    pub neis: [u16; DT_VERTS_PER_POLYGON],
    pub flags: PolyFlags,
    pub vert_count: u8,
    /// Area id in the low 6 bits, [`PolyType`] in the high 2 bits
    pub area_and_type: u8,
}

impl Default for Poly {
    fn default() -> Self {
        Self {
            first_link: DT_NULL_LINK,
            verts: [0; DT_VERTS_PER_POLYGON],
            neis: [0; DT_VERTS_PER_POLYGON],
            flags: PolyFlags::empty(),
            vert_count: 0,
            area_and_type: 0,
        }
    }
}

impl Poly {
    #[inline]
    pub fn area(&self) -> u8 {
        self.area_and_type & 0x3f
    }

    #[inline]
    pub fn set_area(&mut self, area: u8) {
        self.area_and_type = (self.area_and_type & 0xc0) | (area & 0x3f);
    }

    #[inline]
    pub fn poly_type(&self) -> PolyType {
        if self.area_and_type >> 6 == PolyType::OffMeshConnection as u8 {
            PolyType::OffMeshConnection
        } else {
            PolyType::Ground
        }
    }

    #[inline]
    pub fn set_type(&mut self, poly_type: PolyType) {
        self.area_and_type = (self.area_and_type & 0x3f) | ((poly_type as u8) << 6);
    }

    #[inline]
    pub fn is_off_mesh_connection(&self) -> bool {
        self.poly_type() == PolyType::OffMeshConnection
    }
}

/// Detail sub-mesh of a polygon
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyDetail {
    /// First unique detail vertex
    pub vert_base: u32,
    /// First detail triangle
    pub tri_base: u32,
    pub vert_count: u8,
    pub tri_count: u8,
}

/// BV-tree node with quantized bounds. Leaves have `i >= 0` (the polygon
/// index); internal nodes store the negated escape offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct BVNode {
    pub bmin: [u16; 3],
    pub bmax: [u16; 3],
    pub i: i32,
}

/// Off-mesh connection record
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct OffMeshConnection {
    /// Start and end positions
    pub pos: [f32; 6],
    /// Snap radius of the endpoints
    pub rad: f32,
    /// Index of the connection's pseudo polygon in the tile
    pub poly: u16,
    /// [`DT_OFFMESH_CON_BIDIR`] or zero
    pub flags: u8,
    /// Tile side the end point lies beyond, 0xff when inside the tile
    pub side: u8,
    pub user_id: u32,
}

impl OffMeshConnection {
    pub fn start_pos(&self) -> [f32; 3] {
        [self.pos[0], self.pos[1], self.pos[2]]
    }

    pub fn end_pos(&self) -> [f32; 3] {
        [self.pos[3], self.pos[4], self.pos[5]]
    }

    pub fn is_bidirectional(&self) -> bool {
        self.flags & DT_OFFMESH_CON_BIDIR != 0
    }
}

/// A tile slot of the navigation mesh
#[derive(Debug, Clone, Default)]
pub struct MeshTile {
    /// Generation counter of this slot
    pub salt: u32,
    /// Head of the free-link list
    pub links_free_list: u32,
    /// Header of the loaded tile, `None` while the slot is empty
    pub header: Option<MeshHeader>,
    pub polys: Vec<Poly>,
    pub verts: Vec<[f32; 3]>,
    pub links: Vec<Link>,
    pub detail_meshes: Vec<PolyDetail>,
    pub detail_verts: Vec<[f32; 3]>,
    pub detail_tris: Vec<[u8; 4]>,
    pub bv_tree: Vec<BVNode>,
    pub off_mesh_cons: Vec<OffMeshConnection>,
    /// The tile blob the slot was loaded from
    pub data: Vec<u8>,
    /// Tile flags, see [`DT_TILE_FREE_DATA`]
    pub flags: i32,
    /// Next tile in the same grid hash bucket
    pub(crate) next: Option<usize>,
}

impl MeshTile {
    /// Iterates the links of `poly` in list order
    pub fn poly_links<'a>(&'a self, poly: &Poly) -> PolyLinks<'a> {
        PolyLinks {
            links: &self.links,
            cur: poly.first_link,
        }
    }

    /// Copies the world space vertices of `poly` into a fixed array
    pub fn poly_verts(&self, poly: &Poly) -> ([[f32; 3]; DT_VERTS_PER_POLYGON], usize) {
        let mut verts = [[0.0; 3]; DT_VERTS_PER_POLYGON];
        let n = poly.vert_count as usize;
        for (j, v) in verts.iter_mut().enumerate().take(n) {
            *v = self.verts[poly.verts[j] as usize];
        }
        (verts, n)
    }

    /// Vertex `k` of detail triangle `t` of polygon `poly`
    fn detail_tri_vert(&self, poly: &Poly, pd: &PolyDetail, t: u8) -> [f32; 3] {
        if t < poly.vert_count {
            self.verts[poly.verts[t as usize] as usize]
        } else {
            self.detail_verts[pd.vert_base as usize + (t - poly.vert_count) as usize]
        }
    }

    fn alloc_link(&mut self) -> Option<u32> {
        if self.links_free_list == DT_NULL_LINK {
            return None;
        }
        let link = self.links_free_list;
        self.links_free_list = self.links[link as usize].next;
        Some(link)
    }

    fn free_link(&mut self, link: u32) {
        self.links[link as usize].next = self.links_free_list;
        self.links_free_list = link;
    }

    /// Prepends a link to the list of polygon `poly`
    fn push_link(&mut self, poly: usize, mut link: Link) -> bool {
        let Some(idx) = self.alloc_link() else {
            return false;
        };
        link.next = self.polys[poly].first_link;
        self.links[idx as usize] = link;
        self.polys[poly].first_link = idx;
        true
    }
}

/// Iterator over the links of one polygon
pub struct PolyLinks<'a> {
    links: &'a [Link],
    cur: u32,
}

impl<'a> Iterator for PolyLinks<'a> {
    type Item = &'a Link;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == DT_NULL_LINK {
            return None;
        }
        let link = self.links.get(self.cur as usize)?;
        self.cur = link.next;
        Some(link)
    }
}

#[inline]
fn compute_tile_hash(x: i32, y: i32, mask: usize) -> usize {
    const H1: u32 = 0x8da6_b343;
    const H2: u32 = 0xd816_3841;
    let n = H1.wrapping_mul(x as u32).wrapping_add(H2.wrapping_mul(y as u32));
    n as usize & mask
}

fn neighbour_offset(side: u8) -> (i32, i32) {
    match side {
        0 => (1, 0),
        1 => (1, 1),
        2 => (0, 1),
        3 => (-1, 1),
        4 => (-1, 0),
        5 => (-1, -1),
        6 => (0, -1),
        _ => (1, -1),
    }
}

fn get_slab_coord(va: &[f32; 3], side: u8) -> f32 {
    match side {
        0 | 4 => va[0],
        2 | 6 => va[2],
        _ => 0.0,
    }
}

fn calc_slab_end_points(va: &[f32; 3], vb: &[f32; 3], side: u8) -> ([f32; 2], [f32; 2]) {
    match side {
        0 | 4 => {
            if va[2] < vb[2] {
                ([va[2], va[1]], [vb[2], vb[1]])
            } else {
                ([vb[2], vb[1]], [va[2], va[1]])
            }
        }
        2 | 6 => {
            if va[0] < vb[0] {
                ([va[0], va[1]], [vb[0], vb[1]])
            } else {
                ([vb[0], vb[1]], [va[0], va[1]])
            }
        }
        _ => ([0.0; 2], [0.0; 2]),
    }
}

/// Checks whether two border edge slabs overlap horizontally by more than
/// `px` and lie within `py` of each other vertically
fn overlap_slabs(amin: &[f32; 2], amax: &[f32; 2], bmin: &[f32; 2], bmax: &[f32; 2], px: f32, py: f32) -> bool {
    let minx = (amin[0] + px).max(bmin[0] + px);
    let maxx = (amax[0] - px).min(bmax[0] - px);
    if minx > maxx {
        return false;
    }

    let ad = (amax[1] - amin[1]) / (amax[0] - amin[0]);
    let ak = amin[1] - ad * amin[0];
    let bd = (bmax[1] - bmin[1]) / (bmax[0] - bmin[0]);
    let bk = bmin[1] - bd * bmin[0];
    let aminy = ad * minx + ak;
    let amaxy = ad * maxx + ak;
    let bminy = bd * minx + bk;
    let bmaxy = bd * maxx + bk;
    let dmin = bminy - aminy;
    let dmax = bmaxy - amaxy;

    if dmin * dmax < 0.0 {
        return true;
    }

    let thr = dt_sqr(py * 2.0);
    dmin * dmin <= thr || dmax * dmax <= thr
}

/// A tiled navigation mesh
#[derive(Debug)]
pub struct NavMesh {
    params: NavMeshParams,
    tile_lut_mask: usize,
    pos_lookup: Vec<Option<usize>>,
    free_tiles: Vec<usize>,
    tiles: Vec<MeshTile>,
    salt_bits: u32,
    tile_bits: u32,
    poly_bits: u32,
}

impl NavMesh {
    /// Creates an empty mesh sized by `params`.
    ///
    /// Fails with `InvalidParam` when the tile and polygon counts leave fewer
    /// than 10 bits for the salt.
    pub fn new(params: NavMeshParams) -> Result<Self> {
        params.validate()?;

        let max_tiles = params.max_tiles as usize;
        let tile_lut_size = dt_next_pow2(params.max_tiles as u32 / 4).max(1) as usize;

        let tile_bits = dt_ilog2(dt_next_pow2(params.max_tiles as u32));
        let poly_bits = dt_ilog2(dt_next_pow2(params.max_polys_per_tile as u32));
        let salt_bits = 31u32.min(32u32.saturating_sub(tile_bits + poly_bits));
        if salt_bits < 10 {
            log::warn!(
                "nav mesh rejected: {} tile bits and {} poly bits leave {} salt bits",
                tile_bits,
                poly_bits,
                salt_bits
            );
            return Err(DtStatus::invalid_param());
        }

        let tiles = (0..max_tiles)
            .map(|_| MeshTile {
                salt: 1,
                links_free_list: DT_NULL_LINK,
                ..Default::default()
            })
            .collect();

        Ok(Self {
            params,
            tile_lut_mask: tile_lut_size - 1,
            pos_lookup: vec![None; tile_lut_size],
            // Popped from the back, so slot 0 is handed out first.
            free_tiles: (0..max_tiles).rev().collect(),
            tiles,
            salt_bits,
            tile_bits,
            poly_bits,
        })
    }

    /// Creates a mesh holding exactly one tile
    pub fn init_single_tile(data: Vec<u8>, flags: i32) -> Result<Self> {
        let header = MeshHeader::parse(&data)?;
        let params = NavMeshParams {
            origin: header.bmin,
            tile_width: header.bmax[0] - header.bmin[0],
            tile_height: header.bmax[2] - header.bmin[2],
            max_tiles: 1,
            max_polys_per_tile: header.poly_count,
        };
        let mut mesh = Self::new(params)?;
        mesh.add_tile(data, flags, TileRef::NULL)?;
        Ok(mesh)
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn get_max_tiles(&self) -> usize {
        self.tiles.len()
    }

    pub fn salt_bits(&self) -> u32 {
        self.salt_bits
    }

    pub fn tile_bits(&self) -> u32 {
        self.tile_bits
    }

    pub fn poly_bits(&self) -> u32 {
        self.poly_bits
    }

    /// Packs a polygon reference
    #[inline]
    pub fn encode_poly_id(&self, salt: u32, it: u32, ip: u32) -> PolyRef {
        PolyRef::new(
            (salt << (self.poly_bits + self.tile_bits)) | (it << self.poly_bits) | ip,
        )
    }

    /// Unpacks a polygon reference into `(salt, tile index, poly index)`
    #[inline]
    pub fn decode_poly_id(&self, r: PolyRef) -> (u32, u32, u32) {
        (
            self.decode_poly_id_salt(r),
            self.decode_poly_id_tile(r),
            self.decode_poly_id_poly(r),
        )
    }

    #[inline]
    pub fn decode_poly_id_salt(&self, r: PolyRef) -> u32 {
        let salt_mask = (1u32 << self.salt_bits) - 1;
        (r.id() >> (self.poly_bits + self.tile_bits)) & salt_mask
    }

    #[inline]
    pub fn decode_poly_id_tile(&self, r: PolyRef) -> u32 {
        let tile_mask = (1u32 << self.tile_bits) - 1;
        (r.id() >> self.poly_bits) & tile_mask
    }

    #[inline]
    pub fn decode_poly_id_poly(&self, r: PolyRef) -> u32 {
        let poly_mask = (1u32 << self.poly_bits) - 1;
        r.id() & poly_mask
    }

    /// Adds a tile blob to the mesh and links it to its loaded neighbours.
    ///
    /// A non-null `last_ref` restores the tile into the slot and salt it had
    /// before, so references handed out earlier become valid again.
    pub fn add_tile(&mut self, data: Vec<u8>, flags: i32, last_ref: TileRef) -> Result<TileRef> {
        let tile_data = match TileData::from_bytes(&data) {
            Ok(t) => t,
            Err(err) => {
                log::warn!("rejected tile data: {}", err);
                return Err(err.into());
            }
        };
        let header = tile_data.header;

        if (1u64 << self.poly_bits) < header.poly_count.max(0) as u64 {
            log::warn!(
                "tile ({}, {}) has {} polygons, more than the mesh allows",
                header.x,
                header.y,
                header.poly_count
            );
            return Err(DtStatus::invalid_param());
        }

        if self.tile_index_at(header.x, header.y, header.layer).is_some() {
            log::warn!(
                "tile ({}, {}, {}) is already occupied",
                header.x,
                header.y,
                header.layer
            );
            return Err(DtStatus::failure_detail(DtStatus::DT_ALREADY_OCCUPIED));
        }

        let idx = if last_ref.is_null() {
            self.free_tiles
                .pop()
                .ok_or(DtStatus::failure_detail(DtStatus::DT_OUT_OF_MEMORY))?
        } else {
            let wanted = self.decode_poly_id_tile(last_ref) as usize;
            let pos = self
                .free_tiles
                .iter()
                .position(|&i| i == wanted)
                .ok_or(DtStatus::failure_detail(DtStatus::DT_OUT_OF_MEMORY))?;
            self.free_tiles.remove(pos);
            self.tiles[wanted].salt = self.decode_poly_id_salt(last_ref);
            wanted
        };

        let bucket = compute_tile_hash(header.x, header.y, self.tile_lut_mask);
        {
            let tile = &mut self.tiles[idx];
            let max_links = header.max_link_count.max(0) as usize;

            tile.links = (0..max_links)
                .map(|i| Link {
                    next: if i + 1 < max_links { i as u32 + 1 } else { DT_NULL_LINK },
                    ..Default::default()
                })
                .collect();
            tile.links_free_list = if max_links > 0 { 0 } else { DT_NULL_LINK };

            tile.header = Some(header);
            tile.polys = tile_data.polys;
            tile.verts = tile_data.verts;
            tile.detail_meshes = tile_data.detail_meshes;
            tile.detail_verts = tile_data.detail_verts;
            tile.detail_tris = tile_data.detail_tris;
            tile.bv_tree = tile_data.bv_tree;
            tile.off_mesh_cons = tile_data.off_mesh_cons;
            tile.data = data;
            tile.flags = flags;

            tile.next = self.pos_lookup[bucket];
        }
        self.pos_lookup[bucket] = Some(idx);

        self.connect_int_links(idx);
        self.base_off_mesh_links(idx);
        self.connect_ext_off_mesh_links(idx, idx, None);

        // Other layers in the same cell.
        for j in self.tile_indices_at(header.x, header.y) {
            if j == idx {
                continue;
            }
            self.connect_ext_links(idx, j, None);
            self.connect_ext_links(j, idx, None);
            self.connect_ext_off_mesh_links(idx, j, None);
            self.connect_ext_off_mesh_links(j, idx, None);
        }

        for side in 0..8u8 {
            let (dx, dy) = neighbour_offset(side);
            for j in self.tile_indices_at(header.x + dx, header.y + dy) {
                self.connect_ext_links(idx, j, Some(side));
                self.connect_ext_links(j, idx, Some(dt_opposite_tile(side)));
                self.connect_ext_off_mesh_links(idx, j, Some(side));
                self.connect_ext_off_mesh_links(j, idx, Some(dt_opposite_tile(side)));
            }
        }

        let tile_ref = self.tile_ref_of(idx);
        log::debug!(
            "added tile ({}, {}, {}) as {:#x} with {} polys",
            header.x,
            header.y,
            header.layer,
            tile_ref.id(),
            header.poly_count
        );
        Ok(tile_ref)
    }

    /// Removes a tile, unlinking it from its neighbours.
    ///
    /// Returns the tile blob when the tile was added without
    /// [`DT_TILE_FREE_DATA`]; otherwise the blob is dropped.
    pub fn remove_tile(&mut self, tile_ref: TileRef) -> Result<Option<Vec<u8>>> {
        if tile_ref.is_null() {
            return Err(DtStatus::invalid_param());
        }
        let idx = self.decode_poly_id_tile(tile_ref) as usize;
        let salt = self.decode_poly_id_salt(tile_ref);
        if idx >= self.tiles.len() {
            return Err(DtStatus::invalid_param());
        }
        let header = match &self.tiles[idx].header {
            Some(h) if self.tiles[idx].salt == salt => *h,
            _ => return Err(DtStatus::invalid_param()),
        };

        // Unhook from the position lookup.
        let bucket = compute_tile_hash(header.x, header.y, self.tile_lut_mask);
        let mut prev: Option<usize> = None;
        let mut cur = self.pos_lookup[bucket];
        while let Some(c) = cur {
            if c == idx {
                let next = self.tiles[c].next;
                match prev {
                    Some(p) => self.tiles[p].next = next,
                    None => self.pos_lookup[bucket] = next,
                }
                break;
            }
            prev = cur;
            cur = self.tiles[c].next;
        }

        for j in self.tile_indices_at(header.x, header.y) {
            if j != idx {
                self.unconnect_links(j, idx);
            }
        }
        for side in 0..8u8 {
            let (dx, dy) = neighbour_offset(side);
            for j in self.tile_indices_at(header.x + dx, header.y + dy) {
                self.unconnect_links(j, idx);
            }
        }

        let salt_mask = (1u32 << self.salt_bits) - 1;
        let tile = &mut self.tiles[idx];
        let data = std::mem::take(&mut tile.data);
        let owned = tile.flags & DT_TILE_FREE_DATA != 0;

        let next_salt = match (tile.salt + 1) & salt_mask {
            0 => 1,
            s => s,
        };
        *tile = MeshTile {
            salt: next_salt,
            links_free_list: DT_NULL_LINK,
            ..Default::default()
        };
        self.free_tiles.push(idx);

        log::debug!(
            "removed tile ({}, {}, {}) {:#x}",
            header.x,
            header.y,
            header.layer,
            tile_ref.id()
        );
        Ok(if owned { None } else { Some(data) })
    }

    /// Grid cell containing `pos`
    pub fn calc_tile_loc(&self, pos: &[f32; 3]) -> (i32, i32) {
        let tx = ((pos[0] - self.params.origin[0]) / self.params.tile_width).floor() as i32;
        let ty = ((pos[2] - self.params.origin[2]) / self.params.tile_height).floor() as i32;
        (tx, ty)
    }

    pub(crate) fn tile_index_at(&self, x: i32, y: i32, layer: i32) -> Option<usize> {
        let bucket = compute_tile_hash(x, y, self.tile_lut_mask);
        let mut cur = self.pos_lookup[bucket];
        while let Some(i) = cur {
            let tile = &self.tiles[i];
            if let Some(h) = &tile.header {
                if h.x == x && h.y == y && h.layer == layer {
                    return Some(i);
                }
            }
            cur = tile.next;
        }
        None
    }

    pub(crate) fn tile_indices_at(&self, x: i32, y: i32) -> Vec<usize> {
        let mut out = Vec::new();
        let bucket = compute_tile_hash(x, y, self.tile_lut_mask);
        let mut cur = self.pos_lookup[bucket];
        while let Some(i) = cur {
            let tile = &self.tiles[i];
            if let Some(h) = &tile.header {
                if h.x == x && h.y == y && out.len() < MAX_NEIS {
                    out.push(i);
                }
            }
            cur = tile.next;
        }
        out
    }

    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.tile_index_at(x, y, layer).map(|i| &self.tiles[i])
    }

    /// All layers loaded at grid cell `(x, y)`
    pub fn get_tiles_at(&self, x: i32, y: i32) -> Vec<&MeshTile> {
        self.tile_indices_at(x, y)
            .into_iter()
            .map(|i| &self.tiles[i])
            .collect()
    }

    /// Reference of the tile at the given cell, or null
    pub fn get_tile_ref_at(&self, x: i32, y: i32, layer: i32) -> TileRef {
        self.tile_index_at(x, y, layer)
            .map_or(TileRef::NULL, |i| self.tile_ref_of(i))
    }

    pub(crate) fn tile_ref_of(&self, idx: usize) -> TileRef {
        self.encode_poly_id(self.tiles[idx].salt, idx as u32, 0)
    }

    /// Slot index of a tile borrowed from this mesh
    pub(crate) fn tile_index(&self, tile: &MeshTile) -> Option<usize> {
        self.tiles.iter().position(|t| std::ptr::eq(t, tile))
    }

    /// Reference of a loaded tile, or null for an empty slot or a tile from
    /// another mesh
    pub fn get_tile_ref(&self, tile: &MeshTile) -> TileRef {
        match self.tile_index(tile) {
            Some(i) if tile.header.is_some() => self.tile_ref_of(i),
            _ => TileRef::NULL,
        }
    }

    pub fn get_tile_by_ref(&self, tile_ref: TileRef) -> Option<&MeshTile> {
        if tile_ref.is_null() {
            return None;
        }
        let idx = self.decode_poly_id_tile(tile_ref) as usize;
        let tile = self.tiles.get(idx)?;
        if tile.salt != self.decode_poly_id_salt(tile_ref) || tile.header.is_none() {
            return None;
        }
        Some(tile)
    }

    /// Tile slot `i`, loaded or not
    pub fn get_tile(&self, i: usize) -> Option<&MeshTile> {
        self.tiles.get(i)
    }

    /// Number of loaded tiles
    pub fn tile_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.header.is_some()).count()
    }

    /// Base reference for polygons of `tile`; OR a polygon index into it
    pub fn get_poly_ref_base(&self, tile: &MeshTile) -> PolyRef {
        match self.tile_index(tile) {
            Some(i) => self.poly_ref_base_of(i),
            None => PolyRef::NULL,
        }
    }

    #[inline]
    pub(crate) fn poly_ref_base_of(&self, idx: usize) -> PolyRef {
        self.encode_poly_id(self.tiles[idx].salt, idx as u32, 0)
    }

    /// Resolves a reference, checking salt and bounds
    pub fn get_tile_and_poly_by_ref(&self, r: PolyRef) -> Result<(&MeshTile, &Poly)> {
        let (it, ip) = self.checked_indices(r)?;
        let tile = &self.tiles[it];
        Ok((tile, &tile.polys[ip]))
    }

    /// Resolves a reference known to be valid, such as one read from a link.
    /// Panics on a reference that points outside the pool.
    pub fn get_tile_and_poly_by_ref_unchecked(&self, r: PolyRef) -> (&MeshTile, &Poly) {
        let tile = &self.tiles[self.decode_poly_id_tile(r) as usize];
        (tile, &tile.polys[self.decode_poly_id_poly(r) as usize])
    }

    pub(crate) fn checked_indices(&self, r: PolyRef) -> Result<(usize, usize)> {
        if r.is_null() {
            return Err(DtStatus::invalid_param());
        }
        let (salt, it, ip) = self.decode_poly_id(r);
        let tile = self
            .tiles
            .get(it as usize)
            .ok_or(DtStatus::invalid_param())?;
        match &tile.header {
            Some(h) if tile.salt == salt && (ip as i32) < h.poly_count => {
                Ok((it as usize, ip as usize))
            }
            _ => Err(DtStatus::invalid_param()),
        }
    }

    pub fn is_valid_poly_ref(&self, r: PolyRef) -> bool {
        self.checked_indices(r).is_ok()
    }

    /// Endpoints of an off-mesh connection ordered for travel from `prev_ref`
    pub fn get_off_mesh_connection_poly_end_points(
        &self,
        prev_ref: PolyRef,
        poly_ref: PolyRef,
    ) -> Result<([f32; 3], [f32; 3])> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(poly_ref)?;
        if !poly.is_off_mesh_connection() {
            return Err(DtStatus::failure());
        }

        // The link with edge 0 points at the start polygon.
        let mut idx0 = 0;
        let mut idx1 = 1;
        if let Some(link) = tile.poly_links(poly).find(|l| l.edge == 0) {
            if link.reference != prev_ref {
                idx0 = 1;
                idx1 = 0;
            }
        }

        Ok((
            tile.verts[poly.verts[idx0] as usize],
            tile.verts[poly.verts[idx1] as usize],
        ))
    }

    pub fn get_off_mesh_connection_by_ref(&self, r: PolyRef) -> Result<&OffMeshConnection> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(r)?;
        if !poly.is_off_mesh_connection() {
            return Err(DtStatus::invalid_param());
        }
        let header = tile.header.as_ref().ok_or(DtStatus::invalid_param())?;
        let idx = self.decode_poly_id_poly(r) as i32 - header.off_mesh_base;
        if idx < 0 {
            return Err(DtStatus::invalid_param());
        }
        tile.off_mesh_cons
            .get(idx as usize)
            .ok_or(DtStatus::invalid_param())
    }

    pub fn set_poly_flags(&mut self, r: PolyRef, flags: PolyFlags) -> Result<()> {
        let (it, ip) = self.checked_indices(r)?;
        self.tiles[it].polys[ip].flags = flags;
        Ok(())
    }

    pub fn get_poly_flags(&self, r: PolyRef) -> Result<PolyFlags> {
        Ok(self.get_tile_and_poly_by_ref(r)?.1.flags)
    }

    pub fn set_poly_area(&mut self, r: PolyRef, area: u8) -> Result<()> {
        let (it, ip) = self.checked_indices(r)?;
        self.tiles[it].polys[ip].set_area(area);
        Ok(())
    }

    pub fn get_poly_area(&self, r: PolyRef) -> Result<u8> {
        Ok(self.get_tile_and_poly_by_ref(r)?.1.area())
    }

    /// Snapshots the per-polygon flags and areas of a tile
    pub fn store_tile_state(&self, tile_ref: TileRef) -> Result<Vec<u8>> {
        let tile = self
            .get_tile_by_ref(tile_ref)
            .ok_or(DtStatus::invalid_param())?;
        Ok(binary_format::encode_tile_state(tile_ref, &tile.polys)?)
    }

    /// Restores a snapshot taken by [`NavMesh::store_tile_state`] for the
    /// same tile reference
    pub fn restore_tile_state(&mut self, tile_ref: TileRef, data: &[u8]) -> Result<()> {
        let poly_count = self
            .get_tile_by_ref(tile_ref)
            .ok_or(DtStatus::invalid_param())?
            .polys
            .len();
        let states = binary_format::decode_tile_state(data, tile_ref, poly_count)
            .map_err(|e| match e {
                FormatError::StateMismatch => DtStatus::invalid_param(),
                other => other.into(),
            })?;

        let idx = self.decode_poly_id_tile(tile_ref) as usize;
        for (poly, (flags, area)) in self.tiles[idx].polys.iter_mut().zip(states) {
            poly.flags = flags;
            poly.set_area(area);
        }
        Ok(())
    }

    /// Closest point on a polygon to `pos` and whether `pos` lies over it
    pub fn closest_point_on_poly(&self, r: PolyRef, pos: &[f32; 3]) -> Result<([f32; 3], bool)> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(r)?;
        Ok(self.closest_point_on_poly_in_tile(tile, self.decode_poly_id_poly(r) as usize, poly, pos))
    }

    pub(crate) fn closest_point_on_poly_in_tile(
        &self,
        tile: &MeshTile,
        ip: usize,
        poly: &Poly,
        pos: &[f32; 3],
    ) -> ([f32; 3], bool) {
        if poly.is_off_mesh_connection() {
            let v0 = &tile.verts[poly.verts[0] as usize];
            let v1 = &tile.verts[poly.verts[1] as usize];
            let (_, t) = dt_distance_pt_seg_sqr2d(pos, v0, v1);
            return (dt_vlerp(v0, v1, t), false);
        }

        if let Some(h) = self.get_poly_height_in_tile(tile, ip, poly, pos) {
            return ([pos[0], h, pos[2]], true);
        }
        (self.closest_point_on_detail_edges(tile, ip, poly, pos, true), false)
    }

    /// Height of a ground polygon's detail surface under `pos`, or `None`
    /// when `pos` is outside the polygon in the xz-plane
    pub(crate) fn get_poly_height_in_tile(
        &self,
        tile: &MeshTile,
        ip: usize,
        poly: &Poly,
        pos: &[f32; 3],
    ) -> Option<f32> {
        if poly.is_off_mesh_connection() {
            return None;
        }

        let (verts, nv) = tile.poly_verts(poly);
        if !dt_point_in_polygon(pos, &verts[..nv]) {
            return None;
        }

        if let Some(pd) = tile.detail_meshes.get(ip) {
            for j in 0..pd.tri_count as usize {
                let t = tile.detail_tris[pd.tri_base as usize + j];
                let v = [
                    tile.detail_tri_vert(poly, pd, t[0]),
                    tile.detail_tri_vert(poly, pd, t[1]),
                    tile.detail_tri_vert(poly, pd, t[2]),
                ];
                if let Some(h) = dt_closest_height_point_triangle(pos, &v[0], &v[1], &v[2]) {
                    return Some(h);
                }
            }
        } else {
            for j in 2..nv {
                if let Some(h) =
                    dt_closest_height_point_triangle(pos, &verts[0], &verts[j - 1], &verts[j])
                {
                    return Some(h);
                }
            }
        }

        // The point sits on an edge of a degenerate or imprecise triangle.
        Some(self.closest_point_on_detail_edges(tile, ip, poly, pos, false)[1])
    }

    fn closest_point_on_detail_edges(
        &self,
        tile: &MeshTile,
        ip: usize,
        poly: &Poly,
        pos: &[f32; 3],
        only_boundary: bool,
    ) -> [f32; 3] {
        const ANY_BOUNDARY_EDGE: u8 =
            DT_DETAIL_EDGE_BOUNDARY | (DT_DETAIL_EDGE_BOUNDARY << 2) | (DT_DETAIL_EDGE_BOUNDARY << 4);

        let mut dmin = f32::MAX;
        let mut tmin = 0.0;
        let mut best: Option<([f32; 3], [f32; 3])> = None;

        let Some(pd) = tile.detail_meshes.get(ip) else {
            let (verts, nv) = tile.poly_verts(poly);
            let mut j = nv - 1;
            for i in 0..nv {
                let (d, t) = dt_distance_pt_seg_sqr2d(pos, &verts[j], &verts[i]);
                if d < dmin {
                    dmin = d;
                    tmin = t;
                    best = Some((verts[j], verts[i]));
                }
                j = i;
            }
            return best.map_or(*pos, |(a, b)| dt_vlerp(&a, &b, tmin));
        };

        for i in 0..pd.tri_count as usize {
            let tris = tile.detail_tris[pd.tri_base as usize + i];
            if only_boundary && (tris[3] & ANY_BOUNDARY_EDGE) == 0 {
                continue;
            }

            let v = [
                tile.detail_tri_vert(poly, pd, tris[0]),
                tile.detail_tri_vert(poly, pd, tris[1]),
                tile.detail_tri_vert(poly, pd, tris[2]),
            ];

            let mut j = 2;
            for k in 0..3 {
                let edge_flags = (tris[3] >> (j * 2)) & 0x3;
                if (edge_flags & DT_DETAIL_EDGE_BOUNDARY) == 0 && (only_boundary || tris[j] < tris[k]) {
                    // Interior edge, or one visited from the other triangle.
                    j = k;
                    continue;
                }

                let (d, t) = dt_distance_pt_seg_sqr2d(pos, &v[j], &v[k]);
                if d < dmin {
                    dmin = d;
                    tmin = t;
                    best = Some((v[j], v[k]));
                }
                j = k;
            }
        }

        best.map_or(*pos, |(a, b)| dt_vlerp(&a, &b, tmin))
    }

    /// Ground polygons of tile `idx` whose bounds overlap `qmin..qmax`
    pub(crate) fn query_polygons_in_tile(
        &self,
        idx: usize,
        qmin: &[f32; 3],
        qmax: &[f32; 3],
        max_polys: usize,
    ) -> Vec<PolyRef> {
        let tile = &self.tiles[idx];
        let Some(header) = &tile.header else {
            return Vec::new();
        };
        let base = self.poly_ref_base_of(idx);
        let mut out = Vec::new();

        if !tile.bv_tree.is_empty() {
            let (bmin, bmax) = quantize_query_bounds(header, qmin, qmax);
            let mut i = 0;
            while i < tile.bv_tree.len() {
                let node = &tile.bv_tree[i];
                let overlap = dt_overlap_quant_bounds(&bmin, &bmax, &node.bmin, &node.bmax);
                let is_leaf = node.i >= 0;

                if is_leaf && overlap && out.len() < max_polys {
                    out.push(PolyRef::new(base.id() | node.i as u32));
                }

                if overlap || is_leaf {
                    i += 1;
                } else {
                    i += (-node.i) as usize;
                }
            }
        } else {
            for (i, poly) in tile.polys.iter().enumerate() {
                if poly.is_off_mesh_connection() {
                    continue;
                }
                let (bmin, bmax) = poly_bounds(tile, poly);
                if dt_overlap_bounds(qmin, qmax, &bmin, &bmax) && out.len() < max_polys {
                    out.push(PolyRef::new(base.id() | i as u32));
                }
            }
        }
        out
    }

    /// Nearest ground polygon of tile `idx` to `center` within `half_extents`
    fn find_nearest_poly_in_tile(
        &self,
        idx: usize,
        center: &[f32; 3],
        half_extents: &[f32; 3],
    ) -> Option<(PolyRef, [f32; 3])> {
        let qmin = dt_vsub(center, half_extents);
        let qmax = crate::detour_common::dt_vadd(center, half_extents);
        let polys = self.query_polygons_in_tile(idx, &qmin, &qmax, MAX_NEAREST_CANDIDATES);

        let tile = &self.tiles[idx];
        let climb = tile.header.map_or(0.0, |h| h.walkable_climb);
        let mut nearest = None;
        let mut nearest_dist = f32::MAX;

        for r in polys {
            let ip = self.decode_poly_id_poly(r) as usize;
            let poly = &tile.polys[ip];
            let (closest, over) = self.closest_point_on_poly_in_tile(tile, ip, poly, center);

            // Directly above or below a polygon only counts the part of the
            // height difference beyond the climb height.
            let diff = dt_vsub(center, &closest);
            let d = if over {
                let dh = diff[1].abs() - climb;
                if dh > 0.0 {
                    dh * dh
                } else {
                    0.0
                }
            } else {
                dt_vlen_sqr(&diff)
            };

            if d < nearest_dist {
                nearest_dist = d;
                nearest = Some((r, closest));
            }
        }
        nearest
    }

    fn connect_int_links(&mut self, idx: usize) {
        let base = self.poly_ref_base_of(idx).id();
        let tile = &mut self.tiles[idx];

        for i in 0..tile.polys.len() {
            tile.polys[i].first_link = DT_NULL_LINK;
            if tile.polys[i].is_off_mesh_connection() {
                continue;
            }

            // Build in reverse so the list reads in edge order.
            let nv = tile.polys[i].vert_count as usize;
            for j in (0..nv).rev() {
                let nei = tile.polys[i].neis[j];
                if nei == 0 || nei & DT_EXT_LINK != 0 {
                    continue;
                }
                tile.push_link(
                    i,
                    Link {
                        reference: PolyRef::new(base | (nei as u32 - 1)),
                        edge: j as u8,
                        side: 0xff,
                        ..Default::default()
                    },
                );
            }
        }
    }

    fn base_off_mesh_links(&mut self, idx: usize) {
        let base = self.poly_ref_base_of(idx).id();
        let Some(header) = self.tiles[idx].header else {
            return;
        };

        for i in 0..self.tiles[idx].off_mesh_cons.len() {
            let con = self.tiles[idx].off_mesh_cons[i];
            let half_extents = [con.rad, header.walkable_climb, con.rad];
            let p = con.start_pos();

            let Some((r, nearest)) = self.find_nearest_poly_in_tile(idx, &p, &half_extents) else {
                continue;
            };
            if dt_sqr(nearest[0] - p[0]) + dt_sqr(nearest[2] - p[2]) > dt_sqr(con.rad) {
                continue;
            }

            let land_poly = self.decode_poly_id_poly(r) as usize;
            let tile = &mut self.tiles[idx];
            let con_poly = con.poly as usize;

            // Snap the start onto the surface.
            let v = tile.polys[con_poly].verts[0] as usize;
            tile.verts[v] = nearest;
            tile.off_mesh_cons[i].pos[..3].copy_from_slice(&nearest);

            tile.push_link(
                con_poly,
                Link {
                    reference: r,
                    edge: 0,
                    side: 0xff,
                    ..Default::default()
                },
            );
            tile.push_link(
                land_poly,
                Link {
                    reference: PolyRef::new(base | con.poly as u32),
                    edge: 0xff,
                    side: 0xff,
                    ..Default::default()
                },
            );
        }
    }

    /// Links off-mesh connections of `target` that land inside `idx`
    fn connect_ext_off_mesh_links(&mut self, idx: usize, target: usize, side: Option<u8>) {
        let opposite_side = side.map_or(0xff, dt_opposite_tile);
        let target_base = self.poly_ref_base_of(target).id();
        let Some(target_header) = self.tiles[target].header else {
            return;
        };

        for i in 0..self.tiles[target].off_mesh_cons.len() {
            let con = self.tiles[target].off_mesh_cons[i];
            if con.side != opposite_side {
                continue;
            }
            let con_poly = con.poly as usize;
            // Skip connections whose start could not be placed on the mesh.
            if self.tiles[target].polys[con_poly].first_link == DT_NULL_LINK {
                continue;
            }

            let half_extents = [con.rad, target_header.walkable_climb, con.rad];
            let p = con.end_pos();
            let Some((r, nearest)) = self.find_nearest_poly_in_tile(idx, &p, &half_extents) else {
                continue;
            };
            if dt_sqr(nearest[0] - p[0]) + dt_sqr(nearest[2] - p[2]) > dt_sqr(con.rad) {
                continue;
            }

            let land_poly = self.decode_poly_id_poly(r) as usize;
            {
                let target_tile = &mut self.tiles[target];
                let v = target_tile.polys[con_poly].verts[1] as usize;
                target_tile.verts[v] = nearest;
                target_tile.push_link(
                    con_poly,
                    Link {
                        reference: r,
                        edge: 1,
                        side: opposite_side,
                        ..Default::default()
                    },
                );
            }

            if con.is_bidirectional() {
                self.tiles[idx].push_link(
                    land_poly,
                    Link {
                        reference: PolyRef::new(target_base | con.poly as u32),
                        edge: 0xff,
                        side: side.unwrap_or(0xff),
                        ..Default::default()
                    },
                );
            }
        }
    }

    /// Polygons of tile `idx` with a portal on `side` overlapping edge
    /// `va..vb`, with the overlapped slab range of each
    fn find_connecting_polys(
        &self,
        va: &[f32; 3],
        vb: &[f32; 3],
        idx: usize,
        side: u8,
    ) -> Vec<(PolyRef, f32, f32)> {
        let tile = &self.tiles[idx];
        let Some(header) = &tile.header else {
            return Vec::new();
        };
        let (amin, amax) = calc_slab_end_points(va, vb, side);
        let apos = get_slab_coord(va, side);

        let m = DT_EXT_LINK | side as u16;
        let base = self.poly_ref_base_of(idx).id();
        let mut out = Vec::new();

        for (i, poly) in tile.polys.iter().enumerate() {
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if poly.neis[j] != m {
                    continue;
                }
                let vc = &tile.verts[poly.verts[j] as usize];
                let vd = &tile.verts[poly.verts[(j + 1) % nv] as usize];
                let bpos = get_slab_coord(vc, side);
                if (apos - bpos).abs() > 0.01 {
                    continue;
                }

                let (bmin, bmax) = calc_slab_end_points(vc, vd, side);
                if !overlap_slabs(&amin, &amax, &bmin, &bmax, 0.01, header.walkable_climb) {
                    continue;
                }

                if out.len() < MAX_CONNECTING_POLYS {
                    out.push((
                        PolyRef::new(base | i as u32),
                        amin[0].max(bmin[0]),
                        amax[0].min(bmax[0]),
                    ));
                }
                break;
            }
        }
        out
    }

    /// Links border portals of `idx` to polygons of `target`. `side` limits
    /// the work to one border; `None` tries them all.
    fn connect_ext_links(&mut self, idx: usize, target: usize, side: Option<u8>) {
        for i in 0..self.tiles[idx].polys.len() {
            let poly = self.tiles[idx].polys[i];
            let nv = poly.vert_count as usize;

            for j in 0..nv {
                if poly.neis[j] & DT_EXT_LINK == 0 {
                    continue;
                }
                let dir = (poly.neis[j] & 0xff) as u8;
                if side.is_some_and(|s| s != dir) {
                    continue;
                }

                let va = self.tiles[idx].verts[poly.verts[j] as usize];
                let vb = self.tiles[idx].verts[poly.verts[(j + 1) % nv] as usize];
                let neighbours = self.find_connecting_polys(&va, &vb, target, dt_opposite_tile(dir));

                for (r, nmin, nmax) in neighbours {
                    let (mut tmin, mut tmax) = match dir {
                        0 | 4 => ((nmin - va[2]) / (vb[2] - va[2]), (nmax - va[2]) / (vb[2] - va[2])),
                        _ => ((nmin - va[0]) / (vb[0] - va[0]), (nmax - va[0]) / (vb[0] - va[0])),
                    };
                    if tmin > tmax {
                        std::mem::swap(&mut tmin, &mut tmax);
                    }

                    let linked = self.tiles[idx].push_link(
                        i,
                        Link {
                            reference: r,
                            edge: j as u8,
                            side: dir,
                            bmin: (dt_clamp(tmin, 0.0, 1.0) * 255.0).round() as u8,
                            bmax: (dt_clamp(tmax, 0.0, 1.0) * 255.0).round() as u8,
                            ..Default::default()
                        },
                    );
                    if !linked {
                        break;
                    }
                }
            }
        }
    }

    /// Drops every link of tile `idx` that points into tile `target`
    fn unconnect_links(&mut self, idx: usize, target: usize) {
        let target_num = target as u32;
        let tile_bits = self.tile_bits;
        let poly_bits = self.poly_bits;
        let decode_tile = |r: PolyRef| (r.id() >> poly_bits) & ((1u32 << tile_bits) - 1);

        let tile = &mut self.tiles[idx];
        for i in 0..tile.polys.len() {
            let mut j = tile.polys[i].first_link;
            let mut pj = DT_NULL_LINK;
            while j != DT_NULL_LINK {
                let link = tile.links[j as usize];
                if decode_tile(link.reference) == target_num {
                    let nj = link.next;
                    if pj == DT_NULL_LINK {
                        tile.polys[i].first_link = nj;
                    } else {
                        tile.links[pj as usize].next = nj;
                    }
                    tile.free_link(j);
                    j = nj;
                } else {
                    pj = j;
                    j = link.next;
                }
            }
        }
    }
}

/// World space bounds of a polygon
pub(crate) fn poly_bounds(tile: &MeshTile, poly: &Poly) -> ([f32; 3], [f32; 3]) {
    let (verts, nv) = tile.poly_verts(poly);
    let mut bmin = verts[0];
    let mut bmax = verts[0];
    for v in &verts[1..nv] {
        bmin = dt_vmin(&bmin, v);
        bmax = dt_vmax(&bmax, v);
    }
    (bmin, bmax)
}

/// Quantizes a world space query box into a tile's BV-tree space
pub(crate) fn quantize_query_bounds(
    header: &MeshHeader,
    qmin: &[f32; 3],
    qmax: &[f32; 3],
) -> ([u16; 3], [u16; 3]) {
    let tbmin = &header.bmin;
    let tbmax = &header.bmax;
    let qfac = header.bv_quant_factor;

    let mut bmin = [0u16; 3];
    let mut bmax = [0u16; 3];
    for k in 0..3 {
        let lo = dt_clamp(qmin[k], tbmin[k], tbmax[k]) - tbmin[k];
        let hi = dt_clamp(qmax[k], tbmin[k], tbmax[k]) - tbmin[k];
        bmin[k] = ((qfac * lo) as u16) & 0xfffe;
        bmax[k] = ((qfac * hi + 1.0) as u16) | 1;
    }
    (bmin, bmax)
}
