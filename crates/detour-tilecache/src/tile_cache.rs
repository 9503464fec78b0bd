//! Compressed tile store and dynamic obstacle registry
//!
//! [`TileCache`] keeps one compressed layer per `(tx, ty, tlayer)` cell and a
//! bounded pool of obstacles. Adding or removing an obstacle only queues a
//! request. [`TileCache::update`] drains the requests into a deduplicated
//! rebuild queue and rebuilds one queued tile per call, so the cost of a
//! call stays bounded however many obstacles changed.

use std::collections::VecDeque;
use std::fmt;

use detour::detour_common::{dt_ilog2, dt_next_pow2, dt_overlap_bounds};
use detour::{DtStatus, NavMesh, Result};
use glam::Vec3;

use crate::compressor::TileCacheCompressor;
use crate::tile_cache_builder::{mark_box_area, mark_cylinder_area, mark_oriented_box_area};
use crate::tile_cache_data::{decompress_tile_cache_layer, LayerError, TileCacheLayerHeader};
use crate::tile_cache_integration::{
    apply_mesh_process, build_layer_poly_mesh, commit_nav_mesh_tile, nav_mesh_create_params,
    TileCacheMeshProcess,
};
use crate::TILECACHE_NULL_AREA;

/// Maximum number of queued obstacle requests
pub const MAX_TILECACHE_REQUESTS: usize = 64;

/// Maximum number of tiles waiting for a rebuild
pub const MAX_TILECACHE_UPDATES: usize = 64;

/// Maximum number of tiles a single obstacle can touch
pub const MAX_TOUCHED_TILES: usize = 8;

/// The cache owns a tile's data and drops it on removal
pub const DT_COMPRESSEDTILE_FREE_DATA: i32 = 0x01;

/// Generational handle to a compressed tile
pub type CompressedTileRef = u32;

/// Generational handle to an obstacle, `salt << 16 | index`
pub type ObstacleRef = u32;

/// Configuration of a tile cache
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileCacheParams {
    /// World space origin of the tile grid
    pub orig: [f32; 3],
    /// Cell size of the layer grids
    pub cs: f32,
    /// Cell height of the layer grids
    pub ch: f32,
    /// Tile width in cells
    pub width: i32,
    /// Tile depth in cells
    pub height: i32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    /// Maximum contour deviation in cells
    pub max_simplification_error: f32,
    pub max_tiles: i32,
    pub max_obstacles: i32,
}

impl Default for TileCacheParams {
    fn default() -> Self {
        Self {
            orig: [0.0; 3],
            cs: 0.3,
            ch: 0.2,
            width: 48,
            height: 48,
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
            max_simplification_error: 1.3,
            max_tiles: 128,
            max_obstacles: 128,
        }
    }
}

impl TileCacheParams {
    pub fn with_origin(mut self, orig: [f32; 3]) -> Self {
        self.orig = orig;
        self
    }

    pub fn with_cell_size(mut self, cs: f32, ch: f32) -> Self {
        self.cs = cs;
        self.ch = ch;
        self
    }

    pub fn with_tile_size(mut self, width: i32, height: i32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_agent(mut self, height: f32, radius: f32, climb: f32) -> Self {
        self.walkable_height = height;
        self.walkable_radius = radius;
        self.walkable_climb = climb;
        self
    }

    pub fn with_max_simplification_error(mut self, max_error: f32) -> Self {
        self.max_simplification_error = max_error;
        self
    }

    pub fn with_max_tiles(mut self, max_tiles: i32) -> Self {
        self.max_tiles = max_tiles;
        self
    }

    pub fn with_max_obstacles(mut self, max_obstacles: i32) -> Self {
        self.max_obstacles = max_obstacles;
        self
    }

    /// Checks sizes against what the layer format and handles can encode
    pub fn validate(&self) -> Result<()> {
        if !(self.cs > 0.0 && self.ch > 0.0)
            || !(1..=255).contains(&self.width)
            || !(1..=255).contains(&self.height)
            || self.max_tiles <= 0
            || !(1..=0xffff).contains(&self.max_obstacles)
            || !self.orig.iter().all(|v| v.is_finite())
        {
            return Err(DtStatus::invalid_param());
        }
        Ok(())
    }

    #[cfg(feature = "serialization")]
    pub fn from_json_str(json: &str) -> std::result::Result<Self, LayerError> {
        Ok(serde_json::from_str(json)?)
    }

    #[cfg(feature = "serialization")]
    pub fn to_json_string(&self) -> std::result::Result<String, LayerError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads parameters from a JSON file
    #[cfg(feature = "serialization")]
    pub fn load_json<P: AsRef<std::path::Path>>(path: P) -> std::result::Result<Self, LayerError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Saves parameters to a JSON file
    #[cfg(feature = "serialization")]
    pub fn save_json<P: AsRef<std::path::Path>>(&self, path: P) -> std::result::Result<(), LayerError> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

/// One slot of the compressed tile pool
#[derive(Debug, Clone, Default)]
pub struct CompressedTile {
    /// Generation counter of this slot
    pub salt: u32,
    /// Header of the stored layer, `None` while the slot is empty
    pub header: Option<TileCacheLayerHeader>,
    /// The layer blob, header included
    pub data: Vec<u8>,
    /// See [`DT_COMPRESSEDTILE_FREE_DATA`]
    pub flags: i32,
    next: Option<usize>,
}

/// Shape of an obstacle
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ObstacleData {
    /// Upright cylinder standing on `pos`
    Cylinder { pos: [f32; 3], radius: f32, height: f32 },
    /// Axis-aligned box
    Box { bmin: [f32; 3], bmax: [f32; 3] },
    /// Box rotated about the y-axis. `rot_aux` is
    /// `[cos(a/2) * sin(-a/2), cos(a/2)^2 - 0.5]` for rotation angle `a`.
    OrientedBox {
        center: [f32; 3],
        half_extents: [f32; 3],
        rot_aux: [f32; 2],
    },
}

impl ObstacleData {
    /// Oriented box rotated by `y_radians` about the y-axis
    pub fn oriented_box(center: [f32; 3], half_extents: [f32; 3], y_radians: f32) -> Self {
        let (s, c) = (0.5 * y_radians).sin_cos();
        Self::OrientedBox {
            center,
            half_extents,
            rot_aux: [c * -s, c * c - 0.5],
        }
    }

    /// World space bounds
    pub fn bounds(&self) -> ([f32; 3], [f32; 3]) {
        let (lo, hi) = match *self {
            Self::Cylinder { pos, radius, height } => {
                let pos = Vec3::from_array(pos);
                (
                    pos - Vec3::new(radius, 0.0, radius),
                    pos + Vec3::new(radius, height, radius),
                )
            }
            Self::Box { bmin, bmax } => (Vec3::from_array(bmin), Vec3::from_array(bmax)),
            Self::OrientedBox { center, half_extents, .. } => {
                let maxr = 1.41 * half_extents[0].max(half_extents[2]);
                let extent = Vec3::new(maxr, half_extents[1], maxr);
                let center = Vec3::from_array(center);
                (center - extent, center + extent)
            }
        };
        (lo.to_array(), hi.to_array())
    }
}

/// Lifecycle state of an obstacle slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ObstacleState {
    #[default]
    Empty,
    /// Added; waiting for its tiles to be rebuilt
    Processing,
    /// Present in every touched tile
    Processed,
    /// Removed; waiting for its tiles to be rebuilt
    Removing,
}

/// One slot of the obstacle pool
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Obstacle {
    pub data: ObstacleData,
    pub state: ObstacleState,
    pub salt: u16,
    /// Tiles overlapped by the obstacle, at most [`MAX_TOUCHED_TILES`]
    pub touched: Vec<CompressedTileRef>,
    /// Touched tiles not yet rebuilt since the last state change
    pub pending: Vec<CompressedTileRef>,
}

impl Obstacle {
    fn empty() -> Self {
        Self {
            data: ObstacleData::Box {
                bmin: [0.0; 3],
                bmax: [0.0; 3],
            },
            state: ObstacleState::Empty,
            salt: 1,
            touched: Vec::new(),
            pending: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy)]
struct ObstacleRequest {
    action: RequestAction,
    obstacle: ObstacleRef,
}

#[inline]
fn compute_tile_hash(x: i32, y: i32, mask: usize) -> usize {
    const H1: u32 = 0x8da6_b343;
    const H2: u32 = 0xd816_3841;
    let n = H1.wrapping_mul(x as u32).wrapping_add(H2.wrapping_mul(y as u32));
    n as usize & mask
}

#[inline]
fn encode_obstacle_ref(salt: u16, idx: usize) -> ObstacleRef {
    (salt as u32) << 16 | idx as u32
}

#[inline]
fn decode_obstacle_ref(r: ObstacleRef) -> (u16, usize) {
    ((r >> 16) as u16, (r & 0xffff) as usize)
}

/// Store of compressed layers plus the obstacles carved into them
pub struct TileCache {
    params: TileCacheParams,
    compressor: Box<dyn TileCacheCompressor>,
    mesh_process: Option<Box<dyn TileCacheMeshProcess>>,

    tile_lut_mask: usize,
    pos_lookup: Vec<Option<usize>>,
    tiles: Vec<CompressedTile>,
    free_tiles: Vec<usize>,
    salt_bits: u32,
    tile_bits: u32,

    obstacles: Vec<Obstacle>,
    free_obstacles: Vec<usize>,

    requests: Vec<ObstacleRequest>,
    update_queue: VecDeque<CompressedTileRef>,
}

impl fmt::Debug for TileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileCache")
            .field("params", &self.params)
            .field("tiles", &(self.tiles.len() - self.free_tiles.len()))
            .field("obstacles", &(self.obstacles.len() - self.free_obstacles.len()))
            .field("requests", &self.requests.len())
            .field("update_queue", &self.update_queue)
            .field("has_mesh_process", &self.mesh_process.is_some())
            .finish()
    }
}

impl TileCache {
    /// Creates an empty cache.
    ///
    /// Without a mesh process every rebuilt polygon is flagged
    /// [`PolyFlags::WALK`](detour::PolyFlags::WALK) and keeps its layer area.
    pub fn new(
        params: TileCacheParams,
        compressor: Box<dyn TileCacheCompressor>,
        mesh_process: Option<Box<dyn TileCacheMeshProcess>>,
    ) -> Result<Self> {
        params.validate()?;

        let max_tiles = params.max_tiles as usize;
        let tile_lut_size = dt_next_pow2(params.max_tiles as u32 / 4).max(1) as usize;
        let tile_bits = dt_ilog2(dt_next_pow2(params.max_tiles as u32));
        let salt_bits = 31u32.min(32 - tile_bits);
        if salt_bits < 10 {
            log::warn!("tile cache rejected: {} tile bits leave {} salt bits", tile_bits, salt_bits);
            return Err(DtStatus::invalid_param());
        }

        let max_obstacles = params.max_obstacles as usize;
        Ok(Self {
            params,
            compressor,
            mesh_process,
            tile_lut_mask: tile_lut_size - 1,
            pos_lookup: vec![None; tile_lut_size],
            tiles: (0..max_tiles)
                .map(|_| CompressedTile {
                    salt: 1,
                    ..Default::default()
                })
                .collect(),
            // Popped from the back, so slot 0 is handed out first.
            free_tiles: (0..max_tiles).rev().collect(),
            salt_bits,
            tile_bits,
            obstacles: (0..max_obstacles).map(|_| Obstacle::empty()).collect(),
            free_obstacles: (0..max_obstacles).rev().collect(),
            requests: Vec::with_capacity(MAX_TILECACHE_REQUESTS),
            update_queue: VecDeque::with_capacity(MAX_TILECACHE_UPDATES),
        })
    }

    pub fn get_params(&self) -> &TileCacheParams {
        &self.params
    }

    pub fn get_compressor(&self) -> &dyn TileCacheCompressor {
        self.compressor.as_ref()
    }

    /// Number of tile slots
    pub fn get_tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn get_tile(&self, i: usize) -> Option<&CompressedTile> {
        self.tiles.get(i)
    }

    /// Number of obstacle slots
    pub fn get_obstacle_count(&self) -> usize {
        self.obstacles.len()
    }

    pub fn get_obstacle(&self, i: usize) -> Option<&Obstacle> {
        self.obstacles.get(i)
    }

    pub fn encode_tile_id(&self, salt: u32, idx: u32) -> CompressedTileRef {
        salt << self.tile_bits | idx
    }

    pub fn decode_tile_id_salt(&self, r: CompressedTileRef) -> u32 {
        let salt_mask = (1u32 << self.salt_bits) - 1;
        (r >> self.tile_bits) & salt_mask
    }

    pub fn decode_tile_id_tile(&self, r: CompressedTileRef) -> u32 {
        let tile_mask = (1u32 << self.tile_bits) - 1;
        r & tile_mask
    }

    /// Reference of the tile in slot `i`, or 0 when out of range
    pub fn get_tile_ref(&self, i: usize) -> CompressedTileRef {
        self.tiles
            .get(i)
            .map_or(0, |tile| self.encode_tile_id(tile.salt, i as u32))
    }

    fn tile_index(&self, r: CompressedTileRef) -> Option<usize> {
        if r == 0 {
            return None;
        }
        let idx = self.decode_tile_id_tile(r) as usize;
        let tile = self.tiles.get(idx)?;
        (tile.header.is_some() && tile.salt == self.decode_tile_id_salt(r)).then_some(idx)
    }

    /// Live tile behind `r`; stale references resolve to `None`
    pub fn get_tile_by_ref(&self, r: CompressedTileRef) -> Option<&CompressedTile> {
        self.tile_index(r).map(|i| &self.tiles[i])
    }

    fn tile_index_at(&self, tx: i32, ty: i32, tlayer: i32) -> Option<usize> {
        let mut cur = self.pos_lookup[compute_tile_hash(tx, ty, self.tile_lut_mask)];
        while let Some(i) = cur {
            let tile = &self.tiles[i];
            if let Some(h) = &tile.header {
                if h.tx == tx && h.ty == ty && h.tlayer == tlayer {
                    return Some(i);
                }
            }
            cur = tile.next;
        }
        None
    }

    pub fn get_tile_at(&self, tx: i32, ty: i32, tlayer: i32) -> Option<&CompressedTile> {
        self.tile_index_at(tx, ty, tlayer).map(|i| &self.tiles[i])
    }

    /// References of every layer stored at grid cell `(tx, ty)`
    pub fn get_tiles_at(&self, tx: i32, ty: i32) -> Vec<CompressedTileRef> {
        let mut out = Vec::new();
        let mut cur = self.pos_lookup[compute_tile_hash(tx, ty, self.tile_lut_mask)];
        while let Some(i) = cur {
            let tile = &self.tiles[i];
            if let Some(h) = &tile.header {
                if h.tx == tx && h.ty == ty {
                    out.push(self.get_tile_ref(i));
                }
            }
            cur = tile.next;
        }
        out
    }

    /// Stores a layer blob.
    ///
    /// With [`DT_COMPRESSEDTILE_FREE_DATA`] the cache keeps the data when
    /// the tile is removed; otherwise [`remove_tile`](Self::remove_tile)
    /// hands it back.
    pub fn add_tile(&mut self, data: Vec<u8>, flags: i32) -> Result<CompressedTileRef> {
        let header = match TileCacheLayerHeader::parse(&data) {
            Ok(h) => h,
            Err(err) => {
                log::warn!("rejected tile cache layer: {}", err);
                return Err(err.into());
            }
        };

        if self.tile_index_at(header.tx, header.ty, header.tlayer).is_some() {
            log::warn!(
                "tile cache cell ({}, {}, {}) is already occupied",
                header.tx,
                header.ty,
                header.tlayer
            );
            return Err(DtStatus::failure_detail(DtStatus::DT_ALREADY_OCCUPIED));
        }

        let idx = self
            .free_tiles
            .pop()
            .ok_or(DtStatus::failure_detail(DtStatus::DT_OUT_OF_MEMORY))?;

        let bucket = compute_tile_hash(header.tx, header.ty, self.tile_lut_mask);
        let tile = &mut self.tiles[idx];
        tile.header = Some(header);
        tile.data = data;
        tile.flags = flags;
        tile.next = self.pos_lookup[bucket];
        self.pos_lookup[bucket] = Some(idx);

        let r = self.get_tile_ref(idx);
        log::debug!(
            "cached layer ({}, {}, {}) as {:#x}",
            header.tx,
            header.ty,
            header.tlayer,
            r
        );
        Ok(r)
    }

    /// Removes a tile, returning its blob unless the cache owned it
    pub fn remove_tile(&mut self, r: CompressedTileRef) -> Result<Option<Vec<u8>>> {
        let idx = self.tile_index(r).ok_or(DtStatus::invalid_param())?;
        let header = self.tiles[idx].header.ok_or(DtStatus::invalid_param())?;

        let bucket = compute_tile_hash(header.tx, header.ty, self.tile_lut_mask);
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

        let salt_mask = (1u32 << self.salt_bits) - 1;
        let tile = &mut self.tiles[idx];
        let data = std::mem::take(&mut tile.data);
        let owned = tile.flags & DT_COMPRESSEDTILE_FREE_DATA != 0;
        let salt = match (tile.salt + 1) & salt_mask {
            0 => 1,
            s => s,
        };
        *tile = CompressedTile {
            salt,
            ..Default::default()
        };
        self.free_tiles.push(idx);

        log::debug!(
            "removed cached layer ({}, {}, {}) {:#x}",
            header.tx,
            header.ty,
            header.tlayer,
            r
        );
        Ok(if owned { None } else { Some(data) })
    }

    /// Reference of the obstacle in slot `i`, or 0 when out of range
    pub fn get_obstacle_ref(&self, i: usize) -> ObstacleRef {
        self.obstacles
            .get(i)
            .map_or(0, |ob| encode_obstacle_ref(ob.salt, i))
    }

    fn obstacle_index(&self, r: ObstacleRef) -> Option<usize> {
        if r == 0 {
            return None;
        }
        let (salt, idx) = decode_obstacle_ref(r);
        let ob = self.obstacles.get(idx)?;
        (ob.salt == salt).then_some(idx)
    }

    /// Obstacle behind `r`; stale references resolve to `None`
    pub fn get_obstacle_by_ref(&self, r: ObstacleRef) -> Option<&Obstacle> {
        self.obstacle_index(r).map(|i| &self.obstacles[i])
    }

    /// Queues a cylinder obstacle standing on `pos`
    pub fn add_obstacle(&mut self, pos: [f32; 3], radius: f32, height: f32) -> Result<ObstacleRef> {
        self.queue_obstacle(ObstacleData::Cylinder { pos, radius, height })
    }

    /// Queues an axis-aligned box obstacle
    pub fn add_box_obstacle(&mut self, bmin: [f32; 3], bmax: [f32; 3]) -> Result<ObstacleRef> {
        self.queue_obstacle(ObstacleData::Box { bmin, bmax })
    }

    /// Queues a box obstacle rotated by `y_radians` about the y-axis
    pub fn add_oriented_box_obstacle(
        &mut self,
        center: [f32; 3],
        half_extents: [f32; 3],
        y_radians: f32,
    ) -> Result<ObstacleRef> {
        self.queue_obstacle(ObstacleData::oriented_box(center, half_extents, y_radians))
    }

    fn queue_obstacle(&mut self, data: ObstacleData) -> Result<ObstacleRef> {
        if self.requests.len() >= MAX_TILECACHE_REQUESTS {
            return Err(DtStatus::failure_detail(DtStatus::DT_BUFFER_TOO_SMALL));
        }
        let idx = self
            .free_obstacles
            .pop()
            .ok_or(DtStatus::failure_detail(DtStatus::DT_OUT_OF_MEMORY))?;

        let ob = &mut self.obstacles[idx];
        ob.data = data;
        ob.state = ObstacleState::Processing;
        ob.touched.clear();
        ob.pending.clear();

        let r = encode_obstacle_ref(ob.salt, idx);
        self.requests.push(ObstacleRequest {
            action: RequestAction::Add,
            obstacle: r,
        });
        log::debug!("obstacle {:#x} queued for adding", r);
        Ok(r)
    }

    /// Queues removal of an obstacle. A null reference is a no-op.
    pub fn remove_obstacle(&mut self, r: ObstacleRef) -> Result<()> {
        if r == 0 {
            return Ok(());
        }
        if self.requests.len() >= MAX_TILECACHE_REQUESTS {
            return Err(DtStatus::failure_detail(DtStatus::DT_BUFFER_TOO_SMALL));
        }
        self.requests.push(ObstacleRequest {
            action: RequestAction::Remove,
            obstacle: r,
        });
        log::debug!("obstacle {:#x} queued for removal", r);
        Ok(())
    }

    /// Tiles whose used area overlaps the given bounds, at most
    /// `max_results` of them
    pub fn query_tiles(&self, bmin: &[f32; 3], bmax: &[f32; 3], max_results: usize) -> Vec<CompressedTileRef> {
        let tw = self.params.width as f32 * self.params.cs;
        let th = self.params.height as f32 * self.params.cs;
        let orig = &self.params.orig;
        let tx0 = ((bmin[0] - orig[0]) / tw).floor() as i32;
        let tx1 = ((bmax[0] - orig[0]) / tw).floor() as i32;
        let ty0 = ((bmin[2] - orig[2]) / th).floor() as i32;
        let ty1 = ((bmax[2] - orig[2]) / th).floor() as i32;

        let mut results = Vec::new();
        for ty in ty0..=ty1 {
            for tx in tx0..=tx1 {
                for r in self.get_tiles_at(tx, ty) {
                    let Some(header) = self.get_tile_by_ref(r).and_then(|t| t.header) else {
                        continue;
                    };
                    let (tbmin, tbmax) = self.calc_tight_tile_bounds(&header);
                    if dt_overlap_bounds(bmin, bmax, &tbmin, &tbmax) && results.len() < max_results {
                        results.push(r);
                    }
                }
            }
        }
        results
    }

    /// Bounds of the usable sub-region of a layer
    pub fn calc_tight_tile_bounds(&self, header: &TileCacheLayerHeader) -> ([f32; 3], [f32; 3]) {
        let cs = self.params.cs;
        let bmin = [
            header.bmin[0] + header.minx as f32 * cs,
            header.bmin[1],
            header.bmin[2] + header.miny as f32 * cs,
        ];
        let bmax = [
            header.bmin[0] + (header.maxx as f32 + 1.0) * cs,
            header.bmax[1],
            header.bmin[2] + (header.maxy as f32 + 1.0) * cs,
        ];
        (bmin, bmax)
    }

    pub fn get_obstacle_bounds(&self, ob: &Obstacle) -> ([f32; 3], [f32; 3]) {
        ob.data.bounds()
    }

    /// Number of requests and tile rebuilds still outstanding
    pub fn pending_work(&self) -> (usize, usize) {
        (self.requests.len(), self.update_queue.len())
    }

    /// Advances obstacle processing by at most one tile rebuild.
    ///
    /// Requests are drained only once the rebuild queue is empty. A request
    /// whose tiles no longer fit in the rebuild queue stays queued, with
    /// everything after it, until a later call. Returns whether all requests
    /// and rebuilds have been handled; a failed rebuild is reported after
    /// the queue has moved past that tile.
    pub fn update(&mut self, _dt: f32, nav_mesh: &mut NavMesh) -> Result<bool> {
        if self.update_queue.is_empty() {
            let mut requests = std::mem::take(&mut self.requests).into_iter();
            while let Some(req) = requests.next() {
                if self.process_request(req).is_err() {
                    self.requests.push(req);
                    self.requests.extend(requests);
                    log::debug!("rebuild queue full, {} requests deferred", self.requests.len());
                    break;
                }
            }
        }

        let mut status = Ok(());
        if let Some(r) = self.update_queue.pop_front() {
            status = self.build_nav_mesh_tile(r, nav_mesh);
            if let Err(err) = status {
                log::warn!("rebuild of tile {:#x} failed: {}", r, err);
            }
            self.settle_obstacles(r);
        }

        let up_to_date = self.update_queue.is_empty() && self.requests.is_empty();
        status.map(|_| up_to_date)
    }

    /// Queues every tile of `tiles` not queued yet, or none of them when
    /// they do not all fit
    fn enqueue_updates(&mut self, tiles: &[CompressedTileRef]) -> Result<()> {
        let new = tiles.iter().filter(|r| !self.update_queue.contains(r)).count();
        if self.update_queue.len() + new > MAX_TILECACHE_UPDATES {
            return Err(DtStatus::failure_detail(DtStatus::DT_BUFFER_TOO_SMALL));
        }
        for &r in tiles {
            if !self.update_queue.contains(&r) {
                self.update_queue.push_back(r);
            }
        }
        Ok(())
    }

    /// Applies one request. Fails with `BUFFER_TOO_SMALL`, leaving the
    /// obstacle untouched, when its tiles do not fit in the rebuild queue.
    fn process_request(&mut self, req: ObstacleRequest) -> Result<()> {
        let Some(idx) = self.obstacle_index(req.obstacle) else {
            log::debug!("dropping request for stale obstacle {:#x}", req.obstacle);
            return Ok(());
        };

        match req.action {
            RequestAction::Add => {
                let (bmin, bmax) = self.obstacles[idx].data.bounds();
                let touched = self.query_tiles(&bmin, &bmax, MAX_TOUCHED_TILES);
                self.enqueue_updates(&touched)?;
                let ob = &mut self.obstacles[idx];
                ob.pending = touched.clone();
                ob.touched = touched;
                if ob.pending.is_empty() {
                    ob.state = ObstacleState::Processed;
                    log::debug!("obstacle {:#x} touches no tiles, processed", req.obstacle);
                }
            }
            RequestAction::Remove => {
                let touched = self.obstacles[idx].touched.clone();
                self.enqueue_updates(&touched)?;
                let ob = &mut self.obstacles[idx];
                ob.state = ObstacleState::Removing;
                ob.pending = touched;
                if ob.pending.is_empty() {
                    self.release_obstacle(idx);
                }
            }
        }
        Ok(())
    }

    /// Moves obstacles waiting on tile `r` on once it has been rebuilt
    fn settle_obstacles(&mut self, r: CompressedTileRef) {
        for idx in 0..self.obstacles.len() {
            let ob = &mut self.obstacles[idx];
            if !matches!(ob.state, ObstacleState::Processing | ObstacleState::Removing) {
                continue;
            }
            let Some(pos) = ob.pending.iter().position(|&p| p == r) else {
                continue;
            };
            ob.pending.swap_remove(pos);
            if !ob.pending.is_empty() {
                continue;
            }

            if ob.state == ObstacleState::Processing {
                ob.state = ObstacleState::Processed;
                log::debug!("obstacle {:#x} processed", encode_obstacle_ref(ob.salt, idx));
            } else {
                self.release_obstacle(idx);
            }
        }
    }

    fn release_obstacle(&mut self, idx: usize) {
        let ob = &mut self.obstacles[idx];
        let old = encode_obstacle_ref(ob.salt, idx);
        ob.state = ObstacleState::Empty;
        ob.touched.clear();
        ob.pending.clear();
        ob.salt = match ob.salt.wrapping_add(1) {
            0 => 1,
            s => s,
        };
        self.free_obstacles.push(idx);
        log::debug!("obstacle {:#x} removed", old);
    }

    /// Rebuilds every layer stored at grid cell `(tx, ty)` right away
    pub fn build_nav_mesh_tiles_at(&mut self, tx: i32, ty: i32, nav_mesh: &mut NavMesh) -> Result<()> {
        for r in self.get_tiles_at(tx, ty) {
            self.build_nav_mesh_tile(r, nav_mesh)?;
        }
        Ok(())
    }

    /// Rebuilds the navmesh tile of one cached layer with all live
    /// obstacles carved in.
    ///
    /// A layer that meshes to nothing removes its navmesh tile.
    pub fn build_nav_mesh_tile(&mut self, r: CompressedTileRef, nav_mesh: &mut NavMesh) -> Result<()> {
        let idx = self.tile_index(r).ok_or(DtStatus::invalid_param())?;
        let mut layer = decompress_tile_cache_layer(self.compressor.as_ref(), &self.tiles[idx].data)
            .map_err(|err: LayerError| {
                log::warn!("cannot decompress tile {:#x}: {}", r, err);
                DtStatus::from(err)
            })?;

        let orig = layer.header.bmin;
        let (cs, ch) = (self.params.cs, self.params.ch);
        for ob in &self.obstacles {
            if matches!(ob.state, ObstacleState::Empty | ObstacleState::Removing) || !ob.touched.contains(&r) {
                continue;
            }
            match &ob.data {
                ObstacleData::Cylinder { pos, radius, height } => {
                    mark_cylinder_area(&mut layer, &orig, cs, ch, pos, *radius, *height, TILECACHE_NULL_AREA)
                }
                ObstacleData::Box { bmin, bmax } => {
                    mark_box_area(&mut layer, &orig, cs, ch, bmin, bmax, TILECACHE_NULL_AREA)
                }
                ObstacleData::OrientedBox {
                    center,
                    half_extents,
                    rot_aux,
                } => mark_oriented_box_area(
                    &mut layer,
                    &orig,
                    cs,
                    ch,
                    center,
                    half_extents,
                    rot_aux,
                    TILECACHE_NULL_AREA,
                ),
            }
        }

        let header = layer.header;
        let mesh = build_layer_poly_mesh(&mut layer, &self.params)?;
        if mesh.poly_count() == 0 {
            log::debug!(
                "tile ({}, {}, {}) has no polygons left",
                header.tx,
                header.ty,
                header.tlayer
            );
            if let Err(err) = commit_nav_mesh_tile(nav_mesh, &header, None) {
                log::debug!("removing empty tile failed: {}", err);
            }
            return Ok(());
        }

        let poly_count = mesh.poly_count();
        let mut create = nav_mesh_create_params(&self.params, &header, mesh);
        let process: Option<&mut dyn TileCacheMeshProcess> = match &mut self.mesh_process {
            Some(p) => Some(&mut **p),
            None => None,
        };
        apply_mesh_process(&mut create, process);
        commit_nav_mesh_tile(nav_mesh, &header, Some(&create))?;

        log::debug!(
            "rebuilt tile ({}, {}, {}) with {} polys",
            header.tx,
            header.ty,
            header.tlayer,
            poly_count
        );
        Ok(())
    }
}
