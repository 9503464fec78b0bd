//! Compressed tile cache with dynamic obstacles for detour navigation meshes
//!
//! Each navmesh tile is backed by a compressed layer: a small grid of
//! heights, area ids and neighbour connections. Obstacles carve their shape
//! out of the area grid, after which the layer is meshed again and the
//! resulting tile swapped into the [`detour::NavMesh`].
//!
//! ```rust,ignore
//! use detour::NavMesh;
//! use detour_tilecache::{Lz4Compressor, TileCache, TileCacheParams};
//!
//! let params = TileCacheParams::default().with_max_obstacles(64);
//! let mut cache = TileCache::new(params, Box::new(Lz4Compressor::new()), None)?;
//! for blob in layers {
//!     cache.add_tile(blob, DT_COMPRESSEDTILE_FREE_DATA)?;
//! }
//!
//! let ob = cache.add_obstacle([10.0, 0.0, 10.0], 1.0, 2.0)?;
//! while !cache.update(0.1, &mut nav_mesh)? {}
//! ```
//!
//! The pieces:
//!
//! - [`TileCache`]: tile and obstacle registry with the budgeted rebuild loop
//! - [`TileCacheCompressor`]: codec contract, with [`Lz4Compressor`]
//! - [`TileCacheLayer`]: decompressed grids, and the `DTLR` blob format
//! - [`build_tile_cache_regions`], [`build_tile_cache_contours`] and
//!   [`build_tile_cache_poly_mesh`]: the meshing pipeline
//! - [`TileCacheMeshProcess`]: hook assigning final polygon flags and areas

pub mod compressor;
pub mod tile_cache;
pub mod tile_cache_builder;
pub mod tile_cache_data;
pub mod tile_cache_integration;
pub mod tile_cache_poly_mesh;

#[cfg(test)]
pub mod test_layer_helpers;

#[cfg(test)]
mod tile_cache_tests;

pub use compressor::{Lz4Compressor, TileCacheCompressor};
pub use tile_cache::{
    CompressedTile, CompressedTileRef, Obstacle, ObstacleData, ObstacleRef, ObstacleState,
    TileCache, TileCacheParams, DT_COMPRESSEDTILE_FREE_DATA, MAX_TILECACHE_REQUESTS,
    MAX_TILECACHE_UPDATES, MAX_TOUCHED_TILES,
};
pub use tile_cache_builder::{
    build_tile_cache_contours, build_tile_cache_regions, mark_box_area, mark_cylinder_area,
    mark_oriented_box_area, TileCacheContour, TileCacheContourSet, LAYER_MAX_NEIS,
    MAX_LAYER_REGIONS,
};
pub use tile_cache_data::{
    build_tile_cache_layer, decompress_tile_cache_layer, tile_cache_header_swap_endian,
    LayerError, TileCacheLayer, TileCacheLayerHeader, TILECACHE_HEADER_SIZE, TILECACHE_MAGIC,
    TILECACHE_VERSION,
};
pub use tile_cache_integration::{
    apply_mesh_process, build_layer_poly_mesh, commit_nav_mesh_tile, nav_mesh_create_params,
    TileCacheMeshProcess,
};
pub use tile_cache_poly_mesh::{build_tile_cache_poly_mesh, TileCachePolyMesh, MAX_REM_EDGES};

/// Area id of cells that are not walkable
pub const TILECACHE_NULL_AREA: u8 = 0;

/// Default area id of walkable cells
pub const TILECACHE_WALKABLE_AREA: u8 = 63;

/// Null vertex index in polygon meshes
pub const TILECACHE_NULL_IDX: u16 = 0xffff;
