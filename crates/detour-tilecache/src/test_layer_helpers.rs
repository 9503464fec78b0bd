//! Layer fixtures shared by the unit tests

use crate::compressor::TileCacheCompressor;
use crate::tile_cache_data::{build_tile_cache_layer, TileCacheLayer, TileCacheLayerHeader};
use crate::TILECACHE_WALKABLE_AREA;

const DX: [i32; 4] = [-1, 0, 1, 0];
const DZ: [i32; 4] = [0, 1, 0, -1];

fn header(w: i32, h: i32) -> TileCacheLayerHeader {
    TileCacheLayerHeader {
        bmax: [w as f32, 2.0, h as f32],
        hmax: 0,
        width: w as u8,
        height: h as u8,
        maxx: (w - 1) as u8,
        maxy: (h - 1) as u8,
        ..Default::default()
    }
}

/// Connection bytes linking every cell to its in-grid neighbours
fn grid_cons(w: i32, h: i32, portals: bool) -> Vec<u8> {
    let mut cons = vec![0u8; (w * h) as usize];
    for z in 0..h {
        for x in 0..w {
            let c = &mut cons[(x + z * w) as usize];
            for dir in 0..4 {
                let (nx, nz) = (x + DX[dir], z + DZ[dir]);
                if nx >= 0 && nz >= 0 && nx < w && nz < h {
                    *c |= 1 << dir;
                } else if portals {
                    *c |= 1 << (4 + dir);
                }
            }
        }
    }
    cons
}

/// Flat walkable layer of `w * h` cells at height 0
pub fn flat_layer(w: i32, h: i32) -> TileCacheLayer {
    layer_with_areas(w, h, &vec![TILECACHE_WALKABLE_AREA; (w * h) as usize])
}

/// Flat layer with the given area per cell
pub fn layer_with_areas(w: i32, h: i32, areas: &[u8]) -> TileCacheLayer {
    let n = (w * h) as usize;
    TileCacheLayer::new(header(w, h), vec![0; n], areas.to_vec(), grid_cons(w, h, false))
        .unwrap()
}

/// Compressed flat layer for tile `(tx, ty)` of a grid of `size` cells wide
/// tiles with cell size `cs`, with portals on every border
pub fn flat_tile_blob(comp: &dyn TileCacheCompressor, tx: i32, ty: i32, size: i32, cs: f32) -> Vec<u8> {
    let tile_world = size as f32 * cs;
    let mut header = header(size, size);
    header.tx = tx;
    header.ty = ty;
    header.bmin = [tx as f32 * tile_world, 0.0, ty as f32 * tile_world];
    header.bmax = [(tx + 1) as f32 * tile_world, 2.0, (ty + 1) as f32 * tile_world];

    let n = (size * size) as usize;
    build_tile_cache_layer(
        comp,
        &header,
        &vec![0; n],
        &vec![TILECACHE_WALKABLE_AREA; n],
        &grid_cons(size, size, true),
    )
    .unwrap()
}
