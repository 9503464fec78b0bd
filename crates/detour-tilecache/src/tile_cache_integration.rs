//! Hand-off from a rebuilt layer to the navigation mesh
//!
//! A dirty layer runs through regions, contours and polygon meshing, then
//! becomes a [`NavMeshCreateParams`] record. A [`TileCacheMeshProcess`] may
//! assign the final per-polygon flags and areas before the tile blob is
//! created and swapped into the [`NavMesh`].

use detour::{
    create_nav_mesh_data, NavMesh, NavMeshCreateParams, PolyFlags, Result, TileRef,
    DT_TILE_FREE_DATA,
};

use crate::tile_cache::TileCacheParams;
use crate::tile_cache_builder::{build_tile_cache_contours, build_tile_cache_regions};
use crate::tile_cache_data::{TileCacheLayer, TileCacheLayerHeader};
use crate::tile_cache_poly_mesh::{build_tile_cache_poly_mesh, TileCachePolyMesh};

/// Post-processing step run on every rebuilt tile before it is committed
pub trait TileCacheMeshProcess {
    /// Called with one entry per polygon in `areas` and `flags`. `params`
    /// may also be extended, e.g. with off-mesh connections.
    fn process(&mut self, params: &mut NavMeshCreateParams, areas: &mut [u8], flags: &mut [PolyFlags]);
}

impl<F> TileCacheMeshProcess for F
where
    F: FnMut(&mut NavMeshCreateParams, &mut [u8], &mut [PolyFlags]),
{
    fn process(&mut self, params: &mut NavMeshCreateParams, areas: &mut [u8], flags: &mut [PolyFlags]) {
        self(params, areas, flags)
    }
}

/// Runs regions, contours and meshing over a decompressed layer
pub fn build_layer_poly_mesh(layer: &mut TileCacheLayer, params: &TileCacheParams) -> Result<TileCachePolyMesh> {
    let walkable_climb_vx = (params.walkable_climb / params.ch) as i32;
    build_tile_cache_regions(layer, walkable_climb_vx)?;
    let cset = build_tile_cache_contours(layer, walkable_climb_vx, params.max_simplification_error)?;
    build_tile_cache_poly_mesh(&cset)
}

/// Packs a layer polygon mesh into tile creation input
pub fn nav_mesh_create_params(
    params: &TileCacheParams,
    header: &TileCacheLayerHeader,
    mesh: TileCachePolyMesh,
) -> NavMeshCreateParams {
    let poly_count = mesh.poly_count();
    NavMeshCreateParams {
        vert_count: mesh.vert_count(),
        verts: mesh.verts,
        poly_count,
        polys: mesh.polys,
        poly_areas: mesh.areas,
        poly_flags: mesh.flags,
        nvp: mesh.nvp,
        ..Default::default()
    }
    .with_tile(header.tx, header.ty, header.tlayer)
    .with_bounds(header.bmin, header.bmax)
    .with_cell_size(params.cs, params.ch)
    .with_agent(params.walkable_height, params.walkable_radius, params.walkable_climb)
    .with_bv_tree(false)
}

/// Gives every polygon its final flags and areas
pub fn apply_mesh_process(create: &mut NavMeshCreateParams, process: Option<&mut dyn TileCacheMeshProcess>) {
    match process {
        Some(process) => {
            let mut areas = std::mem::take(&mut create.poly_areas);
            let mut flags = std::mem::take(&mut create.poly_flags);
            process.process(create, &mut areas, &mut flags);
            create.poly_areas = areas;
            create.poly_flags = flags;
        }
        None => create.poly_flags.fill(PolyFlags::WALK),
    }
}

/// Replaces the navmesh tile at the layer's cell with one built from
/// `create`, or just removes it when `create` is `None`
pub fn commit_nav_mesh_tile(
    nav_mesh: &mut NavMesh,
    header: &TileCacheLayerHeader,
    create: Option<&NavMeshCreateParams>,
) -> Result<()> {
    let data = create.map(create_nav_mesh_data).transpose()?;

    let old = nav_mesh.get_tile_ref_at(header.tx, header.ty, header.tlayer);
    if !old.is_null() {
        nav_mesh.remove_tile(old)?;
    }

    if let Some(data) = data {
        nav_mesh.add_tile(data, DT_TILE_FREE_DATA, TileRef::NULL)?;
    }
    Ok(())
}
