//! Hand built meshes shared by the tests
//!
//! Every mesh is made of unit quads on a flat floor at y = 0. A quad covers
//! four voxels of 0.25 units, so a tile of `n` quads is `n` world units wide.

use std::collections::HashMap;

use crate::{
    create_nav_mesh_data, NavMesh, NavMeshCreateParams, NavMeshParams, PolyFlags, PolyRef, TileRef,
    DT_MESH_NULL_IDX, DT_TILE_FREE_DATA,
};

pub const CELL_SIZE: f32 = 0.25;
pub const CELL_HEIGHT: f32 = 0.2;
const VOXELS_PER_QUAD: u16 = 4;

/// Creation parameters for the occupied unit `cells` of a tile spanning
/// `width` x `depth` quads at grid position `(tx, ty)`.
///
/// Edges between occupied cells become internal neighbours, edges on the
/// tile border become portals and every other edge is a wall.
pub fn cells_create_params(
    cells: &[(u16, u16)],
    width: u16,
    depth: u16,
    tx: i32,
    ty: i32,
) -> NavMeshCreateParams {
    let nvp = 6;
    let occupied: HashMap<(u16, u16), usize> =
        cells.iter().enumerate().map(|(i, &c)| (c, i)).collect();

    let mut vert_index: HashMap<(u16, u16), u16> = HashMap::new();
    let mut verts: Vec<u16> = Vec::new();
    let mut vert = |x: u16, z: u16| -> u16 {
        *vert_index.entry((x, z)).or_insert_with(|| {
            verts.extend_from_slice(&[x * VOXELS_PER_QUAD, 0, z * VOXELS_PER_QUAD]);
            (verts.len() / 3 - 1) as u16
        })
    };

    let mut polys = Vec::new();
    for &(x, z) in cells {
        let corners = [
            vert(x, z),
            vert(x, z + 1),
            vert(x + 1, z + 1),
            vert(x + 1, z),
        ];

        // Edge order: -x, +z, +x, -z.
        let neighbour = |dx: i32, dz: i32| occupied.get(&((x as i32 + dx) as u16, (z as i32 + dz) as u16));
        let mut neis = [DT_MESH_NULL_IDX; 4];
        let edges = [(-1, 0, x == 0, 0u16), (0, 1, z + 1 == depth, 1), (1, 0, x + 1 == width, 2), (0, -1, z == 0, 3)];
        for (e, &(dx, dz, on_border, side)) in edges.iter().enumerate() {
            if on_border {
                neis[e] = 0x8000 | side;
            } else if let Some(&n) = neighbour(dx, dz) {
                neis[e] = n as u16;
            }
        }

        polys.extend_from_slice(&corners);
        polys.extend_from_slice(&[DT_MESH_NULL_IDX; 2]);
        polys.extend_from_slice(&neis);
        polys.extend_from_slice(&[DT_MESH_NULL_IDX; 2]);
    }

    let bmin = [tx as f32 * width as f32, 0.0, ty as f32 * depth as f32];
    let bmax = [bmin[0] + width as f32, 1.0, bmin[2] + depth as f32];

    NavMeshCreateParams {
        vert_count: verts.len() / 3,
        verts,
        poly_count: cells.len(),
        polys,
        poly_flags: vec![PolyFlags::WALK; cells.len()],
        poly_areas: vec![0; cells.len()],
        nvp,
        ..Default::default()
    }
    .with_tile(tx, ty, 0)
    .with_bounds(bmin, bmax)
    .with_cell_size(CELL_SIZE, CELL_HEIGHT)
    .with_agent(2.0, 0.5, 0.5)
}

/// A fully occupied `width` x `depth` grid of quads
pub fn grid_create_params(width: u16, depth: u16, tx: i32, ty: i32) -> NavMeshCreateParams {
    let cells: Vec<(u16, u16)> = (0..depth)
        .flat_map(|z| (0..width).map(move |x| (x, z)))
        .collect();
    cells_create_params(&cells, width, depth, tx, ty)
}

/// A single walled quad at the origin
pub fn quad_create_params() -> NavMeshCreateParams {
    let mut params = cells_create_params(&[(0, 0)], 1, 1, 0, 0);
    // Walls instead of portals on every edge.
    let nvp = params.nvp;
    for e in 0..4 {
        params.polys[nvp + e] = DT_MESH_NULL_IDX;
    }
    params
}

pub fn quad_tile_data() -> Vec<u8> {
    quad_tile_data_at(0, 0)
}

/// A one-quad tile with portals on every side at grid position `(tx, ty)`
pub fn quad_tile_data_at(tx: i32, ty: i32) -> Vec<u8> {
    create_nav_mesh_data(&grid_create_params(1, 1, tx, ty)).unwrap()
}

/// A 2x1 strip with explicit detail meshes and one off-mesh connection,
/// touching every section of the tile format
pub fn off_mesh_strip_tile_data() -> Vec<u8> {
    let mut params = grid_create_params(2, 1, 0, 0).with_off_mesh_connection(
        [0.5, 0.0, 0.5],
        [1.5, 0.0, 0.5],
        0.3,
        true,
        2,
        PolyFlags::JUMP,
        7,
    );

    // Each quad gets its corners plus a center vertex and four triangles.
    let mut detail_meshes = Vec::new();
    let mut detail_verts = Vec::new();
    let mut detail_tris = Vec::new();
    for i in 0..params.poly_count {
        let x0 = i as f32;
        let corners = [[x0, 0.0, 0.0], [x0, 0.0, 1.0], [x0 + 1.0, 0.0, 1.0], [x0 + 1.0, 0.0, 0.0]];
        let base = detail_verts.len() / 3;
        for c in corners {
            detail_verts.extend_from_slice(&c);
        }
        detail_verts.extend_from_slice(&[x0 + 0.5, 0.0, 0.5]);

        detail_meshes.extend_from_slice(&[base as u32, 5, (i * 4) as u32, 4]);
        for j in 0..4u8 {
            // Edge j -> j+1 of the polygon is the boundary edge (index 0).
            detail_tris.extend_from_slice(&[j, (j + 1) % 4, 4, 0b01]);
        }
    }
    params.detail_vert_count = detail_verts.len() / 3;
    params.detail_tri_count = detail_tris.len() / 4;
    params.detail_meshes = detail_meshes;
    params.detail_verts = detail_verts;
    params.detail_tris = detail_tris;

    create_nav_mesh_data(&params).unwrap()
}

/// Mesh parameters for tiles of `tile_size` quads
pub fn mesh_params(tile_size: f32, max_tiles: i32) -> NavMeshParams {
    NavMeshParams::default()
        .with_tile_size(tile_size, tile_size)
        .with_max_tiles(max_tiles)
        .with_max_polys_per_tile(64)
}

/// Builds a mesh from tile blobs of equal size
pub fn build_mesh(tile_size: f32, tiles: Vec<Vec<u8>>) -> NavMesh {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut mesh = NavMesh::new(mesh_params(tile_size, 16)).unwrap();
    for data in tiles {
        mesh.add_tile(data, DT_TILE_FREE_DATA, TileRef::NULL).unwrap();
    }
    mesh
}

/// A straight corridor of `n` quads in one tile
pub fn strip_mesh(n: u16) -> NavMesh {
    let data = create_nav_mesh_data(&grid_create_params(n, 1, 0, 0)).unwrap();
    build_mesh(n as f32, vec![data])
}

/// Two one-quad tiles side by side along x
pub fn two_tile_mesh() -> NavMesh {
    build_mesh(1.0, vec![quad_tile_data_at(0, 0), quad_tile_data_at(1, 0)])
}

/// An L-shaped corridor in a 3x3 tile: along x at z = 0, then along z at x = 2
pub fn l_corridor_mesh() -> NavMesh {
    let cells = [(0, 0), (1, 0), (2, 0), (2, 1), (2, 2)];
    let data = create_nav_mesh_data(&cells_create_params(&cells, 3, 3, 0, 0)).unwrap();
    build_mesh(3.0, vec![data])
}

/// Two quads in a 3x1 tile with a gap between them
pub fn disconnected_mesh() -> NavMesh {
    let data = create_nav_mesh_data(&cells_create_params(&[(0, 0), (2, 0)], 3, 1, 0, 0)).unwrap();
    build_mesh(3.0, vec![data])
}

/// Reference of the polygon under `pos`
pub fn poly_at(mesh: &NavMesh, pos: [f32; 3]) -> PolyRef {
    let query = crate::NavMeshQuery::new(mesh, 256).unwrap();
    query
        .find_nearest_poly(&pos, &[0.1, 1.0, 0.1], &crate::QueryFilter::default())
        .unwrap()
        .poly_ref
}
