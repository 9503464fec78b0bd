//! Tile creation from polygon mesh data
//!
//! [`NavMeshBuilder`] turns a voxel-space polygon mesh, an optional detail
//! mesh and optional off-mesh connections into a tile blob accepted by
//! [`NavMesh::add_tile`](crate::NavMesh::add_tile).

use crate::binary_format::{MeshHeader, TileData};
use crate::detour_common::{dt_clamp, dt_vmax, dt_vmin};
use crate::nav_mesh::{BVNode, OffMeshConnection, Poly, PolyDetail};
use crate::{
    DtStatus, PolyFlags, PolyType, Result, DT_EXT_LINK, DT_MESH_NULL_IDX, DT_NAVMESH_MAGIC,
    DT_NAVMESH_VERSION, DT_OFFMESH_CON_BIDIR, DT_VERTS_PER_POLYGON,
};

/// Input for [`NavMeshBuilder::create_nav_mesh_data`]
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NavMeshCreateParams {
    /// Polygon mesh vertices in voxel units `[x, y, z, ...]`
    pub verts: Vec<u16>,
    pub vert_count: usize,
    /// `poly_count * 2 * nvp` entries: vertex indices padded with
    /// [`DT_MESH_NULL_IDX`] followed by per-edge neighbour codes
    pub polys: Vec<u16>,
    pub poly_flags: Vec<PolyFlags>,
    pub poly_areas: Vec<u8>,
    pub poly_count: usize,
    /// Maximum vertices per polygon in `polys`
    pub nvp: usize,

    /// Per polygon `[vert_base, vert_count, tri_base, tri_count]`
    pub detail_meshes: Vec<u32>,
    /// Detail vertices in world units `[x, y, z, ...]`
    pub detail_verts: Vec<f32>,
    pub detail_vert_count: usize,
    /// Detail triangles `[a, b, c, edge_flags, ...]`
    pub detail_tris: Vec<u8>,
    pub detail_tri_count: usize,

    /// Start and end of each connection `[ax, ay, az, bx, by, bz, ...]`
    pub off_mesh_con_verts: Vec<f32>,
    pub off_mesh_con_rad: Vec<f32>,
    pub off_mesh_con_flags: Vec<PolyFlags>,
    pub off_mesh_con_areas: Vec<u8>,
    /// Non-zero for bidirectional connections
    pub off_mesh_con_dir: Vec<u8>,
    pub off_mesh_con_user_id: Vec<u32>,
    pub off_mesh_con_count: usize,

    pub user_id: u32,
    pub tile_x: i32,
    pub tile_y: i32,
    pub tile_layer: i32,
    /// World space bounds of the tile
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],

    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    /// Cell size of the voxel grid
    pub cs: f32,
    /// Cell height of the voxel grid
    pub ch: f32,
    pub build_bv_tree: bool,
}

impl Default for NavMeshCreateParams {
    fn default() -> Self {
        Self {
            verts: Vec::new(),
            vert_count: 0,
            polys: Vec::new(),
            poly_flags: Vec::new(),
            poly_areas: Vec::new(),
            poly_count: 0,
            nvp: DT_VERTS_PER_POLYGON,
            detail_meshes: Vec::new(),
            detail_verts: Vec::new(),
            detail_vert_count: 0,
            detail_tris: Vec::new(),
            detail_tri_count: 0,
            off_mesh_con_verts: Vec::new(),
            off_mesh_con_rad: Vec::new(),
            off_mesh_con_flags: Vec::new(),
            off_mesh_con_areas: Vec::new(),
            off_mesh_con_dir: Vec::new(),
            off_mesh_con_user_id: Vec::new(),
            off_mesh_con_count: 0,
            user_id: 0,
            tile_x: 0,
            tile_y: 0,
            tile_layer: 0,
            bmin: [0.0; 3],
            bmax: [0.0; 3],
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
            cs: 0.3,
            ch: 0.2,
            build_bv_tree: true,
        }
    }
}

impl NavMeshCreateParams {
    pub fn with_tile(mut self, x: i32, y: i32, layer: i32) -> Self {
        self.tile_x = x;
        self.tile_y = y;
        self.tile_layer = layer;
        self
    }

    pub fn with_bounds(mut self, bmin: [f32; 3], bmax: [f32; 3]) -> Self {
        self.bmin = bmin;
        self.bmax = bmax;
        self
    }

    pub fn with_cell_size(mut self, cs: f32, ch: f32) -> Self {
        self.cs = cs;
        self.ch = ch;
        self
    }

    pub fn with_agent(mut self, height: f32, radius: f32, climb: f32) -> Self {
        self.walkable_height = height;
        self.walkable_radius = radius;
        self.walkable_climb = climb;
        self
    }

    pub fn with_bv_tree(mut self, build: bool) -> Self {
        self.build_bv_tree = build;
        self
    }

    /// Appends an off-mesh connection
    pub fn with_off_mesh_connection(
        mut self,
        start: [f32; 3],
        end: [f32; 3],
        rad: f32,
        bidirectional: bool,
        area: u8,
        flags: PolyFlags,
        user_id: u32,
    ) -> Self {
        self.off_mesh_con_verts.extend_from_slice(&start);
        self.off_mesh_con_verts.extend_from_slice(&end);
        self.off_mesh_con_rad.push(rad);
        self.off_mesh_con_dir.push(u8::from(bidirectional));
        self.off_mesh_con_areas.push(area);
        self.off_mesh_con_flags.push(flags);
        self.off_mesh_con_user_id.push(user_id);
        self.off_mesh_con_count += 1;
        self
    }

    /// Checks sizes and array lengths
    pub fn validate(&self) -> Result<()> {
        let bad = self.nvp == 0
            || self.nvp > DT_VERTS_PER_POLYGON
            || self.vert_count == 0
            || self.vert_count >= 0xffff
            || self.poly_count == 0
            || self.verts.len() < self.vert_count * 3
            || self.polys.len() < self.poly_count * 2 * self.nvp
            || self.poly_flags.len() < self.poly_count
            || self.poly_areas.len() < self.poly_count
            || !(self.cs > 0.0 && self.ch > 0.0);
        if bad {
            return Err(DtStatus::invalid_param());
        }

        if !self.detail_meshes.is_empty()
            && (self.detail_meshes.len() < self.poly_count * 4
                || self.detail_verts.len() < self.detail_vert_count * 3
                || self.detail_tris.len() < self.detail_tri_count * 4)
        {
            return Err(DtStatus::invalid_param());
        }

        let n = self.off_mesh_con_count;
        if n > 0
            && (self.off_mesh_con_verts.len() < n * 6
                || self.off_mesh_con_rad.len() < n
                || self.off_mesh_con_flags.len() < n
                || self.off_mesh_con_areas.len() < n
                || self.off_mesh_con_dir.len() < n
                || self.off_mesh_con_user_id.len() < n)
        {
            return Err(DtStatus::invalid_param());
        }
        Ok(())
    }

    fn vert(&self, i: usize) -> [u16; 3] {
        [self.verts[i * 3], self.verts[i * 3 + 1], self.verts[i * 3 + 2]]
    }

    fn poly(&self, i: usize) -> &[u16] {
        &self.polys[i * 2 * self.nvp..(i + 1) * 2 * self.nvp]
    }

    fn off_mesh_point(&self, i: usize, end: usize) -> [f32; 3] {
        let b = i * 6 + end * 3;
        [
            self.off_mesh_con_verts[b],
            self.off_mesh_con_verts[b + 1],
            self.off_mesh_con_verts[b + 2],
        ]
    }
}

/// Tile blob builder
pub struct NavMeshBuilder;

/// Classifies a point against tile bounds: 0..7 for the neighbour direction
/// it falls into, 0xff when inside
fn classify_off_mesh_point(pt: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> u8 {
    const XP: u8 = 1 << 0;
    const ZP: u8 = 1 << 1;
    const XM: u8 = 1 << 2;
    const ZM: u8 = 1 << 3;

    let mut outcode = 0;
    if pt[0] >= bmax[0] {
        outcode |= XP;
    }
    if pt[2] >= bmax[2] {
        outcode |= ZP;
    }
    if pt[0] < bmin[0] {
        outcode |= XM;
    }
    if pt[2] < bmin[2] {
        outcode |= ZM;
    }

    match outcode {
        XP => 0,
        o if o == XP | ZP => 1,
        ZP => 2,
        o if o == XM | ZP => 3,
        XM => 4,
        o if o == XM | ZM => 5,
        ZM => 6,
        o if o == XP | ZM => 7,
        _ => 0xff,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BVItem {
    bmin: [u16; 3],
    bmax: [u16; 3],
    i: i32,
}

fn longest_axis(x: u16, y: u16, z: u16) -> usize {
    let mut axis = 0;
    let mut max = x;
    if y > max {
        axis = 1;
        max = y;
    }
    if z > max {
        axis = 2;
    }
    axis
}

fn subdivide(items: &mut [BVItem], nodes: &mut Vec<BVNode>) {
    let icur = nodes.len();
    nodes.push(BVNode::default());

    if items.len() == 1 {
        nodes[icur] = BVNode {
            bmin: items[0].bmin,
            bmax: items[0].bmax,
            i: items[0].i,
        };
        return;
    }

    let mut bmin = items[0].bmin;
    let mut bmax = items[0].bmax;
    for it in &items[1..] {
        for k in 0..3 {
            bmin[k] = bmin[k].min(it.bmin[k]);
            bmax[k] = bmax[k].max(it.bmax[k]);
        }
    }

    let axis = longest_axis(
        bmax[0] - bmin[0],
        bmax[1] - bmin[1],
        bmax[2] - bmin[2],
    );
    items.sort_by_key(|it| it.bmin[axis]);

    let split = items.len() / 2;
    let (left, right) = items.split_at_mut(split);
    subdivide(left, nodes);
    subdivide(right, nodes);

    let escape = (nodes.len() - icur) as i32;
    nodes[icur] = BVNode {
        bmin,
        bmax,
        i: -escape,
    };
}

fn quantize(v: f32) -> u16 {
    dt_clamp(v, 0.0, 65535.0) as u16
}

impl NavMeshBuilder {
    /// Builds a tile blob from polygon mesh data
    pub fn create_nav_mesh_data(params: &NavMeshCreateParams) -> Result<Vec<u8>> {
        Ok(Self::build_tile_data(params)?.to_bytes()?)
    }

    /// Builds the decoded form of a tile
    pub fn build_tile_data(params: &NavMeshCreateParams) -> Result<TileData> {
        params.validate()?;
        let nvp = params.nvp;

        // Classify off-mesh connection end points against the tile bounds.
        let mut off_mesh_class = vec![0u8; params.off_mesh_con_count * 2];
        let mut stored_off_mesh_con_count = 0usize;
        let mut off_mesh_con_link_count = 0usize;

        if params.off_mesh_con_count > 0 {
            let mut hmin = f32::MAX;
            let mut hmax = -f32::MAX;
            if !params.detail_verts.is_empty() && params.detail_vert_count > 0 {
                for i in 0..params.detail_vert_count {
                    let h = params.detail_verts[i * 3 + 1];
                    hmin = hmin.min(h);
                    hmax = hmax.max(h);
                }
            } else {
                for i in 0..params.vert_count {
                    let h = params.bmin[1] + params.verts[i * 3 + 1] as f32 * params.ch;
                    hmin = hmin.min(h);
                    hmax = hmax.max(h);
                }
            }
            hmin -= params.walkable_climb;
            hmax += params.walkable_climb;

            let mut bmin = params.bmin;
            let mut bmax = params.bmax;
            bmin[1] = hmin;
            bmax[1] = hmax;

            for i in 0..params.off_mesh_con_count {
                let p0 = params.off_mesh_point(i, 0);
                let p1 = params.off_mesh_point(i, 1);
                off_mesh_class[i * 2] = classify_off_mesh_point(&p0, &bmin, &bmax);
                off_mesh_class[i * 2 + 1] = classify_off_mesh_point(&p1, &bmin, &bmax);

                // Starts outside the height range cannot touch this tile.
                if off_mesh_class[i * 2] == 0xff && (p0[1] < bmin[1] || p0[1] > bmax[1]) {
                    off_mesh_class[i * 2] = 0;
                }

                if off_mesh_class[i * 2] == 0xff {
                    stored_off_mesh_con_count += 1;
                    off_mesh_con_link_count += 1;
                }
                if off_mesh_class[i * 2 + 1] == 0xff {
                    off_mesh_con_link_count += 1;
                }
            }
        }

        let tot_poly_count = params.poly_count + stored_off_mesh_con_count;
        let tot_vert_count = params.vert_count + stored_off_mesh_con_count * 2;

        let mut edge_count = 0;
        let mut portal_count = 0;
        for i in 0..params.poly_count {
            let p = params.poly(i);
            for j in 0..nvp {
                if p[j] == DT_MESH_NULL_IDX {
                    break;
                }
                edge_count += 1;
                if p[nvp + j] & 0x8000 != 0 && p[nvp + j] & 0xf != 0xf {
                    portal_count += 1;
                }
            }
        }
        let max_link_count = edge_count + portal_count * 2 + off_mesh_con_link_count * 2;

        let has_detail = !params.detail_meshes.is_empty();
        let (unique_detail_vert_count, detail_tri_count) = if has_detail {
            let mut unique = 0usize;
            for i in 0..params.poly_count {
                let p = params.poly(i);
                let ndv = params.detail_meshes[i * 4 + 1] as usize;
                let nv = p[..nvp].iter().take_while(|&&v| v != DT_MESH_NULL_IDX).count();
                unique += ndv.saturating_sub(nv);
            }
            (unique, params.detail_tri_count)
        } else {
            let tris = (0..params.poly_count)
                .map(|i| {
                    let p = params.poly(i);
                    let nv = p[..nvp].iter().take_while(|&&v| v != DT_MESH_NULL_IDX).count();
                    nv.saturating_sub(2)
                })
                .sum();
            (0, tris)
        };

        let header = MeshHeader {
            magic: DT_NAVMESH_MAGIC,
            version: DT_NAVMESH_VERSION,
            x: params.tile_x,
            y: params.tile_y,
            layer: params.tile_layer,
            user_id: params.user_id,
            poly_count: tot_poly_count as i32,
            vert_count: tot_vert_count as i32,
            max_link_count: max_link_count as i32,
            detail_mesh_count: params.poly_count as i32,
            detail_vert_count: unique_detail_vert_count as i32,
            detail_tri_count: detail_tri_count as i32,
            bv_node_count: 0,
            off_mesh_con_count: stored_off_mesh_con_count as i32,
            off_mesh_base: params.poly_count as i32,
            walkable_height: params.walkable_height,
            walkable_radius: params.walkable_radius,
            walkable_climb: params.walkable_climb,
            bmin: params.bmin,
            bmax: params.bmax,
            bv_quant_factor: 1.0 / params.cs,
        };

        // Vertices: mesh vertices, then off-mesh connection end points.
        let mut verts = Vec::with_capacity(tot_vert_count);
        for i in 0..params.vert_count {
            let iv = params.vert(i);
            verts.push([
                params.bmin[0] + iv[0] as f32 * params.cs,
                params.bmin[1] + iv[1] as f32 * params.ch,
                params.bmin[2] + iv[2] as f32 * params.cs,
            ]);
        }
        for i in 0..params.off_mesh_con_count {
            if off_mesh_class[i * 2] == 0xff {
                verts.push(params.off_mesh_point(i, 0));
                verts.push(params.off_mesh_point(i, 1));
            }
        }

        // Polygons, then off-mesh connection pseudo polygons.
        let mut polys = Vec::with_capacity(tot_poly_count);
        for i in 0..params.poly_count {
            let src = params.poly(i);
            let mut p = Poly {
                flags: params.poly_flags[i],
                ..Default::default()
            };
            p.set_area(params.poly_areas[i]);
            p.set_type(PolyType::Ground);

            for j in 0..nvp {
                if src[j] == DT_MESH_NULL_IDX {
                    break;
                }
                p.verts[j] = src[j];
                let nei = src[nvp + j];
                p.neis[j] = if nei & 0x8000 != 0 {
                    // Border edge, translate the polymesh side to a tile side.
                    match nei & 0xf {
                        0 => DT_EXT_LINK | 4,
                        1 => DT_EXT_LINK | 2,
                        2 => DT_EXT_LINK,
                        3 => DT_EXT_LINK | 6,
                        _ => 0,
                    }
                } else {
                    nei + 1
                };
                p.vert_count += 1;
            }
            polys.push(p);
        }

        let mut n = 0u16;
        for i in 0..params.off_mesh_con_count {
            if off_mesh_class[i * 2] != 0xff {
                continue;
            }
            let mut p = Poly {
                flags: params.off_mesh_con_flags[i],
                vert_count: 2,
                ..Default::default()
            };
            p.verts[0] = params.vert_count as u16 + n * 2;
            p.verts[1] = params.vert_count as u16 + n * 2 + 1;
            p.set_area(params.off_mesh_con_areas[i]);
            p.set_type(PolyType::OffMeshConnection);
            polys.push(p);
            n += 1;
        }

        // Detail meshes. Detail vertices repeat the polygon vertices first,
        // only the unique ones are stored.
        let mut detail_meshes = Vec::with_capacity(params.poly_count);
        let mut detail_verts = Vec::with_capacity(unique_detail_vert_count);
        let mut detail_tris = Vec::with_capacity(detail_tri_count);
        if has_detail {
            let mut vbase = 0u32;
            for (i, p) in polys.iter().take(params.poly_count).enumerate() {
                let vb = params.detail_meshes[i * 4] as usize;
                let ndv = params.detail_meshes[i * 4 + 1] as usize;
                let nv = p.vert_count as usize;
                let unique = ndv.saturating_sub(nv);
                detail_meshes.push(PolyDetail {
                    vert_base: vbase,
                    tri_base: params.detail_meshes[i * 4 + 2],
                    vert_count: unique as u8,
                    tri_count: params.detail_meshes[i * 4 + 3] as u8,
                });
                for k in (vb + nv)..(vb + ndv) {
                    detail_verts.push([
                        params.detail_verts[k * 3],
                        params.detail_verts[k * 3 + 1],
                        params.detail_verts[k * 3 + 2],
                    ]);
                }
                vbase += unique as u32;
            }
            for t in 0..params.detail_tri_count {
                detail_tris.push([
                    params.detail_tris[t * 4],
                    params.detail_tris[t * 4 + 1],
                    params.detail_tris[t * 4 + 2],
                    params.detail_tris[t * 4 + 3],
                ]);
            }
        } else {
            // Fan triangulation of each polygon with boundary edge flags.
            let mut tbase = 0u32;
            for p in polys.iter().take(params.poly_count) {
                let nv = p.vert_count as usize;
                detail_meshes.push(PolyDetail {
                    vert_base: 0,
                    tri_base: tbase,
                    vert_count: 0,
                    tri_count: nv.saturating_sub(2) as u8,
                });
                for j in 2..nv {
                    let mut flags = 1 << 2;
                    if j == 2 {
                        flags |= 1;
                    }
                    if j == nv - 1 {
                        flags |= 1 << 4;
                    }
                    detail_tris.push([0, (j - 1) as u8, j as u8, flags]);
                    tbase += 1;
                }
            }
        }

        let bv_tree = if params.build_bv_tree {
            Self::create_bv_tree(params)
        } else {
            Vec::new()
        };

        let mut off_mesh_cons = Vec::with_capacity(stored_off_mesh_con_count);
        let mut n = 0u16;
        for i in 0..params.off_mesh_con_count {
            if off_mesh_class[i * 2] != 0xff {
                continue;
            }
            let mut pos = [0.0; 6];
            pos.copy_from_slice(&params.off_mesh_con_verts[i * 6..i * 6 + 6]);
            off_mesh_cons.push(OffMeshConnection {
                pos,
                rad: params.off_mesh_con_rad[i],
                poly: params.poly_count as u16 + n,
                flags: if params.off_mesh_con_dir[i] != 0 {
                    DT_OFFMESH_CON_BIDIR
                } else {
                    0
                },
                side: off_mesh_class[i * 2 + 1],
                user_id: params.off_mesh_con_user_id[i],
            });
            n += 1;
        }

        let header = MeshHeader {
            bv_node_count: bv_tree.len() as i32,
            ..header
        };

        Ok(TileData {
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

    /// Builds the BV-tree over the ground polygons of a tile
    fn create_bv_tree(params: &NavMeshCreateParams) -> Vec<BVNode> {
        let nvp = params.nvp;
        let quant_factor = 1.0 / params.cs;
        let mut items = Vec::with_capacity(params.poly_count);

        for i in 0..params.poly_count {
            let mut it = BVItem {
                i: i as i32,
                ..Default::default()
            };

            if !params.detail_meshes.is_empty() {
                let vb = params.detail_meshes[i * 4] as usize;
                let ndv = params.detail_meshes[i * 4 + 1] as usize;
                let dv = |k: usize| {
                    [
                        params.detail_verts[k * 3],
                        params.detail_verts[k * 3 + 1],
                        params.detail_verts[k * 3 + 2],
                    ]
                };
                let mut bmin = dv(vb);
                let mut bmax = bmin;
                for k in 1..ndv {
                    bmin = dt_vmin(&bmin, &dv(vb + k));
                    bmax = dt_vmax(&bmax, &dv(vb + k));
                }

                // The tree uses cs for all dimensions.
                for k in 0..3 {
                    it.bmin[k] = quantize((bmin[k] - params.bmin[k]) * quant_factor);
                    it.bmax[k] = quantize((bmax[k] - params.bmin[k]) * quant_factor);
                }
            } else {
                let p = params.poly(i);
                it.bmin = params.vert(p[0] as usize);
                it.bmax = it.bmin;
                for &v in &p[1..nvp] {
                    if v == DT_MESH_NULL_IDX {
                        break;
                    }
                    let iv = params.vert(v as usize);
                    for k in 0..3 {
                        it.bmin[k] = it.bmin[k].min(iv[k]);
                        it.bmax[k] = it.bmax[k].max(iv[k]);
                    }
                }
                // Remap y from cell height to cell size units.
                it.bmin[1] = (it.bmin[1] as f32 * params.ch / params.cs).floor() as u16;
                it.bmax[1] = (it.bmax[1] as f32 * params.ch / params.cs).ceil() as u16;
            }
            items.push(it);
        }

        let mut nodes = Vec::with_capacity(items.len() * 2);
        if !items.is_empty() {
            subdivide(&mut items, &mut nodes);
        }
        nodes
    }
}

/// Shorthand for [`NavMeshBuilder::create_nav_mesh_data`]
pub fn create_nav_mesh_data(params: &NavMeshCreateParams) -> Result<Vec<u8>> {
    NavMeshBuilder::create_nav_mesh_data(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{grid_create_params, quad_create_params};

    #[test]
    fn test_classify_off_mesh_point() {
        let bmin = [0.0, 0.0, 0.0];
        let bmax = [1.0, 1.0, 1.0];
        assert_eq!(classify_off_mesh_point(&[0.5, 0.5, 0.5], &bmin, &bmax), 0xff);
        assert_eq!(classify_off_mesh_point(&[1.5, 0.5, 0.5], &bmin, &bmax), 0);
        assert_eq!(classify_off_mesh_point(&[1.5, 0.5, 1.5], &bmin, &bmax), 1);
        assert_eq!(classify_off_mesh_point(&[0.5, 0.5, 1.5], &bmin, &bmax), 2);
        assert_eq!(classify_off_mesh_point(&[-0.5, 0.5, 1.5], &bmin, &bmax), 3);
        assert_eq!(classify_off_mesh_point(&[-0.5, 0.5, 0.5], &bmin, &bmax), 4);
        assert_eq!(classify_off_mesh_point(&[-0.5, 0.5, -0.5], &bmin, &bmax), 5);
        assert_eq!(classify_off_mesh_point(&[0.5, 0.5, -0.5], &bmin, &bmax), 6);
        assert_eq!(classify_off_mesh_point(&[1.5, 0.5, -0.5], &bmin, &bmax), 7);
    }

    #[test]
    fn test_invalid_params() {
        let params = NavMeshCreateParams::default();
        assert!(NavMeshBuilder::create_nav_mesh_data(&params).is_err());

        let mut params = quad_create_params();
        params.nvp = 7;
        let err = NavMeshBuilder::create_nav_mesh_data(&params).unwrap_err();
        assert!(err.has_detail(DtStatus::DT_INVALID_PARAM));
    }

    #[test]
    fn test_quad_tile_counts() {
        let tile = NavMeshBuilder::build_tile_data(&quad_create_params()).unwrap();
        assert_eq!(tile.header.poly_count, 1);
        assert_eq!(tile.header.vert_count, 4);
        // Four edges, no portals, no off-mesh links.
        assert_eq!(tile.header.max_link_count, 4);
        assert_eq!(tile.header.detail_tri_count, 2);
        assert_eq!(tile.header.bv_node_count, 1);
        assert_eq!(tile.detail_tris[0], [0, 1, 2, 0b0000_0101]);
        assert_eq!(tile.detail_tris[1], [0, 2, 3, 0b0001_0100]);
    }

    #[test]
    fn test_bv_tree_escape_indices() {
        let tile = NavMeshBuilder::build_tile_data(&grid_create_params(3, 3, 0, 0)).unwrap();
        let n = tile.bv_tree.len();
        assert_eq!(n, 2 * 9 - 1);

        let leaves: Vec<i32> = tile.bv_tree.iter().filter(|b| b.i >= 0).map(|b| b.i).collect();
        assert_eq!(leaves.len(), 9);

        // The root escapes past the whole tree.
        assert_eq!(tile.bv_tree[0].i, -(n as i32));
        for (i, node) in tile.bv_tree.iter().enumerate() {
            if node.i < 0 {
                assert!(i + (-node.i) as usize <= n);
            }
        }
    }

    #[test]
    fn test_border_codes_become_tile_sides() {
        let tile = NavMeshBuilder::build_tile_data(&grid_create_params(1, 1, 0, 0)).unwrap();
        let p = &tile.polys[0];
        let mut sides: Vec<u16> = p.neis[..p.vert_count as usize]
            .iter()
            .map(|n| {
                assert!(n & DT_EXT_LINK != 0);
                n & 0xff
            })
            .collect();
        sides.sort();
        assert_eq!(sides, vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_off_mesh_connection_stored_after_ground_polys() {
        let params = quad_create_params().with_off_mesh_connection(
            [0.1, 0.0, 0.1],
            [5.0, 0.0, 0.5],
            0.2,
            true,
            1,
            PolyFlags::JUMP,
            42,
        );
        let tile = NavMeshBuilder::build_tile_data(&params).unwrap();
        assert_eq!(tile.header.poly_count, 2);
        assert_eq!(tile.header.off_mesh_base, 1);
        assert_eq!(tile.off_mesh_cons.len(), 1);

        let con = &tile.off_mesh_cons[0];
        assert_eq!(con.poly, 1);
        assert_eq!(con.side, 0);
        assert_eq!(con.user_id, 42);
        assert!(con.is_bidirectional());
        assert!(tile.polys[1].is_off_mesh_connection());
        assert_eq!(tile.polys[1].area(), 1);
    }

    #[test]
    fn test_off_mesh_start_outside_tile_is_dropped() {
        let params = quad_create_params().with_off_mesh_connection(
            [5.0, 0.0, 0.5],
            [0.5, 0.0, 0.5],
            0.2,
            false,
            0,
            PolyFlags::WALK,
            0,
        );
        let tile = NavMeshBuilder::build_tile_data(&params).unwrap();
        assert_eq!(tile.header.off_mesh_con_count, 0);
        assert_eq!(tile.header.poly_count, 1);
        // The landing end still reserves link slots.
        assert_eq!(tile.header.max_link_count, 4 + 2);
    }
}
