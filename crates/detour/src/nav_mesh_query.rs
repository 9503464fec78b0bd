//! Navigation mesh query implementation for Detour
//!
//! [`NavMeshQuery`] borrows a [`NavMesh`] and owns the scratch state needed
//! by graph searches: a node pool sized at construction, a small pool for
//! local searches and the open list.

use bitflags::bitflags;

use crate::detour_common::{
    dt_distance_pt_poly_edges_sqr, dt_distance_pt_seg_sqr2d, dt_intersect_seg_seg2d,
    dt_intersect_segment_poly2d, dt_next_pow2, dt_point_in_polygon, dt_poly_area2d,
    dt_random_point_in_convex_poly, dt_sqr, dt_tri_area2d, dt_vadd, dt_vdist, dt_vdist_sqr,
    dt_vequal, dt_visfinite, dt_visfinite2d, dt_vlerp, dt_vmad, dt_vnormalize, dt_vsub,
};
use crate::nav_mesh::{MeshTile, Poly};
use crate::node_pool::{NodeFlags, NodePool, NodeQueue, DT_MAX_NODE_POOL_SIZE, DT_MAX_STATES_PER_NODE};
use crate::poly_query::{FindNearestPolyQuery, PolyQuery, POLY_QUERY_BATCH};
use crate::raycast_hit::{RaycastHit, RaycastOptions};
use crate::sliced_pathfinding::SlicedFindPath;
use crate::{
    DtStatus, NavMesh, PolyRef, PolyType, QueryFilter, Result, DT_EXT_LINK, DT_VERTS_PER_POLYGON,
};

/// Heuristic scale. Slightly below one so the estimate stays admissible
/// under float error.
pub(crate) const H_SCALE: f32 = 0.999;

const TINY_NODE_POOL_SIZE: usize = 64;
const TINY_NODE_HASH_SIZE: usize = 32;

/// Queue bound of the breadth-first search in `move_along_surface`
const MOVE_ALONG_SURFACE_MAX_STACK: usize = 48;

/// Neighbours collected per polygon edge
const MAX_EDGE_NEIGHBOURS: usize = 8;

bitflags! {
    /// Options for sliced path searches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FindPathOptions: u32 {
        /// Shortcut through line of sight to the grandparent node
        const ANY_ANGLE = 0x02;
    }
}

bitflags! {
    /// Flags attached to each straight path vertex
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StraightPathFlags: u8 {
        /// The vertex is the start position
        const START = 0x01;
        /// The vertex is the end position
        const END = 0x02;
        /// The vertex is the start of an off-mesh connection
        const OFFMESH_CONNECTION = 0x04;
    }
}

bitflags! {
    /// Extra vertices emitted by [`NavMeshQuery::find_straight_path`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StraightPathOptions: u32 {
        /// Add a vertex at every polygon edge crossing where the area changes
        const AREA_CROSSINGS = 0x01;
        /// Add a vertex at every polygon edge crossing
        const ALL_CROSSINGS = 0x02;
    }
}

/// Result of [`NavMeshQuery::find_nearest_poly`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoly {
    /// Nearest polygon, [`PolyRef::NULL`] when nothing was in range
    pub poly_ref: PolyRef,
    /// Closest point on the nearest polygon
    pub point: [f32; 3],
    /// True if the point lies directly over the polygon
    pub is_over_poly: bool,
}

/// Polygon corridor returned by path searches
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    pub path: Vec<PolyRef>,
    /// Success, possibly with `PartialResult`, `OutOfNodes` or `BufferTooSmall`
    pub status: DtStatus,
}

impl PathResult {
    /// True if the path does not reach the requested end polygon
    pub fn is_partial(&self) -> bool {
        self.status.has_detail(DtStatus::DT_PARTIAL_RESULT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightPathPoint {
    pub pos: [f32; 3],
    pub flags: StraightPathFlags,
    /// Polygon entered at this vertex, null at the end
    pub poly_ref: PolyRef,
}

/// Corner points of a string-pulled corridor
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StraightPath {
    pub points: Vec<StraightPathPoint>,
    pub status: DtStatus,
}

impl StraightPath {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn positions(&self) -> Vec<[f32; 3]> {
        self.points.iter().map(|p| p.pos).collect()
    }
}

/// Polygons reached by [`NavMeshQuery::find_polys_around_circle`], in the
/// order they were settled
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CirclePolys {
    pub refs: Vec<PolyRef>,
    /// Parent of each polygon in the search tree, null for the start
    pub parents: Vec<PolyRef>,
    /// Search cost of each polygon
    pub costs: Vec<f32>,
    pub status: DtStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveAlongSurfaceResult {
    /// Reachable position closest to the target
    pub result_pos: [f32; 3],
    /// Polygons visited from the start to the polygon holding `result_pos`
    pub visited: Vec<PolyRef>,
    pub status: DtStatus,
}

/// Collects straight path vertices up to a fixed count.
struct StraightPathBuilder {
    points: Vec<StraightPathPoint>,
    max_points: usize,
}

impl StraightPathBuilder {
    fn new(max_points: usize) -> Self {
        Self {
            points: Vec::with_capacity(max_points.min(256)),
            max_points,
        }
    }

    fn last_pos(&self) -> [f32; 3] {
        self.points.last().map_or([0.0; 3], |p| p.pos)
    }

    /// Appends a vertex or, when it coincides with the previous one, updates
    /// that vertex. Returns in-progress while more vertices may follow.
    fn append_vertex(&mut self, pos: &[f32; 3], flags: StraightPathFlags, poly_ref: PolyRef) -> DtStatus {
        if let Some(last) = self.points.last_mut() {
            if dt_vequal(&last.pos, pos) {
                last.flags = flags;
                last.poly_ref = poly_ref;
                return DtStatus::in_progress();
            }
        }

        self.points.push(StraightPathPoint {
            pos: *pos,
            flags,
            poly_ref,
        });

        if flags == StraightPathFlags::END {
            return DtStatus::success();
        }
        if self.points.len() >= self.max_points {
            return DtStatus::success_detail(DtStatus::DT_BUFFER_TOO_SMALL);
        }
        DtStatus::in_progress()
    }

    fn finish(self, status: DtStatus) -> StraightPath {
        StraightPath {
            points: self.points,
            status,
        }
    }
}

fn apex_flags(poly_ref: PolyRef, poly_type: PolyType) -> StraightPathFlags {
    if poly_ref.is_null() {
        StraightPathFlags::END
    } else if poly_type == PolyType::OffMeshConnection {
        StraightPathFlags::OFFMESH_CONNECTION
    } else {
        StraightPathFlags::empty()
    }
}

/// Navigation mesh query structure
#[derive(Debug)]
pub struct NavMeshQuery<'a> {
    nav_mesh: &'a NavMesh,
    pub(crate) node_pool: NodePool,
    tiny_node_pool: NodePool,
    pub(crate) open_list: NodeQueue,
    /// State of the sliced path search
    pub(crate) sliced: SlicedFindPath,
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query object whose graph searches may touch at most
    /// `max_nodes` polygons
    pub fn new(nav_mesh: &'a NavMesh, max_nodes: usize) -> Result<Self> {
        if max_nodes == 0 || max_nodes > DT_MAX_NODE_POOL_SIZE {
            return Err(DtStatus::invalid_param());
        }

        Ok(Self {
            nav_mesh,
            node_pool: NodePool::new(max_nodes, Self::hash_size_for(max_nodes)),
            tiny_node_pool: NodePool::new(TINY_NODE_POOL_SIZE, TINY_NODE_HASH_SIZE),
            open_list: NodeQueue::new(max_nodes),
            sliced: SlicedFindPath::default(),
        })
    }

    /// Re-targets the query at `nav_mesh`. The node pool is only reallocated
    /// when `max_nodes` exceeds its current size.
    pub fn init(&mut self, nav_mesh: &'a NavMesh, max_nodes: usize) -> Result<()> {
        if max_nodes == 0 || max_nodes > DT_MAX_NODE_POOL_SIZE {
            return Err(DtStatus::invalid_param());
        }

        self.nav_mesh = nav_mesh;
        if self.node_pool.max_nodes() < max_nodes {
            self.node_pool = NodePool::new(max_nodes, Self::hash_size_for(max_nodes));
        } else {
            self.node_pool.clear();
        }
        self.tiny_node_pool.clear();
        if self.open_list.capacity() < max_nodes {
            self.open_list = NodeQueue::new(max_nodes);
        } else {
            self.open_list.clear();
        }
        self.sliced = SlicedFindPath::default();
        Ok(())
    }

    fn hash_size_for(max_nodes: usize) -> usize {
        (dt_next_pow2((max_nodes / 4) as u32) as usize).max(1)
    }

    /// The mesh this query runs against
    pub fn get_attached_nav_mesh(&self) -> &'a NavMesh {
        self.nav_mesh
    }

    /// Node pool of the last graph search
    pub fn get_node_pool(&self) -> &NodePool {
        &self.node_pool
    }

    /// Checks that `poly_ref` resolves and passes `filter`
    pub fn is_valid_poly_ref(&self, poly_ref: PolyRef, filter: &QueryFilter) -> bool {
        match self.nav_mesh.get_tile_and_poly_by_ref(poly_ref) {
            Ok((tile, poly)) => filter.pass_filter(poly_ref, tile, poly),
            Err(_) => false,
        }
    }

    /// True if the last graph search closed a node for `poly_ref`
    pub fn is_in_closed_list(&self, poly_ref: PolyRef) -> bool {
        self.node_pool
            .find_nodes(poly_ref, DT_MAX_STATES_PER_NODE)
            .into_iter()
            .any(|i| self.node_pool.node(i).has_flag(NodeFlags::CLOSED))
    }

    // ------------------------------------------------------------------
    // Spatial queries
    // ------------------------------------------------------------------

    /// Hands every polygon overlapping the box `center ± half_extents` and
    /// passing `filter` to `query`, tile by tile
    pub fn query_polygons_with<Q: PolyQuery>(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &QueryFilter,
        query: &mut Q,
    ) -> Result<()> {
        if !dt_visfinite(center)
            || !dt_visfinite(half_extents)
            || half_extents.iter().any(|&h| h < 0.0)
        {
            return Err(DtStatus::invalid_param());
        }

        let nav = self.nav_mesh;
        let bmin = dt_vsub(center, half_extents);
        let bmax = dt_vadd(center, half_extents);
        let (minx, miny) = nav.calc_tile_loc(&bmin);
        let (maxx, maxy) = nav.calc_tile_loc(&bmax);

        for y in miny..=maxy {
            for x in minx..=maxx {
                for idx in nav.tile_indices_at(x, y) {
                    self.query_polygons_in_tile(idx, &bmin, &bmax, filter, query);
                }
            }
        }
        Ok(())
    }

    fn query_polygons_in_tile<Q: PolyQuery>(
        &self,
        idx: usize,
        qmin: &[f32; 3],
        qmax: &[f32; 3],
        filter: &QueryFilter,
        query: &mut Q,
    ) {
        let nav = self.nav_mesh;
        let Some(tile) = nav.get_tile(idx) else {
            return;
        };

        let mut refs = Vec::with_capacity(POLY_QUERY_BATCH);
        let mut polys: Vec<&Poly> = Vec::with_capacity(POLY_QUERY_BATCH);
        for r in nav.query_polygons_in_tile(idx, qmin, qmax, usize::MAX) {
            let poly = &tile.polys[nav.decode_poly_id_poly(r) as usize];
            if !filter.pass_filter(r, tile, poly) {
                continue;
            }
            refs.push(r);
            polys.push(poly);
            if refs.len() == POLY_QUERY_BATCH {
                query.process(tile, &polys, &refs);
                refs.clear();
                polys.clear();
            }
        }
        if !refs.is_empty() {
            query.process(tile, &polys, &refs);
        }
    }

    /// Collects up to `max_polys` polygons overlapping the query box. The
    /// status carries `BufferTooSmall` when more were found.
    pub fn query_polygons(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &QueryFilter,
        max_polys: usize,
    ) -> Result<(Vec<PolyRef>, DtStatus)> {
        if max_polys == 0 {
            return Err(DtStatus::invalid_param());
        }
        let mut collector = crate::CollectPolysQuery::new(max_polys);
        self.query_polygons_with(center, half_extents, filter, &mut collector)?;

        let status = if collector.overflow() {
            DtStatus::success_detail(DtStatus::DT_BUFFER_TOO_SMALL)
        } else {
            DtStatus::success()
        };
        Ok((collector.into_polys(), status))
    }

    /// Finds the polygon nearest to `center` within `half_extents`. A
    /// polygon directly below or above wins over one beside the point.
    pub fn find_nearest_poly(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<NearestPoly> {
        let mut query = FindNearestPolyQuery::new(self.nav_mesh, center);
        self.query_polygons_with(center, half_extents, filter, &mut query)?;

        Ok(NearestPoly {
            poly_ref: query.nearest_ref(),
            point: *query.nearest_point(),
            is_over_poly: query.is_over_poly(),
        })
    }

    /// Closest point on the polygon's detail surface, and whether `pos`
    /// lies over the polygon
    pub fn closest_point_on_poly(&self, poly_ref: PolyRef, pos: &[f32; 3]) -> Result<([f32; 3], bool)> {
        if !dt_visfinite(pos) {
            return Err(DtStatus::invalid_param());
        }
        self.nav_mesh.closest_point_on_poly(poly_ref, pos)
    }

    /// `pos` itself when inside the polygon in the xz-plane, otherwise the
    /// closest point on its boundary. Ignores the detail mesh.
    pub fn closest_point_on_poly_boundary(&self, poly_ref: PolyRef, pos: &[f32; 3]) -> Result<[f32; 3]> {
        let (tile, poly) = self.nav_mesh.get_tile_and_poly_by_ref(poly_ref)?;
        if !dt_visfinite(pos) {
            return Err(DtStatus::invalid_param());
        }

        let (verts, nv) = tile.poly_verts(poly);
        let mut edge_dist = [0.0f32; DT_VERTS_PER_POLYGON];
        let mut edge_t = [0.0f32; DT_VERTS_PER_POLYGON];
        let inside = dt_distance_pt_poly_edges_sqr(pos, &verts[..nv], &mut edge_dist[..nv], &mut edge_t[..nv]);
        if inside {
            return Ok(*pos);
        }

        let mut imin = 0;
        for i in 1..nv {
            if edge_dist[i] < edge_dist[imin] {
                imin = i;
            }
        }
        Ok(dt_vlerp(&verts[imin], &verts[(imin + 1) % nv], edge_t[imin]))
    }

    /// Height of the polygon surface under `pos`. Off-mesh connections
    /// interpolate between their endpoints.
    pub fn get_poly_height(&self, poly_ref: PolyRef, pos: &[f32; 3]) -> Result<f32> {
        let nav = self.nav_mesh;
        let (tile, poly) = nav.get_tile_and_poly_by_ref(poly_ref)?;
        if !dt_visfinite2d(pos) {
            return Err(DtStatus::invalid_param());
        }

        if poly.is_off_mesh_connection() {
            let v0 = &tile.verts[poly.verts[0] as usize];
            let v1 = &tile.verts[poly.verts[1] as usize];
            let (_, t) = dt_distance_pt_seg_sqr2d(pos, v0, v1);
            return Ok(v0[1] + (v1[1] - v0[1]) * t);
        }

        let ip = nav.decode_poly_id_poly(poly_ref) as usize;
        nav.get_poly_height_in_tile(tile, ip, poly, pos)
            .ok_or(DtStatus::invalid_param())
    }

    // ------------------------------------------------------------------
    // Portals
    // ------------------------------------------------------------------

    /// Left and right end of the portal between two adjacent polygons.
    /// Both ends are the connection point when either is an off-mesh link.
    pub fn get_portal_points(&self, from_ref: PolyRef, to_ref: PolyRef) -> Result<([f32; 3], [f32; 3])> {
        let (left, right, _) = self.portal_points_by_ref(from_ref, to_ref)?;
        Ok((left, right))
    }

    /// Midpoint of the portal between two adjacent polygons
    pub fn get_edge_mid_point(&self, from_ref: PolyRef, to_ref: PolyRef) -> Result<[f32; 3]> {
        let (left, right, _) = self.portal_points_by_ref(from_ref, to_ref)?;
        Ok(dt_vlerp(&left, &right, 0.5))
    }

    fn portal_points_by_ref(&self, from_ref: PolyRef, to_ref: PolyRef) -> Result<([f32; 3], [f32; 3], PolyType)> {
        let nav = self.nav_mesh;
        let (from_tile, from_poly) = nav.get_tile_and_poly_by_ref(from_ref)?;
        let (to_tile, to_poly) = nav.get_tile_and_poly_by_ref(to_ref)?;
        let (left, right) = self.portal_points(from_ref, from_poly, from_tile, to_ref, to_poly, to_tile)?;
        Ok((left, right, to_poly.poly_type()))
    }

    pub(crate) fn portal_points(
        &self,
        from_ref: PolyRef,
        from_poly: &Poly,
        from_tile: &MeshTile,
        to_ref: PolyRef,
        to_poly: &Poly,
        to_tile: &MeshTile,
    ) -> Result<([f32; 3], [f32; 3])> {
        let Some(link) = from_tile
            .poly_links(from_poly)
            .find(|l| l.reference == to_ref)
        else {
            return Err(DtStatus::invalid_param());
        };

        // Off-mesh connections collapse the portal to their endpoint.
        if from_poly.is_off_mesh_connection() {
            let v = from_tile.verts[from_poly.verts[link.edge as usize] as usize];
            return Ok((v, v));
        }
        if to_poly.is_off_mesh_connection() {
            let Some(back) = to_tile.poly_links(to_poly).find(|l| l.reference == from_ref) else {
                return Err(DtStatus::failure());
            };
            let v = to_tile.verts[to_poly.verts[back.edge as usize] as usize];
            return Ok((v, v));
        }

        let nv = from_poly.vert_count as usize;
        let v0 = from_tile.verts[from_poly.verts[link.edge as usize] as usize];
        let v1 = from_tile.verts[from_poly.verts[(link.edge as usize + 1) % nv] as usize];

        // Cross-tile links may only cover part of the edge.
        if link.side != 0xff && (link.bmin != 0 || link.bmax != 255) {
            let s = 1.0 / 255.0;
            let tmin = link.bmin as f32 * s;
            let tmax = link.bmax as f32 * s;
            return Ok((dt_vlerp(&v0, &v1, tmin), dt_vlerp(&v0, &v1, tmax)));
        }

        Ok((v0, v1))
    }

    fn edge_mid_point(
        &self,
        from_ref: PolyRef,
        from_poly: &Poly,
        from_tile: &MeshTile,
        to_ref: PolyRef,
        to_poly: &Poly,
        to_tile: &MeshTile,
    ) -> Option<[f32; 3]> {
        self.portal_points(from_ref, from_poly, from_tile, to_ref, to_poly, to_tile)
            .ok()
            .map(|(l, r)| dt_vlerp(&l, &r, 0.5))
    }

    // ------------------------------------------------------------------
    // Path search
    // ------------------------------------------------------------------

    /// A* search over the polygon graph from `start_ref` to `end_ref`.
    ///
    /// Edge costs are measured between portal midpoints and scaled by the
    /// area cost of the polygon being crossed. When the end is unreachable or
    /// the node pool runs out, the path leads to the node closest to the end
    /// and the status carries `PartialResult`.
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<PathResult> {
        let nav = self.nav_mesh;
        if !nav.is_valid_poly_ref(start_ref)
            || !nav.is_valid_poly_ref(end_ref)
            || !dt_visfinite(start_pos)
            || !dt_visfinite(end_pos)
            || max_path == 0
        {
            return Err(DtStatus::invalid_param());
        }

        if start_ref == end_ref {
            return Ok(PathResult {
                path: vec![start_ref],
                status: DtStatus::success(),
            });
        }

        self.node_pool.clear();
        self.open_list.clear();

        let start = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(DtStatus::failure_detail(DtStatus::DT_OUT_OF_NODES))?;
        let start_total = dt_vdist(start_pos, end_pos) * H_SCALE;
        {
            let node = self.node_pool.node_mut(start);
            node.pos = *start_pos;
            node.set_parent(0);
            node.cost = 0.0;
            node.total = start_total;
            node.set_flags(NodeFlags::OPEN);
        }
        self.open_list.push(start, start_total);

        let mut last_best = start;
        let mut last_best_cost = start_total;
        let mut out_of_nodes = false;

        while let Some(best) = self.open_list.pop() {
            let (best_ref, best_pos, best_cost, best_parent) = {
                let node = self.node_pool.node_mut(best);
                node.remove_flags(NodeFlags::OPEN);
                node.add_flags(NodeFlags::CLOSED);
                (node.id, node.pos, node.cost, node.parent())
            };

            if best_ref == end_ref {
                last_best = best;
                break;
            }

            let (best_tile, best_poly) = nav.get_tile_and_poly_by_ref_unchecked(best_ref);
            let parent_ref = self
                .node_pool
                .node_at_idx(best_parent)
                .map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);

            for link in best_tile.poly_links(best_poly) {
                let neighbour_ref = link.reference;
                if neighbour_ref.is_null() || neighbour_ref == parent_ref {
                    continue;
                }

                let (neighbour_tile, neighbour_poly) = nav.get_tile_and_poly_by_ref_unchecked(neighbour_ref);
                if !filter.pass_filter(neighbour_ref, neighbour_tile, neighbour_poly) {
                    continue;
                }

                // Each tile border side gets its own search state.
                let cross_side = if link.side != 0xff { link.side >> 1 } else { 0 };

                let Some(neighbour) = self.node_pool.get_node(neighbour_ref, cross_side) else {
                    out_of_nodes = true;
                    continue;
                };

                if self.node_pool.node(neighbour).flags().is_empty() {
                    if let Some(mid) = self.edge_mid_point(
                        best_ref,
                        best_poly,
                        best_tile,
                        neighbour_ref,
                        neighbour_poly,
                        neighbour_tile,
                    ) {
                        self.node_pool.node_mut(neighbour).pos = mid;
                    }
                }

                let neighbour_pos = self.node_pool.node(neighbour).pos;
                let cur_cost = filter.get_cost(&best_pos, &neighbour_pos, best_poly);
                let (cost, heuristic) = if neighbour_ref == end_ref {
                    let end_cost = filter.get_cost(&neighbour_pos, end_pos, neighbour_poly);
                    (best_cost + cur_cost + end_cost, 0.0)
                } else {
                    (best_cost + cur_cost, dt_vdist(&neighbour_pos, end_pos) * H_SCALE)
                };
                let total = cost + heuristic;

                let parent_idx = self.node_pool.node_idx(best);
                let node = self.node_pool.node_mut(neighbour);
                let flags = node.flags();
                if flags.intersects(NodeFlags::OPEN | NodeFlags::CLOSED) && total >= node.total {
                    continue;
                }

                node.set_parent(parent_idx);
                node.id = neighbour_ref;
                node.remove_flags(NodeFlags::CLOSED);
                node.cost = cost;
                node.total = total;

                if flags.contains(NodeFlags::OPEN) {
                    self.open_list.modify(neighbour, total);
                } else {
                    node.add_flags(NodeFlags::OPEN);
                    self.open_list.push(neighbour, total);
                }

                if heuristic < last_best_cost {
                    last_best_cost = heuristic;
                    last_best = neighbour;
                }
            }
        }

        let (path, mut status) = self.path_to_node(last_best, max_path);
        if self.node_pool.node(last_best).id != end_ref {
            status |= DtStatus::DT_PARTIAL_RESULT;
        }
        if out_of_nodes {
            status |= DtStatus::DT_OUT_OF_NODES;
        }

        if status.has_detail(DtStatus::DT_PARTIAL_RESULT) {
            log::debug!(
                "find_path {:?} -> {:?}: partial result with {} polys",
                start_ref,
                end_ref,
                path.len()
            );
        }
        Ok(PathResult { path, status })
    }

    /// Walks parent links back from `end` and returns the first `max_path`
    /// polygons from the start.
    pub(crate) fn path_to_node(&self, end: usize, max_path: usize) -> (Vec<PolyRef>, DtStatus) {
        let pool = &self.node_pool;
        let mut path = Vec::new();
        let mut cur = Some(end);
        while let Some(i) = cur {
            let node = pool.node(i);
            path.push(node.id);
            cur = pool.node_at_idx(node.parent());
        }
        path.reverse();

        if path.len() > max_path {
            path.truncate(max_path);
            (path, DtStatus::success_detail(DtStatus::DT_BUFFER_TOO_SMALL))
        } else {
            (path, DtStatus::success())
        }
    }

    /// Path from the start of the last Dijkstra search, such as
    /// [`NavMeshQuery::find_polys_around_circle`], to `end_ref`
    pub fn get_path_from_dijkstra_search(&self, end_ref: PolyRef, max_path: usize) -> Result<PathResult> {
        if !self.nav_mesh.is_valid_poly_ref(end_ref) || max_path == 0 {
            return Err(DtStatus::invalid_param());
        }
        let end = self
            .node_pool
            .find_node(end_ref, 0)
            .filter(|&i| self.node_pool.node(i).has_flag(NodeFlags::CLOSED))
            .ok_or(DtStatus::invalid_param())?;

        let (path, status) = self.path_to_node(end, max_path);
        Ok(PathResult { path, status })
    }

    // ------------------------------------------------------------------
    // Raycast
    // ------------------------------------------------------------------

    /// Casts a ray along the surface from `start_pos` towards `end_pos`.
    ///
    /// The ray stops at the first wall, at a polygon rejected by `filter` or
    /// at an off-mesh connection. `t` is `f32::MAX` when the end position
    /// was reached.
    pub fn raycast(
        &self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        options: RaycastOptions,
        max_path: usize,
    ) -> Result<RaycastHit> {
        let nav = self.nav_mesh;
        if !nav.is_valid_poly_ref(start_ref) || !dt_visfinite(start_pos) || !dt_visfinite(end_pos) {
            return Err(DtStatus::invalid_param());
        }

        let mut hit = RaycastHit::default();
        let dir = dt_vsub(end_pos, start_pos);
        let mut cur_pos = *start_pos;
        let mut cur_ref = start_ref;
        let (mut tile, mut poly) = nav.get_tile_and_poly_by_ref_unchecked(cur_ref);

        loop {
            let (verts, nv) = tile.poly_verts(poly);
            let Some(clip) = dt_intersect_segment_poly2d(start_pos, end_pos, &verts[..nv]) else {
                // The ray misses this polygon; keep the t reached so far.
                return Ok(hit);
            };

            hit.hit_edge_index = clip.seg_max.map_or(-1, |e| e as i32);
            if clip.tmax > hit.t {
                hit.t = clip.tmax;
            }

            if hit.path.len() < max_path {
                hit.path.push(cur_ref);
            } else {
                hit.status |= DtStatus::DT_BUFFER_TOO_SMALL;
            }

            let Some(seg_max) = clip.seg_max else {
                // The end lies inside this polygon.
                hit.t = f32::MAX;
                if options.contains(RaycastOptions::USE_COSTS) {
                    hit.path_cost += filter.get_cost(&cur_pos, end_pos, poly);
                }
                return Ok(hit);
            };

            let mut next = None;
            for link in tile.poly_links(poly) {
                if link.edge as usize != seg_max || link.reference.is_null() {
                    continue;
                }

                let (next_tile, next_poly) = nav.get_tile_and_poly_by_ref_unchecked(link.reference);
                if next_poly.is_off_mesh_connection()
                    || !filter.pass_filter(link.reference, next_tile, next_poly)
                {
                    continue;
                }

                if link.side == 0xff || (link.bmin == 0 && link.bmax == 255) {
                    next = Some((link.reference, next_tile, next_poly));
                    break;
                }

                // Partial portal: check the crossing against the link range.
                let axis = match link.side {
                    0 | 4 => 2,
                    2 | 6 => 0,
                    _ => continue,
                };
                let left = tile.verts[poly.verts[link.edge as usize] as usize];
                let right = tile.verts[poly.verts[(link.edge as usize + 1) % nv] as usize];
                let s = 1.0 / 255.0;
                let mut lmin = left[axis] + (right[axis] - left[axis]) * (link.bmin as f32 * s);
                let mut lmax = left[axis] + (right[axis] - left[axis]) * (link.bmax as f32 * s);
                if lmin > lmax {
                    std::mem::swap(&mut lmin, &mut lmax);
                }
                let p = start_pos[axis] + (end_pos[axis] - start_pos[axis]) * clip.tmax;
                if p >= lmin && p <= lmax {
                    next = Some((link.reference, next_tile, next_poly));
                    break;
                }
            }

            if options.contains(RaycastOptions::USE_COSTS) {
                let last_pos = cur_pos;
                cur_pos = dt_vmad(start_pos, &dir, hit.t);

                // Lift the crossing point onto the edge height.
                let e1 = verts[seg_max];
                let e2 = verts[(seg_max + 1) % nv];
                let e_dir = dt_vsub(&e2, &e1);
                let diff = dt_vsub(&cur_pos, &e1);
                let s = if dt_sqr(e_dir[0]) > dt_sqr(e_dir[2]) {
                    diff[0] / e_dir[0]
                } else {
                    diff[2] / e_dir[2]
                };
                cur_pos[1] = e1[1] + e_dir[1] * s;

                hit.path_cost += filter.get_cost(&last_pos, &cur_pos, poly);
            }

            let Some((next_ref, next_tile, next_poly)) = next else {
                let va = verts[seg_max];
                let vb = verts[(seg_max + 1) % nv];
                let dx = vb[0] - va[0];
                let dz = vb[2] - va[2];
                hit.hit_normal = dt_vnormalize(&[dz, 0.0, -dx]);
                return Ok(hit);
            };

            cur_ref = next_ref;
            tile = next_tile;
            poly = next_poly;
        }
    }

    // ------------------------------------------------------------------
    // Straight path
    // ------------------------------------------------------------------

    /// String-pulls the polygon corridor `path` into corner points from
    /// `start_pos` to `end_pos`.
    ///
    /// When a later corridor polygon no longer resolves, the result ends at
    /// the last valid polygon with `PartialResult`.
    pub fn find_straight_path(
        &self,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        path: &[PolyRef],
        max_straight_path: usize,
        options: StraightPathOptions,
    ) -> Result<StraightPath> {
        if !dt_visfinite(start_pos)
            || !dt_visfinite(end_pos)
            || path.is_empty()
            || path[0].is_null()
            || max_straight_path == 0
        {
            return Err(DtStatus::invalid_param());
        }

        let closest_start = self.closest_point_on_poly_boundary(path[0], start_pos)?;
        let mut closest_end = self.closest_point_on_poly_boundary(path[path.len() - 1], end_pos)?;

        let mut out = StraightPathBuilder::new(max_straight_path);
        let stat = out.append_vertex(&closest_start, StraightPathFlags::START, path[0]);
        if !stat.is_in_progress() {
            return Ok(out.finish(stat));
        }

        let crossings = options.intersects(StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS);

        if path.len() > 1 {
            let mut portal_apex = closest_start;
            let mut portal_left = portal_apex;
            let mut portal_right = portal_apex;
            let mut apex_index = 0;
            let mut left_index = 0;
            let mut right_index = 0;
            let mut left_poly_type = PolyType::Ground;
            let mut right_poly_type = PolyType::Ground;
            let mut left_poly_ref = path[0];
            let mut right_poly_ref = path[0];

            let mut i = 0;
            while i < path.len() {
                let (left, right, to_type) = if i + 1 < path.len() {
                    match self.portal_points_by_ref(path[i], path[i + 1]) {
                        Ok(portal) => portal,
                        Err(_) => {
                            // path[i + 1] does not resolve: end at path[i].
                            closest_end = self.closest_point_on_poly_boundary(path[i], end_pos)?;
                            if crossings {
                                self.append_portals(&mut out, apex_index, i, &closest_end, path, options)?;
                            }
                            out.append_vertex(&closest_end, StraightPathFlags::empty(), path[i]);

                            let mut status = DtStatus::success_detail(DtStatus::DT_PARTIAL_RESULT);
                            if out.points.len() >= max_straight_path {
                                status |= DtStatus::DT_BUFFER_TOO_SMALL;
                            }
                            return Ok(out.finish(status));
                        }
                    }
                } else {
                    (closest_end, closest_end, PolyType::Ground)
                };

                // Skip a first portal the start position already touches.
                if i == 0 && i + 1 < path.len() {
                    let (d, _) = dt_distance_pt_seg_sqr2d(&portal_apex, &left, &right);
                    if d < dt_sqr(0.001) {
                        i += 1;
                        continue;
                    }
                }

                let next_ref = path.get(i + 1).copied().unwrap_or(PolyRef::NULL);

                // Right side of the funnel.
                if dt_tri_area2d(&portal_apex, &portal_right, &right) <= 0.0 {
                    if dt_vequal(&portal_apex, &portal_right)
                        || dt_tri_area2d(&portal_apex, &portal_left, &right) > 0.0
                    {
                        portal_right = right;
                        right_poly_ref = next_ref;
                        right_poly_type = to_type;
                        right_index = i;
                    } else {
                        // Right crossed over left: the left point is a corner.
                        if crossings {
                            let stat =
                                self.append_portals(&mut out, apex_index, left_index, &portal_left, path, options)?;
                            if !stat.is_in_progress() {
                                return Ok(out.finish(stat));
                            }
                        }

                        portal_apex = portal_left;
                        apex_index = left_index;

                        let stat = out.append_vertex(
                            &portal_apex,
                            apex_flags(left_poly_ref, left_poly_type),
                            left_poly_ref,
                        );
                        if !stat.is_in_progress() {
                            return Ok(out.finish(stat));
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left side of the funnel.
                if dt_tri_area2d(&portal_apex, &portal_left, &left) >= 0.0 {
                    if dt_vequal(&portal_apex, &portal_left)
                        || dt_tri_area2d(&portal_apex, &portal_right, &left) < 0.0
                    {
                        portal_left = left;
                        left_poly_ref = next_ref;
                        left_poly_type = to_type;
                        left_index = i;
                    } else {
                        if crossings {
                            let stat =
                                self.append_portals(&mut out, apex_index, right_index, &portal_right, path, options)?;
                            if !stat.is_in_progress() {
                                return Ok(out.finish(stat));
                            }
                        }

                        portal_apex = portal_right;
                        apex_index = right_index;

                        let stat = out.append_vertex(
                            &portal_apex,
                            apex_flags(right_poly_ref, right_poly_type),
                            right_poly_ref,
                        );
                        if !stat.is_in_progress() {
                            return Ok(out.finish(stat));
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }

            if crossings {
                let stat = self.append_portals(&mut out, apex_index, path.len() - 1, &closest_end, path, options)?;
                if !stat.is_in_progress() {
                    return Ok(out.finish(stat));
                }
            }
        }

        let stat = out.append_vertex(&closest_end, StraightPathFlags::END, PolyRef::NULL);
        let status = if stat.is_in_progress() {
            DtStatus::success()
        } else {
            stat
        };
        Ok(out.finish(status))
    }

    /// Adds the crossings of the segment from the last vertex to `end_pos`
    /// with the portals of `path[start_idx..=end_idx]`
    fn append_portals(
        &self,
        out: &mut StraightPathBuilder,
        start_idx: usize,
        end_idx: usize,
        end_pos: &[f32; 3],
        path: &[PolyRef],
        options: StraightPathOptions,
    ) -> Result<DtStatus> {
        let nav = self.nav_mesh;
        let start_pos = out.last_pos();

        for i in start_idx..end_idx {
            let from_ref = path[i];
            let (from_tile, from_poly) = nav.get_tile_and_poly_by_ref(from_ref)?;
            let to_ref = path[i + 1];
            let (to_tile, to_poly) = nav.get_tile_and_poly_by_ref(to_ref)?;

            let Ok((left, right)) = self.portal_points(from_ref, from_poly, from_tile, to_ref, to_poly, to_tile)
            else {
                break;
            };

            if options.contains(StraightPathOptions::AREA_CROSSINGS) && from_poly.area() == to_poly.area() {
                continue;
            }

            if let Some((_, t)) = dt_intersect_seg_seg2d(&start_pos, end_pos, &left, &right) {
                let pt = dt_vlerp(&left, &right, t);
                let stat = out.append_vertex(&pt, StraightPathFlags::empty(), to_ref);
                if !stat.is_in_progress() {
                    return Ok(stat);
                }
            }
        }
        Ok(DtStatus::in_progress())
    }

    // ------------------------------------------------------------------
    // Local searches
    // ------------------------------------------------------------------

    /// Dijkstra search from `start_ref` over polygons whose portals touch
    /// the circle at `center`. Polygons are reported when settled.
    pub fn find_polys_around_circle(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        radius: f32,
        filter: &QueryFilter,
        max_result: usize,
    ) -> Result<CirclePolys> {
        let nav = self.nav_mesh;
        if !nav.is_valid_poly_ref(start_ref)
            || !dt_visfinite(center)
            || !radius.is_finite()
            || radius < 0.0
            || max_result == 0
        {
            return Err(DtStatus::invalid_param());
        }

        self.start_dijkstra(start_ref, center)?;

        let mut result = CirclePolys {
            status: DtStatus::success(),
            ..Default::default()
        };
        let radius_sqr = dt_sqr(radius);

        while let Some(best) = self.open_list.pop() {
            let (best_ref, best_pos, best_total, best_parent) = self.close_node(best);
            let (best_tile, best_poly) = nav.get_tile_and_poly_by_ref_unchecked(best_ref);
            let parent_ref = self
                .node_pool
                .node_at_idx(best_parent)
                .map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);

            if result.refs.len() < max_result {
                result.refs.push(best_ref);
                result.parents.push(parent_ref);
                result.costs.push(best_total);
            } else {
                result.status |= DtStatus::DT_BUFFER_TOO_SMALL;
            }

            for link in best_tile.poly_links(best_poly) {
                let neighbour_ref = link.reference;
                if neighbour_ref.is_null() || neighbour_ref == parent_ref {
                    continue;
                }

                let (neighbour_tile, neighbour_poly) = nav.get_tile_and_poly_by_ref_unchecked(neighbour_ref);
                if !filter.pass_filter(neighbour_ref, neighbour_tile, neighbour_poly) {
                    continue;
                }

                let Ok((va, vb)) = self.portal_points(
                    best_ref,
                    best_poly,
                    best_tile,
                    neighbour_ref,
                    neighbour_poly,
                    neighbour_tile,
                ) else {
                    continue;
                };

                // Skip polygons the circle does not reach.
                let (dist_sqr, _) = dt_distance_pt_seg_sqr2d(center, &va, &vb);
                if dist_sqr > radius_sqr {
                    continue;
                }

                let Some(neighbour) = self.node_pool.get_node(neighbour_ref, 0) else {
                    result.status |= DtStatus::DT_OUT_OF_NODES;
                    continue;
                };

                let parent_idx = self.node_pool.node_idx(best);
                let node = self.node_pool.node_mut(neighbour);
                if node.has_flag(NodeFlags::CLOSED) {
                    continue;
                }
                if node.flags().is_empty() {
                    node.pos = dt_vlerp(&va, &vb, 0.5);
                }

                let total = best_total + filter.get_cost(&best_pos, &node.pos, best_poly);
                if node.has_flag(NodeFlags::OPEN) && total >= node.total {
                    continue;
                }

                node.id = neighbour_ref;
                node.set_parent(parent_idx);
                node.total = total;

                if node.has_flag(NodeFlags::OPEN) {
                    self.open_list.modify(neighbour, total);
                } else {
                    node.set_flags(NodeFlags::OPEN);
                    self.open_list.push(neighbour, total);
                }
            }
        }

        Ok(result)
    }

    /// Resets the search state and opens a zero cost node at `pos`
    fn start_dijkstra(&mut self, start_ref: PolyRef, pos: &[f32; 3]) -> Result<()> {
        self.node_pool.clear();
        self.open_list.clear();

        let start = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(DtStatus::failure_detail(DtStatus::DT_OUT_OF_NODES))?;
        let node = self.node_pool.node_mut(start);
        node.pos = *pos;
        node.set_parent(0);
        node.cost = 0.0;
        node.total = 0.0;
        node.set_flags(NodeFlags::OPEN);
        self.open_list.push(start, 0.0);
        Ok(())
    }

    /// Moves a popped node to the closed set, returning its ref, position,
    /// total cost and parent index
    fn close_node(&mut self, idx: usize) -> (PolyRef, [f32; 3], f32, u32) {
        let node = self.node_pool.node_mut(idx);
        node.remove_flags(NodeFlags::OPEN);
        node.add_flags(NodeFlags::CLOSED);
        (node.id, node.pos, node.total, node.parent())
    }

    /// Random point on the mesh. A tile is picked uniformly, then a polygon
    /// weighted by area, then a uniform point inside it.
    ///
    /// `frand` must return values in `[0, 1)`.
    pub fn find_random_point<F: FnMut() -> f32>(
        &self,
        filter: &QueryFilter,
        frand: &mut F,
    ) -> Result<(PolyRef, [f32; 3])> {
        let nav = self.nav_mesh;

        // Reservoir sample one tile; all tiles weigh the same.
        let mut chosen_tile = None;
        let mut tile_sum = 0.0;
        for i in 0..nav.get_max_tiles() {
            let Some(tile) = nav.get_tile(i) else {
                continue;
            };
            if tile.header.is_none() {
                continue;
            }
            let area = 1.0;
            tile_sum += area;
            if frand() * tile_sum <= area {
                chosen_tile = Some(i);
            }
        }
        let Some(tile_idx) = chosen_tile else {
            return Err(DtStatus::failure());
        };
        let Some(tile) = nav.get_tile(tile_idx) else {
            return Err(DtStatus::failure());
        };

        let base = nav.poly_ref_base_of(tile_idx);
        let mut chosen = None;
        let mut area_sum = 0.0;
        for (i, poly) in tile.polys.iter().enumerate() {
            if poly.is_off_mesh_connection() {
                continue;
            }
            let r = PolyRef::new(base.id() | i as u32);
            if !filter.pass_filter(r, tile, poly) {
                continue;
            }

            let (verts, nv) = tile.poly_verts(poly);
            let poly_area = dt_poly_area2d(&verts[..nv]);
            area_sum += poly_area;
            if frand() * area_sum <= poly_area {
                chosen = Some((r, poly));
            }
        }
        let Some((poly_ref, poly)) = chosen else {
            return Err(DtStatus::failure());
        };

        let pt = self.random_point_in_poly(tile, poly, poly_ref, frand)?;
        Ok((poly_ref, pt))
    }

    fn random_point_in_poly<F: FnMut() -> f32>(
        &self,
        tile: &MeshTile,
        poly: &Poly,
        poly_ref: PolyRef,
        frand: &mut F,
    ) -> Result<[f32; 3]> {
        let (verts, nv) = tile.poly_verts(poly);
        let mut areas = [0.0f32; DT_VERTS_PER_POLYGON];
        let s = frand();
        let t = frand();
        let mut pt = dt_random_point_in_convex_poly(&verts[..nv], &mut areas[..nv], s, t);
        pt[1] = self.get_poly_height(poly_ref, &pt)?;
        Ok(pt)
    }

    /// Random point on a polygon reachable from `start_ref` whose portals
    /// lie within `max_radius` of `center`. Polygons are weighted by area.
    pub fn find_random_point_around_circle<F: FnMut() -> f32>(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        max_radius: f32,
        filter: &QueryFilter,
        frand: &mut F,
    ) -> Result<(PolyRef, [f32; 3])> {
        let nav = self.nav_mesh;
        if !nav.is_valid_poly_ref(start_ref)
            || !dt_visfinite(center)
            || !max_radius.is_finite()
            || max_radius < 0.0
        {
            return Err(DtStatus::invalid_param());
        }

        let (start_tile, start_poly) = nav.get_tile_and_poly_by_ref_unchecked(start_ref);
        if !filter.pass_filter(start_ref, start_tile, start_poly) {
            return Err(DtStatus::invalid_param());
        }

        self.start_dijkstra(start_ref, center)?;

        let radius_sqr = dt_sqr(max_radius);
        let mut area_sum = 0.0;
        let mut chosen: Option<(PolyRef, &MeshTile, &Poly)> = None;

        while let Some(best) = self.open_list.pop() {
            let (best_ref, best_pos, best_total, best_parent) = self.close_node(best);
            let (best_tile, best_poly) = nav.get_tile_and_poly_by_ref_unchecked(best_ref);

            if !best_poly.is_off_mesh_connection() {
                let (verts, nv) = best_tile.poly_verts(best_poly);
                let poly_area = dt_poly_area2d(&verts[..nv]);
                area_sum += poly_area;
                if frand() * area_sum <= poly_area {
                    chosen = Some((best_ref, best_tile, best_poly));
                }
            }

            let parent_ref = self
                .node_pool
                .node_at_idx(best_parent)
                .map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);

            for link in best_tile.poly_links(best_poly) {
                let neighbour_ref = link.reference;
                if neighbour_ref.is_null() || neighbour_ref == parent_ref {
                    continue;
                }

                let (neighbour_tile, neighbour_poly) = nav.get_tile_and_poly_by_ref_unchecked(neighbour_ref);
                if !filter.pass_filter(neighbour_ref, neighbour_tile, neighbour_poly) {
                    continue;
                }

                let Ok((va, vb)) = self.portal_points(
                    best_ref,
                    best_poly,
                    best_tile,
                    neighbour_ref,
                    neighbour_poly,
                    neighbour_tile,
                ) else {
                    continue;
                };

                let (dist_sqr, _) = dt_distance_pt_seg_sqr2d(center, &va, &vb);
                if dist_sqr > radius_sqr {
                    continue;
                }

                let Some(neighbour) = self.node_pool.get_node(neighbour_ref, 0) else {
                    continue;
                };

                let parent_idx = self.node_pool.node_idx(best);
                let node = self.node_pool.node_mut(neighbour);
                if node.has_flag(NodeFlags::CLOSED) {
                    continue;
                }
                if node.flags().is_empty() {
                    node.pos = dt_vlerp(&va, &vb, 0.5);
                }

                let total = best_total + dt_vdist(&best_pos, &node.pos);
                if node.has_flag(NodeFlags::OPEN) && total >= node.total {
                    continue;
                }

                node.id = neighbour_ref;
                node.set_parent(parent_idx);
                node.total = total;

                if node.has_flag(NodeFlags::OPEN) {
                    self.open_list.modify(neighbour, total);
                } else {
                    node.set_flags(NodeFlags::OPEN);
                    self.open_list.push(neighbour, total);
                }
            }
        }

        let Some((poly_ref, tile, poly)) = chosen else {
            return Err(DtStatus::failure());
        };
        let pt = self.random_point_in_poly(tile, poly, poly_ref, frand)?;
        Ok((poly_ref, pt))
    }

    /// Slides from `start_pos` towards `end_pos` constrained to the mesh
    /// surface, using a small breadth-first search around the segment.
    ///
    /// The returned position is 2D; its height is left at the start height
    /// except when the target lies inside a visited polygon.
    pub fn move_along_surface(
        &mut self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_visited: usize,
    ) -> Result<MoveAlongSurfaceResult> {
        let nav = self.nav_mesh;
        if !nav.is_valid_poly_ref(start_ref)
            || !dt_visfinite(start_pos)
            || !dt_visfinite(end_pos)
            || max_visited == 0
        {
            return Err(DtStatus::invalid_param());
        }

        let mut status = DtStatus::success();
        let pool = &mut self.tiny_node_pool;
        pool.clear();

        let start = pool
            .get_node(start_ref, 0)
            .ok_or(DtStatus::failure_detail(DtStatus::DT_OUT_OF_NODES))?;
        {
            let node = pool.node_mut(start);
            node.set_parent(0);
            node.cost = 0.0;
            node.total = 0.0;
            node.set_flags(NodeFlags::CLOSED);
        }

        let mut queue = std::collections::VecDeque::with_capacity(MOVE_ALONG_SURFACE_MAX_STACK);
        queue.push_back(start);

        let mut best_pos = *start_pos;
        let mut best_dist = f32::MAX;
        let mut best_node = start;

        // Only portals near the segment are explored.
        let search_pos = dt_vlerp(start_pos, end_pos, 0.5);
        let search_rad_sqr = dt_sqr(dt_vdist(start_pos, end_pos) / 2.0 + 0.001);

        while let Some(cur) = queue.pop_front() {
            let cur_ref = pool.node(cur).id;
            let (cur_tile, cur_poly) = nav.get_tile_and_poly_by_ref_unchecked(cur_ref);
            let (verts, nv) = cur_tile.poly_verts(cur_poly);

            if dt_point_in_polygon(end_pos, &verts[..nv]) {
                best_node = cur;
                best_pos = *end_pos;
                break;
            }

            let mut j = nv - 1;
            for i in 0..nv {
                let mut neis = [PolyRef::NULL; MAX_EDGE_NEIGHBOURS];
                let mut nneis = 0;

                if cur_poly.neis[j] & DT_EXT_LINK != 0 {
                    // Tile border.
                    for link in cur_tile.poly_links(cur_poly) {
                        if link.edge as usize != j || link.reference.is_null() {
                            continue;
                        }
                        let (nei_tile, nei_poly) = nav.get_tile_and_poly_by_ref_unchecked(link.reference);
                        if filter.pass_filter(link.reference, nei_tile, nei_poly) && nneis < MAX_EDGE_NEIGHBOURS {
                            neis[nneis] = link.reference;
                            nneis += 1;
                        }
                    }
                } else if cur_poly.neis[j] != 0 {
                    let idx = (cur_poly.neis[j] - 1) as usize;
                    let r = PolyRef::new(nav.get_poly_ref_base(cur_tile).id() | idx as u32);
                    if filter.pass_filter(r, cur_tile, &cur_tile.polys[idx]) {
                        neis[nneis] = r;
                        nneis += 1;
                    }
                }

                let vj = verts[j];
                let vi = verts[i];
                if nneis == 0 {
                    // Wall edge.
                    let (dist_sqr, tseg) = dt_distance_pt_seg_sqr2d(end_pos, &vj, &vi);
                    if dist_sqr < best_dist {
                        best_pos = dt_vlerp(&vj, &vi, tseg);
                        best_dist = dist_sqr;
                        best_node = cur;
                    }
                } else {
                    for &nei in &neis[..nneis] {
                        let Some(neighbour) = pool.get_node(nei, 0) else {
                            continue;
                        };
                        if pool.node(neighbour).has_flag(NodeFlags::CLOSED) {
                            continue;
                        }

                        let (dist_sqr, _) = dt_distance_pt_seg_sqr2d(&search_pos, &vj, &vi);
                        if dist_sqr > search_rad_sqr {
                            continue;
                        }

                        if queue.len() < MOVE_ALONG_SURFACE_MAX_STACK {
                            let parent_idx = pool.node_idx(cur);
                            let node = pool.node_mut(neighbour);
                            node.set_parent(parent_idx);
                            node.add_flags(NodeFlags::CLOSED);
                            queue.push_back(neighbour);
                        }
                    }
                }
                j = i;
            }
        }

        let mut visited = Vec::new();
        let mut cur = Some(best_node);
        while let Some(i) = cur {
            let node = pool.node(i);
            visited.push(node.id);
            cur = pool.node_at_idx(node.parent());
        }
        visited.reverse();
        if visited.len() > max_visited {
            visited.truncate(max_visited);
            status |= DtStatus::DT_BUFFER_TOO_SMALL;
        }

        Ok(MoveAlongSurfaceResult {
            result_pos: best_pos,
            visited,
            status,
        })
    }

    /// Squared distance between two node positions
    pub(crate) fn node_dist_sqr(&self, a: usize, b: usize) -> f32 {
        dt_vdist_sqr(&self.node_pool.node(a).pos, &self.node_pool.node(b).pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{poly_at, strip_mesh, two_tile_mesh};

    #[test]
    fn test_node_bound_validated() {
        let mesh = strip_mesh(2);
        assert!(NavMeshQuery::new(&mesh, 0).is_err());
        assert!(NavMeshQuery::new(&mesh, DT_MAX_NODE_POOL_SIZE + 1).is_err());
        assert!(NavMeshQuery::new(&mesh, 3).is_ok());
    }

    #[test]
    fn test_init_keeps_larger_pool() {
        let mesh = strip_mesh(2);
        let mut query = NavMeshQuery::new(&mesh, 128).unwrap();
        query.init(&mesh, 64).unwrap();
        assert_eq!(query.get_node_pool().max_nodes(), 128);
        query.init(&mesh, 512).unwrap();
        assert_eq!(query.get_node_pool().max_nodes(), 512);
    }

    #[test]
    fn test_find_nearest_poly_over_and_beside() {
        let mesh = strip_mesh(3);
        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let filter = QueryFilter::default();

        let over = query
            .find_nearest_poly(&[1.5, 0.3, 0.5], &[0.5, 1.0, 0.5], &filter)
            .unwrap();
        assert!(!over.poly_ref.is_null());
        assert!(over.is_over_poly);
        assert_eq!(over.point, [1.5, 0.0, 0.5]);

        let beside = query
            .find_nearest_poly(&[3.2, 0.0, 0.5], &[0.5, 1.0, 0.5], &filter)
            .unwrap();
        assert!(!beside.is_over_poly);
        assert!((beside.point[0] - 3.0).abs() < 1e-5);

        let none = query
            .find_nearest_poly(&[10.0, 0.0, 10.0], &[0.5, 1.0, 0.5], &filter)
            .unwrap();
        assert!(none.poly_ref.is_null());
    }

    #[test]
    fn test_find_nearest_poly_rejects_bad_extents() {
        let mesh = strip_mesh(1);
        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let filter = QueryFilter::default();
        assert!(query
            .find_nearest_poly(&[0.5, 0.0, 0.5], &[-1.0, 1.0, 1.0], &filter)
            .is_err());
        assert!(query
            .find_nearest_poly(&[f32::NAN, 0.0, 0.5], &[1.0, 1.0, 1.0], &filter)
            .is_err());
    }

    #[test]
    fn test_query_polygons_buffer_too_small() {
        let mesh = strip_mesh(4);
        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let (polys, status) = query
            .query_polygons(&[2.0, 0.0, 0.5], &[3.0, 1.0, 1.0], &QueryFilter::default(), 2)
            .unwrap();
        assert_eq!(polys.len(), 2);
        assert!(status.has_detail(DtStatus::DT_BUFFER_TOO_SMALL));
    }

    #[test]
    fn test_portal_points_across_tiles() {
        let mesh = two_tile_mesh();
        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let a = poly_at(&mesh, [0.5, 0.0, 0.5]);
        let b = poly_at(&mesh, [1.5, 0.0, 0.5]);

        let (left, right) = query.get_portal_points(a, b).unwrap();
        assert_eq!(left[0], 1.0);
        assert_eq!(right[0], 1.0);
        assert_eq!((left[2] - right[2]).abs(), 1.0);

        let mid = query.get_edge_mid_point(a, b).unwrap();
        assert_eq!(mid, [1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_closest_point_on_poly_boundary() {
        let mesh = strip_mesh(1);
        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let r = poly_at(&mesh, [0.5, 0.0, 0.5]);

        let inside = query.closest_point_on_poly_boundary(r, &[0.25, 0.0, 0.75]).unwrap();
        assert_eq!(inside, [0.25, 0.0, 0.75]);

        let outside = query.closest_point_on_poly_boundary(r, &[-1.0, 0.0, 0.5]).unwrap();
        assert!((outside[0] - 0.0).abs() < 1e-6);
        assert!((outside[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_get_poly_height() {
        let mesh = strip_mesh(2);
        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let r = poly_at(&mesh, [0.5, 0.0, 0.5]);
        assert_eq!(query.get_poly_height(r, &[0.5, 5.0, 0.5]).unwrap(), 0.0);
        assert!(query.get_poly_height(r, &[1.5, 0.0, 0.5]).is_err());
    }

    #[test]
    fn test_is_valid_poly_ref_respects_filter() {
        let mut mesh = strip_mesh(2);
        let r = poly_at(&mesh, [0.5, 0.0, 0.5]);
        mesh.set_poly_flags(r, crate::PolyFlags::DISABLED).unwrap();

        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let filter = QueryFilter::default().with_exclude_flags(crate::PolyFlags::DISABLED);
        assert!(!query.is_valid_poly_ref(r, &filter));
        assert!(query.is_valid_poly_ref(r, &QueryFilter::default()));
        assert!(!query.is_valid_poly_ref(PolyRef::NULL, &QueryFilter::default()));
    }
}
