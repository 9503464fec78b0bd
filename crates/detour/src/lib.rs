//! Detour: tiled navigation mesh storage and queries
//!
//! A [`NavMesh`] stores independently loadable tiles of convex polygons and
//! hands out generational [`PolyRef`] handles to them. A [`NavMeshQuery`]
//! borrows a mesh and answers nearest-polygon, pathfinding, raycast, path
//! straightening and random sampling queries against it.

pub mod binary_format;
pub mod detour_common;
pub mod nav_mesh;
pub mod nav_mesh_builder;
pub mod nav_mesh_query;
pub mod node_pool;
pub mod poly_query;
pub mod raycast_hit;
pub mod sliced_pathfinding;
pub mod status;

#[cfg(test)]
pub mod test_mesh_helpers;

#[cfg(test)]
mod detour_spatial_query_tests;

use bitflags::bitflags;

pub use binary_format::{
    navmesh_data_swap_endian, navmesh_header_swap_endian, FormatError, MeshHeader, TileData,
    DT_NAVMESH_MAGIC, DT_NAVMESH_STATE_MAGIC, DT_NAVMESH_STATE_VERSION, DT_NAVMESH_VERSION,
};
pub use nav_mesh::{
    BVNode, Link, MeshTile, NavMesh, NavMeshParams, OffMeshConnection, Poly, PolyDetail,
};
pub use nav_mesh_builder::{create_nav_mesh_data, NavMeshCreateParams};
pub use nav_mesh_query::{
    CirclePolys, FindPathOptions, MoveAlongSurfaceResult, NavMeshQuery, NearestPoly, PathResult,
    StraightPath, StraightPathFlags, StraightPathOptions, StraightPathPoint,
};
pub use node_pool::{Node, NodeFlags, NodePool, NodeQueue};
pub use poly_query::{CollectPolysQuery, FindNearestPolyQuery, PolyQuery};
pub use raycast_hit::{RaycastHit, RaycastOptions};
pub use sliced_pathfinding::SlicedFindPath;
pub use status::{DtStatus, Result};

/// Maximum number of vertices per navigation polygon
pub const DT_VERTS_PER_POLYGON: usize = 6;

/// Edge code flag marking a portal to another tile
pub const DT_EXT_LINK: u16 = 0x8000;

/// Terminator of a polygon's link list and of a tile's free-link list
pub const DT_NULL_LINK: u32 = 0xffff_ffff;

/// Off-mesh connection can be traversed in both directions
pub const DT_OFFMESH_CON_BIDIR: u8 = 1;

/// Number of distinct area ids
pub const DT_MAX_AREAS: usize = 64;

/// Tile flag: the navigation mesh owns the tile data and drops it on removal
pub const DT_TILE_FREE_DATA: i32 = 0x01;

/// Vertex index marking unused slots in polygon mesh input
pub const DT_MESH_NULL_IDX: u16 = 0xffff;

/// Detail triangle edge flag marking an edge on the polygon boundary
pub const DT_DETAIL_EDGE_BOUNDARY: u8 = 0x01;

/// Generational handle to a polygon. Tile references share the same encoding
/// with a zero polygon index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyRef(u32);

impl PolyRef {
    /// The null reference
    pub const NULL: PolyRef = PolyRef(0);

    /// Creates a new polygon reference from its raw id
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id
    pub const fn id(&self) -> u32 {
        self.0
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for PolyRef {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<PolyRef> for u32 {
    fn from(r: PolyRef) -> Self {
        r.0
    }
}

/// Reference to a tile
pub type TileRef = PolyRef;

bitflags! {
    /// User defined polygon flags consulted by [`QueryFilter`]
    ///
    /// The named bits are conventional; any 16-bit value round-trips through
    /// the tile format.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(
        feature = "serialization",
        derive(serde::Serialize, serde::Deserialize)
    )]
    pub struct PolyFlags: u16 {
        const WALK = 0x01;
        const SWIM = 0x02;
        const DOOR = 0x04;
        const JUMP = 0x08;
        const DISABLED = 0x10;
        const ALL = 0xffff;
    }
}

/// Kind of navigation polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
#[repr(u8)]
pub enum PolyType {
    /// Convex polygon lying on the walkable surface
    #[default]
    Ground = 0,
    /// Two-vertex pseudo polygon for an off-mesh connection
    OffMeshConnection = 1,
}

/// Polygon filter and cost model used by every query
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct QueryFilter {
    /// Cost multiplier per area id
    pub area_cost: Vec<f32>,
    /// Polygons must have at least one of these flags
    pub include_flags: PolyFlags,
    /// Polygons must have none of these flags
    pub exclude_flags: PolyFlags,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            area_cost: vec![1.0; DT_MAX_AREAS],
            include_flags: PolyFlags::ALL,
            exclude_flags: PolyFlags::empty(),
        }
    }
}

impl QueryFilter {
    /// Creates a new filter accepting every polygon at unit cost
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_include_flags(mut self, flags: PolyFlags) -> Self {
        self.include_flags = flags;
        self
    }

    pub fn with_exclude_flags(mut self, flags: PolyFlags) -> Self {
        self.exclude_flags = flags;
        self
    }

    pub fn with_area_cost(mut self, area: u8, cost: f32) -> Self {
        self.set_area_cost(area, cost);
        self
    }

    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        if let Some(c) = self.area_cost.get_mut(area as usize) {
            *c = cost;
        }
    }

    pub fn area_cost(&self, area: u8) -> f32 {
        self.area_cost.get(area as usize).copied().unwrap_or(1.0)
    }

    /// Returns true if the polygon may be visited
    pub fn pass_filter(&self, _poly_ref: PolyRef, _tile: &MeshTile, poly: &Poly) -> bool {
        poly.flags.intersects(self.include_flags) && !poly.flags.intersects(self.exclude_flags)
    }

    /// Cost of moving from `pa` to `pb` inside `cur_poly`
    pub fn get_cost(&self, pa: &[f32; 3], pb: &[f32; 3], cur_poly: &Poly) -> f32 {
        detour_common::dt_vdist(pa, pb) * self.area_cost(cur_poly.area())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poly_ref_basics() {
        assert!(PolyRef::NULL.is_null());
        let r = PolyRef::new(0x1234);
        assert!(!r.is_null());
        assert_eq!(u32::from(r), 0x1234);
        assert_eq!(PolyRef::from(0x1234), r);
    }

    #[test]
    fn test_query_filter_flags() {
        let tile = MeshTile::default();
        let mut poly = Poly::default();
        poly.flags = PolyFlags::WALK | PolyFlags::DOOR;

        let filter = QueryFilter::new();
        assert!(filter.pass_filter(PolyRef::NULL, &tile, &poly));

        let filter = QueryFilter::new().with_exclude_flags(PolyFlags::DOOR);
        assert!(!filter.pass_filter(PolyRef::NULL, &tile, &poly));

        let filter = QueryFilter::new().with_include_flags(PolyFlags::SWIM);
        assert!(!filter.pass_filter(PolyRef::NULL, &tile, &poly));

        poly.flags = PolyFlags::empty();
        assert!(!QueryFilter::new().pass_filter(PolyRef::NULL, &tile, &poly));
    }

    #[test]
    fn test_query_filter_cost_uses_area() {
        let mut poly = Poly::default();
        poly.set_area(3);
        let filter = QueryFilter::new().with_area_cost(3, 2.5);

        let cost = filter.get_cost(&[0.0, 0.0, 0.0], &[4.0, 0.0, 0.0], &poly);
        assert!((cost - 10.0).abs() < 1e-6);
        assert_eq!(filter.area_cost(63), 1.0);
        assert_eq!(filter.area_cost(200), 1.0);
    }
}
