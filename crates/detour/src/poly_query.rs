//! Polygon query sinks
//!
//! [`NavMeshQuery::query_polygons_with`](crate::NavMeshQuery::query_polygons_with)
//! hands overlapping polygons to a [`PolyQuery`] in batches of at most
//! [`POLY_QUERY_BATCH`] per tile.

use crate::detour_common::{dt_vlen_sqr, dt_vsub};
use crate::{MeshTile, NavMesh, Poly, PolyRef};

/// Maximum number of polygons handed to [`PolyQuery::process`] per call
pub const POLY_QUERY_BATCH: usize = 32;

/// Receives batches of polygons touched by a box query.
pub trait PolyQuery {
    /// Called for each batch of polygons of one tile. This can be called
    /// multiple times for a single query.
    fn process(&mut self, tile: &MeshTile, polys: &[&Poly], refs: &[PolyRef]);
}

/// Collects polygons within a search area
#[derive(Debug, Clone)]
pub struct CollectPolysQuery {
    polys: Vec<PolyRef>,
    max_polys: usize,
    overflow: bool,
}

impl CollectPolysQuery {
    /// Creates a new collector holding at most `max_polys` references
    pub fn new(max_polys: usize) -> Self {
        Self {
            polys: Vec::with_capacity(max_polys.min(1024)),
            max_polys,
            overflow: false,
        }
    }

    pub fn polys(&self) -> &[PolyRef] {
        &self.polys
    }

    pub fn into_polys(self) -> Vec<PolyRef> {
        self.polys
    }

    pub fn num_collected(&self) -> usize {
        self.polys.len()
    }

    /// Returns true if more polygons were found than could be collected
    pub fn overflow(&self) -> bool {
        self.overflow
    }
}

impl PolyQuery for CollectPolysQuery {
    fn process(&mut self, _tile: &MeshTile, _polys: &[&Poly], refs: &[PolyRef]) {
        let remaining = self.max_polys.saturating_sub(self.polys.len());
        if remaining < refs.len() {
            self.overflow = true;
            self.polys.extend_from_slice(&refs[..remaining]);
        } else {
            self.polys.extend_from_slice(refs);
        }
    }
}

/// Finds the polygon nearest to a point
pub struct FindNearestPolyQuery<'a> {
    nav: &'a NavMesh,
    center: [f32; 3],
    nearest_distance_sqr: f32,
    nearest_ref: PolyRef,
    nearest_point: [f32; 3],
    over_poly: bool,
}

impl<'a> FindNearestPolyQuery<'a> {
    pub fn new(nav: &'a NavMesh, center: &[f32; 3]) -> Self {
        Self {
            nav,
            center: *center,
            nearest_distance_sqr: f32::MAX,
            nearest_ref: PolyRef::NULL,
            nearest_point: *center,
            over_poly: false,
        }
    }

    pub fn nearest_ref(&self) -> PolyRef {
        self.nearest_ref
    }

    pub fn nearest_point(&self) -> &[f32; 3] {
        &self.nearest_point
    }

    /// True if the nearest point lies directly over the polygon
    pub fn is_over_poly(&self) -> bool {
        self.over_poly
    }

    pub fn nearest_distance_sqr(&self) -> f32 {
        self.nearest_distance_sqr
    }
}

impl PolyQuery for FindNearestPolyQuery<'_> {
    fn process(&mut self, tile: &MeshTile, polys: &[&Poly], refs: &[PolyRef]) {
        let climb = tile.header.map_or(0.0, |h| h.walkable_climb);

        for (poly, &r) in polys.iter().zip(refs) {
            let ip = self.nav.decode_poly_id_poly(r) as usize;
            let (closest, over) = self
                .nav
                .closest_point_on_poly_in_tile(tile, ip, poly, &self.center);

            // Over the polygon only the height beyond walkable climb counts.
            let diff = dt_vsub(&self.center, &closest);
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

            if d < self.nearest_distance_sqr {
                self.nearest_point = closest;
                self.nearest_distance_sqr = d;
                self.nearest_ref = r;
                self.over_poly = over;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_polys_overflow() {
        let tile = MeshTile::default();
        let mut q = CollectPolysQuery::new(3);
        let refs: Vec<PolyRef> = (1..=2).map(PolyRef::new).collect();
        q.process(&tile, &[], &refs);
        assert!(!q.overflow());

        let refs: Vec<PolyRef> = (3..=5).map(PolyRef::new).collect();
        q.process(&tile, &[], &refs);
        assert!(q.overflow());
        assert_eq!(q.num_collected(), 3);
        assert_eq!(q.polys()[2], PolyRef::new(3));
    }
}
