//! Raycast options and results

use bitflags::bitflags;

use crate::{DtStatus, PolyRef};

bitflags! {
    /// Options for [`NavMeshQuery::raycast`](crate::NavMeshQuery::raycast)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RaycastOptions: u32 {
        /// Accumulate the movement cost along the ray
        const USE_COSTS = 0x01;
    }
}

/// Result of a raycast along the mesh surface
#[derive(Debug, Clone, PartialEq)]
pub struct RaycastHit {
    /// Hit parameter along the segment. `f32::MAX` when the end was reached
    /// without hitting a wall.
    pub t: f32,
    /// Normal of the wall that was hit
    pub hit_normal: [f32; 3],
    /// Edge of the last visited polygon the ray left through, or -1
    pub hit_edge_index: i32,
    /// Polygons visited by the ray
    pub path: Vec<PolyRef>,
    /// Accumulated cost, only with [`RaycastOptions::USE_COSTS`]
    pub path_cost: f32,
    /// Success status, with `BufferTooSmall` when `path` was truncated
    pub status: DtStatus,
}

impl Default for RaycastHit {
    fn default() -> Self {
        Self {
            t: 0.0,
            hit_normal: [0.0; 3],
            hit_edge_index: -1,
            path: Vec::new(),
            path_cost: 0.0,
            status: DtStatus::success(),
        }
    }
}

impl RaycastHit {
    /// Checks if the ray stopped at a wall
    pub fn hit_wall(&self) -> bool {
        self.t < f32::MAX
    }

    /// Point where the ray stopped, for a segment `start..end`
    pub fn hit_point(&self, start: &[f32; 3], end: &[f32; 3]) -> [f32; 3] {
        if self.hit_wall() {
            crate::detour_common::dt_vlerp(start, end, self.t)
        } else {
            *end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_point() {
        let mut hit = RaycastHit {
            t: f32::MAX,
            ..Default::default()
        };
        let start = [0.0, 0.0, 0.0];
        let end = [4.0, 0.0, 0.0];
        assert!(!hit.hit_wall());
        assert_eq!(hit.hit_point(&start, &end), end);

        hit.t = 0.25;
        assert!(hit.hit_wall());
        assert_eq!(hit.hit_point(&start, &end), [1.0, 0.0, 0.0]);
    }
}
