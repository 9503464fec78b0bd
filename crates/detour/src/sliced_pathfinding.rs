//! Sliced pathfinding
//!
//! An A* search split into bounded steps so a long query can be spread over
//! several frames. The search state lives inside [`NavMeshQuery`] and is
//! driven through `init_sliced_find_path`, `update_sliced_find_path` and one
//! of the finalize calls. With [`FindPathOptions::ANY_ANGLE`] a node whose
//! grandparent is in line of sight is re-parented to it, so the corridor can
//! cut across polygons.

use crate::detour_common::{dt_visfinite, dt_vdist};
use crate::nav_mesh_query::{FindPathOptions, NavMeshQuery, PathResult, H_SCALE};
use crate::node_pool::NodeFlags;
use crate::raycast_hit::RaycastOptions;
use crate::{DtStatus, PolyRef, QueryFilter, Result};

/// Ray length limit for any-angle shortcuts, in agent radii
const RAYCAST_LIMIT_PROPORTIONS: f32 = 50.0;

/// State of a sliced path search
#[derive(Debug, Clone, Default)]
pub struct SlicedFindPath {
    pub(crate) status: DtStatus,
    pub(crate) last_best_node: Option<usize>,
    pub(crate) last_best_node_cost: f32,
    pub(crate) start_ref: PolyRef,
    pub(crate) end_ref: PolyRef,
    pub(crate) start_pos: [f32; 3],
    pub(crate) end_pos: [f32; 3],
    pub(crate) filter: QueryFilter,
    pub(crate) options: FindPathOptions,
    pub(crate) raycast_limit_sqr: f32,
}

impl SlicedFindPath {
    /// Status of the search. Zero while no search has been started.
    pub fn status(&self) -> DtStatus {
        self.status
    }

    pub fn start_ref(&self) -> PolyRef {
        self.start_ref
    }

    pub fn end_ref(&self) -> PolyRef {
        self.end_ref
    }

    pub fn is_in_progress(&self) -> bool {
        self.status.is_in_progress()
    }
}

impl NavMeshQuery<'_> {
    /// State of the current sliced search
    pub fn sliced_find_path(&self) -> &SlicedFindPath {
        &self.sliced
    }

    /// Starts a sliced search. Returns in-progress, or success right away
    /// when both ends are in the same polygon.
    pub fn init_sliced_find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        options: FindPathOptions,
    ) -> Result<DtStatus> {
        self.sliced = SlicedFindPath {
            status: DtStatus::failure(),
            start_ref,
            end_ref,
            start_pos: *start_pos,
            end_pos: *end_pos,
            filter: filter.clone(),
            options,
            raycast_limit_sqr: f32::MAX,
            ..Default::default()
        };

        let nav = self.get_attached_nav_mesh();
        if !nav.is_valid_poly_ref(start_ref)
            || !nav.is_valid_poly_ref(end_ref)
            || !dt_visfinite(start_pos)
            || !dt_visfinite(end_pos)
        {
            return Err(DtStatus::invalid_param());
        }

        if options.contains(FindPathOptions::ANY_ANGLE) {
            if let Some(header) = nav.get_tile_and_poly_by_ref(start_ref).ok().and_then(|(t, _)| t.header) {
                let limit = header.walkable_radius * RAYCAST_LIMIT_PROPORTIONS;
                self.sliced.raycast_limit_sqr = limit * limit;
            }
        }

        if start_ref == end_ref {
            self.sliced.status = DtStatus::success();
            return Ok(self.sliced.status);
        }

        self.node_pool.clear();
        self.open_list.clear();

        let Some(start) = self.node_pool.get_node(start_ref, 0) else {
            return Err(DtStatus::failure_detail(DtStatus::DT_OUT_OF_NODES));
        };
        let total = dt_vdist(start_pos, end_pos) * H_SCALE;
        {
            let node = self.node_pool.node_mut(start);
            node.pos = *start_pos;
            node.set_parent(0);
            node.cost = 0.0;
            node.total = total;
            node.set_flags(NodeFlags::OPEN);
        }
        self.open_list.push(start, total);

        self.sliced.status = DtStatus::in_progress();
        self.sliced.last_best_node = Some(start);
        self.sliced.last_best_node_cost = total;
        Ok(self.sliced.status)
    }

    /// Runs at most `max_iter` node expansions. Returns the search status
    /// and the number of iterations done.
    pub fn update_sliced_find_path(&mut self, max_iter: usize) -> Result<(DtStatus, usize)> {
        let status = self.sliced.status;
        if status.bits() == 0 {
            return Err(DtStatus::invalid_param());
        }
        if !status.is_in_progress() {
            return status.into_result().map(|s| (s, 0));
        }

        let nav = self.get_attached_nav_mesh();
        if !nav.is_valid_poly_ref(self.sliced.start_ref) || !nav.is_valid_poly_ref(self.sliced.end_ref) {
            self.sliced.status = DtStatus::failure();
            return Err(self.sliced.status);
        }

        let filter = self.sliced.filter.clone();
        let end_ref = self.sliced.end_ref;
        let end_pos = self.sliced.end_pos;
        let any_angle = self.sliced.options.contains(FindPathOptions::ANY_ANGLE);
        let raycast_limit_sqr = self.sliced.raycast_limit_sqr;

        let mut iter = 0;
        while iter < max_iter {
            let Some(best) = self.open_list.pop() else {
                break;
            };
            iter += 1;

            let (best_ref, best_pos, best_cost, best_parent) = {
                let node = self.node_pool.node_mut(best);
                node.remove_flags(NodeFlags::OPEN);
                node.add_flags(NodeFlags::CLOSED);
                (node.id, node.pos, node.cost, node.parent())
            };

            if best_ref == end_ref {
                self.sliced.last_best_node = Some(best);
                self.sliced.status = DtStatus::success() | self.sliced.status.detail();
                return Ok((self.sliced.status, iter));
            }

            // Tiles may have been removed between updates.
            let Ok((best_tile, best_poly)) = nav.get_tile_and_poly_by_ref(best_ref) else {
                self.sliced.status = DtStatus::failure();
                return Err(self.sliced.status);
            };

            let parent = self.node_pool.node_at_idx(best_parent);
            let parent_ref = parent.map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);
            let grandpa_ref = parent
                .and_then(|p| self.node_pool.node_at_idx(self.node_pool.node(p).parent()))
                .map_or(PolyRef::NULL, |g| self.node_pool.node(g).id);

            if !parent_ref.is_null()
                && (!nav.is_valid_poly_ref(parent_ref)
                    || (!grandpa_ref.is_null() && !nav.is_valid_poly_ref(grandpa_ref)))
            {
                self.sliced.status = DtStatus::failure();
                return Err(self.sliced.status);
            }

            let try_los = any_angle
                && parent.is_some_and(|p| {
                    raycast_limit_sqr >= f32::MAX || self.node_dist_sqr(p, best) < raycast_limit_sqr
                });

            for link in best_tile.poly_links(best_poly) {
                let neighbour_ref = link.reference;
                if neighbour_ref.is_null() || neighbour_ref == parent_ref {
                    continue;
                }

                let (neighbour_tile, neighbour_poly) = nav.get_tile_and_poly_by_ref_unchecked(neighbour_ref);
                if !filter.pass_filter(neighbour_ref, neighbour_tile, neighbour_poly) {
                    continue;
                }

                let Some(neighbour) = self.node_pool.get_node(neighbour_ref, 0) else {
                    self.sliced.status |= DtStatus::DT_OUT_OF_NODES;
                    continue;
                };

                // Already reached from the same parent.
                let neighbour_parent = self.node_pool.node(neighbour).parent();
                if neighbour_parent != 0 && neighbour_parent == best_parent {
                    continue;
                }

                if self.node_pool.node(neighbour).flags().is_empty() {
                    if let Ok((left, right)) = self.portal_points(
                        best_ref,
                        best_poly,
                        best_tile,
                        neighbour_ref,
                        neighbour_poly,
                        neighbour_tile,
                    ) {
                        self.node_pool.node_mut(neighbour).pos =
                            crate::detour_common::dt_vlerp(&left, &right, 0.5);
                    }
                }
                let neighbour_pos = self.node_pool.node(neighbour).pos;

                let mut shortcut_cost = None;
                if let (true, Some(p)) = (try_los, parent) {
                    let parent_node = *self.node_pool.node(p);
                    if let Ok(hit) = self.raycast(
                        parent_ref,
                        &parent_node.pos,
                        &neighbour_pos,
                        &filter,
                        RaycastOptions::USE_COSTS,
                        0,
                    ) {
                        if hit.t >= 1.0 {
                            shortcut_cost = Some(parent_node.cost + hit.path_cost);
                        }
                    }
                }
                let found_short_cut = shortcut_cost.is_some();

                let mut cost = shortcut_cost
                    .unwrap_or_else(|| best_cost + filter.get_cost(&best_pos, &neighbour_pos, best_poly));
                let heuristic = if neighbour_ref == end_ref {
                    cost += filter.get_cost(&neighbour_pos, &end_pos, neighbour_poly);
                    0.0
                } else {
                    dt_vdist(&neighbour_pos, &end_pos) * H_SCALE
                };
                let total = cost + heuristic;

                let best_idx = self.node_pool.node_idx(best);
                let node = self.node_pool.node_mut(neighbour);
                let flags = node.flags();
                if flags.intersects(NodeFlags::OPEN | NodeFlags::CLOSED) && total >= node.total {
                    continue;
                }

                node.set_parent(if found_short_cut { best_parent } else { best_idx });
                node.id = neighbour_ref;
                node.remove_flags(NodeFlags::CLOSED | NodeFlags::PARENT_DETACHED);
                node.cost = cost;
                node.total = total;
                if found_short_cut {
                    node.add_flags(NodeFlags::PARENT_DETACHED);
                }

                if flags.contains(NodeFlags::OPEN) {
                    self.open_list.modify(neighbour, total);
                } else {
                    node.add_flags(NodeFlags::OPEN);
                    self.open_list.push(neighbour, total);
                }

                if heuristic < self.sliced.last_best_node_cost {
                    self.sliced.last_best_node_cost = heuristic;
                    self.sliced.last_best_node = Some(neighbour);
                }
            }
        }

        // Open list exhausted without reaching the end.
        if self.open_list.is_empty() {
            self.sliced.status = DtStatus::success() | self.sliced.status.detail();
        }

        Ok((self.sliced.status, iter))
    }

    /// Ends the sliced search and returns the corridor to the end polygon,
    /// or to the best node so far with `PartialResult`.
    pub fn finalize_sliced_find_path(&mut self, max_path: usize) -> Result<PathResult> {
        self.check_finalize(max_path)?;

        let result = if self.sliced.start_ref == self.sliced.end_ref {
            PathResult {
                path: vec![self.sliced.start_ref],
                status: DtStatus::success(),
            }
        } else {
            let Some(last_best) = self.sliced.last_best_node else {
                self.sliced = SlicedFindPath::default();
                return Err(DtStatus::failure());
            };

            if self.node_pool.node(last_best).id != self.sliced.end_ref {
                self.sliced.status |= DtStatus::DT_PARTIAL_RESULT;
            }

            let (path, details) = self.store_sliced_path(last_best, max_path);
            PathResult {
                path,
                status: DtStatus::success() | self.sliced.status.detail() | details,
            }
        };

        self.sliced = SlicedFindPath::default();
        Ok(result)
    }

    /// Ends the sliced search, aiming the corridor at the furthest polygon
    /// of `existing` the search has visited. Falls back to the best node with
    /// `PartialResult` when none was visited.
    pub fn finalize_sliced_find_path_partial(
        &mut self,
        existing: &[PolyRef],
        max_path: usize,
    ) -> Result<PathResult> {
        if existing.is_empty() {
            return Err(DtStatus::invalid_param());
        }
        self.check_finalize(max_path)?;

        let result = if self.sliced.start_ref == self.sliced.end_ref {
            PathResult {
                path: vec![self.sliced.start_ref],
                status: DtStatus::success(),
            }
        } else {
            let visited = existing
                .iter()
                .rev()
                .find_map(|&r| self.node_pool.find_nodes(r, 1).first().copied());

            let node = match visited {
                Some(n) => n,
                None => {
                    self.sliced.status |= DtStatus::DT_PARTIAL_RESULT;
                    match self.sliced.last_best_node {
                        Some(n) => n,
                        None => {
                            self.sliced = SlicedFindPath::default();
                            return Err(DtStatus::failure());
                        }
                    }
                }
            };

            let (path, details) = self.store_sliced_path(node, max_path);
            PathResult {
                path,
                status: DtStatus::success() | self.sliced.status.detail() | details,
            }
        };

        self.sliced = SlicedFindPath::default();
        Ok(result)
    }

    fn check_finalize(&mut self, max_path: usize) -> Result<()> {
        let status = self.sliced.status;
        if max_path == 0 || status.bits() == 0 {
            return Err(DtStatus::invalid_param());
        }
        if status.is_failure() {
            self.sliced = SlicedFindPath::default();
            return Err(DtStatus::failure());
        }
        Ok(())
    }

    /// Reverses the parent chain ending at `end` and writes it out from the
    /// start, expanding shortcut edges with a raycast. Returns the path and
    /// the detail bits raised while storing it.
    fn store_sliced_path(&mut self, end: usize, max_path: usize) -> (Vec<PolyRef>, u32) {
        // Point parents towards the end. The detached flag moves along so it
        // keeps marking the shortcut edge.
        let mut prev: Option<usize> = None;
        let mut prev_ray = NodeFlags::empty();
        let mut cur = Some(end);
        while let Some(n) = cur {
            let next = self.node_pool.node_at_idx(self.node_pool.node(n).parent());
            let pidx = prev.map_or(0, |p| self.node_pool.node_idx(p));

            let node = self.node_pool.node_mut(n);
            node.set_parent(pidx);
            let next_ray = node.flags() & NodeFlags::PARENT_DETACHED;
            node.set_flags((node.flags() - NodeFlags::PARENT_DETACHED) | prev_ray);

            prev_ray = next_ray;
            prev = Some(n);
            cur = next;
        }

        let filter = self.sliced.filter.clone();
        let mut path = Vec::new();
        let mut details = 0;
        let mut cur = prev;
        while let Some(n) = cur {
            // A ray segment may have used up the rest of the buffer.
            if path.len() >= max_path {
                details |= DtStatus::DT_BUFFER_TOO_SMALL;
                break;
            }
            let node = *self.node_pool.node(n);
            let next = self.node_pool.node_at_idx(node.parent());

            match next {
                Some(next_idx) if node.has_flag(NodeFlags::PARENT_DETACHED) => {
                    let next_node = *self.node_pool.node(next_idx);
                    match self.raycast(
                        node.id,
                        &node.pos,
                        &next_node.pos,
                        &filter,
                        RaycastOptions::empty(),
                        max_path - path.len(),
                    ) {
                        Ok(hit) => {
                            path.extend_from_slice(&hit.path);
                            // The ray ends on the next polygon's boundary.
                            if path.last() == Some(&next_node.id) {
                                path.pop();
                            }
                            if hit.status.has_detail(DtStatus::DT_BUFFER_TOO_SMALL) {
                                details |= DtStatus::DT_BUFFER_TOO_SMALL;
                                break;
                            }
                        }
                        Err(e) => {
                            details |= e.detail();
                            break;
                        }
                    }
                }
                _ => path.push(node.id),
            }
            cur = next;
        }

        (path, details)
    }
}
