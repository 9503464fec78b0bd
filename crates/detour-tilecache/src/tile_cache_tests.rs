//! Obstacle scenarios driven through the update loop into a live navmesh
//!
//! The world is two 8x8 cell tiles side by side along +x, with one world
//! unit per cell and portals on every border.

#[cfg(test)]
mod tests {
    use detour::{NavMesh, NavMeshCreateParams, NavMeshParams, NavMeshQuery, PolyFlags, PolyRef, QueryFilter};

    use crate::test_layer_helpers::flat_tile_blob;
    use crate::{
        Lz4Compressor, ObstacleState, TileCache, TileCacheMeshProcess, TileCacheParams,
        DT_COMPRESSEDTILE_FREE_DATA,
    };

    const TILE: i32 = 8;

    fn params() -> TileCacheParams {
        TileCacheParams::default()
            .with_cell_size(1.0, 0.5)
            .with_tile_size(TILE, TILE)
            .with_agent(2.0, 0.5, 0.5)
            .with_max_tiles(8)
            .with_max_obstacles(32)
    }

    fn nav_mesh() -> NavMesh {
        NavMesh::new(
            NavMeshParams::default()
                .with_tile_size(TILE as f32, TILE as f32)
                .with_max_tiles(8)
                .with_max_polys_per_tile(64),
        )
        .unwrap()
    }

    /// Cache holding both tiles and a navmesh built from them
    fn world(process: Option<Box<dyn TileCacheMeshProcess>>) -> (TileCache, NavMesh) {
        let _ = env_logger::builder().is_test(true).try_init();
        let comp = Lz4Compressor::new();
        let mut tc = TileCache::new(params(), Box::new(comp), process).unwrap();
        for tx in 0..2 {
            tc.add_tile(flat_tile_blob(&comp, tx, 0, TILE, 1.0), DT_COMPRESSEDTILE_FREE_DATA)
                .unwrap();
        }
        let mut mesh = nav_mesh();
        for tx in 0..2 {
            tc.build_nav_mesh_tiles_at(tx, 0, &mut mesh).unwrap();
        }
        (tc, mesh)
    }

    fn run_until_up_to_date(tc: &mut TileCache, mesh: &mut NavMesh) -> usize {
        for calls in 1..=32 {
            if tc.update(0.1, mesh).unwrap() {
                return calls;
            }
        }
        panic!("tile cache never caught up");
    }

    fn tile_bytes(mesh: &NavMesh) -> Vec<Option<Vec<u8>>> {
        (0..2)
            .map(|tx| mesh.get_tile_at(tx, 0, 0).map(|t| t.data.clone()))
            .collect()
    }

    fn nearest(mesh: &NavMesh, pos: [f32; 3]) -> PolyRef {
        let query = NavMeshQuery::new(mesh, 256).unwrap();
        query
            .find_nearest_poly(&pos, &[0.5, 1.0, 0.5], &QueryFilter::default())
            .unwrap()
            .poly_ref
    }

    /// Whether a full path exists between two points
    fn connected(mesh: &NavMesh, a: [f32; 3], b: [f32; 3]) -> bool {
        let start = nearest(mesh, a);
        let end = nearest(mesh, b);
        if start.is_null() || end.is_null() {
            return false;
        }
        let mut query = NavMeshQuery::new(mesh, 256).unwrap();
        let result = query
            .find_path(start, end, &a, &b, &QueryFilter::default(), 32)
            .unwrap();
        !result.is_partial() && result.path.last() == Some(&end)
    }

    const WEST: [f32; 3] = [2.0, 0.0, 4.0];
    const EAST: [f32; 3] = [14.0, 0.0, 4.0];

    #[test]
    fn test_cached_tiles_become_linked_polys() {
        let (_, mesh) = world(None);
        for tx in 0..2 {
            let tile = mesh.get_tile_at(tx, 0, 0).unwrap();
            assert_eq!(tile.polys.len(), 1);
            assert_eq!(tile.polys[0].flags, PolyFlags::WALK);
        }
        assert!(connected(&mesh, WEST, EAST));
    }

    #[test]
    fn test_wall_obstacle_blocks_path() {
        let (mut tc, mut mesh) = world(None);
        let ob = tc.add_box_obstacle([5.0, -1.0, -1.0], [11.0, 1.0, 9.0]).unwrap();
        run_until_up_to_date(&mut tc, &mut mesh);

        assert_eq!(tc.get_obstacle_by_ref(ob).unwrap().state, ObstacleState::Processed);
        assert!(!connected(&mesh, WEST, EAST));
        assert!(nearest(&mesh, [8.0, 0.0, 4.0]).is_null());
        assert!(!nearest(&mesh, WEST).is_null());
    }

    #[test]
    fn test_one_tile_rebuilt_per_update() {
        let (mut tc, mut mesh) = world(None);
        tc.add_obstacle([8.0, 0.0, 4.0], 1.5, 2.0).unwrap();
        assert_eq!(tc.pending_work(), (1, 0));

        // Draining queues both tiles, then one is rebuilt.
        assert!(!tc.update(0.1, &mut mesh).unwrap());
        assert_eq!(tc.pending_work(), (0, 1));
        assert!(tc.update(0.1, &mut mesh).unwrap());
        assert_eq!(tc.pending_work(), (0, 0));
    }

    #[test]
    fn test_obstacle_settles_after_all_touched_tiles() {
        let (mut tc, mut mesh) = world(None);
        let ob = tc.add_obstacle([8.0, 0.0, 4.0], 1.5, 2.0).unwrap();

        tc.update(0.1, &mut mesh).unwrap();
        let obstacle = tc.get_obstacle_by_ref(ob).unwrap();
        assert_eq!(obstacle.touched.len(), 2);
        assert_eq!(obstacle.pending.len(), 1);
        assert_eq!(obstacle.state, ObstacleState::Processing);

        tc.update(0.1, &mut mesh).unwrap();
        let obstacle = tc.get_obstacle_by_ref(ob).unwrap();
        assert!(obstacle.pending.is_empty());
        assert_eq!(obstacle.state, ObstacleState::Processed);
    }

    #[test]
    fn test_add_then_remove_restores_tiles() {
        let (mut tc, mut mesh) = world(None);
        let before = tile_bytes(&mesh);

        let ob = tc.add_obstacle([8.0, 0.0, 4.0], 1.5, 2.0).unwrap();
        assert_eq!(run_until_up_to_date(&mut tc, &mut mesh), 2);
        assert_ne!(tile_bytes(&mesh), before);

        tc.remove_obstacle(ob).unwrap();
        assert_eq!(
            tc.get_obstacle_by_ref(ob).unwrap().state,
            ObstacleState::Processed
        );
        assert_eq!(run_until_up_to_date(&mut tc, &mut mesh), 2);
        assert_eq!(tile_bytes(&mesh), before);

        // The slot was recycled under a new salt.
        assert!(tc.get_obstacle_by_ref(ob).is_none());
        assert_eq!(tc.get_obstacle(0).unwrap().state, ObstacleState::Empty);
        let again = tc.add_obstacle([8.0, 0.0, 4.0], 1.5, 2.0).unwrap();
        assert_eq!(again & 0xffff, ob & 0xffff);
        assert_ne!(again, ob);
    }

    #[test]
    fn test_obstacle_churn_leaves_tiles_unchanged() {
        let (mut tc, mut mesh) = world(None);
        let before = tile_bytes(&mesh);
        let mut rng = fastrand::Rng::with_seed(11);

        let mut live = Vec::new();
        for round in 0..6 {
            for _ in 0..3 {
                let pos = [rng.f32() * 16.0, 0.0, rng.f32() * 8.0];
                live.push(tc.add_obstacle(pos, 0.5 + rng.f32(), 2.0).unwrap());
            }
            if round % 2 == 1 {
                let victim = live.swap_remove(rng.usize(..live.len()));
                tc.remove_obstacle(victim).unwrap();
            }
            run_until_up_to_date(&mut tc, &mut mesh);
        }

        for ob in live.drain(..) {
            tc.remove_obstacle(ob).unwrap();
        }
        run_until_up_to_date(&mut tc, &mut mesh);
        assert_eq!(tile_bytes(&mesh), before);
        assert!((0..tc.get_obstacle_count())
            .all(|i| tc.get_obstacle(i).unwrap().state == ObstacleState::Empty));
    }

    #[test]
    fn test_requests_wait_for_rebuild_queue() {
        let (mut tc, mut mesh) = world(None);
        tc.add_obstacle([8.0, 0.0, 4.0], 1.5, 2.0).unwrap();
        assert!(!tc.update(0.1, &mut mesh).unwrap());

        let late = tc.add_obstacle([2.0, 0.0, 2.0], 0.5, 2.0).unwrap();
        assert!(!tc.update(0.1, &mut mesh).unwrap());
        assert_eq!(tc.pending_work(), (1, 0));
        assert!(tc.get_obstacle_by_ref(late).unwrap().touched.is_empty());

        assert!(tc.update(0.1, &mut mesh).unwrap());
        let late = tc.get_obstacle_by_ref(late).unwrap();
        assert_eq!(late.touched.len(), 1);
        assert_eq!(late.state, ObstacleState::Processed);
    }

    #[test]
    fn test_shared_tiles_are_queued_once() {
        let (mut tc, mut mesh) = world(None);
        tc.add_obstacle([7.0, 0.0, 2.0], 1.5, 2.0).unwrap();
        tc.add_obstacle([9.0, 0.0, 6.0], 1.5, 2.0).unwrap();
        assert_eq!(run_until_up_to_date(&mut tc, &mut mesh), 2);
    }

    #[test]
    fn test_obstacle_outside_cache_settles_immediately() {
        let (mut tc, mut mesh) = world(None);
        let ob = tc.add_obstacle([100.0, 0.0, 100.0], 1.0, 2.0).unwrap();
        assert!(tc.update(0.1, &mut mesh).unwrap());
        assert_eq!(tc.get_obstacle_by_ref(ob).unwrap().state, ObstacleState::Processed);

        tc.remove_obstacle(ob).unwrap();
        assert!(tc.update(0.1, &mut mesh).unwrap());
        assert!(tc.get_obstacle_by_ref(ob).is_none());
    }

    #[test]
    fn test_stale_remove_request_is_dropped() {
        let (mut tc, mut mesh) = world(None);
        let ob = tc.add_obstacle([100.0, 0.0, 100.0], 1.0, 2.0).unwrap();
        tc.remove_obstacle(ob).unwrap();
        run_until_up_to_date(&mut tc, &mut mesh);

        // A second removal of the same handle finds a newer salt and is ignored.
        let bytes = tile_bytes(&mesh);
        tc.remove_obstacle(ob).unwrap();
        assert!(tc.update(0.1, &mut mesh).unwrap());
        assert_eq!(tile_bytes(&mesh), bytes);
    }

    #[test]
    fn test_fully_covered_tile_is_removed() {
        let (mut tc, mut mesh) = world(None);
        let ob = tc.add_box_obstacle([-1.0, -1.0, -1.0], [7.5, 1.0, 9.0]).unwrap();
        assert_eq!(run_until_up_to_date(&mut tc, &mut mesh), 1);
        assert!(mesh.get_tile_at(0, 0, 0).is_none());
        assert!(mesh.get_tile_at(1, 0, 0).is_some());

        tc.remove_obstacle(ob).unwrap();
        run_until_up_to_date(&mut tc, &mut mesh);
        assert!(mesh.get_tile_at(0, 0, 0).is_some());
        assert!(connected(&mesh, WEST, EAST));
    }

    #[test]
    fn test_oriented_box_obstacle_carves_tile() {
        let (mut tc, mut mesh) = world(None);
        let before = tile_bytes(&mesh);
        tc.add_oriented_box_obstacle([4.0, 0.0, 4.0], [1.5, 1.0, 1.5], std::f32::consts::FRAC_PI_4)
            .unwrap();
        assert_eq!(run_until_up_to_date(&mut tc, &mut mesh), 1);
        // Convex polygons need more than one piece around a hole.
        assert!(mesh.get_tile_at(0, 0, 0).unwrap().polys.len() >= 2);
        assert_ne!(tile_bytes(&mesh)[0], before[0]);
        assert_eq!(tile_bytes(&mesh)[1], before[1]);
    }

    #[test]
    fn test_mesh_process_assigns_flags() {
        let process: Box<dyn TileCacheMeshProcess> = Box::new(
            |_: &mut NavMeshCreateParams, areas: &mut [u8], flags: &mut [PolyFlags]| {
                areas.fill(7);
                flags.fill(PolyFlags::SWIM | PolyFlags::WALK);
            },
        );
        let (_, mesh) = world(Some(process));
        let tile = mesh.get_tile_at(0, 0, 0).unwrap();
        assert_eq!(tile.polys[0].flags, PolyFlags::SWIM | PolyFlags::WALK);
        assert_eq!(tile.polys[0].area(), 7);
    }

    #[test]
    fn test_removed_cache_tile_cannot_be_rebuilt() {
        let (mut tc, mut mesh) = world(None);
        let r = tc.get_tiles_at(0, 0)[0];
        assert_eq!(tc.remove_tile(r).unwrap(), None);
        assert!(tc.build_nav_mesh_tile(r, &mut mesh).is_err());
    }
}
