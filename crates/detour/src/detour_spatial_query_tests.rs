//! Tests for spatial queries
//!
//! Polygon box queries, raycasts, random sampling, circle searches and
//! surface movement.

#[cfg(test)]
mod tests {
    use crate::test_mesh_helpers::{build_mesh, grid_create_params, poly_at, strip_mesh};
    use crate::{
        create_nav_mesh_data, DtStatus, MeshTile, NavMeshQuery, Poly, PolyQuery, PolyRef,
        QueryFilter, RaycastOptions,
    };

    /// Records the size of every batch handed to it
    #[derive(Default)]
    struct BatchSizes {
        sizes: Vec<usize>,
        refs: Vec<PolyRef>,
    }

    impl PolyQuery for BatchSizes {
        fn process(&mut self, _tile: &MeshTile, polys: &[&Poly], refs: &[PolyRef]) {
            assert_eq!(polys.len(), refs.len());
            self.sizes.push(refs.len());
            self.refs.extend_from_slice(refs);
        }
    }

    #[test]
    fn test_query_polygons_batches_per_tile() {
        let data = create_nav_mesh_data(&grid_create_params(8, 5, 0, 0)).unwrap();
        let mesh = build_mesh(8.0, vec![data]);
        let query = NavMeshQuery::new(&mesh, 64).unwrap();

        let mut sink = BatchSizes::default();
        query
            .query_polygons_with(&[4.0, 0.0, 2.5], &[5.0, 1.0, 3.0], &QueryFilter::default(), &mut sink)
            .unwrap();
        assert_eq!(sink.sizes, vec![32, 8]);

        let mut unique = sink.refs.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 40);
    }

    #[test]
    fn test_query_polygons_applies_filter() {
        let mut mesh = strip_mesh(4);
        let disabled = poly_at(&mesh, [1.5, 0.0, 0.5]);
        mesh.set_poly_flags(disabled, crate::PolyFlags::DISABLED).unwrap();

        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let filter = QueryFilter::default().with_exclude_flags(crate::PolyFlags::DISABLED);
        let (polys, status) = query
            .query_polygons(&[2.0, 0.0, 0.5], &[3.0, 1.0, 1.0], &filter, 16)
            .unwrap();
        assert!(status.is_success());
        assert_eq!(polys.len(), 3);
        assert!(!polys.contains(&disabled));
    }

    #[test]
    fn test_raycast_reaches_end() {
        let mesh = strip_mesh(3);
        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let start = poly_at(&mesh, [0.5, 0.0, 0.5]);

        let hit = query
            .raycast(start, &[0.5, 0.0, 0.5], &[2.5, 0.0, 0.5], &QueryFilter::default(), RaycastOptions::USE_COSTS, 8)
            .unwrap();
        assert_eq!(hit.t, f32::MAX);
        assert!(!hit.hit_wall());
        assert_eq!(hit.path.len(), 3);
        assert!((hit.path_cost - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_raycast_hits_wall() {
        let mesh = strip_mesh(3);
        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let start = poly_at(&mesh, [0.5, 0.0, 0.5]);
        let start_pos = [0.5, 0.0, 0.5];
        let end_pos = [4.0, 0.0, 0.5];

        let hit = query
            .raycast(start, &start_pos, &end_pos, &QueryFilter::default(), RaycastOptions::empty(), 8)
            .unwrap();
        assert!(hit.hit_wall());
        assert!((hit.t - 2.5 / 3.5).abs() < 1e-4);
        assert_eq!(hit.hit_edge_index, 2);
        assert!((hit.hit_normal[0] + 1.0).abs() < 1e-5);
        assert_eq!(hit.path.len(), 3);

        let p = hit.hit_point(&start_pos, &end_pos);
        assert!((p[0] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_raycast_stops_at_filtered_poly() {
        let mut mesh = strip_mesh(3);
        let blocked = poly_at(&mesh, [1.5, 0.0, 0.5]);
        mesh.set_poly_flags(blocked, crate::PolyFlags::DISABLED).unwrap();
        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let filter = QueryFilter::default().with_exclude_flags(crate::PolyFlags::DISABLED);
        let start = poly_at(&mesh, [0.5, 0.0, 0.5]);

        let hit = query
            .raycast(start, &[0.5, 0.0, 0.5], &[2.5, 0.0, 0.5], &filter, RaycastOptions::empty(), 8)
            .unwrap();
        assert!((hit.t - 0.25).abs() < 1e-4);
        assert_eq!(hit.path, vec![start]);
    }

    #[test]
    fn test_raycast_path_buffer() {
        let mesh = strip_mesh(4);
        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let start = poly_at(&mesh, [0.5, 0.0, 0.5]);
        let hit = query
            .raycast(start, &[0.5, 0.0, 0.5], &[3.5, 0.0, 0.5], &QueryFilter::default(), RaycastOptions::empty(), 2)
            .unwrap();
        assert_eq!(hit.path.len(), 2);
        assert!(hit.status.has_detail(DtStatus::DT_BUFFER_TOO_SMALL));
    }

    #[test]
    fn test_find_random_point_covers_mesh() {
        let mesh = strip_mesh(3);
        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let filter = QueryFilter::default();
        let mut rng = fastrand::Rng::with_seed(42);
        let mut frand = || rng.f32();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..300 {
            let (r, pt) = query.find_random_point(&filter, &mut frand).unwrap();
            assert!(pt[0] >= 0.0 && pt[0] <= 3.0);
            assert!(pt[2] >= 0.0 && pt[2] <= 1.0);
            assert_eq!(pt[1], 0.0);
            assert_eq!(poly_at(&mesh, pt), r);
            seen.insert(r);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_find_random_point_fails_when_all_filtered() {
        let mesh = strip_mesh(2);
        let query = NavMeshQuery::new(&mesh, 64).unwrap();
        let filter = QueryFilter::default().with_include_flags(crate::PolyFlags::SWIM);
        let mut rng = fastrand::Rng::with_seed(7);
        assert!(query.find_random_point(&filter, &mut || rng.f32()).is_err());
    }

    #[test]
    fn test_find_random_point_around_circle_stays_local() {
        let mesh = strip_mesh(5);
        let mut query = NavMeshQuery::new(&mesh, 64).unwrap();
        let start = poly_at(&mesh, [0.5, 0.0, 0.5]);
        let mut rng = fastrand::Rng::with_seed(3);
        let mut frand = || rng.f32();

        for _ in 0..100 {
            let (r, pt) = query
                .find_random_point_around_circle(start, &[0.5, 0.0, 0.5], 1.2, &QueryFilter::default(), &mut frand)
                .unwrap();
            assert!(pt[0] < 2.0);
            assert_eq!(poly_at(&mesh, pt), r);
        }
    }

    #[test]
    fn test_find_polys_around_circle() {
        let mesh = strip_mesh(5);
        let mut query = NavMeshQuery::new(&mesh, 64).unwrap();
        let p0 = poly_at(&mesh, [0.5, 0.0, 0.5]);
        let p1 = poly_at(&mesh, [1.5, 0.0, 0.5]);

        let found = query
            .find_polys_around_circle(p0, &[0.5, 0.0, 0.5], 1.2, &QueryFilter::default(), 16)
            .unwrap();
        assert_eq!(found.refs, vec![p0, p1]);
        assert_eq!(found.parents, vec![PolyRef::NULL, p0]);
        assert_eq!(found.costs[0], 0.0);
        assert!((found.costs[1] - 0.5).abs() < 1e-5);

        let path = query.get_path_from_dijkstra_search(p1, 8).unwrap();
        assert_eq!(path.path, vec![p0, p1]);

        let truncated = query
            .find_polys_around_circle(p0, &[0.5, 0.0, 0.5], 10.0, &QueryFilter::default(), 2)
            .unwrap();
        assert_eq!(truncated.refs.len(), 2);
        assert!(truncated.status.has_detail(DtStatus::DT_BUFFER_TOO_SMALL));
    }

    #[test]
    fn test_move_along_surface_stops_at_wall() {
        let mesh = strip_mesh(3);
        let mut query = NavMeshQuery::new(&mesh, 64).unwrap();
        let p0 = poly_at(&mesh, [0.5, 0.0, 0.5]);

        let moved = query
            .move_along_surface(p0, &[0.5, 0.0, 0.5], &[5.0, 0.0, 0.5], &QueryFilter::default(), 8)
            .unwrap();
        assert!((moved.result_pos[0] - 3.0).abs() < 1e-4);
        assert!((moved.result_pos[2] - 0.5).abs() < 1e-4);
        assert_eq!(moved.visited.len(), 3);
        assert_eq!(moved.visited[0], p0);
    }

    #[test]
    fn test_move_along_surface_reaches_target() {
        let mesh = strip_mesh(3);
        let mut query = NavMeshQuery::new(&mesh, 64).unwrap();
        let p0 = poly_at(&mesh, [0.5, 0.0, 0.5]);
        let target = [2.5, 0.0, 0.7];

        let moved = query
            .move_along_surface(p0, &[0.5, 0.0, 0.5], &target, &QueryFilter::default(), 8)
            .unwrap();
        assert_eq!(moved.result_pos, target);
        assert_eq!(*moved.visited.last().unwrap(), poly_at(&mesh, target));
    }

    #[test]
    fn test_move_along_surface_slides_along_wall() {
        let mesh = strip_mesh(3);
        let mut query = NavMeshQuery::new(&mesh, 64).unwrap();
        let p0 = poly_at(&mesh, [0.5, 0.0, 0.5]);
        let p1 = poly_at(&mesh, [1.5, 0.0, 0.5]);

        let moved = query
            .move_along_surface(p0, &[0.5, 0.0, 0.5], &[1.5, 0.0, 2.0], &QueryFilter::default(), 8)
            .unwrap();
        assert!((moved.result_pos[0] - 1.5).abs() < 1e-4);
        assert!((moved.result_pos[2] - 1.0).abs() < 1e-4);
        assert_eq!(moved.visited, vec![p0, p1]);
    }

    #[test]
    fn test_move_along_surface_visited_buffer() {
        let mesh = strip_mesh(3);
        let mut query = NavMeshQuery::new(&mesh, 64).unwrap();
        let p0 = poly_at(&mesh, [0.5, 0.0, 0.5]);

        let moved = query
            .move_along_surface(p0, &[0.5, 0.0, 0.5], &[5.0, 0.0, 0.5], &QueryFilter::default(), 2)
            .unwrap();
        assert_eq!(moved.visited.len(), 2);
        assert!(moved.status.has_detail(DtStatus::DT_BUFFER_TOO_SMALL));
    }
}
