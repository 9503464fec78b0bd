//! Geometry kernel shared by the tile store, the query engine and the tile cache
//!
//! Vectors are plain `[f32; 3]` arrays laid out as (x, y, z) with y up. The
//! "2D" helpers work in the xz-plane and ignore y.

use glam::Vec3;

/// Epsilon used when comparing positions for equality
const EQUAL_THRESHOLD: f32 = (1.0 / 16384.0) * (1.0 / 16384.0);

#[inline]
pub fn dt_sqr(a: f32) -> f32 {
    a * a
}

#[inline]
pub fn dt_clamp<T: PartialOrd>(v: T, mn: T, mx: T) -> T {
    if v < mn {
        mn
    } else if v > mx {
        mx
    } else {
        v
    }
}

#[inline]
pub fn dt_vadd(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn dt_vsub(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn dt_vscale(v: &[f32; 3], s: f32) -> [f32; 3] {
    [v[0] * s, v[1] * s, v[2] * s]
}

/// Scaled vector addition `a + b * s`
#[inline]
pub fn dt_vmad(a: &[f32; 3], b: &[f32; 3], s: f32) -> [f32; 3] {
    [a[0] + b[0] * s, a[1] + b[1] * s, a[2] + b[2] * s]
}

/// Linear interpolation between `a` and `b`
#[inline]
pub fn dt_vlerp(a: &[f32; 3], b: &[f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

#[inline]
pub fn dt_vmin(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])]
}

#[inline]
pub fn dt_vmax(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])]
}

#[inline]
pub fn dt_vdot(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn dt_vcross(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    Vec3::from_array(*a).cross(Vec3::from_array(*b)).to_array()
}

#[inline]
pub fn dt_vdist(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    Vec3::from_array(*a).distance(Vec3::from_array(*b))
}

#[inline]
pub fn dt_vdist_sqr(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    Vec3::from_array(*a).distance_squared(Vec3::from_array(*b))
}

#[inline]
pub fn dt_vdist2d(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    dt_vdist2d_sqr(a, b).sqrt()
}

#[inline]
pub fn dt_vdist2d_sqr(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dx = b[0] - a[0];
    let dz = b[2] - a[2];
    dx * dx + dz * dz
}

#[inline]
pub fn dt_vlen_sqr(v: &[f32; 3]) -> f32 {
    dt_vdot(v, v)
}

/// Normalizes `v`, leaving a zero vector untouched
#[inline]
pub fn dt_vnormalize(v: &[f32; 3]) -> [f32; 3] {
    Vec3::from_array(*v).normalize_or_zero().to_array()
}

/// True when the points are closer than 1/16384 units
#[inline]
pub fn dt_vequal(a: &[f32; 3], b: &[f32; 3]) -> bool {
    dt_vdist_sqr(a, b) < EQUAL_THRESHOLD
}

#[inline]
pub fn dt_visfinite(v: &[f32; 3]) -> bool {
    v.iter().all(|c| c.is_finite())
}

#[inline]
pub fn dt_visfinite2d(v: &[f32; 3]) -> bool {
    v[0].is_finite() && v[2].is_finite()
}

/// 2D dot product in the xz-plane
#[inline]
pub fn dt_vdot2d(u: &[f32; 3], v: &[f32; 3]) -> f32 {
    u[0] * v[0] + u[2] * v[2]
}

/// 2D perp-dot product in the xz-plane
#[inline]
pub fn dt_vperp2d(u: &[f32; 3], v: &[f32; 3]) -> f32 {
    u[2] * v[0] - u[0] * v[2]
}

/// Signed xz-plane area of the triangle, doubled. Positive for clockwise winding
/// when viewed from above.
#[inline]
pub fn dt_tri_area2d(a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> f32 {
    let abx = b[0] - a[0];
    let abz = b[2] - a[2];
    let acx = c[0] - a[0];
    let acz = c[2] - a[2];
    acx * abz - abx * acz
}

/// Overlap test for quantized bounds
#[inline]
pub fn dt_overlap_quant_bounds(
    amin: &[u16; 3],
    amax: &[u16; 3],
    bmin: &[u16; 3],
    bmax: &[u16; 3],
) -> bool {
    !(amin[0] > bmax[0]
        || amax[0] < bmin[0]
        || amin[1] > bmax[1]
        || amax[1] < bmin[1]
        || amin[2] > bmax[2]
        || amax[2] < bmin[2])
}

/// Overlap test for floating point bounds
#[inline]
pub fn dt_overlap_bounds(
    amin: &[f32; 3],
    amax: &[f32; 3],
    bmin: &[f32; 3],
    bmax: &[f32; 3],
) -> bool {
    !(amin[0] > bmax[0]
        || amax[0] < bmin[0]
        || amin[1] > bmax[1]
        || amax[1] < bmin[1]
        || amin[2] > bmax[2]
        || amax[2] < bmin[2])
}

/// Closest point on triangle `abc` to `p`
pub fn dt_closest_pt_point_triangle(
    p: &[f32; 3],
    a: &[f32; 3],
    b: &[f32; 3],
    c: &[f32; 3],
) -> [f32; 3] {
    let ab = dt_vsub(b, a);
    let ac = dt_vsub(c, a);
    let ap = dt_vsub(p, a);
    let d1 = dt_vdot(&ab, &ap);
    let d2 = dt_vdot(&ac, &ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = dt_vsub(p, b);
    let d3 = dt_vdot(&ab, &bp);
    let d4 = dt_vdot(&ac, &bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return dt_vmad(a, &ab, v);
    }

    let cp = dt_vsub(p, c);
    let d5 = dt_vdot(&ab, &cp);
    let d6 = dt_vdot(&ac, &cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return dt_vmad(a, &ac, w);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        let bc = dt_vsub(c, b);
        return dt_vmad(b, &bc, w);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    dt_vmad(&dt_vmad(a, &ab, v), &ac, w)
}

/// Height of the triangle at the xz-projection of `p`, if `p` lies over it
pub fn dt_closest_height_point_triangle(
    p: &[f32; 3],
    a: &[f32; 3],
    b: &[f32; 3],
    c: &[f32; 3],
) -> Option<f32> {
    const EPS: f32 = 1e-6;

    let v0 = dt_vsub(c, a);
    let v1 = dt_vsub(b, a);
    let v2 = dt_vsub(p, a);

    let mut denom = v0[0] * v1[2] - v0[2] * v1[0];
    if denom.abs() < EPS {
        return None;
    }

    let mut u = v1[2] * v2[0] - v1[0] * v2[2];
    let mut v = v0[0] * v2[2] - v0[2] * v2[0];

    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        Some(a[1] + (v0[1] * u + v1[1] * v) / denom)
    } else {
        None
    }
}

/// Result of clipping a segment against a convex polygon in 2D
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPolyHit {
    pub tmin: f32,
    pub tmax: f32,
    /// Edge the segment enters through, if it starts outside
    pub seg_min: Option<usize>,
    /// Edge the segment leaves through, if it ends outside
    pub seg_max: Option<usize>,
}

/// Clips segment `p0..p1` against the convex polygon `verts`
pub fn dt_intersect_segment_poly2d(
    p0: &[f32; 3],
    p1: &[f32; 3],
    verts: &[[f32; 3]],
) -> Option<SegmentPolyHit> {
    const EPS: f32 = 0.000_000_01;

    let mut hit = SegmentPolyHit {
        tmin: 0.0,
        tmax: 1.0,
        seg_min: None,
        seg_max: None,
    };
    let dir = dt_vsub(p1, p0);
    let nverts = verts.len();

    let mut j = nverts - 1;
    for i in 0..nverts {
        let edge = dt_vsub(&verts[i], &verts[j]);
        let diff = dt_vsub(p0, &verts[j]);
        let n = dt_vperp2d(&edge, &diff);
        let d = dt_vperp2d(&dir, &edge);
        if d.abs() < EPS {
            // Parallel to this edge: outside means no overlap at all.
            if n < 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = n / d;
        if d < 0.0 {
            if t > hit.tmin {
                hit.tmin = t;
                hit.seg_min = Some(j);
                if hit.tmin > hit.tmax {
                    return None;
                }
            }
        } else if t < hit.tmax {
            hit.tmax = t;
            hit.seg_max = Some(j);
            if hit.tmax < hit.tmin {
                return None;
            }
        }
        j = i;
    }

    Some(hit)
}

/// Intersection parameters `(s, t)` of two 2D segments, or `None` when parallel
pub fn dt_intersect_seg_seg2d(
    ap: &[f32; 3],
    aq: &[f32; 3],
    bp: &[f32; 3],
    bq: &[f32; 3],
) -> Option<(f32, f32)> {
    fn perp_xz(a: &[f32; 3], b: &[f32; 3]) -> f32 {
        a[0] * b[2] - a[2] * b[0]
    }

    let u = dt_vsub(aq, ap);
    let v = dt_vsub(bq, bp);
    let w = dt_vsub(ap, bp);
    let d = perp_xz(&u, &v);
    if d.abs() < 1e-6 {
        return None;
    }
    Some((perp_xz(&v, &w) / d, perp_xz(&u, &w) / d))
}

/// Squared 2D distance from `pt` to segment `p..q` and the segment parameter
/// of the closest point
pub fn dt_distance_pt_seg_sqr2d(pt: &[f32; 3], p: &[f32; 3], q: &[f32; 3]) -> (f32, f32) {
    let pqx = q[0] - p[0];
    let pqz = q[2] - p[2];
    let dx = pt[0] - p[0];
    let dz = pt[2] - p[2];
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = dt_clamp(t, 0.0, 1.0);
    let dx = p[0] + t * pqx - pt[0];
    let dz = p[2] + t * pqz - pt[2];
    (dx * dx + dz * dz, t)
}

/// Crossing-number point in polygon test in the xz-plane
pub fn dt_point_in_polygon(pt: &[f32; 3], verts: &[[f32; 3]]) -> bool {
    let nverts = verts.len();
    let mut c = false;
    let mut j = nverts - 1;
    for i in 0..nverts {
        let vi = &verts[i];
        let vj = &verts[j];
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            c = !c;
        }
        j = i;
    }
    c
}

/// Like [`dt_point_in_polygon`], also filling the squared distance and segment
/// parameter from `pt` to every edge. Edge `j` runs from `verts[j]` to `verts[j + 1]`.
pub fn dt_distance_pt_poly_edges_sqr(
    pt: &[f32; 3],
    verts: &[[f32; 3]],
    ed: &mut [f32],
    et: &mut [f32],
) -> bool {
    let nverts = verts.len();
    let mut c = false;
    let mut j = nverts - 1;
    for i in 0..nverts {
        let vi = &verts[i];
        let vj = &verts[j];
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            c = !c;
        }
        let (d, t) = dt_distance_pt_seg_sqr2d(pt, vj, vi);
        ed[j] = d;
        et[j] = t;
        j = i;
    }
    c
}

fn project_poly(axis: &[f32; 3], poly: &[[f32; 3]]) -> (f32, f32) {
    let mut rmin = dt_vdot2d(axis, &poly[0]);
    let mut rmax = rmin;
    for p in &poly[1..] {
        let d = dt_vdot2d(axis, p);
        rmin = rmin.min(d);
        rmax = rmax.max(d);
    }
    (rmin, rmax)
}

#[inline]
fn overlap_range(amin: f32, amax: f32, bmin: f32, bmax: f32, eps: f32) -> bool {
    !((amin + eps) > bmax || (amax - eps) < bmin)
}

/// Separating axis test for two convex polygons in the xz-plane
pub fn dt_overlap_poly_poly2d(polya: &[[f32; 3]], polyb: &[[f32; 3]]) -> bool {
    const EPS: f32 = 1e-4;

    for poly in [polya, polyb] {
        let n = poly.len();
        let mut j = n - 1;
        for i in 0..n {
            let va = &poly[j];
            let vb = &poly[i];
            let normal = [vb[2] - va[2], 0.0, -(vb[0] - va[0])];
            let (amin, amax) = project_poly(&normal, polya);
            let (bmin, bmax) = project_poly(&normal, polyb);
            if !overlap_range(amin, amax, bmin, bmax, EPS) {
                return false;
            }
            j = i;
        }
    }
    true
}

/// Picks a point inside a convex polygon from two uniform samples `s` and `t`
/// in `[0, 1)`. `areas` is scratch space with one slot per vertex.
pub fn dt_random_point_in_convex_poly(
    pts: &[[f32; 3]],
    areas: &mut [f32],
    s: f32,
    t: f32,
) -> [f32; 3] {
    let npts = pts.len();

    // Triangle fan areas around the first vertex.
    let mut areasum = 0.0;
    for i in 2..npts {
        areas[i] = dt_tri_area2d(&pts[0], &pts[i - 1], &pts[i]);
        areasum += areas[i].max(0.001);
    }

    let thr = s * areasum;
    let mut acc = 0.0;
    let mut u = 1.0;
    let mut tri = npts - 1;
    for (i, &dacc) in areas.iter().enumerate().take(npts).skip(2) {
        if thr >= acc && thr < (acc + dacc) {
            u = (thr - acc) / dacc;
            tri = i;
            break;
        }
        acc += dacc;
    }

    let v = t.sqrt();
    let a = 1.0 - v;
    let b = (1.0 - u) * v;
    let c = u * v;
    let pa = &pts[0];
    let pb = &pts[tri - 1];
    let pc = &pts[tri];

    [
        a * pa[0] + b * pb[0] + c * pc[0],
        a * pa[1] + b * pb[1] + c * pc[1],
        a * pa[2] + b * pb[2] + c * pc[2],
    ]
}

/// Area of a convex polygon's triangle fan in the xz-plane
pub fn dt_poly_area2d(verts: &[[f32; 3]]) -> f32 {
    (2..verts.len())
        .map(|j| dt_tri_area2d(&verts[0], &verts[j - 1], &verts[j]))
        .sum()
}

#[inline]
pub fn dt_next_pow2(mut v: u32) -> u32 {
    if v == 0 {
        return 0;
    }
    v -= 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v.wrapping_add(1)
}

/// Floor of log2, `dt_ilog2(0) == 0`
#[inline]
pub fn dt_ilog2(v: u32) -> u32 {
    if v == 0 {
        0
    } else {
        31 - v.leading_zeros()
    }
}

#[inline]
pub fn dt_align4(x: usize) -> usize {
    (x + 3) & !3
}

/// Neighbour direction seen from the other side of a tile border
#[inline]
pub fn dt_opposite_tile(side: u8) -> u8 {
    (side + 4) & 0x7
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: [[f32; 3]; 4] = [
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 0.0, 1.0],
        [1.0, 0.0, 0.0],
    ];

    #[test]
    fn test_closest_point_on_triangle_regions() {
        let a = [0.0, 0.0, 0.0];
        let b = [1.0, 0.0, 0.0];
        let c = [0.0, 0.0, 1.0];

        assert_eq!(dt_closest_pt_point_triangle(&[-1.0, 0.0, -1.0], &a, &b, &c), a);
        assert_eq!(dt_closest_pt_point_triangle(&[2.0, 0.0, -0.5], &a, &b, &c), b);
        let inside = [0.25, 3.0, 0.25];
        let p = dt_closest_pt_point_triangle(&inside, &a, &b, &c);
        assert!((p[0] - 0.25).abs() < 1e-6 && p[1].abs() < 1e-6 && (p[2] - 0.25).abs() < 1e-6);
        let edge = dt_closest_pt_point_triangle(&[0.5, 0.0, -1.0], &a, &b, &c);
        assert!((edge[0] - 0.5).abs() < 1e-6 && edge[2].abs() < 1e-6);
    }

    #[test]
    fn test_closest_height_point_triangle() {
        let a = [0.0, 1.0, 0.0];
        let b = [0.0, 1.0, 2.0];
        let c = [2.0, 3.0, 0.0];
        let h = dt_closest_height_point_triangle(&[1.0, 0.0, 0.5], &a, &b, &c).unwrap();
        assert!((h - 2.0).abs() < 1e-5);
        assert!(dt_closest_height_point_triangle(&[3.0, 0.0, 3.0], &a, &b, &c).is_none());
    }

    #[test]
    fn test_point_in_polygon_and_edges() {
        assert!(dt_point_in_polygon(&[0.5, 0.0, 0.5], &SQUARE));
        assert!(!dt_point_in_polygon(&[1.5, 0.0, 0.5], &SQUARE));

        let mut ed = [0.0; 4];
        let mut et = [0.0; 4];
        let inside = dt_distance_pt_poly_edges_sqr(&[1.5, 0.0, 0.5], &SQUARE, &mut ed, &mut et);
        assert!(!inside);
        // Edge 2 runs from (1,0,1) to (1,0,0).
        assert!((ed[2] - 0.25).abs() < 1e-6);
        assert!((et[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_intersect_segment_poly2d() {
        let hit = dt_intersect_segment_poly2d(&[0.5, 0.0, 0.5], &[2.5, 0.0, 0.5], &SQUARE).unwrap();
        assert_eq!(hit.tmin, 0.0);
        assert!((hit.tmax - 0.25).abs() < 1e-6);
        assert_eq!(hit.seg_min, None);
        assert_eq!(hit.seg_max, Some(2));

        let inside = dt_intersect_segment_poly2d(&[0.2, 0.0, 0.2], &[0.8, 0.0, 0.8], &SQUARE).unwrap();
        assert_eq!(inside.seg_max, None);

        assert!(dt_intersect_segment_poly2d(&[2.0, 0.0, 2.0], &[3.0, 0.0, 3.0], &SQUARE).is_none());
    }

    #[test]
    fn test_intersect_seg_seg2d() {
        let (s, t) = dt_intersect_seg_seg2d(
            &[0.0, 0.0, 0.0],
            &[2.0, 0.0, 0.0],
            &[1.0, 0.0, -1.0],
            &[1.0, 0.0, 1.0],
        )
        .unwrap();
        assert!((s - 0.5).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);
        assert!(dt_intersect_seg_seg2d(
            &[0.0, 0.0, 0.0],
            &[1.0, 0.0, 0.0],
            &[0.0, 0.0, 1.0],
            &[1.0, 0.0, 1.0]
        )
        .is_none());
    }

    #[test]
    fn test_overlap_poly_poly2d() {
        let shifted: Vec<[f32; 3]> = SQUARE.iter().map(|v| [v[0] + 0.5, v[1], v[2]]).collect();
        let far: Vec<[f32; 3]> = SQUARE.iter().map(|v| [v[0] + 3.0, v[1], v[2]]).collect();
        assert!(dt_overlap_poly_poly2d(&SQUARE, &shifted));
        assert!(!dt_overlap_poly_poly2d(&SQUARE, &far));
    }

    #[test]
    fn test_random_point_stays_inside() {
        let mut rng = fastrand::Rng::with_seed(7);
        let mut areas = [0.0; 4];
        for _ in 0..200 {
            let p = dt_random_point_in_convex_poly(&SQUARE, &mut areas, rng.f32(), rng.f32());
            assert!((-1e-5..=1.0 + 1e-5).contains(&p[0]));
            assert!((-1e-5..=1.0 + 1e-5).contains(&p[2]));
        }
    }

    #[test]
    fn test_integer_helpers() {
        assert_eq!(dt_next_pow2(0), 0);
        assert_eq!(dt_next_pow2(1), 1);
        assert_eq!(dt_next_pow2(5), 8);
        assert_eq!(dt_next_pow2(64), 64);
        assert_eq!(dt_ilog2(1), 0);
        assert_eq!(dt_ilog2(64), 6);
        assert_eq!(dt_ilog2(100), 6);
        assert_eq!(dt_align4(5), 8);
        assert_eq!(dt_align4(8), 8);
        assert_eq!(dt_opposite_tile(0), 4);
        assert_eq!(dt_opposite_tile(6), 2);
    }
}
