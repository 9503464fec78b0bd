//! Polygon meshing of layer contours
//!
//! Each contour is ear-clipped into triangles which are then greedily merged
//! into convex polygons of up to [`DT_VERTS_PER_POLYGON`] vertices. Contour
//! vertices flagged as removable are taken out afterwards and the hole they
//! leave is re-triangulated. The result uses the polygon layout expected by
//! [`NavMeshCreateParams`](detour::NavMeshCreateParams).

use std::collections::VecDeque;

use detour::{DtStatus, PolyFlags, Result, DT_VERTS_PER_POLYGON};

use crate::tile_cache_builder::TileCacheContourSet;
use crate::TILECACHE_NULL_IDX;

/// Scratch limit for the edges around a removed vertex
pub const MAX_REM_EDGES: usize = 48;

const NVP: usize = DT_VERTS_PER_POLYGON;
const VERTEX_BUCKET_COUNT: usize = 1 << 8;

/// Polygon mesh of one layer, in cell units
#[derive(Debug, Clone, Default)]
pub struct TileCachePolyMesh {
    /// Vertices per polygon
    pub nvp: usize,
    /// `[x, y, z]` per vertex
    pub verts: Vec<u16>,
    /// `2 * nvp` entries per polygon: vertex indices padded with
    /// [`TILECACHE_NULL_IDX`], then neighbour polygon per edge. A neighbour
    /// with bit 0x8000 set is a portal whose direction is in the low bits.
    pub polys: Vec<u16>,
    pub flags: Vec<PolyFlags>,
    pub areas: Vec<u8>,
}

impl TileCachePolyMesh {
    pub fn vert_count(&self) -> usize {
        self.verts.len() / 3
    }

    pub fn poly_count(&self) -> usize {
        self.areas.len()
    }

    /// Vertex and neighbour slots of polygon `i`
    pub fn poly(&self, i: usize) -> &[u16] {
        &self.polys[i * NVP * 2..(i + 1) * NVP * 2]
    }

    fn push_poly(&mut self, verts: &[u16], area: u8) {
        self.polys.extend_from_slice(&verts[..NVP]);
        self.polys.extend_from_slice(&[TILECACHE_NULL_IDX; NVP]);
        self.areas.push(area);
        self.flags.push(PolyFlags::empty());
    }
}

#[inline]
fn prev(i: usize, n: usize) -> usize {
    if i >= 1 {
        i - 1
    } else {
        n - 1
    }
}

#[inline]
fn next(i: usize, n: usize) -> usize {
    if i + 1 < n {
        i + 1
    } else {
        0
    }
}

fn area2(a: &[u8; 4], b: &[u8; 4], c: &[u8; 4]) -> i32 {
    (b[0] as i32 - a[0] as i32) * (c[2] as i32 - a[2] as i32)
        - (c[0] as i32 - a[0] as i32) * (b[2] as i32 - a[2] as i32)
}

/// c is strictly left of the directed line a to b
fn left(a: &[u8; 4], b: &[u8; 4], c: &[u8; 4]) -> bool {
    area2(a, b, c) < 0
}

fn left_on(a: &[u8; 4], b: &[u8; 4], c: &[u8; 4]) -> bool {
    area2(a, b, c) <= 0
}

fn collinear(a: &[u8; 4], b: &[u8; 4], c: &[u8; 4]) -> bool {
    area2(a, b, c) == 0
}

/// ab and cd share a point interior to both
fn intersect_prop(a: &[u8; 4], b: &[u8; 4], c: &[u8; 4], d: &[u8; 4]) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// c lies on the closed segment ab
fn between(a: &[u8; 4], b: &[u8; 4], c: &[u8; 4]) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[2] <= c[2] && c[2] <= b[2]) || (a[2] >= c[2] && c[2] >= b[2])
    }
}

fn intersect(a: &[u8; 4], b: &[u8; 4], c: &[u8; 4], d: &[u8; 4]) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

fn vequal(a: &[u8; 4], b: &[u8; 4]) -> bool {
    a[0] == b[0] && a[2] == b[2]
}

#[inline]
fn vert_at<'a>(verts: &'a [[u8; 4]], indices: &[u16], i: usize) -> &'a [u8; 4] {
    &verts[(indices[i] & 0x7fff) as usize]
}

/// (i, j) crosses no polygon edge, ignoring edges incident to i and j
fn diagonalie(i: usize, j: usize, verts: &[[u8; 4]], indices: &[u16]) -> bool {
    let n = indices.len();
    let d0 = vert_at(verts, indices, i);
    let d1 = vert_at(verts, indices, j);

    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vert_at(verts, indices, k);
        let p1 = vert_at(verts, indices, k1);
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

/// (i, j) is strictly inside the polygon in the neighbourhood of i
fn in_cone(i: usize, j: usize, verts: &[[u8; 4]], indices: &[u16]) -> bool {
    let n = indices.len();
    let pi = vert_at(verts, indices, i);
    let pj = vert_at(verts, indices, j);
    let pi1 = vert_at(verts, indices, next(i, n));
    let pin1 = vert_at(verts, indices, prev(i, n));

    if left_on(pin1, pi, pi1) {
        // Convex vertex.
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Reflex vertex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn diagonal(i: usize, j: usize, verts: &[[u8; 4]], indices: &[u16]) -> bool {
    in_cone(i, j, verts, indices) && diagonalie(i, j, verts, indices)
}

/// Ear-clips the polygon `indices` over `verts`, always cutting the ear
/// with the shortest diagonal.
///
/// Bit 0x8000 of each index is used as scratch. Returns false when the
/// polygon could not be fully triangulated; the triangles found so far are
/// still appended to `tris`.
fn triangulate(verts: &[[u8; 4]], indices: &mut Vec<u16>, tris: &mut Vec<[u16; 3]>) -> bool {
    if indices.len() < 3 {
        return false;
    }

    let n = indices.len();
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, verts, indices) {
            indices[i1] |= 0x8000;
        }
    }

    while indices.len() > 3 {
        let n = indices.len();
        let mut best: Option<(i32, usize)> = None;
        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1] & 0x8000 == 0 {
                continue;
            }
            let p0 = vert_at(verts, indices, i);
            let p2 = vert_at(verts, indices, next(i1, n));
            let dx = p2[0] as i32 - p0[0] as i32;
            let dz = p2[2] as i32 - p0[2] as i32;
            let len = dx * dx + dz * dz;
            if best.map_or(true, |(min_len, _)| len < min_len) {
                best = Some((len, i));
            }
        }

        let Some((_, i)) = best else {
            return false;
        };
        let i1 = next(i, n);
        let i2 = next(i1, n);
        tris.push([indices[i] & 0x7fff, indices[i1] & 0x7fff, indices[i2] & 0x7fff]);

        indices.remove(i1);
        let n = indices.len();
        let i1 = if i1 >= n { 0 } else { i1 };
        let i = prev(i1, n);

        if diagonal(prev(i, n), i1, verts, indices) {
            indices[i] |= 0x8000;
        } else {
            indices[i] &= 0x7fff;
        }
        if diagonal(i, next(i1, n), verts, indices) {
            indices[i1] |= 0x8000;
        } else {
            indices[i1] &= 0x7fff;
        }
    }

    tris.push([indices[0] & 0x7fff, indices[1] & 0x7fff, indices[2] & 0x7fff]);
    true
}

fn count_poly_verts(p: &[u16]) -> usize {
    p.iter()
        .take(NVP)
        .position(|&v| v == TILECACHE_NULL_IDX)
        .unwrap_or(NVP)
}

fn uleft(verts: &[u16], a: u16, b: u16, c: u16) -> bool {
    let (a, b, c) = (a as usize * 3, b as usize * 3, c as usize * 3);
    (verts[b] as i32 - verts[a] as i32) * (verts[c + 2] as i32 - verts[a + 2] as i32)
        - (verts[c] as i32 - verts[a] as i32) * (verts[b + 2] as i32 - verts[a + 2] as i32)
        < 0
}

/// Squared length of the edge shared by `pa` and `pb` together with the
/// edge index in each, when merging them keeps the result convex and small
/// enough
fn poly_merge_value(pa: &[u16], pb: &[u16], verts: &[u16]) -> Option<(i32, usize, usize)> {
    let na = count_poly_verts(pa);
    let nb = count_poly_verts(pb);
    if na + nb - 2 > NVP {
        return None;
    }

    let mut shared = None;
    for i in 0..na {
        let (mut va0, mut va1) = (pa[i], pa[(i + 1) % na]);
        if va0 > va1 {
            std::mem::swap(&mut va0, &mut va1);
        }
        for j in 0..nb {
            let (mut vb0, mut vb1) = (pb[j], pb[(j + 1) % nb]);
            if vb0 > vb1 {
                std::mem::swap(&mut vb0, &mut vb1);
            }
            if va0 == vb0 && va1 == vb1 {
                shared = Some((i, j));
                break;
            }
        }
    }
    let (ea, eb) = shared?;

    if !uleft(verts, pa[(ea + na - 1) % na], pa[ea], pb[(eb + 2) % nb]) {
        return None;
    }
    if !uleft(verts, pb[(eb + nb - 1) % nb], pb[eb], pa[(ea + 2) % na]) {
        return None;
    }

    let (va, vb) = (pa[ea] as usize * 3, pa[(ea + 1) % na] as usize * 3);
    let dx = verts[va] as i32 - verts[vb] as i32;
    let dz = verts[va + 2] as i32 - verts[vb + 2] as i32;
    Some((dx * dx + dz * dz, ea, eb))
}

/// Writes the union of polygons `a` and `b` (stride [`NVP`]) into `a`
fn merge_polys(polys: &mut [u16], a: usize, b: usize, ea: usize, eb: usize) {
    let mut pa = [TILECACHE_NULL_IDX; NVP];
    let mut pb = [TILECACHE_NULL_IDX; NVP];
    pa.copy_from_slice(&polys[a * NVP..(a + 1) * NVP]);
    pb.copy_from_slice(&polys[b * NVP..(b + 1) * NVP]);
    let na = count_poly_verts(&pa);
    let nb = count_poly_verts(&pb);

    let mut tmp = [TILECACHE_NULL_IDX; NVP * 2];
    let mut n = 0;
    for i in 0..na - 1 {
        tmp[n] = pa[(ea + 1 + i) % na];
        n += 1;
    }
    for i in 0..nb - 1 {
        tmp[n] = pb[(eb + 1 + i) % nb];
        n += 1;
    }
    polys[a * NVP..(a + 1) * NVP].copy_from_slice(&tmp[..NVP]);
}

/// Repeatedly merges the pair of polygons sharing the longest edge until
/// no merge keeps a polygon convex
fn merge_polygons(polys: &mut [u16], npolys: &mut usize, verts: &[u16], mut areas: Option<&mut [u8]>) {
    loop {
        let mut best: Option<(i32, usize, usize, usize, usize)> = None;
        for j in 0..npolys.saturating_sub(1) {
            for k in j + 1..*npolys {
                let pj = &polys[j * NVP..(j + 1) * NVP];
                let pk = &polys[k * NVP..(k + 1) * NVP];
                if let Some((v, ea, eb)) = poly_merge_value(pj, pk, verts) {
                    if v > best.map_or(0, |b| b.0) {
                        best = Some((v, j, k, ea, eb));
                    }
                }
            }
        }

        let Some((_, pa, pb, ea, eb)) = best else {
            break;
        };
        merge_polys(polys, pa, pb, ea, eb);
        let last = *npolys - 1;
        polys.copy_within(last * NVP..(last + 1) * NVP, pb * NVP);
        if let Some(areas) = areas.as_deref_mut() {
            areas[pb] = areas[last];
        }
        *npolys -= 1;
    }
}

fn compute_vertex_hash(x: u16, y: u16, z: u16) -> usize {
    const H1: u32 = 0x8da6_b343;
    const H2: u32 = 0xd816_3841;
    const H3: u32 = 0xcb1a_b31f;
    let n = H1
        .wrapping_mul(x as u32)
        .wrapping_add(H2.wrapping_mul(y as u32))
        .wrapping_add(H3.wrapping_mul(z as u32));
    n as usize & (VERTEX_BUCKET_COUNT - 1)
}

/// Welds vertices with equal x and z whose heights are within 2 cells
struct VertexWelder {
    first: [u16; VERTEX_BUCKET_COUNT],
    next: Vec<u16>,
}

impl VertexWelder {
    fn new() -> Self {
        Self {
            first: [TILECACHE_NULL_IDX; VERTEX_BUCKET_COUNT],
            next: Vec::new(),
        }
    }

    fn add(&mut self, x: u16, y: u16, z: u16, verts: &mut Vec<u16>) -> u16 {
        let bucket = compute_vertex_hash(x, 0, z);
        let mut i = self.first[bucket];
        while i != TILECACHE_NULL_IDX {
            let v = &verts[i as usize * 3..i as usize * 3 + 3];
            if v[0] == x && v[2] == z && (v[1] as i32 - y as i32).abs() <= 2 {
                return i;
            }
            i = self.next[i as usize];
        }

        let i = (verts.len() / 3) as u16;
        verts.extend_from_slice(&[x, y, z]);
        self.next.push(self.first[bucket]);
        self.first[bucket] = i;
        i
    }
}

fn can_remove_vertex(mesh: &TileCachePolyMesh, rem: u16) -> bool {
    let mut num_touched_verts = 0;
    let mut num_remaining_edges = 0;
    for i in 0..mesh.poly_count() {
        let p = mesh.poly(i);
        let nv = count_poly_verts(p);
        let num_removed = p[..nv].iter().filter(|&&v| v == rem).count();
        if num_removed > 0 {
            num_touched_verts += num_removed;
            num_remaining_edges += nv - (num_removed + 1);
        }
    }

    // Too few edges left to form a polygon, e.g. the tip of a lone triangle.
    if num_remaining_edges <= 2 {
        return false;
    }
    if num_touched_verts * 2 > MAX_REM_EDGES {
        return false;
    }

    // [rem, other, share count]
    let mut edges: Vec<[u16; 3]> = Vec::with_capacity(MAX_REM_EDGES);
    for i in 0..mesh.poly_count() {
        let p = mesh.poly(i);
        let nv = count_poly_verts(p);
        for j in 0..nv {
            let k = prev(j, nv);
            if p[j] != rem && p[k] != rem {
                continue;
            }
            let (mut a, mut b) = (p[j], p[k]);
            if b == rem {
                std::mem::swap(&mut a, &mut b);
            }
            let mut exists = false;
            for e in edges.iter_mut().filter(|e| e[1] == b) {
                e[2] += 1;
                exists = true;
            }
            if !exists {
                edges.push([a, b, 1]);
            }
        }
    }

    // More than two open edges means two polygons meet only at the vertex.
    edges.iter().filter(|e| e[2] < 2).count() <= 2
}

fn remove_vertex(mesh: &mut TileCachePolyMesh, rem: u16, max_tris: usize) -> Result<()> {
    let stride = NVP * 2;
    let too_small = || DtStatus::failure_detail(DtStatus::DT_BUFFER_TOO_SMALL);

    // Boundary edges of the polygons being removed: [from, to, area].
    let mut edges: Vec<[u16; 3]> = Vec::with_capacity(MAX_REM_EDGES);
    let mut i = 0;
    while i < mesh.poly_count() {
        let p = mesh.poly(i).to_vec();
        let nv = count_poly_verts(&p);
        if !p[..nv].contains(&rem) {
            i += 1;
            continue;
        }
        for j in 0..nv {
            let k = prev(j, nv);
            if p[j] != rem && p[k] != rem {
                if edges.len() >= MAX_REM_EDGES {
                    return Err(too_small());
                }
                edges.push([p[k], p[j], mesh.areas[i] as u16]);
            }
        }

        let last = mesh.poly_count() - 1;
        mesh.polys.copy_within(last * stride..last * stride + NVP, i * stride);
        mesh.polys[i * stride + NVP..(i + 1) * stride].fill(TILECACHE_NULL_IDX);
        mesh.areas[i] = mesh.areas[last];
        mesh.flags[i] = mesh.flags[last];
        mesh.polys.truncate(last * stride);
        mesh.areas.truncate(last);
        mesh.flags.truncate(last);
    }

    let r = rem as usize;
    mesh.verts.drain(r * 3..r * 3 + 3);

    for i in 0..mesh.poly_count() {
        let base = i * stride;
        let nv = count_poly_verts(&mesh.polys[base..base + NVP]);
        for v in mesh.polys[base..base + nv].iter_mut() {
            if *v > rem {
                *v -= 1;
            }
        }
    }
    for e in edges.iter_mut() {
        for v in e.iter_mut().take(2) {
            if *v > rem {
                *v -= 1;
            }
        }
    }

    if edges.is_empty() {
        return Ok(());
    }

    // Chain the edges into the outline of the hole.
    let mut hole: VecDeque<u16> = VecDeque::from([edges[0][0]]);
    let mut harea: VecDeque<u16> = VecDeque::from([edges[0][2]]);
    while !edges.is_empty() {
        let mut matched = false;
        let mut i = 0;
        while i < edges.len() {
            let [ea, eb, a] = edges[i];
            let add = if hole[0] == eb {
                if hole.len() >= MAX_REM_EDGES {
                    return Err(too_small());
                }
                hole.push_front(ea);
                harea.push_front(a);
                true
            } else if hole[hole.len() - 1] == ea {
                if hole.len() >= MAX_REM_EDGES {
                    return Err(too_small());
                }
                hole.push_back(eb);
                harea.push_back(a);
                true
            } else {
                false
            };
            if add {
                edges.swap_remove(i);
                matched = true;
            } else {
                i += 1;
            }
        }
        if !matched {
            break;
        }
    }

    let tverts: Vec<[u8; 4]> = hole
        .iter()
        .map(|&pi| {
            let v = &mesh.verts[pi as usize * 3..pi as usize * 3 + 3];
            [v[0] as u8, v[1] as u8, v[2] as u8, 0]
        })
        .collect();
    let mut tpoly: Vec<u16> = (0..hole.len() as u16).collect();
    let mut tris = Vec::new();
    if !triangulate(&tverts, &mut tpoly, &mut tris) {
        log::debug!("hole of vertex {} triangulated partially", rem);
    }
    if tris.len() > MAX_REM_EDGES {
        return Err(too_small());
    }

    let mut polys = vec![TILECACHE_NULL_IDX; tris.len() * NVP];
    let mut pareas = vec![0u8; tris.len()];
    let mut npolys = 0;
    for t in &tris {
        if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
            polys[npolys * NVP] = hole[t[0] as usize];
            polys[npolys * NVP + 1] = hole[t[1] as usize];
            polys[npolys * NVP + 2] = hole[t[2] as usize];
            pareas[npolys] = harea[t[0] as usize] as u8;
            npolys += 1;
        }
    }
    if npolys == 0 {
        return Ok(());
    }

    merge_polygons(&mut polys, &mut npolys, &mesh.verts, Some(&mut pareas));

    for i in 0..npolys {
        if mesh.poly_count() >= max_tris {
            break;
        }
        mesh.push_poly(&polys[i * NVP..(i + 1) * NVP], pareas[i]);
    }
    Ok(())
}

fn overlap_range_exl(amin: u16, amax: u16, bmin: u16, bmax: u16) -> bool {
    !(amin >= bmax || amax <= bmin)
}

#[derive(Debug, Clone, Copy)]
struct MeshEdge {
    vert: [u16; 2],
    poly_edge: [u16; 2],
    poly: [u16; 2],
}

/// Fills in the neighbour slots of every polygon. Edges lying on a contour
/// portal get `0x8000 | dir`.
fn build_mesh_adjacency(mesh: &mut TileCachePolyMesh, lcset: &TileCacheContourSet) {
    let stride = NVP * 2;
    let npolys = mesh.poly_count();
    let nverts = mesh.vert_count();

    let mut first_edge = vec![usize::MAX; nverts];
    let mut next_edge: Vec<usize> = Vec::with_capacity(npolys * NVP);
    let mut edges: Vec<MeshEdge> = Vec::with_capacity(npolys * NVP);

    for i in 0..npolys {
        let t = &mesh.polys[i * stride..i * stride + NVP];
        let nv = count_poly_verts(t);
        for j in 0..nv {
            let v0 = t[j];
            let v1 = t[next(j, nv)];
            if v0 < v1 {
                edges.push(MeshEdge {
                    vert: [v0, v1],
                    poly: [i as u16, i as u16],
                    poly_edge: [j as u16, 0xff],
                });
                next_edge.push(first_edge[v0 as usize]);
                first_edge[v0 as usize] = edges.len() - 1;
            }
        }
    }

    for i in 0..npolys {
        let t = &mesh.polys[i * stride..i * stride + NVP];
        let nv = count_poly_verts(t);
        for j in 0..nv {
            let v0 = t[j];
            let v1 = t[next(j, nv)];
            if v0 <= v1 {
                continue;
            }
            let mut found = false;
            let mut e = first_edge[v1 as usize];
            while e != usize::MAX {
                let edge = &mut edges[e];
                if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                    edge.poly[1] = i as u16;
                    edge.poly_edge[1] = j as u16;
                    found = true;
                    break;
                }
                e = next_edge[e];
            }
            if !found {
                // Open edge.
                edges.push(MeshEdge {
                    vert: [v1, v0],
                    poly: [i as u16, i as u16],
                    poly_edge: [j as u16, 0xff],
                });
                next_edge.push(first_edge[v1 as usize]);
                first_edge[v1 as usize] = edges.len() - 1;
            }
        }
    }

    // Mark portal edges.
    let verts = &mesh.verts;
    for cont in lcset.conts.iter().filter(|c| c.verts.len() >= 3) {
        let n = cont.verts.len();
        for j in 0..n {
            let va = cont.verts[prev(j, n)];
            let vb = cont.verts[j];
            let dir = va[3] & 0xf;
            if dir == 0xf {
                continue;
            }

            // Directions 0 and 2 are edges at constant x, 1 and 3 at constant z.
            let (axis, other) = if dir == 0 || dir == 2 { (0, 2) } else { (2, 0) };
            let fixed = va[axis] as u16;
            let (mut lo, mut hi) = (va[other] as u16, vb[other] as u16);
            if lo > hi {
                std::mem::swap(&mut lo, &mut hi);
            }

            for e in edges.iter_mut().filter(|e| e.poly[0] == e.poly[1]) {
                let eva = e.vert[0] as usize * 3;
                let evb = e.vert[1] as usize * 3;
                if verts[eva + axis] != fixed || verts[evb + axis] != fixed {
                    continue;
                }
                let (mut elo, mut ehi) = (verts[eva + other], verts[evb + other]);
                if elo > ehi {
                    std::mem::swap(&mut elo, &mut ehi);
                }
                if overlap_range_exl(lo, hi, elo, ehi) {
                    e.poly_edge[1] = dir as u16;
                }
            }
        }
    }

    for e in &edges {
        let p0 = e.poly[0] as usize * stride;
        if e.poly[0] != e.poly[1] {
            let p1 = e.poly[1] as usize * stride;
            mesh.polys[p0 + NVP + e.poly_edge[0] as usize] = e.poly[1];
            mesh.polys[p1 + NVP + e.poly_edge[1] as usize] = e.poly[0];
        } else if e.poly_edge[1] != 0xff {
            mesh.polys[p0 + NVP + e.poly_edge[0] as usize] = 0x8000 | e.poly_edge[1];
        }
    }
}

/// Builds the polygon mesh of a contour set.
///
/// Every polygon gets the area of its contour and empty flags.
pub fn build_tile_cache_poly_mesh(lcset: &TileCacheContourSet) -> Result<TileCachePolyMesh> {
    let mut max_vertices = 0;
    let mut max_tris = 0;
    for cont in lcset.conts.iter().filter(|c| c.verts.len() >= 3) {
        max_vertices += cont.verts.len();
        max_tris += cont.verts.len() - 2;
    }
    if max_vertices >= TILECACHE_NULL_IDX as usize {
        return Err(DtStatus::failure_detail(DtStatus::DT_BUFFER_TOO_SMALL));
    }

    let mut mesh = TileCachePolyMesh {
        nvp: NVP,
        verts: Vec::with_capacity(max_vertices * 3),
        polys: Vec::with_capacity(max_tris * NVP * 2),
        flags: Vec::with_capacity(max_tris),
        areas: Vec::with_capacity(max_tris),
    };
    let mut vflags = vec![false; max_vertices];
    let mut welder = VertexWelder::new();

    for cont in lcset.conts.iter().filter(|c| c.verts.len() >= 3) {
        let nv = cont.verts.len();
        let mut indices: Vec<u16> = (0..nv as u16).collect();
        let mut tris = Vec::with_capacity(nv);
        if !triangulate(&cont.verts, &mut indices, &mut tris) {
            log::debug!("contour of region {} triangulated partially", cont.reg);
        }

        let indices: Vec<u16> = cont
            .verts
            .iter()
            .map(|v| {
                let i = welder.add(v[0] as u16, v[1] as u16, v[2] as u16, &mut mesh.verts);
                if v[3] & 0x80 != 0 {
                    vflags[i as usize] = true;
                }
                i
            })
            .collect();

        let mut polys = vec![TILECACHE_NULL_IDX; tris.len().max(1) * NVP];
        let mut npolys = 0;
        for t in &tris {
            if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
                polys[npolys * NVP] = indices[t[0] as usize];
                polys[npolys * NVP + 1] = indices[t[1] as usize];
                polys[npolys * NVP + 2] = indices[t[2] as usize];
                npolys += 1;
            }
        }
        if npolys == 0 {
            continue;
        }

        merge_polygons(&mut polys, &mut npolys, &mesh.verts, None);

        for j in 0..npolys {
            mesh.push_poly(&polys[j * NVP..(j + 1) * NVP], cont.area);
            if mesh.poly_count() > max_tris {
                return Err(DtStatus::failure_detail(DtStatus::DT_BUFFER_TOO_SMALL));
            }
        }
    }

    // Remove edge vertices.
    let mut i = 0;
    while i < mesh.vert_count() {
        if !vflags[i] || !can_remove_vertex(&mesh, i as u16) {
            i += 1;
            continue;
        }
        remove_vertex(&mut mesh, i as u16, max_tris)?;
        vflags.remove(i);
    }

    build_mesh_adjacency(&mut mesh, lcset);
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile_cache_builder::{build_tile_cache_contours, build_tile_cache_regions, TileCacheContour};
    use crate::test_layer_helpers::{flat_layer, layer_with_areas};
    use crate::TILECACHE_WALKABLE_AREA;

    fn contour(points: &[(u8, u8)]) -> TileCacheContour {
        TileCacheContour {
            verts: points.iter().map(|&(x, z)| [x, 0, z, 0x0f]).collect(),
            reg: 0,
            area: TILECACHE_WALKABLE_AREA,
        }
    }

    fn poly_verts(mesh: &TileCachePolyMesh, i: usize) -> Vec<u16> {
        let p = mesh.poly(i);
        p[..count_poly_verts(p)].to_vec()
    }

    #[test]
    fn test_triangulate_square() {
        let verts = [[0, 0, 0, 0], [0, 0, 4, 0], [4, 0, 4, 0], [4, 0, 0, 0]];
        let mut indices = vec![0, 1, 2, 3];
        let mut tris = Vec::new();
        assert!(triangulate(&verts, &mut indices, &mut tris));
        assert_eq!(tris.len(), 2);
        for t in &tris {
            assert!(t.iter().all(|&i| i < 4));
        }
    }

    #[test]
    fn test_triangulate_concave_polygon() {
        // An L shape has one reflex corner and needs four triangles.
        let verts = [
            [0, 0, 0, 0],
            [0, 0, 4, 0],
            [2, 0, 4, 0],
            [2, 0, 2, 0],
            [4, 0, 2, 0],
            [4, 0, 0, 0],
        ];
        let mut indices: Vec<u16> = (0..6).collect();
        let mut tris = Vec::new();
        assert!(triangulate(&verts, &mut indices, &mut tris));
        assert_eq!(tris.len(), 4);
    }

    #[test]
    fn test_square_contour_becomes_one_quad() {
        let cset = TileCacheContourSet {
            conts: vec![contour(&[(0, 0), (0, 4), (4, 4), (4, 0)])],
        };
        let mesh = build_tile_cache_poly_mesh(&cset).unwrap();
        assert_eq!(mesh.nvp, NVP);
        assert_eq!(mesh.vert_count(), 4);
        assert_eq!(mesh.poly_count(), 1);
        assert_eq!(poly_verts(&mesh, 0).len(), 4);
        assert_eq!(mesh.areas, vec![TILECACHE_WALKABLE_AREA]);
        // All edges are solid.
        assert!(mesh.poly(0)[NVP..].iter().all(|&n| n == TILECACHE_NULL_IDX));
    }

    #[test]
    fn test_l_contour_splits_into_convex_polys() {
        let cset = TileCacheContourSet {
            conts: vec![contour(&[(0, 0), (0, 4), (2, 4), (2, 2), (4, 2), (4, 0)])],
        };
        let mesh = build_tile_cache_poly_mesh(&cset).unwrap();
        assert_eq!(mesh.vert_count(), 6);
        assert_eq!(mesh.poly_count(), 2);

        // The two halves share one edge.
        let shared: usize = (0..2)
            .map(|i| mesh.poly(i)[NVP..].iter().filter(|&&n| n != TILECACHE_NULL_IDX).count())
            .sum();
        assert_eq!(shared, 2);
        assert_eq!(mesh.poly(0)[NVP..].iter().find(|&&n| n != TILECACHE_NULL_IDX), Some(&1));
    }

    #[test]
    fn test_shared_vertices_are_welded() {
        let cset = TileCacheContourSet {
            conts: vec![
                contour(&[(0, 0), (0, 4), (2, 4), (2, 0)]),
                contour(&[(2, 0), (2, 4), (4, 4), (4, 0)]),
            ],
        };
        let mesh = build_tile_cache_poly_mesh(&cset).unwrap();
        assert_eq!(mesh.vert_count(), 6);
        assert_eq!(mesh.poly_count(), 2);
        // Polygons from different contours become neighbours.
        assert!(mesh.poly(0)[NVP..].contains(&1));
        assert!(mesh.poly(1)[NVP..].contains(&0));
    }

    #[test]
    fn test_flat_layer_meshes_to_one_polygon() {
        let mut layer = flat_layer(8, 6);
        build_tile_cache_regions(&mut layer, 1).unwrap();
        let cset = build_tile_cache_contours(&layer, 1, 1.3).unwrap();
        let mesh = build_tile_cache_poly_mesh(&cset).unwrap();
        assert_eq!(mesh.poly_count(), 1);
        assert_eq!(mesh.vert_count(), 4);

        // Convex: every turn goes the same way.
        let p = poly_verts(&mesh, 0);
        let n = p.len();
        for i in 0..n {
            let a = p[i] as usize * 3;
            let b = p[(i + 1) % n] as usize * 3;
            let c = p[(i + 2) % n] as usize * 3;
            let v = &mesh.verts;
            let cross = (v[b] as i32 - v[a] as i32) * (v[c + 2] as i32 - v[a + 2] as i32)
                - (v[c] as i32 - v[a] as i32) * (v[b + 2] as i32 - v[a + 2] as i32);
            assert!(cross < 0);
        }
    }

    #[test]
    fn test_portal_edges_are_tagged() {
        let mut layer = flat_layer(4, 4);
        for z in 0..4 {
            layer.cons[(3 + z * 4) as usize] |= 1 << (4 + 2);
        }
        build_tile_cache_regions(&mut layer, 1).unwrap();
        let cset = build_tile_cache_contours(&layer, 1, 1.3).unwrap();
        let mesh = build_tile_cache_poly_mesh(&cset).unwrap();
        assert_eq!(mesh.poly_count(), 1);
        let portals: Vec<u16> = mesh.poly(0)[NVP..]
            .iter()
            .copied()
            .filter(|&n| n != TILECACHE_NULL_IDX)
            .collect();
        assert_eq!(portals, vec![0x8000 | 2]);
    }

    #[test]
    fn test_empty_contour_set() {
        let layer = layer_with_areas(2, 2, &[0, 0, 0, 0]);
        let cset = build_tile_cache_contours(&layer, 1, 1.3).unwrap();
        assert!(cset.conts.is_empty());
        let mesh = build_tile_cache_poly_mesh(&cset).unwrap();
        assert_eq!(mesh.poly_count(), 0);
        assert_eq!(mesh.vert_count(), 0);
    }
}
