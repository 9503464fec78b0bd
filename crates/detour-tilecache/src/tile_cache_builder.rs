//! Layer meshing: obstacle marking, regions and contours
//!
//! Rebuilding a tile runs the decompressed [`TileCacheLayer`] through
//! obstacle marking, [`build_tile_cache_regions`] and
//! [`build_tile_cache_contours`], then hands the contours to
//! [`build_tile_cache_poly_mesh`](crate::build_tile_cache_poly_mesh).
//! All coordinates here are in cells relative to the layer origin.

use detour::{DtStatus, Result};
use glam::Vec3;

use crate::tile_cache_data::TileCacheLayer;
use crate::TILECACHE_NULL_AREA;

/// Maximum neighbours tracked per monotone region
pub const LAYER_MAX_NEIS: usize = 16;

/// Maximum number of regions in one layer
pub const MAX_LAYER_REGIONS: usize = 255;

const NO_REGION: u8 = 0xff;

/// Direction offsets, indexed by direction: -x, +z, +x, -z
const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
const DIR_OFFSET_Y: [i32; 4] = [0, 1, 0, -1];

#[inline]
fn dir_offset_x(dir: usize) -> i32 {
    DIR_OFFSET_X[dir & 3]
}

#[inline]
fn dir_offset_y(dir: usize) -> i32 {
    DIR_OFFSET_Y[dir & 3]
}

/// Simplified outline of one region
#[derive(Debug, Clone, Default)]
pub struct TileCacheContour {
    /// `[x, y, z, flags]` per vertex. The low nibble of `flags` is the
    /// portal direction of the edge starting at the vertex (0xf for none),
    /// bit 0x80 marks a vertex the mesher may remove.
    pub verts: Vec<[u8; 4]>,
    pub reg: u8,
    pub area: u8,
}

/// Contours of a layer, indexed by region id
#[derive(Debug, Clone, Default)]
pub struct TileCacheContourSet {
    pub conts: Vec<TileCacheContour>,
}

#[derive(Debug, Clone, Copy, Default)]
struct LayerSweepSpan {
    /// Number of samples connected to `nei`
    ns: u16,
    id: u8,
    nei: u8,
}

#[derive(Debug, Clone, Copy)]
struct LayerMonotoneRegion {
    area: i32,
    neis: [u8; LAYER_MAX_NEIS],
    nneis: u8,
    reg_id: u8,
    area_id: u8,
}

impl Default for LayerMonotoneRegion {
    fn default() -> Self {
        Self {
            area: 0,
            neis: [0; LAYER_MAX_NEIS],
            nneis: 0,
            reg_id: NO_REGION,
            area_id: 0,
        }
    }
}

impl LayerMonotoneRegion {
    fn neighbours(&self) -> &[u8] {
        &self.neis[..self.nneis as usize]
    }

    fn add_unique_last(&mut self, v: u8) {
        let n = self.nneis as usize;
        if n > 0 && self.neis[n - 1] == v {
            return;
        }
        if n < LAYER_MAX_NEIS {
            self.neis[n] = v;
            self.nneis += 1;
        }
    }
}

fn is_connected(layer: &TileCacheLayer, ia: usize, ib: usize, walkable_climb: i32) -> bool {
    layer.areas[ia] == layer.areas[ib]
        && (layer.heights[ia] as i32 - layer.heights[ib] as i32).abs() <= walkable_climb
}

/// True when exactly one adjacency joins the regions labelled `old_id` and
/// `new_id`
fn can_merge(old_id: u8, new_id: u8, regs: &[LayerMonotoneRegion]) -> bool {
    let mut count = 0;
    for reg in regs.iter().filter(|r| r.reg_id == old_id) {
        count += reg
            .neighbours()
            .iter()
            .filter(|&&n| regs[n as usize].reg_id == new_id)
            .count();
    }
    count == 1
}

/// Partitions the walkable cells of a layer into regions.
///
/// Rows are swept in order, each run of connected cells either continuing
/// the single region above it or starting a new one. Regions with the same
/// area id that touch through exactly one adjacency are then merged and the
/// ids compacted. Fails with `BUFFER_TOO_SMALL` when the sweep needs more
/// than [`MAX_LAYER_REGIONS`] regions.
pub fn build_tile_cache_regions(layer: &mut TileCacheLayer, walkable_climb: i32) -> Result<()> {
    let w = layer.width();
    let h = layer.height();
    layer.regs = vec![NO_REGION; (w * h) as usize];

    let mut sweeps = vec![LayerSweepSpan::default(); w.max(1) as usize];
    let mut prev_count = [0u8; 256];
    let mut reg_id: usize = 0;

    for y in 0..h {
        prev_count[..reg_id].fill(0);
        let mut sweep_id: usize = 0;

        for x in 0..w {
            let idx = (x + y * w) as usize;
            if layer.areas[idx] == TILECACHE_NULL_AREA {
                continue;
            }

            let mut sid = NO_REGION;

            // -x
            if x > 0 {
                let xidx = idx - 1;
                if is_connected(layer, idx, xidx, walkable_climb) && layer.regs[xidx] != NO_REGION {
                    sid = layer.regs[xidx];
                }
            }

            if sid == NO_REGION {
                sid = sweep_id as u8;
                sweep_id += 1;
                sweeps[sid as usize].nei = NO_REGION;
                sweeps[sid as usize].ns = 0;
            }

            // -y
            if y > 0 {
                let yidx = idx - w as usize;
                let nr = layer.regs[yidx];
                if is_connected(layer, idx, yidx, walkable_climb) && nr != NO_REGION {
                    let sweep = &mut sweeps[sid as usize];
                    if sweep.ns == 0 {
                        sweep.nei = nr;
                    }
                    if sweep.nei == nr {
                        sweep.ns += 1;
                        prev_count[nr as usize] = prev_count[nr as usize].wrapping_add(1);
                    } else {
                        // More than one neighbour above.
                        sweep.nei = NO_REGION;
                    }
                }
            }

            layer.regs[idx] = sid;
        }

        for sweep in sweeps.iter_mut().take(sweep_id) {
            // Continue the region above only when this run is its sole
            // connection in the row.
            if sweep.nei != NO_REGION && prev_count[sweep.nei as usize] as u16 == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                if reg_id == MAX_LAYER_REGIONS {
                    log::warn!("layer ({}, {}) has too many regions", layer.header.tx, layer.header.ty);
                    return Err(DtStatus::failure_detail(DtStatus::DT_BUFFER_TOO_SMALL));
                }
                sweep.id = reg_id as u8;
                reg_id += 1;
            }
        }

        for x in 0..w {
            let idx = (x + y * w) as usize;
            if layer.regs[idx] != NO_REGION {
                layer.regs[idx] = sweeps[layer.regs[idx] as usize].id;
            }
        }
    }

    let nregs = reg_id;
    let mut regs = vec![LayerMonotoneRegion::default(); nregs];

    for y in 0..h {
        for x in 0..w {
            let idx = (x + y * w) as usize;
            let ri = layer.regs[idx];
            if ri == NO_REGION {
                continue;
            }
            regs[ri as usize].area += 1;
            regs[ri as usize].area_id = layer.areas[idx];

            if y > 0 {
                let ymi = idx - w as usize;
                let rai = layer.regs[ymi];
                if is_connected(layer, idx, ymi, walkable_climb) && rai != NO_REGION && rai != ri {
                    regs[ri as usize].add_unique_last(rai);
                    regs[rai as usize].add_unique_last(ri);
                }
            }
        }
    }

    for (i, reg) in regs.iter_mut().enumerate() {
        reg.reg_id = i as u8;
    }

    for i in 0..nregs {
        let mut merge: Option<usize> = None;
        let mut merge_area = 0;
        let reg = regs[i];
        for &nei in reg.neighbours() {
            let regn = &regs[nei as usize];
            if reg.reg_id == regn.reg_id || reg.area_id != regn.area_id {
                continue;
            }
            if regn.area > merge_area && can_merge(reg.reg_id, regn.reg_id, &regs) {
                merge_area = regn.area;
                merge = Some(nei as usize);
            }
        }
        if let Some(m) = merge {
            let old_id = reg.reg_id;
            let new_id = regs[m].reg_id;
            for r in regs.iter_mut().filter(|r| r.reg_id == old_id) {
                r.reg_id = new_id;
            }
        }
    }

    // Compact ids.
    let mut used = [false; 256];
    for reg in &regs {
        used[reg.reg_id as usize] = true;
    }
    let mut remap = [0u8; 256];
    let mut count: usize = 0;
    for (id, _) in used.iter().enumerate().filter(|(_, &u)| u) {
        remap[id] = count as u8;
        count += 1;
    }
    for reg in regs.iter_mut() {
        reg.reg_id = remap[reg.reg_id as usize];
    }

    layer.reg_count = count as u8;
    for r in layer.regs.iter_mut().filter(|r| **r != NO_REGION) {
        *r = regs[*r as usize].reg_id;
    }

    log::trace!(
        "layer ({}, {}, {}) has {} regions",
        layer.header.tx,
        layer.header.ty,
        layer.header.tlayer,
        count
    );
    Ok(())
}

/// Scratch outline used while tracing one region
struct TempContour {
    verts: Vec<[u8; 4]>,
    max_verts: usize,
    poly: Vec<usize>,
}

impl TempContour {
    fn new(max_verts: usize) -> Self {
        Self {
            verts: Vec::with_capacity(max_verts),
            max_verts,
            poly: Vec::with_capacity(max_verts),
        }
    }

    /// Appends a vertex, extending the last segment instead when the new
    /// point continues it along an axis. Returns false when full.
    fn append_vertex(&mut self, x: i32, y: i32, z: i32, r: u8) -> bool {
        let n = self.verts.len();
        if n > 1 {
            let pa = self.verts[n - 2];
            let pb = &mut self.verts[n - 1];
            if pb[3] == r {
                if pa[0] == pb[0] && pb[0] as i32 == x {
                    pb[1] = y as u8;
                    pb[2] = z as u8;
                    return true;
                } else if pa[2] == pb[2] && pb[2] as i32 == z {
                    pb[0] = x as u8;
                    pb[1] = y as u8;
                    return true;
                }
            }
        }
        if n + 1 > self.max_verts {
            return false;
        }
        self.verts.push([x as u8, y as u8, z as u8, r]);
        true
    }
}

/// Region across the edge `dir` of cell (ax, ay); 0xf8 + dir for a portal,
/// 0xff for a solid edge
fn neighbour_reg(layer: &TileCacheLayer, ax: i32, ay: i32, dir: usize) -> u8 {
    let w = layer.width();
    let ia = (ax + ay * w) as usize;
    let con = layer.cons[ia] & 0xf;
    let portal = layer.cons[ia] >> 4;
    let mask = 1u8 << dir;

    if con & mask == 0 {
        if portal & mask != 0 {
            return 0xf8 + dir as u8;
        }
        return NO_REGION;
    }

    let bx = ax + dir_offset_x(dir);
    let by = ay + dir_offset_y(dir);
    if bx < 0 || by < 0 || bx >= w || by >= layer.height() {
        return NO_REGION;
    }
    layer.regs[(bx + by * w) as usize]
}

fn walk_contour(layer: &TileCacheLayer, mut x: i32, mut y: i32, cont: &mut TempContour) -> bool {
    let w = layer.width();
    let h = layer.height();
    cont.verts.clear();

    let reg = layer.regs[(x + y * w) as usize];
    let start_x = x;
    let start_y = y;
    let start_dir = match (0..4)
        .map(|i| (i + 3) & 3)
        .find(|&dir| neighbour_reg(layer, x, y, dir) != reg)
    {
        Some(dir) => dir,
        None => return true,
    };

    let mut dir = start_dir;
    let max_iter = w * h;
    let mut iter = 0;
    while iter < max_iter {
        let rn = neighbour_reg(layer, x, y, dir);
        let (mut nx, mut ny) = (x, y);
        let ndir;

        if rn != reg {
            // Solid edge: emit the corner at the end of this edge.
            let (mut px, mut pz) = (x, y);
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }
            let py = layer.heights[(x + y * w) as usize] as i32;
            if !cont.append_vertex(px, py, pz, rn) {
                return false;
            }
            ndir = (dir + 1) & 3;
        } else {
            nx = x + dir_offset_x(dir);
            ny = y + dir_offset_y(dir);
            ndir = (dir + 3) & 3;
        }

        if iter > 0 && x == start_x && y == start_y && dir == start_dir {
            break;
        }

        x = nx;
        y = ny;
        dir = ndir;
        iter += 1;
    }

    // Drop the closing duplicate.
    if cont.verts.len() > 1 {
        let first = cont.verts[0];
        let last = cont.verts[cont.verts.len() - 1];
        if first[0] == last[0] && first[2] == last[2] {
            cont.verts.pop();
        }
    }
    true
}

fn distance_pt_seg(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let dx = (x - px) as f32;
    let dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = px as f32 + t * pqx - x as f32;
    let dz = pz as f32 + t * pqz - z as f32;
    dx * dx + dz * dz
}

fn simplify_contour(cont: &mut TempContour, max_error: f32) {
    let n = cont.verts.len();
    cont.poly.clear();
    if n == 0 {
        return;
    }

    // Keep every vertex where the neighbour changes.
    for i in 0..n {
        let j = (i + 1) % n;
        if cont.verts[j][3] != cont.verts[i][3] {
            cont.poly.push(i);
        }
    }

    if cont.poly.len() < 2 {
        // No transitions: seed with the lower-left and upper-right corners.
        let (mut lli, mut uri) = (0, 0);
        for i in 1..n {
            let (x, z) = (cont.verts[i][0], cont.verts[i][2]);
            let ll = cont.verts[lli];
            if x < ll[0] || (x == ll[0] && z < ll[2]) {
                lli = i;
            }
            let ur = cont.verts[uri];
            if x > ur[0] || (x == ur[0] && z > ur[2]) {
                uri = i;
            }
        }
        cont.poly.clear();
        cont.poly.push(lli);
        cont.poly.push(uri);
    }

    let max_error_sqr = max_error * max_error;
    let mut i = 0;
    while i < cont.poly.len() {
        let ii = (i + 1) % cont.poly.len();
        let ai = cont.poly[i];
        let bi = cont.poly[ii];
        let (ax, az) = (cont.verts[ai][0] as i32, cont.verts[ai][2] as i32);
        let (bx, bz) = (cont.verts[bi][0] as i32, cont.verts[bi][2] as i32);

        // Walk the segment in lexicographic order so that shared segments
        // are tessellated the same way from both sides.
        let (mut ci, cinc, endi) = if bx > ax || (bx == ax && bz > az) {
            ((ai + 1) % n, 1, bi)
        } else {
            ((bi + n - 1) % n, n - 1, ai)
        };

        let mut maxd = 0.0f32;
        let mut maxi = None;
        while ci != endi {
            let v = cont.verts[ci];
            let d = distance_pt_seg(v[0] as i32, v[2] as i32, ax, az, bx, bz);
            if d > maxd {
                maxd = d;
                maxi = Some(ci);
            }
            ci = (ci + cinc) % n;
        }

        match maxi {
            Some(m) if maxd > max_error_sqr => cont.poly.insert(i + 1, m),
            _ => i += 1,
        }
    }

    // Rotate so the lowest source index comes first.
    let start = (0..cont.poly.len())
        .min_by_key(|&k| cont.poly[k])
        .unwrap_or(0);
    let simplified: Vec<[u8; 4]> = (0..cont.poly.len())
        .map(|k| cont.verts[cont.poly[(start + k) % cont.poly.len()]])
        .collect();
    cont.verts = simplified;
}

/// Highest walkable sample around a vertex, and whether the vertex sits on
/// a straight portal inside a single region and can be removed
fn corner_height(layer: &TileCacheLayer, x: i32, y: i32, z: i32, walkable_climb: i32) -> (u8, bool) {
    let w = layer.width();
    let h = layer.height();

    let mut n = 0;
    let mut portal = 0xfu8;
    let mut height = 0u8;
    let mut preg = NO_REGION;
    let mut all_same_reg = true;

    for dz in -1..=0 {
        for dx in -1..=0 {
            let px = x + dx;
            let pz = z + dz;
            if px < 0 || pz < 0 || px >= w || pz >= h {
                continue;
            }
            let idx = (px + pz * w) as usize;
            let lh = layer.heights[idx] as i32;
            if (lh - y).abs() <= walkable_climb && layer.areas[idx] != TILECACHE_NULL_AREA {
                height = height.max(lh as u8);
                portal &= layer.cons[idx] >> 4;
                if preg != NO_REGION && preg != layer.regs[idx] {
                    all_same_reg = false;
                }
                preg = layer.regs[idx];
                n += 1;
            }
        }
    }

    let portal_count = portal.count_ones();
    (height, n > 1 && portal_count == 1 && all_same_reg)
}

/// Traces and simplifies the outline of every region in a layer.
///
/// Expects regions from [`build_tile_cache_regions`]. Contours are indexed
/// by region id.
pub fn build_tile_cache_contours(
    layer: &TileCacheLayer,
    walkable_climb: i32,
    max_error: f32,
) -> Result<TileCacheContourSet> {
    let w = layer.width();
    let h = layer.height();
    let mut cset = TileCacheContourSet {
        conts: vec![TileCacheContour::default(); layer.reg_count as usize],
    };

    // Twice around the layer.
    let max_temp_verts = ((w + h) * 2 * 2) as usize;
    let mut temp = TempContour::new(max_temp_verts);

    for y in 0..h {
        for x in 0..w {
            let idx = (x + y * w) as usize;
            let ri = layer.regs[idx];
            if ri == NO_REGION || ri as usize >= cset.conts.len() {
                continue;
            }
            if !cset.conts[ri as usize].verts.is_empty() {
                continue;
            }

            if !walk_contour(layer, x, y, &mut temp) {
                log::warn!("contour of region {} is too complex", ri);
                return Err(DtStatus::failure_detail(DtStatus::DT_BUFFER_TOO_SMALL));
            }
            simplify_contour(&mut temp, max_error);

            let n = temp.verts.len();
            let mut verts = vec![[0u8; 4]; n];
            for i in 0..n {
                let j = if i == 0 { n - 1 } else { i - 1 };
                let v = temp.verts[j];
                // The neighbour of a segment is stored on its end vertex.
                let nei = temp.verts[i][3];
                let (lh, should_remove) =
                    corner_height(layer, v[0] as i32, v[1] as i32, v[2] as i32, walkable_climb);

                let mut flags = if nei != NO_REGION && nei >= 0xf8 { nei - 0xf8 } else { 0x0f };
                if should_remove {
                    flags |= 0x80;
                }
                verts[j] = [v[0], lh, v[2], flags];
            }

            let cont = &mut cset.conts[ri as usize];
            cont.reg = ri;
            cont.area = layer.areas[idx];
            cont.verts = verts;
        }
    }

    Ok(cset)
}

/// Cell-space extent of a world box clipped to the grid, or `None` when it
/// misses the grid
struct CellRange {
    minx: i32,
    maxx: i32,
    minz: i32,
    maxz: i32,
    miny: i32,
    maxy: i32,
}

impl CellRange {
    fn clip(layer: &TileCacheLayer, lo: Vec3, hi: Vec3) -> Option<Self> {
        let (w, h) = (layer.width(), layer.height());
        let range = Self {
            minx: lo.x.floor() as i32,
            maxx: hi.x.floor() as i32,
            minz: lo.z.floor() as i32,
            maxz: hi.z.floor() as i32,
            miny: lo.y.floor() as i32,
            maxy: hi.y.floor() as i32,
        };
        if range.maxx < 0 || range.minx >= w || range.maxz < 0 || range.minz >= h {
            return None;
        }
        Some(Self {
            minx: range.minx.max(0),
            maxx: range.maxx.min(w - 1),
            minz: range.minz.max(0),
            maxz: range.maxz.min(h - 1),
            ..range
        })
    }

    fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        (self.minz..=self.maxz).flat_map(move |z| (self.minx..=self.maxx).map(move |x| (x, z)))
    }
}

/// Converts a world position to grid units relative to `orig`
fn to_grid(p: Vec3, orig: Vec3, cs: f32, ch: f32) -> Vec3 {
    (p - orig) / Vec3::new(cs, ch, cs)
}

fn mark_cell(layer: &mut TileCacheLayer, x: i32, z: i32, range: &CellRange, area_id: u8) {
    let idx = (x + z * layer.width()) as usize;
    let y = layer.heights[idx] as i32;
    if y >= range.miny && y <= range.maxy {
        layer.areas[idx] = area_id;
    }
}

/// Sets `area_id` on every cell whose center lies inside a vertical cylinder
/// and whose height is within its vertical extent
#[allow(clippy::too_many_arguments)]
pub fn mark_cylinder_area(
    layer: &mut TileCacheLayer,
    orig: &[f32; 3],
    cs: f32,
    ch: f32,
    pos: &[f32; 3],
    radius: f32,
    height: f32,
    area_id: u8,
) {
    let orig = Vec3::from_array(*orig);
    let pos = Vec3::from_array(*pos);
    let lo = to_grid(pos - Vec3::new(radius, 0.0, radius), orig, cs, ch);
    let hi = to_grid(pos + Vec3::new(radius, height, radius), orig, cs, ch);
    let center = to_grid(pos, orig, cs, ch);
    let r2 = (radius / cs + 0.5) * (radius / cs + 0.5);

    let Some(range) = CellRange::clip(layer, lo, hi) else {
        return;
    };
    for (x, z) in range.cells() {
        let dx = x as f32 + 0.5 - center.x;
        let dz = z as f32 + 0.5 - center.z;
        if dx * dx + dz * dz > r2 {
            continue;
        }
        mark_cell(layer, x, z, &range, area_id);
    }
}

/// Sets `area_id` on every cell inside an axis-aligned box
pub fn mark_box_area(
    layer: &mut TileCacheLayer,
    orig: &[f32; 3],
    cs: f32,
    ch: f32,
    bmin: &[f32; 3],
    bmax: &[f32; 3],
    area_id: u8,
) {
    let orig = Vec3::from_array(*orig);
    let lo = to_grid(Vec3::from_array(*bmin), orig, cs, ch);
    let hi = to_grid(Vec3::from_array(*bmax), orig, cs, ch);

    let Some(range) = CellRange::clip(layer, lo, hi) else {
        return;
    };
    for (x, z) in range.cells() {
        mark_cell(layer, x, z, &range, area_id);
    }
}

/// Sets `area_id` on every cell inside a box rotated about the y axis.
///
/// `rot_aux` is `[cos(a/2) * sin(-a/2), cos(a/2)^2 - 0.5]` for rotation `a`.
#[allow(clippy::too_many_arguments)]
pub fn mark_oriented_box_area(
    layer: &mut TileCacheLayer,
    orig: &[f32; 3],
    cs: f32,
    ch: f32,
    center: &[f32; 3],
    half_extents: &[f32; 3],
    rot_aux: &[f32; 2],
    area_id: u8,
) {
    let orig = Vec3::from_array(*orig);
    let c = to_grid(Vec3::from_array(*center), orig, cs, ch);
    let maxr = 1.41 * half_extents[0].max(half_extents[2]) / cs;
    let lo = Vec3::new(
        c.x - maxr,
        (center[1] - half_extents[1] - orig.y) / ch,
        c.z - maxr,
    );
    let hi = Vec3::new(
        c.x + maxr,
        (center[1] + half_extents[1] - orig.y) / ch,
        c.z + maxr,
    );

    let Some(range) = CellRange::clip(layer, lo, hi) else {
        return;
    };
    let xhalf = half_extents[0] / cs + 0.5;
    let zhalf = half_extents[2] / cs + 0.5;
    for (x, z) in range.cells() {
        let x2 = 2.0 * (x as f32 - c.x);
        let z2 = 2.0 * (z as f32 - c.z);
        let xrot = rot_aux[1] * x2 + rot_aux[0] * z2;
        if xrot.abs() > xhalf {
            continue;
        }
        let zrot = rot_aux[1] * z2 - rot_aux[0] * x2;
        if zrot.abs() > zhalf {
            continue;
        }
        mark_cell(layer, x, z, &range, area_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_layer_helpers::{flat_layer, layer_with_areas};
    use crate::TILECACHE_WALKABLE_AREA;

    #[test]
    fn test_flat_layer_is_one_region() {
        let mut layer = flat_layer(8, 6);
        build_tile_cache_regions(&mut layer, 1).unwrap();
        assert_eq!(layer.reg_count, 1);
        assert!(layer.regs.iter().all(|&r| r == 0));
    }

    #[test]
    fn test_null_area_has_no_region() {
        let mut layer = layer_with_areas(4, 1, &[63, 0, 63, 63]);
        build_tile_cache_regions(&mut layer, 1).unwrap();
        assert_eq!(layer.reg_count, 2);
        assert_eq!(layer.regs[1], NO_REGION);
        assert_ne!(layer.regs[0], layer.regs[2]);
        assert_eq!(layer.regs[2], layer.regs[3]);
    }

    #[test]
    fn test_different_areas_stay_apart() {
        // Left half area 1, right half area 2.
        let areas: Vec<u8> = (0..16).map(|i| if i % 4 < 2 { 1 } else { 2 }).collect();
        let mut layer = layer_with_areas(4, 4, &areas);
        build_tile_cache_regions(&mut layer, 1).unwrap();
        assert_eq!(layer.reg_count, 2);
        assert_eq!(layer.regs[0], layer.regs[13]);
        assert_ne!(layer.regs[0], layer.regs[2]);
    }

    #[test]
    fn test_u_shape_merges_into_one_region() {
        // The two arms split off the first row as separate regions and
        // merge back since each touches it through a single adjacency.
        #[rustfmt::skip]
        let areas = [
            63, 63, 63,
            63, 0, 63,
            63, 0, 63,
        ];
        let mut layer = layer_with_areas(3, 3, &areas);
        build_tile_cache_regions(&mut layer, 1).unwrap();
        let walkable: Vec<u8> = layer.regs.iter().copied().filter(|&r| r != NO_REGION).collect();
        assert_eq!(walkable.len(), 7);
        assert_eq!(layer.reg_count, 1);
        assert!(walkable.iter().all(|&r| r == 0));
    }

    #[test]
    fn test_region_overflow_fails() {
        // A checkerboard gives every walkable cell its own region.
        let areas: Vec<u8> = (0..32 * 32)
            .map(|i| if (i % 32 + i / 32) % 2 == 0 { TILECACHE_WALKABLE_AREA } else { 0 })
            .collect();
        let mut layer = layer_with_areas(32, 32, &areas);
        let err = build_tile_cache_regions(&mut layer, 1).unwrap_err();
        assert!(err.has_detail(DtStatus::DT_BUFFER_TOO_SMALL));
    }

    #[test]
    fn test_flat_layer_contour_has_four_corners() {
        let mut layer = flat_layer(8, 6);
        build_tile_cache_regions(&mut layer, 1).unwrap();
        let cset = build_tile_cache_contours(&layer, 1, 1.3).unwrap();
        assert_eq!(cset.conts.len(), 1);

        let cont = &cset.conts[0];
        assert_eq!(cont.area, TILECACHE_WALKABLE_AREA);
        let mut corners: Vec<(u8, u8)> = cont.verts.iter().map(|v| (v[0], v[2])).collect();
        corners.sort();
        assert_eq!(corners, vec![(0, 0), (0, 6), (8, 0), (8, 6)]);
        assert!(cont.verts.iter().all(|v| v[3] & 0x0f == 0x0f));
    }

    #[test]
    fn test_contour_records_portals() {
        let mut layer = flat_layer(4, 4);
        // Portal on the +x border.
        for z in 0..4 {
            layer.cons[(3 + z * 4) as usize] |= 1 << (4 + 2);
        }
        build_tile_cache_regions(&mut layer, 1).unwrap();
        let cset = build_tile_cache_contours(&layer, 1, 1.3).unwrap();
        let portal_dirs: Vec<u8> = cset.conts[0]
            .verts
            .iter()
            .map(|v| v[3] & 0x0f)
            .filter(|&d| d != 0x0f)
            .collect();
        assert_eq!(portal_dirs, vec![2]);
    }

    #[test]
    fn test_mark_cylinder_clears_center() {
        let mut layer = flat_layer(10, 10);
        mark_cylinder_area(&mut layer, &[0.0; 3], 1.0, 1.0, &[5.0, 0.0, 5.0], 1.0, 2.0, 0);
        assert_eq!(layer.areas[5 + 5 * 10], 0);
        assert_eq!(layer.areas[4 + 4 * 10], 0);
        assert_eq!(layer.areas[0], TILECACHE_WALKABLE_AREA);
        assert_eq!(layer.areas[9 + 9 * 10], TILECACHE_WALKABLE_AREA);
        let cleared = layer.areas.iter().filter(|&&a| a == 0).count();
        assert!(cleared >= 4 && cleared <= 16);
    }

    #[test]
    fn test_mark_respects_height_band() {
        let mut layer = flat_layer(4, 4);
        mark_box_area(&mut layer, &[0.0; 3], 1.0, 1.0, &[0.0, 3.0, 0.0], &[4.0, 5.0, 4.0], 0);
        assert!(layer.areas.iter().all(|&a| a == TILECACHE_WALKABLE_AREA));

        mark_box_area(&mut layer, &[0.0; 3], 1.0, 1.0, &[1.0, -1.0, 1.0], &[2.5, 1.0, 2.5], 0);
        let cleared: Vec<usize> = (0..16).filter(|&i| layer.areas[i] == 0).collect();
        assert_eq!(cleared, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_mark_outside_grid_is_noop() {
        let mut layer = flat_layer(4, 4);
        mark_box_area(&mut layer, &[0.0; 3], 1.0, 1.0, &[10.0, -1.0, 10.0], &[12.0, 1.0, 12.0], 0);
        mark_cylinder_area(&mut layer, &[0.0; 3], 1.0, 1.0, &[-5.0, 0.0, 2.0], 1.0, 1.0, 0);
        assert!(layer.areas.iter().all(|&a| a == TILECACHE_WALKABLE_AREA));
    }

    #[test]
    fn test_mark_oriented_box_matches_axis_aligned_box() {
        let angle = 0.0f32;
        let rot_aux = [
            (0.5 * angle).cos() * (-0.5 * angle).sin(),
            (0.5 * angle).cos() * (0.5 * angle).cos() - 0.5,
        ];
        let mut layer = flat_layer(10, 10);
        mark_oriented_box_area(
            &mut layer,
            &[0.0; 3],
            1.0,
            1.0,
            &[5.0, 0.0, 5.0],
            &[1.0, 1.0, 1.0],
            &rot_aux,
            0,
        );
        assert_eq!(layer.areas[5 + 5 * 10], 0);
        assert_eq!(layer.areas[0], TILECACHE_WALKABLE_AREA);
        assert_eq!(layer.areas[9 + 5 * 10], TILECACHE_WALKABLE_AREA);
    }
}
