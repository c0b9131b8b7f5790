//! Grid detector (C7) — locates the block grid inside a raw raster: rough
//! bounding box, intensity statistics, and X/Y periodicity + skew search
//! (spec §4.7). This is the component with no teacher or pack grounding;
//! it is built directly from the spec's described algorithm.

use thiserror::Error;

use crate::block::NDOT;
use crate::render::Raster;

/// Dot-width slots per cell: `NDOT` inked columns plus a blank `+3`-wide
/// gap that separates one cell from the next (`render.rs::draw_block`
/// paints dots at `i*dx` for `i in 0..NDOT`, leaving `cell_w - NDOT*dx =
/// 3*dx` untouched).
const SLOTS_PER_CELL: usize = NDOT + 3;

const NHYST: i64 = 1024;
const ROUGH_THRESHOLD: u8 = 200;
const SHADOW_WIDTH: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("raster dimensions {0}x{1} out of bounds (must be 128..32768 each side)")]
    BadDimensions(u32, u32),
    #[error("grid detector found no darkened region (blank or unreadable raster)")]
    NoDarkRegion,
    #[error("grid detector found no periodic peak structure on the {0} axis")]
    NoPeaks(&'static str),
    #[error("X/Y steps disproportionate: xstep={xstep:.2} ystep={ystep:.2}")]
    DisproportionateSteps { xstep: f64, ystep: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct IntensityStats {
    pub cmin: u8,
    pub cmax: u8,
    pub cmean: f64,
    pub sharpfactor: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct GridParams {
    pub xpeak: f64,
    pub xstep: f64,
    pub xangle: f64,
    pub ypeak: f64,
    pub ystep: f64,
    pub yangle: f64,
    pub stats: IntensityStats,
    pub bbox: (u32, u32, u32, u32),
}

/// Result of [`find_peaks`]: phase, spatial period, confidence weight.
#[derive(Debug, Clone, Copy)]
struct PeakFit {
    phase: f64,
    step: f64,
    weight: f64,
}

fn rough_bbox(raster: &Raster) -> Option<(u32, u32, u32, u32)> {
    let (mut xmin, mut ymin) = (raster.width, raster.height);
    let (mut xmax, mut ymax) = (0u32, 0u32);
    let mut found = false;
    for y in 0..raster.height {
        let row = (y * raster.width) as usize;
        for x in 0..raster.width {
            if raster.pixels[row + x as usize] < ROUGH_THRESHOLD {
                found = true;
                xmin = xmin.min(x);
                xmax = xmax.max(x);
                ymin = ymin.min(y);
                ymax = ymax.max(y);
            }
        }
    }
    if found {
        Some((xmin, xmax, ymin, ymax))
    } else {
        None
    }
}

fn intensity_stats(raster: &Raster, bbox: (u32, u32, u32, u32)) -> IntensityStats {
    let (xmin, xmax, ymin, ymax) = bbox;
    let cx = (xmin + xmax) / 2;
    let cy = (ymin + ymax) / 2;
    let half = 512i64;
    let x0 = (cx as i64 - half).max(0) as u32;
    let y0 = (cy as i64 - half).max(0) as u32;
    let x1 = (cx as i64 + half).min(raster.width as i64 - 1).max(0) as u32;
    let y1 = (cy as i64 + half).min(raster.height as i64 - 1).max(0) as u32;

    let mut histogram = [0u32; 256];
    let mut diff_histogram = [0u32; 256];
    for y in y0..=y1 {
        let row = (y * raster.width) as usize;
        for x in x0..=x1 {
            let v = raster.pixels[row + x as usize];
            histogram[v as usize] += 1;
            if x + 1 <= x1 {
                let next = raster.pixels[row + x as usize + 1];
                let d = (v as i32 - next as i32).unsigned_abs() as usize;
                diff_histogram[d] += 1;
            }
        }
    }

    let total: u32 = histogram.iter().sum();
    let tail = (total as f64 * 0.03) as u32;
    let (mut cmin, mut cmax) = (0u8, 255u8);
    let mut acc = 0u32;
    for (v, &count) in histogram.iter().enumerate() {
        acc += count;
        if acc > tail {
            cmin = v as u8;
            break;
        }
    }
    acc = 0;
    for (v, &count) in histogram.iter().enumerate().rev() {
        acc += count;
        if acc > tail {
            cmax = v as u8;
            break;
        }
    }

    let mut sum = 0f64;
    let mut n = 0f64;
    for (v, &count) in histogram.iter().enumerate() {
        sum += v as f64 * count as f64;
        n += count as f64;
    }
    let cmean = if n > 0.0 { sum / n } else { 0.0 };

    let p95_idx = (total as f64 * 0.95) as u32;
    let mut acc2 = 0u32;
    let mut contrast_95 = 1u8;
    for (v, &count) in diff_histogram.iter().enumerate() {
        acc2 += count;
        if acc2 >= p95_idx {
            contrast_95 = v.max(1) as u8;
            break;
        }
    }

    let sharpfactor = ((cmax as f64 - cmin as f64) / (2.0 * contrast_95 as f64) - 1.0)
        .clamp(0.0, 2.0);

    IntensityStats {
        cmin,
        cmax,
        cmean,
        sharpfactor,
    }
}

/// Subtract a rolling-gradient shadow (width `SHADOW_WIDTH`) to flatten
/// slow brightness drift, then find the dominant periodic peak structure.
fn find_peaks(h: &[f64]) -> Option<PeakFit> {
    let n = h.len();
    if n < SHADOW_WIDTH * 2 {
        return None;
    }
    let mut flattened = vec![0f64; n];
    for i in 0..n {
        let lo = i.saturating_sub(SHADOW_WIDTH / 2);
        let hi = (i + SHADOW_WIDTH / 2).min(n - 1);
        let shadow_mean: f64 = h[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64;
        flattened[i] = h[i] - shadow_mean;
    }

    let max = flattened.iter().cloned().fold(f64::MIN, f64::max);
    if max <= 0.0 {
        return None;
    }
    let threshold = max * 0.75;

    let mut peaks: Vec<(usize, f64)> = Vec::new();
    for (i, &v) in flattened.iter().enumerate() {
        if v < threshold {
            continue;
        }
        if let Some(&(_, prev_v)) = peaks.last() {
            if v > prev_v * 8.0 {
                peaks.pop();
            } else if prev_v > v * 8.0 {
                continue;
            }
        }
        peaks.push((i, v));
    }
    if peaks.len() < 2 {
        return None;
    }

    // Quantize consecutive distances into integer buckets, pick the most
    // populated bucket within +-3% dispersion.
    let mut distances: Vec<f64> = peaks.windows(2).map(|w| (w[1].0 - w[0].0) as f64).collect();
    distances.retain(|&d| d > 0.0);
    if distances.is_empty() {
        return None;
    }
    distances.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mut best_bucket: Vec<f64> = vec![distances[0]];
    let mut best_center = distances[0];
    let mut cur: Vec<f64> = vec![distances[0]];
    let mut cur_center = distances[0];
    for &d in &distances[1..] {
        if (d - cur_center).abs() <= cur_center * 0.03 {
            cur.push(d);
            cur_center = cur.iter().sum::<f64>() / cur.len() as f64;
        } else {
            if cur.len() > best_bucket.len() {
                best_bucket = cur.clone();
                best_center = cur_center;
            }
            cur = vec![d];
            cur_center = d;
        }
    }
    if cur.len() > best_bucket.len() {
        best_bucket = cur;
        best_center = cur_center;
    }
    let step = best_center;

    // Linear regression of peak position vs. integer index for phase/step.
    let n_pts = peaks.len() as f64;
    let idx_mean = (0..peaks.len()).map(|i| i as f64).sum::<f64>() / n_pts;
    let pos_mean = peaks.iter().map(|&(p, _)| p as f64).sum::<f64>() / n_pts;
    let mut num = 0f64;
    let mut den = 0f64;
    for (i, &(p, _)) in peaks.iter().enumerate() {
        num += (i as f64 - idx_mean) * (p as f64 - pos_mean);
        den += (i as f64 - idx_mean).powi(2);
    }
    let regressed_step = if den.abs() > 1e-9 { num / den } else { step };
    let phase = pos_mean - idx_mean * regressed_step;

    let mean_height = peaks.iter().map(|&(_, v)| v).sum::<f64>() / n_pts;
    let weight = mean_height / n_pts;

    Some(PeakFit {
        phase,
        step: if regressed_step.abs() > 0.0 { regressed_step } else { step },
        weight,
    })
}

/// `find_peaks`'s shadow subtraction (width `SHADOW_WIDTH`, tuned to the
/// dot pitch) suppresses the coarser cell-period modulation while
/// enhancing the dot-period one, so it recovers the dot pitch, not the
/// cell pitch the rest of the pipeline needs (spec §4.8 step 3 explicitly
/// divides a page-level step by `NDOT+3` to get a dot step, so the
/// page-level step must already be the cell period).
///
/// Fold the raw (non-shadow-subtracted) histogram modulo the dot pitch
/// into `NDOT+3` per-cell slots and average each slot's darkness; the
/// `3` slots that fall in the blank inter-cell gap average much darker
/// than the `NDOT` inked ones, which anchors the cell phase without
/// needing a second periodicity search at the coarse scale.
fn resolve_cell_period(h: &[f64], dot_phase: f64, dot_step: f64) -> (f64, f64) {
    let mut sums = vec![0f64; SLOTS_PER_CELL];
    let mut counts = vec![0u32; SLOTS_PER_CELL];
    for (i, &v) in h.iter().enumerate() {
        let u = (i as f64 - dot_phase) / dot_step;
        let bucket = (u.round() as i64).rem_euclid(SLOTS_PER_CELL as i64) as usize;
        sums[bucket] += v;
        counts[bucket] += 1;
    }
    let avg: Vec<f64> = sums
        .iter()
        .zip(counts.iter())
        .map(|(&s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
        .collect();

    let mut gap_start = 0usize;
    let mut gap_sum = f64::MAX;
    for s in 0..SLOTS_PER_CELL {
        let sum: f64 = (0..3).map(|k| avg[(s + k) % SLOTS_PER_CELL]).sum();
        if sum < gap_sum {
            gap_sum = sum;
            gap_start = s;
        }
    }
    let dot0_slot = (gap_start + 3) % SLOTS_PER_CELL;

    let cell_phase = dot_phase + dot0_slot as f64 * dot_step;
    let cell_step = dot_step * SLOTS_PER_CELL as f64;
    (cell_phase, cell_step)
}

/// C-style truncation toward zero, matching spec §9's requirement exactly
/// (not `round`).
fn trunc_i64(v: f64) -> i64 {
    v.trunc() as i64
}

fn sheared_column_histogram(
    raster: &Raster,
    bbox: (u32, u32, u32, u32),
    angle_milli: i64,
) -> Vec<f64> {
    let (xmin, xmax, ymin, ymax) = bbox;
    let width = (xmax - xmin + 1) as usize;
    let mut h = vec![0f64; width];
    let mut counts = vec![0u32; width];
    for j in 0..=(ymax - ymin) {
        let y = ymin + j;
        let row = (y * raster.width) as usize;
        let shift = trunc_i64((j as i64 * angle_milli) as f64 / NHYST as f64);
        for (i, slot) in h.iter_mut().enumerate() {
            let x = xmin as i64 + i as i64 + shift;
            if x < 0 || x >= raster.width as i64 {
                continue;
            }
            let v = raster.pixels[row + x as usize];
            *slot += 255.0 - v as f64;
            counts[i] += 1;
        }
    }
    for (slot, &count) in h.iter_mut().zip(counts.iter()) {
        if count > 0 {
            *slot /= count as f64;
        }
    }
    h
}

fn sheared_row_histogram(
    raster: &Raster,
    bbox: (u32, u32, u32, u32),
    angle_milli: i64,
) -> Vec<f64> {
    let (xmin, xmax, ymin, ymax) = bbox;
    let height = (ymax - ymin + 1) as usize;
    let mut h = vec![0f64; height];
    let mut counts = vec![0u32; height];
    for i in 0..=(xmax - xmin) {
        let x = xmin + i;
        let shift = trunc_i64((i as i64 * angle_milli) as f64 / NHYST as f64);
        for (j, slot) in h.iter_mut().enumerate() {
            let y = ymin as i64 + j as i64 + shift;
            if y < 0 || y >= raster.height as i64 {
                continue;
            }
            let row = (y as u32 * raster.width) as usize;
            let v = raster.pixels[row + x as usize];
            *slot += 255.0 - v as f64;
            counts[j] += 1;
        }
    }
    for (slot, &count) in h.iter_mut().zip(counts.iter()) {
        if count > 0 {
            *slot /= count as f64;
        }
    }
    h
}

/// Full grid detection pass over a raw raster (spec §4.7).
pub fn detect_grid(raster: &Raster) -> Result<GridParams, GridError> {
    if raster.width < 128 || raster.height < 128 || raster.width > 32768 || raster.height > 32768
    {
        return Err(GridError::BadDimensions(raster.width, raster.height));
    }

    let bbox = rough_bbox(raster).ok_or(GridError::NoDarkRegion)?;
    let stats = intensity_stats(raster, bbox);

    let mut best_x: Option<(i64, PeakFit, f64)> = None;
    let mut a = -(NHYST / 10);
    while a <= NHYST / 10 {
        let h = sheared_column_histogram(raster, bbox, a);
        if let Some(fit) = find_peaks(&h) {
            let score = fit.weight + 1.0 / (a.unsigned_abs() as f64 + 10.0);
            if best_x.as_ref().map_or(true, |&(_, _, best_score)| score > best_score) {
                best_x = Some((a, fit, score));
            }
        }
        a += 2;
    }
    let (xangle_milli, xfit, _) = best_x.ok_or(GridError::NoPeaks("x"))?;

    let mut best_y: Option<(i64, PeakFit, f64)> = None;
    a = -(NHYST / 10);
    while a <= NHYST / 10 {
        let h = sheared_row_histogram(raster, bbox, a);
        if let Some(fit) = find_peaks(&h) {
            let score = fit.weight + 1.0 / (a.unsigned_abs() as f64 + 10.0);
            if best_y.as_ref().map_or(true, |&(_, _, best_score)| score > best_score) {
                best_y = Some((a, fit, score));
            }
        }
        a += 2;
    }
    let (yangle_milli, yfit, _) = best_y.ok_or(GridError::NoPeaks("y"))?;

    let xangle = xangle_milli as f64 / NHYST as f64;
    let yangle = yangle_milli as f64 / NHYST as f64;

    // xfit/yfit carry the fine dot pitch. Resolve the cell-level phase and
    // period (what every downstream consumer means by `xstep`/`ystep`) by
    // folding the raw histogram modulo that dot pitch.
    let hx = sheared_column_histogram(raster, bbox, xangle_milli);
    let (xpeak, xstep) = resolve_cell_period(&hx, xfit.phase, xfit.step);
    let hy = sheared_row_histogram(raster, bbox, yangle_milli);
    let (ypeak, ystep) = resolve_cell_period(&hy, yfit.phase, yfit.step);

    if ystep < 0.40 * xstep || ystep > 2.50 * xstep || ystep < SLOTS_PER_CELL as f64 * 2.0 {
        return Err(GridError::DisproportionateSteps { xstep, ystep });
    }

    Ok(GridParams {
        xpeak: xpeak + bbox.0 as f64,
        xstep,
        xangle,
        ypeak: ypeak + bbox.2 as f64,
        ystep,
        yangle,
        stats,
        bbox,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, NDATA};
    use crate::geometry::{Geometry, GeometryOptions};
    use crate::render::{render_page, CellRole, PageBlocks};

    fn synthetic_page() -> (Geometry, Raster) {
        let opts = GeometryOptions {
            ppix: 200,
            ppiy: 200,
            ..GeometryOptions::default()
        };
        let geom = Geometry::new(&opts).unwrap();
        let layout = crate::render::page_layout(geom.nx, geom.ny, geom.redundancy, 1);
        let superblock = Block::pack_data(0xFFFF_FFFE, &[0u8; NDATA]);
        let mut cells = vec![None; (geom.nx * geom.ny) as usize];
        for (k, role) in layout.iter().enumerate() {
            cells[k] = Some(match role {
                CellRole::Superblock => superblock,
                CellRole::Data { .. } => Block::pack_data(k as u32 * NDATA as u32, &[0x33u8; NDATA]),
                CellRole::Recovery { .. } => Block::pack_recovery(0, geom.redundancy, &[0x77u8; NDATA]),
            });
        }
        let page = PageBlocks {
            layout: &layout,
            superblock: &superblock,
            cells,
        };
        let raster = render_page(&geom, &page);
        (geom, raster)
    }

    #[test]
    fn detects_step_close_to_cell_size_on_synthetic_page() {
        let (geom, raster) = synthetic_page();
        let params = detect_grid(&raster).expect("grid must be found on a clean synthetic page");
        let expected_step = (crate::block::NDOT as f64 + 3.0) * geom.dx as f64;
        assert!(
            (params.xstep - expected_step).abs() < expected_step * 0.5,
            "xstep {} too far from expected {}",
            params.xstep,
            expected_step
        );
    }

    #[test]
    fn rejects_blank_raster() {
        let raster = Raster::blank(256, 256);
        assert_eq!(detect_grid(&raster), Err(GridError::NoDarkRegion));
    }

    #[test]
    fn rejects_undersized_raster() {
        let raster = Raster::blank(64, 64);
        assert!(matches!(detect_grid(&raster), Err(GridError::BadDimensions(_, _))));
    }
}
