//! Block reader (C8) — per-block bilinear resample, optional sharpening,
//! local re-grid, multi-shift/dot-size sampling, and ECC/CRC-verified bit
//! recognition across eight orientations (spec §4.8). No teacher or pack
//! grounding exists for this component; built directly from the spec,
//! reusing [`crate::gf256`], [`crate::crc16`], and [`crate::block`].

use crate::block::{Block, NDOT};
use crate::crc16::block_crc;
use crate::gf256::{rs_decode, RsOutcome};
use crate::grid::{GridParams, IntensityStats};
use crate::render::{unwhiten_rows, Raster};

const MAX_CORRECTIONS: u8 = 16;

/// Nine `(factor, lcorr)` bias-correction pairs tried in fixed order (spec
/// §4.8/§9 — caching the last winning index is allowed but must not change
/// outputs, so this crate always tries all nine in order).
const FACTOR_LCORR: [(f64, f64); 9] = [
    (1.0, 0.0),
    (1.0, -8.0),
    (1.0, 8.0),
    (1.1, 0.0),
    (1.1, -8.0),
    (1.1, 8.0),
    (0.9, 0.0),
    (0.9, -8.0),
    (0.9, 8.0),
];

/// The 8 orientations: 4 rotations x horizontal flip.
fn orient(i: usize, j: usize, orientation: u8) -> (usize, usize) {
    let n = NDOT - 1;
    let (i, j) = match orientation % 4 {
        0 => (i, j),
        1 => (j, n - i),
        2 => (n - i, n - j),
        _ => (n - j, i),
    };
    if orientation >= 4 {
        (n - i, j)
    } else {
        (i, j)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BlockReadResult {
    pub block: Block,
    pub errors: u8,
    pub orientation: u8,
}

/// Bilinear-sample `raster` at floating-point coordinates, returning
/// `stats.cmax` (white) for out-of-bounds reads (spec §4.8 step 1).
fn bilinear(raster: &Raster, x: f64, y: f64, stats: &IntensityStats) -> f64 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let sample = |xi: i64, yi: i64| -> f64 {
        if xi < 0 || yi < 0 || xi >= raster.width as i64 || yi >= raster.height as i64 {
            stats.cmax as f64
        } else {
            raster.pixels[(yi as u32 * raster.width + xi as u32) as usize] as f64
        }
    };
    let x0i = x0 as i64;
    let y0i = y0 as i64;
    let top = sample(x0i, y0i) * (1.0 - fx) + sample(x0i + 1, y0i) * fx;
    let bot = sample(x0i, y0i + 1) * (1.0 - fx) + sample(x0i + 1, y0i + 1) * fx;
    top * (1.0 - fy) + bot * fy
}

/// 5-tap Laplacian sharpen: center weight `1 + 4*sharpfactor`, side weights
/// `-sharpfactor`, clamped to `[cmin, cmax]`; edges copied untouched.
fn sharpen(grid32: &mut [[f64; NDOT]; NDOT], stats: &IntensityStats) {
    if stats.sharpfactor <= 0.0 {
        return;
    }
    let original = *grid32;
    let center_w = 1.0 + 4.0 * stats.sharpfactor;
    for j in 1..NDOT - 1 {
        for i in 1..NDOT - 1 {
            let v = center_w * original[j][i]
                - stats.sharpfactor
                    * (original[j - 1][i] + original[j + 1][i] + original[j][i - 1] + original[j][i + 1]);
            grid32[j][i] = v.clamp(stats.cmin as f64, stats.cmax as f64);
        }
    }
}

/// One candidate sampling grid, shifted by `(shift_i, shift_j)` sub-dot
/// steps and averaged over a `d x d` neighborhood (spec §4.8 step 4).
fn shifted_grid(
    raster: &Raster,
    grid: &GridParams,
    cx: u32,
    cy: u32,
    dot_size: u32,
    shift_i: i32,
    shift_j: i32,
) -> [[f64; NDOT]; NDOT] {
    let dot_dx = grid.xstep / (NDOT as f64 + 3.0);
    let dot_dy = grid.ystep / (NDOT as f64 + 3.0);
    let x0 = grid.xpeak + cx as f64 * grid.xstep;
    let y0 = grid.ypeak + cy as f64 * grid.ystep;

    let mut out = [[0f64; NDOT]; NDOT];
    for (j, row) in out.iter_mut().enumerate() {
        for (i, cell) in row.iter_mut().enumerate() {
            // Ink is left-aligned within its `dot_dx`-wide pitch cell (spec
            // §4.5 renderer), so the unshifted sample point is the pitch
            // origin itself; `shift_i/shift_j` probe neighboring pixels.
            let base_x = x0 + i as f64 * dot_dx + shift_i as f64;
            let base_y = y0 + j as f64 * dot_dy + shift_j as f64;
            let mut acc = 0f64;
            let mut n = 0f64;
            for dyi in 0..dot_size {
                for dxi in 0..dot_size {
                    // C-style float-to-int truncation (spec §4.8 step 4).
                    let px = (base_x + dxi as f64).trunc();
                    let py = (base_y + dyi as f64).trunc();
                    acc += bilinear(raster, px, py, &grid.stats);
                    n += 1.0;
                }
            }
            *cell = acc / n.max(1.0);
        }
    }
    out
}

/// `recognize_bits`: apply one `(factor, lcorr)` bias correction to the
/// ink/background midpoint, orient-select, threshold, and un-whiten (spec
/// §4.8 step 6). A pixel counts as ink (whitened bit 1) when it falls below
/// the biased midpoint between `stats.cmin` and `stats.cmax`.
fn recognize_bits(
    grid32: &[[f64; NDOT]; NDOT],
    stats: &IntensityStats,
    factor: f64,
    lcorr: f64,
    orientation: u8,
) -> [u8; 128] {
    let mid = (stats.cmin as f64 + stats.cmax as f64) / 2.0;
    let limit = mid * factor + lcorr;

    let mut rows = [0u32; NDOT];
    for j in 0..NDOT {
        let mut word = 0u32;
        for i in 0..NDOT {
            let (si, sj) = orient(i, j, orientation);
            if grid32[sj][si] * factor < limit {
                word |= 1 << i;
            }
        }
        rows[j] = word;
    }
    unwhiten_rows(&rows)
}

fn max_dot_size(grid: &GridParams) -> u32 {
    let ratio = (grid.xstep.min(grid.ystep) / (NDOT as f64 + 3.0)).max(1.0);
    if ratio >= 4.0 {
        4
    } else if ratio >= 3.0 {
        3
    } else if ratio >= 2.0 {
        2
    } else {
        1
    }
}

/// Read and verify one block at cell `(cx, cy)`. Tries the unshifted grid
/// first, then all dot sizes / sub-shifts / orientations / correction pairs
/// until RS + CRC both succeed. In `best_quality` mode every combination is
/// tried and the one with the fewest RS corrections wins.
pub fn read_block(
    raster: &Raster,
    grid: &GridParams,
    cx: u32,
    cy: u32,
    best_quality: bool,
) -> Option<BlockReadResult> {
    let mut best: Option<BlockReadResult> = None;
    let max_d = max_dot_size(grid);

    const SHIFT_ORDER: [i32; 3] = [0, -1, 1];

    'search: for dot_size in 1..=max_d {
        for &shift_i in SHIFT_ORDER.iter() {
            for &shift_j in SHIFT_ORDER.iter() {
                let mut sampled = shifted_grid(raster, grid, cx, cy, dot_size, shift_i, shift_j);
                sharpen(&mut sampled, &grid.stats);

                for orientation in 0..8u8 {
                    for &(factor, lcorr) in FACTOR_LCORR.iter() {
                        let bytes = recognize_bits(&sampled, &grid.stats, factor, lcorr, orientation);
                        let mut buf = bytes;
                        let corrections = match rs_decode(&mut buf) {
                            Ok(RsOutcome::NoErrors) => 0u8,
                            Ok(RsOutcome::Corrected(k)) => k,
                            Err(_) => continue,
                        };
                        if corrections > MAX_CORRECTIONS {
                            continue;
                        }
                        let stored_crc =
                            u16::from_le_bytes(buf[94..96].try_into().unwrap());
                        let computed = block_crc(&buf[0..94]);
                        if stored_crc != computed {
                            continue;
                        }
                        let result = BlockReadResult {
                            block: Block::from_bytes(buf),
                            errors: corrections,
                            orientation,
                        };
                        if !best_quality {
                            best = Some(result);
                            break 'search;
                        }
                        if best.as_ref().map_or(true, |b| result.errors < b.errors) {
                            best = Some(result);
                        }
                    }
                }
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::NDATA;
    use crate::geometry::{Geometry, GeometryOptions};
    use crate::render::{render_page, CellRole, PageBlocks};

    fn exact_grid_params(geom: &Geometry) -> GridParams {
        GridParams {
            xpeak: geom.border as f64,
            xstep: geom.cell_w() as f64,
            xangle: 0.0,
            ypeak: geom.border as f64,
            ystep: geom.cell_h() as f64,
            yangle: 0.0,
            stats: IntensityStats {
                cmin: 64,
                cmax: 255,
                cmean: 200.0,
                sharpfactor: 0.0,
            },
            bbox: (0, 0, geom.raster_width, geom.raster_height),
        }
    }

    #[test]
    fn reads_back_exact_data_block_with_known_geometry() {
        let opts = GeometryOptions {
            ppix: 200,
            ppiy: 200,
            ..GeometryOptions::default()
        };
        let geom = Geometry::new(&opts).unwrap();
        let payload = [0x5Au8; NDATA];
        let data_block = Block::pack_data(180, &payload);

        let layout = crate::render::page_layout(geom.nx, geom.ny, geom.redundancy, 1);
        let superblock = Block::pack_data(0, &[0u8; NDATA]);
        let mut cells = vec![None; (geom.nx * geom.ny) as usize];
        let mut target_cell = None;
        for (k, role) in layout.iter().enumerate() {
            cells[k] = Some(match role {
                CellRole::Superblock => superblock,
                CellRole::Data { .. } => {
                    target_cell = Some(k);
                    data_block
                }
                CellRole::Recovery { .. } => Block::pack_recovery(0, geom.redundancy, &[0x11u8; NDATA]),
            });
        }
        let page = PageBlocks { layout: &layout, superblock: &superblock, cells };
        let raster = render_page(&geom, &page);

        let k = target_cell.expect("layout must contain a data cell");
        let cx = k as u32 % geom.nx;
        let cy = k as u32 / geom.nx;

        let grid = exact_grid_params(&geom);
        let result = read_block(&raster, &grid, cx, cy, false).expect("block must be readable");
        assert_eq!(result.block.payload(), &payload);
        assert_eq!(result.errors, 0);
    }
}
