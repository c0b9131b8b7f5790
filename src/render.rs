//! Page renderer (C5) — rasterizes one page of blocks into an 8-bit
//! bottom-up grayscale buffer, including the interleaved redundancy and
//! superblock placement pattern (spec §4.5).

use crate::block::{Block, NDOT};
use crate::geometry::Geometry;

/// Dot ink color. Not pure black (0): the decoder's thresholding expects
/// soft ink contrast on rescans, not a saturated value.
pub const DOT_COLOR: u8 = 64;
pub const WHITE: u8 = 255;

/// 8-bit grayscale raster, bottom-up row order, no internal row padding
/// (spec §6 raster contract — an external BMP writer pads rows to 4).
#[derive(Debug, Clone)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Raster {
    pub fn blank(width: u32, height: u32) -> Raster {
        Raster {
            width,
            height,
            pixels: vec![WHITE; (width * height) as usize],
        }
    }

    fn fill_rect(&mut self, x0: i64, y0: i64, w: u32, h: u32, value: u8) {
        for dy in 0..h as i64 {
            let y = y0 + dy;
            if y < 0 || y >= self.height as i64 {
                continue;
            }
            let row = (y as u32) * self.width;
            for dx in 0..w as i64 {
                let x = x0 + dx;
                if x < 0 || x >= self.width as i64 {
                    continue;
                }
                self.pixels[(row + x as u32) as usize] = value;
            }
        }
    }
}

/// Which role a cell of the `nx x ny` grid plays on a given page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRole {
    Superblock,
    /// Index of the data block inside its group (`0..redundancy`).
    Data { group: u32, slot_in_group: u8 },
    Recovery { group: u32 },
}

/// Compute the per-cell role assignment for a page carrying `nstring`
/// groups of `r` data blocks + 1 recovery block each (spec §4.5).
///
/// Cell `k` (row-major over the `nx x ny` grid: `k = cy*nx + cx`) is
/// assigned by iterating `r+1` strings of `nstring+1` cells each; cell 0 of
/// every string is the superblock, and the remaining `nstring` cells hold
/// one group member each, optionally rotated across columns so that a
/// group's `r` data blocks and its recovery block never line up in the
/// same raster column (protecting against a single damaged region wiping
/// out an entire group).
pub fn page_layout(nx: u32, ny: u32, r: u8, nstring: u32) -> Vec<CellRole> {
    let total = (nx as usize) * (ny as usize);
    let mut layout = vec![CellRole::Superblock; total];
    if nstring == 0 {
        return layout;
    }

    let strings = r as u32 + 1;
    let string_width = nstring + 1;
    let rotate_unit = nx / (r as u32 + 1);

    for j in 0..strings {
        let k0 = (j * string_width) as usize;
        if k0 < total {
            layout[k0] = CellRole::Superblock;
        }
        for i in 0..nstring {
            let slot = if string_width < nx {
                i + 1
            } else {
                1 + ((i + rotate_unit * j) % nstring)
            };
            let k = (j * string_width + slot) as usize;
            if k >= total {
                continue;
            }
            layout[k] = if j < r as u32 {
                CellRole::Data {
                    group: i,
                    slot_in_group: j as u8,
                }
            } else {
                CellRole::Recovery { group: i }
            };
        }
    }
    layout
}

/// XOR-whiten (or un-whiten — the operation is its own inverse) the 32
/// per-row 32-bit words of a block's 128-byte buffer. Even rows use
/// `0x55555555`, odd rows `0xAAAAAAAA`.
pub fn whiten_rows(bytes: &[u8; 128]) -> [u32; NDOT] {
    let mut rows = [0u32; NDOT];
    for (j, row) in rows.iter_mut().enumerate() {
        let word = u32::from_le_bytes(bytes[j * 4..j * 4 + 4].try_into().unwrap());
        let pattern = if j % 2 == 0 { 0x5555_5555 } else { 0xAAAA_AAAA };
        *row = word ^ pattern;
    }
    rows
}

pub fn unwhiten_rows(rows: &[u32; NDOT]) -> [u8; 128] {
    let mut bytes = [0u8; 128];
    for (j, &row) in rows.iter().enumerate() {
        let pattern = if j % 2 == 0 { 0x5555_5555 } else { 0xAAAA_AAAA };
        let word = row ^ pattern;
        bytes[j * 4..j * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    bytes
}

/// Paint one block's 32x32 dot matrix into `raster` with its cell's
/// top-left corner at `(x0, y0)` (bottom-up pixel coordinates).
fn draw_block(raster: &mut Raster, geom: &Geometry, x0: u32, y0: u32, block: &Block) {
    let rows = whiten_rows(&block.0);
    for (j, &row) in rows.iter().enumerate() {
        for i in 0..NDOT {
            if row & (1 << i) != 0 {
                let px = x0 as i64 + (i as i64) * geom.dx as i64;
                let py = y0 as i64 + (j as i64) * geom.dy as i64;
                raster.fill_rect(px, py, geom.px, geom.py, DOT_COLOR);
            }
        }
    }
}

/// Draw the outer alignment border. A thicker ring when `print_border` is
/// requested, a thinner plain one otherwise (spec §4.5).
fn draw_border(raster: &mut Raster, geom: &Geometry) {
    let thickness = if geom.print_border { geom.border / 4 } else { 2 };
    raster.fill_rect(0, 0, raster.width, thickness, DOT_COLOR);
    raster.fill_rect(0, (raster.height - thickness) as i64, raster.width, thickness, DOT_COLOR);
    raster.fill_rect(0, 0, thickness, raster.height, DOT_COLOR);
    raster.fill_rect((raster.width - thickness) as i64, 0, thickness, raster.height, DOT_COLOR);
}

/// Cell-index -> block content for one page, keyed by row-major grid index.
pub struct PageBlocks<'a> {
    pub layout: &'a [CellRole],
    pub superblock: &'a Block,
    /// One block per occupied cell, `None` only for defensive bounds (every
    /// cell in `layout` must be populated by the caller in practice).
    pub cells: Vec<Option<Block>>,
}

/// Rasterize one page given its pre-resolved per-cell blocks.
pub fn render_page(geom: &Geometry, page: &PageBlocks) -> Raster {
    let mut raster = Raster::blank(geom.raster_width, geom.raster_height);
    draw_border(&mut raster, geom);

    let cell_w = geom.cell_w();
    let cell_h = geom.cell_h();
    for cy in 0..geom.ny {
        for cx in 0..geom.nx {
            let k = (cy * geom.nx + cx) as usize;
            let block = match page.cells.get(k).and_then(|b| b.as_ref()) {
                Some(b) => b,
                None => page.superblock,
            };
            let x0 = geom.border + cx * cell_w;
            let y0 = geom.border + cy * cell_h;
            draw_block(&mut raster, geom, x0, y0, block);
        }
    }
    raster
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whiten_unwhiten_round_trips() {
        let mut bytes = [0u8; 128];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (i * 3 + 1) as u8;
        }
        let rows = whiten_rows(&bytes);
        let back = unwhiten_rows(&rows);
        assert_eq!(bytes, back);
    }

    #[test]
    fn page_layout_reserves_first_cell_of_every_string_for_superblock() {
        let nx = 12;
        let ny = 6;
        let r = 5u8;
        let nstring = 4;
        let layout = page_layout(nx, ny, r, nstring);
        let string_width = nstring + 1;
        for j in 0..(r as u32 + 1) {
            let k0 = (j * string_width) as usize;
            assert_eq!(layout[k0], CellRole::Superblock);
        }
    }

    #[test]
    fn page_layout_assigns_exactly_nstring_recovery_cells() {
        let nx = 12;
        let ny = 6;
        let r = 5u8;
        let nstring = 4;
        let layout = page_layout(nx, ny, r, nstring);
        let recovery_count = layout
            .iter()
            .filter(|c| matches!(c, CellRole::Recovery { .. }))
            .count();
        assert_eq!(recovery_count, nstring as usize);
    }
}
