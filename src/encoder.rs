//! Encode pipeline (C6) — `ReadAndTransform -> InitializePrinting ->
//! NextPage* -> Done` (spec §4.6). One struct holds all pipeline state and
//! is advanced through explicit methods, the way the teacher's
//! `SixCyWriter` holds its state and exposes `add_file`/`finalize` rather
//! than a generator.

use rand::RngCore;

use crate::block::{
    filetime_from_unix_seconds, Block, SuperblockFields, FILENAME_SIZE, MAXSIZE, MODE_COMPRESSED,
    MODE_ENCRYPTED, NDATA,
};
use crate::codec::compress;
use crate::config::{Compression, EncodeConfig};
use crate::crc16::crc16;
use crate::crypto::{aes_cbc_encrypt, derive_key};
use crate::error::PaperbackError;
use crate::geometry::{Geometry, GeometryOptions};
use crate::render::{page_layout, render_page as rasterize_page, CellRole, PageBlocks, Raster};

const ALIGN: usize = 16;

fn align_up(n: usize, to: usize) -> usize {
    (n + to - 1) / to * to
}

fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

/// Output of `read_and_transform`: the bytes that get split across pages,
/// plus the fields every page's superblock carries unchanged.
struct Transformed {
    payload: Vec<u8>,
    mode: u8,
    filecrc: u16,
    origsize: u32,
    salt: [u8; 16],
    iv: [u8; 16],
}

/// ReadAndTransform (spec §4.6): compress (disabling it silently if it
/// didn't shrink the data, unless `force_compression`), align to 16 bytes,
/// compute `filecrc` on the aligned pre-encryption buffer, then optionally
/// encrypt.
fn read_and_transform(data: &[u8], cfg: &EncodeConfig) -> Result<Transformed, PaperbackError> {
    if data.is_empty() {
        return Err(PaperbackError::InvalidInput("input must be non-empty".into()));
    }
    if data.len() as u32 > MAXSIZE {
        return Err(PaperbackError::InvalidInput(format!(
            "input size {} exceeds MAXSIZE {}",
            data.len(),
            MAXSIZE
        )));
    }

    let mut mode = 0u8;
    let mut working = data.to_vec();
    if !matches!(cfg.compression, Compression::None) {
        let level = cfg.compression.clone().into();
        let compressed = compress(data, level)?;
        if compressed.len() < data.len() || cfg.force_compression {
            working = compressed;
            mode |= MODE_COMPRESSED;
        }
    }

    let aligned_len = align_up(working.len(), ALIGN);
    working.resize(aligned_len, 0);
    let filecrc = crc16(&working);

    let (payload, salt, iv) = if cfg.encryption {
        let password = cfg.password.as_ref().ok_or_else(|| {
            PaperbackError::InvalidInput("encryption requires a password".into())
        })?;
        let mut salt = [0u8; 16];
        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut iv);
        let key = derive_key(password, &salt);
        let encrypted = aes_cbc_encrypt(&key, &iv, &working)?;
        mode |= MODE_ENCRYPTED;
        (encrypted, salt, iv)
    } else {
        (working, [0u8; 16], [0u8; 16])
    };

    Ok(Transformed {
        payload,
        mode,
        filecrc,
        origsize: data.len() as u32,
        salt,
        iv,
    })
}

fn build_name(filename: &str, mode: u8, salt: &[u8; 16], iv: &[u8; 16]) -> [u8; FILENAME_SIZE] {
    let mut name = [0u8; FILENAME_SIZE];
    let bytes = filename.as_bytes();
    let n = bytes.len().min(32);
    name[..n].copy_from_slice(&bytes[..n]);
    if mode & MODE_ENCRYPTED != 0 {
        name[32..48].copy_from_slice(salt);
        name[48..64].copy_from_slice(iv);
    }
    name
}

fn read_chunk(page_bytes: &[u8], start: usize) -> [u8; NDATA] {
    let mut chunk = [0u8; NDATA];
    if start < page_bytes.len() {
        let end = (start + NDATA).min(page_bytes.len());
        chunk[..end - start].copy_from_slice(&page_bytes[start..end]);
    }
    chunk
}

/// Encode pipeline state (spec §4.6). Construction runs `ReadAndTransform`
/// and `InitializePrinting`; `render_page`/`render_all` run `NextPage`.
pub struct Encoder {
    geometry: Geometry,
    transformed: Transformed,
    filename: String,
    modified: u64,
    total_pages: u32,
}

impl Encoder {
    pub fn new(
        data: &[u8],
        filename: &str,
        modified_unix: i64,
        cfg: &EncodeConfig,
    ) -> Result<Encoder, PaperbackError> {
        cfg.validate().map_err(PaperbackError::InvalidInput)?;
        let transformed = read_and_transform(data, cfg)?;

        let geom_opts = GeometryOptions {
            ppix: cfg.dpi,
            ppiy: cfg.dpi,
            paper_w_thou: cfg.paper_w_thou,
            paper_h_thou: cfg.paper_h_thou,
            dot_percent: cfg.dot_percent,
            redundancy: cfg.redundancy,
            print_border: cfg.print_border,
        };
        let geometry = Geometry::new(&geom_opts)?;
        let total_pages = geometry.pages_for(transformed.payload.len() as u32);

        Ok(Encoder {
            geometry,
            transformed,
            filename: filename.to_owned(),
            modified: filetime_from_unix_seconds(modified_unix),
            total_pages,
        })
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// NextPage (spec §4.6): render page `p` (0-indexed).
    pub fn render_page(&self, p: u32) -> Raster {
        let r = self.geometry.redundancy;
        let offset = p * self.geometry.pagesize;
        let end = ((offset as usize) + self.geometry.pagesize as usize).min(self.transformed.payload.len());
        let page_bytes = &self.transformed.payload[offset as usize..end];

        let nstring = div_ceil(page_bytes.len() as u32, r as u32 * NDATA as u32).max(1);

        let name = build_name(
            &self.filename,
            self.transformed.mode,
            &self.transformed.salt,
            &self.transformed.iv,
        );
        let fields = SuperblockFields {
            datasize: self.transformed.payload.len() as u32,
            pagesize: self.geometry.pagesize,
            origsize: self.transformed.origsize,
            mode: self.transformed.mode,
            attributes: 0,
            page: (p + 1) as u16,
            modified: self.modified,
            filecrc: self.transformed.filecrc,
            name,
        };
        let superblock = Block::pack_superblock(&fields);

        let layout = page_layout(self.geometry.nx, self.geometry.ny, r, nstring);
        let mut cells: Vec<Option<Block>> = vec![None; layout.len()];

        for (k, role) in layout.iter().enumerate() {
            cells[k] = Some(match role {
                CellRole::Superblock => superblock,
                CellRole::Data { group, slot_in_group } => {
                    let flat = *group * r as u32 + *slot_in_group as u32;
                    let chunk = read_chunk(page_bytes, (flat as usize) * NDATA);
                    Block::pack_data(offset + flat * NDATA as u32, &chunk)
                }
                CellRole::Recovery { group } => {
                    let mut xor = [0xFFu8; NDATA];
                    for slot in 0..r as u32 {
                        let flat = *group * r as u32 + slot;
                        let chunk = read_chunk(page_bytes, (flat as usize) * NDATA);
                        for (x, c) in xor.iter_mut().zip(chunk.iter()) {
                            *x ^= c;
                        }
                    }
                    Block::pack_recovery(offset + *group * r as u32 * NDATA as u32, r, &xor)
                }
            });
        }

        let page = PageBlocks {
            layout: &layout,
            superblock: &superblock,
            cells,
        };
        rasterize_page(&self.geometry, &page)
    }

    pub fn render_all(&self) -> Vec<Raster> {
        (0..self.total_pages).map(|p| self.render_page(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncodeConfig;

    #[test]
    fn single_small_file_encodes_to_at_least_one_page() {
        let cfg = EncodeConfig::default();
        let data = b"hello, paperback!".repeat(4);
        let enc = Encoder::new(&data, "hello.txt", 1_700_000_000, &cfg).unwrap();
        assert!(enc.total_pages() >= 1);
        let pages = enc.render_all();
        assert_eq!(pages.len(), enc.total_pages() as usize);
        assert_eq!(pages[0].width, enc.geometry().raster_width);
    }

    #[test]
    fn rejects_empty_input() {
        let cfg = EncodeConfig::default();
        assert!(Encoder::new(&[], "x", 0, &cfg).is_err());
    }

    #[test]
    fn encryption_requires_password() {
        let mut cfg = EncodeConfig::default();
        cfg.encryption = true;
        assert!(Encoder::new(b"some data", "x", 0, &cfg).is_err());
    }

    #[test]
    fn encrypted_round_trip_embeds_salt_and_iv_in_superblock_name() {
        let mut cfg = EncodeConfig::default();
        cfg.encryption = true;
        cfg.password = Some("hunter2".into());
        let data = b"secret payload data, long enough to span a block".repeat(2);
        let enc = Encoder::new(&data, "secret.txt", 1_700_000_000, &cfg).unwrap();
        let raster = enc.render_page(0);
        assert!(raster.width > 0);
    }
}
