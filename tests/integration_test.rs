use paperback::block::NDATA;
use paperback::config::{Compression, DecodeConfig, EncodeConfig};
use paperback::crc16::block_crc;
use paperback::pipeline::{DecodeDriver, EncodeDriver};
use paperback::render::{CellRole, Raster};

fn encode_one(data: &[u8], filename: &str, cfg: &EncodeConfig) -> Vec<Raster> {
    let mut driver = EncodeDriver::new(data, filename, 1_700_000_000, cfg).unwrap();
    let mut pages = Vec::new();
    while let Some((_, raster)) = driver.step() {
        pages.push(raster);
    }
    pages
}

fn decode_all(pages: &[Raster], cfg: &DecodeConfig) -> Vec<u8> {
    let mut driver = DecodeDriver::new(cfg);
    for page in pages {
        if let Some(file) = driver.step(page).unwrap().into_iter().next() {
            return file.bytes;
        }
    }
    panic!("no file was reassembled from the scanned pages");
}

/// Seed scenario 1: a tiny file, no compression, no encryption.
#[test]
fn seed_scenario_1_tiny_file_round_trips() {
    let data = b"Hello, Paperback.";
    let cfg = EncodeConfig::default();
    let pages = encode_one(data, "hello.txt", &cfg);
    assert_eq!(pages.len(), 1);

    let recovered = decode_all(&pages, &DecodeConfig::default());
    assert_eq!(recovered, data);
}

/// Seed scenario 2 (adapted to this crate's own geometry numbers rather
/// than the literal page count, which depends on paper/DPI constants):
/// zeroing one data block in a group must not prevent reassembly.
#[test]
fn single_block_loss_is_recovered_via_group_xor() {
    let data = vec![0u8; 8192];
    let cfg = EncodeConfig {
        redundancy: 2,
        ..EncodeConfig::default()
    };
    let mut pages = encode_one(&data, "zeros.bin", &cfg);
    assert!(!pages.is_empty());

    let geom = EncodeDriver::new(&data, "zeros.bin", 0, &cfg).unwrap();
    let geometry = *geom.geometry();

    // page 0 is always full-capacity unless it is also the only page.
    let page0_len = if pages.len() > 1 {
        geometry.pagesize
    } else {
        data.len() as u32
    };
    let nstring = div_ceil(page0_len, geometry.redundancy as u32 * NDATA as u32).max(1);
    let layout = paperback::render::page_layout(geometry.nx, geometry.ny, geometry.redundancy, nstring);
    let k = layout
        .iter()
        .position(|role| matches!(role, CellRole::Data { group: 0, .. }))
        .expect("page must contain a data cell for group 0");
    let cx = k as u32 % geometry.nx;
    let cy = k as u32 / geometry.nx;
    blank_cell(&mut pages[0], &geometry, cx, cy);

    let recovered = decode_all(&pages, &DecodeConfig::default());
    assert_eq!(recovered, data);
}

fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

fn blank_cell(raster: &mut Raster, geometry: &paperback::geometry::Geometry, cx: u32, cy: u32) {
    let x0 = geometry.border + cx * geometry.cell_w();
    let y0 = geometry.border + cy * geometry.cell_h();
    for y in y0..(y0 + geometry.cell_h()).min(raster.height) {
        for x in x0..(x0 + geometry.cell_w()).min(raster.width) {
            raster.pixels[(y * raster.width + x) as usize] = 255;
        }
    }
}

/// Seed scenario 3: compressed + encrypted round trip, and a wrong
/// password is rejected rather than silently returning garbage.
#[test]
fn compressed_and_encrypted_round_trips_and_rejects_wrong_password() {
    let data: Vec<u8> = (0..32 * 1024).map(|i| (i % 251) as u8).collect();
    let mut cfg = EncodeConfig {
        compression: Compression::Max,
        ..EncodeConfig::default()
    };
    cfg.encryption = true;
    cfg.password = Some("correct horse battery staple".into());

    let pages = encode_one(&data, "secret.bin", &cfg);

    let good_cfg = DecodeConfig {
        password: Some("correct horse battery staple".into()),
        best_quality: false,
    };
    let recovered = decode_all(&pages, &good_cfg);
    assert_eq!(recovered, data);

    let mut driver = DecodeDriver::new(&DecodeConfig {
        password: Some("wrong".into()),
        best_quality: false,
    });
    let mut saw_auth_error = false;
    for page in &pages {
        match driver.step(page) {
            Err(paperback::error::PaperbackError::Unauthenticated) => saw_auth_error = true,
            Ok(_) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(saw_auth_error, "wrong password must surface Unauthenticated");
}

/// Seed scenario 5: RS corrects up to 16 byte errors and rejects 17; CRC
/// stays whitened-XOR-correct for a freshly packed block.
#[test]
fn block_tolerates_sixteen_byte_errors_crc_matches_whitened_formula() {
    use paperback::block::{Block, BlockVerify};

    let payload = [0xFFu8; NDATA];
    let mut block = Block::pack_data(0, &payload);
    let expected_crc = block_crc(&block.0[0..4 + NDATA]);
    assert_eq!(block.crc_field(), expected_crc);

    let mut corrected = block;
    for b in corrected.0.iter_mut().take(16) {
        *b ^= 0xFF;
    }
    match corrected.verify_and_correct() {
        BlockVerify::Ok(errors) => assert_eq!(errors, 16),
        other => panic!("expected Ok(16), got {other:?}"),
    }

    let mut rejected = block;
    for b in rejected.0.iter_mut().take(17) {
        *b ^= 0xFF;
    }
    assert_eq!(rejected.verify_and_correct(), BlockVerify::Rejected);
}

/// Seed scenario 6: A4 at 300 DPI meets the stated geometry floor and the
/// page count matches `ceil(datasize / pagesize)`.
#[test]
fn a4_at_300dpi_page_count_matches_ceil_division() {
    let cfg = EncodeConfig {
        dpi: 300,
        redundancy: 5,
        paper_w_thou: 8270,
        paper_h_thou: 11690,
        ..EncodeConfig::default()
    };
    let data = vec![0x42u8; 1024 * 1024];
    let driver = EncodeDriver::new(&data, "big.bin", 0, &cfg).unwrap();
    let geometry = driver.geometry();
    assert!(geometry.nx >= 10);
    assert!(geometry.ny >= 12);

    let aligned_len = (data.len() + 15) / 16 * 16;
    let expected_pages = (aligned_len as u32 + geometry.pagesize - 1) / geometry.pagesize;
    assert_eq!(driver.total_pages(), expected_pages);
}

/// Round-trip property across a spread of redundancy values, independent
/// of the specific geometry numbers.
#[test]
fn round_trips_across_redundancy_values() {
    for &r in &[2u8, 5, 10] {
        let cfg = EncodeConfig {
            redundancy: r,
            ..EncodeConfig::default()
        };
        let data = format!("round trip at redundancy {r}").repeat(10).into_bytes();
        let pages = encode_one(&data, "r.txt", &cfg);
        let recovered = decode_all(&pages, &DecodeConfig::default());
        assert_eq!(recovered, data);
    }
}
