//! Block format (C3) — pack/unpack of the 128-byte on-paper record.
//!
//! # On-disk layout (128 bytes, all fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   addr          0xFFFFFFFF = superblock; else top nibble =
//!                             recovery-group size (0 = data block)
//!    4     90   payload       data bytes, or XOR of a group, or superblock
//!                             fields (see `SuperblockFields`)
//!   94      2   crc           CRC16(addr||payload) ^ 0x55AA
//!   96     32   ecc           RS(255,223) parity over addr||payload||crc
//! ```
//!
//! # Endianness
//! Every numeric field is little-endian; the wire format never negotiates.
//!
//! # Checksums
//! `ecc` is verified and any correctable errors (up to 16 byte errors) are
//! applied before `crc` is checked — a block that RS cannot correct is
//! rejected before its CRC is even read. This mirrors [`crate::gf256`]'s
//! contract of never touching the buffer on failure.

use byteorder::{ByteOrder, LittleEndian as LE};

use crate::crc16::block_crc;
use crate::gf256::{rs_decode, rs_encode, RsOutcome};

// ── Wire constants (shared across the whole crate) ──────────────────────────

pub const NDOT: usize = 32;
pub const NDATA: usize = 90;
pub const ECC_SIZE: usize = 32;
pub const FILENAME_SIZE: usize = 64;
pub const BLOCK_SIZE: usize = 4 + NDATA + 2 + ECC_SIZE;
pub const SUPERBLOCK_ADDR: u32 = 0xFFFF_FFFF;
pub const NGROUP_MIN: u8 = 2;
pub const NGROUP_MAX: u8 = 10;
pub const NGROUP_DEFAULT: u8 = 5;
pub const MAXSIZE: u32 = 0x0FFF_FF80;
pub const MAX_CONCURRENT_FILES: usize = 5;
pub const AES_KEYLEN: usize = 24;

pub const MODE_COMPRESSED: u8 = 0x01;
pub const MODE_ENCRYPTED: u8 = 0x02;

const _: () = assert!(BLOCK_SIZE == 128);

/// Outcome of [`Block::verify_and_correct`], matching the tri-state C3 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockVerify {
    /// RS corrected `k` bytes (0 if none needed) and CRC matched.
    Ok(u8),
    /// Same as `Ok` but `addr == SUPERBLOCK_ADDR`.
    Superblock(u8),
    /// RS exceeded 16 corrections, or CRC mismatched after correction.
    Rejected,
}

/// One 128-byte on-paper record, addressable as data, recovery, or
/// superblock depending on `addr` — a tagged variant over one flat backing
/// store rather than three distinct struct types.
#[derive(Clone, Copy)]
pub struct Block(pub [u8; BLOCK_SIZE]);

impl Block {
    pub fn zeroed() -> Self {
        Block([0u8; BLOCK_SIZE])
    }

    pub fn from_bytes(bytes: [u8; BLOCK_SIZE]) -> Self {
        Block(bytes)
    }

    pub fn addr(&self) -> u32 {
        LE::read_u32(&self.0[0..4])
    }

    fn set_addr(&mut self, v: u32) {
        LE::write_u32(&mut self.0[0..4], v);
    }

    pub fn payload(&self) -> &[u8; NDATA] {
        self.0[4..4 + NDATA].try_into().unwrap()
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.0[4..4 + NDATA]
    }

    pub fn crc_field(&self) -> u16 {
        LE::read_u16(&self.0[4 + NDATA..4 + NDATA + 2])
    }

    pub fn ecc_field(&self) -> &[u8; ECC_SIZE] {
        self.0[4 + NDATA + 2..].try_into().unwrap()
    }

    pub fn is_superblock(&self) -> bool {
        self.addr() == SUPERBLOCK_ADDR
    }

    /// Top nibble of `addr`: 0 for a data block, `g` for a recovery block
    /// covering a group of `g` data blocks. Meaningless on a superblock.
    pub fn recovery_group_size(&self) -> u8 {
        (self.addr() >> 28) as u8
    }

    pub fn data_offset(&self) -> u32 {
        self.addr() & 0x0FFF_FFFF
    }

    /// Build a data block at byte offset `offset` with the given payload.
    pub fn pack_data(offset: u32, payload: &[u8]) -> Block {
        assert_eq!(payload.len(), NDATA);
        Self::pack_raw(offset, payload)
    }

    /// Build a recovery block covering `group_size` data blocks starting at
    /// `offset`, with `payload` already XORed per spec §4.5.
    pub fn pack_recovery(offset: u32, group_size: u8, payload: &[u8]) -> Block {
        assert_eq!(payload.len(), NDATA);
        assert!((NGROUP_MIN..=NGROUP_MAX).contains(&group_size));
        let addr = offset | ((group_size as u32) << 28);
        Self::pack_raw(addr, payload)
    }

    /// Build a superblock from its typed fields.
    pub fn pack_superblock(fields: &SuperblockFields) -> Block {
        let payload = fields.to_bytes();
        Self::pack_raw(SUPERBLOCK_ADDR, &payload)
    }

    fn pack_raw(addr: u32, payload: &[u8]) -> Block {
        let mut b = Block::zeroed();
        b.set_addr(addr);
        b.payload_mut().copy_from_slice(payload);
        let crc = block_crc(&b.0[0..4 + NDATA]);
        LE::write_u16(&mut b.0[4 + NDATA..4 + NDATA + 2], crc);
        let ecc = rs_encode(&b.0[0..96].try_into().unwrap());
        b.0[96..].copy_from_slice(&ecc);
        b
    }

    /// Run RS correction (up to 16 byte errors) then verify the CRC.
    /// On `Rejected`, `self` is left exactly as it was scanned in.
    pub fn verify_and_correct(&mut self) -> BlockVerify {
        let mut buf = self.0;
        let corrections = match rs_decode(&mut buf) {
            Ok(RsOutcome::NoErrors) => 0u8,
            Ok(RsOutcome::Corrected(k)) => k,
            Err(_) => return BlockVerify::Rejected,
        };

        let stored_crc = LE::read_u16(&buf[4 + NDATA..4 + NDATA + 2]);
        let computed_crc = block_crc(&buf[0..4 + NDATA]);
        if stored_crc != computed_crc {
            return BlockVerify::Rejected;
        }

        self.0 = buf;
        if self.is_superblock() {
            BlockVerify::Superblock(corrections)
        } else {
            BlockVerify::Ok(corrections)
        }
    }
}

/// Typed view over a superblock's 90-byte payload (spec §3/§6).
#[derive(Debug, Clone)]
pub struct SuperblockFields {
    pub datasize: u32,
    pub pagesize: u32,
    pub origsize: u32,
    pub mode: u8,
    pub attributes: u8,
    pub page: u16,
    /// Windows FILETIME: 100-ns ticks since 1601-01-01, bit-exact, never
    /// normalized to Unix time mid-pipeline (spec §9).
    pub modified: u64,
    pub filecrc: u16,
    /// Zero-padded name field; bytes 32..48/48..64 double as salt/IV when
    /// `mode & MODE_ENCRYPTED` is set (spec §6).
    pub name: [u8; FILENAME_SIZE],
}

impl SuperblockFields {
    pub fn is_compressed(&self) -> bool {
        self.mode & MODE_COMPRESSED != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.mode & MODE_ENCRYPTED != 0
    }

    pub fn filename(&self) -> String {
        let end = self.name[..32].iter().position(|&b| b == 0).unwrap_or(32);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    pub fn salt(&self) -> [u8; 16] {
        self.name[32..48].try_into().unwrap()
    }

    pub fn iv(&self) -> [u8; 16] {
        self.name[48..64].try_into().unwrap()
    }

    pub fn to_bytes(&self) -> [u8; NDATA] {
        let mut out = [0u8; NDATA];
        LE::write_u32(&mut out[0..4], self.datasize);
        LE::write_u32(&mut out[4..8], self.pagesize);
        LE::write_u32(&mut out[8..12], self.origsize);
        out[12] = self.mode;
        out[13] = self.attributes;
        LE::write_u16(&mut out[14..16], self.page);
        LE::write_u64(&mut out[16..24], self.modified);
        LE::write_u16(&mut out[24..26], self.filecrc);
        out[26..26 + FILENAME_SIZE].copy_from_slice(&self.name);
        out
    }

    pub fn from_bytes(payload: &[u8; NDATA]) -> Self {
        SuperblockFields {
            datasize: LE::read_u32(&payload[0..4]),
            pagesize: LE::read_u32(&payload[4..8]),
            origsize: LE::read_u32(&payload[8..12]),
            mode: payload[12],
            attributes: payload[13],
            page: LE::read_u16(&payload[14..16]),
            modified: LE::read_u64(&payload[16..24]),
            filecrc: LE::read_u16(&payload[24..26]),
            name: payload[26..26 + FILENAME_SIZE].try_into().unwrap(),
        }
    }
}

impl Block {
    pub fn superblock_fields(&self) -> SuperblockFields {
        debug_assert!(self.is_superblock());
        SuperblockFields::from_bytes(self.payload())
    }
}

/// Bit-exact conversion between Windows FILETIME ticks and Unix seconds,
/// used only at the I/O boundary — never mid-pipeline (spec §9).
pub const FILETIME_EPOCH_DIFF_100NS: u64 = 116_444_736_000_000_000;

pub fn filetime_from_unix_seconds(unix_secs: i64) -> u64 {
    ((unix_secs * 10_000_000) as i128 + FILETIME_EPOCH_DIFF_100NS as i128).max(0) as u64
}

pub fn filetime_to_unix_seconds(filetime: u64) -> i64 {
    ((filetime as i128 - FILETIME_EPOCH_DIFF_100NS as i128) / 10_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_data_block_round_trips() {
        let payload = [7u8; NDATA];
        let mut block = Block::pack_data(90, &payload);
        assert_eq!(block.addr(), 90);
        assert_eq!(block.recovery_group_size(), 0);
        assert_eq!(block.verify_and_correct(), BlockVerify::Ok(0));
        assert_eq!(block.payload(), &payload);
    }

    #[test]
    fn pack_unpack_recovery_block_round_trips() {
        let payload = [0xAAu8; NDATA];
        let mut block = Block::pack_recovery(0, 5, &payload);
        assert_eq!(block.recovery_group_size(), 5);
        assert_eq!(block.verify_and_correct(), BlockVerify::Ok(0));
    }

    #[test]
    fn superblock_round_trips_fields() {
        let mut name = [0u8; FILENAME_SIZE];
        name[..5].copy_from_slice(b"a.txt");
        let fields = SuperblockFields {
            datasize: 160,
            pagesize: 450,
            origsize: 150,
            mode: MODE_COMPRESSED,
            attributes: 0,
            page: 1,
            modified: 133_000_000_000_000_000,
            filecrc: 0x1234,
            name,
        };
        let mut block = Block::pack_superblock(&fields);
        assert!(block.is_superblock());
        assert_eq!(block.verify_and_correct(), BlockVerify::Superblock(0));
        let read_back = block.superblock_fields();
        assert_eq!(read_back.datasize, 160);
        assert_eq!(read_back.filename(), "a.txt");
    }

    #[test]
    fn crc_field_matches_whitened_crc() {
        let payload = [1u8; NDATA];
        let block = Block::pack_data(0, &payload);
        let expected = block_crc(&block.0[0..4 + NDATA]);
        assert_eq!(block.crc_field(), expected);
    }

    #[test]
    fn rejects_on_excessive_corruption() {
        let payload = [3u8; NDATA];
        let original = Block::pack_data(200, &payload);
        let mut corrupted = original;
        for b in corrupted.0.iter_mut().take(17) {
            *b ^= 0xFF;
        }
        assert_eq!(corrupted.verify_and_correct(), BlockVerify::Rejected);
    }

    #[test]
    fn filetime_round_trips_unix_seconds() {
        let now = 1_700_000_000i64;
        let ft = filetime_from_unix_seconds(now);
        assert_eq!(filetime_to_unix_seconds(ft), now);
    }
}
