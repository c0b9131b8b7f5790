//! # paperback — paper-robust file backup codec
//!
//! Format guarantees:
//! - All numeric fields are little-endian; never negotiated
//! - Every page is a dot-matrix raster of fixed 128-byte blocks, each
//!   independently Reed–Solomon- and CRC-guarded (`gf256.rs`, `crc16.rs`,
//!   `block.rs`) — a single block is recoverable even if every other block
//!   on the page is unreadable
//! - Exactly one block per page is a superblock: it carries the file's
//!   identity (name, size, mode, timestamps, CRC) and is distinguished from
//!   data/recovery blocks purely by its address field, not by position
//! - Redundancy groups add an XOR recovery block per `r` data blocks per
//!   page, reconstructible from any `r` of the `r+1` group members
//!   (`render.rs`'s `page_layout`, `reassembler.rs`'s group XOR)
//! - Page geometry (dot size, border, cell grid, raster dimensions) is
//!   derived once from DPI/paper/redundancy and is reproducible from those
//!   same inputs alone (`geometry.rs`)
//! - Decoding never assumes a known orientation or pixel alignment: grid
//!   detection (`grid.rs`) and per-block sampling (`blockreader.rs`)
//!   recover geometry and bit phase straight from the scanned raster

pub mod codec;
pub mod crypto;
pub mod block;

pub mod gf256;
pub mod crc16;
pub mod geometry;
pub mod render;
pub mod grid;
pub mod blockreader;
pub mod encoder;
pub mod reassembler;
pub mod pipeline;
pub mod config;
pub mod error;

// Flat re-exports for the most common types.
pub use block::{Block, BlockVerify, SuperblockFields, BLOCK_SIZE, NDATA, NDOT};
pub use codec::{compress, decompress, CodecError, CompressionLevel};
pub use crypto::{derive_key, CryptoError};

pub use config::{DecodeConfig, EncodeConfig};
pub use encoder::Encoder;
pub use error::PaperbackError;
pub use geometry::Geometry;
pub use reassembler::Reassembler;
