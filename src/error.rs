//! Top-level error taxonomy (spec §7), consolidating the per-component
//! error enums into one type callers match on.

use thiserror::Error;

use crate::codec::CodecError;
use crate::crypto::CryptoError;
use crate::geometry::GeometryError;
use crate::grid::GridError;

#[derive(Error, Debug)]
pub enum PaperbackError {
    /// Size 0 or > MAXSIZE; out-of-range option; malformed raster.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Page geometry constraints failed.
    #[error(transparent)]
    GeometryTooSmall(#[from] GeometryError),

    /// Grid detector failed: low contrast, no peaks, disproportionate steps.
    #[error(transparent)]
    GridNotFound(#[from] GridError),

    /// One block exceeded 16 RS corrections or failed CRC after correction.
    /// Recorded by the reassembler, not fatal on its own.
    #[error("block at offset {offset} is unrecoverable")]
    BlockUnrecoverable { offset: u32 },

    /// At least one redundancy group on a page has >=2 missing blocks.
    #[error("page is incomplete: {missing} block(s) missing from required groups")]
    PageIncomplete { missing: usize },

    /// Post-decrypt CRC mismatch: wrong password or tampered data.
    #[error("authentication failed — wrong password or corrupted data")]
    Unauthenticated,

    /// Decompressed size mismatch or decompressor error.
    #[error(transparent)]
    DecompressFailed(#[from] CodecError),

    /// More than `MAX_CONCURRENT_FILES` concurrent files requested.
    #[error("file slot table is full (max {0} concurrent files)")]
    SlotTableFull(usize),

    /// Invariant violation (e.g. RS Chien root count != deg(lambda)).
    /// Aborts the pipeline; never recovered from.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
