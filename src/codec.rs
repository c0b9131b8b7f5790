//! Compression collaborator (spec §6 boundary interface).
//!
//! A byte-buffer-to-byte-buffer codec with a `CompressionLevel`, used by
//! `encoder.rs`/`reassembler.rs`. Compression is treated as a single closed
//! interface, not a negotiated/registered format — there is no on-disk
//! codec identity, because the spec's `SuperblockFields::mode` only ever
//! records whether compression was used at all (`MODE_COMPRESSED`).

use std::io::Read;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    None,
    Fast,
    Max,
}

impl CompressionLevel {
    fn zstd_level(self) -> i32 {
        match self {
            CompressionLevel::None => 0,
            CompressionLevel::Fast => 1,
            CompressionLevel::Max => 19,
        }
    }
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("decompressed size {actual} does not match expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Compress `data`. Returns `data` unchanged if `level == None`.
pub fn compress(data: &[u8], level: CompressionLevel) -> Result<Vec<u8>, CodecError> {
    if level == CompressionLevel::None {
        return Ok(data.to_vec());
    }
    zstd::stream::encode_all(data, level.zstd_level())
        .map_err(|e| CodecError::Compression(e.to_string()))
}

/// Decompress `data`, failing if the output size does not match `expected`.
///
/// `data` is the encoder's aligned buffer (spec §4.6 zero-pads the
/// compressed-then-maybe-encrypted payload up to a 16-byte multiple), so
/// the zstd frame is typically followed by trailing zero padding.
/// `decode_all` would try to parse that padding as a second concatenated
/// frame and fail; `single_frame` stops right after the real frame ends.
pub fn decompress(data: &[u8], expected_size: usize) -> Result<Vec<u8>, CodecError> {
    let mut decoder = zstd::stream::read::Decoder::new(data)
        .map_err(|e| CodecError::Decompression(e.to_string()))?
        .single_frame();
    let mut out = Vec::with_capacity(expected_size);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decompression(e.to_string()))?;
    if out.len() != expected_size {
        return Err(CodecError::SizeMismatch {
            expected: expected_size,
            actual: out.len(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_max_compression() {
        let data = b"the quick brown fox jumps over the lazy dog ".repeat(64);
        let compressed = compress(&data, CompressionLevel::Max).unwrap();
        let recovered = decompress(&compressed, data.len()).unwrap();
        assert_eq!(recovered, data);
    }

    #[test]
    fn none_level_is_a_no_op() {
        let data = b"hello".to_vec();
        assert_eq!(compress(&data, CompressionLevel::None).unwrap(), data);
    }

    #[test]
    fn decompress_ignores_trailing_zero_padding() {
        let data = b"the quick brown fox jumps over the lazy dog ".repeat(64);
        let mut compressed = compress(&data, CompressionLevel::Max).unwrap();
        let aligned_len = (compressed.len() + 15) / 16 * 16;
        compressed.resize(aligned_len, 0);
        let recovered = decompress(&compressed, data.len()).unwrap();
        assert_eq!(recovered, data);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let data = b"some data to compress repeated ".repeat(8);
        let compressed = compress(&data, CompressionLevel::Fast).unwrap();
        assert!(decompress(&compressed, data.len() + 1).is_err());
    }
}
