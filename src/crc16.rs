//! CRC-16/CCITT (XMODEM variant) used for block and file integrity (C2).
//!
//! poly 0x1021, init 0, no input/output reflection, no final xor — the
//! `crc` crate's `CRC_16_XMODEM` catalog entry is exactly this algorithm.

use crc::{Crc, CRC_16_XMODEM};

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Historical whitening applied to the block CRC before it is stored.
pub const BLOCK_CRC_WHITEN: u16 = 0x55AA;

/// Plain CRC-16/CCITT, no whitening. Used for whole-file integrity.
pub fn crc16(bytes: &[u8]) -> u16 {
    XMODEM.checksum(bytes)
}

/// Block CRC: `CRC16(addr||payload) ^ 0x55AA`.
pub fn block_crc(addr_and_payload: &[u8]) -> u16 {
    crc16(addr_and_payload) ^ BLOCK_CRC_WHITEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_crc_is_whitened_plain_crc() {
        let bytes = b"some block bytes";
        assert_eq!(block_crc(bytes), crc16(bytes) ^ 0x55AA);
    }

    #[test]
    fn empty_input_has_zero_crc() {
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn crc_is_order_sensitive() {
        assert_ne!(crc16(b"ab"), crc16(b"ba"));
    }
}
