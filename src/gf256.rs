//! GF(2^8) arithmetic and the shortened Reed-Solomon(255,223) codec used to
//! protect every 128-byte block (C1).
//!
//! The codeword is 96 data bytes (addr, payload, crc) plus 32 parity bytes,
//! shortened from the full RS(255,223) code by a virtual 127-byte zero pad.
//! Up to 16 byte errors per block are correctable; more than that must be
//! reported as unrecoverable without touching the caller's buffer.

use thiserror::Error;

const NN: usize = 255;
const NROOTS: usize = 32;
const FCR: usize = 0;
const PRIM: usize = 1;
const PPOLY: u32 = 0x11D;
const LENGTH: usize = 96 + NROOTS;
const PAD: usize = NN - LENGTH;
const MAX_CORRECTIONS: usize = NROOTS / 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RsError {
    #[error("reed-solomon decode exceeded the correctable error bound")]
    Unrecoverable,
    #[error("reed-solomon internal invariant violated: chien root count != deg(lambda)")]
    Internal,
}

/// Outcome of a decode attempt, mirroring spec C1's tri-state contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsOutcome {
    NoErrors,
    Corrected(u8),
}

struct Tables {
    alpha: [u8; 256],
    index: [u8; 256],
    /// Generator polynomial, stored as logs (index values), degree NROOTS.
    genpoly: [u8; NROOTS + 1],
}

fn build_tables() -> Tables {
    let mut alpha = [0u8; 256];
    let mut index = [0u8; 256];
    index[0] = 255; // log of zero sentinel

    let mut x: u32 = 1;
    for i in 0..NN {
        alpha[i] = x as u8;
        index[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= PPOLY;
        }
    }
    alpha[NN] = alpha[0];

    // Build g(x) = product_{i=0}^{NROOTS-1} (x - alpha^(FCR + i*PRIM)) directly
    // in field-value form, then convert coefficients to log form.
    let mut genpoly_val = [0u8; NROOTS + 1];
    genpoly_val[0] = 1;
    let mut root = FCR;
    for i in 0..NROOTS {
        genpoly_val[i + 1] = 1;
        for j in (1..=i).rev() {
            if genpoly_val[j] != 0 {
                let lg = index[genpoly_val[j] as usize] as usize;
                genpoly_val[j] = genpoly_val[j - 1] ^ alpha[(lg + root) % NN];
            } else {
                genpoly_val[j] = genpoly_val[j - 1];
            }
        }
        genpoly_val[0] = alpha[(index[genpoly_val[0] as usize] as usize + root) % NN];
        root += PRIM;
    }

    let mut genpoly = [0u8; NROOTS + 1];
    for i in 0..=NROOTS {
        genpoly[i] = index[genpoly_val[i] as usize];
    }

    Tables { alpha, index, genpoly }
}

fn tables() -> &'static Tables {
    use std::sync::OnceLock;
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(build_tables)
}

fn modnn(x: i32) -> usize {
    let mut v = x;
    while v < 0 {
        v += NN as i32;
    }
    (v as usize) % NN
}

fn gf_mul(t: &Tables, a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        0
    } else {
        t.alpha[(t.index[a as usize] as usize + t.index[b as usize] as usize) % NN]
    }
}

fn gf_div(t: &Tables, a: u8, b: u8) -> u8 {
    debug_assert!(b != 0);
    if a == 0 {
        0
    } else {
        t.alpha[modnn(t.index[a as usize] as i32 - t.index[b as usize] as i32)]
    }
}

/// Encode 96 data bytes (`addr||payload||crc`) into 32 parity bytes.
pub fn rs_encode(data: &[u8; 96]) -> [u8; 32] {
    let t = tables();
    let mut bb = [0u8; NROOTS];
    for &byte in data.iter() {
        let fb = t.index[(byte ^ bb[0]) as usize] as usize;
        if fb != 255 {
            for j in 1..NROOTS {
                bb[j] ^= t.alpha[(fb + t.genpoly[NROOTS - j] as usize) % NN];
            }
        }
        for j in 0..NROOTS - 1 {
            bb[j] = bb[j + 1];
        }
        bb[NROOTS - 1] = if fb != 255 {
            t.alpha[(fb + t.genpoly[0] as usize) % NN]
        } else {
            0
        };
    }
    bb
}

/// Decode a 128-byte codeword in place. Returns the number of corrected
/// bytes (0 if none were needed) or `RsError` if the block cannot be
/// trusted. On any error variant, `buf` is left completely untouched.
pub fn rs_decode(buf: &mut [u8; LENGTH]) -> Result<RsOutcome, RsError> {
    let t = tables();

    // 1. Syndromes via Horner's method; buf[0] is the highest-degree
    // coefficient of the (virtually zero-padded) degree-254 codeword.
    let mut syn = [0u8; NROOTS];
    let mut any_nonzero = false;
    for i in 0..NROOTS {
        let root = FCR + i * PRIM;
        let mut sum = buf[0];
        for &byte in &buf[1..] {
            sum = if sum == 0 {
                byte
            } else {
                byte ^ t.alpha[(t.index[sum as usize] as usize + root) % NN]
            };
        }
        syn[i] = sum;
        any_nonzero |= sum != 0;
    }
    if !any_nonzero {
        return Ok(RsOutcome::NoErrors);
    }

    // 2. Berlekamp-Massey over the syndromes to find the error locator
    // polynomial lambda (degree l) and keep the error evaluator via the
    // standard recurrence.
    let mut lambda = [0u8; NROOTS + 1];
    let mut b = [0u8; NROOTS + 1];
    lambda[0] = 1;
    b[0] = 1;
    let mut l: usize = 0;
    let mut m: usize = 1;
    let mut bdisc = 1u8;

    for n in 0..NROOTS {
        let mut disc = syn[n];
        for i in 1..=l {
            disc ^= gf_mul(t, lambda[i], syn[n - i]);
        }
        if disc == 0 {
            m += 1;
            continue;
        }
        let coef = gf_div(t, disc, bdisc);
        let grow = 2 * l <= n;
        let prev_lambda = lambda;
        for i in m..=NROOTS {
            lambda[i] ^= gf_mul(t, coef, b[i - m]);
        }
        if grow {
            l = n + 1 - l;
            b = prev_lambda;
            bdisc = disc;
            m = 1;
        } else {
            m += 1;
        }
    }

    if l > MAX_CORRECTIONS {
        return Err(RsError::Unrecoverable);
    }

    // 3. Chien search: evaluate lambda at alpha^i for i in 1..=NN, collect
    // roots, map each to a buffer position through the PAD offset.
    let mut loc = [0usize; NROOTS];
    let mut root_i = [0usize; NROOTS];
    let mut count = 0;
    for i in 1..=NN {
        let mut q = 1u8;
        for j in 1..=l {
            if lambda[j] != 0 {
                q ^= t.alpha[(t.index[lambda[j] as usize] as usize + i * j) % NN];
            }
        }
        if q != 0 {
            continue;
        }
        let exponent = NN - i;
        if exponent < PAD {
            // root falls inside the virtual zero padding: not a real error
            // position, and the only sound response is to reject.
            return Err(RsError::Unrecoverable);
        }
        loc[count] = exponent - PAD;
        root_i[count] = i;
        count += 1;
        if count == l {
            break;
        }
    }
    if count != l {
        return Err(RsError::Internal);
    }
    if l == 0 {
        return Ok(RsOutcome::NoErrors);
    }

    // 4. Forney: omega(x) = [s(x) * lambda(x)] mod x^NROOTS, magnitude at
    // each root via omega(root) / lambda'(root).
    let mut omega = [0u8; NROOTS];
    for i in 0..NROOTS {
        let mut acc = 0u8;
        for j in 0..=i.min(l) {
            acc ^= gf_mul(t, lambda[j], syn[i - j]);
        }
        omega[i] = acc;
    }

    let mut corrected = *buf;
    for k in 0..l {
        let pos = loc[k];
        let i = root_i[k];
        // lambda'(x): char-2 field derivative keeps only odd-degree terms.
        let mut denom = 0u8;
        for j in (1..=l).step_by(2) {
            if lambda[j] != 0 {
                denom ^= t.alpha[(t.index[lambda[j] as usize] as usize + i * (j - 1)) % NN];
            }
        }
        if denom == 0 {
            return Err(RsError::Internal);
        }
        let mut num = 0u8;
        for (j, &c) in omega.iter().enumerate() {
            if c != 0 {
                num ^= t.alpha[(t.index[c] as usize + i * j) % NN];
            }
        }
        if num == 0 {
            // zero-magnitude correction: nothing to flip at this position.
            continue;
        }
        corrected[pos] ^= gf_div(t, num, denom);
    }

    *buf = corrected;
    Ok(RsOutcome::Corrected(l as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_block(data96: &[u8; 96]) -> [u8; LENGTH] {
        let parity = rs_encode(data96);
        let mut out = [0u8; LENGTH];
        out[..96].copy_from_slice(data96);
        out[96..].copy_from_slice(&parity);
        out
    }

    #[test]
    fn clean_codeword_reports_no_errors() {
        let mut data = [0u8; 96];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        let mut buf = encode_block(&data);
        let result = rs_decode(&mut buf).unwrap();
        assert_eq!(result, RsOutcome::NoErrors);
    }

    #[test]
    fn sixteen_byte_errors_are_corrected() {
        let mut data = [0u8; 96];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i * 13 + 1) as u8;
        }
        let original = encode_block(&data);
        let mut buf = original;
        for i in 0..16 {
            buf[i] ^= 0xFF;
        }
        let result = rs_decode(&mut buf).expect("must correct up to 16 errors");
        assert_eq!(result, RsOutcome::Corrected(16));
        assert_eq!(buf, original);
    }

    #[test]
    fn seventeen_byte_errors_are_unrecoverable() {
        let mut data = [0u8; 96];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i * 29 + 5) as u8;
        }
        let original = encode_block(&data);
        let mut buf = original;
        for i in 0..17 {
            buf[i] ^= 0xFF;
        }
        let before = buf;
        let err = rs_decode(&mut buf).unwrap_err();
        assert_eq!(err, RsError::Unrecoverable);
        assert_eq!(buf, before, "buffer must be untouched on failure");
    }

    #[test]
    fn encode_is_deterministic() {
        let data = [0x42u8; 96];
        assert_eq!(rs_encode(&data), rs_encode(&data));
    }
}
