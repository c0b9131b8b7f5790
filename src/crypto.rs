//! AES-192-CBC encryption and PBKDF2-SHA256 key derivation for encrypted
//! files (spec §4.6/§6).
//!
//! Key derivation: PBKDF2-HMAC-SHA256(password, salt, 524288 iterations) →
//! 24-byte AES-192 key. Encryption: AES-192-CBC with PKCS7 padding disabled
//! (the caller zero-pads to a multiple of 16 before encrypting, per §4.6) —
//! the stream is already block aligned, so we use the no-padding encryptor.

use aes::Aes192;
use cbc::cipher::{
    block_padding::NoPadding, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut,
    KeyIvInit,
};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use thiserror::Error;

use crate::block::AES_KEYLEN;

pub const PBKDF2_ITERATIONS: u32 = 524_288;

type Aes192CbcEnc = cbc::Encryptor<Aes192>;
type Aes192CbcDec = cbc::Decryptor<Aes192>;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("ciphertext length {0} is not a multiple of the AES block size")]
    Unaligned(usize),
    #[error("AES-CBC decryption failed — wrong password or corrupted data")]
    DecryptionFailed,
}

/// Derive a 24-byte AES-192 key from a password and a 16-byte salt via
/// PBKDF2-HMAC-SHA256 at the spec's fixed iteration count.
pub fn derive_key(password: &str, salt: &[u8; 16]) -> [u8; AES_KEYLEN] {
    let mut key = [0u8; AES_KEYLEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypt `plaintext` (already zero-padded to a multiple of 16 bytes) with
/// AES-192-CBC. Returns ciphertext of the same length.
pub fn aes_cbc_encrypt(
    key: &[u8; AES_KEYLEN],
    iv: &[u8; 16],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if plaintext.len() % 16 != 0 {
        return Err(CryptoError::Unaligned(plaintext.len()));
    }
    let enc = Aes192CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
    Ok(enc.encrypt_padded_vec_mut::<NoPadding>(plaintext))
}

/// Decrypt a ciphertext produced by [`aes_cbc_encrypt`].
pub fn aes_cbc_decrypt(
    key: &[u8; AES_KEYLEN],
    iv: &[u8; 16],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() % 16 != 0 {
        return Err(CryptoError::Unaligned(ciphertext.len()));
    }
    let dec = Aes192CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
    dec.decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
