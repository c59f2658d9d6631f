//! Storage decryption.
//!
//! Each object is encrypted on its own with AES-CTR. The 128-bit counter
//! block is the object's 64-bit IV followed by a 64-bit block counter, both
//! big-endian, the counter starting at zero.

use aes::{Aes128, Aes256};
use af_core::{DecryptionInfo, Error, Result};
use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes128Ctr = ctr::Ctr64BE<Aes128>;
type Aes256Ctr = ctr::Ctr64BE<Aes256>;

/// Keystream state for one object.
pub enum Decryptor {
    Aes128(Box<Aes128Ctr>),
    Aes256(Box<Aes256Ctr>),
}

impl Decryptor {
    /// Create a decryptor from a 16- or 32-byte key and the object's IV.
    pub fn new(key: &[u8], iv: u64) -> Result<Self> {
        let mut counter = [0u8; 16];
        counter[..8].copy_from_slice(&iv.to_be_bytes());

        let invalid = |_| Error::Decryption(format!("invalid key length {}", key.len()));
        match key.len() {
            16 => Ok(Self::Aes128(Box::new(
                Aes128Ctr::new_from_slices(key, &counter).map_err(invalid)?,
            ))),
            32 => Ok(Self::Aes256(Box::new(
                Aes256Ctr::new_from_slices(key, &counter).map_err(invalid)?,
            ))),
            n => Err(Error::Decryption(format!(
                "unsupported key length {n} (expected 16 or 32 bytes)"
            ))),
        }
    }

    /// Decryptor for a named object of an asset.
    pub fn for_object(info: &DecryptionInfo, object: &str) -> Result<Self> {
        Self::new(&info.key, info.iv_for(object)?)
    }

    /// Decrypt `buf` in place, continuing where the previous call stopped.
    pub fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.apply_keystream(buf),
            Self::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

impl std::fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aes128(_) => f.write_str("Decryptor(AES-128-CTR)"),
            Self::Aes256(_) => f.write_str("Decryptor(AES-256-CTR)"),
        }
    }
}
