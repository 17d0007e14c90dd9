//! Authenticated sealing of hop authenticators with AES-256-GCM.

use crate::types::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use alloc::vec::Vec;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

pub fn seal(plain: &[u8], key: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_SIZE || nonce.len() != NONCE_SIZE {
        return Err(Error::Crypto);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plain)
        .map_err(|_| Error::Crypto)
}

pub fn open(sealed: &[u8], key: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_SIZE || nonce.len() != NONCE_SIZE {
        return Err(Error::Crypto);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| Error::Crypto)
}

/// Packet-bound nonce: `ts || pld_hash || dvf`, 12 bytes.
pub fn nonce(ts: u32, pld_hash: &[u8; 4], dvf: &[u8; 4]) -> [u8; NONCE_SIZE] {
    let mut out = [0u8; NONCE_SIZE];
    out[..4].copy_from_slice(&ts.to_be_bytes());
    out[4..8].copy_from_slice(pld_hash);
    out[8..12].copy_from_slice(dvf);
    out
}
