use sha2::{Digest, Sha256};

/// 32-bit packet tag: SHA-256 of `b`, XOR-folding the eight 32-bit
/// lanes. Deliberately short and cheap for per-packet use.
pub fn calc32(b: &[u8]) -> [u8; 4] {
    let sum = calc256(b);
    let mut out = [0u8; 4];
    for lane in sum.chunks_exact(4) {
        out[0] ^= lane[0];
        out[1] ^= lane[1];
        out[2] ^= lane[2];
        out[3] ^= lane[3];
    }
    out
}

pub fn calc256(b: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b);
    hasher.finalize().into()
}
