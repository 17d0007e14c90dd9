//! DRKey-style hierarchical key derivation. The first level binds an
//! ordered AS pair, the second a protocol tag and optional end-host
//! addresses. Both levels are plain SHA-256 over the concatenated
//! inputs, so either side holding the L1 key derives identical L2 keys
//! on the fly.

use crate::crypto::hash::calc256;
use crate::crypto::mac::MacKey;
use crate::types::{AsId, HostAddr};
use alloc::format;
use alloc::vec::Vec;

pub const PROTO_COLIBRI: &str = "COLIBRI";

/// L1 key between `as1` and `as2`: SHA-256 over the textual AS ids.
/// Asymmetric in the pair; `as1` is the side that derives on the fly.
pub fn derive_l1(as1: AsId, as2: AsId) -> [u8; 32] {
    let text = format!("{}{}", as1, as2);
    calc256(text.as_bytes())
}

/// L2 key: SHA-256 over `l1 || proto || h1? || h2?`, strictly in that
/// order. Absent host addresses contribute nothing.
pub fn derive_l2(
    l1: &[u8; 32],
    h1: Option<&HostAddr>,
    h2: Option<&HostAddr>,
    proto: &str,
) -> [u8; 32] {
    let mut input = Vec::with_capacity(32 + proto.len() + 16 + 16);
    input.extend_from_slice(l1);
    input.extend_from_slice(proto.as_bytes());
    if let Some(h) = h1 {
        input.extend_from_slice(h.as_bytes());
    }
    if let Some(h) = h2 {
        input.extend_from_slice(h.as_bytes());
    }
    calc256(&input)
}

/// Symmetric MAC key between two ASes for the given protocol.
pub fn as_to_as_hash_key(proto: &str, as1: AsId, as2: AsId) -> MacKey {
    let l1 = derive_l1(as1, as2);
    MacKey(derive_l2(&l1, None, None, proto))
}

/// Symmetric MAC key between two end hosts for the given protocol.
pub fn end_to_end_hash_key(
    proto: &str,
    as1: AsId,
    as2: AsId,
    h1: &HostAddr,
    h2: &HostAddr,
) -> MacKey {
    let l1 = derive_l1(as1, as2);
    MacKey(derive_l2(&l1, Some(h1), Some(h2), proto))
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: AsId = AsId(0x0001_ff00_0000_0110);
    const B: AsId = AsId(0x0001_ff00_0000_0111);

    #[test]
    fn l1_is_asymmetric_in_the_pair() {
        assert_ne!(derive_l1(A, B), derive_l1(B, A));
    }

    #[test]
    fn l2_depends_on_hosts_and_order() {
        let l1 = derive_l1(A, B);
        let h1 = HostAddr::V4([10, 0, 0, 1]);
        let h2 = HostAddr::V4([10, 0, 0, 2]);
        let none = derive_l2(&l1, None, None, PROTO_COLIBRI);
        let one = derive_l2(&l1, Some(&h1), None, PROTO_COLIBRI);
        let both = derive_l2(&l1, Some(&h1), Some(&h2), PROTO_COLIBRI);
        let swapped = derive_l2(&l1, Some(&h2), Some(&h1), PROTO_COLIBRI);
        assert_ne!(none, one);
        assert_ne!(one, both);
        assert_ne!(both, swapped);
    }

    #[test]
    fn hash_keys_are_shared() {
        // Both ends derive the same handle from the same identities.
        let k1 = as_to_as_hash_key(PROTO_COLIBRI, A, B);
        let k2 = as_to_as_hash_key(PROTO_COLIBRI, A, B);
        assert_eq!(k1.mac(b"x"), k2.mac(b"x"));
    }
}
