//! Constructors for reservation extensions: fresh setup carriers,
//! use-phase extensions over stored blocks, and the promotion of an
//! accepted ephemeral block into a usable extension.

use crate::packet::base::{Base, SOF_VERSION};
use crate::packet::block::Block;
use crate::packet::{Ephemeral, Steady};
use crate::types::{AsId, Error, HostAddr, ResvId, Result, MAX_STEADY_BLOCKS};
use alloc::vec::Vec;

/// Extension for a steady setup request: no blocks yet, rides a plain
/// forwarding path. Reversed path types walk from the far end, so the
/// index starts at the last hop.
pub fn new_steady_setup(id: ResvId, num_hops: u8, reversed: bool) -> Result<Steady> {
    if !id.is_steady() {
        return Err(Error::InvalidId);
    }
    if num_hops == 0 {
        return Err(Error::InvalidExtnLength);
    }
    let mut base = Base {
        steady: true,
        is_request: true,
        best_effort: false,
        accepted: false,
        forward: !reversed,
        setup: true,
        version: SOF_VERSION,
        curr_hop: 0,
        total_hops: num_hops,
        curr_steady: 0,
        total_steady: 1,
        sof_index: 0,
        rel_steady_hop: 0,
        path_lens: [num_hops, 0, 0],
        time_stamp: 0,
        pld_hash: [0; 4],
        dvf: [0; 4],
        ids: alloc::vec![id],
        active_blocks: Vec::new(),
    };
    if reversed {
        base.sof_index = num_hops - 1;
        base.curr_hop = num_hops - 1;
    }
    base.update_indices()?;
    Ok(Steady { base })
}

/// Use-phase steady extension over one to three stored blocks. Blocks
/// arrive in Reservation form and are bound to a packet by the source
/// write sequence before they hit the wire.
pub fn new_steady_use(ids: &[ResvId], blocks: Vec<Block>, forward: bool) -> Result<Steady> {
    if blocks.is_empty() || blocks.len() > MAX_STEADY_BLOCKS || ids.len() != blocks.len() {
        return Err(Error::InvalidExtnLength);
    }
    if ids.iter().any(|id| !id.is_steady()) {
        return Err(Error::InvalidId);
    }
    let mut path_lens = [0u8; 3];
    for (i, block) in blocks.iter().enumerate() {
        path_lens[i] = block.num_hops() as u8;
    }
    let total_sofs: usize = blocks.iter().map(|b| b.num_hops()).sum();
    let total_hops = (total_sofs - (blocks.len() - 1)) as u8;
    let mut base = Base {
        steady: true,
        is_request: false,
        best_effort: true,
        accepted: false,
        forward,
        setup: false,
        version: SOF_VERSION,
        curr_hop: 0,
        total_hops,
        curr_steady: 0,
        total_steady: blocks.len() as u8,
        sof_index: 0,
        rel_steady_hop: 0,
        path_lens,
        time_stamp: 0,
        pld_hash: [0; 4],
        dvf: [0; 4],
        ids: ids.to_vec(),
        active_blocks: blocks,
    };
    if !forward {
        base.sof_index = total_sofs as u8 - 1;
        base.curr_hop = total_hops - 1;
    }
    base.update_indices()?;
    let steady = Steady { base };
    steady.validate_path()?;
    Ok(steady)
}

/// Promotes an accepted ephemeral block into a use-phase extension:
/// opens every sealed authenticator with the nonce of the request that
/// carried it, then assembles the stitched id list.
pub fn new_ephem_use(
    ids: Vec<ResvId>,
    path_lens: [u8; 3],
    mut block: Block,
    forward: bool,
    source_as: AsId,
    source_host: &HostAddr,
    nonce: &[u8; 12],
) -> Result<Ephemeral> {
    if ids.is_empty() || ids[0].is_steady() {
        return Err(Error::InvalidId);
    }
    let total_steady = ids.len() - 1;
    if total_steady == 0 || total_steady > MAX_STEADY_BLOCKS {
        return Err(Error::InvalidExtnLength);
    }
    block.to_reservation(source_as, Some(source_host), nonce)?;
    let total_hops = block.num_hops() as u8;
    let mut base = Base {
        steady: false,
        is_request: false,
        best_effort: true,
        accepted: false,
        forward,
        setup: false,
        version: SOF_VERSION,
        curr_hop: 0,
        total_hops,
        curr_steady: 0,
        total_steady: total_steady as u8,
        sof_index: 0,
        rel_steady_hop: 0,
        path_lens,
        time_stamp: 0,
        pld_hash: [0; 4],
        dvf: [0; 4],
        ids,
        active_blocks: alloc::vec![block],
    };
    if !forward {
        base.sof_index = total_hops - 1;
        base.curr_hop = total_hops - 1;
    }
    base.update_indices()?;
    Ok(Ephemeral { base })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::info::Info;
    use crate::packet::sof::SofField;
    use crate::types::{BwCls, IfId, Index, PathType, Rlc, Tick};

    fn resv_block(num_hops: usize, pt: PathType) -> Block {
        Block {
            info: Info {
                exp_tick: Tick(600),
                bw_cls: BwCls(4),
                rlc: Rlc(3),
                index: Index(0),
                path_type: pt,
                fail_hop: 0,
            },
            sofs: (0..num_hops)
                .map(|i| SofField {
                    ingress: IfId(i as u16),
                    egress: IfId(i as u16 + 1),
                    token: crate::packet::sof::SofToken::Reservation {
                        hop_as: AsId(i as u64 + 1),
                        ha: [i as u8; 16],
                    },
                })
                .collect(),
        }
    }

    #[test]
    fn setup_extension_has_no_blocks() {
        let id = ResvId::Steady([1u8; 10]);
        let s = new_steady_setup(id, 3, false).expect("setup");
        assert!(s.setup && s.is_request && !s.best_effort);
        assert!(s.active_blocks.is_empty());
        assert_eq!(s.path_lens, [3, 0, 0]);
    }

    #[test]
    fn reversed_setup_starts_at_the_far_end() {
        let id = ResvId::Steady([1u8; 10]);
        let mut s = new_steady_setup(id, 3, true).expect("setup");
        assert!(!s.forward);
        assert_eq!(s.sof_index, 2);
        assert_eq!(s.curr_hop, 2);
        // the reversed walk steps toward index 0
        s.next_sof_index().expect("step");
        assert_eq!(s.sof_index, 1);
        assert_eq!(s.curr_hop, 1);
    }

    #[test]
    fn stitched_use_counts_shared_transfer_once() {
        let ids = [ResvId::Steady([1u8; 10]), ResvId::Steady([2u8; 10])];
        let blocks = alloc::vec![resv_block(3, PathType::Up), resv_block(2, PathType::Core)];
        let s = new_steady_use(&ids, blocks, true).expect("use");
        assert_eq!(s.total_hops, 4);
        assert_eq!(s.total_steady, 2);
        assert_eq!(s.path_lens, [3, 2, 0]);
    }

    #[test]
    fn incompatible_stitching_rejects() {
        let ids = [ResvId::Steady([1u8; 10]), ResvId::Steady([2u8; 10])];
        let blocks = alloc::vec![resv_block(2, PathType::Down), resv_block(2, PathType::Up)];
        assert_eq!(
            new_steady_use(&ids, blocks, true).unwrap_err(),
            Error::IncompatiblePathTypes
        );
    }
}
