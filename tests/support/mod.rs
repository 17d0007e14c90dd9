//! Shared scaffolding for the walk tests: a chain of AS handler
//! contexts, a driver that moves packets between them the way the
//! border routers would, and builders for stored reservation state.
#![allow(dead_code)]

use colibri::admission::{FixedCapacity, IfTuple};
use colibri::create::new_steady_use;
use colibri::handlers::{handle, HandlerCtx, Verdict};
use colibri::packet::info::Info;
use colibri::packet::sof::{SofField, SofToken};
use colibri::packet::{Block, Steady};
use colibri::time::FixedTimeProvider;
use colibri::transport::SibraPkt;
use colibri::types::*;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;

pub const NOW_TICK: u32 = 1_000_000;

pub fn now_nanos() -> u64 {
    NOW_TICK as u64 * TICK_NANOS
}

pub fn as_id(i: usize) -> AsId {
    AsId(0x0001_ff00_0000_0100 + i as u64)
}

pub fn host(i: usize) -> HostAddr {
    HostAddr::V4([10, 0, 0, i as u8 + 1])
}

pub fn sv(i: usize) -> Sv {
    Sv([i as u8 + 1; 32])
}

/// One AS per entry, with the given steady and ephemeral capacity
/// classes. Returns the handler chain plus each AS's tentative-grant
/// counter.
pub fn build_handlers(caps: &[(u8, u8)]) -> (Vec<HandlerCtx>, Vec<Arc<AtomicI64>>) {
    let time = Arc::new(FixedTimeProvider(now_nanos()));
    let mut handlers = Vec::new();
    let mut counters = Vec::new();
    for (i, (steady_cap, ephem_cap)) in caps.iter().enumerate() {
        let algo = FixedCapacity::new(BwCls(*steady_cap), BwCls(*ephem_cap));
        counters.push(algo.tentative.clone());
        handlers.push(HandlerCtx::new(
            as_id(i),
            host(i),
            &sv(i),
            Box::new(algo),
            time.clone(),
        ));
    }
    (handlers, counters)
}

pub fn ifids_for(hop: usize) -> IfTuple {
    IfTuple {
        ingress: IfId(hop as u16 * 2),
        egress: IfId(hop as u16 * 2 + 1),
    }
}

/// Walks a control packet across the handler chain, advancing the SOF
/// index between ASes like the border routers do (twice at a steady
/// transfer, where two opaque fields belong to the same AS). Returns
/// the packet delivered back to the walk's origin.
pub fn drive(handlers: &[HandlerCtx], mut pkt: SibraPkt) -> colibri::Result<SibraPkt> {
    loop {
        let hop = pkt.extn.base().curr_hop as usize;
        match handle(&handlers[hop], pkt, ifids_for(hop))? {
            Verdict::Forward(mut p) => {
                if p.pld.response && p.extn.base().last_hop() {
                    return Ok(p);
                }
                advance(&mut p)?;
                pkt = p;
            }
            Verdict::Reverse(mut p) => {
                advance(&mut p)?;
                pkt = p;
            }
            Verdict::Deliver(p) => return Ok(p),
        }
    }
}

fn advance(pkt: &mut SibraPkt) -> colibri::Result<()> {
    let before = pkt.extn.base().curr_hop;
    pkt.extn.base_mut().next_sof_index()?;
    if pkt.extn.base().curr_hop == before {
        pkt.extn.base_mut().next_sof_index()?;
    }
    Ok(())
}

/// A stored stitched steady reservation (Reservation form) covering
/// `lens` hops per block, owned by the source AS.
pub fn stored_steady(lens: &[usize], path_types: &[PathType]) -> Steady {
    let mut blocks = Vec::new();
    let mut ids = Vec::new();
    let mut as_base = 0usize;
    for (b, (&len, &pt)) in lens.iter().zip(path_types).enumerate() {
        let info = Info {
            exp_tick: Tick(NOW_TICK + MAX_STEADY_TICKS),
            bw_cls: BwCls(7),
            rlc: Rlc(5),
            index: Index(0),
            path_type: pt,
            fail_hop: 0,
        };
        let sofs = (0..len)
            .map(|h| {
                let hop = as_base + h;
                // underlay interfaces of the steady pipes, distinct
                // from the per-walk interfaces the driver hands out
                SofField {
                    ingress: IfId(100 + hop as u16 * 2),
                    egress: IfId(101 + hop as u16 * 2),
                    token: SofToken::Reservation {
                        hop_as: as_id(hop),
                        ha: [0x42; 16],
                    },
                }
            })
            .collect();
        blocks.push(Block { info, sofs });
        ids.push(ResvId::Steady([b as u8 + 0xa0; 10]));
        as_base += len - 1;
    }
    new_steady_use(&ids, blocks, true).expect("stored steady")
}
