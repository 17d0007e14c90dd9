//! Border-router hooks over real token state: a steady data packet
//! crossing a transfer hop, expiry and tamper rejection, flow limiting,
//! and interface validation.

mod support;

use colibri::admission::{FlowInfo, FlowMonitor, NoLimit};
use colibri::create::{new_ephem_use, new_steady_use};
use colibri::crypto::kdf::{self, PROTO_COLIBRI};
use colibri::crypto::mac::MacKey;
use colibri::crypto::seal;
use colibri::packet::info::Info;
use colibri::packet::sof::SofToken;
use colibri::packet::{Block, Extension, Steady};
use colibri::router::{Direction, EgressSock, HookResult, RouterCtx, RouterPkt, Topology};
use colibri::time::FixedTimeProvider;
use colibri::transport::PacketMeta;
use colibri::types::*;
use std::sync::Arc;
use support::*;

/// Per-AS router with the interfaces of its hop installed.
fn router_for(hop: usize, time_nanos: u64) -> RouterCtx {
    let mut topo = Topology::new(as_id(hop));
    topo.add_interface(IfId(100 + hop as u16 * 2), as_id(hop.saturating_sub(1)), "prev");
    topo.add_interface(IfId(101 + hop as u16 * 2), as_id(hop + 1), "next");
    RouterCtx::new(
        topo,
        &sv(hop),
        Box::new(NoLimit),
        Arc::new(FixedTimeProvider(time_nanos)),
    )
}

/// Stitched steady blocks in Reservation form with authenticators each
/// hop can re-derive from its own secret value.
fn issued_steady(lens: &[usize], path_types: &[PathType]) -> Steady {
    let mut steady = stored_steady(lens, path_types);
    let ids = steady.ids.clone();
    let path_lens = steady.path_lens;
    for (b, block) in steady.active_blocks.iter_mut().enumerate() {
        let scope_ids = [ids[b]];
        let scope_lens = [path_lens[b]];
        let info = block.info;
        for sof in block.sofs.iter_mut() {
            let hop_as = match sof.token {
                SofToken::Reservation { hop_as, .. } => hop_as,
                _ => unreachable!(),
            };
            let hop = (hop_as.0 - as_id(0).0) as usize;
            let mut sv_key = MacKey(sv(hop).0);
            let ha = sof.calc_ha(&mut sv_key, &info, &scope_ids, &scope_lens);
            sof.token = SofToken::Reservation { hop_as, ha };
        }
    }
    steady
}

fn meta() -> PacketMeta {
    PacketMeta {
        src_as: as_id(0),
        src_host: host(0),
        dst_as: as_id(3),
        dst_host: host(3),
    }
}

fn steady_data_pkt() -> RouterPkt {
    let mut steady = issued_steady(&[3, 2], &[PathType::Up, PathType::Core]);
    steady
        .write_source(None, b"best effort payload", now_nanos())
        .expect("write source");
    RouterPkt {
        meta: meta(),
        extn: Extension::Steady(steady),
        payload_len: 19,
    }
}

#[test]
fn steady_data_crosses_transfer_hop() {
    let mut pkt = steady_data_pkt();
    // source AS egresses through its own opaque field
    let r0 = router_for(0, now_nanos());
    match r0.process(&mut pkt, Direction::Local).expect("local") {
        HookResult::Finish(egress) => {
            assert_eq!(egress[0].sock, EgressSock::External(IfId(101)));
        }
        other => panic!("unexpected: {:?}", other),
    }
    // transit AS verifies and forwards
    let r1 = router_for(1, now_nanos());
    match r1.process(&mut pkt, Direction::External).expect("transit") {
        HookResult::Finish(egress) => {
            assert_eq!(egress[0].sock, EgressSock::External(IfId(103)));
        }
        other => panic!("unexpected: {:?}", other),
    }
    // transfer AS advances into the second block and egresses through
    // the new block's first opaque field
    let r2 = router_for(2, now_nanos());
    match r2.process(&mut pkt, Direction::External).expect("transfer") {
        HookResult::Finish(egress) => {
            assert_eq!(egress[0].sock, EgressSock::External(IfId(105)));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(pkt.extn.base().curr_steady, 1);
    // end AS delivers locally
    let r3 = router_for(3, now_nanos());
    match r3.process(&mut pkt, Direction::External).expect("deliver") {
        HookResult::Finish(egress) => assert_eq!(egress[0].sock, EgressSock::Local),
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn expired_reservation_drops() {
    let mut pkt = steady_data_pkt();
    pkt.extn.base_mut().next_sof_index().expect("advance");
    // the whole reservation lifetime has passed
    let late = now_nanos() + (MAX_STEADY_TICKS as u64 + 1) * TICK_NANOS;
    let r1 = router_for(1, late);
    assert_eq!(
        r1.process(&mut pkt, Direction::External).unwrap_err(),
        Error::Expired
    );
    assert_eq!(r1.metrics.drops.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[test]
fn stale_timestamp_drops() {
    let mut pkt = steady_data_pkt();
    pkt.extn.base_mut().next_sof_index().expect("advance");
    // fresh enough for the per-hop data budget, but not much longer
    let r1 = router_for(1, now_nanos() + 2 * MAX_DATA_HOP_NANOS + 1_000_000);
    assert_eq!(
        r1.process(&mut pkt, Direction::External).unwrap_err(),
        Error::StaleTimestamp
    );
}

#[test]
fn tampered_packet_binding_drops() {
    let mut pkt = steady_data_pkt();
    pkt.extn.base_mut().next_sof_index().expect("advance");
    pkt.extn.base_mut().pld_hash[0] ^= 0x01;
    let r1 = router_for(1, now_nanos());
    assert_eq!(
        r1.process(&mut pkt, Direction::External).unwrap_err(),
        Error::BadHvf
    );
}

#[test]
fn unknown_egress_interface_drops() {
    let mut pkt = steady_data_pkt();
    pkt.extn.base_mut().next_sof_index().expect("advance");
    // a router whose topology lacks the reservation's egress interface
    let mut topo = Topology::new(as_id(1));
    topo.add_interface(IfId(9), as_id(2), "elsewhere");
    let r1 = RouterCtx::new(
        topo,
        &sv(1),
        Box::new(NoLimit),
        Arc::new(FixedTimeProvider(now_nanos())),
    );
    assert_eq!(
        r1.process(&mut pkt, Direction::External).unwrap_err(),
        Error::InvalidInterface
    );
}

struct AlwaysExceeded;

impl FlowMonitor for AlwaysExceeded {
    fn check_flow(&mut self, _info: &FlowInfo, _local: bool) -> bool {
        true
    }
}

fn ephem_data_pkt() -> RouterPkt {
    let ids = vec![
        ResvId::Ephemeral([0xed; 16]),
        ResvId::Steady([0xa0; 10]),
        ResvId::Steady([0xa1; 10]),
    ];
    let path_lens = [3u8, 2, 0];
    let info = Info {
        exp_tick: Tick(NOW_TICK + MAX_EPHEM_TICKS),
        bw_cls: BwCls(5),
        rlc: Rlc(3),
        index: Index(0),
        path_type: PathType::Ephemeral,
        fail_hop: 0,
    };
    let nonce = seal::nonce(77, &[1, 2, 3, 4], &[0; 4]);
    let mut block = Block::new_control(info, 4);
    for hop in 0..4usize {
        block.sofs[hop].ingress = IfId(100 + hop as u16 * 2);
        block.sofs[hop].egress = IfId(101 + hop as u16 * 2);
        let l1 = kdf::derive_l1(as_id(hop), as_id(0));
        let key = kdf::derive_l2(&l1, Some(&host(0)), None, PROTO_COLIBRI);
        let mut sv_key = MacKey(sv(hop).0);
        block
            .set_ha(&mut sv_key, &key, &nonce, as_id(hop), hop, &ids, &path_lens)
            .expect("issue");
    }
    let mut ephem = new_ephem_use(ids, path_lens, block, true, as_id(0), &host(0), &nonce)
        .expect("promote");
    ephem.best_effort = false;
    let e2e = kdf::end_to_end_hash_key(PROTO_COLIBRI, as_id(0), as_id(3), &host(0), &host(3));
    ephem
        .write_source(Some(&e2e), b"reserved data", now_nanos())
        .expect("write source");
    RouterPkt {
        meta: meta(),
        extn: Extension::Ephemeral(ephem),
        payload_len: 13,
    }
}

#[test]
fn reserved_traffic_is_accounted_and_limited() {
    let mut pkt = ephem_data_pkt();
    let size = pkt.extn.len() + 13;
    let r0 = router_for(0, now_nanos());
    match r0.process(&mut pkt, Direction::Local).expect("local") {
        HookResult::Finish(egress) => {
            assert_eq!(egress[0].sock, EgressSock::External(IfId(101)));
        }
        other => panic!("unexpected: {:?}", other),
    }
    // ingress bytes attributed to the reservation's bandwidth class
    assert_eq!(r0.metrics.traffic(Direction::Local, 5), size as u64);

    let r1 = router_for(1, now_nanos());
    match r1.process(&mut pkt, Direction::External).expect("transit") {
        HookResult::Finish(_) => {}
        other => panic!("unexpected: {:?}", other),
    }

    // an exceeded per-flow limit drops the packet
    let mut limited = ephem_data_pkt();
    let mut topo = Topology::new(as_id(0));
    topo.add_interface(IfId(100), as_id(9), "prev");
    topo.add_interface(IfId(101), as_id(1), "next");
    let r = RouterCtx::new(
        topo,
        &sv(0),
        Box::new(AlwaysExceeded),
        Arc::new(FixedTimeProvider(now_nanos())),
    );
    assert_eq!(
        r.process(&mut limited, Direction::Local).unwrap_err(),
        Error::FlowLimitExceeded
    );
}

#[test]
fn setup_requests_without_blocks_take_the_path_route() {
    let setup = colibri::create::new_steady_setup(ResvId::Steady([1u8; 10]), 3, false)
        .expect("setup extension");
    let mut pkt = RouterPkt {
        meta: meta(),
        extn: Extension::Steady(setup),
        payload_len: 0,
    };
    let r0 = router_for(0, now_nanos());
    match r0.process(&mut pkt, Direction::Local).expect("route") {
        HookResult::Continue => {}
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn stitched_blocks_must_be_compatible() {
    // Up after Down never assembles
    let good = stored_steady(&[2, 2], &[PathType::Up, PathType::Down]);
    let ids = good.ids.clone();
    let mut blocks = good.active_blocks.clone();
    blocks.swap(0, 1);
    assert_eq!(
        new_steady_use(&ids, blocks, true).unwrap_err(),
        Error::IncompatiblePathTypes
    );
}
