//! End-to-end admission walks: steady setup with confirmation, steady
//! renewal, ephemeral setup over a stitched steady chain, rejection
//! bookkeeping, and the cleanup of a failed setup.

mod support;

use colibri::admission::FixedCapacity;
use colibri::notify::NotifyRegistry;
use colibri::packet::sof::SofToken;
use colibri::reqs::steady::run_setup_with_confirm;
use colibri::reqs::{run, EphemCleanSetup, EphemRenew, EphemSetup, ReqCtx, SteadyRenew, SteadySetup};
use colibri::store::ResvStore;
use colibri::time::FixedTimeProvider;
use colibri::transport::{ChannelTransport, PacketMeta, SibraPkt, Transport};
use colibri::types::*;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use support::*;

fn req_ctx(registry: &Arc<NotifyRegistry>, store: &Arc<ResvStore>) -> (ReqCtx, Receiver<SibraPkt>) {
    let (transport, rx) = ChannelTransport::new();
    let ctx = ReqCtx {
        registry: registry.clone(),
        transport: Arc::new(transport) as Arc<dyn Transport>,
        store: store.clone(),
        algo: Arc::new(Mutex::new(Box::new(FixedCapacity::new(
            BwCls(255),
            BwCls(255),
        )))),
        time: Arc::new(FixedTimeProvider(now_nanos())),
        local_as: as_id(0),
        local_host: host(0),
    };
    (ctx, rx)
}

fn meta_to(last: usize) -> PacketMeta {
    PacketMeta {
        src_as: as_id(0),
        src_host: host(0),
        dst_as: as_id(last),
        dst_host: host(last),
    }
}

/// Serves `rounds` request walks arriving on `rx` over the handler
/// chain and dispatches each reply to the waiting requester.
fn serve(
    registry: Arc<NotifyRegistry>,
    handlers: Vec<colibri::handlers::HandlerCtx>,
    rx: Receiver<SibraPkt>,
    rounds: usize,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for _ in 0..rounds {
            let pkt = rx.recv_timeout(Duration::from_secs(2)).expect("request");
            let reply = drive(&handlers, pkt).expect("walk");
            registry.dispatch(reply).expect("dispatch");
        }
    })
}

#[test]
fn steady_two_hop_setup_confirms_active() {
    let registry = Arc::new(NotifyRegistry::new());
    let store = Arc::new(ResvStore::new());
    let (ctx, rx) = req_ctx(&registry, &store);
    // far hop only grants class 5
    let (handlers, _) = build_handlers(&[(7, 7), (5, 7)]);
    let server = serve(registry.clone(), handlers, rx, 2);

    let id = ResvId::Steady([0x51; 10]);
    let mut setup = SteadySetup {
        ctx: ctx.clone(),
        meta: meta_to(1),
        id,
        idx: Index(0),
        path_type: PathType::Up,
        num_hops: 2,
        min_bw: BwCls(1),
        max_bw: BwCls(7),
        props: EndProps::default(),
        split: SplitCls::default(),
        rlc: Rlc(5),
        entry: None,
        last_max_bw: None,
    };
    let accepted = run_setup_with_confirm(&ctx, &mut setup).expect("setup walk");
    server.join().expect("server");
    assert!(accepted);

    let entry = store.get(&id, Index(0)).expect("stored entry");
    let entry = entry.read().expect("entry");
    assert_eq!(entry.state, State::Active);
    // the end hop shrank the grant to its offer
    assert_eq!(entry.block.info.bw_cls, BwCls(5));
    assert_eq!(entry.block.num_hops(), 2);
    for (i, sof) in entry.block.sofs.iter().enumerate() {
        match &sof.token {
            SofToken::Reservation { hop_as, ha } => {
                assert_eq!(*hop_as, as_id(i));
                // the opened authenticator matches the hop's own
                let scope_ids = [id];
                let mut sv_key = colibri::crypto::mac::MacKey(sv(i).0);
                let expect = sof.calc_ha(&mut sv_key, &entry.block.info, &scope_ids, &[2]);
                assert_eq!(*ha, expect);
            }
            other => panic!("not in reservation form: {:?}", other),
        }
    }
}

#[test]
fn steady_down_setup_walks_from_the_far_end() {
    let registry = Arc::new(NotifyRegistry::new());
    let store = Arc::new(ResvStore::new());
    let (ctx, rx) = req_ctx(&registry, &store);
    let (handlers, _) = build_handlers(&[(7, 7), (7, 7)]);
    let server = serve(registry.clone(), handlers, rx, 2);

    // reversed path type: the walk starts at the last SOF and the end
    // AS sees index 0
    let id = ResvId::Steady([0x54; 10]);
    let mut setup = SteadySetup {
        ctx: ctx.clone(),
        meta: meta_to(1),
        id,
        idx: Index(0),
        path_type: PathType::Down,
        num_hops: 2,
        min_bw: BwCls(1),
        max_bw: BwCls(7),
        props: EndProps::default(),
        split: SplitCls::default(),
        rlc: Rlc(5),
        entry: None,
        last_max_bw: None,
    };
    let accepted = run_setup_with_confirm(&ctx, &mut setup).expect("setup walk");
    server.join().expect("server");
    assert!(accepted);

    let entry = store.get(&id, Index(0)).expect("stored entry");
    let entry = entry.read().expect("entry");
    assert_eq!(entry.state, State::Active);
    assert_eq!(entry.block.info.path_type, PathType::Down);
    assert_eq!(entry.block.info.bw_cls, BwCls(7));
    assert_eq!(entry.block.num_hops(), 2);
}

#[test]
fn steady_setup_rejection_records_path_offer() {
    let registry = Arc::new(NotifyRegistry::new());
    let store = Arc::new(ResvStore::new());
    let (ctx, rx) = req_ctx(&registry, &store);
    // the far hop can only grant class 5, below the requested minimum
    let (handlers, _) = build_handlers(&[(7, 7), (5, 7)]);
    let server = serve(registry.clone(), handlers, rx, 1);

    let id = ResvId::Steady([0x55; 10]);
    let mut setup = SteadySetup {
        ctx: ctx.clone(),
        meta: meta_to(1),
        id,
        idx: Index(0),
        path_type: PathType::Up,
        num_hops: 2,
        min_bw: BwCls(6),
        max_bw: BwCls(7),
        props: EndProps::default(),
        split: SplitCls::default(),
        rlc: Rlc(5),
        entry: None,
        last_max_bw: None,
    };
    let accepted = run(&ctx, setup.timeout(), &mut setup).expect("setup walk");
    server.join().expect("server");
    assert!(!accepted);
    // the rejecting hop's ceiling rode back in the offer fields
    assert_eq!(setup.last_max_bw, Some(BwCls(5)));
    assert!(store.get(&id, Index(0)).is_none());
}

#[test]
fn steady_renewal_requires_active_entry() {
    let registry = Arc::new(NotifyRegistry::new());
    let store = Arc::new(ResvStore::new());
    let (ctx, rx) = req_ctx(&registry, &store);
    let (handlers, _) = build_handlers(&[(7, 7), (7, 7)]);
    let server = serve(registry.clone(), handlers, rx, 4);

    let id = ResvId::Steady([0x52; 10]);
    let mut setup = SteadySetup {
        ctx: ctx.clone(),
        meta: meta_to(1),
        id,
        idx: Index(0),
        path_type: PathType::Up,
        num_hops: 2,
        min_bw: BwCls(1),
        max_bw: BwCls(7),
        props: EndProps::default(),
        split: SplitCls::default(),
        rlc: Rlc(5),
        entry: None,
        last_max_bw: None,
    };
    // renewal before the reservation is active fails locally
    let mut early = SteadyRenew::new(ctx.clone(), meta_to(1), id, Index(0), BwCls(1), BwCls(7));
    assert_eq!(
        run(&ctx, early.timeout(), &mut early).unwrap_err(),
        Error::InvalidState
    );

    assert!(run_setup_with_confirm(&ctx, &mut setup).expect("setup walk"));
    let mut renew = SteadyRenew::new(ctx.clone(), meta_to(1), id, Index(0), BwCls(1), BwCls(7));
    assert!(run(&ctx, renew.timeout(), &mut renew).expect("renewal walk"));
    let mut confirm =
        colibri::reqs::ConfirmIndex::after(&ctx, meta_to(1), renew.entry.as_ref().expect("entry"));
    assert!(run(&ctx, confirm.timeout(), &mut confirm).expect("confirm walk"));
    server.join().expect("server");

    let renewed = store.get(&id, Index(1)).expect("renewed entry");
    assert_eq!(renewed.read().expect("entry").state, State::Active);
}

#[test]
fn ephem_setup_over_stitched_steadies_succeeds() {
    let registry = Arc::new(NotifyRegistry::new());
    let store = Arc::new(ResvStore::new());
    let (ctx, rx) = req_ctx(&registry, &store);
    let (handlers, _) = build_handlers(&[(7, 9), (7, 9), (7, 9), (7, 9)]);
    let server = serve(registry.clone(), handlers, rx, 2);

    let steady = stored_steady(&[3, 2], &[PathType::Up, PathType::Core]);
    let mut rng = SmallRng::seed_from_u64(0xc011_b521);
    let id = ResvId::new_ephem(as_id(0), &mut rng);
    let mut setup = EphemSetup::new(ctx.clone(), meta_to(3), id, BwCls(7), steady);
    assert!(run(&ctx, setup.timeout(), &mut setup).expect("ephem setup"));

    let ephem = setup.result.as_ref().expect("usable extension");
    assert_eq!(ephem.total_hops, 4);
    assert_eq!(ephem.ids.len(), 1 + ephem.total_steady as usize);
    assert_eq!(ephem.ids[0], id);
    // every opaque field opened into reservation form, bound to its AS
    for (i, sof) in ephem.active_blocks[0].sofs.iter().enumerate() {
        match &sof.token {
            SofToken::Reservation { hop_as, .. } => assert_eq!(*hop_as, as_id(i)),
            other => panic!("not in reservation form: {:?}", other),
        }
    }
    // the transfer AS egresses into the second steady block
    assert_eq!(ephem.active_blocks[0].sofs[2].egress, IfId(105));
    assert_eq!(ephem.active_blocks[0].sofs[1].egress, ifids_for(1).egress);
    let entry = store.get(&id, Index(0)).expect("stored entry");
    assert_eq!(entry.read().expect("entry").state, State::Active);

    // a renewal over the fresh extension bumps the index
    let ephem = setup.result.clone().expect("extension");
    let mut renew = EphemRenew::new(
        ctx.clone(),
        meta_to(3),
        BwCls(7),
        ephem,
        Tick(NOW_TICK + MAX_STEADY_TICKS),
    );
    assert!(run(&ctx, renew.timeout(), &mut renew).expect("ephem renewal"));
    assert!(store.get(&id, Index(1)).is_some());
    server.join().expect("server");
}

#[test]
fn ephem_setup_rejection_records_fail_code_and_cleanup_refunds() {
    let registry = Arc::new(NotifyRegistry::new());
    let store = Arc::new(ResvStore::new());
    let (ctx, rx) = req_ctx(&registry, &store);
    // the third AS only offers class 3
    let (handlers, counters) = build_handlers(&[(7, 9), (7, 9), (7, 3), (7, 9)]);
    let server = serve(registry.clone(), handlers, rx, 2);

    let steady = stored_steady(&[3, 2], &[PathType::Up, PathType::Core]);
    let mut rng = SmallRng::seed_from_u64(0xdead_10cc);
    let id = ResvId::new_ephem(as_id(0), &mut rng);
    let mut setup = EphemSetup::new(ctx.clone(), meta_to(3), id, BwCls(7), steady.clone());
    let accepted = run(&ctx, setup.timeout(), &mut setup).expect("ephem setup walk");
    assert!(!accepted);
    assert_eq!(setup.ephem_meta.last_fail_code, FailCode::AdmissionFailed);
    assert_eq!(setup.ephem_meta.last_max_bw, BwCls(3));
    assert!(store.get(&id, Index(0)).is_none());

    // stitched cleanup refunds every tentative grant along the path
    let mut clean = EphemCleanSetup {
        ctx: ctx.clone(),
        meta: meta_to(3),
        id,
        idx: Index(0),
        failed_info: setup.sent_info().expect("sent info"),
        steady,
    };
    assert!(run(&ctx, clean.timeout(), &mut clean).expect("cleanup walk"));
    server.join().expect("server");
    for counter in counters {
        assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 0);
    }
}
