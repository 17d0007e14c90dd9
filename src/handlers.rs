//! Transit-AS handling of the admission walk. Each on-path AS examines
//! the request, invokes the admission algorithm, stamps its opaque
//! field, and either forwards along the walk or, at the end AS,
//! reverses the packet onto the return leg.

use crate::admission::{AdmParams, EphemRes, IfTuple, SibraAlgo};
use crate::crypto::kdf::{self, PROTO_COLIBRI};
use crate::crypto::mac::MacPool;
use crate::packet::{Extension, Steady};
use crate::request::{Data, DataType, Pld};
use crate::time::TimeProvider;
use crate::transport::{PacketMeta, SibraPkt};
use crate::types::{AsId, Error, FailCode, HostAddr, Result, Sv};
use std::boxed::Box;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Client-side accept/reject of an incoming reservation at the end AS.
/// The answer must arrive within the given share of the walk's latency
/// budget or the reservation is treated as denied.
pub trait ClientApproval: Send + Sync {
    fn approve(&self, pkt: &SibraPkt, timeout: std::time::Duration) -> bool;
}

/// Default client that accepts everything.
pub struct AlwaysApprove;

impl ClientApproval for AlwaysApprove {
    fn approve(&self, _pkt: &SibraPkt, _timeout: std::time::Duration) -> bool {
        true
    }
}

/// The latency-class budget of the current block, split over its hops.
pub fn client_timeout(extn: &Extension) -> std::time::Duration {
    let base = extn.base();
    let (rlc, hops) = match base.curr_block() {
        Ok(block) => {
            let hops = if base.steady {
                base.path_lens[base.curr_steady as usize] as u32
            } else {
                base.total_hops as u32
            };
            (block.info.rlc, hops.max(1))
        }
        Err(_) => (crate::types::Rlc(0), 1),
    };
    rlc.duration() / hops
}

/// Per-AS handler environment.
pub struct HandlerCtx {
    pub local_as: AsId,
    pub local_host: HostAddr,
    pub algo: Mutex<Box<dyn SibraAlgo>>,
    pub mac_pool: MacPool,
    pub time: Arc<dyn TimeProvider + Send + Sync>,
    pub client: Box<dyn ClientApproval>,
}

impl HandlerCtx {
    pub fn new(
        local_as: AsId,
        local_host: HostAddr,
        sv: &Sv,
        algo: Box<dyn SibraAlgo>,
        time: Arc<dyn TimeProvider + Send + Sync>,
    ) -> Self {
        HandlerCtx {
            local_as,
            local_host,
            algo: Mutex::new(algo),
            mac_pool: MacPool::new(sv, 4),
            time,
            client: Box::new(AlwaysApprove),
        }
    }
}

/// What the service should do with the handled packet.
#[derive(Debug)]
pub enum Verdict {
    /// Continue the walk toward the destination.
    Forward(SibraPkt),
    /// Walk reversed here; send back toward the source.
    Reverse(SibraPkt),
    /// Deliver to the local client.
    Deliver(SibraPkt),
}

/// The reservation source of the packet: the initiating end, regardless
/// of which leg the packet is on.
fn resv_source(pkt: &SibraPkt) -> (AsId, HostAddr) {
    if pkt.pld.response {
        (pkt.meta.dst_as, pkt.meta.dst_host)
    } else {
        (pkt.meta.src_as, pkt.meta.src_host)
    }
}

/// Seal key for this AS's hop authenticator: the L2 key between this AS
/// and the reservation source, host-bound for ephemeral reservations.
fn seal_key(ctx: &HandlerCtx, source_as: AsId, source_host: Option<&HostAddr>) -> [u8; 32] {
    let l1 = kdf::derive_l1(ctx.local_as, source_as);
    kdf::derive_l2(&l1, source_host, None, PROTO_COLIBRI)
}

/// Dispatches a walk packet by payload type, leg, and role.
pub fn handle(ctx: &HandlerCtx, pkt: SibraPkt, ifids: IfTuple) -> Result<Verdict> {
    match pkt.pld.data_type {
        DataType::SteadySetup | DataType::SteadyRenewal | DataType::SteadyTelescopeSetup => {
            if pkt.pld.response {
                handle_steady_rep(ctx, pkt, ifids)
            } else {
                handle_steady_req(ctx, pkt, ifids)
            }
        }
        DataType::SteadyConfIndex => handle_confirm(ctx, pkt),
        DataType::EphemSetup | DataType::EphemRenewal => {
            if pkt.pld.response {
                handle_ephem_rep(ctx, pkt)
            } else {
                handle_ephem_req(ctx, pkt, ifids)
            }
        }
        DataType::EphemCleanUp => handle_ephem_clean(ctx, pkt),
        DataType::SteadyTearDown | DataType::SteadyCleanUp => Err(Error::NotSupported),
    }
}

/// Runs local admission for a steady request and records the verdict in
/// the payload: the offer under this hop's SOF index, the accumulated
/// bandwidth shrunk to the allocation, and the fail hop on rejection.
pub fn admit_steady_resv(
    algo: &mut dyn SibraAlgo,
    extn: &Steady,
    pld: &mut Pld,
    src: AsId,
    ifids: IfTuple,
) -> Result<()> {
    let req = match &pld.data {
        Data::SteadyReq(r) => r,
        _ => return Err(Error::UnknownRequestType),
    };
    let res = algo.admit_steady(AdmParams {
        ifids,
        extn,
        req,
        src,
        accepted: pld.accepted,
    })?;
    let accepted = pld.accepted;
    let sof_index = extn.sof_index as usize;
    let req = match &mut pld.data {
        Data::SteadyReq(r) => r,
        _ => unreachable!(),
    };
    if accepted && !res.accepted {
        pld.accepted = false;
        req.fail_hop = sof_index as u8;
        debug!(sof_index, "failing steady reservation");
    }
    if res.alloc_bw < req.acc_bw {
        req.acc_bw = res.alloc_bw;
    }
    let offer = req.offers.get_mut(sof_index).ok_or(Error::SofIndexRange)?;
    offer.alloc_bw = res.alloc_bw;
    offer.max_bw = res.max_bw;
    offer.line_len = 1;
    Ok(())
}

fn handle_steady_req(ctx: &HandlerCtx, mut pkt: SibraPkt, ifids: IfTuple) -> Result<Verdict> {
    let steady = match &mut pkt.extn {
        Extension::Steady(s) => s,
        Extension::Ephemeral(_) => return Err(Error::InvalidFlagCombo),
    };
    debug!(id = %steady.curr_id()?, "handling steady request");
    let last = steady.last_hop();
    if last {
        sanity_check_end(steady, &pkt.pld)?;
        steady.validate_timestamp(ctx.time.now_nanos())?;
    }
    {
        let mut algo = ctx.algo.lock().expect("algo poisoned");
        admit_steady_resv(algo.as_mut(), steady, &mut pkt.pld, pkt.meta.src_as, ifids)?;
    }
    if last {
        // the end AS reverses and issues its own field into the reply
        let mut rev = reverse_pkt(ctx, pkt)?;
        if rev.pld.accepted && !telescope_base(&rev.pld) {
            issue_steady_sof(ctx, &mut rev, ifids)?;
        }
        return Ok(Verdict::Reverse(rev));
    }
    Ok(Verdict::Forward(pkt))
}

fn telescope_base(pld: &Pld) -> bool {
    match &pld.data {
        Data::SteadyReq(r) => r.end_props.telescope_base(),
        _ => false,
    }
}

/// The end AS must see the walk sitting at the final SOF of the first
/// block, or at 0 for reversed path types.
fn sanity_check_end(steady: &Steady, pld: &Pld) -> Result<()> {
    let down = match &pld.data {
        Data::SteadyReq(r) => r.info.path_type.reversed(),
        _ => false,
    };
    if !down && steady.sof_index + 1 != steady.path_lens[0] {
        return Err(Error::SofIndexRange);
    }
    if down && steady.sof_index != 0 {
        return Err(Error::SofIndexRange);
    }
    Ok(())
}

/// Response leg of a steady walk: each accepting hop issues its sealed
/// opaque field into the success block as the reply travels back.
fn handle_steady_rep(ctx: &HandlerCtx, mut pkt: SibraPkt, ifids: IfTuple) -> Result<Verdict> {
    if pkt.pld.accepted {
        issue_steady_sof(ctx, &mut pkt, ifids)?;
    }
    Ok(Verdict::Forward(pkt))
}

fn issue_steady_sof(ctx: &HandlerCtx, pkt: &mut SibraPkt, ifids: IfTuple) -> Result<()> {
    let (source_as, _) = resv_source(pkt);
    let steady = match &pkt.extn {
        Extension::Steady(s) => s,
        Extension::Ephemeral(_) => return Err(Error::InvalidFlagCombo),
    };
    let sof_idx = steady.curr_sof_idx();
    let ids = alloc::vec![*steady.curr_id()?];
    let path_lens = alloc::vec![steady.path_lens[steady.curr_steady as usize]];
    let nonce = steady.seal_nonce();
    let key = seal_key(ctx, source_as, None);
    let succ = match &mut pkt.pld.data {
        Data::SteadySucc(s) => s,
        _ => return Err(Error::UnknownRequestType),
    };
    let sof = succ
        .block
        .sofs
        .get_mut(sof_idx)
        .ok_or(Error::SofIndexRange)?;
    sof.ingress = ifids.ingress;
    sof.egress = ifids.egress;
    let mut mac = ctx.mac_pool.acquire();
    succ.block
        .set_ha(&mut mac, &key, &nonce, ctx.local_as, sof_idx, &ids, &path_lens)
}

fn handle_confirm(ctx: &HandlerCtx, pkt: SibraPkt) -> Result<Verdict> {
    if pkt.pld.response {
        return Ok(Verdict::Forward(pkt));
    }
    let last = pkt.extn.base().last_hop();
    if last {
        let now = ctx.time.now_nanos();
        let payload = pkt.pld.pack();
        pkt.extn.base().validate_dest(None, &payload, now)?;
        return Ok(Verdict::Reverse(reverse_pkt(ctx, pkt)?));
    }
    Ok(Verdict::Forward(pkt))
}

fn handle_ephem_req(ctx: &HandlerCtx, mut pkt: SibraPkt, ifids: IfTuple) -> Result<Verdict> {
    let setup = pkt.pld.data_type == DataType::EphemSetup;
    let res = {
        let mut algo = ctx.algo.lock().expect("algo poisoned");
        match (&pkt.extn, setup) {
            (Extension::Steady(s), true) => {
                algo.admit_ephem_setup(s, &pkt.pld, pkt.meta.src_as)?
            }
            (Extension::Ephemeral(e), false) => {
                algo.admit_ephem_renew(e, &pkt.pld, pkt.meta.src_as)?
            }
            _ => return Err(Error::InvalidFlagCombo),
        }
    };
    if pkt.pld.accepted && res.fail_code == FailCode::None {
        issue_ephem_sof(ctx, &mut pkt, ifids)?;
    }
    if res.fail_code != FailCode::None {
        fail_ephem_resv(&mut pkt, res);
    }
    let last = pkt.extn.base().last_hop();
    if !last {
        return Ok(Verdict::Forward(pkt));
    }
    // end AS: a still-accepted request goes to the client for approval
    if pkt.pld.accepted && !ctx.client.approve(&pkt, client_timeout(&pkt.extn)) {
        warn!("client denied reservation");
        let denied = EphemRes {
            fail_code: FailCode::ClientDenied,
            max_bw: crate::types::BwCls(0),
        };
        fail_ephem_resv(&mut pkt, denied);
        clean_ephem(ctx, &pkt);
    }
    Ok(Verdict::Reverse(reverse_pkt(ctx, pkt)?))
}

/// Stamps this AS's sealed SOF into the request block under
/// construction. At a steady transfer the egress comes from the next
/// block's first opaque field.
fn issue_ephem_sof(ctx: &HandlerCtx, pkt: &mut SibraPkt, mut ifids: IfTuple) -> Result<()> {
    let (source_as, source_host) = resv_source(pkt);
    let base = pkt.extn.base();
    let nonce = base.seal_nonce();
    let curr_hop = base.curr_hop as usize;
    let path_lens = base.path_lens.to_vec();
    let mut ids = alloc::vec::Vec::new();
    if let Extension::Steady(s) = &pkt.extn {
        if s.is_transfer() {
            let next = s.curr_steady as usize + 1;
            if let Some(block) = s.active_blocks.get(next) {
                if let Some(first) = block.sofs.first() {
                    ifids.egress = first.egress;
                }
            }
        }
    }
    let req = match &mut pkt.pld.data {
        Data::EphemReq(r) => r,
        _ => return Err(Error::UnknownRequestType),
    };
    match &pkt.extn {
        Extension::Steady(s) => {
            if let Some(id) = req.id {
                ids.push(id);
            }
            ids.extend_from_slice(s.steady_ids());
        }
        Extension::Ephemeral(e) => ids.extend_from_slice(&e.ids),
    }
    let key = seal_key(ctx, source_as, Some(&source_host));
    let mut mac = ctx.mac_pool.acquire();
    req.set_sof(
        &mut mac,
        &key,
        &nonce,
        ctx.local_as,
        &ids,
        &path_lens,
        ifids.ingress,
        ifids.egress,
        curr_hop,
    )
}

/// Converts an accepted request into a failure record, or merges this
/// hop's verdict into an existing one. Fail codes only ever grow.
fn fail_ephem_resv(pkt: &mut SibraPkt, res: EphemRes) {
    let curr_hop = pkt.extn.base().curr_hop as usize;
    if pkt.pld.accepted {
        if let Data::EphemReq(req) = &pkt.pld.data {
            pkt.pld.data = Data::EphemFailed(req.fail(res.fail_code, res.max_bw, curr_hop));
            pkt.pld.accepted = false;
        }
    } else if let Data::EphemFailed(failed) = &mut pkt.pld.data {
        failed.fail_code = failed.fail_code.merge(res.fail_code);
        if let Some(offer) = failed.offers.get_mut(curr_hop) {
            *offer = res.max_bw;
        }
    }
}

fn clean_ephem(ctx: &HandlerCtx, pkt: &SibraPkt) {
    let mut algo = ctx.algo.lock().expect("algo poisoned");
    let result = match (&pkt.extn, pkt.pld.data_type) {
        (Extension::Steady(s), DataType::EphemSetup | DataType::EphemCleanUp) => {
            algo.clean_ephem_setup(s, &pkt.pld)
        }
        (Extension::Ephemeral(e), _) => algo.clean_ephem_renew(e, &pkt.pld),
        _ => Ok(FailCode::None),
    };
    if let Err(err) = result {
        warn!(%err, "unable to clean ephemeral reservation");
    }
}

/// Response leg: rejected replies refund the tentative allocation at
/// every hop they pass.
fn handle_ephem_rep(ctx: &HandlerCtx, pkt: SibraPkt) -> Result<Verdict> {
    if !pkt.pld.accepted {
        clean_ephem(ctx, &pkt);
    }
    if pkt.extn.base().last_hop() {
        return Ok(Verdict::Deliver(pkt));
    }
    Ok(Verdict::Forward(pkt))
}

fn handle_ephem_clean(ctx: &HandlerCtx, mut pkt: SibraPkt) -> Result<Verdict> {
    if pkt.pld.response {
        if pkt.extn.base().last_hop() {
            return Ok(Verdict::Deliver(pkt));
        }
        return Ok(Verdict::Forward(pkt));
    }
    debug!("handling ephemeral clean up");
    let fc = {
        let mut algo = ctx.algo.lock().expect("algo poisoned");
        match &pkt.extn {
            Extension::Steady(s) => algo.clean_ephem_setup(s, &pkt.pld)?,
            Extension::Ephemeral(e) => algo.clean_ephem_renew(e, &pkt.pld)?,
        }
    };
    if pkt.pld.accepted && fc != FailCode::None {
        pkt.pld.accepted = false;
    }
    if pkt.extn.base().last_hop() {
        return Ok(Verdict::Reverse(reverse_pkt(ctx, pkt)?));
    }
    Ok(Verdict::Forward(pkt))
}

/// Flips all three layers and rebinds the reply's source-written
/// fields. The opaque fields are left untouched; their authenticators
/// cannot be re-derived here.
pub fn reverse_pkt(ctx: &HandlerCtx, mut pkt: SibraPkt) -> Result<SibraPkt> {
    pkt.pld.reverse()?;
    let accepted = pkt.pld.accepted;
    pkt.extn.base_mut().reverse(accepted);
    pkt.meta.reverse();
    let payload = pkt.pld.pack();
    let now = ctx.time.now_nanos();
    match &mut pkt.extn {
        Extension::Steady(s) => s.write_reverse_source(None, &payload, now)?,
        Extension::Ephemeral(e) => {
            let key = kdf::end_to_end_hash_key(
                PROTO_COLIBRI,
                pkt.meta.dst_as,
                pkt.meta.src_as,
                &pkt.meta.dst_host,
                &pkt.meta.src_host,
            );
            e.write_reverse_source(Some(&key), &payload, now)?;
        }
    }
    Ok(pkt)
}
