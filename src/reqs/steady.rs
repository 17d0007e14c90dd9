//! Steady-family requesters: setup, renewal, and index confirmation.
//! Setup and renewal promote the returned block into the local store as
//! a Temp entry and chain into a ConfirmIndex requester; the entry goes
//! Pending when the confirmation is sent and Active when it returns
//! accepted.

use crate::admission::IfTuple;
use crate::create::{new_steady_setup, new_steady_use};
use crate::handlers::admit_steady_resv;
use crate::notify::{NotifyEvent, NotifyKey};
use crate::packet::block::Block;
use crate::packet::info::Info;
use crate::packet::Extension;
use crate::request::steady::{confirm_index_pld, steady_req_pld};
use crate::request::{Data, DataType};
use crate::reqs::{run, ReqCtx, Requester};
use crate::store::{EphemMeta, ResvEntry};
use crate::transport::{PacketMeta, SibraPkt};
use crate::types::{
    BwCls, EndProps, Error, Index, PathType, ResvId, Result, Rlc, SplitCls, State,
    MAX_STEADY_TICKS,
};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};

/// Reply checks shared by the steady requesters: reservation id,
/// timestamp freshness, index, and the payload hash where the payload
/// could not have been legitimately mutated after binding.
fn validate_steady_reply(
    pkt: &SibraPkt,
    id: &ResvId,
    idx: Index,
    now_nanos: u64,
) -> Result<()> {
    let steady = match &pkt.extn {
        Extension::Steady(s) => s,
        Extension::Ephemeral(_) => return Err(Error::InvalidFlagCombo),
    };
    if steady.curr_id()? != id {
        return Err(Error::InvalidId);
    }
    steady.validate_timestamp(now_nanos)?;
    let info = match &pkt.pld.data {
        Data::SteadySucc(s) => s.block.info,
        Data::SteadyReq(r) => r.info,
        _ => return Err(Error::UnknownRequestType),
    };
    if info.index != idx {
        return Err(Error::InvalidIndex);
    }
    if !pkt.pld.accepted {
        // rejected replies are immutable after reversal
        steady.validate_pld_hash(&pkt.pld.pack())?;
    }
    Ok(())
}

/// Promotes an accepted success block into the store as a Temp entry.
fn promote_temp(
    ctx: &ReqCtx,
    pkt: &SibraPkt,
    id: ResvId,
    idx: Index,
    min_bw: BwCls,
    max_bw: BwCls,
) -> Result<Arc<RwLock<ResvEntry>>> {
    let steady = match &pkt.extn {
        Extension::Steady(s) => s,
        Extension::Ephemeral(_) => return Err(Error::InvalidFlagCombo),
    };
    let succ = match &pkt.pld.data {
        Data::SteadySucc(s) => s,
        _ => return Err(Error::UnknownRequestType),
    };
    let mut block = succ.block.clone();
    // hops sealed against the reply extension's packet binding
    block.to_reservation(ctx.local_as, None, &steady.seal_nonce())?;
    debug!(info = %block.info, "reservation has been accepted");
    Ok(ctx.store.set(ResvEntry {
        id,
        idx,
        state: State::Temp,
        block,
        creation_nanos: ctx.time.now_nanos(),
        min_bw,
        max_bw,
        ephem_meta: EphemMeta::default(),
    }))
}

pub struct SteadySetup {
    pub ctx: ReqCtx,
    pub meta: PacketMeta,
    pub id: ResvId,
    pub idx: Index,
    pub path_type: PathType,
    pub num_hops: u8,
    pub min_bw: BwCls,
    pub max_bw: BwCls,
    pub props: EndProps,
    pub split: SplitCls,
    pub rlc: Rlc,
    pub entry: Option<Arc<RwLock<ResvEntry>>>,
    /// What the path could still grant, recorded from a rejected reply.
    pub last_max_bw: Option<BwCls>,
}

impl SteadySetup {
    pub fn timeout(&self) -> Duration {
        self.rlc.duration()
    }
}

impl Requester for SteadySetup {
    fn prepare(&mut self) -> Result<SibraPkt> {
        let now = self.ctx.time.now_nanos();
        let info = Info {
            exp_tick: self.ctx.time.current_tick().add(MAX_STEADY_TICKS),
            bw_cls: self.max_bw,
            rlc: self.rlc,
            index: self.idx,
            path_type: self.path_type,
            fail_hop: 0,
        };
        let mut pld = steady_req_pld(
            DataType::SteadySetup,
            info,
            self.min_bw,
            self.max_bw,
            self.props,
            self.split,
            self.num_hops as usize,
        );
        let mut extn = new_steady_setup(self.id, self.num_hops, self.path_type.reversed())?;
        {
            let mut algo = self.ctx.algo.lock().expect("algo poisoned");
            admit_steady_resv(
                algo.as_mut(),
                &extn,
                &mut pld,
                self.ctx.local_as,
                IfTuple::default(),
            )?;
        }
        if !pld.accepted {
            return Err(Error::AdmissionDenied);
        }
        extn.next_sof_index()?;
        let payload = pld.pack();
        extn.write_source(None, &payload, now)?;
        Ok(SibraPkt {
            meta: self.meta,
            extn: Extension::Steady(extn),
            pld,
        })
    }

    fn notify_keys(&self) -> alloc::vec::Vec<NotifyKey> {
        alloc::vec![NotifyKey {
            id: self.id,
            idx: self.idx,
            req_type: DataType::SteadySetup,
        }]
    }

    fn handle_rep(&mut self, event: NotifyEvent) -> Result<bool> {
        let now = self.ctx.time.now_nanos();
        validate_steady_reply(&event.pkt, &self.id, self.idx, now)?;
        if !event.pkt.pld.accepted {
            if let Data::SteadyReq(req) = &event.pkt.pld.data {
                self.last_max_bw = Some(req.min_offer());
            }
            info!(id = %self.id, max_bw = ?self.last_max_bw, "steady setup not accepted");
            return Ok(false);
        }
        self.entry = Some(promote_temp(
            &self.ctx,
            &event.pkt,
            self.id,
            self.idx,
            self.min_bw,
            self.max_bw,
        )?);
        Ok(true)
    }

    fn on_error(&mut self, err: Error) {
        info!(id = %self.id, %err, "reservation request failed");
    }

    fn on_timeout(&mut self) {
        info!(id = %self.id, "reservation request timed out");
    }
}

pub struct SteadyRenew {
    pub ctx: ReqCtx,
    pub meta: PacketMeta,
    pub id: ResvId,
    pub prev_idx: Index,
    pub idx: Index,
    pub min_bw: BwCls,
    pub max_bw: BwCls,
    pub props: EndProps,
    pub split: SplitCls,
    pub entry: Option<Arc<RwLock<ResvEntry>>>,
    /// What the path could still grant, recorded from a rejected reply.
    pub last_max_bw: Option<BwCls>,
    timeout: Duration,
}

impl SteadyRenew {
    pub fn new(
        ctx: ReqCtx,
        meta: PacketMeta,
        id: ResvId,
        prev_idx: Index,
        min_bw: BwCls,
        max_bw: BwCls,
    ) -> Self {
        SteadyRenew {
            ctx,
            meta,
            id,
            prev_idx,
            idx: prev_idx.add(1),
            min_bw,
            max_bw,
            props: EndProps::default(),
            split: SplitCls::default(),
            entry: None,
            last_max_bw: None,
            timeout: Duration::from_millis(500),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Requester for SteadyRenew {
    fn prepare(&mut self) -> Result<SibraPkt> {
        let now = self.ctx.time.now_nanos();
        let entry = self
            .ctx
            .store
            .get(&self.id, self.prev_idx)
            .ok_or(Error::InvalidState)?;
        let block = {
            let entry = entry.read().expect("entry poisoned");
            // renewals only proceed on an active reservation
            if entry.state != State::Active {
                return Err(Error::InvalidState);
            }
            entry.block.clone()
        };
        self.timeout = block.info.rlc.duration();
        let info = Info {
            exp_tick: self.ctx.time.current_tick().add(MAX_STEADY_TICKS),
            bw_cls: self.max_bw,
            rlc: block.info.rlc,
            index: self.idx,
            path_type: block.info.path_type,
            fail_hop: 0,
        };
        let reversed = block.info.path_type.reversed();
        let mut pld = steady_req_pld(
            DataType::SteadyRenewal,
            info,
            self.min_bw,
            self.max_bw,
            self.props,
            self.split,
            block.num_hops(),
        );
        let mut extn = new_steady_use(&[self.id], alloc::vec![block], !reversed)?;
        extn.to_request(&pld)?;
        {
            let mut algo = self.ctx.algo.lock().expect("algo poisoned");
            admit_steady_resv(
                algo.as_mut(),
                &extn,
                &mut pld,
                self.ctx.local_as,
                IfTuple::default(),
            )?;
        }
        if !pld.accepted {
            return Err(Error::AdmissionDenied);
        }
        extn.next_sof_index()?;
        let payload = pld.pack();
        extn.write_source(None, &payload, now)?;
        Ok(SibraPkt {
            meta: self.meta,
            extn: Extension::Steady(extn),
            pld,
        })
    }

    fn notify_keys(&self) -> alloc::vec::Vec<NotifyKey> {
        alloc::vec![NotifyKey {
            id: self.id,
            idx: self.idx,
            req_type: DataType::SteadyRenewal,
        }]
    }

    fn handle_rep(&mut self, event: NotifyEvent) -> Result<bool> {
        let now = self.ctx.time.now_nanos();
        validate_steady_reply(&event.pkt, &self.id, self.idx, now)?;
        if !event.pkt.pld.accepted {
            if let Data::SteadyReq(req) = &event.pkt.pld.data {
                self.last_max_bw = Some(req.min_offer());
            }
            info!(id = %self.id, max_bw = ?self.last_max_bw, "steady renewal not accepted");
            return Ok(false);
        }
        self.entry = Some(promote_temp(
            &self.ctx,
            &event.pkt,
            self.id,
            self.idx,
            self.min_bw,
            self.max_bw,
        )?);
        Ok(true)
    }
}

pub struct ConfirmIndex {
    pub ctx: ReqCtx,
    pub meta: PacketMeta,
    pub id: ResvId,
    pub idx: Index,
    pub block: Block,
}

impl ConfirmIndex {
    /// Confirmation chained after an accepted setup or renewal.
    pub fn after(req: &ReqCtx, meta: PacketMeta, entry: &Arc<RwLock<ResvEntry>>) -> Self {
        let entry = entry.read().expect("entry poisoned");
        ConfirmIndex {
            ctx: req.clone(),
            meta,
            id: entry.id,
            idx: entry.idx,
            block: entry.block.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.block.info.rlc.duration()
    }
}

impl Requester for ConfirmIndex {
    fn prepare(&mut self) -> Result<SibraPkt> {
        let now = self.ctx.time.now_nanos();
        let reversed = self.block.info.path_type.reversed();
        let pld = confirm_index_pld(self.idx, State::Active, self.block.num_hops());
        let mut extn = new_steady_use(&[self.id], alloc::vec![self.block.clone()], !reversed)?;
        extn.to_request(&pld)?;
        let payload = pld.pack();
        extn.write_source(None, &payload, now)?;
        if let Some(entry) = self.ctx.store.get(&self.id, self.idx) {
            entry.write().expect("entry poisoned").state = State::Pending;
        }
        Ok(SibraPkt {
            meta: self.meta,
            extn: Extension::Steady(extn),
            pld,
        })
    }

    fn notify_keys(&self) -> alloc::vec::Vec<NotifyKey> {
        alloc::vec![NotifyKey {
            id: self.id,
            idx: self.idx,
            req_type: DataType::SteadyConfIndex,
        }]
    }

    fn handle_rep(&mut self, event: NotifyEvent) -> Result<bool> {
        let steady = match &event.pkt.extn {
            Extension::Steady(s) => s,
            Extension::Ephemeral(_) => return Err(Error::InvalidFlagCombo),
        };
        if steady.curr_id()? != &self.id {
            return Err(Error::InvalidId);
        }
        let confirm = match &event.pkt.pld.data {
            Data::ConfirmIndex(c) => c,
            _ => return Err(Error::UnknownRequestType),
        };
        if confirm.idx != self.idx {
            return Err(Error::InvalidIndex);
        }
        if confirm.state != State::Active {
            return Err(Error::InvalidState);
        }
        let payload = event.pkt.pld.pack();
        steady.validate_dest(None, &payload, self.ctx.time.now_nanos())?;
        let entry = self
            .ctx
            .store
            .get(&self.id, self.idx)
            .ok_or(Error::InvalidState)?;
        if event.pkt.pld.accepted {
            entry.write().expect("entry poisoned").state = State::Active;
            info!(id = %self.id, idx = self.idx.0, "index accepted");
            Ok(true)
        } else {
            info!(id = %self.id, idx = self.idx.0, "index not accepted");
            Ok(false)
        }
    }
}

/// Runs a steady setup and, on success, the chained index confirmation
/// in the same task. The two never overlap for one (id, index).
pub fn run_setup_with_confirm(ctx: &ReqCtx, setup: &mut SteadySetup) -> Result<bool> {
    if !run(ctx, setup.timeout(), setup)? {
        return Ok(false);
    }
    let entry = setup.entry.as_ref().ok_or(Error::Internal)?;
    let mut confirm = ConfirmIndex::after(&setup.ctx, setup.meta, entry);
    run(ctx, confirm.timeout(), &mut confirm)
}
