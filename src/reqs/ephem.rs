//! Ephemeral-family requesters. Setups ride a stitched steady
//! extension; renewals and their cleanups ride the ephemeral extension
//! being renewed. The seal nonce of the request is captured at write
//! time so the returned block can always be opened.

use crate::create::new_ephem_use;
use crate::crypto::kdf::{self, PROTO_COLIBRI};
use crate::notify::{NotifyEvent, NotifyKey};
use crate::packet::info::Info;
use crate::packet::{Ephemeral, Extension, Steady};
use crate::request::ephem::{EphemClean, EphemReq};
use crate::request::{Data, DataType, Pld};
use crate::reqs::{ReqCtx, Requester};
use crate::store::{EphemMeta, ResvEntry};
use crate::transport::{PacketMeta, SibraPkt};
use crate::types::{
    BwCls, Error, Index, PathType, ResvId, Result, Rlc, State, Tick, MAX_EPHEM_TICKS,
};
use std::time::Duration;
use tracing::info;

/// Latency class covering the whole stitched path: the sum of the
/// per-block classes, rounded up.
pub fn combine_rlc(steady: &Steady) -> Rlc {
    let total: u64 = steady
        .active_blocks
        .iter()
        .map(|b| b.info.rlc.nanos())
        .sum();
    Rlc::from_nanos(total, true)
}

fn min_tick(a: Tick, b: Tick) -> Tick {
    a.min(b)
}

pub struct EphemSetup {
    pub ctx: ReqCtx,
    pub meta: PacketMeta,
    pub id: ResvId,
    pub idx: Index,
    pub bw_cls: BwCls,
    pub steady: Steady,
    pub result: Option<Ephemeral>,
    pub ephem_meta: EphemMeta,
    saved_nonce: [u8; 12],
    sent_info: Option<Info>,
}

impl EphemSetup {
    pub fn new(ctx: ReqCtx, meta: PacketMeta, id: ResvId, bw_cls: BwCls, steady: Steady) -> Self {
        EphemSetup {
            ctx,
            meta,
            id,
            idx: Index(0),
            bw_cls,
            steady,
            result: None,
            ephem_meta: EphemMeta::default(),
            saved_nonce: [0; 12],
            sent_info: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        combine_rlc(&self.steady).duration()
    }

    /// Info field as sent, for chaining a cleanup after a failure.
    pub fn sent_info(&self) -> Option<Info> {
        self.sent_info
    }
}

impl Requester for EphemSetup {
    fn prepare(&mut self) -> Result<SibraPkt> {
        let now = self.ctx.time.now_nanos();
        let mut steady = self.steady.copy();
        let exp = min_tick(
            steady.expiry()?,
            self.ctx.time.current_tick().add(MAX_EPHEM_TICKS),
        );
        let info = Info {
            exp_tick: exp,
            bw_cls: self.bw_cls,
            rlc: combine_rlc(&steady),
            index: self.idx,
            path_type: PathType::Ephemeral,
            fail_hop: 0,
        };
        let pld = Pld::new(
            DataType::EphemSetup,
            steady.total_hops,
            true,
            Data::EphemReq(EphemReq::new(
                Some(self.id),
                info,
                steady.total_hops as usize,
            )),
        );
        steady.to_request(&pld)?;
        let payload = pld.pack();
        steady.write_source(None, &payload, now)?;
        self.saved_nonce = steady.seal_nonce();
        self.sent_info = Some(info);
        Ok(SibraPkt {
            meta: self.meta,
            extn: Extension::Steady(steady),
            pld,
        })
    }

    fn notify_keys(&self) -> alloc::vec::Vec<NotifyKey> {
        alloc::vec![NotifyKey {
            id: self.id,
            idx: self.idx,
            req_type: DataType::EphemSetup,
        }]
    }

    fn handle_rep(&mut self, event: NotifyEvent) -> Result<bool> {
        let now = self.ctx.time.now_nanos();
        let steady = match &event.pkt.extn {
            Extension::Steady(s) => s,
            Extension::Ephemeral(_) => return Err(Error::InvalidFlagCombo),
        };
        steady.validate_dest(None, &event.pkt.pld.pack(), now)?;
        match &event.pkt.pld.data {
            Data::EphemReq(req) => {
                if req.id != Some(self.id) {
                    return Err(Error::InvalidId);
                }
                if req.block.info.index != self.idx {
                    return Err(Error::InvalidIndex);
                }
                if self.sent_info.map_or(false, |sent| req.block.info != sent) {
                    return Err(Error::InfoModified);
                }
                let mut ids = alloc::vec![self.id];
                ids.extend_from_slice(steady.steady_ids());
                let mut path_lens = [0u8; 3];
                path_lens.copy_from_slice(&steady.path_lens);
                let ephem = new_ephem_use(
                    ids,
                    path_lens,
                    req.block.clone(),
                    true,
                    self.ctx.local_as,
                    &self.ctx.local_host,
                    &self.saved_nonce,
                )?;
                self.ctx.store.set(ResvEntry {
                    id: self.id,
                    idx: self.idx,
                    state: State::Active,
                    block: ephem.active_blocks[0].clone(),
                    creation_nanos: now,
                    min_bw: self.bw_cls,
                    max_bw: self.bw_cls,
                    ephem_meta: EphemMeta::default(),
                });
                self.ephem_meta = EphemMeta {
                    last_fail_code: crate::types::FailCode::None,
                    last_max_bw: self.bw_cls,
                    updated_nanos: now,
                };
                self.result = Some(ephem);
                Ok(true)
            }
            Data::EphemFailed(failed) => {
                if failed.id != Some(self.id) {
                    return Err(Error::InvalidId);
                }
                if self.sent_info.map_or(false, |sent| failed.info != sent) {
                    return Err(Error::InfoModified);
                }
                self.ephem_meta = EphemMeta {
                    last_fail_code: failed.fail_code,
                    last_max_bw: failed.min_offer(),
                    updated_nanos: now,
                };
                info!(id = %self.id, code = ?failed.fail_code, "ephemeral setup rejected");
                Ok(false)
            }
            _ => Err(Error::UnknownRequestType),
        }
    }

    fn on_error(&mut self, err: Error) {
        info!(id = %self.id, %err, "ephemeral setup failed");
    }

    fn on_timeout(&mut self) {
        info!(id = %self.id, "ephemeral setup timed out");
    }
}

pub struct EphemRenew {
    pub ctx: ReqCtx,
    pub meta: PacketMeta,
    pub idx: Index,
    pub bw_cls: BwCls,
    pub ephem: Ephemeral,
    pub steady_expiry: Tick,
    pub result: Option<Ephemeral>,
    pub ephem_meta: EphemMeta,
    saved_nonce: [u8; 12],
    id: ResvId,
}

impl EphemRenew {
    pub fn new(
        ctx: ReqCtx,
        meta: PacketMeta,
        bw_cls: BwCls,
        ephem: Ephemeral,
        steady_expiry: Tick,
    ) -> Self {
        let id = ephem.ids[0];
        let idx = ephem.active_blocks[0].info.index.add(1);
        EphemRenew {
            ctx,
            meta,
            idx,
            bw_cls,
            ephem,
            steady_expiry,
            result: None,
            ephem_meta: EphemMeta::default(),
            saved_nonce: [0; 12],
            id,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.ephem.active_blocks[0].info.rlc.duration()
    }

    fn e2e_key(&self, meta: &PacketMeta) -> crate::crypto::mac::MacKey {
        kdf::end_to_end_hash_key(
            PROTO_COLIBRI,
            meta.dst_as,
            meta.src_as,
            &meta.dst_host,
            &meta.src_host,
        )
    }
}

impl Requester for EphemRenew {
    fn prepare(&mut self) -> Result<SibraPkt> {
        let now = self.ctx.time.now_nanos();
        let mut ephem = self.ephem.copy();
        if ephem.active_blocks[0].info.index.add(1) != self.idx {
            return Err(Error::InvalidIndex);
        }
        let exp = min_tick(
            self.steady_expiry,
            self.ctx.time.current_tick().add(MAX_EPHEM_TICKS),
        );
        let info = Info {
            exp_tick: exp,
            bw_cls: self.bw_cls,
            rlc: ephem.active_blocks[0].info.rlc,
            index: self.idx,
            path_type: PathType::Ephemeral,
            fail_hop: 0,
        };
        let pld = Pld::new(
            DataType::EphemRenewal,
            ephem.total_hops,
            true,
            Data::EphemReq(EphemReq::new(None, info, ephem.total_hops as usize)),
        );
        ephem.to_request(&pld)?;
        let key = self.e2e_key(&self.meta);
        let payload = pld.pack();
        ephem.write_source(Some(&key), &payload, now)?;
        self.saved_nonce = ephem.seal_nonce();
        Ok(SibraPkt {
            meta: self.meta,
            extn: Extension::Ephemeral(ephem),
            pld,
        })
    }

    fn notify_keys(&self) -> alloc::vec::Vec<NotifyKey> {
        alloc::vec![NotifyKey {
            id: self.id,
            idx: self.idx,
            req_type: DataType::EphemRenewal,
        }]
    }

    fn handle_rep(&mut self, event: NotifyEvent) -> Result<bool> {
        let now = self.ctx.time.now_nanos();
        let ephem = match &event.pkt.extn {
            Extension::Ephemeral(e) => e,
            Extension::Steady(_) => return Err(Error::InvalidFlagCombo),
        };
        if ephem.ephem_id() != &self.id {
            return Err(Error::InvalidId);
        }
        let key = self.e2e_key(&event.pkt.meta);
        ephem.validate_dest(Some(&key), &event.pkt.pld.pack(), now)?;
        match &event.pkt.pld.data {
            Data::EphemReq(req) => {
                if req.block.info.index != self.idx {
                    return Err(Error::InvalidIndex);
                }
                let mut path_lens = [0u8; 3];
                path_lens.copy_from_slice(&ephem.path_lens);
                let renewed = new_ephem_use(
                    ephem.ids.clone(),
                    path_lens,
                    req.block.clone(),
                    true,
                    self.ctx.local_as,
                    &self.ctx.local_host,
                    &self.saved_nonce,
                )?;
                self.ctx.store.set(ResvEntry {
                    id: self.id,
                    idx: self.idx,
                    state: State::Active,
                    block: renewed.active_blocks[0].clone(),
                    creation_nanos: now,
                    min_bw: self.bw_cls,
                    max_bw: self.bw_cls,
                    ephem_meta: EphemMeta::default(),
                });
                self.result = Some(renewed);
                Ok(true)
            }
            Data::EphemFailed(failed) => {
                self.ephem_meta = EphemMeta {
                    last_fail_code: failed.fail_code,
                    last_max_bw: failed.min_offer(),
                    updated_nanos: now,
                };
                Ok(false)
            }
            _ => Err(Error::UnknownRequestType),
        }
    }
}

/// Cleanup of a failed ephemeral setup, sent over the steady chain the
/// setup rode. Each on-path AS refunds the tentative allocation.
pub struct EphemCleanSetup {
    pub ctx: ReqCtx,
    pub meta: PacketMeta,
    pub id: ResvId,
    pub idx: Index,
    pub failed_info: Info,
    pub steady: Steady,
}

impl EphemCleanSetup {
    pub fn timeout(&self) -> Duration {
        combine_rlc(&self.steady).duration()
    }
}

impl Requester for EphemCleanSetup {
    fn prepare(&mut self) -> Result<SibraPkt> {
        let now = self.ctx.time.now_nanos();
        let mut steady = self.steady.copy();
        let pld = Pld::new(
            DataType::EphemCleanUp,
            steady.total_hops,
            true,
            Data::EphemClean(EphemClean {
                setup: true,
                id: Some(self.id),
                info: self.failed_info,
            }),
        );
        steady.to_request(&pld)?;
        let payload = pld.pack();
        steady.write_source(None, &payload, now)?;
        Ok(SibraPkt {
            meta: self.meta,
            extn: Extension::Steady(steady),
            pld,
        })
    }

    fn notify_keys(&self) -> alloc::vec::Vec<NotifyKey> {
        alloc::vec![NotifyKey {
            id: self.id,
            idx: self.idx,
            req_type: DataType::EphemCleanUp,
        }]
    }

    fn handle_rep(&mut self, event: NotifyEvent) -> Result<bool> {
        let clean = match &event.pkt.pld.data {
            Data::EphemClean(c) => c,
            _ => return Err(Error::UnknownRequestType),
        };
        if clean.setup && clean.id != Some(self.id) {
            return Err(Error::InvalidId);
        }
        if clean.info != self.failed_info {
            return Err(Error::InfoModified);
        }
        Ok(event.pkt.pld.accepted)
    }

    fn on_error(&mut self, err: Error) {
        info!(id = %self.id, %err, "reservation cleanup failed");
    }

    fn on_timeout(&mut self) {
        info!(id = %self.id, "reservation cleanup timed out");
    }
}

/// Cleanup of a failed renewal, sent over the still-active ephemeral
/// reservation itself.
pub struct EphemCleanRenew {
    pub ctx: ReqCtx,
    pub meta: PacketMeta,
    pub idx: Index,
    pub failed_info: Info,
    pub ephem: Ephemeral,
}

impl EphemCleanRenew {
    pub fn timeout(&self) -> Duration {
        self.ephem.active_blocks[0].info.rlc.duration()
    }
}

impl Requester for EphemCleanRenew {
    fn prepare(&mut self) -> Result<SibraPkt> {
        let now = self.ctx.time.now_nanos();
        let mut ephem = self.ephem.copy();
        let pld = Pld::new(
            DataType::EphemCleanUp,
            ephem.total_hops,
            true,
            Data::EphemClean(EphemClean {
                setup: false,
                id: None,
                info: self.failed_info,
            }),
        );
        ephem.to_request(&pld)?;
        let key = kdf::end_to_end_hash_key(
            PROTO_COLIBRI,
            self.meta.dst_as,
            self.meta.src_as,
            &self.meta.dst_host,
            &self.meta.src_host,
        );
        let payload = pld.pack();
        ephem.write_source(Some(&key), &payload, now)?;
        Ok(SibraPkt {
            meta: self.meta,
            extn: Extension::Ephemeral(ephem),
            pld,
        })
    }

    fn notify_keys(&self) -> alloc::vec::Vec<NotifyKey> {
        alloc::vec![NotifyKey {
            id: self.ephem.ids[0],
            idx: self.idx,
            req_type: DataType::EphemCleanUp,
        }]
    }

    fn handle_rep(&mut self, event: NotifyEvent) -> Result<bool> {
        let clean = match &event.pkt.pld.data {
            Data::EphemClean(c) => c,
            _ => return Err(Error::UnknownRequestType),
        };
        if clean.info != self.failed_info {
            return Err(Error::InfoModified);
        }
        Ok(event.pkt.pld.accepted)
    }
}
