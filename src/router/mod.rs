//! Border-router data-plane hooks. Per packet, in order: route
//! dispatch, direction split, opaque-field verification, transfer
//! handling, egress-interface validation, and egress queueing.

pub mod config;
pub mod topology;

pub use config::RouterConfig;
pub use topology::Topology;

use crate::admission::{FlowInfo, FlowMonitor};
use crate::crypto::mac::MacPool;
use crate::packet::Extension;
use crate::time::TimeProvider;
use crate::transport::PacketMeta;
use crate::types::{Error, IfId, Result, Sv};
use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use std::boxed::Box;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Where the packet entered this router.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    External,
    Local,
}

/// Egress socket of an enqueued packet.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum EgressSock {
    /// Delivery into the local AS (end host or service).
    Local,
    /// Out the given external interface.
    External(IfId),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EgressPair {
    pub sock: EgressSock,
    pub overlay: Option<String>,
}

/// Outcome of the staged verifier: hand the packet to ordinary path
/// forwarding, or finish with the assembled egress set.
#[derive(Debug)]
pub enum HookResult {
    Continue,
    Finish(Vec<EgressPair>),
}

#[derive(Default)]
pub struct RouterMetrics {
    pub drops: AtomicU64,
    /// Reserved-traffic bytes by (direction, bandwidth class).
    traffic_in: Mutex<HashMap<(u8, u8), u64>>,
}

impl RouterMetrics {
    fn add_traffic(&self, dir: Direction, bw_cls: u8, bytes: u64) {
        let key = (matches!(dir, Direction::Local) as u8, bw_cls);
        *self
            .traffic_in
            .lock()
            .expect("metrics poisoned")
            .entry(key)
            .or_insert(0) += bytes;
    }

    pub fn traffic(&self, dir: Direction, bw_cls: u8) -> u64 {
        let key = (matches!(dir, Direction::Local) as u8, bw_cls);
        *self
            .traffic_in
            .lock()
            .expect("metrics poisoned")
            .get(&key)
            .unwrap_or(&0)
    }
}

/// A reservation packet as seen by the router.
#[derive(Clone, Debug)]
pub struct RouterPkt {
    pub meta: PacketMeta,
    pub extn: Extension,
    pub payload_len: usize,
}

impl RouterPkt {
    fn size(&self) -> usize {
        self.extn.len() + self.payload_len
    }
}

pub struct RouterCtx {
    pub topo: Topology,
    pub mac_pool: MacPool,
    pub flow: Mutex<Box<dyn FlowMonitor>>,
    pub time: Arc<dyn TimeProvider + Send + Sync>,
    pub metrics: RouterMetrics,
}

impl RouterCtx {
    pub fn new(
        topo: Topology,
        sv: &Sv,
        flow: Box<dyn FlowMonitor>,
        time: Arc<dyn TimeProvider + Send + Sync>,
    ) -> Self {
        RouterCtx {
            topo,
            mac_pool: MacPool::new(sv, 8),
            flow: Mutex::new(flow),
            time,
            metrics: RouterMetrics::default(),
        }
    }

    /// Route dispatch plus direction split. Setup requests without a
    /// reservation block follow ordinary path forwarding.
    pub fn process(&self, pkt: &mut RouterPkt, dir: Direction) -> Result<HookResult> {
        let base = pkt.extn.base();
        if base.is_request && base.setup && base.active_blocks.is_empty() {
            return Ok(HookResult::Continue);
        }
        let res = match dir {
            Direction::External => self.forward_from_external(pkt),
            Direction::Local => self.forward_from_local(pkt),
        };
        if res.is_err() {
            self.metrics.drops.fetch_add(1, Ordering::Relaxed);
        }
        res
    }

    /// Verifies the opaque field at the current index: reservation not
    /// expired, timestamp inside the freshness window, and for packets
    /// whose extension fields are stable, the HVF against a locally
    /// derived hop authenticator.
    pub fn verify_sof(&self, extn: &Extension) -> Result<()> {
        let base = extn.base();
        let block = match base.curr_block() {
            Ok(b) => b,
            Err(_) => {
                debug!("empty extension received");
                return Ok(());
            }
        };
        let now = self.time.now_nanos();
        if now >= block.info.exp_tick.nanos() {
            return Err(Error::Expired);
        }
        base.validate_timestamp(now)?;
        // reverse-leg request payloads were rewritten at the far end;
        // their opaque fields cannot be rebound and skip the HVF
        if base.is_request && !base.forward {
            return Ok(());
        }
        let (ids, path_lens) = base.verify_scope();
        let mut mac = self.mac_pool.acquire();
        block.verify(
            &mut mac,
            base.curr_sof_idx(),
            &ids,
            &path_lens,
            &base.pld_hash,
            base.time_stamp,
            now,
        )
    }

    fn forward_from_external(&self, pkt: &mut RouterPkt) -> Result<HookResult> {
        let verify = {
            let base = pkt.extn.base();
            !(base.is_request && base.setup)
        };
        if verify {
            self.verify_sof(&pkt.extn)?;
        }
        let size = pkt.size();
        let base = pkt.extn.base();
        if base.last_hop() {
            // delivery to the end host; service resolution is external
            let overlay = format!("{:?}", pkt.meta.dst_host);
            self.account(pkt, Direction::External, size)?;
            return Ok(HookResult::Finish(vec![EgressPair {
                sock: EgressSock::Local,
                overlay: Some(overlay),
            }]));
        }
        if self.needs_transfer(&pkt.extn) {
            self.inc_transfer(pkt)?;
        }
        let base = pkt.extn.base();
        let sof = base.curr_block()?.sofs[base.curr_sof_idx()].clone();
        let if_next = if base.forward { sof.egress } else { sof.ingress };
        let link = self.topo.validate_local_if(if_next)?;
        let overlay = link.overlay.clone();
        self.account(pkt, Direction::External, size)?;
        pkt.extn.base_mut().next_sof_index()?;
        Ok(HookResult::Finish(vec![EgressPair {
            sock: EgressSock::External(if_next),
            overlay: Some(overlay),
        }]))
    }

    fn forward_from_local(&self, pkt: &mut RouterPkt) -> Result<HookResult> {
        let size = pkt.size();
        let base = pkt.extn.base();
        let sof = base.curr_block()?.sofs[base.curr_sof_idx()].clone();
        let if_next = if base.forward { sof.egress } else { sof.ingress };
        let link = self.topo.validate_local_if(if_next)?;
        let overlay = link.overlay.clone();
        self.account(pkt, Direction::Local, size)?;
        pkt.extn.base_mut().next_sof_index()?;
        Ok(HookResult::Finish(vec![EgressPair {
            sock: EgressSock::External(if_next),
            overlay: Some(overlay),
        }]))
    }

    /// Steady transfer between stitched blocks: advance into the next
    /// block, re-resolve the egress, and re-verify the new field.
    fn needs_transfer(&self, extn: &Extension) -> bool {
        match extn {
            Extension::Steady(s) => {
                let trans_fwd = (s.curr_steady as usize) < s.total_steady as usize - 1
                    && s.rel_steady_hop + 1 == s.path_lens[s.curr_steady as usize];
                let trans_rev = s.curr_steady != 0 && s.rel_steady_hop == 0;
                if s.forward {
                    trans_fwd
                } else {
                    trans_rev
                }
            }
            Extension::Ephemeral(_) => false,
        }
    }

    fn inc_transfer(&self, pkt: &mut RouterPkt) -> Result<()> {
        pkt.extn.base_mut().next_sof_index()?;
        self.verify_sof(&pkt.extn)
    }

    /// Reserved traffic is attributed to its bandwidth class and run
    /// through the flow monitor.
    fn account(&self, pkt: &RouterPkt, dir: Direction, size: usize) -> Result<()> {
        let base = pkt.extn.base();
        if base.best_effort {
            return Ok(());
        }
        if let Ok(block) = base.curr_block() {
            self.metrics.add_traffic(dir, block.info.bw_cls.0, size as u64);
            if !base.is_request {
                let info = FlowInfo {
                    bw_cls: block.info.bw_cls,
                    packet_size: size,
                    resv_id: *base.ids.first().ok_or(Error::InvalidId)?,
                    resv_index: block.info.index,
                    src: pkt.meta.src_as,
                };
                let exceeded = self
                    .flow
                    .lock()
                    .expect("flow monitor poisoned")
                    .check_flow(&info, matches!(dir, Direction::Local));
                if exceeded {
                    return Err(Error::FlowLimitExceeded);
                }
            }
        }
        Ok(())
    }
}
