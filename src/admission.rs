//! Interfaces to the external admission-control algorithm and the
//! per-flow bandwidth monitor. The decision logic itself lives outside
//! the core; the walk only consumes verdicts.

use crate::packet::{Ephemeral, Steady};
use crate::request::{Pld, SteadyReq};
use crate::types::{AsId, BwCls, FailCode, IfId, Index, ResvId, Result};

/// Reservation ingress/egress interface pair at the deciding AS.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct IfTuple {
    pub ingress: IfId,
    pub egress: IfId,
}

#[derive(Clone, Copy, Debug)]
pub struct AdmParams<'a> {
    pub ifids: IfTuple,
    pub extn: &'a Steady,
    pub req: &'a SteadyReq,
    pub src: AsId,
    pub accepted: bool,
}

/// Verdict on a steady request.
#[derive(Clone, Copy, Debug)]
pub struct SteadyRes {
    pub accepted: bool,
    pub alloc_bw: BwCls,
    pub max_bw: BwCls,
}

/// Verdict on an ephemeral request.
#[derive(Clone, Copy, Debug, Default)]
pub struct EphemRes {
    pub fail_code: FailCode,
    pub max_bw: BwCls,
}

/// Admission algorithm hook. Implementations track available capacity
/// and tentative allocations; cleanups refund what a failed setup or
/// renewal tentatively took.
pub trait SibraAlgo: Send {
    fn admit_steady(&mut self, params: AdmParams<'_>) -> Result<SteadyRes>;
    fn admit_ephem_setup(&mut self, extn: &Steady, pld: &Pld, src: AsId) -> Result<EphemRes>;
    fn admit_ephem_renew(&mut self, extn: &Ephemeral, pld: &Pld, src: AsId) -> Result<EphemRes>;
    fn clean_ephem_setup(&mut self, extn: &Steady, pld: &Pld) -> Result<FailCode>;
    fn clean_ephem_renew(&mut self, extn: &Ephemeral, pld: &Pld) -> Result<FailCode>;
}

/// Per-flow usage sample handed to the bandwidth monitor.
#[derive(Clone, Debug)]
pub struct FlowInfo {
    pub bw_cls: BwCls,
    pub packet_size: usize,
    pub resv_id: ResvId,
    pub resv_index: Index,
    pub src: AsId,
}

/// Pluggable per-flow limiter. Returns true if the admitted limit is
/// exceeded and the packet must be dropped.
pub trait FlowMonitor: Send {
    fn check_flow(&mut self, info: &FlowInfo, local: bool) -> bool;
}

/// Monitor that never limits, for setups without enforcement.
pub struct NoLimit;

impl FlowMonitor for NoLimit {
    fn check_flow(&mut self, _info: &FlowInfo, _local: bool) -> bool {
        false
    }
}

/// Capacity-table algorithm: grants up to a fixed bandwidth class and
/// tracks tentative ephemeral grants so cleanups can refund them. Kept
/// deliberately simple; the production algorithm replaces it behind the
/// same trait.
pub struct FixedCapacity {
    pub steady_cap: BwCls,
    pub ephem_cap: BwCls,
    pub tentative: alloc::sync::Arc<core::sync::atomic::AtomicI64>,
}

impl FixedCapacity {
    pub fn new(steady_cap: BwCls, ephem_cap: BwCls) -> Self {
        FixedCapacity {
            steady_cap,
            ephem_cap,
            tentative: alloc::sync::Arc::new(core::sync::atomic::AtomicI64::new(0)),
        }
    }

    fn grant(&self, wanted: BwCls, cap: BwCls) -> (bool, BwCls) {
        if wanted <= cap {
            (true, wanted)
        } else {
            (false, cap)
        }
    }
}

impl SibraAlgo for FixedCapacity {
    fn admit_steady(&mut self, params: AdmParams<'_>) -> Result<SteadyRes> {
        let (ok, alloc) = self.grant(params.req.max_bw, self.steady_cap);
        Ok(SteadyRes {
            accepted: ok || alloc >= params.req.min_bw,
            alloc_bw: alloc,
            max_bw: self.steady_cap,
        })
    }

    fn admit_ephem_setup(&mut self, _extn: &Steady, pld: &Pld, _src: AsId) -> Result<EphemRes> {
        if !pld.accepted {
            return Ok(EphemRes::default());
        }
        let wanted = match &pld.data {
            crate::request::Data::EphemReq(r) => r.block.info.bw_cls,
            _ => return Ok(EphemRes::default()),
        };
        let (ok, max) = self.grant(wanted, self.ephem_cap);
        if ok {
            self.tentative
                .fetch_add(1, core::sync::atomic::Ordering::Relaxed);
            Ok(EphemRes::default())
        } else {
            Ok(EphemRes {
                fail_code: FailCode::AdmissionFailed,
                max_bw: max,
            })
        }
    }

    fn admit_ephem_renew(&mut self, _extn: &Ephemeral, pld: &Pld, _src: AsId) -> Result<EphemRes> {
        if !pld.accepted {
            return Ok(EphemRes::default());
        }
        let wanted = match &pld.data {
            crate::request::Data::EphemReq(r) => r.block.info.bw_cls,
            _ => return Ok(EphemRes::default()),
        };
        let (ok, max) = self.grant(wanted, self.ephem_cap);
        if ok {
            Ok(EphemRes::default())
        } else {
            Ok(EphemRes {
                fail_code: FailCode::AdmissionFailed,
                max_bw: max,
            })
        }
    }

    fn clean_ephem_setup(&mut self, _extn: &Steady, _pld: &Pld) -> Result<FailCode> {
        let counter = &self.tentative;
        if counter.load(core::sync::atomic::Ordering::Relaxed) > 0 {
            counter.fetch_sub(1, core::sync::atomic::Ordering::Relaxed);
        }
        Ok(FailCode::None)
    }

    fn clean_ephem_renew(&mut self, _extn: &Ephemeral, _pld: &Pld) -> Result<FailCode> {
        Ok(FailCode::None)
    }
}
