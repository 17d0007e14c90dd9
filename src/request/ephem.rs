//! Ephemeral request bodies: the setup/renewal request carrying the
//! block under construction, the failure record riding back, and the
//! cleanup request.

use crate::crypto::mac::SvMac;
use crate::packet::block::Block;
use crate::packet::info::{Info, INFO_LEN};
use crate::types::{AsId, BwCls, Error, FailCode, IfId, ResvId, Result, EPHEM_ID_LEN};
use alloc::vec::Vec;

/// Ephemeral setup or renewal request. Setup requests carry the new
/// ephemeral id; renewals reuse the id of the extension they ride.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EphemReq {
    pub id: Option<ResvId>,
    pub block: Block,
}

impl EphemReq {
    pub fn new(id: Option<ResvId>, info: Info, num_hops: usize) -> Self {
        EphemReq {
            id,
            block: Block::new_control(info, num_hops),
        }
    }

    pub fn from_raw(raw: &[u8], setup: bool, num_hops: usize) -> Result<Self> {
        let (id, off) = if setup {
            if raw.len() < EPHEM_ID_LEN {
                return Err(Error::InvalidEphemIdLen);
            }
            (
                Some(ResvId::ephem_from_raw(&raw[..EPHEM_ID_LEN])?),
                EPHEM_ID_LEN,
            )
        } else {
            (None, 0)
        };
        Ok(EphemReq {
            id,
            block: Block::from_raw(&raw[off..], num_hops)?,
        })
    }

    pub fn len(&self) -> usize {
        self.id.map(|id| id.len()).unwrap_or(0) + self.block.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn write(&self, b: &mut [u8]) -> Result<()> {
        if b.len() < self.len() {
            return Err(Error::InvalidExtnLength);
        }
        let mut off = 0;
        if let Some(id) = &self.id {
            id.write(&mut b[..id.len()]);
            off = id.len();
        }
        self.block.write(&mut b[off..])
    }

    /// Issues this hop's SOF: stamps the interfaces and writes the
    /// sealed authenticator at `sof_idx`.
    #[allow(clippy::too_many_arguments)]
    pub fn set_sof(
        &mut self,
        sv_mac: &mut dyn SvMac,
        key: &[u8; 32],
        nonce: &[u8; 12],
        hop_as: AsId,
        ids: &[ResvId],
        path_lens: &[u8],
        ingress: IfId,
        egress: IfId,
        sof_idx: usize,
    ) -> Result<()> {
        let sof = self
            .block
            .sofs
            .get_mut(sof_idx)
            .ok_or(Error::SofIndexRange)?;
        sof.ingress = ingress;
        sof.egress = egress;
        self.block
            .set_ha(sv_mac, key, nonce, hop_as, sof_idx, ids, path_lens)
    }

    /// Converts an accepted request into the failure record of the hop
    /// at `curr_hop`. Earlier hops offered at least the requested class.
    pub fn fail(&self, fail_code: FailCode, max_bw: BwCls, curr_hop: usize) -> EphemFailed {
        let num_hops = self.block.num_hops();
        let mut offers = alloc::vec![BwCls::MAX; num_hops];
        if curr_hop < num_hops {
            offers[curr_hop] = max_bw;
        }
        EphemFailed {
            id: self.id,
            info: self.block.info,
            fail_code,
            offers,
        }
    }
}

/// Rejected ephemeral request riding back to the source.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EphemFailed {
    pub id: Option<ResvId>,
    pub info: Info,
    pub fail_code: FailCode,
    pub offers: Vec<BwCls>,
}

impl EphemFailed {
    pub fn from_raw(raw: &[u8], setup: bool, num_hops: usize) -> Result<Self> {
        let (id, off) = if setup {
            if raw.len() < EPHEM_ID_LEN {
                return Err(Error::InvalidEphemIdLen);
            }
            (
                Some(ResvId::ephem_from_raw(&raw[..EPHEM_ID_LEN])?),
                EPHEM_ID_LEN,
            )
        } else {
            (None, 0)
        };
        if raw.len() < off + INFO_LEN + 4 + num_hops {
            return Err(Error::InvalidExtnLength);
        }
        let info = Info::from_raw(&raw[off..off + INFO_LEN])?;
        let fail_code = FailCode::from_u8(raw[off + INFO_LEN])?;
        let offers_off = off + INFO_LEN + 4;
        let offers = raw[offers_off..offers_off + num_hops]
            .iter()
            .map(|&b| BwCls(b))
            .collect();
        Ok(EphemFailed {
            id,
            info,
            fail_code,
            offers,
        })
    }

    pub fn len(&self) -> usize {
        self.id.map(|id| id.len()).unwrap_or(0) + INFO_LEN + 4 + self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn write(&self, b: &mut [u8]) -> Result<()> {
        if b.len() < self.len() {
            return Err(Error::InvalidExtnLength);
        }
        let mut off = 0;
        if let Some(id) = &self.id {
            id.write(&mut b[..id.len()]);
            off = id.len();
        }
        self.info.write(&mut b[off..off + INFO_LEN]);
        b[off + INFO_LEN] = self.fail_code.to_u8();
        b[off + INFO_LEN + 1..off + INFO_LEN + 4].fill(0);
        let offers_off = off + INFO_LEN + 4;
        for (i, offer) in self.offers.iter().enumerate() {
            b[offers_off + i] = offer.0;
        }
        Ok(())
    }

    /// Largest bandwidth class every walked hop could still grant.
    pub fn min_offer(&self) -> BwCls {
        self.offers.iter().copied().min().unwrap_or(BwCls(0))
    }
}

/// Cleanup of a failed or abandoned ephemeral reservation. Cleanups of
/// failed setups carry the id that never made it into an extension.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EphemClean {
    pub setup: bool,
    pub id: Option<ResvId>,
    pub info: Info,
}

const CLEAN_FLAG_SETUP: u8 = 0x01;

impl EphemClean {
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        if raw.len() < 4 {
            return Err(Error::InvalidExtnLength);
        }
        let setup = raw[0] & CLEAN_FLAG_SETUP != 0;
        let mut off = 4;
        let id = if setup {
            if raw.len() < off + EPHEM_ID_LEN {
                return Err(Error::InvalidEphemIdLen);
            }
            let id = ResvId::ephem_from_raw(&raw[off..off + EPHEM_ID_LEN])?;
            off += EPHEM_ID_LEN;
            Some(id)
        } else {
            None
        };
        if raw.len() < off + INFO_LEN {
            return Err(Error::InvalidExtnLength);
        }
        Ok(EphemClean {
            setup,
            id,
            info: Info::from_raw(&raw[off..off + INFO_LEN])?,
        })
    }

    pub fn len(&self) -> usize {
        4 + self.id.map(|id| id.len()).unwrap_or(0) + INFO_LEN
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn write(&self, b: &mut [u8]) -> Result<()> {
        if b.len() < self.len() {
            return Err(Error::InvalidExtnLength);
        }
        b[0] = if self.setup { CLEAN_FLAG_SETUP } else { 0 };
        b[1..4].fill(0);
        let mut off = 4;
        if let Some(id) = &self.id {
            id.write(&mut b[off..off + id.len()]);
            off += id.len();
        }
        self.info.write(&mut b[off..off + INFO_LEN]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Data, DataType, Pld};
    use crate::types::{Index, PathType, Rlc, Tick};

    fn info() -> Info {
        Info {
            exp_tick: Tick(77),
            bw_cls: BwCls(5),
            rlc: Rlc(2),
            index: Index(0),
            path_type: PathType::Ephemeral,
            fail_hop: 0,
        }
    }

    #[test]
    fn setup_request_round_trips() {
        let req = EphemReq::new(Some(ResvId::Ephemeral([0xaa; 16])), info(), 4);
        let pld = Pld::new(DataType::EphemSetup, 4, true, Data::EphemReq(req));
        let parsed = Pld::from_raw(&pld.pack()).expect("parse");
        assert_eq!(parsed, pld);
    }

    #[test]
    fn renewal_has_no_id_on_the_wire() {
        let req = EphemReq::new(None, info(), 3);
        let pld = Pld::new(DataType::EphemRenewal, 3, true, Data::EphemReq(req));
        let parsed = Pld::from_raw(&pld.pack()).expect("parse");
        match &parsed.data {
            Data::EphemReq(r) => assert!(r.id.is_none()),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn fail_primes_offers_and_keeps_worst_code() {
        let req = EphemReq::new(Some(ResvId::Ephemeral([0xaa; 16])), info(), 4);
        let failed = req.fail(FailCode::AdmissionFailed, BwCls(3), 2);
        assert_eq!(failed.fail_code, FailCode::AdmissionFailed);
        assert_eq!(
            failed.offers,
            alloc::vec![BwCls::MAX, BwCls::MAX, BwCls(3), BwCls::MAX]
        );
        assert_eq!(failed.min_offer(), BwCls(3));
        let pld = Pld::new(DataType::EphemSetup, 4, false, Data::EphemFailed(failed));
        let parsed = Pld::from_raw(&pld.pack()).expect("parse");
        assert_eq!(parsed, pld);
    }

    #[test]
    fn cleanup_round_trips_with_and_without_id() {
        let with_id = EphemClean {
            setup: true,
            id: Some(ResvId::Ephemeral([0x11; 16])),
            info: info(),
        };
        let pld = Pld::new(DataType::EphemCleanUp, 2, true, Data::EphemClean(with_id));
        assert_eq!(Pld::from_raw(&pld.pack()).expect("parse"), pld);
        let without = EphemClean {
            setup: false,
            id: None,
            info: info(),
        };
        let pld = Pld::new(DataType::EphemCleanUp, 2, true, Data::EphemClean(without));
        assert_eq!(Pld::from_raw(&pld.pack()).expect("parse"), pld);
    }
}
