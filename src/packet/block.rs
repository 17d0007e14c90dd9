//! Reservation block: one info field followed by one opaque field per
//! hop of the block.

use crate::crypto::kdf::{self, PROTO_COLIBRI};
use crate::crypto::mac::SvMac;
use crate::packet::info::{Info, INFO_LEN};
use crate::packet::sof::{SofField, SofToken};
use crate::types::{AsId, Error, HostAddr, ResvId, Result};
use alloc::vec::Vec;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Block {
    pub info: Info,
    pub sofs: Vec<SofField>,
}

impl Block {
    /// Fresh block of `num_hops` zeroed Control SOFs.
    pub fn new_control(info: Info, num_hops: usize) -> Self {
        Block {
            info,
            sofs: alloc::vec![SofField::new_control(Default::default(), Default::default());
                num_hops],
        }
    }

    pub fn from_raw(raw: &[u8], num_hops: usize) -> Result<Self> {
        if raw.len() < INFO_LEN {
            return Err(Error::InvalidExtnLength);
        }
        let info = Info::from_raw(&raw[..INFO_LEN])?;
        let mut sofs = Vec::with_capacity(num_hops);
        let mut off = INFO_LEN;
        for _ in 0..num_hops {
            if off > raw.len() {
                return Err(Error::InvalidExtnLength);
            }
            let sof = SofField::from_raw(&raw[off..])?;
            off += sof.len();
            sofs.push(sof);
        }
        Ok(Block { info, sofs })
    }

    pub fn num_hops(&self) -> usize {
        self.sofs.len()
    }

    pub fn len(&self) -> usize {
        INFO_LEN + self.sofs.iter().map(|s| s.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.sofs.is_empty()
    }

    pub fn write(&self, raw: &mut [u8]) -> Result<()> {
        if raw.len() < self.len() {
            return Err(Error::InvalidExtnLength);
        }
        self.info.write(&mut raw[..INFO_LEN]);
        let mut off = INFO_LEN;
        for sof in &self.sofs {
            sof.write(&mut raw[off..off + sof.len()])?;
            off += sof.len();
        }
        Ok(())
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut raw = alloc::vec![0u8; self.len()];
        self.write(&mut raw).expect("buffer sized");
        raw
    }

    /// Verifies the SOF at `sof_idx`: reservation not expired and HVF
    /// matching a locally derived hop authenticator.
    pub fn verify(
        &self,
        sv_mac: &mut dyn SvMac,
        sof_idx: usize,
        ids: &[ResvId],
        path_lens: &[u8],
        pld_hash: &[u8; 4],
        ts: u32,
        now_nanos: u64,
    ) -> Result<()> {
        let sof = self.sofs.get(sof_idx).ok_or(Error::SofIndexRange)?;
        if now_nanos >= self.info.exp_tick.nanos() {
            return Err(Error::Expired);
        }
        sof.verify_hvf(sv_mac, &self.info, ids, path_lens, pld_hash, ts)
    }

    /// Issues the sealed authenticator for the SOF at `sof_idx`.
    pub fn set_ha(
        &mut self,
        sv_mac: &mut dyn SvMac,
        key: &[u8; 32],
        nonce: &[u8; 12],
        hop_as: AsId,
        sof_idx: usize,
        ids: &[ResvId],
        path_lens: &[u8],
    ) -> Result<()> {
        if sof_idx >= self.num_hops() {
            return Err(Error::SofIndexRange);
        }
        let info = self.info;
        self.sofs[sof_idx].set_ha(sv_mac, key, nonce, hop_as, &info, ids, path_lens)
    }

    /// Turns every Reservation SOF into a Data SOF bound to this
    /// packet's payload hash and timestamp.
    pub fn to_data(&mut self, pld_hash: &[u8; 4], ts: u32) -> Result<()> {
        for sof in &mut self.sofs {
            sof.to_data(pld_hash, ts)?;
        }
        Ok(())
    }

    /// Opens every Control SOF into Reservation form. Each hop's seal
    /// key is derived from its AS id and the reservation source; the
    /// source host enters the derivation for ephemeral blocks only.
    pub fn to_reservation(
        &mut self,
        source_as: AsId,
        source_host: Option<&HostAddr>,
        nonce: &[u8; 12],
    ) -> Result<()> {
        for sof in &mut self.sofs {
            let hop_as = match &sof.token {
                SofToken::Control { hop_as, .. } => *hop_as,
                SofToken::Reservation { .. } => continue,
                SofToken::Data { .. } => return Err(Error::InvalidSofType),
            };
            let l1 = kdf::derive_l1(hop_as, source_as);
            let key = kdf::derive_l2(&l1, source_host, None, PROTO_COLIBRI);
            sof.to_reservation(&key, nonce)?;
        }
        Ok(())
    }

    pub fn copy(&self) -> Block {
        self.clone()
    }
}

impl core::fmt::Display for Block {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "info: [{}] hops: {}", self.info, self.num_hops())
    }
}
