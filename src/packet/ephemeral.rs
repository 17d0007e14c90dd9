//! Ephemeral reservation extension: a short-lived end-to-end flow riding
//! a stitched chain of up to three steady reservations. Carries one
//! block with one SOF per on-path AS and the full id list (ephemeral id
//! first).

use crate::packet::base::{padding, Base};
use crate::packet::block::Block;
use crate::request::Pld;
use crate::types::{Error, ResvId, Result, EPHEM_ID_LEN, STEADY_ID_LEN};
use alloc::vec::Vec;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Ephemeral {
    pub base: Base,
}

impl core::ops::Deref for Ephemeral {
    type Target = Base;
    fn deref(&self) -> &Base {
        &self.base
    }
}

impl core::ops::DerefMut for Ephemeral {
    fn deref_mut(&mut self) -> &mut Base {
        &mut self.base
    }
}

impl Ephemeral {
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        let base = Base::from_raw(raw)?;
        Self::from_base(base, raw)
    }

    pub fn from_base(base: Base, raw: &[u8]) -> Result<Self> {
        let mut e = Ephemeral { base };
        if e.base.steady {
            return Err(Error::InvalidFlagCombo);
        }
        let mut off = e.base.header_len();
        if raw.len() < off + EPHEM_ID_LEN {
            return Err(Error::InvalidEphemIdLen);
        }
        e.base
            .ids
            .push(ResvId::ephem_from_raw(&raw[off..off + EPHEM_ID_LEN])?);
        off += EPHEM_ID_LEN;
        for _ in 0..e.base.total_steady {
            if raw.len() < off + STEADY_ID_LEN {
                return Err(Error::InvalidSteadyIdLen);
            }
            e.base
                .ids
                .push(ResvId::steady_from_raw(&raw[off..off + STEADY_ID_LEN])?);
            off += STEADY_ID_LEN;
        }
        off += padding(off);
        if off > raw.len() {
            return Err(Error::InvalidExtnLength);
        }
        let block = Block::from_raw(&raw[off..], e.base.total_hops as usize)?;
        off += block.len();
        e.base.active_blocks.push(block);
        if off != raw.len() {
            return Err(Error::InvalidExtnLength);
        }
        Ok(e)
    }

    /// Steady ids in reservation direction, without the leading
    /// ephemeral id.
    pub fn steady_ids(&self) -> &[ResvId] {
        &self.base.ids[1..]
    }

    pub fn ephem_id(&self) -> &ResvId {
        &self.base.ids[0]
    }

    /// Whether the current hop transfers between two stitched steadies.
    pub fn is_steady_transfer(&self) -> bool {
        self.base.is_transfer()
    }

    /// Turns a best-effort extension into the carrier of `pld`.
    pub fn to_request(&mut self, pld: &Pld) -> Result<()> {
        if pld.data.is_steady() {
            return Err(Error::InvalidFlagCombo);
        }
        if pld.num_hops != self.base.total_hops {
            return Err(Error::InvalidExtnLength);
        }
        self.base.is_request = true;
        self.base.best_effort = false;
        Ok(())
    }

    pub fn copy(&self) -> Ephemeral {
        self.clone()
    }

    pub fn pack(&self) -> Vec<u8> {
        self.base.pack()
    }
}

impl core::fmt::Display for Ephemeral {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "ephemeral extn ({}B), id: {}",
            self.base.len(),
            self.ephem_id()
        )
    }
}
