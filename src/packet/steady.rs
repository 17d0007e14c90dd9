//! Steady reservation extension: long-lived per-AS-pair pipes, up to
//! three stitched blocks.

use crate::packet::base::{padding, Base};
use crate::packet::block::Block;
use crate::request::Pld;
use crate::types::{Error, PathType, ResvId, Result, MAX_STEADY_BLOCKS, STEADY_ID_LEN};
use alloc::vec::Vec;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Steady {
    pub base: Base,
}

impl core::ops::Deref for Steady {
    type Target = Base;
    fn deref(&self) -> &Base {
        &self.base
    }
}

impl core::ops::DerefMut for Steady {
    fn deref_mut(&mut self) -> &mut Base {
        &mut self.base
    }
}

impl Steady {
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        let base = Base::from_raw(raw)?;
        Self::from_base(base, raw)
    }

    pub fn from_base(base: Base, raw: &[u8]) -> Result<Self> {
        let mut s = Steady { base };
        if !s.base.steady {
            return Err(Error::InvalidFlagCombo);
        }
        let mut off = s.base.header_len();
        for _ in 0..s.base.total_steady {
            if raw.len() < off + STEADY_ID_LEN {
                return Err(Error::InvalidSteadyIdLen);
            }
            s.base
                .ids
                .push(ResvId::steady_from_raw(&raw[off..off + STEADY_ID_LEN])?);
            off += STEADY_ID_LEN;
        }
        off += padding(off);
        if !s.base.setup {
            for i in 0..s.base.total_steady as usize {
                let hops = s.base.path_lens[i] as usize;
                if off > raw.len() {
                    return Err(Error::InvalidExtnLength);
                }
                let block = Block::from_raw(&raw[off..], hops)?;
                off += block.len();
                s.base.active_blocks.push(block);
            }
        }
        s.validate()?;
        if !(s.base.best_effort || s.base.is_request) {
            return Err(Error::InvalidFlagCombo);
        }
        if off != raw.len() {
            return Err(Error::InvalidExtnLength);
        }
        Ok(s)
    }

    fn validate(&self) -> Result<()> {
        self.validate_path()
    }

    /// Path types of the stitched blocks must be compatible at each
    /// transfer.
    pub fn validate_path(&self) -> Result<()> {
        if self.base.active_blocks.is_empty() && self.base.setup {
            return Ok(());
        }
        if self.base.active_blocks.is_empty()
            || self.base.active_blocks.len() > MAX_STEADY_BLOCKS
        {
            return Err(Error::InvalidExtnLength);
        }
        let mut prev = PathType::None;
        for block in &self.base.active_blocks {
            if !block.info.path_type.valid_after(prev) {
                return Err(Error::IncompatiblePathTypes);
            }
            prev = block.info.path_type;
        }
        Ok(())
    }

    /// Steady ids in reservation direction.
    pub fn steady_ids(&self) -> &[ResvId] {
        &self.base.ids
    }

    /// Turns a best-effort extension into the carrier of `pld`. Steady
    /// setup extensions are built as requests and cannot be converted.
    pub fn to_request(&mut self, pld: &Pld) -> Result<()> {
        if self.base.setup {
            return Err(Error::InvalidFlagCombo);
        }
        let expected = if pld.data.is_steady() {
            self.base
                .active_blocks
                .first()
                .map(|b| b.num_hops())
                .unwrap_or(0)
        } else {
            self.base.total_hops as usize
        };
        if pld.num_hops as usize != expected {
            return Err(Error::InvalidExtnLength);
        }
        self.base.is_request = true;
        self.base.best_effort = false;
        Ok(())
    }

    pub fn copy(&self) -> Steady {
        self.clone()
    }

    pub fn pack(&self) -> Vec<u8> {
        self.base.pack()
    }
}

impl core::fmt::Display for Steady {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "steady extn ({}B), ids: {}", self.base.len(), self.ids.len())
    }
}
