//! Shared base of the steady and ephemeral reservation extensions:
//! flags, hop counters, path-length vector, timestamp, payload hash and
//! destination validation field, plus the id list and active blocks.

use crate::crypto::hash::calc32;
use crate::crypto::mac::MacKey;
use crate::crypto::seal;
use crate::packet::block::Block;
use crate::types::{
    Error, ResvId, Result, EPHEM_WINDOW_NANOS, MAX_DATA_HOP_NANOS, MAX_PATH_IDS_LEN,
    MAX_REQUEST_HOP_NANOS, STEADY_WINDOW_NANOS, TS_TO_NANO_EPHEM, TS_TO_NANO_STEADY,
};
use alloc::vec::Vec;

pub const SOF_VERSION: u8 = 1;
// Base header: flags, version, four hop counters, SOF index, the
// path-length vector, timestamp and payload hash; ephemeral adds a DVF.
pub const STEADY_BASE_LEN: usize = 18;
pub const EPHEM_BASE_LEN: usize = 22;
// The extension rides behind a 2-byte sub-header of the outer datagram.
pub const SUB_HDR_LEN: usize = 2;
pub const LINE_LEN: usize = 8;

pub const FLAG_STEADY: u8 = 0x80;
pub const FLAG_REQUEST: u8 = 0x40;
pub const FLAG_BEST_EFFORT: u8 = 0x20;
pub const FLAG_ACCEPTED: u8 = 0x10;
pub const FLAG_FORWARD: u8 = 0x08;
pub const FLAG_SETUP: u8 = 0x04;

pub const DVF_INPUT_LEN: usize = 8 + MAX_PATH_IDS_LEN;

/// Skip distance to the next 8-byte boundary, counting the sub-header.
pub fn padding(off: usize) -> usize {
    (LINE_LEN - (off + SUB_HDR_LEN) % LINE_LEN) % LINE_LEN
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Base {
    pub steady: bool,
    pub is_request: bool,
    pub best_effort: bool,
    pub accepted: bool,
    pub forward: bool,
    pub setup: bool,
    pub version: u8,
    pub curr_hop: u8,
    pub total_hops: u8,
    pub curr_steady: u8,
    pub total_steady: u8,
    pub sof_index: u8,
    // Derived from sof_index and path_lens, never serialized.
    pub rel_steady_hop: u8,
    pub path_lens: [u8; 3],
    pub time_stamp: u32,
    pub pld_hash: [u8; 4],
    pub dvf: [u8; 4],
    pub ids: Vec<ResvId>,
    pub active_blocks: Vec<Block>,
}

impl Base {
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::InvalidExtnLength);
        }
        let flags = raw[0];
        let steady = flags & FLAG_STEADY != 0;
        let hdr_len = if steady { STEADY_BASE_LEN } else { EPHEM_BASE_LEN };
        if raw.len() < hdr_len {
            return Err(Error::InvalidExtnLength);
        }
        let mut ts = [0u8; 4];
        ts.copy_from_slice(&raw[10..14]);
        let mut pld_hash = [0u8; 4];
        pld_hash.copy_from_slice(&raw[14..18]);
        let mut dvf = [0u8; 4];
        if !steady {
            dvf.copy_from_slice(&raw[18..22]);
        }
        let mut base = Base {
            steady,
            is_request: flags & FLAG_REQUEST != 0,
            best_effort: flags & FLAG_BEST_EFFORT != 0,
            accepted: flags & FLAG_ACCEPTED != 0,
            forward: flags & FLAG_FORWARD != 0,
            setup: flags & FLAG_SETUP != 0,
            version: raw[1],
            curr_hop: raw[2],
            total_hops: raw[3],
            curr_steady: raw[4],
            total_steady: raw[5],
            sof_index: raw[6],
            rel_steady_hop: 0,
            path_lens: [raw[7], raw[8], raw[9]],
            time_stamp: u32::from_be_bytes(ts),
            pld_hash,
            dvf,
            ids: Vec::new(),
            active_blocks: Vec::new(),
        };
        if base.total_steady == 0 || base.total_steady as usize > crate::types::MAX_STEADY_BLOCKS {
            return Err(Error::InvalidExtnLength);
        }
        if base.path_lens[..base.total_steady as usize]
            .iter()
            .any(|&l| l == 0)
        {
            return Err(Error::InvalidExtnLength);
        }
        base.update_indices()?;
        Ok(base)
    }

    pub fn header_len(&self) -> usize {
        if self.steady {
            STEADY_BASE_LEN
        } else {
            EPHEM_BASE_LEN
        }
    }

    fn flags(&self) -> u8 {
        let mut f = 0;
        if self.steady {
            f |= FLAG_STEADY;
        }
        if self.is_request {
            f |= FLAG_REQUEST;
        }
        if self.best_effort {
            f |= FLAG_BEST_EFFORT;
        }
        if self.accepted {
            f |= FLAG_ACCEPTED;
        }
        if self.forward {
            f |= FLAG_FORWARD;
        }
        if self.setup {
            f |= FLAG_SETUP;
        }
        f
    }

    pub fn write_header(&self, b: &mut [u8]) -> Result<()> {
        if b.len() < self.header_len() {
            return Err(Error::InvalidExtnLength);
        }
        b[0] = self.flags();
        b[1] = self.version;
        b[2] = self.curr_hop;
        b[3] = self.total_hops;
        b[4] = self.curr_steady;
        b[5] = self.total_steady;
        b[6] = self.sof_index;
        b[7..10].copy_from_slice(&self.path_lens);
        b[10..14].copy_from_slice(&self.time_stamp.to_be_bytes());
        b[14..18].copy_from_slice(&self.pld_hash);
        if !self.steady {
            b[18..22].copy_from_slice(&self.dvf);
        }
        Ok(())
    }

    pub fn ids_len(&self) -> usize {
        self.ids.iter().map(|id| id.len()).sum()
    }

    pub fn blocks_len(&self) -> usize {
        self.active_blocks.iter().map(|b| b.len()).sum()
    }

    pub fn len(&self) -> usize {
        let pre = self.header_len() + self.ids_len();
        pre + padding(pre) + self.blocks_len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Serializes header, id list, boundary padding and blocks. The
    /// buffer must be pre-sized to `len()`.
    pub fn write(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < self.len() {
            return Err(Error::InvalidExtnLength);
        }
        self.write_header(buf)?;
        let mut off = self.header_len();
        for id in &self.ids {
            id.write(&mut buf[off..off + id.len()]);
            off += id.len();
        }
        let pad = padding(off);
        buf[off..off + pad].fill(0);
        off += pad;
        for block in &self.active_blocks {
            block.write(&mut buf[off..off + block.len()])?;
            off += block.len();
        }
        Ok(())
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buf = alloc::vec![0u8; self.len()];
        self.write(&mut buf).expect("buffer sized");
        buf
    }

    fn sof_count(&self) -> usize {
        if self.steady {
            self.path_lens[..self.total_steady as usize]
                .iter()
                .map(|&l| l as usize)
                .sum()
        } else {
            self.total_hops as usize
        }
    }

    /// Recomputes `curr_steady`, `rel_steady_hop` and `curr_hop` from
    /// the SOF index and checks the wire counters agree (spec
    /// invariant: the counters are mutually consistent).
    pub fn update_indices(&mut self) -> Result<()> {
        if self.sof_index as usize >= self.sof_count().max(1) {
            return Err(Error::SofIndexRange);
        }
        let (cs, rel, hop) = if self.steady {
            // blocks are concatenated; a transfer AS owns the last SOF
            // of one block and the first of the next
            let mut cs = 0usize;
            let mut acc = 0usize;
            while cs + 1 < self.total_steady as usize
                && self.sof_index as usize >= acc + self.path_lens[cs] as usize
            {
                acc += self.path_lens[cs] as usize;
                cs += 1;
            }
            let rel = self.sof_index as usize - acc;
            (cs, rel, self.sof_index as usize - cs)
        } else {
            // one SOF per AS; block b starts at the AS that closes b-1
            let mut cs = 0usize;
            let mut acc = 0usize;
            while cs + 1 < self.total_steady as usize
                && self.sof_index as usize > acc + (self.path_lens[cs] as usize).saturating_sub(1)
            {
                acc += (self.path_lens[cs] as usize).saturating_sub(1);
                cs += 1;
            }
            let rel = self.sof_index as usize - acc;
            (cs, rel, self.sof_index as usize)
        };
        self.curr_steady = cs as u8;
        self.rel_steady_hop = rel as u8;
        if self.curr_hop as usize != hop {
            return Err(Error::SofIndexRange);
        }
        Ok(())
    }

    /// Advances the SOF index along the walk direction and refreshes the
    /// derived counters.
    pub fn next_sof_index(&mut self) -> Result<()> {
        if self.forward {
            if self.sof_index as usize + 1 >= self.sof_count() {
                return Err(Error::SofIndexRange);
            }
            self.sof_index += 1;
        } else {
            if self.sof_index == 0 {
                return Err(Error::SofIndexRange);
            }
            self.sof_index -= 1;
        }
        self.curr_hop = if self.steady {
            0 // recomputed below
        } else {
            self.sof_index
        };
        if self.steady {
            // recompute hop from scratch; update_indices checks it
            let mut cs = 0usize;
            let mut acc = 0usize;
            while cs + 1 < self.total_steady as usize
                && self.sof_index as usize >= acc + self.path_lens[cs] as usize
            {
                acc += self.path_lens[cs] as usize;
                cs += 1;
            }
            self.curr_hop = self.sof_index - cs as u8;
        }
        self.update_indices()
    }

    /// Earliest expiration tick over the carried blocks.
    pub fn expiry(&self) -> Result<crate::types::Tick> {
        self.active_blocks
            .iter()
            .map(|b| b.info.exp_tick)
            .min()
            .ok_or(Error::MissingExtension)
    }

    /// Whether the current hop sits between two stitched steady blocks.
    pub fn is_transfer(&self) -> bool {
        let trans_fwd = (self.curr_steady as usize) < self.total_steady as usize - 1
            && self.rel_steady_hop + 1 == self.path_lens[self.curr_steady as usize];
        let trans_rev = self.curr_steady != 0 && self.rel_steady_hop == 0;
        trans_fwd || trans_rev
    }

    pub fn last_hop(&self) -> bool {
        if self.forward {
            self.curr_hop + 1 == self.total_hops
        } else {
            self.curr_hop == 0
        }
    }

    pub fn first_hop(&self) -> bool {
        if self.forward {
            self.curr_hop == 0
        } else {
            self.curr_hop + 1 == self.total_hops
        }
    }

    pub fn curr_block(&self) -> Result<&Block> {
        let idx = if self.steady {
            self.curr_steady as usize
        } else {
            0
        };
        self.active_blocks.get(idx).ok_or(Error::MissingExtension)
    }

    pub fn curr_block_mut(&mut self) -> Result<&mut Block> {
        let idx = if self.steady {
            self.curr_steady as usize
        } else {
            0
        };
        self.active_blocks
            .get_mut(idx)
            .ok_or(Error::MissingExtension)
    }

    /// SOF index relative to the current block.
    pub fn curr_sof_idx(&self) -> usize {
        if self.steady {
            self.rel_steady_hop as usize
        } else {
            self.sof_index as usize
        }
    }

    pub fn curr_id(&self) -> Result<&ResvId> {
        let idx = if self.steady {
            self.curr_steady as usize
        } else {
            0
        };
        self.ids.get(idx).ok_or(Error::InvalidId)
    }

    /// Ids and path lens covered by the current hop's HA: the current
    /// steady pair for steady traffic, the full stitched set otherwise.
    pub fn verify_scope(&self) -> (Vec<ResvId>, Vec<u8>) {
        if self.steady {
            (
                alloc::vec![self.ids[self.curr_steady as usize]],
                alloc::vec![self.path_lens[self.curr_steady as usize]],
            )
        } else {
            (self.ids.clone(), self.path_lens.to_vec())
        }
    }

    fn ts_scale(&self) -> f64 {
        if self.steady {
            TS_TO_NANO_STEADY
        } else {
            TS_TO_NANO_EPHEM
        }
    }

    fn window_nanos(&self) -> u64 {
        if self.steady {
            STEADY_WINDOW_NANOS
        } else {
            EPHEM_WINDOW_NANOS
        }
    }

    /// Encodes the remaining lifetime of the first block into the
    /// timestamp. Steady setup requests carry no block and are skipped.
    pub fn update_timestamp(&mut self, now_nanos: u64) -> Result<()> {
        if self.steady && self.setup {
            return Ok(());
        }
        let exp = self
            .active_blocks
            .first()
            .ok_or(Error::MissingExtension)?
            .info
            .exp_tick
            .nanos();
        // the remaining window must be strictly positive
        if exp <= now_nanos {
            return Err(Error::Expired);
        }
        let remaining = exp - now_nanos;
        if remaining > self.window_nanos() {
            return Err(Error::TimestampWindow);
        }
        self.time_stamp = (remaining as f64 / self.ts_scale()) as u32;
        Ok(())
    }

    /// Checks that not too much time elapsed since the packet was
    /// constructed, budgeting per hop already passed. Request packets
    /// get the larger budget.
    pub fn validate_timestamp(&self, now_nanos: u64) -> Result<()> {
        if self.steady && self.setup {
            return Ok(());
        }
        let block = match self.active_blocks.first() {
            Some(b) => b,
            // empty extension: nothing to validate against
            None => return Ok(()),
        };
        let hops = if self.forward {
            self.curr_hop as u64 + 1
        } else {
            (self.total_hops - self.curr_hop) as u64
        };
        let exp = block.info.exp_tick.nanos();
        let ts = (self.time_stamp as f64 * self.ts_scale()) as u64;
        let constructed = exp.saturating_sub(ts);
        let budget = if self.is_request {
            MAX_REQUEST_HOP_NANOS
        } else {
            MAX_DATA_HOP_NANOS
        };
        if constructed.saturating_add(budget * hops) < now_nanos {
            return Err(Error::StaleTimestamp);
        }
        Ok(())
    }

    pub fn validate_pld_hash(&self, payload: &[u8]) -> Result<()> {
        if self.pld_hash != calc32(payload) {
            return Err(Error::BadPldHash);
        }
        Ok(())
    }

    /// Destination validation field over timestamp, payload hash and the
    /// full id list, keyed end to end.
    pub fn calc_dvf(&self, key: &MacKey) -> [u8; 4] {
        let mut input = [0u8; DVF_INPUT_LEN];
        input[..4].copy_from_slice(&self.time_stamp.to_be_bytes());
        input[4..8].copy_from_slice(&self.pld_hash);
        let mut off = 8;
        for id in &self.ids {
            input[off..off + id.len()].copy_from_slice(id.as_bytes());
            off += id.len();
        }
        let tag = key.mac(&input);
        let mut dvf = [0u8; 4];
        dvf.copy_from_slice(&tag[..4]);
        dvf
    }

    pub fn validate_dvf(&self, key: &MacKey) -> Result<()> {
        if self.dvf != self.calc_dvf(key) {
            return Err(Error::BadDvf);
        }
        Ok(())
    }

    /// Nonce binding sealed hop authenticators to this packet.
    pub fn seal_nonce(&self) -> [u8; 12] {
        seal::nonce(self.time_stamp, &self.pld_hash, &self.dvf)
    }

    /// Source-side write sequence: payload hash, timestamp, DVF
    /// (ephemeral), then every Reservation SOF becomes a Data SOF.
    pub fn write_source(
        &mut self,
        dvf_key: Option<&MacKey>,
        payload: &[u8],
        now_nanos: u64,
    ) -> Result<()> {
        self.pld_hash = calc32(payload);
        self.update_timestamp(now_nanos)?;
        if !self.steady {
            let key = dvf_key.ok_or(Error::Internal)?;
            self.dvf = self.calc_dvf(key);
        }
        let (pld_hash, ts) = (self.pld_hash, self.time_stamp);
        for block in &mut self.active_blocks {
            block.to_data(&pld_hash, ts)?;
        }
        Ok(())
    }

    /// Reverse-leg variant: rebinds payload hash, timestamp and DVF but
    /// leaves the Data SOFs untouched (their HAs are gone).
    pub fn write_reverse_source(
        &mut self,
        dvf_key: Option<&MacKey>,
        payload: &[u8],
        now_nanos: u64,
    ) -> Result<()> {
        self.pld_hash = calc32(payload);
        self.update_timestamp(now_nanos)?;
        if !self.steady {
            let key = dvf_key.ok_or(Error::Internal)?;
            self.dvf = self.calc_dvf(key);
        }
        Ok(())
    }

    /// Destination-side validation before anything is delivered:
    /// timestamp freshness, payload hash, and the DVF for ephemeral
    /// extensions.
    pub fn validate_dest(
        &self,
        dvf_key: Option<&MacKey>,
        payload: &[u8],
        now_nanos: u64,
    ) -> Result<()> {
        self.validate_timestamp(now_nanos)?;
        self.validate_pld_hash(payload)?;
        if !self.steady {
            let key = dvf_key.ok_or(Error::Internal)?;
            self.validate_dvf(key)?;
        }
        Ok(())
    }

    /// Flips the walk direction and latches the admission verdict.
    pub fn reverse(&mut self, accepted: bool) {
        self.forward = !self.forward;
        self.accepted = accepted;
    }
}
