//! Steady request bodies: the bandwidth request walked hop by hop, the
//! accepted-response block, and the index confirmation.

use crate::packet::block::Block;
use crate::packet::info::{Info, INFO_LEN};
use crate::request::{Data, DataType, Pld};
use crate::types::{BwCls, EndProps, Error, Index, Result, SplitCls, State};
use alloc::vec::Vec;

pub const OFFER_LEN: usize = 3;
const STEADY_REQ_FIXED: usize = INFO_LEN + 6 + 2;
const CONFIRM_LEN: usize = 8;

/// Per-hop offer recorded during the walk.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Offer {
    pub alloc_bw: BwCls,
    pub max_bw: BwCls,
    pub line_len: u8,
}

/// Bandwidth request for steady setup, renewal, and telescoped setup.
/// Hops shrink `acc_bw` to what they allocate and record their offer;
/// a rejecting hop stamps `fail_hop`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SteadyReq {
    pub data_type: DataType,
    pub info: Info,
    pub min_bw: BwCls,
    pub max_bw: BwCls,
    pub acc_bw: BwCls,
    pub end_props: EndProps,
    pub split: SplitCls,
    pub fail_hop: u8,
    pub offers: Vec<Offer>,
}

impl SteadyReq {
    pub fn from_raw(raw: &[u8], data_type: DataType, num_hops: usize) -> Result<Self> {
        if raw.len() < STEADY_REQ_FIXED + num_hops * OFFER_LEN {
            return Err(Error::InvalidExtnLength);
        }
        let info = Info::from_raw(&raw[..INFO_LEN])?;
        let mut offers = Vec::with_capacity(num_hops);
        let mut off = STEADY_REQ_FIXED;
        for _ in 0..num_hops {
            offers.push(Offer {
                alloc_bw: BwCls(raw[off]),
                max_bw: BwCls(raw[off + 1]),
                line_len: raw[off + 2],
            });
            off += OFFER_LEN;
        }
        Ok(SteadyReq {
            data_type,
            info,
            min_bw: BwCls(raw[8]),
            max_bw: BwCls(raw[9]),
            acc_bw: BwCls(raw[10]),
            end_props: EndProps(raw[11]),
            split: SplitCls(raw[12]),
            fail_hop: raw[13],
            offers,
        })
    }

    pub fn len(&self) -> usize {
        STEADY_REQ_FIXED + self.offers.len() * OFFER_LEN
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn write(&self, b: &mut [u8]) -> Result<()> {
        if b.len() < self.len() {
            return Err(Error::InvalidExtnLength);
        }
        self.info.write(&mut b[..INFO_LEN]);
        b[8] = self.min_bw.0;
        b[9] = self.max_bw.0;
        b[10] = self.acc_bw.0;
        b[11] = self.end_props.0;
        b[12] = self.split.0;
        b[13] = self.fail_hop;
        b[14] = 0;
        b[15] = 0;
        let mut off = STEADY_REQ_FIXED;
        for offer in &self.offers {
            b[off] = offer.alloc_bw.0;
            b[off + 1] = offer.max_bw.0;
            b[off + 2] = offer.line_len;
            off += OFFER_LEN;
        }
        Ok(())
    }

    /// Largest bandwidth class every hop on the walk could still grant.
    /// Rejected requests keep walking to the end AS, so by the time a
    /// reply reaches the source all offer fields are populated.
    pub fn min_offer(&self) -> BwCls {
        self.offers
            .iter()
            .map(|o| o.max_bw)
            .min()
            .unwrap_or(BwCls(0))
    }
}

/// Accepted steady response: the issued Control block rides back to the
/// source.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SteadySucc {
    pub block: Block,
}

impl SteadySucc {
    pub fn from_raw(raw: &[u8], num_hops: usize) -> Result<Self> {
        Ok(SteadySucc {
            block: Block::from_raw(raw, num_hops)?,
        })
    }

    pub fn len(&self) -> usize {
        self.block.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn write(&self, b: &mut [u8]) -> Result<()> {
        self.block.write(b)
    }
}

/// Confirms a reservation index into Pending or Active.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ConfirmIndex {
    pub idx: Index,
    pub state: State,
}

impl ConfirmIndex {
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        if raw.len() < CONFIRM_LEN {
            return Err(Error::InvalidExtnLength);
        }
        Ok(ConfirmIndex {
            idx: Index(raw[0]),
            state: State::from_u8(raw[1])?,
        })
    }

    pub fn len(&self) -> usize {
        CONFIRM_LEN
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn write(&self, b: &mut [u8]) -> Result<()> {
        if b.len() < CONFIRM_LEN {
            return Err(Error::InvalidExtnLength);
        }
        b[..CONFIRM_LEN].fill(0);
        b[0] = self.idx.0;
        b[1] = self.state.to_u8();
        Ok(())
    }
}

/// Builds a steady request payload with initialized offer fields. The
/// requesting end stamps its own offer: the last field for reversed
/// path types, the first otherwise.
pub fn steady_req_pld(
    data_type: DataType,
    info: Info,
    min: BwCls,
    max: BwCls,
    props: EndProps,
    split: SplitCls,
    num_hops: usize,
) -> Pld {
    let mut offers = alloc::vec![Offer::default(); num_hops];
    let own = if info.path_type.reversed() {
        num_hops - 1
    } else {
        0
    };
    offers[own].alloc_bw = max;
    let req = SteadyReq {
        data_type,
        info,
        min_bw: min,
        max_bw: max,
        acc_bw: max,
        end_props: props,
        split,
        fail_hop: 0,
        offers,
    };
    Pld::new(data_type, num_hops as u8, true, Data::SteadyReq(req))
}

/// Builds an index confirmation payload.
pub fn confirm_index_pld(idx: Index, state: State, num_hops: usize) -> Pld {
    Pld::new(
        DataType::SteadyConfIndex,
        num_hops as u8,
        true,
        Data::ConfirmIndex(ConfirmIndex { idx, state }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PathType, Rlc, Tick};

    fn info(pt: PathType) -> Info {
        Info {
            exp_tick: Tick(99),
            bw_cls: BwCls(7),
            rlc: Rlc(2),
            index: Index(4),
            path_type: pt,
            fail_hop: 0,
        }
    }

    #[test]
    fn own_offer_position_follows_direction() {
        let up = steady_req_pld(
            DataType::SteadySetup,
            info(PathType::Up),
            BwCls(1),
            BwCls(7),
            EndProps::default(),
            SplitCls::default(),
            3,
        );
        match &up.data {
            Data::SteadyReq(r) => assert_eq!(r.offers[0].alloc_bw, BwCls(7)),
            _ => unreachable!(),
        }
        let down = steady_req_pld(
            DataType::SteadySetup,
            info(PathType::Down),
            BwCls(1),
            BwCls(7),
            EndProps::default(),
            SplitCls::default(),
            3,
        );
        match &down.data {
            Data::SteadyReq(r) => assert_eq!(r.offers[2].alloc_bw, BwCls(7)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn confirm_index_round_trips() {
        let pld = confirm_index_pld(Index(3), State::Pending, 2);
        let parsed = Pld::from_raw(&pld.pack()).expect("parse");
        assert_eq!(parsed, pld);
    }
}
