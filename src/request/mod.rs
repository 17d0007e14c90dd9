//! Request payload riding in the packet payload of an admission walk.
//!
//! ```text
//! 0B       1        2        3        4        5        6        7
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! |    Total Len    |--AR|Typ| NumHops|               Data                |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | Data (var len.)                                                       |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | Authenticator 1 ...                                                   |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! ```
//!
//! After the typed body come `NumHops` 16-byte authenticator slots.
//! No authenticator generator exists yet, so the slots are emitted as
//! zero bytes to keep the wire length deterministic.

pub mod ephem;
pub mod steady;

pub use ephem::{EphemClean, EphemFailed, EphemReq};
pub use steady::{ConfirmIndex, Offer, SteadyReq, SteadySucc};

use crate::packet::block::Block;
use crate::types::{Error, Result};
use alloc::vec::Vec;

pub const AUTH_LEN: usize = 16;
pub const MIN_PLD_LEN: usize = 4;

const FLAG_ACCEPTED: u8 = 0x20;
const FLAG_RESPONSE: u8 = 0x10;
const FLAG_TYPE: u8 = 0x0f;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DataType {
    SteadySetup,
    SteadyRenewal,
    SteadyTelescopeSetup,
    SteadyConfIndex,
    SteadyTearDown,
    SteadyCleanUp,
    EphemSetup,
    EphemRenewal,
    EphemCleanUp,
}

impl DataType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(DataType::SteadySetup),
            1 => Ok(DataType::SteadyRenewal),
            2 => Ok(DataType::SteadyTelescopeSetup),
            3 => Ok(DataType::SteadyConfIndex),
            4 => Ok(DataType::SteadyTearDown),
            5 => Ok(DataType::SteadyCleanUp),
            6 => Ok(DataType::EphemSetup),
            7 => Ok(DataType::EphemRenewal),
            8 => Ok(DataType::EphemCleanUp),
            _ => Err(Error::UnknownRequestType),
        }
    }

    pub fn to_u8(&self) -> u8 {
        match self {
            DataType::SteadySetup => 0,
            DataType::SteadyRenewal => 1,
            DataType::SteadyTelescopeSetup => 2,
            DataType::SteadyConfIndex => 3,
            DataType::SteadyTearDown => 4,
            DataType::SteadyCleanUp => 5,
            DataType::EphemSetup => 6,
            DataType::EphemRenewal => 7,
            DataType::EphemCleanUp => 8,
        }
    }

    pub fn is_steady(&self) -> bool {
        self.to_u8() <= 5
    }
}

impl core::fmt::Display for DataType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DataType::SteadySetup => "steady setup",
            DataType::SteadyRenewal => "steady renewal",
            DataType::SteadyTelescopeSetup => "steady telescoped setup",
            DataType::SteadyConfIndex => "steady confirm index",
            DataType::SteadyTearDown => "steady tear down",
            DataType::SteadyCleanUp => "steady clean up",
            DataType::EphemSetup => "ephemeral setup",
            DataType::EphemRenewal => "ephemeral renewal",
            DataType::EphemCleanUp => "ephemeral clean up",
        };
        f.write_str(s)
    }
}

/// Typed request body.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Data {
    SteadyReq(SteadyReq),
    SteadySucc(SteadySucc),
    ConfirmIndex(ConfirmIndex),
    EphemReq(EphemReq),
    EphemFailed(EphemFailed),
    EphemClean(EphemClean),
}

impl Data {
    pub fn len(&self) -> usize {
        match self {
            Data::SteadyReq(d) => d.len(),
            Data::SteadySucc(d) => d.len(),
            Data::ConfirmIndex(d) => d.len(),
            Data::EphemReq(d) => d.len(),
            Data::EphemFailed(d) => d.len(),
            Data::EphemClean(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn is_steady(&self) -> bool {
        matches!(
            self,
            Data::SteadyReq(_) | Data::SteadySucc(_) | Data::ConfirmIndex(_)
        )
    }

    fn write(&self, b: &mut [u8]) -> Result<()> {
        match self {
            Data::SteadyReq(d) => d.write(b),
            Data::SteadySucc(d) => d.write(b),
            Data::ConfirmIndex(d) => d.write(b),
            Data::EphemReq(d) => d.write(b),
            Data::EphemFailed(d) => d.write(b),
            Data::EphemClean(d) => d.write(b),
        }
    }
}

/// A request or response payload of the admission walk.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Pld {
    pub data_type: DataType,
    pub response: bool,
    pub accepted: bool,
    pub num_hops: u8,
    pub data: Data,
    pub auths: Vec<[u8; AUTH_LEN]>,
}

impl Pld {
    pub fn new(data_type: DataType, num_hops: u8, accepted: bool, data: Data) -> Self {
        Pld {
            data_type,
            response: false,
            accepted,
            num_hops,
            data,
            auths: alloc::vec![[0u8; AUTH_LEN]; num_hops as usize],
        }
    }

    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        if raw.len() < MIN_PLD_LEN {
            return Err(Error::InvalidExtnLength);
        }
        let total_len = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        if raw.len() != total_len {
            return Err(Error::InvalidExtnLength);
        }
        let data_type = DataType::from_u8(raw[2] & FLAG_TYPE)?;
        let response = raw[2] & FLAG_RESPONSE != 0;
        let accepted = raw[2] & FLAG_ACCEPTED != 0;
        let num_hops = raw[3];
        let body = &raw[MIN_PLD_LEN..];
        let data = Self::parse_data(data_type, response, accepted, num_hops, body)?;
        let auths = Self::parse_auths(&body[data.len()..], num_hops as usize)?;
        Ok(Pld {
            data_type,
            response,
            accepted,
            num_hops,
            data,
            auths,
        })
    }

    fn parse_data(
        data_type: DataType,
        response: bool,
        accepted: bool,
        num_hops: u8,
        raw: &[u8],
    ) -> Result<Data> {
        match data_type {
            DataType::SteadySetup | DataType::SteadyRenewal | DataType::SteadyTelescopeSetup => {
                if response && accepted {
                    Ok(Data::SteadySucc(SteadySucc::from_raw(
                        raw,
                        num_hops as usize,
                    )?))
                } else {
                    Ok(Data::SteadyReq(SteadyReq::from_raw(
                        raw,
                        data_type,
                        num_hops as usize,
                    )?))
                }
            }
            DataType::SteadyConfIndex => Ok(Data::ConfirmIndex(ConfirmIndex::from_raw(raw)?)),
            DataType::EphemSetup | DataType::EphemRenewal => {
                let setup = data_type == DataType::EphemSetup;
                if accepted {
                    Ok(Data::EphemReq(EphemReq::from_raw(
                        raw,
                        setup,
                        num_hops as usize,
                    )?))
                } else {
                    Ok(Data::EphemFailed(EphemFailed::from_raw(
                        raw,
                        setup,
                        num_hops as usize,
                    )?))
                }
            }
            DataType::EphemCleanUp => Ok(Data::EphemClean(EphemClean::from_raw(raw)?)),
            DataType::SteadyTearDown | DataType::SteadyCleanUp => Err(Error::NotSupported),
        }
    }

    fn parse_auths(raw: &[u8], num_hops: usize) -> Result<Vec<[u8; AUTH_LEN]>> {
        if raw.len() != num_hops * AUTH_LEN {
            return Err(Error::InvalidExtnLength);
        }
        let mut auths = Vec::with_capacity(num_hops);
        for chunk in raw.chunks_exact(AUTH_LEN) {
            let mut a = [0u8; AUTH_LEN];
            a.copy_from_slice(chunk);
            auths.push(a);
        }
        Ok(auths)
    }

    pub fn len(&self) -> usize {
        MIN_PLD_LEN + self.data.len() + self.auths.len() * AUTH_LEN
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn write(&self, raw: &mut [u8]) -> Result<()> {
        let total = self.len();
        if raw.len() < total {
            return Err(Error::InvalidExtnLength);
        }
        raw[..2].copy_from_slice(&(total as u16).to_be_bytes());
        raw[2] = self.data_type.to_u8();
        if self.response {
            raw[2] |= FLAG_RESPONSE;
        }
        if self.accepted {
            raw[2] |= FLAG_ACCEPTED;
        }
        raw[3] = self.num_hops;
        let auth_off = MIN_PLD_LEN + self.data.len();
        self.data.write(&mut raw[MIN_PLD_LEN..auth_off])?;
        let mut off = auth_off;
        for auth in &self.auths {
            raw[off..off + AUTH_LEN].copy_from_slice(auth);
            off += AUTH_LEN;
        }
        Ok(())
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut raw = alloc::vec![0u8; self.len()];
        self.write(&mut raw).expect("buffer sized");
        raw
    }

    /// Request → response. An accepted steady request turns into a
    /// success carrying a fresh Control block whose info copies the
    /// request info with the accumulated bandwidth.
    pub fn reverse(&mut self) -> Result<()> {
        if self.response {
            return Err(Error::InvalidFlagCombo);
        }
        self.response = true;
        if let Data::SteadyReq(req) = &self.data {
            if self.accepted {
                let mut info = req.info;
                info.bw_cls = req.acc_bw;
                self.data = Data::SteadySucc(SteadySucc {
                    block: Block::new_control(info, self.num_hops as usize),
                });
            }
        }
        Ok(())
    }
}

impl core::fmt::Display for Pld {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "type: {} response: {} accepted: {} hops: {}",
            self.data_type, self.response, self.accepted, self.num_hops
        )
    }
}
