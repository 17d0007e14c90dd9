//! SIBRA opaque fields, the per-hop reservation tokens.
//!
//! Data SOF (8B):
//!
//! ```text
//! 0B       1        2        3        4        5        6        7
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! |c|   Typ| Ingress IF | Egress IF   | HVF                               |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! HVF = H(TS | PldHash | dec(HA))[..4]
//! ```
//!
//! Control SOFs (44B) carry the hop AS and the sealed hop authenticator;
//! Reservation SOFs (28B) carry the hop AS and the plaintext HA and only
//! exist inside local reservation stores. A Control SOF exists only on
//! the wire of an admission walk; a Data SOF only on data packets.

use crate::crypto::hash::calc32;
use crate::crypto::mac::SvMac;
use crate::crypto::seal;
use crate::packet::info::{Info, INFO_LEN};
use crate::types::{AsId, Error, IfId, ResvId, Result, MAX_PATH_IDS_LEN};
use alloc::vec::Vec;

pub const HVF_LEN: usize = 4;
pub const HA_LEN: usize = 16;
pub const ENC_HA_LEN: usize = HA_LEN + seal::TAG_SIZE;
pub const DATA_SOF_LEN: usize = 8;
pub const CONTROL_SOF_LEN: usize = 4 + AsId::LEN + ENC_HA_LEN;
pub const RESV_SOF_LEN: usize = 4 + AsId::LEN + HA_LEN;
pub const MIN_SOF_LEN: usize = DATA_SOF_LEN;

// HA MAC input: ifids | info | ids zero-padded to capacity | path lens,
// rounded up to the cipher block size.
pub const HA_INPUT_LEN: usize = 64;
// HVF input: ts | pld hash | decrypted HA.
pub const HVF_INPUT_LEN: usize = 4 + 4 + HA_LEN;

const FLAG_CONTINUE: u8 = 0x80;
const FLAG_TYPE: u8 = 0x03;

/// Variant payload of an opaque field. The tag decides the wire length.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SofToken {
    Data { hvf: [u8; HVF_LEN] },
    Control { hop_as: AsId, enc_ha: [u8; ENC_HA_LEN] },
    Reservation { hop_as: AsId, ha: [u8; HA_LEN] },
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SofField {
    pub ingress: IfId,
    pub egress: IfId,
    pub token: SofToken,
}

impl SofField {
    /// Fresh Data SOF with a zero HVF.
    pub fn new_data(ingress: IfId, egress: IfId) -> Self {
        SofField {
            ingress,
            egress,
            token: SofToken::Data { hvf: [0; HVF_LEN] },
        }
    }

    /// Fresh Control SOF with a zero authenticator.
    pub fn new_control(ingress: IfId, egress: IfId) -> Self {
        SofField {
            ingress,
            egress,
            token: SofToken::Control {
                hop_as: AsId::default(),
                enc_ha: [0; ENC_HA_LEN],
            },
        }
    }

    pub fn from_raw(b: &[u8]) -> Result<Self> {
        if b.len() < MIN_SOF_LEN {
            return Err(Error::SofTooShort);
        }
        // Continue bit is reserved: ignored on read, zero on write.
        let typ = b[0] & FLAG_TYPE;
        let ingress = IfId(((b[1] as u16) << 4) | ((b[2] as u16) >> 4));
        let egress = IfId((((b[2] & 0x0f) as u16) << 8) | b[3] as u16);
        let token = match typ {
            0 => {
                let mut hvf = [0u8; HVF_LEN];
                hvf.copy_from_slice(&b[4..4 + HVF_LEN]);
                SofToken::Data { hvf }
            }
            1 => {
                if b.len() < CONTROL_SOF_LEN {
                    return Err(Error::SofTooShort);
                }
                let mut enc_ha = [0u8; ENC_HA_LEN];
                enc_ha.copy_from_slice(&b[12..12 + ENC_HA_LEN]);
                SofToken::Control {
                    hop_as: AsId::from_raw(&b[4..12]),
                    enc_ha,
                }
            }
            2 => {
                if b.len() < RESV_SOF_LEN {
                    return Err(Error::SofTooShort);
                }
                let mut ha = [0u8; HA_LEN];
                ha.copy_from_slice(&b[12..12 + HA_LEN]);
                SofToken::Reservation {
                    hop_as: AsId::from_raw(&b[4..12]),
                    ha,
                }
            }
            _ => return Err(Error::InvalidSofType),
        };
        Ok(SofField {
            ingress,
            egress,
            token,
        })
    }

    pub fn len(&self) -> usize {
        match self.token {
            SofToken::Data { .. } => DATA_SOF_LEN,
            SofToken::Control { .. } => CONTROL_SOF_LEN,
            SofToken::Reservation { .. } => RESV_SOF_LEN,
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn type_tag(&self) -> u8 {
        match self.token {
            SofToken::Data { .. } => 0,
            SofToken::Control { .. } => 1,
            SofToken::Reservation { .. } => 2,
        }
    }

    pub fn write(&self, b: &mut [u8]) -> Result<()> {
        if b.len() < self.len() {
            return Err(Error::SofTooShort);
        }
        b[0] = self.type_tag();
        self.write_ifids(&mut b[1..4]);
        match &self.token {
            SofToken::Data { hvf } => b[4..8].copy_from_slice(hvf),
            SofToken::Control { hop_as, enc_ha } => {
                hop_as.write(&mut b[4..12]);
                b[12..12 + ENC_HA_LEN].copy_from_slice(enc_ha);
            }
            SofToken::Reservation { hop_as, ha } => {
                hop_as.write(&mut b[4..12]);
                b[12..12 + HA_LEN].copy_from_slice(ha);
            }
        }
        Ok(())
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut b = alloc::vec![0u8; self.len()];
        self.write(&mut b).expect("buffer sized");
        b
    }

    fn write_ifids(&self, b: &mut [u8]) {
        b[0] = (self.ingress.0 >> 4) as u8;
        b[1] = (((self.ingress.0 & 0x0f) << 4) | (self.egress.0 >> 8)) as u8;
        b[2] = (self.egress.0 & 0xff) as u8;
    }

    /// MAC input for the hop authenticator, fixed order: interfaces,
    /// info, path ids zero-padded to full capacity, path lengths.
    fn ha_input(&self, info: &Info, ids: &[ResvId], path_lens: &[u8]) -> [u8; HA_INPUT_LEN] {
        let mut all = [0u8; HA_INPUT_LEN];
        self.write_ifids(&mut all[..3]);
        info.write(&mut all[3..3 + INFO_LEN]);
        let mut off = 3 + INFO_LEN;
        for id in ids {
            id.write(&mut all[off..off + id.len()]);
            off += id.len();
        }
        let plens_off = 3 + INFO_LEN + MAX_PATH_IDS_LEN;
        all[plens_off..plens_off + path_lens.len().min(3)]
            .copy_from_slice(&path_lens[..path_lens.len().min(3)]);
        all
    }

    /// Recomputes the decrypted hop authenticator from the per-AS secret
    /// value. Any router holding the same secret derives the same bytes.
    pub fn calc_ha(
        &self,
        sv_mac: &mut dyn SvMac,
        info: &Info,
        ids: &[ResvId],
        path_lens: &[u8],
    ) -> [u8; HA_LEN] {
        let tag = sv_mac.mac(&self.ha_input(info, ids, path_lens));
        let mut ha = [0u8; HA_LEN];
        ha.copy_from_slice(&tag[..HA_LEN]);
        ha
    }

    /// Per-packet hop verification field from the decrypted HA.
    pub fn calc_hvf(pld_hash: &[u8; 4], ts: u32, dec_ha: &[u8; HA_LEN]) -> [u8; HVF_LEN] {
        let mut all = [0u8; HVF_INPUT_LEN];
        all[..4].copy_from_slice(&ts.to_be_bytes());
        all[4..8].copy_from_slice(pld_hash);
        all[8..].copy_from_slice(dec_ha);
        calc32(&all)
    }

    /// Verifies a Data SOF against a locally derived hop authenticator.
    pub fn verify_hvf(
        &self,
        sv_mac: &mut dyn SvMac,
        info: &Info,
        ids: &[ResvId],
        path_lens: &[u8],
        pld_hash: &[u8; 4],
        ts: u32,
    ) -> Result<()> {
        let hvf = match &self.token {
            SofToken::Data { hvf } => hvf,
            _ => return Err(Error::InvalidSofType),
        };
        let dec_ha = self.calc_ha(sv_mac, info, ids, path_lens);
        let expected = Self::calc_hvf(pld_hash, ts, &dec_ha);
        if subtle::ConstantTimeEq::ct_eq(&expected[..], &hvf[..]).unwrap_u8() != 1 {
            return Err(Error::BadHvf);
        }
        Ok(())
    }

    /// Computes this hop's authenticator, seals it, and stamps the SOF
    /// as a Control field for `hop_as`.
    pub fn set_ha(
        &mut self,
        sv_mac: &mut dyn SvMac,
        key: &[u8; 32],
        nonce: &[u8; 12],
        hop_as: AsId,
        info: &Info,
        ids: &[ResvId],
        path_lens: &[u8],
    ) -> Result<()> {
        let ha = self.calc_ha(sv_mac, info, ids, path_lens);
        let sealed = seal::seal(&ha, key, nonce)?;
        let mut enc_ha = [0u8; ENC_HA_LEN];
        enc_ha.copy_from_slice(&sealed);
        self.token = SofToken::Control { hop_as, enc_ha };
        Ok(())
    }

    /// Control → Reservation: opens the sealed authenticator in place.
    /// Reservation SOFs pass through; Data SOFs cannot go back.
    pub fn to_reservation(&mut self, key: &[u8; 32], nonce: &[u8; 12]) -> Result<()> {
        match &self.token {
            SofToken::Data { .. } => Err(Error::InvalidSofType),
            SofToken::Reservation { .. } => Ok(()),
            SofToken::Control { hop_as, enc_ha } => {
                let opened = seal::open(enc_ha, key, nonce)?;
                if opened.len() != HA_LEN {
                    return Err(Error::BadHopAuthenticator);
                }
                let mut ha = [0u8; HA_LEN];
                ha.copy_from_slice(&opened);
                self.token = SofToken::Reservation {
                    hop_as: *hop_as,
                    ha,
                };
                Ok(())
            }
        }
    }

    /// Reservation → Control: reseals the authenticator in place.
    pub fn to_control(&mut self, key: &[u8; 32], nonce: &[u8; 12]) -> Result<()> {
        match &self.token {
            SofToken::Data { .. } => Err(Error::InvalidSofType),
            SofToken::Control { .. } => Ok(()),
            SofToken::Reservation { hop_as, ha } => {
                let sealed = seal::seal(ha, key, nonce)?;
                let mut enc_ha = [0u8; ENC_HA_LEN];
                enc_ha.copy_from_slice(&sealed);
                self.token = SofToken::Control {
                    hop_as: *hop_as,
                    enc_ha,
                };
                Ok(())
            }
        }
    }

    /// Reservation → Data: derives the per-packet HVF from the stored
    /// authenticator and clears the hop AS and HA. Terminal transition.
    pub fn to_data(&mut self, pld_hash: &[u8; 4], ts: u32) -> Result<()> {
        match &self.token {
            SofToken::Data { .. } | SofToken::Control { .. } => Err(Error::InvalidSofType),
            SofToken::Reservation { ha, .. } => {
                let hvf = Self::calc_hvf(pld_hash, ts, ha);
                self.token = SofToken::Data { hvf };
                Ok(())
            }
        }
    }
}

impl core::fmt::Display for SofField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = match self.token {
            SofToken::Data { .. } => "data",
            SofToken::Control { .. } => "control",
            SofToken::Reservation { .. } => "reservation",
        };
        write!(
            f,
            "type: {} ingress: {} egress: {}",
            kind, self.ingress, self.egress
        )
    }
}
