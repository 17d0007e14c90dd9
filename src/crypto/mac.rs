use crate::types::{Error, Result};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const MAC_LEN: usize = 32;
pub const TRUNC_LEN: usize = 16;

/// Symmetric MAC key handle. Two parties holding the same key compute
/// byte-equal tags, which is what lets any on-path AS reconstruct a hop
/// authenticator independently.
#[derive(Clone)]
pub struct MacKey(pub [u8; 32]);

impl MacKey {
    pub fn mac(&self, data: &[u8]) -> [u8; MAC_LEN] {
        mac_full(&self.0, data)
    }

    pub fn mac_trunc16(&self, data: &[u8]) -> [u8; TRUNC_LEN] {
        mac_trunc16(&self.0, data)
    }
}

/// Seam over the per-AS secret-value MAC: either a plain key (tests,
/// control plane) or an exclusively held pool handle (data plane).
pub trait SvMac {
    fn mac(&mut self, data: &[u8]) -> [u8; MAC_LEN];
}

impl SvMac for MacKey {
    fn mac(&mut self, data: &[u8]) -> [u8; MAC_LEN] {
        mac_full(&self.0, data)
    }
}

#[cfg(feature = "std")]
impl SvMac for MacHandle<'_> {
    fn mac(&mut self, data: &[u8]) -> [u8; MAC_LEN] {
        self.compute(data)
    }
}

pub fn mac_full(key: &[u8], data: &[u8]) -> [u8; MAC_LEN] {
    let mut mac = <HmacSha256 as KeyInit>::new_from_slice(key).expect("key len");
    Mac::update(&mut mac, data);
    Mac::finalize(mac).into_bytes().into()
}

pub fn mac_trunc16(key: &[u8], data: &[u8]) -> [u8; TRUNC_LEN] {
    let tag = mac_full(key, data);
    let mut out = [0u8; TRUNC_LEN];
    out.copy_from_slice(&tag[..TRUNC_LEN]);
    out
}

pub fn verify_trunc16(key: &[u8], data: &[u8], tag: &[u8; TRUNC_LEN]) -> Result<()> {
    let expected = mac_trunc16(key, data);
    if subtle::ConstantTimeEq::ct_eq(&expected[..], &tag[..]).unwrap_u8() == 1 {
        Ok(())
    } else {
        Err(Error::BadHopAuthenticator)
    }
}

/// Bounded pool of prepared MAC contexts over the per-AS secret value.
/// Acquire blocks while the pool is drained; release never blocks. A
/// handle is exclusively owned while held.
#[cfg(feature = "std")]
pub struct MacPool {
    inner: std::sync::Mutex<alloc::vec::Vec<HmacSha256>>,
    available: std::sync::Condvar,
}

#[cfg(feature = "std")]
impl MacPool {
    pub fn new(sv: &crate::types::Sv, size: usize) -> Self {
        let mut handles = alloc::vec::Vec::with_capacity(size);
        for _ in 0..size.max(1) {
            handles.push(<HmacSha256 as KeyInit>::new_from_slice(&sv.0).expect("key len"));
        }
        MacPool {
            inner: std::sync::Mutex::new(handles),
            available: std::sync::Condvar::new(),
        }
    }

    pub fn acquire(&self) -> MacHandle<'_> {
        let mut handles = self.inner.lock().expect("mac pool poisoned");
        loop {
            if let Some(mac) = handles.pop() {
                return MacHandle {
                    pool: self,
                    mac: Some(mac),
                };
            }
            handles = self.available.wait(handles).expect("mac pool poisoned");
        }
    }

    fn release(&self, mac: HmacSha256) {
        self.inner.lock().expect("mac pool poisoned").push(mac);
        self.available.notify_one();
    }
}

/// Exclusively held MAC context, returned to the pool on drop.
#[cfg(feature = "std")]
pub struct MacHandle<'a> {
    pool: &'a MacPool,
    mac: Option<HmacSha256>,
}

#[cfg(feature = "std")]
impl MacHandle<'_> {
    pub fn compute(&mut self, data: &[u8]) -> [u8; MAC_LEN] {
        let mac = self.mac.as_mut().expect("handle live");
        Mac::update(mac, data);
        mac.finalize_reset().into_bytes().into()
    }
}

#[cfg(feature = "std")]
impl Drop for MacHandle<'_> {
    fn drop(&mut self) {
        if let Some(mac) = self.mac.take() {
            self.pool.release(mac);
        }
    }
}
