//! Minimal transport abstraction for control-plane packets. The real
//! datagram stack lives outside the core; implementors move an
//! extension + payload pair toward the destination of `meta`.

use crate::packet::Extension;
use crate::request::Pld;
use crate::types::{AsId, HostAddr, Result};

/// Outer-datagram addressing relevant to the core: source and
/// destination AS and host of the packet in flight.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PacketMeta {
    pub src_as: AsId,
    pub src_host: HostAddr,
    pub dst_as: AsId,
    pub dst_host: HostAddr,
}

impl PacketMeta {
    pub fn reverse(&mut self) {
        core::mem::swap(&mut self.src_as, &mut self.dst_as);
        core::mem::swap(&mut self.src_host, &mut self.dst_host);
    }

    pub fn reversed(&self) -> PacketMeta {
        let mut m = *self;
        m.reverse();
        m
    }
}

/// A control-plane packet of the admission walk.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SibraPkt {
    pub meta: PacketMeta,
    pub extn: Extension,
    pub pld: Pld,
}

#[cfg(feature = "std")]
pub trait Transport: Send + Sync {
    fn send(&self, pkt: SibraPkt) -> Result<()>;
}

/// Loopback transport delivering into a channel, for tests and local
/// wiring.
#[cfg(feature = "std")]
pub struct ChannelTransport {
    tx: std::sync::Mutex<std::sync::mpsc::Sender<SibraPkt>>,
}

#[cfg(feature = "std")]
impl ChannelTransport {
    pub fn new() -> (Self, std::sync::mpsc::Receiver<SibraPkt>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (
            ChannelTransport {
                tx: std::sync::Mutex::new(tx),
            },
            rx,
        )
    }
}

#[cfg(feature = "std")]
impl Transport for ChannelTransport {
    fn send(&self, pkt: SibraPkt) -> Result<()> {
        self.tx
            .lock()
            .expect("transport poisoned")
            .send(pkt)
            .map_err(|_| crate::types::Error::Transport)
    }
}
