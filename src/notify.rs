//! Reply notification registry: replies arriving at the local service
//! are matched to the requester that is waiting for them. At most one
//! listener per key; every listener is deregistered on all exit paths
//! of its requester.

use crate::packet::Extension;
use crate::request::{Data, DataType, Pld};
use crate::transport::SibraPkt;
use crate::types::{Error, Index, ResvId, Result};
use std::collections::HashMap;
use std::sync::mpsc::SyncSender;
use std::sync::Mutex;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NotifyKey {
    pub id: ResvId,
    pub idx: Index,
    pub req_type: DataType,
}

impl NotifyKey {
    /// Derives the listener key for an incoming reply: the reservation
    /// id named by the payload (or the extension's current id) plus the
    /// payload's index and type.
    pub fn from_reply(extn: &Extension, pld: &Pld) -> Result<NotifyKey> {
        let (id, idx) = match &pld.data {
            Data::EphemReq(r) => (r.id, r.block.info.index),
            Data::EphemFailed(r) => (r.id, r.info.index),
            Data::EphemClean(r) => (r.id, r.info.index),
            Data::SteadyReq(r) => (None, r.info.index),
            Data::SteadySucc(r) => (None, r.block.info.index),
            Data::ConfirmIndex(r) => (None, r.idx),
        };
        let id = match id {
            Some(id) => id,
            None => *extn.base().curr_id()?,
        };
        Ok(NotifyKey {
            id,
            idx,
            req_type: pld.data_type,
        })
    }
}

#[derive(Clone, Debug)]
pub struct NotifyEvent {
    pub pkt: SibraPkt,
}

#[derive(Default)]
pub struct NotifyRegistry {
    notify: Mutex<HashMap<NotifyKey, SyncSender<NotifyEvent>>>,
}

impl NotifyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Rejected if one already exists for the
    /// key; the newly started requester fails in that case.
    pub fn register(&self, key: NotifyKey, tx: SyncSender<NotifyEvent>) -> Result<()> {
        let mut map = self.notify.lock().expect("registry poisoned");
        if map.contains_key(&key) {
            return Err(Error::NotifyConflict);
        }
        map.insert(key, tx);
        Ok(())
    }

    pub fn deregister(&self, key: &NotifyKey) {
        self.notify.lock().expect("registry poisoned").remove(key);
    }

    /// Hands a reply to the registered listener. Replies nobody waits
    /// for, and replies that would block a full buffer, are dropped
    /// with an error the caller counts.
    pub fn dispatch(&self, pkt: SibraPkt) -> Result<()> {
        let key = NotifyKey::from_reply(&pkt.extn, &pkt.pld)?;
        let map = self.notify.lock().expect("registry poisoned");
        match map.get(&key) {
            Some(tx) => tx
                .try_send(NotifyEvent { pkt })
                .map_err(|_| Error::Transport),
            None => Err(Error::NoListener),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    fn key() -> NotifyKey {
        NotifyKey {
            id: ResvId::Steady([3u8; 10]),
            idx: Index(1),
            req_type: DataType::SteadySetup,
        }
    }

    #[test]
    fn second_listener_is_rejected() {
        let reg = NotifyRegistry::new();
        let (tx1, _rx1) = sync_channel(1);
        let (tx2, _rx2) = sync_channel(1);
        reg.register(key(), tx1).expect("first listener");
        assert_eq!(reg.register(key(), tx2), Err(Error::NotifyConflict));
        reg.deregister(&key());
        let (tx3, _rx3) = sync_channel(1);
        reg.register(key(), tx3).expect("after deregister");
    }
}
