//! Source-side request state machines. Each requester runs as one
//! cooperative task: prepare, register a listener, send, then block on
//! the reply channel or the timeout. Listeners are deregistered on
//! every exit path.

pub mod ephem;
pub mod steady;

pub use ephem::{EphemCleanRenew, EphemCleanSetup, EphemRenew, EphemSetup};
pub use steady::{ConfirmIndex, SteadyRenew, SteadySetup};

use crate::admission::SibraAlgo;
use crate::notify::{NotifyEvent, NotifyKey, NotifyRegistry};
use crate::store::ResvStore;
use crate::time::TimeProvider;
use crate::transport::{SibraPkt, Transport};
use crate::types::{AsId, Error, HostAddr, Result};
use std::boxed::Box;
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared environment of all requesters at one host.
#[derive(Clone)]
pub struct ReqCtx {
    pub registry: Arc<NotifyRegistry>,
    pub transport: Arc<dyn Transport>,
    pub store: Arc<ResvStore>,
    pub algo: Arc<Mutex<Box<dyn SibraAlgo>>>,
    pub time: Arc<dyn TimeProvider + Send + Sync>,
    pub local_as: AsId,
    pub local_host: HostAddr,
}

pub trait Requester {
    fn prepare(&mut self) -> Result<SibraPkt>;
    fn notify_keys(&self) -> alloc::vec::Vec<NotifyKey>;
    /// Returns whether the walk succeeded. Errors abort the requester.
    fn handle_rep(&mut self, event: NotifyEvent) -> Result<bool>;
    fn on_error(&mut self, _err: Error) {}
    fn on_timeout(&mut self) {}
}

/// Drives a requester to completion. The task suspends at the send and
/// at the reply-or-timeout select, nowhere else.
pub fn run(ctx: &ReqCtx, timeout: Duration, reqstr: &mut dyn Requester) -> Result<bool> {
    info!("starting requester");
    let pkt = match reqstr.prepare() {
        Ok(pkt) => pkt,
        Err(err) => {
            warn!(%err, "unable to prepare request");
            reqstr.on_error(err);
            return Err(err);
        }
    };
    let (tx, rx) = sync_channel::<NotifyEvent>(10);
    let mut registered = alloc::vec::Vec::new();
    for key in reqstr.notify_keys() {
        if let Err(err) = ctx.registry.register(key, tx.clone()) {
            for k in &registered {
                ctx.registry.deregister(k);
            }
            warn!(%err, "unable to register listener");
            reqstr.on_error(err);
            return Err(err);
        }
        registered.push(key);
    }
    let outcome = send_and_await(ctx, timeout, reqstr, pkt, &rx);
    for key in &registered {
        ctx.registry.deregister(key);
    }
    outcome
}

fn send_and_await(
    ctx: &ReqCtx,
    timeout: Duration,
    reqstr: &mut dyn Requester,
    pkt: SibraPkt,
    rx: &std::sync::mpsc::Receiver<NotifyEvent>,
) -> Result<bool> {
    if let Err(err) = ctx.transport.send(pkt) {
        warn!(%err, "unable to send request");
        reqstr.on_error(err);
        return Err(err);
    }
    match rx.recv_timeout(timeout) {
        Ok(event) => match reqstr.handle_rep(event) {
            Ok(succ) => {
                debug!(succ, "reply handled");
                Ok(succ)
            }
            Err(err) => {
                warn!(%err, "unable to handle reply");
                reqstr.on_error(err);
                Err(err)
            }
        },
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
            warn!(?timeout, "timeout expired");
            reqstr.on_timeout();
            Err(Error::Timeout)
        }
    }
}
