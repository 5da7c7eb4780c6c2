// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process carrier: `internal:<name>`.
//!
//! Connections pair two transports on the same thread, possibly on
//! different loops. A send enqueues onto the peer's inbox and enables a
//! deferred callback on the peer's loop; the drain re-checks the
//! destroyed flag before every delivery, so a transport torn down
//! mid-queue never dispatches again. Custom mode (opaque `Rc` payloads)
//! only exists here — nothing crosses a process boundary.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use smol_str::SmolStr;
use tracing::debug;

use plinth_core::error::{Error, Result};
use plinth_mainloop::{DeferredId, Mainloop};

use crate::addr::{Address, TransportFactory};
use crate::transport::{Driver, Flags, Mode, Transport};

/// Pending payloads an unaccepted connector may queue up.
const EARLY_LIMIT: usize = 256;

thread_local! {
    /// Listening internal transports by name, this thread only — the
    /// carrier never crosses threads.
    static LISTENERS: RefCell<HashMap<SmolStr, Listener>> = RefCell::new(HashMap::new());
}

struct Listener {
    transport: Transport,
    pending: Rc<RefCell<VecDeque<Transport>>>,
}

pub(crate) struct InternalFactory;

impl TransportFactory for InternalFactory {
    fn prefix(&self) -> &'static str {
        "internal"
    }

    fn resolve(&self, addr: &str) -> Result<Address> {
        let name = addr.strip_prefix("internal:").ok_or(Error::NotFound)?;
        if name.is_empty() {
            return Err(Error::AddrResolve("empty internal name".to_string()));
        }
        Ok(Address::Internal(name.into()))
    }

    fn create(&self, _ml: &Mainloop, _mode: Mode, _flags: Flags) -> Result<Box<dyn Driver>> {
        Ok(Box::new(InternalDriver {
            name: None,
            registered: false,
            pending: Rc::new(RefCell::new(VecDeque::new())),
            peer: None,
            early: VecDeque::new(),
            inbox: VecDeque::new(),
            drain: None,
        }))
    }
}

enum Payload {
    Frame(Vec<u8>),
    Custom(Rc<dyn Any>),
}

pub(crate) struct InternalDriver {
    name: Option<SmolStr>,
    registered: bool,
    /// Listener side: connectors waiting to be accepted.
    pending: Rc<RefCell<VecDeque<Transport>>>,
    peer: Option<Transport>,
    /// Sends made before the peer accepted.
    early: VecDeque<Payload>,
    inbox: VecDeque<Payload>,
    drain: Option<DeferredId>,
}

impl InternalDriver {
    /// Install the (initially idle) inbox drain on this transport's
    /// loop.
    fn ensure_drain(&mut self, t: &Transport) {
        if self.drain.is_some() {
            return;
        }
        let ml = t.mainloop();
        let handle = t.clone();
        let id = ml.add_deferred(move |ml, id| drain_inbox(&handle, ml, id));
        ml.disable_deferred(id);
        self.drain = Some(id);
    }

    fn push_payload(&mut self, payload: Payload) {
        self.inbox.push_back(payload);
    }
}

impl Driver for InternalDriver {
    fn bind(&mut self, _t: &Transport, addr: &Address) -> Result<()> {
        let Address::Internal(name) = addr else {
            return Err(Error::InvalidArgument("not an internal address"));
        };
        let taken = LISTENERS.with(|l| l.borrow().contains_key(name));
        if taken {
            return Err(Error::Exists);
        }
        self.name = Some(name.clone());
        Ok(())
    }

    fn listen(&mut self, t: &Transport, _backlog: i32) -> Result<()> {
        let name = self.name.clone().ok_or(Error::InvalidArgument("listen before bind"))?;
        LISTENERS.with(|l| {
            let mut map = l.borrow_mut();
            if map.contains_key(&name) {
                return Err(Error::Exists);
            }
            map.insert(
                name.clone(),
                Listener { transport: t.clone(), pending: Rc::clone(&self.pending) },
            );
            Ok(())
        })?;
        self.registered = true;
        debug!(%name, "internal listener up");
        Ok(())
    }

    fn accept_from(&mut self, t: &Transport, listener: &Transport) -> Result<()> {
        let connector = listener.with_peer_driver(|ld| {
            let ld = ld
                .as_any_mut()
                .downcast_mut::<InternalDriver>()
                .ok_or(Error::InvalidArgument("listener is not an internal transport"))?;
            ld.pending.borrow_mut().pop_front().ok_or(Error::Again)
        })?;

        // Link both halves and flush whatever the connector sent while
        // the connection was still pending.
        self.peer = Some(connector.clone());
        self.ensure_drain(t);

        let early = connector.with_peer_driver(|cd| {
            let cd = cd
                .as_any_mut()
                .downcast_mut::<InternalDriver>()
                .ok_or(Error::InvalidArgument("connector is not an internal transport"))?;
            cd.peer = Some(t.clone());
            cd.ensure_drain(&connector);
            Ok(std::mem::take(&mut cd.early))
        })?;

        if !early.is_empty() {
            for payload in early {
                self.push_payload(payload);
            }
            if let Some(id) = self.drain {
                t.mainloop().enable_deferred(id);
            }
        }
        Ok(())
    }

    fn connect(&mut self, t: &Transport, addr: &Address) -> Result<()> {
        let Address::Internal(name) = addr else {
            return Err(Error::InvalidArgument("not an internal address"));
        };

        let listener = LISTENERS
            .with(|l| l.borrow().get(name).map(|entry| (entry.transport.clone(), Rc::clone(&entry.pending))));
        let Some((listener, pending)) = listener else {
            return Err(Error::NotFound);
        };

        pending.borrow_mut().push_back(t.clone());
        self.ensure_drain(t);

        // The listener learns about us from a deferred on its own
        // loop, mirroring how socket carriers deliver connections.
        let lml = listener.mainloop();
        let handle = listener.clone();
        lml.add_deferred(move |ml, id| {
            ml.del_deferred(id);
            if !handle.is_destroyed() {
                handle.emit_connection();
            }
        });
        debug!(%name, "internal connection queued");
        Ok(())
    }

    fn disconnect(&mut self, t: &Transport) -> Result<()> {
        if let Some(peer) = self.peer.take() {
            // Same thread; tell the other half right away.
            if !peer.is_destroyed() {
                peer.emit_closed(None);
            }
        }
        if self.registered {
            if let Some(name) = &self.name {
                LISTENERS.with(|l| {
                    l.borrow_mut().remove(name);
                });
            }
            self.registered = false;
        }
        if let Some(id) = self.drain.take() {
            t.mainloop().del_deferred(id);
        }
        self.inbox.clear();
        self.early.clear();
        Ok(())
    }

    fn send_frame(&mut self, t: &Transport, frame: Vec<u8>, to: Option<&Address>) -> Result<()> {
        if to.is_some() {
            return Err(Error::Unsupported("sendto on an internal transport"));
        }
        self.ship(t, Payload::Frame(frame))
    }

    fn send_custom(&mut self, t: &Transport, payload: Rc<dyn Any>) -> Result<()> {
        self.ship(t, Payload::Custom(payload))
    }

    fn local_address(&self) -> Option<Address> {
        self.name.clone().map(Address::Internal)
    }

    fn close(&mut self, t: &Transport) {
        let _ = self.disconnect(t);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl InternalDriver {
    fn ship(&mut self, _t: &Transport, payload: Payload) -> Result<()> {
        match &self.peer {
            Some(peer) => {
                if peer.is_destroyed() {
                    return Err(Error::Closed);
                }
                let drain = peer.with_peer_driver(|pd| {
                    let pd = pd
                        .as_any_mut()
                        .downcast_mut::<InternalDriver>()
                        .ok_or(Error::InvalidArgument("peer is not an internal transport"))?;
                    pd.push_payload(payload);
                    Ok(pd.drain)
                })?;
                if let Some(id) = drain {
                    peer.mainloop().enable_deferred(id);
                }
                Ok(())
            }
            None => {
                // Connected but not yet accepted: hold the payload.
                if self.early.len() >= EARLY_LIMIT {
                    return Err(Error::Again);
                }
                self.early.push_back(payload);
                Ok(())
            }
        }
    }
}

/// Inbox drain, running as a deferred on the owning loop. The
/// destroyed check runs before every single delivery.
fn drain_inbox(t: &Transport, ml: &Mainloop, id: DeferredId) {
    loop {
        if t.is_destroyed() {
            ml.disable_deferred(id);
            return;
        }
        let item = t.with_peer_driver(|d| {
            let d = d
                .as_any_mut()
                .downcast_mut::<InternalDriver>()
                .ok_or(Error::InvalidArgument("not an internal transport"))?;
            Ok(d.inbox.pop_front())
        });
        match item {
            Ok(Some(Payload::Frame(frame))) => {
                if let Err(e) = t.deliver_frame(&frame, None) {
                    t.fatal(e);
                    ml.disable_deferred(id);
                    return;
                }
            }
            Ok(Some(Payload::Custom(payload))) => {
                if let Err(e) = t.deliver_custom(payload, None) {
                    t.fatal(e);
                    ml.disable_deferred(id);
                    return;
                }
            }
            _ => {
                ml.disable_deferred(id);
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "internal_tests.rs"]
mod tests;
