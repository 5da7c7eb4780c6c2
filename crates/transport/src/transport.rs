// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport core: connection lifecycle, payload-mode dispatch, and the
//! busy/destroy discipline.
//!
//! A transport is in exactly one payload [`Mode`] for its lifetime,
//! fixed by the receive handler installed at creation — there is no
//! callback surface for any other mode. Every user callback runs
//! inside a busy guard; calling [`Transport::destroy`] from within one
//! defers the actual teardown to the outermost callback return, so
//! handlers may destroy their own transport freely.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use plinth_codec::{DataObject, Message, NativeValue, TypeMap, TAG_DEFAULT};
use plinth_core::error::{Error, Result};
use plinth_mainloop::Mainloop;

use crate::addr::{find_factory, Address, TransportFactory};

/// Payload mode; decides the codec and the receive callback signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Message,
    Raw,
    Data,
    Native,
    Json,
    Custom,
}

/// Transport creation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u32);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const REUSEADDR: Flags = Flags(0x1);
    pub const NONBLOCK: Flags = Flags(0x2);
    pub const CLOEXEC: Flags = Flags(0x4);

    /// Flags an accepted transport copies from its listener.
    pub(crate) const INHERITABLE: Flags = Flags(0x7);

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) const fn inherited(self) -> Flags {
        Flags(self.0 & Flags::INHERITABLE.0)
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Fresh,
    Bound,
    Listening,
    Connected,
    Accepted,
    Closed,
}

/// Mode-typed receive callback. Connectionless deliveries carry the
/// sender address; connected ones pass `None`.
pub enum RecvHandler {
    Message(Box<dyn FnMut(&Transport, Message, Option<&Address>)>),
    Raw(Box<dyn FnMut(&Transport, &[u8], Option<&Address>)>),
    Data(Box<dyn FnMut(&Transport, DataObject, u16, Option<&Address>)>),
    Native(Box<dyn FnMut(&Transport, NativeValue, u32, Option<&Address>)>),
    Json(Box<dyn FnMut(&Transport, serde_json::Value, Option<&Address>)>),
    Custom(Box<dyn FnMut(&Transport, Rc<dyn Any>, Option<&Address>)>),
}

impl RecvHandler {
    pub fn mode(&self) -> Mode {
        match self {
            RecvHandler::Message(_) => Mode::Message,
            RecvHandler::Raw(_) => Mode::Raw,
            RecvHandler::Data(_) => Mode::Data,
            RecvHandler::Native(_) => Mode::Native,
            RecvHandler::Json(_) => Mode::Json,
            RecvHandler::Custom(_) => Mode::Custom,
        }
    }
}

/// Callback set installed at creation. Built with the mode constructor
/// plus `on_*` chaining.
pub struct TransportEvents {
    pub(crate) connection: Option<Box<dyn FnMut(&Transport)>>,
    pub(crate) closed: Option<Box<dyn FnMut(&Transport, Option<&Error>)>>,
    pub(crate) writable: Option<Box<dyn FnMut(&Transport)>>,
    pub(crate) recv: RecvHandler,
}

impl TransportEvents {
    pub fn message<F>(recv: F) -> TransportEvents
    where
        F: FnMut(&Transport, Message, Option<&Address>) + 'static,
    {
        Self::with_recv(RecvHandler::Message(Box::new(recv)))
    }

    pub fn raw<F>(recv: F) -> TransportEvents
    where
        F: FnMut(&Transport, &[u8], Option<&Address>) + 'static,
    {
        Self::with_recv(RecvHandler::Raw(Box::new(recv)))
    }

    pub fn data<F>(recv: F) -> TransportEvents
    where
        F: FnMut(&Transport, DataObject, u16, Option<&Address>) + 'static,
    {
        Self::with_recv(RecvHandler::Data(Box::new(recv)))
    }

    pub fn native<F>(recv: F) -> TransportEvents
    where
        F: FnMut(&Transport, NativeValue, u32, Option<&Address>) + 'static,
    {
        Self::with_recv(RecvHandler::Native(Box::new(recv)))
    }

    pub fn json<F>(recv: F) -> TransportEvents
    where
        F: FnMut(&Transport, serde_json::Value, Option<&Address>) + 'static,
    {
        Self::with_recv(RecvHandler::Json(Box::new(recv)))
    }

    pub fn custom<F>(recv: F) -> TransportEvents
    where
        F: FnMut(&Transport, Rc<dyn Any>, Option<&Address>) + 'static,
    {
        Self::with_recv(RecvHandler::Custom(Box::new(recv)))
    }

    fn with_recv(recv: RecvHandler) -> TransportEvents {
        TransportEvents { connection: None, closed: None, writable: None, recv }
    }

    /// Incoming-connection callback; the handler accepts with
    /// [`Transport::accept`]. Required before `listen`.
    pub fn on_connection<F>(mut self, cb: F) -> TransportEvents
    where
        F: FnMut(&Transport) + 'static,
    {
        self.connection = Some(Box::new(cb));
        self
    }

    /// Peer-closed / fatal-error callback; `None` for an orderly close.
    pub fn on_closed<F>(mut self, cb: F) -> TransportEvents
    where
        F: FnMut(&Transport, Option<&Error>) + 'static,
    {
        self.closed = Some(Box::new(cb));
        self
    }

    /// Fired when a backlogged output queue fully drains.
    pub fn on_writable<F>(mut self, cb: F) -> TransportEvents
    where
        F: FnMut(&Transport) + 'static,
    {
        self.writable = Some(Box::new(cb));
        self
    }
}

/// Carrier implementation behind a transport. Factories return these;
/// the core owns one per transport and sequences every call through
/// the busy guard.
pub trait Driver {
    fn bind(&mut self, t: &Transport, addr: &Address) -> Result<()>;
    fn listen(&mut self, t: &Transport, backlog: i32) -> Result<()>;
    fn accept_from(&mut self, t: &Transport, listener: &Transport) -> Result<()>;
    fn connect(&mut self, t: &Transport, addr: &Address) -> Result<()>;
    fn disconnect(&mut self, t: &Transport) -> Result<()>;

    /// Ship one complete frame (length prefix included); `to` is only
    /// meaningful for connectionless carriers.
    fn send_frame(&mut self, t: &Transport, frame: Vec<u8>, to: Option<&Address>) -> Result<()>;

    fn send_custom(&mut self, _t: &Transport, _payload: Rc<dyn Any>) -> Result<()> {
        Err(Error::Unsupported("custom payloads need the internal transport"))
    }

    fn local_address(&self) -> Option<Address> {
        None
    }

    /// Release sockets and watches; the transport is going away.
    fn close(&mut self, t: &Transport);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) struct Inner {
    ml: Mainloop,
    factory: Arc<dyn TransportFactory>,
    mode: Mode,
    flags: Flags,
    state: ConnState,
    driver: Option<Box<dyn Driver>>,
    connection: Option<Box<dyn FnMut(&Transport)>>,
    closed: Option<Box<dyn FnMut(&Transport, Option<&Error>)>>,
    writable: Option<Box<dyn FnMut(&Transport)>>,
    recv: Option<RecvHandler>,
    typemap: Option<TypeMap>,
    busy: u32,
    destroyed: bool,
}

/// Handle to one transport connection. Clones share the connection.
#[derive(Clone)]
pub struct Transport {
    inner: Rc<RefCell<Inner>>,
}

impl Transport {
    /// Create a transport for the named carrier (`tcp4`, `unxs`,
    /// `internal`, ...). The payload mode comes from the receive
    /// handler in `events`.
    pub fn create(
        ml: &Mainloop,
        carrier: &str,
        events: TransportEvents,
        flags: Flags,
    ) -> Result<Transport> {
        let factory =
            find_factory(carrier).ok_or(Error::Unsupported("unknown transport type"))?;
        let mode = events.recv.mode();
        let driver = factory.create(ml, mode, flags)?;

        Ok(Transport {
            inner: Rc::new(RefCell::new(Inner {
                ml: ml.clone(),
                factory,
                mode,
                flags,
                state: ConnState::Fresh,
                driver: Some(driver),
                connection: events.connection,
                closed: events.closed,
                writable: events.writable,
                recv: Some(events.recv),
                typemap: None,
                busy: 0,
                destroyed: false,
            })),
        })
    }

    /// Resolve an address string through this transport's factory.
    pub fn resolve(&self, addr: &str) -> Result<Address> {
        let factory = Arc::clone(&self.inner.borrow().factory);
        factory.resolve(addr)
    }

    pub fn mode(&self) -> Mode {
        self.inner.borrow().mode
    }

    pub fn state(&self) -> ConnState {
        self.inner.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnState::Connected | ConnState::Accepted)
    }

    pub fn local_address(&self) -> Option<Address> {
        self.inner.borrow().driver.as_ref().and_then(|d| d.local_address())
    }

    /// Install the native-mode type-id map; any other mode fails with
    /// `Unsupported`.
    pub fn set_typemap(&self, map: TypeMap) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.mode != Mode::Native {
            return Err(Error::Unsupported("typemap needs native mode"));
        }
        inner.typemap = Some(map);
        Ok(())
    }

    pub fn bind(&self, addr: &Address) -> Result<()> {
        if self.state() != ConnState::Fresh {
            return Err(Error::InvalidArgument("transport already bound"));
        }
        self.with_driver(|d, t| d.bind(t, addr))?;
        self.inner.borrow_mut().state = ConnState::Bound;
        Ok(())
    }

    /// Start accepting connections. Requires a bound transport with
    /// `connection` and `closed` callbacks installed.
    pub fn listen(&self, backlog: i32) -> Result<()> {
        {
            let inner = self.inner.borrow();
            if inner.state != ConnState::Bound {
                return Err(Error::InvalidArgument("listen needs a bound transport"));
            }
            if inner.connection.is_none() || inner.closed.is_none() {
                return Err(Error::InvalidArgument(
                    "listen needs connection and closed callbacks",
                ));
            }
        }

        self.busy_enter();
        let result = self.with_driver(|d, t| d.listen(t, backlog));
        self.busy_exit();
        result?;

        self.inner.borrow_mut().state = ConnState::Listening;
        debug!(transport = %self.describe(), "listening");
        Ok(())
    }

    /// Accept a pending connection on a listening transport. The
    /// accepted transport inherits the listener's mode (the receive
    /// handler must match) and typemap.
    pub fn accept(
        listener: &Transport,
        events: TransportEvents,
        flags: Flags,
    ) -> Result<Transport> {
        let (ml, factory, mode, lflags, typemap) = {
            let inner = listener.inner.borrow();
            if inner.state != ConnState::Listening {
                return Err(Error::InvalidArgument("accept needs a listening transport"));
            }
            (
                inner.ml.clone(),
                Arc::clone(&inner.factory),
                inner.mode,
                inner.flags,
                inner.typemap.clone(),
            )
        };
        if events.recv.mode() != mode {
            return Err(Error::InvalidArgument("accepted mode must match the listener"));
        }

        let flags = lflags.inherited() | flags;
        let driver = factory.create(&ml, mode, flags)?;
        let t = Transport {
            inner: Rc::new(RefCell::new(Inner {
                ml,
                factory,
                mode,
                flags,
                state: ConnState::Fresh,
                driver: Some(driver),
                connection: events.connection,
                closed: events.closed,
                writable: events.writable,
                recv: Some(events.recv),
                typemap,
                busy: 0,
                destroyed: false,
            })),
        };

        t.busy_enter();
        let result = t.with_driver(|d, t| d.accept_from(t, listener));
        t.busy_exit();
        result?;

        t.inner.borrow_mut().state = ConnState::Accepted;
        debug!(transport = %t.describe(), "accepted connection");
        Ok(t)
    }

    /// Connect to a resolved address. On failure the error is also
    /// delivered to the `closed` callback.
    pub fn connect(&self, addr: &Address) -> Result<()> {
        if self.is_connected() {
            return Err(Error::Exists);
        }

        self.busy_enter();
        let result = self.with_driver(|d, t| d.connect(t, addr));
        self.busy_exit();

        match result {
            Ok(()) => {
                self.inner.borrow_mut().state = ConnState::Connected;
                debug!(transport = %self.describe(), %addr, "connected");
                Ok(())
            }
            Err(err) => {
                self.emit_closed(Some(&err));
                Err(err)
            }
        }
    }

    pub fn disconnect(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::InvalidArgument("transport not connected"));
        }
        self.busy_enter();
        let result = self.with_driver(|d, t| d.disconnect(t));
        self.busy_exit();
        self.inner.borrow_mut().state = ConnState::Closed;
        result
    }

    /// Tear the transport down. Safe from inside any of its callbacks;
    /// the final release happens when the outermost callback returns.
    pub fn destroy(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
        }
        debug!(transport = %self.describe(), "destroying");

        self.busy_enter();
        let _ = self.with_driver(|d, t| d.disconnect(t));
        self.busy_exit();
    }

    /*
     * sends
     */

    pub fn send_msg(&self, msg: &Message) -> Result<()> {
        self.check_send(Mode::Message, true)?;
        let frame = frame_tagged(TAG_DEFAULT, &msg.encode()?);
        self.driver_send(frame, None)
    }

    pub fn send_msg_to(&self, msg: &Message, to: &Address) -> Result<()> {
        self.check_send(Mode::Message, false)?;
        let frame = frame_tagged(TAG_DEFAULT, &msg.encode()?);
        self.driver_send(frame, Some(to))
    }

    pub fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        self.check_send(Mode::Raw, true)?;
        self.driver_send(frame_plain(bytes), None)
    }

    pub fn send_raw_to(&self, bytes: &[u8], to: &Address) -> Result<()> {
        self.check_send(Mode::Raw, false)?;
        self.driver_send(frame_plain(bytes), Some(to))
    }

    pub fn send_data(&self, obj: &DataObject) -> Result<()> {
        self.check_send(Mode::Data, true)?;
        let frame = frame_tagged(obj.tag(), &obj.encode()?);
        self.driver_send(frame, None)
    }

    pub fn send_data_to(&self, obj: &DataObject, to: &Address) -> Result<()> {
        self.check_send(Mode::Data, false)?;
        let frame = frame_tagged(obj.tag(), &obj.encode()?);
        self.driver_send(frame, Some(to))
    }

    pub fn send_native(&self, value: &NativeValue) -> Result<()> {
        self.check_send(Mode::Native, true)?;
        let map = self.inner.borrow().typemap.clone();
        let frame = frame_plain(&plinth_codec::encode_native(value, map.as_ref())?);
        self.driver_send(frame, None)
    }

    pub fn send_native_to(&self, value: &NativeValue, to: &Address) -> Result<()> {
        self.check_send(Mode::Native, false)?;
        let map = self.inner.borrow().typemap.clone();
        let frame = frame_plain(&plinth_codec::encode_native(value, map.as_ref())?);
        self.driver_send(frame, Some(to))
    }

    pub fn send_json(&self, value: &serde_json::Value) -> Result<()> {
        self.check_send(Mode::Json, true)?;
        self.driver_send(frame_plain(value.to_string().as_bytes()), None)
    }

    pub fn send_json_to(&self, value: &serde_json::Value, to: &Address) -> Result<()> {
        self.check_send(Mode::Json, false)?;
        self.driver_send(frame_plain(value.to_string().as_bytes()), Some(to))
    }

    /// Ship an opaque in-process payload; only the internal carrier
    /// moves these.
    pub fn send_custom(&self, payload: Rc<dyn Any>) -> Result<()> {
        self.check_send(Mode::Custom, true)?;
        self.busy_enter();
        let result = self.with_driver(|d, t| d.send_custom(t, Rc::clone(&payload)));
        self.busy_exit();
        result
    }

    fn check_send(&self, mode: Mode, needs_connection: bool) -> Result<()> {
        let inner = self.inner.borrow();
        if inner.mode != mode {
            return Err(Error::Unsupported("payload does not match transport mode"));
        }
        if inner.destroyed || inner.state == ConnState::Closed {
            return Err(Error::Closed);
        }
        if needs_connection
            && !matches!(inner.state, ConnState::Connected | ConnState::Accepted)
        {
            return Err(Error::InvalidArgument("transport not connected"));
        }
        Ok(())
    }

    fn driver_send(&self, frame: Vec<u8>, to: Option<&Address>) -> Result<()> {
        self.busy_enter();
        let result = self.with_driver(|d, t| d.send_frame(t, frame, to));
        self.busy_exit();
        result
    }

    /*
     * driver plumbing
     */

    pub fn mainloop(&self) -> Mainloop {
        self.inner.borrow().ml.clone()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.inner.borrow().destroyed
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.inner.borrow().state == ConnState::Listening
    }

    fn with_driver<R>(
        &self,
        f: impl FnOnce(&mut Box<dyn Driver>, &Transport) -> Result<R>,
    ) -> Result<R> {
        let driver = self.inner.borrow_mut().driver.take();
        let Some(mut driver) = driver else {
            return Err(Error::Closed);
        };
        let result = f(&mut driver, self);
        let mut inner = self.inner.borrow_mut();
        if inner.driver.is_none() {
            inner.driver = Some(driver);
        }
        result
    }

    /// Drivers use this to reach the listener's driver during accept.
    pub(crate) fn with_peer_driver<R>(
        &self,
        f: impl FnOnce(&mut Box<dyn Driver>) -> Result<R>,
    ) -> Result<R> {
        let driver = self.inner.borrow_mut().driver.take();
        let Some(mut driver) = driver else {
            return Err(Error::Closed);
        };
        let result = f(&mut driver);
        let mut inner = self.inner.borrow_mut();
        if inner.driver.is_none() {
            inner.driver = Some(driver);
        }
        result
    }

    fn busy_enter(&self) {
        self.inner.borrow_mut().busy += 1;
    }

    fn busy_exit(&self) {
        let purge = {
            let mut inner = self.inner.borrow_mut();
            inner.busy -= 1;
            inner.destroyed && inner.busy == 0
        };
        if purge {
            self.purge();
        }
    }

    /// Final teardown once the transport is destroyed and no callback
    /// is on the stack.
    fn purge(&self) {
        let driver = self.inner.borrow_mut().driver.take();
        if let Some(mut driver) = driver {
            driver.close(self);
        }
        let mut inner = self.inner.borrow_mut();
        inner.connection = None;
        inner.closed = None;
        inner.writable = None;
        inner.recv = None;
        inner.state = ConnState::Closed;
        debug!("transport released");
    }

    /*
     * event emission (drivers call these)
     */

    pub(crate) fn emit_connection(&self) {
        let cb = self.inner.borrow_mut().connection.take();
        let Some(mut cb) = cb else { return };
        self.busy_enter();
        cb(self);
        {
            let mut inner = self.inner.borrow_mut();
            if inner.connection.is_none() {
                inner.connection = Some(cb);
            }
        }
        self.busy_exit();
    }

    pub(crate) fn emit_closed(&self, err: Option<&Error>) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state == ConnState::Closed {
                return;
            }
            inner.state = ConnState::Closed;
        }

        let cb = self.inner.borrow_mut().closed.take();
        let Some(mut cb) = cb else { return };
        self.busy_enter();
        cb(self, err);
        {
            let mut inner = self.inner.borrow_mut();
            if inner.closed.is_none() {
                inner.closed = Some(cb);
            }
        }
        self.busy_exit();
    }

    pub(crate) fn emit_writable(&self) {
        let cb = self.inner.borrow_mut().writable.take();
        let Some(mut cb) = cb else { return };
        self.busy_enter();
        cb(self);
        {
            let mut inner = self.inner.borrow_mut();
            if inner.writable.is_none() {
                inner.writable = Some(cb);
            }
        }
        self.busy_exit();
    }

    /// A fatal receive-side error: disconnect and report through
    /// `closed`.
    pub(crate) fn fatal(&self, err: Error) {
        debug!(transport = %self.describe(), error = %err, "fatal transport error");
        let _ = self.with_driver(|d, t| d.disconnect(t));
        self.emit_closed(Some(&err));
    }

    /// Decode one received frame per the transport mode and run the
    /// receive callback. Any error here is fatal for the connection.
    pub(crate) fn deliver_frame(&self, frame: &[u8], from: Option<&Address>) -> Result<()> {
        let mode = self.inner.borrow().mode;
        match mode {
            Mode::Message => {
                if frame.len() < 2 {
                    return Err(Error::Protocol("frame too short for record tag"));
                }
                let tag = u16::from_be_bytes([frame[0], frame[1]]);
                if tag != TAG_DEFAULT {
                    return Err(Error::Protocol("unexpected record tag in message mode"));
                }
                let msg = Message::decode(&frame[2..])?;
                self.with_recv(|handler, t| match handler {
                    RecvHandler::Message(cb) => cb(t, msg, from),
                    _ => {}
                })
            }
            Mode::Data => {
                if frame.len() < 2 {
                    return Err(Error::Protocol("frame too short for record tag"));
                }
                let tag = u16::from_be_bytes([frame[0], frame[1]]);
                let obj = DataObject::decode(tag, &frame[2..])?;
                self.with_recv(|handler, t| match handler {
                    RecvHandler::Data(cb) => cb(t, obj, tag, from),
                    _ => {}
                })
            }
            Mode::Raw => self.with_recv(|handler, t| match handler {
                RecvHandler::Raw(cb) => cb(t, frame, from),
                _ => {}
            }),
            Mode::Native => {
                let map = self.inner.borrow().typemap.clone();
                let (value, type_id) = plinth_codec::decode_native(frame, map.as_ref())?;
                self.with_recv(|handler, t| match handler {
                    RecvHandler::Native(cb) => cb(t, value, type_id, from),
                    _ => {}
                })
            }
            Mode::Json => {
                let value: serde_json::Value = serde_json::from_slice(frame)
                    .map_err(|_| Error::Protocol("malformed JSON payload"))?;
                self.with_recv(|handler, t| match handler {
                    RecvHandler::Json(cb) => cb(t, value, from),
                    _ => {}
                })
            }
            Mode::Custom => Err(Error::Unsupported("byte frames in custom mode")),
        }
    }

    /// Deliver an opaque in-process payload (internal carrier only).
    pub(crate) fn deliver_custom(&self, payload: Rc<dyn Any>, from: Option<&Address>) -> Result<()> {
        self.with_recv(|handler, t| match handler {
            RecvHandler::Custom(cb) => cb(t, payload, from),
            _ => {}
        })
    }

    fn with_recv(&self, f: impl FnOnce(&mut RecvHandler, &Transport)) -> Result<()> {
        let recv = self.inner.borrow_mut().recv.take();
        let Some(mut recv) = recv else {
            return Err(Error::Closed);
        };
        self.busy_enter();
        f(&mut recv, self);
        {
            let mut inner = self.inner.borrow_mut();
            if inner.recv.is_none() {
                inner.recv = Some(recv);
            }
        }
        self.busy_exit();
        Ok(())
    }

    fn describe(&self) -> String {
        let inner = self.inner.borrow();
        format!("{}/{:?}", inner.factory.prefix(), inner.mode)
    }

    /// Identity comparison for handles.
    pub fn same_as(&self, other: &Transport) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// `u32` big-endian length prefix over the payload.
pub(crate) fn frame_plain(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Length prefix over `u16` record tag + payload.
pub(crate) fn frame_tagged(tag: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(6 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32 + 2).to_be_bytes());
    frame.extend_from_slice(&tag.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
