// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Datagram carrier: `udp4`, `udp6`, and `unxdgrm`.
//!
//! Every datagram is exactly one frame — the same `u32` length prefix
//! as the stream carrier, so a short or trailing-garbage datagram is a
//! framing violation. Unconnected transports deliver with the sender's
//! address; `connect` switches the socket to peer filtering and plain
//! deliveries. Sends that would block queue in the same bounded output
//! queue the stream driver uses.

use std::any::Any;
use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr as UnixSocketAddr, UnixDatagram};

use tracing::warn;

use plinth_core::error::{Error, Result};
use plinth_mainloop::{IoEvents, IoWatchId, Mainloop};

use crate::addr::{lookup_v4, lookup_v6, parse_unix, Address, TransportFactory, UnixName};
use crate::transport::{Driver, Flags, Mode, Transport};

const OUTQ_LIMIT: usize = 256 * 1024;

/// Largest datagram we accept; a full UDP payload fits.
const MAX_DGRAM: usize = 64 * 1024;

pub(crate) struct DgramFactory {
    prefix: &'static str,
}

impl DgramFactory {
    pub(crate) fn new(prefix: &'static str) -> DgramFactory {
        DgramFactory { prefix }
    }
}

impl TransportFactory for DgramFactory {
    fn prefix(&self) -> &'static str {
        self.prefix
    }

    fn resolve(&self, addr: &str) -> Result<Address> {
        let rest = addr
            .strip_prefix(self.prefix)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or(Error::NotFound)?;

        match self.prefix {
            "udp4" => Ok(Address::Udp4(lookup_v4(rest)?)),
            "udp6" => Ok(Address::Udp6(lookup_v6(rest)?)),
            "unxdgrm" => Ok(Address::UnxDgram(parse_unix(rest)?)),
            _ => Err(Error::NotFound),
        }
    }

    fn create(&self, _ml: &Mainloop, _mode: Mode, _flags: Flags) -> Result<Box<dyn Driver>> {
        Ok(Box::new(DgramDriver {
            sock: DgramSock::None,
            bound: None,
            peer_filter: false,
            watch: None,
            out_watch: None,
            outq: VecDeque::new(),
            outq_bytes: 0,
        }))
    }
}

enum DgramSock {
    None,
    Udp(UdpSocket),
    Unix(UnixDatagram),
}

impl DgramSock {
    fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        match self {
            DgramSock::None => None,
            DgramSock::Udp(s) => Some(s.as_fd()),
            DgramSock::Unix(s) => Some(s.as_fd()),
        }
    }
}

pub(crate) struct DgramDriver {
    sock: DgramSock,
    bound: Option<Address>,
    peer_filter: bool,
    watch: Option<IoWatchId>,
    out_watch: Option<IoWatchId>,
    outq: VecDeque<(Vec<u8>, Option<Address>)>,
    outq_bytes: usize,
}

impl DgramDriver {
    fn ensure_socket(&mut self, like: &Address) -> Result<()> {
        if !matches!(self.sock, DgramSock::None) {
            return Ok(());
        }
        // Connecting without a bind first gets an ephemeral local
        // address of the matching family.
        self.sock = match like {
            Address::Udp4(_) => {
                DgramSock::Udp(UdpSocket::bind("0.0.0.0:0").map_err(Error::from_io)?)
            }
            Address::Udp6(_) => {
                DgramSock::Udp(UdpSocket::bind("[::]:0").map_err(Error::from_io)?)
            }
            Address::UnxDgram(_) => {
                DgramSock::Unix(UnixDatagram::unbound().map_err(Error::from_io)?)
            }
            _ => return Err(Error::InvalidArgument("not a datagram address")),
        };
        self.set_nonblocking()
    }

    fn set_nonblocking(&self) -> Result<()> {
        match &self.sock {
            DgramSock::None => Ok(()),
            DgramSock::Udp(s) => s.set_nonblocking(true).map_err(Error::from_io),
            DgramSock::Unix(s) => s.set_nonblocking(true).map_err(Error::from_io),
        }
    }

    fn install_io_watch(&mut self, t: &Transport) -> Result<()> {
        if self.watch.is_some() {
            return Ok(());
        }
        let fd = self.sock.as_fd().ok_or(Error::Closed)?;
        let handle = t.clone();
        let watch = t
            .mainloop()
            .add_io_watch(fd, IoEvents::IN, move |_, _, _, events| handle_io(&handle, events))?;
        self.watch = Some(watch);
        Ok(())
    }

    fn ensure_out_watch(&mut self, t: &Transport) -> Result<()> {
        if self.out_watch.is_some() {
            return Ok(());
        }
        let fd = self.sock.as_fd().ok_or(Error::Closed)?;
        let handle = t.clone();
        let watch = t
            .mainloop()
            .add_io_watch(fd, IoEvents::OUT, move |_, _, _, _| handle_writable(&handle))?;
        self.out_watch = Some(watch);
        Ok(())
    }

    fn send_one(&mut self, frame: &[u8], to: Option<&Address>) -> Result<usize> {
        match (&self.sock, to) {
            (DgramSock::Udp(s), Some(Address::Udp4(a))) => {
                s.send_to(frame, SocketAddr::V4(*a)).map_err(Error::from_io)
            }
            (DgramSock::Udp(s), Some(Address::Udp6(a))) => {
                s.send_to(frame, SocketAddr::V6(*a)).map_err(Error::from_io)
            }
            (DgramSock::Udp(s), None) => s.send(frame).map_err(Error::from_io),
            (DgramSock::Unix(s), Some(Address::UnxDgram(name))) => match name {
                UnixName::Path(p) => s.send_to(frame, p).map_err(Error::from_io),
                UnixName::Abstract(a) => {
                    let addr = UnixSocketAddr::from_abstract_name(a).map_err(Error::from_io)?;
                    s.send_to_addr(frame, &addr).map_err(Error::from_io)
                }
            },
            (DgramSock::Unix(s), None) => s.send(frame).map_err(Error::from_io),
            (DgramSock::None, _) => Err(Error::Closed),
            _ => Err(Error::InvalidArgument("address family mismatch")),
        }
    }

    /// Receive every waiting datagram; each one is a whole frame.
    fn read_datagrams(&mut self) -> Result<Vec<(Vec<u8>, Option<Address>)>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; MAX_DGRAM];

        loop {
            let (n, from) = match &self.sock {
                DgramSock::Udp(s) => match s.recv_from(&mut buf) {
                    Ok((n, from)) => (n, Some(map_inet_from(from))),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(Error::from_io(e)),
                },
                DgramSock::Unix(s) => match s.recv_from(&mut buf) {
                    Ok((n, from)) => (n, map_unix_from(&from)),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(Error::from_io(e)),
                },
                DgramSock::None => return Err(Error::Closed),
            };
            out.push((buf[..n].to_vec(), from));
        }
        Ok(out)
    }

    fn flush_out(&mut self) -> Result<bool> {
        while let Some((frame, to)) = self.outq.pop_front() {
            match self.send_one(&frame, to.as_ref()) {
                Ok(_) => {
                    self.outq_bytes -= frame.len();
                }
                Err(Error::Again) => {
                    self.outq.push_front((frame, to));
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn drop_watches(&mut self, t: &Transport) {
        let ml = t.mainloop();
        if let Some(w) = self.watch.take() {
            ml.del_io_watch(w);
        }
        if let Some(w) = self.out_watch.take() {
            ml.del_io_watch(w);
        }
    }
}

impl Driver for DgramDriver {
    fn bind(&mut self, t: &Transport, addr: &Address) -> Result<()> {
        self.sock = match addr {
            Address::Udp4(a) => DgramSock::Udp(UdpSocket::bind(a).map_err(Error::from_io)?),
            Address::Udp6(a) => DgramSock::Udp(UdpSocket::bind(a).map_err(Error::from_io)?),
            Address::UnxDgram(name) => DgramSock::Unix(unix_bind(name)?),
            _ => return Err(Error::InvalidArgument("not a datagram address")),
        };
        self.set_nonblocking()?;
        self.bound = Some(addr.clone());
        // Unconnected receives start as soon as the socket is bound.
        self.install_io_watch(t)
    }

    fn listen(&mut self, _t: &Transport, _backlog: i32) -> Result<()> {
        Err(Error::Unsupported("datagram transports do not listen"))
    }

    fn accept_from(&mut self, _t: &Transport, _listener: &Transport) -> Result<()> {
        Err(Error::Unsupported("datagram transports do not accept"))
    }

    /// Connect for peer filtering; unconnected use works without it.
    fn connect(&mut self, t: &Transport, addr: &Address) -> Result<()> {
        self.ensure_socket(addr)?;
        match (&self.sock, addr) {
            (DgramSock::Udp(s), Address::Udp4(a)) => {
                s.connect(SocketAddr::V4(*a)).map_err(Error::from_io)?
            }
            (DgramSock::Udp(s), Address::Udp6(a)) => {
                s.connect(SocketAddr::V6(*a)).map_err(Error::from_io)?
            }
            (DgramSock::Unix(s), Address::UnxDgram(name)) => match name {
                UnixName::Path(p) => s.connect(p).map_err(Error::from_io)?,
                UnixName::Abstract(abst) => {
                    let peer =
                        UnixSocketAddr::from_abstract_name(abst).map_err(Error::from_io)?;
                    s.connect_addr(&peer).map_err(Error::from_io)?
                }
            },
            _ => return Err(Error::InvalidArgument("address family mismatch")),
        }
        self.peer_filter = true;
        self.install_io_watch(t)
    }

    fn disconnect(&mut self, t: &Transport) -> Result<()> {
        self.drop_watches(t);
        if let (DgramSock::Unix(_), Some(Address::UnxDgram(UnixName::Path(p)))) =
            (&self.sock, &self.bound)
        {
            let _ = std::fs::remove_file(p);
        }
        self.sock = DgramSock::None;
        self.peer_filter = false;
        self.outq.clear();
        self.outq_bytes = 0;
        Ok(())
    }

    fn send_frame(&mut self, t: &Transport, frame: Vec<u8>, to: Option<&Address>) -> Result<()> {
        if let Some(addr) = to {
            self.ensure_socket(addr)?;
            self.install_io_watch(t)?;
        }

        if !self.outq.is_empty() {
            return self.enqueue(t, frame, to.cloned());
        }
        match self.send_one(&frame, to) {
            Ok(_) => Ok(()),
            Err(Error::Again) => self.enqueue(t, frame, to.cloned()),
            Err(e) => Err(e),
        }
    }

    fn local_address(&self) -> Option<Address> {
        match &self.sock {
            DgramSock::Udp(s) => Some(map_inet_from(s.local_addr().ok()?)),
            _ => self.bound.clone(),
        }
    }

    fn close(&mut self, t: &Transport) {
        if let (DgramSock::Unix(_), Some(Address::UnxDgram(UnixName::Path(p)))) =
            (&self.sock, &self.bound)
        {
            let _ = std::fs::remove_file(p);
        }
        self.drop_watches(t);
        self.sock = DgramSock::None;
        self.outq.clear();
        self.outq_bytes = 0;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl DgramDriver {
    fn enqueue(&mut self, t: &Transport, frame: Vec<u8>, to: Option<Address>) -> Result<()> {
        if self.outq_bytes + frame.len() > OUTQ_LIMIT {
            return Err(Error::Again);
        }
        self.outq_bytes += frame.len();
        self.outq.push_back((frame, to));
        self.ensure_out_watch(t)
    }
}

fn handle_io(t: &Transport, events: IoEvents) {
    if t.is_destroyed() || !events.intersects(IoEvents::IN) {
        return;
    }

    let datagrams = t.with_peer_driver(|d| {
        let dd = d
            .as_any_mut()
            .downcast_mut::<DgramDriver>()
            .ok_or(Error::InvalidArgument("not a datagram transport"))?;
        dd.read_datagrams()
    });
    let (datagrams, filtered) = match datagrams {
        Ok(dgrams) => {
            let filtered = t.is_connected();
            (dgrams, filtered)
        }
        Err(e) => {
            t.fatal(e);
            return;
        }
    };

    for (dgram, from) in datagrams {
        if t.is_destroyed() {
            return;
        }
        match unwrap_frame(&dgram) {
            Ok(payload) => {
                let from = if filtered { None } else { from };
                if let Err(e) = t.deliver_frame(payload, from.as_ref()) {
                    if filtered {
                        t.fatal(e);
                        return;
                    }
                    warn!(error = %e, "dropping malformed datagram");
                }
            }
            Err(e) => {
                // A connected peer speaking garbage kills the link; an
                // unknown sender only costs its own datagram.
                if filtered {
                    t.fatal(e);
                    return;
                }
                warn!(error = %e, "dropping malformed datagram");
            }
        }
    }
}

fn handle_writable(t: &Transport) {
    if t.is_destroyed() {
        return;
    }
    let flushed = t.with_peer_driver(|d| {
        let dd = d
            .as_any_mut()
            .downcast_mut::<DgramDriver>()
            .ok_or(Error::InvalidArgument("not a datagram transport"))?;
        dd.flush_out()
    });
    match flushed {
        Ok(true) => {
            let watch = t.with_peer_driver(|d| {
                let dd = d
                    .as_any_mut()
                    .downcast_mut::<DgramDriver>()
                    .ok_or(Error::InvalidArgument("not a datagram transport"))?;
                Ok(dd.out_watch.take())
            });
            if let Ok(Some(watch)) = watch {
                t.mainloop().del_io_watch(watch);
            }
            t.emit_writable();
        }
        Ok(false) => {}
        Err(e) => t.fatal(e),
    }
}

/// One datagram, one frame: the length prefix must cover the payload
/// exactly.
fn unwrap_frame(dgram: &[u8]) -> Result<&[u8]> {
    if dgram.len() < 4 {
        return Err(Error::Protocol("datagram shorter than a frame header"));
    }
    let len = u32::from_be_bytes([dgram[0], dgram[1], dgram[2], dgram[3]]) as usize;
    if len != dgram.len() - 4 {
        return Err(Error::Protocol("datagram length prefix mismatch"));
    }
    Ok(&dgram[4..])
}

fn unix_bind(name: &UnixName) -> Result<UnixDatagram> {
    match name {
        UnixName::Path(p) => UnixDatagram::bind(p).map_err(Error::from_io),
        UnixName::Abstract(a) => {
            let addr = UnixSocketAddr::from_abstract_name(a).map_err(Error::from_io)?;
            UnixDatagram::bind_addr(&addr).map_err(Error::from_io)
        }
    }
}

fn map_inet_from(addr: SocketAddr) -> Address {
    match addr {
        SocketAddr::V4(a) => Address::Udp4(a),
        SocketAddr::V6(a) => Address::Udp6(a),
    }
}

fn map_unix_from(addr: &UnixSocketAddr) -> Option<Address> {
    if let Some(path) = addr.as_pathname() {
        return Some(Address::UnxDgram(UnixName::Path(path.to_path_buf())));
    }
    if let Some(name) = addr.as_abstract_name() {
        return Some(Address::UnxDgram(UnixName::Abstract(name.to_vec())));
    }
    None
}

#[cfg(test)]
#[path = "dgram_tests.rs"]
mod tests;
