// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream carrier: `tcp4`, `tcp6`, and `unxs` (Unix stream sockets,
//! abstract namespace included).
//!
//! Inbound bytes drain into a fragment buffer and complete frames are
//! handed to the transport core one at a time. Outbound frames that hit
//! a full socket land in a bounded output queue flushed from an OUT
//! watch; when the queue empties the transport's `writable` event
//! fires. A full queue pushes back on the sender with `Again`.

use std::any::Any;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr as UnixSocketAddr, UnixListener, UnixStream};

use tracing::debug;

use plinth_core::error::{Error, Result};
use plinth_core::fragbuf::FragBuf;
use plinth_mainloop::{IoEvents, IoWatchId, Mainloop};

use crate::addr::{lookup_v4, lookup_v6, parse_unix, Address, TransportFactory, UnixName};
use crate::transport::{Driver, Flags, Mode, Transport};

/// Bound on bytes waiting in the output queue.
const OUTQ_LIMIT: usize = 256 * 1024;

pub(crate) struct StreamFactory {
    prefix: &'static str,
}

impl StreamFactory {
    pub(crate) fn new(prefix: &'static str) -> StreamFactory {
        StreamFactory { prefix }
    }
}

impl TransportFactory for StreamFactory {
    fn prefix(&self) -> &'static str {
        self.prefix
    }

    fn resolve(&self, addr: &str) -> Result<Address> {
        let rest = addr
            .strip_prefix(self.prefix)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or(Error::NotFound)?;

        match self.prefix {
            "tcp4" => Ok(Address::Tcp4(lookup_v4(rest)?)),
            "tcp6" => Ok(Address::Tcp6(lookup_v6(rest)?)),
            "unxs" => Ok(Address::UnxStream(parse_unix(rest)?)),
            _ => Err(Error::NotFound),
        }
    }

    fn create(&self, _ml: &Mainloop, _mode: Mode, _flags: Flags) -> Result<Box<dyn Driver>> {
        Ok(Box::new(StreamDriver {
            sock: StreamSock::None,
            bound: None,
            buf: FragBuf::new(),
            watch: None,
            out_watch: None,
            outq: VecDeque::new(),
            outq_bytes: 0,
        }))
    }
}

enum StreamSock {
    None,
    TcpListener(TcpListener),
    Tcp(TcpStream),
    UnixListener(UnixListener),
    Unix(UnixStream),
}

impl StreamSock {
    fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        match self {
            StreamSock::None => None,
            StreamSock::TcpListener(s) => Some(s.as_fd()),
            StreamSock::Tcp(s) => Some(s.as_fd()),
            StreamSock::UnixListener(s) => Some(s.as_fd()),
            StreamSock::Unix(s) => Some(s.as_fd()),
        }
    }
}

pub(crate) struct StreamDriver {
    sock: StreamSock,
    bound: Option<Address>,
    buf: FragBuf,
    watch: Option<IoWatchId>,
    out_watch: Option<IoWatchId>,
    outq: VecDeque<(Vec<u8>, usize)>,
    outq_bytes: usize,
}

impl StreamDriver {
    fn read_sock(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.sock {
            StreamSock::Tcp(s) => s.read(buf).map_err(Error::from_io),
            StreamSock::Unix(s) => s.read(buf).map_err(Error::from_io),
            _ => Err(Error::InvalidArgument("not a connected stream")),
        }
    }

    fn write_sock(&mut self, buf: &[u8]) -> Result<usize> {
        match &mut self.sock {
            StreamSock::Tcp(s) => s.write(buf).map_err(Error::from_io),
            StreamSock::Unix(s) => s.write(buf).map_err(Error::from_io),
            _ => Err(Error::InvalidArgument("not a connected stream")),
        }
    }

    /// Drain the socket into the fragment buffer and pull out every
    /// complete frame. The bool is true when the peer sent EOF.
    fn read_frames(&mut self) -> Result<(Vec<Vec<u8>>, bool)> {
        let mut eof = false;
        let mut chunk = [0u8; 4096];
        loop {
            match self.read_sock(&mut chunk) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => self.buf.push(&chunk[..n])?,
                Err(Error::Again) => break,
                Err(Error::Closed) => {
                    eof = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let mut frames = Vec::new();
        while let Some(frame) = self.buf.pull()? {
            frames.push(frame.to_vec());
        }
        Ok((frames, eof))
    }

    fn do_accept(&mut self) -> Result<StreamSock> {
        match &mut self.sock {
            StreamSock::TcpListener(l) => {
                let (sock, peer) = l.accept().map_err(Error::from_io)?;
                debug!(%peer, "accepted tcp connection");
                Ok(StreamSock::Tcp(sock))
            }
            StreamSock::UnixListener(l) => {
                let (sock, _) = l.accept().map_err(Error::from_io)?;
                Ok(StreamSock::Unix(sock))
            }
            _ => Err(Error::InvalidArgument("accept on a non-listening transport")),
        }
    }

    fn install_io_watch(&mut self, t: &Transport) -> Result<()> {
        let fd = self.sock.as_fd().ok_or(Error::Closed)?;
        let handle = t.clone();
        let watch = t.mainloop().add_io_watch(
            fd,
            IoEvents::IN | IoEvents::RDHUP,
            move |_, _, _, events| handle_io(&handle, events),
        )?;
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

    /// Push queue bytes out; true once the queue is empty.
    fn flush_out(&mut self) -> Result<bool> {
        while let Some((frame, mut offset)) = self.outq.pop_front() {
            loop {
                match self.write_sock(&frame[offset..]) {
                    Ok(0) => return Err(Error::Closed),
                    Ok(n) => {
                        offset += n;
                        self.outq_bytes -= n;
                        if offset == frame.len() {
                            break;
                        }
                    }
                    Err(Error::Again) => {
                        self.outq.push_front((frame, offset));
                        return Ok(false);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(true)
    }

    fn enqueue(&mut self, t: &Transport, frame: Vec<u8>, offset: usize) -> Result<()> {
        let remaining = frame.len() - offset;
        // A partially written frame must queue regardless, or the
        // stream would corrupt; only whole frames respect the cap.
        if offset == 0 && self.outq_bytes + remaining > OUTQ_LIMIT {
            return Err(Error::Again);
        }
        self.outq_bytes += remaining;
        self.outq.push_back((frame, offset));
        self.ensure_out_watch(t)
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

impl Driver for StreamDriver {
    fn bind(&mut self, _t: &Transport, addr: &Address) -> Result<()> {
        match addr {
            Address::Tcp4(_) | Address::Tcp6(_) | Address::UnxStream(_) => {
                self.bound = Some(addr.clone());
                Ok(())
            }
            _ => Err(Error::InvalidArgument("not a stream address")),
        }
    }

    /// The listening socket is created here; the platform backlog
    /// applies, `backlog` is advisory.
    fn listen(&mut self, t: &Transport, _backlog: i32) -> Result<()> {
        let addr = self.bound.clone().ok_or(Error::InvalidArgument("listen before bind"))?;
        let sock = match &addr {
            Address::Tcp4(a) => {
                let l = TcpListener::bind(a).map_err(Error::from_io)?;
                StreamSock::TcpListener(l)
            }
            Address::Tcp6(a) => {
                let l = TcpListener::bind(a).map_err(Error::from_io)?;
                StreamSock::TcpListener(l)
            }
            Address::UnxStream(name) => StreamSock::UnixListener(unix_listen(name)?),
            _ => return Err(Error::InvalidArgument("not a stream address")),
        };
        set_stream_nonblocking(&sock)?;
        self.sock = sock;
        self.install_io_watch(t)
    }

    fn accept_from(&mut self, t: &Transport, listener: &Transport) -> Result<()> {
        let sock = listener.with_peer_driver(|ld| {
            let ld = ld
                .as_any_mut()
                .downcast_mut::<StreamDriver>()
                .ok_or(Error::InvalidArgument("listener is not a stream transport"))?;
            ld.do_accept()
        })?;
        set_stream_nonblocking(&sock)?;
        self.sock = sock;
        self.buf = FragBuf::new();
        self.install_io_watch(t)
    }

    fn connect(&mut self, t: &Transport, addr: &Address) -> Result<()> {
        let sock = match addr {
            Address::Tcp4(a) => {
                StreamSock::Tcp(TcpStream::connect(SocketAddr::V4(*a)).map_err(Error::from_io)?)
            }
            Address::Tcp6(a) => {
                StreamSock::Tcp(TcpStream::connect(SocketAddr::V6(*a)).map_err(Error::from_io)?)
            }
            Address::UnxStream(name) => StreamSock::Unix(unix_connect(name)?),
            _ => return Err(Error::InvalidArgument("not a stream address")),
        };
        set_stream_nonblocking(&sock)?;
        self.sock = sock;
        self.buf = FragBuf::new();
        self.install_io_watch(t)
    }

    fn disconnect(&mut self, t: &Transport) -> Result<()> {
        self.drop_watches(t);
        match std::mem::replace(&mut self.sock, StreamSock::None) {
            StreamSock::Tcp(s) => {
                let _ = s.shutdown(std::net::Shutdown::Both);
            }
            StreamSock::Unix(s) => {
                let _ = s.shutdown(std::net::Shutdown::Both);
            }
            StreamSock::UnixListener(_) => {
                if let Some(Address::UnxStream(UnixName::Path(p))) = &self.bound {
                    let _ = std::fs::remove_file(p);
                }
            }
            _ => {}
        }
        self.outq.clear();
        self.outq_bytes = 0;
        Ok(())
    }

    fn send_frame(&mut self, t: &Transport, frame: Vec<u8>, to: Option<&Address>) -> Result<()> {
        if to.is_some() {
            return Err(Error::Unsupported("sendto on a stream transport"));
        }
        if !self.outq.is_empty() {
            return self.enqueue(t, frame, 0);
        }

        let mut offset = 0;
        loop {
            match self.write_sock(&frame[offset..]) {
                Ok(0) => return Err(Error::Closed),
                Ok(n) => {
                    offset += n;
                    if offset == frame.len() {
                        return Ok(());
                    }
                }
                Err(Error::Again) => return self.enqueue(t, frame, offset),
                Err(e) => return Err(e),
            }
        }
    }

    fn local_address(&self) -> Option<Address> {
        match &self.sock {
            StreamSock::TcpListener(l) => socket_addr_to_address(l.local_addr().ok()?),
            StreamSock::Tcp(s) => socket_addr_to_address(s.local_addr().ok()?),
            _ => self.bound.clone(),
        }
    }

    fn close(&mut self, t: &Transport) {
        if let StreamSock::UnixListener(_) = &self.sock {
            if let Some(Address::UnxStream(UnixName::Path(p))) = &self.bound {
                let _ = std::fs::remove_file(p);
            }
        }
        self.drop_watches(t);
        self.sock = StreamSock::None;
        self.outq.clear();
        self.outq_bytes = 0;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// I/O watch entry for both listening and connected stream sockets.
fn handle_io(t: &Transport, events: IoEvents) {
    if t.is_destroyed() {
        return;
    }

    if events.intersects(IoEvents::IN) {
        if t.is_listening() {
            t.emit_connection();
            return;
        }

        let drained = t.with_peer_driver(|d| {
            let sd = d
                .as_any_mut()
                .downcast_mut::<StreamDriver>()
                .ok_or(Error::InvalidArgument("not a stream transport"))?;
            sd.read_frames()
        });
        match drained {
            Ok((frames, eof)) => {
                for frame in frames {
                    if t.is_destroyed() {
                        return;
                    }
                    if let Err(e) = t.deliver_frame(&frame, None) {
                        t.fatal(e);
                        return;
                    }
                }
                if eof {
                    let _ = t.with_peer_driver(|d| d.disconnect(t));
                    t.emit_closed(None);
                }
            }
            Err(e) => {
                t.fatal(e);
            }
        }
        return;
    }

    if events.intersects(IoEvents::HUP | IoEvents::RDHUP | IoEvents::ERR) {
        debug!("stream peer hangup");
        let _ = t.with_peer_driver(|d| d.disconnect(t));
        t.emit_closed(None);
    }
}

/// OUT watch entry: flush the queue, and when it drains drop the watch
/// and let the owner know writing is possible again.
fn handle_writable(t: &Transport) {
    if t.is_destroyed() {
        return;
    }

    let flushed = t.with_peer_driver(|d| {
        let sd = d
            .as_any_mut()
            .downcast_mut::<StreamDriver>()
            .ok_or(Error::InvalidArgument("not a stream transport"))?;
        sd.flush_out()
    });
    match flushed {
        Ok(true) => {
            let watch = t.with_peer_driver(|d| {
                let sd = d
                    .as_any_mut()
                    .downcast_mut::<StreamDriver>()
                    .ok_or(Error::InvalidArgument("not a stream transport"))?;
                Ok(sd.out_watch.take())
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

fn unix_listen(name: &UnixName) -> Result<UnixListener> {
    match name {
        UnixName::Path(p) => UnixListener::bind(p).map_err(Error::from_io),
        UnixName::Abstract(a) => {
            let addr = UnixSocketAddr::from_abstract_name(a).map_err(Error::from_io)?;
            UnixListener::bind_addr(&addr).map_err(Error::from_io)
        }
    }
}

fn unix_connect(name: &UnixName) -> Result<UnixStream> {
    match name {
        UnixName::Path(p) => UnixStream::connect(p).map_err(Error::from_io),
        UnixName::Abstract(a) => {
            let addr = UnixSocketAddr::from_abstract_name(a).map_err(Error::from_io)?;
            UnixStream::connect_addr(&addr).map_err(Error::from_io)
        }
    }
}

fn set_stream_nonblocking(sock: &StreamSock) -> Result<()> {
    match sock {
        StreamSock::None => Ok(()),
        StreamSock::TcpListener(s) => s.set_nonblocking(true).map_err(Error::from_io),
        StreamSock::Tcp(s) => s.set_nonblocking(true).map_err(Error::from_io),
        StreamSock::UnixListener(s) => s.set_nonblocking(true).map_err(Error::from_io),
        StreamSock::Unix(s) => s.set_nonblocking(true).map_err(Error::from_io),
    }
}

fn socket_addr_to_address(addr: SocketAddr) -> Option<Address> {
    match addr {
        SocketAddr::V4(a) => Some(Address::Tcp4(a)),
        SocketAddr::V6(a) => Some(Address::Tcp6(a)),
    }
}
