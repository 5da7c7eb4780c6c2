// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! plinth-transport: uniform send/receive over stream, datagram, and
//! in-process carriers.
//!
//! A [`Transport`] is created against a [`Mainloop`], resolves an
//! [`Address`] through the factory registry, binds/listens/connects,
//! and moves payloads in the codec of its [`Mode`]: generic messages,
//! raw frames, registered structs, native TLV trees, or JSON. Receive
//! readiness is an ordinary loop I/O watch; stream bytes reassemble in
//! a fragment buffer and every complete frame is lifted to the mode's
//! value type before the receive callback runs.
//!
//! [`Mainloop`]: plinth_mainloop::Mainloop

pub mod addr;
mod dgram;
mod internal;
mod stream;
pub mod transport;

pub use addr::{register_factory, resolve_address, Address, TransportFactory, UnixName};
pub use transport::{
    ConnState, Flags, Mode, RecvHandler, Transport, TransportEvents,
};
