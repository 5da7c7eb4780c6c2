// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! plinth-mainloop: the single-threaded cooperative event loop.
//!
//! One `prepare → poll → dispatch` cycle per iteration, multiplexed over
//! a single `epoll` instance: I/O watches, microsecond timers, deferred
//! callbacks, process signals (via `signalfd`), rate-limited wakeup
//! callbacks, foreign loops pumped by ours ([`Subloop`]) and a foreign
//! loop pumping ours ([`Superloop`]).
//!
//! Handlers run to completion on the loop thread; the only blocking
//! call anywhere is the poll itself. Destroying an entity from inside
//! any callback — its own included — is always safe: the loop defers
//! the actual teardown until the outermost dispatch returns.

pub mod event;
mod mainloop;
pub mod subloop;
pub mod superloop;

pub use event::{
    DeferredId, IoEvents, IoWatchId, Rearm, SigHandlerId, SubloopId, TimerId,
    TriggerMode, WakeupEvent, WakeupEvents, WakeupId,
};
pub use mainloop::Mainloop;
pub use nix::sys::signal::Signal;
pub use subloop::{PollDesc, Subloop, SubloopFd};
pub use superloop::Superloop;
