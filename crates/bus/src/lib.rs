// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! plinth-bus: named events over per-loop buses.
//!
//! Event names get process-wide stable numeric ids, so any two
//! components asking for the same name agree on the id for the life of
//! the process. Watches subscribe to a single id or a compact bitmask
//! of ids; emission is synchronous (in the emitter's stack frame,
//! inside the bus's busy guard) or asynchronous through a loop
//! deferred.

pub mod bus;
pub mod mask;

pub use bus::{
    event_id, event_name, Delivery, EventBus, EventPayload, EventWatchId, EVENT_UNKNOWN,
    EVENT_UNKNOWN_NAME, GLOBAL_BUS_NAME,
};
pub use mask::EventMask;
