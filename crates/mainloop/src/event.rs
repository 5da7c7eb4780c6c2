// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event masks, trigger modes, and entity handles.

use nix::sys::epoll::EpollFlags;

/// I/O readiness mask for watches and sub-loop fds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct IoEvents(u16);

impl IoEvents {
    pub const NONE: IoEvents = IoEvents(0);
    pub const IN: IoEvents = IoEvents(0x01);
    pub const PRI: IoEvents = IoEvents(0x02);
    pub const OUT: IoEvents = IoEvents(0x04);
    pub const RDHUP: IoEvents = IoEvents(0x08);
    pub const HUP: IoEvents = IoEvents(0x10);
    pub const ERR: IoEvents = IoEvents(0x20);

    pub const fn union(self, other: IoEvents) -> IoEvents {
        IoEvents(self.0 | other.0)
    }

    pub const fn intersect(self, other: IoEvents) -> IoEvents {
        IoEvents(self.0 & other.0)
    }

    pub const fn contains(self, other: IoEvents) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: IoEvents) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Subscription-side epoll flags; HUP and ERR are always reported
    /// by the kernel and never need registering.
    pub(crate) fn to_epoll(self) -> EpollFlags {
        let mut flags = EpollFlags::empty();
        if self.contains(IoEvents::IN) {
            flags |= EpollFlags::EPOLLIN;
        }
        if self.contains(IoEvents::PRI) {
            flags |= EpollFlags::EPOLLPRI;
        }
        if self.contains(IoEvents::OUT) {
            flags |= EpollFlags::EPOLLOUT;
        }
        if self.contains(IoEvents::RDHUP) {
            flags |= EpollFlags::EPOLLRDHUP;
        }
        flags
    }

    pub(crate) fn from_epoll(flags: EpollFlags) -> IoEvents {
        let mut ev = IoEvents::NONE;
        if flags.contains(EpollFlags::EPOLLIN) {
            ev = ev.union(IoEvents::IN);
        }
        if flags.contains(EpollFlags::EPOLLPRI) {
            ev = ev.union(IoEvents::PRI);
        }
        if flags.contains(EpollFlags::EPOLLOUT) {
            ev = ev.union(IoEvents::OUT);
        }
        if flags.contains(EpollFlags::EPOLLRDHUP) {
            ev = ev.union(IoEvents::RDHUP);
        }
        if flags.contains(EpollFlags::EPOLLHUP) {
            ev = ev.union(IoEvents::HUP);
        }
        if flags.contains(EpollFlags::EPOLLERR) {
            ev = ev.union(IoEvents::ERR);
        }
        ev
    }
}

impl std::ops::BitOr for IoEvents {
    type Output = IoEvents;

    fn bitor(self, rhs: IoEvents) -> IoEvents {
        self.union(rhs)
    }
}

impl std::ops::BitAnd for IoEvents {
    type Output = IoEvents;

    fn bitand(self, rhs: IoEvents) -> IoEvents {
        self.intersect(rhs)
    }
}

impl std::ops::BitOrAssign for IoEvents {
    fn bitor_assign(&mut self, rhs: IoEvents) {
        *self = self.union(rhs);
    }
}

/// Event trigger mode; the per-loop default is level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    #[default]
    Level,
    Edge,
}

/// Timer re-arm request for `mod_timer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    /// Re-arm against the original period.
    Restart,
    /// Reseat with a new period in milliseconds (0 = one-shot).
    Period(u32),
}

/// Which loop wakeups a wakeup callback subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WakeupEvents(u8);

impl WakeupEvents {
    pub const NONE: WakeupEvents = WakeupEvents(0);
    pub const TIMER: WakeupEvents = WakeupEvents(0x1);
    pub const IO: WakeupEvents = WakeupEvents(0x2);
    pub const ANY: WakeupEvents = WakeupEvents(0x3);

    pub const fn contains(self, other: WakeupEvents) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for WakeupEvents {
    type Output = WakeupEvents;

    fn bitor(self, rhs: WakeupEvents) -> WakeupEvents {
        WakeupEvents(self.0 | rhs.0)
    }
}

/// Why a wakeup callback fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupEvent {
    /// The loop woke for a timer.
    Timer,
    /// The loop woke for I/O (signals included).
    Io,
    /// The forced-trigger interval elapsed.
    Limit,
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub(crate) fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub(crate) fn raw(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

define_handle! {
    /// Handle of a registered I/O watch.
    IoWatchId
}
define_handle! {
    /// Handle of a registered timer.
    TimerId
}
define_handle! {
    /// Handle of a registered deferred callback.
    DeferredId
}
define_handle! {
    /// Handle of a registered signal handler.
    SigHandlerId
}
define_handle! {
    /// Handle of a registered wakeup callback.
    WakeupId
}
define_handle! {
    /// Handle of a registered sub-loop.
    SubloopId
}
