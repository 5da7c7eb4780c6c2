// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The loop proper: registration surface, the prepare/poll/dispatch
//! cycle, and the busy/dead discipline that makes re-entrant destroys
//! safe.
//!
//! [`Mainloop`] is a cheap-to-clone handle; all state sits behind one
//! `RefCell` owned by the handle's `Rc`. Callbacks are invoked with the
//! cell released and the handle passed back in, so any handler may call
//! any loop method — including deleting the entity it is running for.
//! Deletion during dispatch only marks the entity dead; the sweep at
//! the end of the outermost dispatch does the actual freeing.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::time::Instant;

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use parking_lot::Mutex;
use tracing::{debug, warn};

use plinth_core::error::{Error, Result};

use crate::event::{
    DeferredId, IoEvents, IoWatchId, Rearm, SigHandlerId, SubloopId, TimerId,
    TriggerMode, WakeupEvent, WakeupEvents, WakeupId,
};
use crate::subloop::{PollDesc, Subloop, SubloopFd};
use crate::superloop::Superloop;

type IoCb = Box<dyn FnMut(&Mainloop, IoWatchId, RawFd, IoEvents)>;
type TimerCb = Box<dyn FnMut(&Mainloop, TimerId)>;
type DeferredCb = Box<dyn FnMut(&Mainloop, DeferredId)>;
type SignalCb = Box<dyn FnMut(&Mainloop, SigHandlerId, Signal)>;
type WakeupCb = Box<dyn FnMut(&Mainloop, WakeupId, WakeupEvent)>;

/// At most one signal channel per process; the first loop that asks for
/// a handler owns it until that loop is dropped.
static SIGNAL_OWNER: Mutex<Option<u64>> = Mutex::new(None);

static NEXT_SERIAL: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

struct IoWatch {
    fd: RawFd,
    events: IoEvents,
    dead: bool,
    cb: Option<IoCb>,
}

/// Merged epoll registration for one user fd; several watches may share
/// it. The loop keeps its own duplicate of the fd so registration
/// outlives whatever the caller does with the original.
struct FdEntry {
    key: u64,
    owned: OwnedFd,
    trigger: TriggerMode,
    watches: Vec<u64>,
}

struct Timer {
    period_ms: u32,
    next_us: u64,
    armed: bool,
    dead: bool,
    cb: Option<TimerCb>,
}

struct Deferred {
    enabled: bool,
    dead: bool,
    cb: Option<DeferredCb>,
}

struct SigHandler {
    signal: Signal,
    dead: bool,
    cb: Option<SignalCb>,
}

struct Wakeup {
    events: WakeupEvents,
    lpf_ms: Option<u32>,
    force_ms: Option<u32>,
    last_us: u64,
    dead: bool,
    cb: Option<WakeupCb>,
}

struct SubloopFdState {
    key: u64,
    owned: OwnedFd,
    desc: PollDesc,
}

struct SubloopEntry {
    ops: Option<Box<dyn Subloop>>,
    fds: Vec<SubloopFdState>,
    timeout: Option<u32>,
    ready: bool,
    dead: bool,
}

struct SignalChannel {
    fd: SignalFd,
    mask: SigSet,
    watch: IoWatchId,
}

struct SuperState {
    ops: Box<dyn Superloop>,
    io_id: u64,
    timer_id: u64,
    defer_id: u64,
}

#[derive(Clone, Copy)]
enum Owner {
    Watch { fd: RawFd },
    Subloop { id: u64, fd: RawFd },
}

enum Dead {
    Io(u64),
    Timer(u64),
    Deferred(u64),
    Signal(u64),
    Wakeup(u64),
    Subloop(u64),
}

struct Inner {
    epoll: Epoll,
    t0: Instant,
    serial: u64,
    next_id: u64,
    io: BTreeMap<u64, IoWatch>,
    fds: HashMap<RawFd, FdEntry>,
    owners: HashMap<u64, Owner>,
    timers: BTreeMap<u64, Timer>,
    timer_q: BTreeSet<(u64, u64)>,
    deferred: BTreeMap<u64, Deferred>,
    signals: BTreeMap<u64, SigHandler>,
    sigchan: Option<SignalChannel>,
    wakeups: BTreeMap<u64, Wakeup>,
    subloops: BTreeMap<u64, SubloopEntry>,
    superloop: Option<SuperState>,
    pending: VecDeque<(u64, EpollFlags)>,
    queued: VecDeque<(u64, EpollFlags)>,
    poll_cause: WakeupEvent,
    next_timeout: Option<u32>,
    io_mode: TriggerMode,
    busy: u32,
    dead: Vec<Dead>,
    quit: Option<i32>,
}

impl Inner {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn now_us(&self) -> u64 {
        self.t0.elapsed().as_micros() as u64
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(chan) = self.sigchan.take() {
            let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&chan.mask), None);
        }
        let mut owner = SIGNAL_OWNER.lock();
        if *owner == Some(self.serial) {
            *owner = None;
        }
    }
}

/// Single-threaded event loop handle. Clones share the same loop.
#[derive(Clone)]
pub struct Mainloop {
    inner: Rc<RefCell<Inner>>,
}

impl Mainloop {
    pub fn new() -> Result<Mainloop> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(errno_err)?;
        let serial = NEXT_SERIAL.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        debug!(serial, "mainloop created");

        Ok(Mainloop {
            inner: Rc::new(RefCell::new(Inner {
                epoll,
                t0: Instant::now(),
                serial,
                next_id: 0,
                io: BTreeMap::new(),
                fds: HashMap::new(),
                owners: HashMap::new(),
                timers: BTreeMap::new(),
                timer_q: BTreeSet::new(),
                deferred: BTreeMap::new(),
                signals: BTreeMap::new(),
                sigchan: None,
                wakeups: BTreeMap::new(),
                subloops: BTreeMap::new(),
                superloop: None,
                pending: VecDeque::new(),
                queued: VecDeque::new(),
                poll_cause: WakeupEvent::Timer,
                next_timeout: Some(0),
                io_mode: TriggerMode::Level,
                busy: 0,
                dead: Vec::new(),
                quit: None,
            })),
        })
    }

    /// Microseconds since loop creation, on the monotonic clock.
    pub fn now_us(&self) -> u64 {
        self.inner.borrow().now_us()
    }

    /// Stable identity of this loop within the process.
    pub fn id(&self) -> u64 {
        self.inner.borrow().serial
    }

    /// Set the default trigger mode for new I/O watches.
    pub fn set_io_event_mode(&self, mode: TriggerMode) {
        self.inner.borrow_mut().io_mode = mode;
    }

    pub fn io_event_mode(&self) -> TriggerMode {
        self.inner.borrow().io_mode
    }

    /*
     * I/O watches
     */

    /// Watch `fd` for `events` with the loop's default trigger mode.
    /// The loop registers its own duplicate of the fd; the watch stays
    /// valid until deleted even if the caller closes the original.
    pub fn add_io_watch<F>(&self, fd: BorrowedFd<'_>, events: IoEvents, cb: F) -> Result<IoWatchId>
    where
        F: FnMut(&Mainloop, IoWatchId, RawFd, IoEvents) + 'static,
    {
        let mode = self.inner.borrow().io_mode;
        self.add_io_watch_with_trigger(fd, events, mode, cb)
    }

    /// Watch `fd`, overriding the trigger mode. Watches sharing an fd
    /// share the trigger mode of the first registration.
    pub fn add_io_watch_with_trigger<F>(
        &self,
        fd: BorrowedFd<'_>,
        events: IoEvents,
        trigger: TriggerMode,
        cb: F,
    ) -> Result<IoWatchId>
    where
        F: FnMut(&Mainloop, IoWatchId, RawFd, IoEvents) + 'static,
    {
        if events.is_empty() {
            return Err(Error::InvalidArgument("empty event mask"));
        }

        let raw = fd.as_raw_fd();
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        let wid = inner.alloc_id();
        inner.io.insert(wid, IoWatch { fd: raw, events, dead: false, cb: Some(Box::new(cb)) });

        if let Some(entry) = inner.fds.get_mut(&raw) {
            entry.watches.push(wid);
            let mask = merged_mask(&inner.io, &entry.watches);
            let mut ev = EpollEvent::new(mask.to_epoll() | trigger_flags(entry.trigger), entry.key);
            if let Err(e) = inner.epoll.modify(&entry.owned, &mut ev) {
                inner.io.remove(&wid);
                if let Some(entry) = inner.fds.get_mut(&raw) {
                    entry.watches.retain(|w| *w != wid);
                }
                return Err(errno_err(e));
            }
        } else {
            let owned = fd.try_clone_to_owned().map_err(Error::from_io)?;
            let key = inner.alloc_id();
            let ev = EpollEvent::new(events.to_epoll() | trigger_flags(trigger), key);
            if let Err(e) = inner.epoll.add(&owned, ev) {
                inner.io.remove(&wid);
                return Err(errno_err(e));
            }
            inner.fds.insert(raw, FdEntry { key, owned, trigger, watches: vec![wid] });
            inner.owners.insert(key, Owner::Watch { fd: raw });
        }

        Ok(IoWatchId::new(wid))
    }

    pub fn del_io_watch(&self, id: IoWatchId) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let wid = id.raw();

        if !inner.io.contains_key(&wid) {
            return;
        }
        if inner.busy > 0 {
            if let Some(w) = inner.io.get_mut(&wid) {
                if !w.dead {
                    w.dead = true;
                    inner.dead.push(Dead::Io(wid));
                }
            }
        } else {
            detach_io(inner, wid);
        }
    }

    /*
     * timers
     */

    /// Add a periodic timer firing every `msecs` milliseconds; 0 makes
    /// it one-shot and immediate.
    pub fn add_timer<F>(&self, msecs: u32, cb: F) -> TimerId
    where
        F: FnMut(&Mainloop, TimerId) + 'static,
    {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let id = inner.alloc_id();
        let next = inner.now_us() + msecs as u64 * 1000;

        inner.timers.insert(
            id,
            Timer { period_ms: msecs, next_us: next, armed: true, dead: false, cb: Some(Box::new(cb)) },
        );
        inner.timer_q.insert((next, id));
        TimerId::new(id)
    }

    /// One-shot timer firing once after `delay_ms`; stays registered
    /// but disarmed afterwards until re-armed or deleted.
    pub fn add_oneshot<F>(&self, delay_ms: u32, cb: F) -> TimerId
    where
        F: FnMut(&Mainloop, TimerId) + 'static,
    {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let id = inner.alloc_id();
        let next = inner.now_us() + delay_ms as u64 * 1000;

        inner.timers.insert(
            id,
            Timer { period_ms: 0, next_us: next, armed: true, dead: false, cb: Some(Box::new(cb)) },
        );
        inner.timer_q.insert((next, id));
        TimerId::new(id)
    }

    /// Re-arm or reseat a timer; see [`Rearm`].
    pub fn mod_timer(&self, id: TimerId, rearm: Rearm) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let now = inner.now_us();

        if let Some(t) = inner.timers.get_mut(&id.raw()) {
            if t.dead {
                return;
            }
            let period = match rearm {
                Rearm::Restart => t.period_ms,
                Rearm::Period(p) => {
                    t.period_ms = p;
                    p
                }
            };
            if t.armed {
                inner.timer_q.remove(&(t.next_us, id.raw()));
            }
            t.next_us = now + period as u64 * 1000;
            t.armed = true;
            inner.timer_q.insert((t.next_us, id.raw()));
        }
    }

    pub fn del_timer(&self, id: TimerId) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        if let Some(t) = inner.timers.get_mut(&id.raw()) {
            if t.armed {
                inner.timer_q.remove(&(t.next_us, id.raw()));
                t.armed = false;
            }
            if inner.busy > 0 {
                if !t.dead {
                    t.dead = true;
                    inner.dead.push(Dead::Timer(id.raw()));
                }
            } else {
                inner.timers.remove(&id.raw());
            }
        }
    }

    /*
     * deferred callbacks
     */

    /// Add an enabled deferred callback; it fires once per dispatch
    /// turn until disabled or deleted.
    pub fn add_deferred<F>(&self, cb: F) -> DeferredId
    where
        F: FnMut(&Mainloop, DeferredId) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = inner.alloc_id();
        inner.deferred.insert(id, Deferred { enabled: true, dead: false, cb: Some(Box::new(cb)) });
        DeferredId::new(id)
    }

    pub fn enable_deferred(&self, id: DeferredId) {
        if let Some(d) = self.inner.borrow_mut().deferred.get_mut(&id.raw()) {
            if !d.dead {
                d.enabled = true;
            }
        }
    }

    pub fn disable_deferred(&self, id: DeferredId) {
        if let Some(d) = self.inner.borrow_mut().deferred.get_mut(&id.raw()) {
            d.enabled = false;
        }
    }

    pub fn del_deferred(&self, id: DeferredId) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        if let Some(d) = inner.deferred.get_mut(&id.raw()) {
            d.enabled = false;
            if inner.busy > 0 {
                if !d.dead {
                    d.dead = true;
                    inner.dead.push(Dead::Deferred(id.raw()));
                }
            } else {
                inner.deferred.remove(&id.raw());
            }
        }
    }

    /*
     * signals
     */

    /// Register a handler for a process signal. The first loop to ask
    /// installs the process-wide signal channel (a `signalfd` with the
    /// signal blocked); a second loop asking while the first still
    /// lives fails with `Exists`. Handlers for the same signal run in
    /// registration order.
    pub fn add_sighandler<F>(&self, signal: Signal, cb: F) -> Result<SigHandlerId>
    where
        F: FnMut(&Mainloop, SigHandlerId, Signal) + 'static,
    {
        self.claim_signal_channel()?;

        let need_channel = self.inner.borrow().sigchan.is_none();
        if need_channel {
            let mut mask = SigSet::empty();
            mask.add(signal);
            sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).map_err(errno_err)?;
            let sfd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
                .map_err(errno_err)?;

            // The handle passed back in at dispatch time avoids a
            // reference cycle between the loop and its own watch.
            let watch = self.add_io_watch(sfd.as_fd(), IoEvents::IN, move |ml, _, _, _| {
                ml.dispatch_signals();
            })?;
            self.inner.borrow_mut().sigchan = Some(SignalChannel { fd: sfd, mask, watch });
        } else {
            let mut single = SigSet::empty();
            single.add(signal);

            let mut inner = self.inner.borrow_mut();
            if let Some(chan) = inner.sigchan.as_mut() {
                if !chan.mask.contains(signal) {
                    chan.mask.add(signal);
                    let mask = chan.mask;
                    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&single), None).map_err(errno_err)?;
                    chan.fd.set_mask(&mask).map_err(errno_err)?;
                }
            }
        }

        let mut inner = self.inner.borrow_mut();
        let id = inner.alloc_id();
        inner.signals.insert(id, SigHandler { signal, dead: false, cb: Some(Box::new(cb)) });
        Ok(SigHandlerId::new(id))
    }

    pub fn del_sighandler(&self, id: SigHandlerId) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        if let Some(h) = inner.signals.get_mut(&id.raw()) {
            if inner.busy > 0 {
                if !h.dead {
                    h.dead = true;
                    inner.dead.push(Dead::Signal(id.raw()));
                }
            } else {
                inner.signals.remove(&id.raw());
            }
        }
    }

    fn claim_signal_channel(&self) -> Result<()> {
        let serial = self.inner.borrow().serial;
        let mut owner = SIGNAL_OWNER.lock();
        match *owner {
            None => {
                *owner = Some(serial);
                Ok(())
            }
            Some(s) if s == serial => Ok(()),
            Some(_) => Err(Error::Exists),
        }
    }

    /// Drain the signalfd and run matching handlers, in registration
    /// order. Runs from the channel's internal I/O watch.
    fn dispatch_signals(&self) {
        loop {
            let read = {
                let mut inner = self.inner.borrow_mut();
                match inner.sigchan.as_mut() {
                    Some(chan) => chan.fd.read_signal(),
                    None => return,
                }
            };

            let info = match read {
                Ok(Some(info)) => info,
                Ok(None) => return,
                Err(_) => return,
            };
            let Ok(signal) = Signal::try_from(info.ssi_signo as i32) else {
                continue;
            };
            debug!(%signal, "signal received");

            let handler_ids: Vec<u64> = {
                let inner = self.inner.borrow();
                inner
                    .signals
                    .iter()
                    .filter(|(_, h)| h.signal == signal && !h.dead)
                    .map(|(id, _)| *id)
                    .collect()
            };
            for hid in handler_ids {
                let cb = {
                    let mut inner = self.inner.borrow_mut();
                    match inner.signals.get_mut(&hid) {
                        Some(h) if !h.dead => h.cb.take(),
                        _ => None,
                    }
                };
                let Some(mut cb) = cb else { continue };
                cb(self, SigHandlerId::new(hid), signal);
                let mut inner = self.inner.borrow_mut();
                if let Some(h) = inner.signals.get_mut(&hid) {
                    if h.cb.is_none() {
                        h.cb = Some(cb);
                    }
                }
                if self.quitting() {
                    return;
                }
            }
        }
    }

    /*
     * wakeup callbacks
     */

    /// Add a wakeup callback for the given wakeup kinds. `lpf_ms`
    /// rate-limits invocations; `force_ms` guarantees one at least that
    /// often (delivered as [`WakeupEvent::Limit`]).
    pub fn add_wakeup<F>(
        &self,
        events: WakeupEvents,
        lpf_ms: Option<u32>,
        force_ms: Option<u32>,
        cb: F,
    ) -> WakeupId
    where
        F: FnMut(&Mainloop, WakeupId, WakeupEvent) + 'static,
    {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let id = inner.alloc_id();
        let now = inner.now_us();
        inner.wakeups.insert(
            id,
            Wakeup { events, lpf_ms, force_ms, last_us: now, dead: false, cb: Some(Box::new(cb)) },
        );
        WakeupId::new(id)
    }

    pub fn del_wakeup(&self, id: WakeupId) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        if let Some(w) = inner.wakeups.get_mut(&id.raw()) {
            if inner.busy > 0 {
                if !w.dead {
                    w.dead = true;
                    inner.dead.push(Dead::Wakeup(id.raw()));
                }
            } else {
                inner.wakeups.remove(&id.raw());
            }
        }
    }

    /*
     * sub-loops
     */

    /// Register a foreign loop to pump; see [`Subloop`].
    pub fn add_subloop(&self, ops: Box<dyn Subloop>) -> SubloopId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.alloc_id();
        inner.subloops.insert(
            id,
            SubloopEntry { ops: Some(ops), fds: Vec::new(), timeout: None, ready: false, dead: false },
        );
        SubloopId::new(id)
    }

    pub fn del_subloop(&self, id: SubloopId) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        if let Some(s) = inner.subloops.get_mut(&id.raw()) {
            if inner.busy > 0 {
                if !s.dead {
                    s.dead = true;
                    inner.dead.push(Dead::Subloop(id.raw()));
                }
            } else {
                detach_subloop(inner, id.raw());
            }
        }
    }

    /*
     * super-loop
     */

    /// Delegate this loop's multiplexing to a host loop; see
    /// [`Superloop`] for the pumping contract.
    pub fn set_superloop(&self, mut ops: Box<dyn Superloop>) -> Result<()> {
        if self.inner.borrow().superloop.is_some() {
            return Err(Error::Exists);
        }

        let timeout = self.inner.borrow().next_timeout;
        let (io_id, timer_id, defer_id) = {
            let inner = self.inner.borrow();
            let io_id = ops.add_io(inner.epoll.0.as_fd(), IoEvents::IN);
            let timer_id = ops.add_timer(timeout);
            let defer_id = ops.add_defer(timeout == Some(0));
            (io_id, timer_id, defer_id)
        };

        self.inner.borrow_mut().superloop = Some(SuperState { ops, io_id, timer_id, defer_id });
        Ok(())
    }

    /// Detach from the host loop.
    pub fn clear_superloop(&self) -> Result<()> {
        let state = self.inner.borrow_mut().superloop.take();
        match state {
            Some(mut s) => {
                s.ops.del_io(s.io_id);
                s.ops.del_timer(s.timer_id);
                s.ops.del_defer(s.defer_id);
                s.ops.unregister();
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /*
     * the cycle
     */

    /// Pre-poll phase: pump sub-loop `prepare`/`query`, merge their fds
    /// and timeouts, refresh the super-loop registrations. Returns the
    /// poll timeout in milliseconds (`None` = block indefinitely).
    pub fn prepare(&self) -> Option<u32> {
        let sub_ids: Vec<u64> = self.inner.borrow().subloops.keys().copied().collect();
        let mut immediate = false;

        for id in sub_ids {
            let ops = {
                let mut inner = self.inner.borrow_mut();
                match inner.subloops.get_mut(&id) {
                    Some(s) if !s.dead => s.ops.take(),
                    _ => None,
                }
            };
            let Some(mut ops) = ops else { continue };

            let ready = ops.prepare();
            if ready {
                immediate = true;
            }

            let mut reqs: Vec<SubloopFd<'_>> = Vec::new();
            let timeout = ops.query(&mut reqs);

            // Duplicate fds we have not seen before while the borrows
            // in `reqs` are still alive.
            let mut requested: Vec<(RawFd, IoEvents, Option<OwnedFd>)> = Vec::new();
            {
                let inner = self.inner.borrow();
                let known: Vec<RawFd> = inner
                    .subloops
                    .get(&id)
                    .map(|s| s.fds.iter().map(|f| f.desc.fd).collect())
                    .unwrap_or_default();
                for req in &reqs {
                    let raw = req.fd.as_raw_fd();
                    let dup = if known.contains(&raw) {
                        None
                    } else {
                        req.fd.try_clone_to_owned().ok()
                    };
                    requested.push((raw, req.events, dup));
                }
            }
            drop(reqs);

            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            if let Some(entry) = inner.subloops.get_mut(&id) {
                entry.ops = Some(ops);
                entry.ready = ready;
                entry.timeout = timeout;
                sync_subloop_fds(
                    &inner.epoll,
                    &mut inner.owners,
                    &mut inner.next_id,
                    id,
                    entry,
                    requested,
                );
            }
        }

        let timeout = {
            let inner = self.inner.borrow();
            compute_timeout(&inner, immediate)
        };
        self.inner.borrow_mut().next_timeout = timeout;

        // Keep the host loop's view of us current.
        let state = self.inner.borrow_mut().superloop.take();
        if let Some(mut s) = state {
            s.ops.mod_timer(s.timer_id, timeout);
            s.ops.mod_defer(s.defer_id, timeout == Some(0));
            self.inner.borrow_mut().superloop = Some(s);
        }

        timeout
    }

    /// Poll phase: one multiplexer wait, the only blocking call in the
    /// system. Events queued by `poll_events` are consumed first.
    pub fn poll(&self, may_block: bool) -> Result<usize> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        if !inner.queued.is_empty() {
            let n = inner.queued.len();
            while let Some(ev) = inner.queued.pop_front() {
                inner.pending.push_back(ev);
            }
            inner.poll_cause = WakeupEvent::Io;
            return Ok(n);
        }

        let timeout = match (may_block, inner.next_timeout) {
            (false, _) => EpollTimeout::from(0u16),
            (true, None) => EpollTimeout::NONE,
            (true, Some(ms)) => EpollTimeout::from(ms.min(u16::MAX as u32 - 1) as u16),
        };

        let mut events = vec![EpollEvent::empty(); 64];
        let n = match inner.epoll.wait(&mut events, timeout) {
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => 0,
            Err(e) => return Err(errno_err(e)),
        };
        for ev in events.iter().take(n) {
            inner.pending.push_back((ev.data(), ev.events()));
        }
        inner.poll_cause = if n > 0 { WakeupEvent::Io } else { WakeupEvent::Timer };
        Ok(n)
    }

    /// Non-blocking drain of ready events into the internal queue, for
    /// super-loop glue running ahead of `dispatch`.
    pub fn poll_events(&self) -> Result<usize> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        let mut events = vec![EpollEvent::empty(); 64];
        let n = match inner.epoll.wait(&mut events, EpollTimeout::from(0u16)) {
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => 0,
            Err(e) => return Err(errno_err(e)),
        };
        for ev in events.iter().take(n) {
            inner.queued.push_back((ev.data(), ev.events()));
        }
        Ok(n)
    }

    /// Hand one queued event over for dispatch; true while any remain.
    pub fn poll_io(&self) -> bool {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        match inner.queued.pop_front() {
            Some(ev) => {
                inner.pending.push_back(ev);
                inner.poll_cause = WakeupEvent::Io;
                true
            }
            None => false,
        }
    }

    /// Dispatch phase: wakeups, I/O, timers, deferred, sub-loops — in
    /// that order, stopping early once `quit` is called.
    pub fn dispatch(&self) {
        self.inner.borrow_mut().busy += 1;

        self.dispatch_wakeups();
        if !self.quitting() {
            self.dispatch_io();
        }
        if !self.quitting() {
            self.dispatch_timers();
        }
        if !self.quitting() {
            self.dispatch_deferred();
        }
        if !self.quitting() {
            self.dispatch_subloops();
        }

        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.busy -= 1;
        if inner.busy == 0 {
            sweep_dead(inner);
        }
    }

    /// One full prepare/poll/dispatch cycle.
    pub fn iterate(&self) -> Result<()> {
        self.prepare();
        self.poll(true)?;
        self.dispatch();
        Ok(())
    }

    /// Iterate until [`Mainloop::quit`]; returns the exit code.
    pub fn run(&self) -> i32 {
        loop {
            if let Some(code) = self.inner.borrow().quit {
                debug!(code, "mainloop quit");
                return code;
            }
            if let Err(e) = self.iterate() {
                warn!(error = %e, "mainloop iteration failed");
                return -1;
            }
        }
    }

    /// Ask the loop to stop; no further handler runs in the current
    /// dispatch and `run` returns `exit_code`.
    pub fn quit(&self, exit_code: i32) {
        self.inner.borrow_mut().quit = Some(exit_code);
    }

    fn quitting(&self) -> bool {
        self.inner.borrow().quit.is_some()
    }

    /*
     * dispatch internals
     */

    fn dispatch_wakeups(&self) {
        let (cause, now) = {
            let inner = self.inner.borrow();
            (inner.poll_cause, inner.now_us())
        };
        let cause_mask = match cause {
            WakeupEvent::Timer => WakeupEvents::TIMER,
            _ => WakeupEvents::IO,
        };

        let ids: Vec<u64> = self.inner.borrow().wakeups.keys().copied().collect();
        for id in ids {
            let fire = {
                let inner = self.inner.borrow();
                let Some(w) = inner.wakeups.get(&id) else { continue };
                if w.dead {
                    continue;
                }
                let elapsed_ms = (now.saturating_sub(w.last_us)) / 1000;
                if w.events.contains(cause_mask)
                    && w.lpf_ms.map(|lpf| elapsed_ms >= lpf as u64).unwrap_or(true)
                {
                    Some(cause)
                } else if w.force_ms.map(|f| elapsed_ms >= f as u64).unwrap_or(false) {
                    Some(WakeupEvent::Limit)
                } else {
                    None
                }
            };
            let Some(event) = fire else { continue };

            let cb = {
                let mut inner = self.inner.borrow_mut();
                match inner.wakeups.get_mut(&id) {
                    Some(w) if !w.dead => {
                        w.last_us = now;
                        w.cb.take()
                    }
                    _ => None,
                }
            };
            let Some(mut cb) = cb else { continue };
            cb(self, WakeupId::new(id), event);
            let mut inner = self.inner.borrow_mut();
            if let Some(w) = inner.wakeups.get_mut(&id) {
                if w.cb.is_none() {
                    w.cb = Some(cb);
                }
            }
            if self.quitting() {
                return;
            }
        }
    }

    fn dispatch_io(&self) {
        const PHASES: [IoEvents; 4] = [
            IoEvents::IN.union(IoEvents::PRI),
            IoEvents::OUT,
            IoEvents::ERR,
            IoEvents::HUP.union(IoEvents::RDHUP),
        ];

        loop {
            let next = self.inner.borrow_mut().pending.pop_front();
            let Some((key, flags)) = next else { break };
            let owner = self.inner.borrow().owners.get(&key).copied();

            match owner {
                None => continue,
                Some(Owner::Subloop { id, fd }) => {
                    let mut inner = self.inner.borrow_mut();
                    if let Some(entry) = inner.subloops.get_mut(&id) {
                        if let Some(state) = entry.fds.iter_mut().find(|f| f.desc.fd == fd) {
                            state.desc.revents = IoEvents::from_epoll(flags);
                        }
                    }
                }
                Some(Owner::Watch { fd }) => {
                    let events = IoEvents::from_epoll(flags);
                    let watch_ids: Vec<u64> = self
                        .inner
                        .borrow()
                        .fds
                        .get(&fd)
                        .map(|e| e.watches.clone())
                        .unwrap_or_default();

                    // Readable before writable, errors next, hangups
                    // last; ERR and HUP are delivered regardless of
                    // the subscribed mask.
                    for phase in PHASES {
                        let phase_events = events.intersect(phase);
                        if phase_events.is_empty() {
                            continue;
                        }
                        for &wid in &watch_ids {
                            let deliver = {
                                let inner = self.inner.borrow();
                                match inner.io.get(&wid) {
                                    Some(w) if !w.dead => {
                                        let wanted = w
                                            .events
                                            .union(IoEvents::ERR)
                                            .union(IoEvents::HUP);
                                        let ev = phase_events.intersect(wanted);
                                        (!ev.is_empty()).then_some(ev)
                                    }
                                    _ => None,
                                }
                            };
                            let Some(ev) = deliver else { continue };

                            let cb = {
                                let mut inner = self.inner.borrow_mut();
                                inner.io.get_mut(&wid).and_then(|w| w.cb.take())
                            };
                            let Some(mut cb) = cb else { continue };
                            cb(self, IoWatchId::new(wid), fd, ev);
                            let mut inner = self.inner.borrow_mut();
                            if let Some(w) = inner.io.get_mut(&wid) {
                                if w.cb.is_none() {
                                    w.cb = Some(cb);
                                }
                            }
                            drop(inner);
                            if self.quitting() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    fn dispatch_timers(&self) {
        loop {
            let due = {
                let mut guard = self.inner.borrow_mut();
                let inner = &mut *guard;
                let now = inner.now_us();
                match inner.timer_q.first().copied() {
                    Some((expiry, id)) if expiry <= now => {
                        inner.timer_q.remove(&(expiry, id));
                        if let Some(t) = inner.timers.get_mut(&id) {
                            t.armed = false;
                            if t.dead {
                                None
                            } else {
                                t.cb.take().map(|cb| (id, cb))
                            }
                        } else {
                            None
                        }
                    }
                    _ => break,
                }
            };

            let Some((id, mut cb)) = due else { continue };
            cb(self, TimerId::new(id));

            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let now = inner.now_us();
            if let Some(t) = inner.timers.get_mut(&id) {
                if t.cb.is_none() {
                    t.cb = Some(cb);
                }
                // Re-arm periodic timers unless the callback already
                // reseated or killed the entry.
                if !t.dead && !t.armed && t.period_ms > 0 {
                    t.next_us = now + t.period_ms as u64 * 1000;
                    t.armed = true;
                    inner.timer_q.insert((t.next_us, id));
                }
            }
            drop(guard);
            if self.quitting() {
                return;
            }
        }
    }

    fn dispatch_deferred(&self) {
        let mut ran: BTreeSet<u64> = BTreeSet::new();

        // Deferred work scheduled during dispatch still runs in this
        // turn; keep sweeping until a pass finds nothing new.
        loop {
            let ids: Vec<u64> = {
                let inner = self.inner.borrow();
                inner
                    .deferred
                    .iter()
                    .filter(|(id, d)| d.enabled && !d.dead && !ran.contains(id))
                    .map(|(id, _)| *id)
                    .collect()
            };
            if ids.is_empty() {
                break;
            }

            for id in ids {
                ran.insert(id);
                let cb = {
                    let mut inner = self.inner.borrow_mut();
                    match inner.deferred.get_mut(&id) {
                        Some(d) if d.enabled && !d.dead => d.cb.take(),
                        _ => None,
                    }
                };
                let Some(mut cb) = cb else { continue };
                cb(self, DeferredId::new(id));
                let mut inner = self.inner.borrow_mut();
                if let Some(d) = inner.deferred.get_mut(&id) {
                    if d.cb.is_none() {
                        d.cb = Some(cb);
                    }
                }
                drop(inner);
                if self.quitting() {
                    return;
                }
            }
        }
    }

    fn dispatch_subloops(&self) {
        let ids: Vec<u64> = self.inner.borrow().subloops.keys().copied().collect();

        for id in ids {
            let taken = {
                let mut inner = self.inner.borrow_mut();
                match inner.subloops.get_mut(&id) {
                    Some(s) if !s.dead => {
                        let descs: Vec<PollDesc> = s.fds.iter().map(|f| f.desc).collect();
                        let ready = s.ready;
                        s.ready = false;
                        s.ops.take().map(|ops| (ops, descs, ready))
                    }
                    _ => None,
                }
            };
            let Some((mut ops, descs, ready)) = taken else { continue };

            if ready || ops.check(&descs) {
                ops.dispatch();
            }

            let mut inner = self.inner.borrow_mut();
            if let Some(s) = inner.subloops.get_mut(&id) {
                if s.ops.is_none() {
                    s.ops = Some(ops);
                }
                for f in &mut s.fds {
                    f.desc.revents = IoEvents::NONE;
                }
            }
            drop(inner);
            if self.quitting() {
                return;
            }
        }
    }
}

/*
 * helpers
 */

fn trigger_flags(mode: TriggerMode) -> EpollFlags {
    match mode {
        TriggerMode::Level => EpollFlags::empty(),
        TriggerMode::Edge => EpollFlags::EPOLLET,
    }
}

fn merged_mask(io: &BTreeMap<u64, IoWatch>, watches: &[u64]) -> IoEvents {
    watches
        .iter()
        .filter_map(|w| io.get(w))
        .filter(|w| !w.dead)
        .fold(IoEvents::NONE, |acc, w| acc.union(w.events))
}

fn errno_err(errno: nix::errno::Errno) -> Error {
    Error::from_io(std::io::Error::from_raw_os_error(errno as i32))
}

/// Poll timeout for the next cycle: 0 when work is already pending,
/// else the earliest of timer expiries, wakeup force deadlines, and
/// sub-loop timeouts. Sub-millisecond remainders round up so a timer
/// never busy-spins.
fn compute_timeout(inner: &Inner, immediate: bool) -> Option<u32> {
    if immediate || inner.quit.is_some() {
        return Some(0);
    }
    if !inner.pending.is_empty() || !inner.queued.is_empty() {
        return Some(0);
    }
    if inner.deferred.values().any(|d| d.enabled && !d.dead) {
        return Some(0);
    }

    let now = inner.now_us();
    let mut timeout: Option<u64> = None;
    let mut merge = |ms: u64| {
        timeout = Some(timeout.map_or(ms, |t| t.min(ms)));
    };

    if let Some((expiry, _)) = inner.timer_q.first() {
        merge(if *expiry <= now { 0 } else { (expiry - now).div_ceil(1000).max(1) });
    }
    for w in inner.wakeups.values() {
        if w.dead {
            continue;
        }
        if let Some(force) = w.force_ms {
            let deadline = w.last_us + force as u64 * 1000;
            merge(if deadline <= now { 0 } else { (deadline - now).div_ceil(1000) });
        }
    }
    for s in inner.subloops.values() {
        if s.dead {
            continue;
        }
        if let Some(ms) = s.timeout {
            merge(ms as u64);
        }
    }

    timeout.map(|ms| ms.min(u32::MAX as u64) as u32)
}

/// Reconcile a sub-loop's queried fd set with its epoll registrations.
fn sync_subloop_fds(
    epoll: &Epoll,
    owners: &mut HashMap<u64, Owner>,
    next_id: &mut u64,
    subloop_id: u64,
    entry: &mut SubloopEntry,
    requested: Vec<(RawFd, IoEvents, Option<OwnedFd>)>,
) {
    // Drop registrations the sub-loop no longer wants.
    entry.fds.retain(|state| {
        let keep = requested.iter().any(|(fd, _, _)| *fd == state.desc.fd);
        if !keep {
            let _ = epoll.delete(&state.owned);
            owners.remove(&state.key);
        }
        keep
    });

    for (fd, events, dup) in requested {
        match entry.fds.iter_mut().find(|s| s.desc.fd == fd) {
            Some(state) => {
                if state.desc.events != events {
                    state.desc.events = events;
                    let mut ev = EpollEvent::new(events.to_epoll(), state.key);
                    let _ = epoll.modify(&state.owned, &mut ev);
                }
                state.desc.revents = IoEvents::NONE;
            }
            None => {
                let Some(owned) = dup else { continue };
                *next_id += 1;
                let key = *next_id;
                let ev = EpollEvent::new(events.to_epoll(), key);
                if epoll.add(&owned, ev).is_ok() {
                    owners.insert(key, Owner::Subloop { id: subloop_id, fd });
                    entry.fds.push(SubloopFdState {
                        key,
                        owned,
                        desc: PollDesc { fd, events, revents: IoEvents::NONE },
                    });
                }
            }
        }
    }
}

fn detach_io(inner: &mut Inner, wid: u64) {
    let Some(watch) = inner.io.remove(&wid) else { return };
    let fd = watch.fd;

    let now_empty = match inner.fds.get_mut(&fd) {
        Some(entry) => {
            entry.watches.retain(|w| *w != wid);
            entry.watches.is_empty()
        }
        None => return,
    };

    if now_empty {
        if let Some(entry) = inner.fds.remove(&fd) {
            let _ = inner.epoll.delete(&entry.owned);
            inner.owners.remove(&entry.key);
        }
    } else if let Some(entry) = inner.fds.get(&fd) {
        let mask = merged_mask(&inner.io, &entry.watches);
        let mut ev = EpollEvent::new(mask.to_epoll() | trigger_flags(entry.trigger), entry.key);
        let _ = inner.epoll.modify(&entry.owned, &mut ev);
    }
}

fn detach_subloop(inner: &mut Inner, id: u64) {
    if let Some(entry) = inner.subloops.remove(&id) {
        for state in entry.fds {
            let _ = inner.epoll.delete(&state.owned);
            inner.owners.remove(&state.key);
        }
    }
}

/// Free everything deleted while a dispatch was running.
fn sweep_dead(inner: &mut Inner) {
    let dead = std::mem::take(&mut inner.dead);
    for entry in dead {
        match entry {
            Dead::Io(id) => detach_io(inner, id),
            Dead::Timer(id) => {
                inner.timers.remove(&id);
            }
            Dead::Deferred(id) => {
                inner.deferred.remove(&id);
            }
            Dead::Signal(id) => {
                inner.signals.remove(&id);
            }
            Dead::Wakeup(id) => {
                inner.wakeups.remove(&id);
            }
            Dead::Subloop(id) => detach_subloop(inner, id),
        }
    }
}

#[cfg(test)]
#[path = "mainloop_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "signal_tests.rs"]
mod signal_tests;

#[cfg(test)]
#[path = "subloop_tests.rs"]
mod subloop_tests;
