// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-id table and the per-loop buses.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};
use std::sync::OnceLock;

use parking_lot::RwLock;
use smol_str::SmolStr;
use tracing::debug;

use plinth_codec::Message;
use plinth_core::error::{Error, Result};
use plinth_mainloop::Mainloop;

use crate::mask::EventMask;

/// Reserved id for unknown events.
pub const EVENT_UNKNOWN: u32 = 0;

/// Reserved name for unknown events.
pub const EVENT_UNKNOWN_NAME: &str = "unknown";

/// Name of the default per-loop bus.
pub const GLOBAL_BUS_NAME: &str = "global";

struct IdTable {
    by_name: HashMap<SmolStr, u32>,
    names: Vec<SmolStr>,
}

fn id_table() -> &'static RwLock<IdTable> {
    static TABLE: OnceLock<RwLock<IdTable>> = OnceLock::new();
    TABLE.get_or_init(|| {
        RwLock::new(IdTable {
            by_name: HashMap::from([(SmolStr::new(EVENT_UNKNOWN_NAME), EVENT_UNKNOWN)]),
            names: vec![SmolStr::new(EVENT_UNKNOWN_NAME)],
        })
    })
}

/// Look up (or mint) the process-wide id of an event name. Every call
/// with the same name returns the same id until process exit.
pub fn event_id(name: &str) -> u32 {
    {
        let table = id_table().read();
        if let Some(id) = table.by_name.get(name) {
            return *id;
        }
    }

    let mut table = id_table().write();
    if let Some(id) = table.by_name.get(name) {
        return *id;
    }
    let id = table.names.len() as u32;
    let name = SmolStr::new(name);
    table.names.push(name.clone());
    table.by_name.insert(name.clone(), id);
    debug!(%name, id, "event registered");
    id
}

/// Reverse lookup of a registered event id.
pub fn event_name(id: u32) -> Option<SmolStr> {
    id_table().read().names.get(id as usize).cloned()
}

/// Payload attached to an emitted event.
#[derive(Clone)]
pub enum EventPayload {
    None,
    Json(serde_json::Value),
    Message(Message),
    Custom(Rc<dyn Any>),
}

/// Synchronous delivery runs the watches in the emitter's stack frame;
/// asynchronous delivery schedules them as a loop deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sync,
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventWatchId(u64);

type WatchCb = Box<dyn FnMut(&EventBus, u32, &EventPayload)>;

struct Watch {
    mask: EventMask,
    dead: bool,
    cb: Option<WatchCb>,
}

struct BusInner {
    ml: Mainloop,
    name: SmolStr,
    watches: BTreeMap<u64, Watch>,
    next_id: u64,
    busy: u32,
    dead: Vec<u64>,
}

thread_local! {
    /// Buses per (loop, name); weak so a dropped bus goes away with
    /// its last handle.
    static BUSES: RefCell<HashMap<(u64, SmolStr), Weak<RefCell<BusInner>>>> =
        RefCell::new(HashMap::new());
}

/// One named synchronous event bus bound to a loop. Handles are cheap
/// clones.
#[derive(Clone)]
pub struct EventBus {
    inner: Rc<RefCell<BusInner>>,
}

impl EventBus {
    /// Look up (or create) the bus with `name` on `ml`.
    pub fn get(ml: &Mainloop, name: &str) -> EventBus {
        let key = (ml.id(), SmolStr::new(name));
        BUSES.with(|buses| {
            let mut buses = buses.borrow_mut();
            if let Some(weak) = buses.get(&key) {
                if let Some(inner) = weak.upgrade() {
                    return EventBus { inner };
                }
            }
            let inner = Rc::new(RefCell::new(BusInner {
                ml: ml.clone(),
                name: key.1.clone(),
                watches: BTreeMap::new(),
                next_id: 0,
                busy: 0,
                dead: Vec::new(),
            }));
            buses.insert(key, Rc::downgrade(&inner));
            EventBus { inner }
        })
    }

    /// The default bus of a loop.
    pub fn global(ml: &Mainloop) -> EventBus {
        EventBus::get(ml, GLOBAL_BUS_NAME)
    }

    pub fn name(&self) -> SmolStr {
        self.inner.borrow().name.clone()
    }

    /// Watch a single event id.
    pub fn add_watch<F>(&self, id: u32, cb: F) -> Result<EventWatchId>
    where
        F: FnMut(&EventBus, u32, &EventPayload) + 'static,
    {
        self.add_watch_mask([id].into_iter().collect(), cb)
    }

    /// Watch every event id set in `mask`.
    pub fn add_watch_mask<F>(&self, mask: EventMask, cb: F) -> Result<EventWatchId>
    where
        F: FnMut(&EventBus, u32, &EventPayload) + 'static,
    {
        if mask.is_empty() {
            return Err(Error::InvalidArgument("empty event mask"));
        }
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.watches.insert(id, Watch { mask, dead: false, cb: Some(Box::new(cb)) });
        Ok(EventWatchId(id))
    }

    /// Remove a watch; from inside a delivery the removal is deferred
    /// to the end of the emit.
    pub fn del_watch(&self, id: EventWatchId) {
        let mut inner = self.inner.borrow_mut();
        let busy = inner.busy > 0;
        if let Some(w) = inner.watches.get_mut(&id.0) {
            if busy {
                if !w.dead {
                    w.dead = true;
                    inner.dead.push(id.0);
                }
            } else {
                inner.watches.remove(&id.0);
            }
        }
    }

    /// Emit an event to every watch whose mask covers it.
    pub fn emit(&self, id: u32, delivery: Delivery, payload: EventPayload) -> Result<()> {
        if id == EVENT_UNKNOWN {
            return Err(Error::InvalidArgument("cannot emit the unknown event"));
        }

        match delivery {
            Delivery::Sync => {
                self.dispatch(id, &payload);
                Ok(())
            }
            Delivery::Async => {
                let bus = self.clone();
                let ml = self.inner.borrow().ml.clone();
                ml.add_deferred(move |ml, did| {
                    ml.del_deferred(did);
                    bus.dispatch(id, &payload);
                });
                Ok(())
            }
        }
    }

    fn dispatch(&self, id: u32, payload: &EventPayload) {
        self.inner.borrow_mut().busy += 1;

        let watch_ids: Vec<u64> = {
            let inner = self.inner.borrow();
            inner
                .watches
                .iter()
                .filter(|(_, w)| !w.dead && w.mask.test(id))
                .map(|(wid, _)| *wid)
                .collect()
        };

        for wid in watch_ids {
            let cb = {
                let mut inner = self.inner.borrow_mut();
                match inner.watches.get_mut(&wid) {
                    Some(w) if !w.dead => w.cb.take(),
                    _ => None,
                }
            };
            let Some(mut cb) = cb else { continue };
            cb(self, id, payload);
            let mut inner = self.inner.borrow_mut();
            if let Some(w) = inner.watches.get_mut(&wid) {
                if w.cb.is_none() {
                    w.cb = Some(cb);
                }
            }
        }

        let mut inner = self.inner.borrow_mut();
        inner.busy -= 1;
        if inner.busy == 0 {
            let dead = std::mem::take(&mut inner.dead);
            for wid in dead {
                inner.watches.remove(&wid);
            }
        }
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
