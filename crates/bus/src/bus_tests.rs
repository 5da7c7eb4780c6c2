// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus tests: id stability, masks, sync/async delivery.
//!
//! Event names are unique per test; the id table is process-wide.

use super::*;
use plinth_codec::Value;

#[test]
fn ids_are_stable_and_distinct_per_name() {
    let a = event_id("bus-test-alpha");
    let b = event_id("bus-test-beta");
    assert_ne!(a, b);
    assert_ne!(a, EVENT_UNKNOWN);

    // Same answer every time, for the life of the process.
    for _ in 0..10 {
        assert_eq!(event_id("bus-test-alpha"), a);
    }
    assert_eq!(event_name(a).as_deref(), Some("bus-test-alpha"));
}

#[test]
fn id_zero_is_the_unknown_event() {
    assert_eq!(event_id(EVENT_UNKNOWN_NAME), EVENT_UNKNOWN);
    assert_eq!(event_name(EVENT_UNKNOWN).as_deref(), Some(EVENT_UNKNOWN_NAME));
}

#[test]
fn same_loop_and_name_share_one_bus() {
    let ml = Mainloop::new().unwrap();
    let a = EventBus::get(&ml, "shared");
    let b = EventBus::get(&ml, "shared");

    let hits = Rc::new(RefCell::new(0u32));
    let h = Rc::clone(&hits);
    let id = event_id("bus-test-shared");
    a.add_watch(id, move |_, _, _| *h.borrow_mut() += 1).unwrap();

    // Emitting on the second handle reaches the watch on the first.
    b.emit(id, Delivery::Sync, EventPayload::None).unwrap();
    assert_eq!(*hits.borrow(), 1);
}

#[test]
fn sync_emit_runs_in_the_emit_stack() {
    let ml = Mainloop::new().unwrap();
    let bus = EventBus::global(&ml);
    let id = event_id("bus-test-sync");

    let got = Rc::new(RefCell::new(None));
    let g = Rc::clone(&got);
    bus.add_watch(id, move |_, eid, payload| {
        if let EventPayload::Json(v) = payload {
            *g.borrow_mut() = Some((eid, v.clone()));
        }
    })
    .unwrap();

    bus.emit(id, Delivery::Sync, EventPayload::Json(serde_json::json!({"k": 1})))
        .unwrap();
    assert_eq!(*got.borrow(), Some((id, serde_json::json!({"k": 1}))));
}

#[test]
fn async_emit_arrives_on_the_next_dispatch_turn() {
    let ml = Mainloop::new().unwrap();
    let bus = EventBus::global(&ml);
    let id = event_id("bus-test-async");

    let got = Rc::new(RefCell::new(Vec::new()));
    let g = Rc::clone(&got);
    bus.add_watch(id, move |_, _, payload| {
        if let EventPayload::Message(m) = payload {
            g.borrow_mut().push(m.clone());
        }
    })
    .unwrap();

    let msg = Message::new().with_field(1, Value::UInt8(5));
    bus.emit(id, Delivery::Async, EventPayload::Message(msg.clone())).unwrap();
    assert!(got.borrow().is_empty(), "async delivery must not be immediate");

    ml.iterate().unwrap();
    assert_eq!(*got.borrow(), vec![msg]);
}

#[test]
fn mask_watches_hear_every_subscribed_event() {
    let ml = Mainloop::new().unwrap();
    let bus = EventBus::get(&ml, "mask");
    let a = event_id("bus-test-mask-a");
    let b = event_id("bus-test-mask-b");
    let c = event_id("bus-test-mask-c");

    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    bus.add_watch_mask([a, c].into_iter().collect(), move |_, id, _| {
        s.borrow_mut().push(id);
    })
    .unwrap();

    for id in [a, b, c] {
        bus.emit(id, Delivery::Sync, EventPayload::None).unwrap();
    }
    assert_eq!(*seen.borrow(), vec![a, c]);
}

#[test]
fn custom_payloads_pass_by_reference_counting() {
    let ml = Mainloop::new().unwrap();
    let bus = EventBus::get(&ml, "custom");
    let id = event_id("bus-test-custom");

    let got = Rc::new(RefCell::new(0u64));
    let g = Rc::clone(&got);
    bus.add_watch(id, move |_, _, payload| {
        if let EventPayload::Custom(any) = payload {
            if let Some(n) = any.downcast_ref::<u64>() {
                *g.borrow_mut() = *n;
            }
        }
    })
    .unwrap();

    bus.emit(id, Delivery::Sync, EventPayload::Custom(Rc::new(77u64))).unwrap();
    assert_eq!(*got.borrow(), 77);
}

#[test]
fn removing_a_watch_during_delivery_is_deferred() {
    let ml = Mainloop::new().unwrap();
    let bus = EventBus::get(&ml, "self-del");
    let id = event_id("bus-test-self-del");

    let first = Rc::new(RefCell::new(0u32));
    let second = Rc::new(RefCell::new(0u32));

    let f = Rc::clone(&first);
    let watch = Rc::new(RefCell::new(None));
    let w = Rc::clone(&watch);
    let wid = bus
        .add_watch(id, move |bus, _, _| {
            *f.borrow_mut() += 1;
            if let Some(wid) = *w.borrow() {
                bus.del_watch(wid);
            }
        })
        .unwrap();
    *watch.borrow_mut() = Some(wid);

    let s = Rc::clone(&second);
    bus.add_watch(id, move |_, _, _| *s.borrow_mut() += 1).unwrap();

    // First emit: both run, the first removes itself mid-delivery.
    bus.emit(id, Delivery::Sync, EventPayload::None).unwrap();
    assert_eq!((*first.borrow(), *second.borrow()), (1, 1));

    // Second emit: only the survivor runs.
    bus.emit(id, Delivery::Sync, EventPayload::None).unwrap();
    assert_eq!((*first.borrow(), *second.borrow()), (1, 2));
}

#[test]
fn emitting_the_unknown_event_is_rejected() {
    let ml = Mainloop::new().unwrap();
    let bus = EventBus::get(&ml, "reject");
    assert!(matches!(
        bus.emit(EVENT_UNKNOWN, Delivery::Sync, EventPayload::None),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn empty_masks_are_rejected() {
    let ml = Mainloop::new().unwrap();
    let bus = EventBus::get(&ml, "empty");
    assert!(matches!(
        bus.add_watch_mask(EventMask::new(), |_, _, _| {}),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn buses_with_different_names_are_independent() {
    let ml = Mainloop::new().unwrap();
    let a = EventBus::get(&ml, "iso-a");
    let b = EventBus::get(&ml, "iso-b");
    let id = event_id("bus-test-iso");

    let hits = Rc::new(RefCell::new(0u32));
    let h = Rc::clone(&hits);
    a.add_watch(id, move |_, _, _| *h.borrow_mut() += 1).unwrap();

    b.emit(id, Delivery::Sync, EventPayload::None).unwrap();
    assert_eq!(*hits.borrow(), 0);

    a.emit(id, Delivery::Sync, EventPayload::None).unwrap();
    assert_eq!(*hits.borrow(), 1);
}
