// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Datagram transport tests over loopback UDP and Unix datagram
//! sockets.

use super::*;
use crate::addr::resolve_address;
use crate::transport::{Flags, Transport, TransportEvents};
use plinth_codec::{Message, Value};
use std::cell::RefCell;
use std::rc::Rc;
use tempfile::TempDir;

fn stop_after(ml: &Mainloop, ms: u32) {
    ml.add_oneshot(ms, |ml, _| ml.quit(-1));
}

fn udp_endpoint(
    ml: &Mainloop,
    events: TransportEvents,
) -> (Transport, Address) {
    let t = Transport::create(ml, "udp4", events, Flags::NONE).unwrap();
    let addr = t.resolve("udp4:127.0.0.1:0").unwrap();
    t.bind(&addr).unwrap();
    let local = t.local_address().unwrap();
    (t, local)
}

#[test]
fn unconnected_deliveries_carry_the_sender_address() {
    let ml = Mainloop::new().unwrap();

    let seen: Rc<RefCell<Vec<(Message, Option<Address>)>>> = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    let (receiver, recv_addr) = udp_endpoint(
        &ml,
        TransportEvents::message(move |t: &Transport, msg, from: Option<&Address>| {
            s.borrow_mut().push((msg, from.cloned()));
            t.mainloop().quit(0);
        }),
    );

    let (sender, sender_addr) =
        udp_endpoint(&ml, TransportEvents::message(|_, _, _| {}));
    let msg = Message::new().with_field(1, Value::UInt16(7));
    sender.send_msg_to(&msg, &recv_addr).unwrap();

    stop_after(&ml, 2000);
    assert_eq!(ml.run(), 0);

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, msg);
    assert_eq!(seen[0].1.as_ref(), Some(&sender_addr));

    sender.destroy();
    receiver.destroy();
}

#[test]
fn each_datagram_is_exactly_one_message() {
    let ml = Mainloop::new().unwrap();

    let sizes = [10usize, 10_000, 1];
    let got: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
    let g = Rc::clone(&got);
    let want = sizes.len();
    let (receiver, recv_addr) = udp_endpoint(
        &ml,
        TransportEvents::raw(move |t: &Transport, bytes: &[u8], _| {
            g.borrow_mut().push(bytes.len());
            if g.borrow().len() == want {
                t.mainloop().quit(0);
            }
        }),
    );

    let (sender, _) = udp_endpoint(&ml, TransportEvents::raw(|_, _, _| {}));
    for size in sizes {
        sender.send_raw_to(&vec![0xa5u8; size], &recv_addr).unwrap();
    }

    stop_after(&ml, 2000);
    assert_eq!(ml.run(), 0);
    assert_eq!(*got.borrow(), vec![10, 10_000, 1]);

    sender.destroy();
    receiver.destroy();
}

#[test]
fn connected_sockets_deliver_without_an_address() {
    let ml = Mainloop::new().unwrap();

    let seen: Rc<RefCell<Vec<Option<Address>>>> = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    let (receiver, recv_addr) = udp_endpoint(
        &ml,
        TransportEvents::message(move |t: &Transport, _, from: Option<&Address>| {
            s.borrow_mut().push(from.cloned());
            t.mainloop().quit(0);
        }),
    );

    let sender = Transport::create(
        &ml,
        "udp4",
        TransportEvents::message(|_, _, _| {}),
        Flags::NONE,
    )
    .unwrap();
    sender.connect(&recv_addr).unwrap();
    sender.send_msg(&Message::new().with_field(1, Value::Bool(true))).unwrap();

    stop_after(&ml, 2000);
    assert_eq!(ml.run(), 0);
    // The receiver is unconnected and still sees the peer; the sender
    // side used plain send. Receiver deliveries carry the address.
    assert_eq!(seen.borrow().len(), 1);
    assert!(seen.borrow()[0].is_some());

    sender.destroy();
    receiver.destroy();
}

#[test]
fn malformed_datagrams_from_strangers_are_dropped() {
    let ml = Mainloop::new().unwrap();

    let got: Rc<RefCell<Vec<Message>>> = Rc::new(RefCell::new(Vec::new()));
    let g = Rc::clone(&got);
    let (receiver, recv_addr) = udp_endpoint(
        &ml,
        TransportEvents::message(move |t: &Transport, msg, _| {
            g.borrow_mut().push(msg);
            t.mainloop().quit(0);
        }),
    );

    // Garbage straight onto the socket, bypassing the framing.
    let Address::Udp4(raw_addr) = recv_addr else { panic!("not udp4") };
    let bare = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    bare.send_to(&[0xff; 7], raw_addr).unwrap();

    // A well-formed message afterwards still arrives.
    let (sender, _) = udp_endpoint(&ml, TransportEvents::message(|_, _, _| {}));
    let msg = Message::new().with_field(2, Value::String("ok".into()));
    sender.send_msg_to(&msg, &Address::Udp4(raw_addr)).unwrap();

    stop_after(&ml, 2000);
    assert_eq!(ml.run(), 0);
    assert_eq!(*got.borrow(), vec![msg]);

    sender.destroy();
    receiver.destroy();
}

#[test]
fn unix_datagram_paths_work_end_to_end() {
    let ml = Mainloop::new().unwrap();
    let dir = TempDir::new().unwrap();
    let addr = resolve_address(&format!("unxdgrm:{}/peer.sock", dir.path().display())).unwrap();

    let got = Rc::new(RefCell::new(Vec::new()));
    let g = Rc::clone(&got);
    let receiver = Transport::create(
        &ml,
        "unxdgrm",
        TransportEvents::raw(move |t: &Transport, bytes: &[u8], _| {
            g.borrow_mut().extend_from_slice(bytes);
            t.mainloop().quit(0);
        }),
        Flags::NONE,
    )
    .unwrap();
    receiver.bind(&addr).unwrap();

    let sender = Transport::create(
        &ml,
        "unxdgrm",
        TransportEvents::raw(|_, _, _| {}),
        Flags::NONE,
    )
    .unwrap();
    sender.connect(&addr).unwrap();
    sender.send_raw(b"local datagram").unwrap();

    stop_after(&ml, 2000);
    assert_eq!(ml.run(), 0);
    assert_eq!(&*got.borrow(), b"local datagram");

    sender.destroy();
    receiver.destroy();
}

#[test]
fn datagram_transports_do_not_listen_or_accept() {
    let ml = Mainloop::new().unwrap();
    let (t, _) = udp_endpoint(&ml, TransportEvents::message(|_, _, _| {}));
    assert!(matches!(t.listen(1), Err(Error::InvalidArgument(_))));
    t.destroy();
}
