// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport specs: TCP echo and datagram framing.

use std::cell::RefCell;
use std::rc::Rc;

use plinth_codec::{Message, Value};
use plinth_mainloop::Mainloop;
use plinth_transport::{Address, Flags, Transport, TransportEvents};

fn stop_after(ml: &Mainloop, ms: u32) {
    ml.add_oneshot(ms, |ml, _| ml.quit(-1));
}

/// TCP echo: server binds an ephemeral loopback port, listens and
/// accepts; the client connects and sends a generic message; the
/// server's receive callback sees an equal message and sends it back;
/// the client receives the same. Both sides close cleanly.
#[test]
fn tcp_echo_roundtrips_a_generic_message() {
    let ml = Mainloop::new().unwrap();

    let accepted: Rc<RefCell<Vec<Transport>>> = Rc::new(RefCell::new(Vec::new()));
    let server_seen: Rc<RefCell<Option<Message>>> = Rc::new(RefCell::new(None));

    let holder = Rc::clone(&accepted);
    let seen = Rc::clone(&server_seen);
    let listener_events = TransportEvents::message(|_, _, _| {})
        .on_connection(move |listener| {
            let seen = Rc::clone(&seen);
            let conn_events = TransportEvents::message(move |t: &Transport, msg, _| {
                *seen.borrow_mut() = Some(msg.clone());
                t.send_msg(&msg).unwrap();
            })
            .on_closed(|_, _| {});
            holder
                .borrow_mut()
                .push(Transport::accept(listener, conn_events, Flags::NONE).unwrap());
        })
        .on_closed(|_, _| {});

    let listener = Transport::create(&ml, "tcp4", listener_events, Flags::NONE).unwrap();
    let bind_addr = listener.resolve("tcp4:127.0.0.1:0").unwrap();
    listener.bind(&bind_addr).unwrap();
    listener.listen(4).unwrap();
    let server_addr = listener.local_address().unwrap();
    assert!(matches!(server_addr, Address::Tcp4(a) if a.port() != 0));

    let sent = Message::new()
        .with_field(1, Value::UInt32(42))
        .with_field(2, Value::String("hi".into()));

    let client_seen: Rc<RefCell<Option<Message>>> = Rc::new(RefCell::new(None));
    let got = Rc::clone(&client_seen);
    let client_events = TransportEvents::message(move |t: &Transport, msg, _| {
        *got.borrow_mut() = Some(msg);
        t.mainloop().quit(0);
    })
    .on_closed(|_, _| {});
    let client = Transport::create(&ml, "tcp4", client_events, Flags::NONE).unwrap();
    client.connect(&server_addr).unwrap();
    client.send_msg(&sent).unwrap();

    stop_after(&ml, 5000);
    assert_eq!(ml.run(), 0);

    assert_eq!(server_seen.borrow().as_ref(), Some(&sent));
    assert_eq!(client_seen.borrow().as_ref(), Some(&sent));

    client.destroy();
    for conn in accepted.borrow().iter() {
        conn.destroy();
    }
    listener.destroy();

    // One more cycle so any deferred teardown completes.
    ml.iterate().unwrap();
}

/// Datagram framing: three messages of sizes 10, 10000, and 1 bytes
/// between two udp4 endpoints; every receive sees exactly one message
/// with matching size and contents.
#[test]
fn udp_preserves_message_boundaries_across_sizes() {
    let ml = Mainloop::new().unwrap();
    let payloads: Vec<Vec<u8>> = [10usize, 10_000, 1]
        .iter()
        .enumerate()
        .map(|(i, size)| vec![i as u8 + 1; *size])
        .collect();

    let got: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
    let g = Rc::clone(&got);
    let want = payloads.len();
    let receiver_events = TransportEvents::raw(move |t: &Transport, bytes: &[u8], _| {
        g.borrow_mut().push(bytes.to_vec());
        if g.borrow().len() == want {
            t.mainloop().quit(0);
        }
    });
    let receiver = Transport::create(&ml, "udp4", receiver_events, Flags::NONE).unwrap();
    receiver.bind(&receiver.resolve("udp4:127.0.0.1:0").unwrap()).unwrap();
    let receiver_addr = receiver.local_address().unwrap();

    let sender = Transport::create(&ml, "udp4", TransportEvents::raw(|_, _, _| {}), Flags::NONE)
        .unwrap();
    sender.bind(&sender.resolve("udp4:127.0.0.1:0").unwrap()).unwrap();
    for payload in &payloads {
        sender.send_raw_to(payload, &receiver_addr).unwrap();
    }

    stop_after(&ml, 5000);
    assert_eq!(ml.run(), 0);
    assert_eq!(*got.borrow(), payloads);

    sender.destroy();
    receiver.destroy();
}
