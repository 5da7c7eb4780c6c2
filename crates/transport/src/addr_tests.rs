// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Address resolution tests.

use super::*;
use yare::parameterized;

#[test]
fn tcp4_resolves_to_a_v4_socket_address() {
    match resolve_address("tcp4:127.0.0.1:4000").unwrap() {
        Address::Tcp4(a) => {
            assert_eq!(a.ip().octets(), [127, 0, 0, 1]);
            assert_eq!(a.port(), 4000);
        }
        other => panic!("resolved to {other:?}"),
    }
}

#[test]
fn tcp6_requires_brackets_for_literals() {
    match resolve_address("tcp6:[::1]:4001").unwrap() {
        Address::Tcp6(a) => assert_eq!(a.port(), 4001),
        other => panic!("resolved to {other:?}"),
    }

    assert!(matches!(
        resolve_address("tcp6:::1:4001"),
        Err(Error::AddrResolve(_))
    ));
}

#[test]
fn unix_paths_and_abstract_names_parse() {
    match resolve_address("unxs:/tmp/plinth.sock").unwrap() {
        Address::UnxStream(UnixName::Path(p)) => {
            assert_eq!(p, std::path::Path::new("/tmp/plinth.sock"));
        }
        other => panic!("resolved to {other:?}"),
    }

    match resolve_address("unxs:@plinth-test").unwrap() {
        Address::UnxStream(UnixName::Abstract(name)) => {
            assert_eq!(name, b"plinth-test");
        }
        other => panic!("resolved to {other:?}"),
    }
}

#[parameterized(
    udp4 = { "udp4:127.0.0.1:9000", "udp4" },
    udp6 = { "udp6:[::1]:9001", "udp6" },
    unxdgrm = { "unxdgrm:/tmp/d.sock", "unxdgrm" },
    internal = { "internal:bus", "internal" },
)]
fn each_prefix_resolves_through_its_factory(addr: &str, prefix: &str) {
    let resolved = resolve_address(addr).unwrap();
    assert_eq!(resolved.prefix(), prefix);
}

#[test]
fn unknown_prefixes_fail_with_addr_resolve() {
    assert!(matches!(
        resolve_address("warp9:somewhere"),
        Err(Error::AddrResolve(_))
    ));
}

#[test]
fn missing_or_bad_ports_are_rejected() {
    assert!(matches!(resolve_address("tcp4:127.0.0.1"), Err(Error::AddrResolve(_))));
    assert!(matches!(
        resolve_address("tcp4:127.0.0.1:notaport"),
        Err(Error::AddrResolve(_))
    ));
}

#[test]
fn display_roundtrips_the_prefix_form() {
    let addr = resolve_address("tcp4:127.0.0.1:8080").unwrap();
    assert_eq!(addr.to_string(), "tcp4:127.0.0.1:8080");

    let addr = resolve_address("unxs:@abstract-name").unwrap();
    assert_eq!(addr.to_string(), "unxs:@abstract-name");
}

#[test]
fn empty_abstract_names_are_rejected() {
    assert!(matches!(resolve_address("unxs:@"), Err(Error::AddrResolve(_))));
}
