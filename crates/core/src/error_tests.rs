// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error translation tests.

use super::*;
use std::io::{Error as IoError, ErrorKind};

#[test]
fn would_block_becomes_again() {
    let err = Error::from_io(IoError::new(ErrorKind::WouldBlock, "eagain"));
    assert!(matches!(err, Error::Again));
    assert!(err.is_transient());
}

#[test]
fn broken_pipe_becomes_closed() {
    for kind in [
        ErrorKind::BrokenPipe,
        ErrorKind::ConnectionReset,
        ErrorKind::ConnectionAborted,
    ] {
        let err = Error::from_io(IoError::new(kind, "gone"));
        assert!(matches!(err, Error::Closed), "{kind:?}");
    }
}

#[test]
fn other_io_errors_keep_the_source() {
    let err = Error::from_io(IoError::new(ErrorKind::PermissionDenied, "denied"));
    match err {
        Error::Io(inner) => assert_eq!(inner.kind(), ErrorKind::PermissionDenied),
        other => panic!("expected Io, got {other:?}"),
    }
}

#[test]
fn display_names_the_kind() {
    assert_eq!(Error::OutOfSpace.to_string(), "out of space");
    assert_eq!(
        Error::Protocol("bad frame length").to_string(),
        "protocol error: bad frame length"
    );
}
