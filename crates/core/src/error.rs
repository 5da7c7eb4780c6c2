// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by the whole workspace.
//!
//! Every layer reports failures through this one enum: the primitives fail
//! with capacity and range errors, the codecs with protocol errors, the
//! transports with address and I/O errors. Callers match on the kind, not
//! on the carrier.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Caller contract violation caught at entry.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// A configured capacity ceiling was reached.
    #[error("out of space")]
    OutOfSpace,

    /// Lookup miss.
    #[error("not found")]
    NotFound,

    /// Duplicate key, cookie, or registration.
    #[error("already exists")]
    Exists,

    /// Cookie or index outside the valid band.
    #[error("out of range")]
    Range,

    /// No transport factory accepted the address string.
    #[error("address resolution failed: {0}")]
    AddrResolve(String),

    /// Underlying syscall failed with a non-retryable code.
    #[error("i/o error: {0}")]
    Io(#[source] std::io::Error),

    /// Underlying syscall would block.
    #[error("operation would block")]
    Again,

    /// Framing violation or decoder error.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Unknown record tag, type id, or transport mode/operation combination.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Peer closed or transport disconnected.
    #[error("connection closed")]
    Closed,
}

impl Error {
    /// Translate a raw I/O error into the taxonomy, routing `WouldBlock`
    /// to [`Error::Again`] and broken pipes to [`Error::Closed`].
    pub fn from_io(err: std::io::Error) -> Error {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::WouldBlock => Error::Again,
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected => Error::Closed,
            ErrorKind::OutOfMemory => Error::OutOfMemory,
            _ => Error::Io(err),
        }
    }

    /// True for errors a retry at a later time may clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Again)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::from_io(err)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
