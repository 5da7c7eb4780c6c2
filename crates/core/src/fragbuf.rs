// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fragment buffer: reassembles length-framed payloads from a byte
//! stream that arrives in arbitrary pieces.
//!
//! Writers either `push` bytes they already have, or `alloc` room, fill
//! it from a read, and `trim` back whatever did not arrive. Readers
//! `pull` whole frames — a big-endian `u32` length followed by that many
//! payload bytes — one at a time; a pull succeeds exactly when at least
//! one complete frame is buffered, and the returned slice stays valid
//! until the next write.

use crate::error::{Error, Result};

/// Upper bound on a single frame's length; anything larger is treated as
/// a framing violation rather than an allocation request.
const DEFAULT_FRAME_CEILING: u32 = 16 * 1024 * 1024;

pub struct FragBuf {
    data: Vec<u8>,
    rd: usize,
    /// Start offset of the last `alloc`, while a trim is still allowed.
    pending: Option<usize>,
    frame_ceiling: u32,
    /// Total buffered-byte cap; 0 means uncapped.
    capacity: usize,
}

impl Default for FragBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl FragBuf {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_FRAME_CEILING, 0)
    }

    pub fn with_limits(frame_ceiling: u32, capacity: usize) -> Self {
        Self { data: Vec::new(), rd: 0, pending: None, frame_ceiling, capacity }
    }

    /// Bytes buffered but not yet pulled.
    pub fn available(&self) -> usize {
        self.data.len() - self.rd
    }

    /// Append bytes already in hand.
    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.make_room(bytes.len())?;
        self.data.extend_from_slice(bytes);
        self.pending = None;
        Ok(())
    }

    /// Reserve `n` writable bytes at the tail, to be filled from a read.
    /// If the read comes up short, `trim` releases the unused tail.
    pub fn alloc(&mut self, n: usize) -> Result<&mut [u8]> {
        self.make_room(n)?;
        let start = self.data.len();
        self.data.resize(start + n, 0);
        self.pending = Some(start);
        Ok(&mut self.data[start..])
    }

    /// Keep only `actual` bytes of the last `alloc`.
    pub fn trim(&mut self, actual: usize) {
        if let Some(start) = self.pending.take() {
            let granted = self.data.len() - start;
            if actual < granted {
                self.data.truncate(start + actual);
            }
        }
    }

    /// Pull the next complete frame, advancing the read cursor past it.
    /// Returns `Ok(None)` while no whole frame is buffered; a frame
    /// length above the ceiling is a protocol error.
    pub fn pull(&mut self) -> Result<Option<&[u8]>> {
        let avail = self.available();
        if avail < 4 {
            return Ok(None);
        }

        let len_bytes: [u8; 4] = [
            self.data[self.rd],
            self.data[self.rd + 1],
            self.data[self.rd + 2],
            self.data[self.rd + 3],
        ];
        let len = u32::from_be_bytes(len_bytes);
        if len > self.frame_ceiling {
            return Err(Error::Protocol("frame length exceeds ceiling"));
        }
        if avail < 4 + len as usize {
            return Ok(None);
        }

        let start = self.rd + 4;
        self.rd = start + len as usize;
        Ok(Some(&self.data[start..start + len as usize]))
    }

    /// Drop consumed bytes when the cursor has passed half the buffer.
    fn make_room(&mut self, incoming: usize) -> Result<()> {
        if self.rd > 0 && self.rd >= self.data.len() / 2 {
            self.data.drain(..self.rd);
            self.rd = 0;
        }
        if self.capacity != 0 && self.available() + incoming > self.capacity {
            return Err(Error::OutOfSpace);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "fragbuf_tests.rs"]
mod tests;
