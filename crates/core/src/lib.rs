// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! plinth-core: allocation and buffering primitives for the plinth substrate.
//!
//! The rest of the workspace builds on four pieces that live here: the
//! chunk [`pool`] arena, the insertion-ordered [`htbl`] hash table, the
//! frame-reassembling [`fragbuf`] byte buffer, and the codec scratch
//! buffer in [`msgbuf`]. The shared [`Error`] taxonomy also lives here.

pub mod error;
pub mod fragbuf;
pub mod htbl;
pub mod msgbuf;
pub mod pool;

pub use error::{Error, Result};
pub use fragbuf::FragBuf;
pub use htbl::{Cursor, Direction, HashTable, HashTableConfig, TableKey, Verdict};
pub use msgbuf::{MsgBuf, MsgView};
pub use pool::{Cookie, Pool, PoolConfig, PoolStats};
