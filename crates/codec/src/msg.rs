// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic tagged messages.
//!
//! A message is an ordered collection of `{tag, value}` fields. The tag
//! is the field's name as far as the peers are concerned; the messaging
//! layer never interprets it. On the wire each field is
//! `u16 tag | u16 type | value`, integers big-endian, doubles as their
//! IEEE-754 bit pattern in big-endian. Transports frame the encoded
//! payload as `u32 length | u16 record-tag`, record tag 0 meaning this
//! default codec.

use plinth_core::error::Result;
use plinth_core::msgbuf::{MsgBuf, MsgView};

use crate::field::{self, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub tag: u16,
    pub value: Value,
}

/// An ordered set of tagged fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    fields: Vec<Field>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    pub fn with_field(mut self, tag: u16, value: Value) -> Self {
        self.append(tag, value);
        self
    }

    pub fn append(&mut self, tag: u16, value: Value) {
        self.fields.push(Field { tag, value });
    }

    pub fn prepend(&mut self, tag: u16, value: Value) {
        self.fields.insert(0, Field { tag, value });
    }

    /// Overwrite the first field with `tag`, appending when absent.
    pub fn set(&mut self, tag: u16, value: Value) {
        match self.fields.iter_mut().find(|f| f.tag == tag) {
            Some(field) => field.value = value,
            None => self.append(tag, value),
        }
    }

    /// First field with `tag`.
    pub fn find(&self, tag: u16) -> Option<&Value> {
        self.fields.iter().find(|f| f.tag == tag).map(|f| &f.value)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encode the field sequence; the frame header is the transport's
    /// business.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = MsgBuf::new();
        for f in &self.fields {
            buf.push_u16(f.tag);
            buf.push_u16(f.value.wire_type());
            field::encode_value(&mut buf, &f.value)?;
        }
        Ok(buf.steal())
    }

    /// Decode a full field sequence; trailing garbage is a framing
    /// violation.
    pub fn decode(bytes: &[u8]) -> Result<Message> {
        let mut view = MsgView::new(bytes);
        let mut msg = Message::new();

        while !view.is_empty() {
            let tag = view.pull_u16()?;
            let wire_type = view.pull_u16()?;
            let value = field::decode_value(&mut view, wire_type)?;
            msg.append(tag, value);
        }
        Ok(msg)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "0x{:x}={:?}", field.tag, field.value)?;
        }
        write!(f, "}}")
    }
}

/// Convenience for the common case of building from typed pairs.
impl FromIterator<(u16, Value)> for Message {
    fn from_iter<I: IntoIterator<Item = (u16, Value)>>(iter: I) -> Self {
        let mut msg = Message::new();
        for (tag, value) in iter {
            msg.append(tag, value);
        }
        msg
    }
}

#[cfg(test)]
#[path = "msg_tests.rs"]
mod tests;
