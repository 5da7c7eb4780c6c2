// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Field types and values shared by the codecs.
//!
//! The wire type codes are fixed: `0x01..=0x0e` for the scalar kinds,
//! with `0x80` marking arrays. Codes `0x02` (integer) and `0x03`
//! (unsigned) are legacy aliases accepted on decode for the 32-bit
//! kinds; encoders always write the canonical codes.

use plinth_core::error::{Error, Result};
use plinth_core::msgbuf::{MsgBuf, MsgView};

/// Bit marking an array of the underlying scalar type.
pub const FIELD_ARRAY: u16 = 0x80;

const WIRE_STRING: u16 = 0x01;
const WIRE_INTEGER: u16 = 0x02;
const WIRE_UNSIGNED: u16 = 0x03;
const WIRE_DOUBLE: u16 = 0x04;
const WIRE_BOOL: u16 = 0x05;
const WIRE_UINT8: u16 = 0x06;
const WIRE_SINT8: u16 = 0x07;
const WIRE_UINT16: u16 = 0x08;
const WIRE_SINT16: u16 = 0x09;
const WIRE_UINT32: u16 = 0x0a;
const WIRE_SINT32: u16 = 0x0b;
const WIRE_UINT64: u16 = 0x0c;
const WIRE_SINT64: u16 = 0x0d;
const WIRE_BLOB: u16 = 0x0e;

/// Scalar field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Bool,
    UInt8,
    SInt8,
    UInt16,
    SInt16,
    UInt32,
    SInt32,
    UInt64,
    SInt64,
    Double,
    Blob,
}

impl FieldType {
    pub fn wire(self) -> u16 {
        match self {
            FieldType::String => WIRE_STRING,
            FieldType::Bool => WIRE_BOOL,
            FieldType::UInt8 => WIRE_UINT8,
            FieldType::SInt8 => WIRE_SINT8,
            FieldType::UInt16 => WIRE_UINT16,
            FieldType::SInt16 => WIRE_SINT16,
            FieldType::UInt32 => WIRE_UINT32,
            FieldType::SInt32 => WIRE_SINT32,
            FieldType::UInt64 => WIRE_UINT64,
            FieldType::SInt64 => WIRE_SINT64,
            FieldType::Double => WIRE_DOUBLE,
            FieldType::Blob => WIRE_BLOB,
        }
    }

    pub fn from_wire(code: u16) -> Option<FieldType> {
        match code {
            WIRE_STRING => Some(FieldType::String),
            WIRE_BOOL => Some(FieldType::Bool),
            WIRE_UINT8 => Some(FieldType::UInt8),
            WIRE_SINT8 => Some(FieldType::SInt8),
            WIRE_UINT16 => Some(FieldType::UInt16),
            WIRE_SINT16 => Some(FieldType::SInt16),
            WIRE_UINT32 | WIRE_UNSIGNED => Some(FieldType::UInt32),
            WIRE_SINT32 | WIRE_INTEGER => Some(FieldType::SInt32),
            WIRE_UINT64 => Some(FieldType::UInt64),
            WIRE_SINT64 => Some(FieldType::SInt64),
            WIRE_DOUBLE => Some(FieldType::Double),
            WIRE_BLOB => Some(FieldType::Blob),
            _ => None,
        }
    }
}

/// A single field value: a scalar or a homogeneous array. Blobs may not
/// be array elements.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Bool(bool),
    UInt8(u8),
    SInt8(i8),
    UInt16(u16),
    SInt16(i16),
    UInt32(u32),
    SInt32(i32),
    UInt64(u64),
    SInt64(i64),
    Double(f64),
    Blob(Vec<u8>),
    Array(ArrayValue),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    String(Vec<String>),
    Bool(Vec<bool>),
    UInt8(Vec<u8>),
    SInt8(Vec<i8>),
    UInt16(Vec<u16>),
    SInt16(Vec<i16>),
    UInt32(Vec<u32>),
    SInt32(Vec<i32>),
    UInt64(Vec<u64>),
    SInt64(Vec<i64>),
    Double(Vec<f64>),
}

impl ArrayValue {
    pub fn elem_type(&self) -> FieldType {
        match self {
            ArrayValue::String(_) => FieldType::String,
            ArrayValue::Bool(_) => FieldType::Bool,
            ArrayValue::UInt8(_) => FieldType::UInt8,
            ArrayValue::SInt8(_) => FieldType::SInt8,
            ArrayValue::UInt16(_) => FieldType::UInt16,
            ArrayValue::SInt16(_) => FieldType::SInt16,
            ArrayValue::UInt32(_) => FieldType::UInt32,
            ArrayValue::SInt32(_) => FieldType::SInt32,
            ArrayValue::UInt64(_) => FieldType::UInt64,
            ArrayValue::SInt64(_) => FieldType::SInt64,
            ArrayValue::Double(_) => FieldType::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayValue::String(v) => v.len(),
            ArrayValue::Bool(v) => v.len(),
            ArrayValue::UInt8(v) => v.len(),
            ArrayValue::SInt8(v) => v.len(),
            ArrayValue::UInt16(v) => v.len(),
            ArrayValue::SInt16(v) => v.len(),
            ArrayValue::UInt32(v) => v.len(),
            ArrayValue::SInt32(v) => v.len(),
            ArrayValue::UInt64(v) => v.len(),
            ArrayValue::SInt64(v) => v.len(),
            ArrayValue::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Value {
    /// The wire type code for this value, array bit included.
    pub fn wire_type(&self) -> u16 {
        match self {
            Value::String(_) => WIRE_STRING,
            Value::Bool(_) => WIRE_BOOL,
            Value::UInt8(_) => WIRE_UINT8,
            Value::SInt8(_) => WIRE_SINT8,
            Value::UInt16(_) => WIRE_UINT16,
            Value::SInt16(_) => WIRE_SINT16,
            Value::UInt32(_) => WIRE_UINT32,
            Value::SInt32(_) => WIRE_SINT32,
            Value::UInt64(_) => WIRE_UINT64,
            Value::SInt64(_) => WIRE_SINT64,
            Value::Double(_) => WIRE_DOUBLE,
            Value::Blob(_) => WIRE_BLOB,
            Value::Array(a) => a.elem_type().wire() | FIELD_ARRAY,
        }
    }

    /// Scalar kind, or the element kind for arrays.
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Array(a) => a.elem_type(),
            other => match FieldType::from_wire(other.wire_type()) {
                Some(t) => t,
                // wire_type() only emits valid scalar codes
                None => FieldType::Blob,
            },
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }
}

pub(crate) fn encode_string(buf: &mut MsgBuf, s: &str) {
    buf.push_u32(s.len() as u32 + 1);
    buf.push_bytes(s.as_bytes());
    buf.push_u8(0);
}

pub(crate) fn decode_string(view: &mut MsgView<'_>) -> Result<String> {
    let len = view.pull_u32()? as usize;
    if len == 0 {
        return Err(Error::Protocol("string without terminator"));
    }
    let bytes = view.pull(len, 1)?;
    if bytes[len - 1] != 0 {
        return Err(Error::Protocol("string not NUL-terminated"));
    }
    std::str::from_utf8(&bytes[..len - 1])
        .map(str::to_owned)
        .map_err(|_| Error::Protocol("string not valid UTF-8"))
}

pub(crate) fn encode_scalar(buf: &mut MsgBuf, value: &Value) -> Result<()> {
    match value {
        Value::String(s) => encode_string(buf, s),
        Value::Bool(b) => buf.push_u8(*b as u8),
        Value::UInt8(v) => buf.push_u8(*v),
        Value::SInt8(v) => buf.push_i8(*v),
        Value::UInt16(v) => buf.push_u16(*v),
        Value::SInt16(v) => buf.push_i16(*v),
        Value::UInt32(v) => buf.push_u32(*v),
        Value::SInt32(v) => buf.push_i32(*v),
        Value::UInt64(v) => buf.push_u64(*v),
        Value::SInt64(v) => buf.push_i64(*v),
        Value::Double(v) => buf.push_f64(*v),
        Value::Blob(b) => {
            buf.push_u32(b.len() as u32);
            buf.push_bytes(b);
        }
        Value::Array(_) => return Err(Error::InvalidArgument("array is not a scalar")),
    }
    Ok(())
}

pub(crate) fn decode_scalar(view: &mut MsgView<'_>, ty: FieldType) -> Result<Value> {
    let value = match ty {
        FieldType::String => Value::String(decode_string(view)?),
        FieldType::Bool => match view.pull_u8()? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            _ => return Err(Error::Protocol("boolean out of range")),
        },
        FieldType::UInt8 => Value::UInt8(view.pull_u8()?),
        FieldType::SInt8 => Value::SInt8(view.pull_i8()?),
        FieldType::UInt16 => Value::UInt16(view.pull_u16()?),
        FieldType::SInt16 => Value::SInt16(view.pull_i16()?),
        FieldType::UInt32 => Value::UInt32(view.pull_u32()?),
        FieldType::SInt32 => Value::SInt32(view.pull_i32()?),
        FieldType::UInt64 => Value::UInt64(view.pull_u64()?),
        FieldType::SInt64 => Value::SInt64(view.pull_i64()?),
        FieldType::Double => Value::Double(view.pull_f64()?),
        FieldType::Blob => {
            let size = view.pull_u32()? as usize;
            Value::Blob(view.pull(size, 1)?.to_vec())
        }
    };
    Ok(value)
}

pub(crate) fn encode_array(buf: &mut MsgBuf, array: &ArrayValue) {
    buf.push_u32(array.len() as u32);
    match array {
        ArrayValue::String(v) => {
            for s in v {
                encode_string(buf, s);
            }
        }
        ArrayValue::Bool(v) => {
            for b in v {
                buf.push_u8(*b as u8);
            }
        }
        ArrayValue::UInt8(v) => {
            for x in v {
                buf.push_u8(*x);
            }
        }
        ArrayValue::SInt8(v) => {
            for x in v {
                buf.push_i8(*x);
            }
        }
        ArrayValue::UInt16(v) => {
            for x in v {
                buf.push_u16(*x);
            }
        }
        ArrayValue::SInt16(v) => {
            for x in v {
                buf.push_i16(*x);
            }
        }
        ArrayValue::UInt32(v) => {
            for x in v {
                buf.push_u32(*x);
            }
        }
        ArrayValue::SInt32(v) => {
            for x in v {
                buf.push_i32(*x);
            }
        }
        ArrayValue::UInt64(v) => {
            for x in v {
                buf.push_u64(*x);
            }
        }
        ArrayValue::SInt64(v) => {
            for x in v {
                buf.push_i64(*x);
            }
        }
        ArrayValue::Double(v) => {
            for x in v {
                buf.push_f64(*x);
            }
        }
    }
}

pub(crate) fn decode_array(view: &mut MsgView<'_>, elem: FieldType) -> Result<ArrayValue> {
    let count = view.pull_u32()? as usize;
    // Every element takes at least one byte; reject counts the buffer
    // cannot possibly satisfy before allocating for them.
    if count > view.remaining() {
        return Err(Error::Protocol("array count exceeds buffer"));
    }

    macro_rules! pull_n {
        ($variant:ident, $pull:ident) => {{
            let mut v = Vec::with_capacity(count);
            for _ in 0..count {
                v.push(view.$pull()?);
            }
            ArrayValue::$variant(v)
        }};
    }

    let array = match elem {
        FieldType::String => {
            let mut v = Vec::with_capacity(count);
            for _ in 0..count {
                v.push(decode_string(view)?);
            }
            ArrayValue::String(v)
        }
        FieldType::Bool => {
            let mut v = Vec::with_capacity(count);
            for _ in 0..count {
                v.push(match view.pull_u8()? {
                    0 => false,
                    1 => true,
                    _ => return Err(Error::Protocol("boolean out of range")),
                });
            }
            ArrayValue::Bool(v)
        }
        FieldType::UInt8 => pull_n!(UInt8, pull_u8),
        FieldType::SInt8 => pull_n!(SInt8, pull_i8),
        FieldType::UInt16 => pull_n!(UInt16, pull_u16),
        FieldType::SInt16 => pull_n!(SInt16, pull_i16),
        FieldType::UInt32 => pull_n!(UInt32, pull_u32),
        FieldType::SInt32 => pull_n!(SInt32, pull_i32),
        FieldType::UInt64 => pull_n!(UInt64, pull_u64),
        FieldType::SInt64 => pull_n!(SInt64, pull_i64),
        FieldType::Double => pull_n!(Double, pull_f64),
        FieldType::Blob => return Err(Error::Protocol("blob not allowed in arrays")),
    };
    Ok(array)
}

/// Encode one typed value, array bit handled.
pub(crate) fn encode_value(buf: &mut MsgBuf, value: &Value) -> Result<()> {
    match value {
        Value::Array(a) => {
            encode_array(buf, a);
            Ok(())
        }
        scalar => encode_scalar(buf, scalar),
    }
}

/// Decode one value of the given wire type code.
pub(crate) fn decode_value(view: &mut MsgView<'_>, wire_type: u16) -> Result<Value> {
    let ty = FieldType::from_wire(wire_type & !FIELD_ARRAY)
        .ok_or(Error::Unsupported("unknown field type"))?;
    if wire_type & FIELD_ARRAY != 0 {
        Ok(Value::Array(decode_array(view, ty)?))
    } else {
        decode_scalar(view, ty)
    }
}

#[cfg(test)]
#[path = "field_tests.rs"]
mod tests;
