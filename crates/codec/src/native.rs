// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Native-type TLV codec.
//!
//! A recursive tag-value coding for trees of typed values. Every value
//! is a big-endian `u32` type tag followed by its payload; scalars are
//! length-less at their declared width, size-like integers widen to 64
//! bits on the wire, strings carry a `u32` size (terminator included),
//! arrays a `u32` element count with each element a full TLV, and
//! structs a `u32` member count with the members in declaration order.
//!
//! Struct type ids are minted dynamically by a process-wide registry,
//! so two endpoints that registered the same types in a different order
//! disagree on ids. A [`TypeMap`] installed on a transport remaps
//! struct tags on the way out and back in; ids absent from the map pass
//! through unchanged.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use smol_str::SmolStr;

use plinth_core::error::{Error, Result};
use plinth_core::msgbuf::{MsgBuf, MsgView};

/// Predefined scalar type ids; custom struct ids start above these.
pub mod type_id {
    pub const UNKNOWN: u32 = 0;
    pub const INT8: u32 = 1;
    pub const UINT8: u32 = 2;
    pub const INT16: u32 = 3;
    pub const UINT16: u32 = 4;
    pub const INT32: u32 = 5;
    pub const UINT32: u32 = 6;
    pub const INT64: u32 = 7;
    pub const UINT64: u32 = 8;
    pub const FLOAT: u32 = 9;
    pub const DOUBLE: u32 = 10;
    pub const BOOL: u32 = 11;
    pub const SIZE: u32 = 12;
    pub const SSIZE: u32 = 13;
    pub const STRING: u32 = 14;
    pub const ARRAY: u32 = 15;
    pub const STRUCT: u32 = 16;
    pub const FIRST_CUSTOM: u32 = 17;
}

/// A typed value tree.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    /// size_t-like; 64-bit unsigned on the wire.
    Size(u64),
    /// ssize_t-like; 64-bit signed on the wire.
    SSize(i64),
    String(String),
    Array(Vec<NativeValue>),
    Struct(NativeStruct),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeStruct {
    pub type_id: u32,
    pub members: Vec<NativeValue>,
}

impl NativeValue {
    pub fn type_tag(&self) -> u32 {
        match self {
            NativeValue::Int8(_) => type_id::INT8,
            NativeValue::UInt8(_) => type_id::UINT8,
            NativeValue::Int16(_) => type_id::INT16,
            NativeValue::UInt16(_) => type_id::UINT16,
            NativeValue::Int32(_) => type_id::INT32,
            NativeValue::UInt32(_) => type_id::UINT32,
            NativeValue::Int64(_) => type_id::INT64,
            NativeValue::UInt64(_) => type_id::UINT64,
            NativeValue::Float(_) => type_id::FLOAT,
            NativeValue::Double(_) => type_id::DOUBLE,
            NativeValue::Bool(_) => type_id::BOOL,
            NativeValue::Size(_) => type_id::SIZE,
            NativeValue::SSize(_) => type_id::SSIZE,
            NativeValue::String(_) => type_id::STRING,
            NativeValue::Array(_) => type_id::ARRAY,
            NativeValue::Struct(s) => s.type_id,
        }
    }
}

/// Member type reference inside a struct descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeMemberType {
    /// One of the predefined scalar ids (including STRING).
    Scalar(u32),
    /// Homogeneous array of the given member type.
    Array(Box<NativeMemberType>),
    /// A previously registered struct type.
    Struct(u32),
}

#[derive(Debug, Clone)]
pub struct NativeMember {
    pub name: SmolStr,
    pub ty: NativeMemberType,
}

#[derive(Debug, Clone)]
pub struct NativeTypeDescr {
    pub id: u32,
    pub name: SmolStr,
    pub members: Vec<NativeMember>,
}

#[derive(Default)]
struct NativeRegistry {
    by_id: HashMap<u32, Arc<NativeTypeDescr>>,
    by_name: HashMap<SmolStr, u32>,
    next_id: u32,
}

fn registry() -> &'static RwLock<NativeRegistry> {
    static REGISTRY: OnceLock<RwLock<NativeRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        RwLock::new(NativeRegistry {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            next_id: type_id::FIRST_CUSTOM,
        })
    })
}

/// Register a struct type and mint its dynamic id. Member struct
/// references must already be registered; duplicate names fail with
/// `Exists`.
pub fn register_native_type(
    name: impl Into<SmolStr>,
    members: Vec<(SmolStr, NativeMemberType)>,
) -> Result<u32> {
    let name = name.into();
    if members.is_empty() {
        return Err(Error::InvalidArgument("native type without members"));
    }

    let mut reg = registry().write();
    if reg.by_name.contains_key(&name) {
        return Err(Error::Exists);
    }
    for (_, ty) in &members {
        check_member_type(ty, &reg)?;
    }

    let id = reg.next_id;
    reg.next_id += 1;

    let descr = Arc::new(NativeTypeDescr {
        id,
        name: name.clone(),
        members: members
            .into_iter()
            .map(|(name, ty)| NativeMember { name, ty })
            .collect(),
    });
    reg.by_id.insert(id, descr);
    reg.by_name.insert(name, id);
    Ok(id)
}

fn check_member_type(ty: &NativeMemberType, reg: &NativeRegistry) -> Result<()> {
    match ty {
        NativeMemberType::Scalar(id) => {
            if *id == type_id::UNKNOWN
                || *id >= type_id::ARRAY
                || *id == type_id::STRUCT
            {
                return Err(Error::InvalidArgument("not a scalar type id"));
            }
            Ok(())
        }
        NativeMemberType::Array(elem) => check_member_type(elem, reg),
        NativeMemberType::Struct(id) => {
            if !reg.by_id.contains_key(id) {
                return Err(Error::InvalidArgument("unregistered struct member type"));
            }
            Ok(())
        }
    }
}

/// Look up a registered type id by name.
pub fn native_type_id(name: &str) -> Option<u32> {
    registry().read().by_name.get(name).copied()
}

fn find_native_type(id: u32) -> Option<Arc<NativeTypeDescr>> {
    registry().read().by_id.get(&id).cloned()
}

/// Transport-local remap between dynamic type-id spaces. Pairs are
/// `(native, mapped)`; lookups miss through to the identity.
#[derive(Debug, Clone, Default)]
pub struct TypeMap {
    pairs: Vec<(u32, u32)>,
}

impl TypeMap {
    pub fn new(pairs: Vec<(u32, u32)>) -> TypeMap {
        TypeMap { pairs }
    }

    /// Outbound: native id to the peer's id.
    pub fn map(&self, id: u32) -> u32 {
        self.pairs.iter().find(|(n, _)| *n == id).map(|(_, m)| *m).unwrap_or(id)
    }

    /// Inbound: the peer's id back to ours.
    pub fn unmap(&self, id: u32) -> u32 {
        self.pairs.iter().find(|(_, m)| *m == id).map(|(n, _)| *n).unwrap_or(id)
    }
}

/// Encode a value tree. Struct tags run through `map` on the way out.
pub fn encode_native(value: &NativeValue, map: Option<&TypeMap>) -> Result<Vec<u8>> {
    let mut buf = MsgBuf::new();
    push_value(&mut buf, value, map)?;
    Ok(buf.steal())
}

fn push_value(buf: &mut MsgBuf, value: &NativeValue, map: Option<&TypeMap>) -> Result<()> {
    match value {
        NativeValue::Struct(s) => {
            let descr =
                find_native_type(s.type_id).ok_or(Error::Unsupported("unregistered type id"))?;
            if descr.members.len() != s.members.len() {
                return Err(Error::InvalidArgument("member count mismatch"));
            }
            let tag = map.map(|m| m.map(s.type_id)).unwrap_or(s.type_id);
            buf.push_u32(tag);
            buf.push_u32(s.members.len() as u32);
            for (member, mtype) in s.members.iter().zip(&descr.members) {
                check_value_type(member, &mtype.ty)?;
                push_value(buf, member, map)?;
            }
            Ok(())
        }
        NativeValue::Array(elems) => {
            buf.push_u32(type_id::ARRAY);
            buf.push_u32(elems.len() as u32);
            let elem_tag = elems.first().map(NativeValue::type_tag);
            for elem in elems {
                // Arrays are homogeneous; mixed trees are caller bugs.
                if Some(elem.type_tag()) != elem_tag {
                    return Err(Error::InvalidArgument("heterogeneous array"));
                }
                push_value(buf, elem, map)?;
            }
            Ok(())
        }
        scalar => {
            buf.push_u32(scalar.type_tag());
            push_scalar(buf, scalar)
        }
    }
}

fn push_scalar(buf: &mut MsgBuf, value: &NativeValue) -> Result<()> {
    match value {
        NativeValue::Int8(v) => buf.push_i8(*v),
        NativeValue::UInt8(v) => buf.push_u8(*v),
        NativeValue::Int16(v) => buf.push_i16(*v),
        NativeValue::UInt16(v) => buf.push_u16(*v),
        NativeValue::Int32(v) => buf.push_i32(*v),
        NativeValue::UInt32(v) => buf.push_u32(*v),
        NativeValue::Int64(v) => buf.push_i64(*v),
        NativeValue::UInt64(v) => buf.push_u64(*v),
        NativeValue::Float(v) => buf.push_u32(v.to_bits()),
        NativeValue::Double(v) => buf.push_f64(*v),
        NativeValue::Bool(v) => buf.push_u8(*v as u8),
        NativeValue::Size(v) => buf.push_u64(*v),
        NativeValue::SSize(v) => buf.push_i64(*v),
        NativeValue::String(s) => {
            buf.push_u32(s.len() as u32 + 1);
            buf.push_bytes(s.as_bytes());
            buf.push_u8(0);
        }
        NativeValue::Array(_) | NativeValue::Struct(_) => {
            return Err(Error::InvalidArgument("not a scalar"))
        }
    }
    Ok(())
}

/// Decode one value tree, returning it with its root type id (structs:
/// the id in our registry after unmapping). Trailing bytes are a
/// framing violation.
pub fn decode_native(bytes: &[u8], map: Option<&TypeMap>) -> Result<(NativeValue, u32)> {
    let mut view = MsgView::new(bytes);
    let value = pull_value(&mut view, map, 0)?;
    if !view.is_empty() {
        return Err(Error::Protocol("trailing bytes after value"));
    }
    let id = value.type_tag();
    Ok((value, id))
}

/// Recursion guard: deeper trees than this are rejected as hostile.
const MAX_DEPTH: u32 = 64;

fn pull_value(
    view: &mut MsgView<'_>,
    map: Option<&TypeMap>,
    depth: u32,
) -> Result<NativeValue> {
    if depth > MAX_DEPTH {
        return Err(Error::Protocol("value tree too deep"));
    }

    let tag = view.pull_u32()?;
    let value = match tag {
        type_id::INT8 => NativeValue::Int8(view.pull_i8()?),
        type_id::UINT8 => NativeValue::UInt8(view.pull_u8()?),
        type_id::INT16 => NativeValue::Int16(view.pull_i16()?),
        type_id::UINT16 => NativeValue::UInt16(view.pull_u16()?),
        type_id::INT32 => NativeValue::Int32(view.pull_i32()?),
        type_id::UINT32 => NativeValue::UInt32(view.pull_u32()?),
        type_id::INT64 => NativeValue::Int64(view.pull_i64()?),
        type_id::UINT64 => NativeValue::UInt64(view.pull_u64()?),
        type_id::FLOAT => NativeValue::Float(f32::from_bits(view.pull_u32()?)),
        type_id::DOUBLE => NativeValue::Double(view.pull_f64()?),
        type_id::BOOL => match view.pull_u8()? {
            0 => NativeValue::Bool(false),
            1 => NativeValue::Bool(true),
            _ => return Err(Error::Protocol("boolean out of range")),
        },
        type_id::SIZE => NativeValue::Size(view.pull_u64()?),
        type_id::SSIZE => NativeValue::SSize(view.pull_i64()?),
        type_id::STRING => {
            let len = view.pull_u32()? as usize;
            if len == 0 {
                return Err(Error::Protocol("string without terminator"));
            }
            let bytes = view.pull(len, 1)?;
            if bytes[len - 1] != 0 {
                return Err(Error::Protocol("string not NUL-terminated"));
            }
            let s = std::str::from_utf8(&bytes[..len - 1])
                .map_err(|_| Error::Protocol("string not valid UTF-8"))?;
            NativeValue::String(s.to_owned())
        }
        type_id::ARRAY => {
            let count = view.pull_u32()? as usize;
            if count > view.remaining() {
                return Err(Error::Protocol("array count exceeds buffer"));
            }
            let mut elems = Vec::with_capacity(count);
            for _ in 0..count {
                elems.push(pull_value(view, map, depth + 1)?);
            }
            NativeValue::Array(elems)
        }
        other => {
            // A struct in the peer's id space; unmap into ours.
            let native_id = map.map(|m| m.unmap(other)).unwrap_or(other);
            let descr = find_native_type(native_id)
                .ok_or(Error::Unsupported("unregistered type id"))?;
            let count = view.pull_u32()? as usize;
            if count != descr.members.len() {
                return Err(Error::Protocol("member count mismatch"));
            }
            let mut members = Vec::with_capacity(count);
            for mtype in &descr.members {
                let member = pull_value(view, map, depth + 1)?;
                check_value_type(&member, &mtype.ty)?;
                members.push(member);
            }
            NativeValue::Struct(NativeStruct { type_id: native_id, members })
        }
    };
    Ok(value)
}

fn check_value_type(value: &NativeValue, expect: &NativeMemberType) -> Result<()> {
    let ok = match expect {
        NativeMemberType::Scalar(id) => value.type_tag() == *id,
        NativeMemberType::Array(elem) => match value {
            NativeValue::Array(elems) => {
                elems.iter().all(|e| check_value_type(e, elem).is_ok())
            }
            _ => false,
        },
        NativeMemberType::Struct(id) => {
            matches!(value, NativeValue::Struct(s) if s.type_id == *id)
        }
    };
    if ok {
        Ok(())
    } else {
        Err(Error::Protocol("member type mismatch"))
    }
}

#[cfg(test)]
#[path = "native_tests.rs"]
mod tests;
