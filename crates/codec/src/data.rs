// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schema-driven struct codec.
//!
//! A [`DataDescriptor`] names a record type and lists its members in
//! order; a [`DataObject`] is one dynamic instance of such a type. The
//! wire form is the generic codec's `{tag, type, value}` triples walked
//! in member order, so a schema-described record and a hand-built
//! message with the same fields are byte-identical.
//!
//! Array members come in three shapes: sized (the element count is
//! cross-checked against another member), guard-terminated (the last
//! element must equal the sentinel, which is preserved in the value),
//! and fixed-size. Strings may be declared inlined with a capacity
//! bound; both string layouts decode to owned strings.
//!
//! Descriptors are registered in a process-wide registry keyed by the
//! record-type tag carried in each frame; tag 0 belongs to the generic
//! codec.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use smol_str::SmolStr;

use plinth_core::error::{Error, Result};
use plinth_core::msgbuf::{MsgBuf, MsgView};

use crate::field::{self, FieldType, Value, FIELD_ARRAY};

/// How an array member's length is determined.
#[derive(Debug, Clone, PartialEq)]
pub enum ArraySize {
    /// Element count lives in another member, by member index.
    Sized { count_member: usize },
    /// The array ends with this sentinel value (included on the wire).
    Guarded { sentinel: Value },
    /// Exactly this many elements.
    Fixed { nelem: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberLayout {
    Scalar,
    /// Character-array string with a capacity bound.
    InlineString { capacity: usize },
    Array(ArraySize),
    /// Blob whose byte size is cross-checked against another member.
    Blob { size_member: usize },
}

#[derive(Debug, Clone)]
pub struct DataMember {
    pub name: SmolStr,
    pub tag: u16,
    /// Scalar type, or element type for arrays.
    pub ty: FieldType,
    pub layout: MemberLayout,
}

#[derive(Debug, Clone)]
pub struct DataDescriptor {
    tag: u16,
    name: SmolStr,
    members: Vec<DataMember>,
}

impl DataDescriptor {
    /// Validate and build a descriptor. Tag 0 is reserved for the
    /// generic codec.
    pub fn new(
        tag: u16,
        name: impl Into<SmolStr>,
        members: Vec<DataMember>,
    ) -> Result<DataDescriptor> {
        if tag == crate::TAG_DEFAULT {
            return Err(Error::InvalidArgument("record tag 0 is reserved"));
        }
        if members.is_empty() {
            return Err(Error::InvalidArgument("descriptor without members"));
        }

        for (i, m) in members.iter().enumerate() {
            match &m.layout {
                MemberLayout::Scalar => {
                    if m.ty == FieldType::Blob {
                        return Err(Error::InvalidArgument(
                            "blob member needs a size member",
                        ));
                    }
                }
                MemberLayout::InlineString { capacity } => {
                    if m.ty != FieldType::String || *capacity == 0 {
                        return Err(Error::InvalidArgument("bad inline string member"));
                    }
                }
                MemberLayout::Array(size) => {
                    if m.ty == FieldType::Blob {
                        return Err(Error::InvalidArgument("blob not allowed in arrays"));
                    }
                    match size {
                        ArraySize::Sized { count_member } => {
                            // The count must be decodable before the array.
                            let counter = members
                                .get(*count_member)
                                .ok_or(Error::InvalidArgument("count member out of range"))?;
                            if *count_member >= i || !is_integer(counter.ty) {
                                return Err(Error::InvalidArgument("bad count member"));
                            }
                        }
                        ArraySize::Guarded { sentinel } => {
                            if sentinel.is_array() || sentinel.field_type() != m.ty {
                                return Err(Error::InvalidArgument(
                                    "sentinel type mismatch",
                                ));
                            }
                        }
                        ArraySize::Fixed { nelem } => {
                            if *nelem == 0 {
                                return Err(Error::InvalidArgument("empty fixed array"));
                            }
                        }
                    }
                }
                MemberLayout::Blob { size_member } => {
                    let counter = members
                        .get(*size_member)
                        .ok_or(Error::InvalidArgument("size member out of range"))?;
                    if m.ty != FieldType::Blob || *size_member >= i || !is_integer(counter.ty)
                    {
                        return Err(Error::InvalidArgument("bad blob member"));
                    }
                }
            }
        }

        Ok(DataDescriptor { tag, name: name.into(), members })
    }

    pub fn tag(&self) -> u16 {
        self.tag
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[DataMember] {
        &self.members
    }

    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }
}

/// One dynamic instance of a registered record type.
#[derive(Debug, Clone, PartialEq)]
pub struct DataObject {
    tag: u16,
    members: Vec<Value>,
}

impl DataObject {
    /// Build an instance, checking each value against the descriptor.
    pub fn new(descr: &DataDescriptor, members: Vec<Value>) -> Result<DataObject> {
        if members.len() != descr.members.len() {
            return Err(Error::InvalidArgument("member count mismatch"));
        }
        for (value, member) in members.iter().zip(&descr.members) {
            check_member(value, member)?;
        }
        Ok(DataObject { tag: descr.tag, members })
    }

    pub fn tag(&self) -> u16 {
        self.tag
    }

    pub fn members(&self) -> &[Value] {
        &self.members
    }

    pub fn member(&self, idx: usize) -> Option<&Value> {
        self.members.get(idx)
    }

    /// Encode in member order; the wire form matches a generic message
    /// with the same fields.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let descr = find_type(self.tag).ok_or(Error::Unsupported("unregistered record tag"))?;
        let mut buf = MsgBuf::new();
        for (value, member) in self.members.iter().zip(descr.members()) {
            buf.push_u16(member.tag);
            buf.push_u16(value.wire_type());
            field::encode_value(&mut buf, value)?;
        }
        Ok(buf.steal())
    }

    /// Decode an instance of the type registered under `tag`. Members
    /// arrive in descriptor order; sized arrays are cross-checked
    /// against their count member, guarded arrays against the sentinel.
    pub fn decode(tag: u16, bytes: &[u8]) -> Result<DataObject> {
        let descr = find_type(tag).ok_or(Error::Unsupported("unregistered record tag"))?;
        let mut view = MsgView::new(bytes);
        let mut members: Vec<Value> = Vec::with_capacity(descr.members.len());

        for member in descr.members() {
            let wire_tag = view.pull_u16()?;
            if wire_tag != member.tag {
                return Err(Error::Protocol("member tag out of order"));
            }
            let wire_type = view.pull_u16()?;
            let expect_array = matches!(member.layout, MemberLayout::Array(_));
            if (wire_type & FIELD_ARRAY != 0) != expect_array {
                return Err(Error::Protocol("member arity mismatch"));
            }
            let decoded_ty = FieldType::from_wire(wire_type & !FIELD_ARRAY)
                .ok_or(Error::Unsupported("unknown field type"))?;
            if decoded_ty != member.ty {
                return Err(Error::Protocol("member type mismatch"));
            }

            let value = field::decode_value(&mut view, wire_type)?;
            check_decoded(&value, member, &members)?;
            members.push(value);
        }

        if !view.is_empty() {
            return Err(Error::Protocol("trailing bytes after record"));
        }
        Ok(DataObject { tag, members })
    }
}

fn is_integer(ty: FieldType) -> bool {
    matches!(
        ty,
        FieldType::UInt8
            | FieldType::SInt8
            | FieldType::UInt16
            | FieldType::SInt16
            | FieldType::UInt32
            | FieldType::SInt32
            | FieldType::UInt64
            | FieldType::SInt64
    )
}

fn integer_value(value: &Value) -> Option<i128> {
    match value {
        Value::UInt8(v) => Some(*v as i128),
        Value::SInt8(v) => Some(*v as i128),
        Value::UInt16(v) => Some(*v as i128),
        Value::SInt16(v) => Some(*v as i128),
        Value::UInt32(v) => Some(*v as i128),
        Value::SInt32(v) => Some(*v as i128),
        Value::UInt64(v) => Some(*v as i128),
        Value::SInt64(v) => Some(*v as i128),
        _ => None,
    }
}

fn array_last(value: &Value) -> Option<Value> {
    use crate::field::ArrayValue;

    let Value::Array(array) = value else { return None };
    match array {
        ArrayValue::String(v) => v.last().cloned().map(Value::String),
        ArrayValue::Bool(v) => v.last().copied().map(Value::Bool),
        ArrayValue::UInt8(v) => v.last().copied().map(Value::UInt8),
        ArrayValue::SInt8(v) => v.last().copied().map(Value::SInt8),
        ArrayValue::UInt16(v) => v.last().copied().map(Value::UInt16),
        ArrayValue::SInt16(v) => v.last().copied().map(Value::SInt16),
        ArrayValue::UInt32(v) => v.last().copied().map(Value::UInt32),
        ArrayValue::SInt32(v) => v.last().copied().map(Value::SInt32),
        ArrayValue::UInt64(v) => v.last().copied().map(Value::UInt64),
        ArrayValue::SInt64(v) => v.last().copied().map(Value::SInt64),
        ArrayValue::Double(v) => v.last().copied().map(Value::Double),
    }
}

/// Shape check used when building an object by hand.
fn check_member(value: &Value, member: &DataMember) -> Result<()> {
    match &member.layout {
        MemberLayout::Scalar => {
            if value.is_array() || value.field_type() != member.ty {
                return Err(Error::InvalidArgument("member type mismatch"));
            }
        }
        MemberLayout::InlineString { capacity } => match value {
            Value::String(s) if s.len() < *capacity => {}
            Value::String(_) => {
                return Err(Error::InvalidArgument("inline string over capacity"))
            }
            _ => return Err(Error::InvalidArgument("member type mismatch")),
        },
        MemberLayout::Array(size) => {
            let Value::Array(array) = value else {
                return Err(Error::InvalidArgument("member type mismatch"));
            };
            if array.elem_type() != member.ty {
                return Err(Error::InvalidArgument("element type mismatch"));
            }
            match size {
                ArraySize::Sized { .. } => {}
                ArraySize::Fixed { nelem } => {
                    if array.len() != *nelem {
                        return Err(Error::InvalidArgument("fixed array length mismatch"));
                    }
                }
                ArraySize::Guarded { sentinel } => {
                    if array_last(value).as_ref() != Some(sentinel) {
                        return Err(Error::InvalidArgument("guarded array lacks sentinel"));
                    }
                }
            }
        }
        MemberLayout::Blob { .. } => {
            if !matches!(value, Value::Blob(_)) {
                return Err(Error::InvalidArgument("member type mismatch"));
            }
        }
    }
    Ok(())
}

/// Wire-side checks that need the members decoded so far.
fn check_decoded(value: &Value, member: &DataMember, decoded: &[Value]) -> Result<()> {
    match &member.layout {
        MemberLayout::InlineString { capacity } => {
            if let Value::String(s) = value {
                if s.len() >= *capacity {
                    return Err(Error::Protocol("inline string over capacity"));
                }
            }
        }
        MemberLayout::Array(ArraySize::Sized { count_member }) => {
            let count = decoded
                .get(*count_member)
                .and_then(integer_value)
                .ok_or(Error::Protocol("count member missing"))?;
            let Value::Array(array) = value else {
                return Err(Error::Protocol("member arity mismatch"));
            };
            if count < 0 || array.len() as i128 != count {
                return Err(Error::Protocol("array count mismatch"));
            }
        }
        MemberLayout::Array(ArraySize::Fixed { nelem }) => {
            let Value::Array(array) = value else {
                return Err(Error::Protocol("member arity mismatch"));
            };
            if array.len() != *nelem {
                return Err(Error::Protocol("fixed array length mismatch"));
            }
        }
        MemberLayout::Array(ArraySize::Guarded { sentinel }) => {
            if array_last(value).as_ref() != Some(sentinel) {
                return Err(Error::Protocol("guarded array lacks sentinel"));
            }
        }
        MemberLayout::Blob { size_member } => {
            let size = decoded
                .get(*size_member)
                .and_then(integer_value)
                .ok_or(Error::Protocol("size member missing"))?;
            let Value::Blob(blob) = value else {
                return Err(Error::Protocol("member type mismatch"));
            };
            if size < 0 || blob.len() as i128 != size {
                return Err(Error::Protocol("blob size mismatch"));
            }
        }
        MemberLayout::Scalar => {}
    }
    Ok(())
}

fn registry() -> &'static RwLock<HashMap<u16, Arc<DataDescriptor>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<u16, Arc<DataDescriptor>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a record type process-wide. Duplicate tags fail with
/// `Exists`.
pub fn register_type(descr: DataDescriptor) -> Result<Arc<DataDescriptor>> {
    let mut reg = registry().write();
    if reg.contains_key(&descr.tag) {
        return Err(Error::Exists);
    }
    let descr = Arc::new(descr);
    reg.insert(descr.tag, Arc::clone(&descr));
    Ok(descr)
}

/// Look up the descriptor registered under `tag`.
pub fn find_type(tag: u16) -> Option<Arc<DataDescriptor>> {
    registry().read().get(&tag).cloned()
}

#[cfg(test)]
#[path = "data_tests.rs"]
mod tests;
