// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Struct codec tests: descriptors, registry, array shapes.
//!
//! Tags are unique per test; the registry is process-wide and tests run
//! in parallel.

use super::*;
use crate::field::ArrayValue;
use plinth_core::error::Error;

fn member(name: &str, tag: u16, ty: FieldType, layout: MemberLayout) -> DataMember {
    DataMember { name: name.into(), tag, ty, layout }
}

/// `{u16 count, sentinel u32 array, inlined string}` — the workhorse
/// shape exercised across these tests.
fn mixed_descriptor(tag: u16) -> DataDescriptor {
    DataDescriptor::new(
        tag,
        "mixed",
        vec![
            member("count", 1, FieldType::UInt16, MemberLayout::Scalar),
            member(
                "sized",
                2,
                FieldType::UInt32,
                MemberLayout::Array(ArraySize::Sized { count_member: 0 }),
            ),
            member(
                "guarded",
                3,
                FieldType::SInt32,
                MemberLayout::Array(ArraySize::Guarded { sentinel: Value::SInt32(-1) }),
            ),
            member("name", 4, FieldType::String, MemberLayout::InlineString { capacity: 32 }),
        ],
    )
    .unwrap()
}

fn mixed_object(descr: &DataDescriptor) -> DataObject {
    DataObject::new(
        descr,
        vec![
            Value::UInt16(3),
            Value::Array(ArrayValue::UInt32(vec![7, 8, 9])),
            Value::Array(ArrayValue::SInt32(vec![1, 2, 3, -1])),
            Value::String("hello".into()),
        ],
    )
    .unwrap()
}

#[test]
fn roundtrip_preserves_every_member_and_the_sentinel() {
    let descr = register_type(mixed_descriptor(0x1001)).unwrap();
    let obj = mixed_object(&descr);

    let bytes = obj.encode().unwrap();
    let decoded = DataObject::decode(0x1001, &bytes).unwrap();

    assert_eq!(decoded, obj);
    assert_eq!(
        decoded.member(2),
        Some(&Value::Array(ArrayValue::SInt32(vec![1, 2, 3, -1])))
    );
}

#[test]
fn record_wire_form_matches_a_generic_message() {
    let descr = register_type(mixed_descriptor(0x1002)).unwrap();
    let obj = mixed_object(&descr);

    let msg = crate::Message::new()
        .with_field(1, Value::UInt16(3))
        .with_field(2, Value::Array(ArrayValue::UInt32(vec![7, 8, 9])))
        .with_field(3, Value::Array(ArrayValue::SInt32(vec![1, 2, 3, -1])))
        .with_field(4, Value::String("hello".into()));

    assert_eq!(obj.encode().unwrap(), msg.encode().unwrap());
}

#[test]
fn tag_zero_is_reserved() {
    let err = DataDescriptor::new(
        0,
        "bad",
        vec![member("x", 1, FieldType::UInt8, MemberLayout::Scalar)],
    );
    assert!(matches!(err, Err(Error::InvalidArgument(_))));
}

#[test]
fn duplicate_registration_fails_with_exists() {
    register_type(mixed_descriptor(0x1003)).unwrap();
    assert!(matches!(register_type(mixed_descriptor(0x1003)), Err(Error::Exists)));
}

#[test]
fn unregistered_tag_is_unsupported() {
    assert!(matches!(
        DataObject::decode(0x1fff, &[]),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn count_member_must_precede_the_array() {
    let err = DataDescriptor::new(
        0x1004,
        "bad",
        vec![
            member(
                "arr",
                1,
                FieldType::UInt32,
                MemberLayout::Array(ArraySize::Sized { count_member: 1 }),
            ),
            member("count", 2, FieldType::UInt16, MemberLayout::Scalar),
        ],
    );
    assert!(matches!(err, Err(Error::InvalidArgument(_))));
}

#[test]
fn decode_rejects_a_count_mismatch() {
    let descr = register_type(mixed_descriptor(0x1005)).unwrap();
    let mut obj = mixed_object(&descr);

    // Lie about the count, bypassing the constructor checks.
    obj = DataObject::decode(0x1005, &obj.encode().unwrap()).unwrap();
    let mut bytes = obj.encode().unwrap();
    // Patch the u16 count member's value (tag+type+value = bytes 0..6).
    bytes[5] = 2;

    assert!(matches!(DataObject::decode(0x1005, &bytes), Err(Error::Protocol(_))));
}

#[test]
fn decode_rejects_a_missing_sentinel() {
    let descr = register_type(
        DataDescriptor::new(
            0x1006,
            "guarded",
            vec![member(
                "g",
                1,
                FieldType::UInt32,
                MemberLayout::Array(ArraySize::Guarded { sentinel: Value::UInt32(0) }),
            )],
        )
        .unwrap(),
    )
    .unwrap();

    let err = DataObject::new(
        &descr,
        vec![Value::Array(ArrayValue::UInt32(vec![1, 2, 3]))],
    );
    assert!(matches!(err, Err(Error::InvalidArgument(_))));
}

#[test]
fn fixed_arrays_hold_exactly_their_size() {
    let descr = register_type(
        DataDescriptor::new(
            0x1007,
            "fixed",
            vec![member(
                "f",
                1,
                FieldType::UInt8,
                MemberLayout::Array(ArraySize::Fixed { nelem: 4 }),
            )],
        )
        .unwrap(),
    )
    .unwrap();

    let ok = DataObject::new(&descr, vec![Value::Array(ArrayValue::UInt8(vec![1, 2, 3, 4]))]);
    assert!(ok.is_ok());

    let short = DataObject::new(&descr, vec![Value::Array(ArrayValue::UInt8(vec![1]))]);
    assert!(matches!(short, Err(Error::InvalidArgument(_))));
}

#[test]
fn blob_members_cross_check_their_size() {
    let descr = register_type(
        DataDescriptor::new(
            0x1008,
            "blobbed",
            vec![
                member("size", 1, FieldType::UInt32, MemberLayout::Scalar),
                member("data", 2, FieldType::Blob, MemberLayout::Blob { size_member: 0 }),
            ],
        )
        .unwrap(),
    )
    .unwrap();

    let obj = DataObject::new(
        &descr,
        vec![Value::UInt32(4), Value::Blob(vec![9, 9, 9, 9])],
    )
    .unwrap();
    let decoded = DataObject::decode(0x1008, &obj.encode().unwrap()).unwrap();
    assert_eq!(decoded, obj);

    let mut bytes = obj.encode().unwrap();
    bytes[7] = 3; // shrink the declared size; blob stays 4 bytes
    assert!(matches!(DataObject::decode(0x1008, &bytes), Err(Error::Protocol(_))));
}

#[test]
fn inline_string_capacity_is_enforced() {
    let descr = register_type(
        DataDescriptor::new(
            0x1009,
            "strung",
            vec![member("s", 1, FieldType::String, MemberLayout::InlineString { capacity: 4 })],
        )
        .unwrap(),
    )
    .unwrap();

    assert!(DataObject::new(&descr, vec![Value::String("abc".into())]).is_ok());
    assert!(matches!(
        DataObject::new(&descr, vec![Value::String("abcd".into())]),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn trailing_bytes_after_the_record_are_rejected() {
    let descr = register_type(
        DataDescriptor::new(
            0x100a,
            "tailed",
            vec![member("x", 1, FieldType::UInt8, MemberLayout::Scalar)],
        )
        .unwrap(),
    )
    .unwrap();

    let obj = DataObject::new(&descr, vec![Value::UInt8(1)]).unwrap();
    let mut bytes = obj.encode().unwrap();
    bytes.push(0xff);
    assert!(matches!(DataObject::decode(0x100a, &bytes), Err(Error::Protocol(_))));
}
