// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic message tests: wire layout and roundtrips.

use super::*;
use crate::field::{ArrayValue, FIELD_ARRAY};
use plinth_core::error::Error;
use proptest::prelude::*;

#[test]
fn builder_keeps_field_order() {
    let msg = Message::new()
        .with_field(1, Value::UInt32(42))
        .with_field(2, Value::String("hi".into()))
        .with_field(1, Value::Bool(true));

    assert_eq!(msg.len(), 3);
    assert_eq!(msg.find(1), Some(&Value::UInt32(42)));
    assert_eq!(msg.fields()[2].value, Value::Bool(true));
}

#[test]
fn set_overwrites_in_place() {
    let mut msg = Message::new().with_field(5, Value::UInt8(1));
    msg.set(5, Value::UInt8(2));
    msg.set(6, Value::UInt8(3));
    assert_eq!(msg.len(), 2);
    assert_eq!(msg.find(5), Some(&Value::UInt8(2)));
}

#[test]
fn wire_layout_of_a_u32_field() {
    let msg = Message::new().with_field(0x0102, Value::UInt32(0x01020304));
    let bytes = msg.encode().unwrap();
    assert_eq!(bytes, vec![0x01, 0x02, 0x00, 0x0a, 0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn wire_layout_of_a_string_field() {
    let msg = Message::new().with_field(7, Value::String("hi".into()));
    let bytes = msg.encode().unwrap();
    // tag, type, u32 len (incl NUL), bytes, NUL
    assert_eq!(
        bytes,
        vec![0x00, 0x07, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03, b'h', b'i', 0x00]
    );
}

#[test]
fn wire_layout_of_an_array_field() {
    let msg =
        Message::new().with_field(3, Value::Array(ArrayValue::UInt16(vec![1, 2])));
    let bytes = msg.encode().unwrap();
    assert_eq!(&bytes[2..4], &[0x00, 0x08 | FIELD_ARRAY as u8]);
    assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x02]);
    assert_eq!(&bytes[8..], &[0x00, 0x01, 0x00, 0x02]);
}

#[test]
fn doubles_travel_as_big_endian_ieee754() {
    let msg = Message::new().with_field(1, Value::Double(1.5));
    let bytes = msg.encode().unwrap();
    assert_eq!(&bytes[4..], &1.5f64.to_bits().to_be_bytes());
}

#[test]
fn legacy_integer_codes_decode_as_32_bit() {
    // tag 1, legacy "unsigned" code 0x03, value 9
    let wire = [0x00, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00, 0x09];
    let msg = Message::decode(&wire).unwrap();
    assert_eq!(msg.find(1), Some(&Value::UInt32(9)));
}

#[test]
fn unknown_type_code_is_unsupported() {
    let wire = [0x00, 0x01, 0x00, 0x7f, 0x00];
    assert!(matches!(Message::decode(&wire), Err(Error::Unsupported(_))));
}

#[test]
fn truncated_field_is_a_protocol_error() {
    let msg = Message::new().with_field(1, Value::UInt64(7));
    let bytes = msg.encode().unwrap();
    assert!(matches!(Message::decode(&bytes[..6]), Err(Error::Protocol(_))));
}

#[test]
fn bad_bool_byte_is_rejected() {
    let wire = [0x00, 0x01, 0x00, 0x05, 0x02];
    assert!(matches!(Message::decode(&wire), Err(Error::Protocol(_))));
}

#[test]
fn absurd_array_count_is_rejected_before_allocation() {
    let mut wire = vec![0x00, 0x01, 0x00, 0x0a | 0x80];
    wire.extend_from_slice(&u32::MAX.to_be_bytes());
    assert!(matches!(Message::decode(&wire), Err(Error::Protocol(_))));
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-z]{0,12}".prop_map(Value::String),
        any::<bool>().prop_map(Value::Bool),
        any::<u8>().prop_map(Value::UInt8),
        any::<i8>().prop_map(Value::SInt8),
        any::<u16>().prop_map(Value::UInt16),
        any::<i16>().prop_map(Value::SInt16),
        any::<u32>().prop_map(Value::UInt32),
        any::<i32>().prop_map(Value::SInt32),
        any::<u64>().prop_map(Value::UInt64),
        any::<i64>().prop_map(Value::SInt64),
        prop::num::f64::NORMAL.prop_map(Value::Double),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Blob),
    ]
}

fn arb_array() -> impl Strategy<Value = Value> {
    prop_oneof![
        prop::collection::vec("[a-z]{0,6}", 0..8)
            .prop_map(|v| Value::Array(ArrayValue::String(v))),
        prop::collection::vec(any::<u32>(), 0..16)
            .prop_map(|v| Value::Array(ArrayValue::UInt32(v))),
        prop::collection::vec(any::<i64>(), 0..16)
            .prop_map(|v| Value::Array(ArrayValue::SInt64(v))),
        prop::collection::vec(prop::num::f64::NORMAL, 0..8)
            .prop_map(|v| Value::Array(ArrayValue::Double(v))),
    ]
}

proptest! {
    /// decode ∘ encode is the identity on messages.
    #[test]
    fn roundtrip_is_identity(
        fields in prop::collection::vec(
            (any::<u16>(), prop_oneof![arb_scalar(), arb_array()]),
            0..16,
        )
    ) {
        let msg: Message = fields.into_iter().collect();
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        prop_assert_eq!(msg, decoded);
    }
}
