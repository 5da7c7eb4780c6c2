// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Codec spec: schema-described struct roundtrip with a sentinel
//! array.

use plinth_codec::{
    register_type, ArraySize, ArrayValue, DataDescriptor, DataMember, DataObject,
    FieldType, MemberLayout, Value,
};

/// Encode a struct of `{u16, sentinel-terminated u32 array [1, 2, 3,
/// -1], inlined string "hello"}` with the struct codec, decode it, and
/// compare field by field; the sentinel survives the trip.
#[test]
fn schema_struct_roundtrip_preserves_the_sentinel() {
    const TAG: u16 = 0x2001;
    let sentinel = u32::MAX; // -1 in the wire's 32-bit band

    let descr = register_type(
        DataDescriptor::new(
            TAG,
            "spec-record",
            vec![
                DataMember {
                    name: "flags".into(),
                    tag: 1,
                    ty: FieldType::UInt16,
                    layout: MemberLayout::Scalar,
                },
                DataMember {
                    name: "values".into(),
                    tag: 2,
                    ty: FieldType::UInt32,
                    layout: MemberLayout::Array(ArraySize::Guarded {
                        sentinel: Value::UInt32(sentinel),
                    }),
                },
                DataMember {
                    name: "label".into(),
                    tag: 3,
                    ty: FieldType::String,
                    layout: MemberLayout::InlineString { capacity: 16 },
                },
            ],
        )
        .unwrap(),
    )
    .unwrap();

    let original = DataObject::new(
        &descr,
        vec![
            Value::UInt16(0xbeef),
            Value::Array(ArrayValue::UInt32(vec![1, 2, 3, sentinel])),
            Value::String("hello".into()),
        ],
    )
    .unwrap();

    let wire = original.encode().unwrap();
    let decoded = DataObject::decode(TAG, &wire).unwrap();

    assert_eq!(decoded.member(0), Some(&Value::UInt16(0xbeef)));
    assert_eq!(
        decoded.member(1),
        Some(&Value::Array(ArrayValue::UInt32(vec![1, 2, 3, sentinel])))
    );
    assert_eq!(decoded.member(2), Some(&Value::String("hello".into())));
    assert_eq!(decoded, original);
}
