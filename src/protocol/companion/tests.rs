use super::connection::{FrameType, frame_header_for_tests};
use super::opack::{OpackError, OpackValue, decode, encode};
use uuid::Uuid;

fn round_trip(value: OpackValue) {
    let encoded = encode(&value);
    let decoded = decode(&encoded).unwrap();
    assert_eq!(decoded, value, "round trip failed for {value:?}");
}

#[test]
fn scalars_round_trip() {
    round_trip(OpackValue::Bool(true));
    round_trip(OpackValue::Bool(false));
    round_trip(OpackValue::Null);
    round_trip(OpackValue::Uuid(Uuid::from_bytes([7u8; 16])));
    round_trip(OpackValue::Float(3.25));
    round_trip(OpackValue::Float(-0.000_1));
}

#[test]
fn integers_round_trip_across_widths() {
    for value in [
        0i64,
        1,
        0x27,
        0x28,
        127,
        -1,
        -128,
        300,
        -300,
        70_000,
        -70_000,
        5_000_000_000,
        -5_000_000_000,
    ] {
        round_trip(OpackValue::Int(value));
    }
}

#[test]
fn small_int_uses_shortcut_byte() {
    assert_eq!(encode(&OpackValue::Int(0)), vec![0x08]);
    assert_eq!(encode(&OpackValue::Int(0x27)), vec![0x08 + 0x27]);
}

#[test]
fn strings_round_trip_all_length_forms() {
    round_trip(OpackValue::Str(String::new()));
    round_trip(OpackValue::Str("short".to_string()));
    round_trip(OpackValue::Str("x".repeat(0x20)));
    round_trip(OpackValue::Str("y".repeat(200)));
    round_trip(OpackValue::Str("z".repeat(70_000)));
}

#[test]
fn bytes_round_trip_all_length_forms() {
    round_trip(OpackValue::Bytes(Vec::new()));
    round_trip(OpackValue::Bytes(vec![1, 2, 3]));
    round_trip(OpackValue::Bytes(vec![0xAB; 300]));
}

#[test]
fn containers_round_trip() {
    round_trip(OpackValue::Array(vec![
        OpackValue::Int(1),
        OpackValue::Str("two".to_string()),
        OpackValue::Bool(false),
    ]));
    round_trip(OpackValue::dict([
        ("_i", OpackValue::Str("_launchApp".to_string())),
        ("_x", OpackValue::Int(42)),
        (
            "_c",
            OpackValue::dict([("_bundleID", OpackValue::Str("com.netflix.Netflix".to_string()))]),
        ),
    ]));

    // Sizes beyond the inline count limit take the terminated form
    let big_array = OpackValue::Array((0..20).map(OpackValue::Int).collect());
    round_trip(big_array);
    let big_dict = OpackValue::Dict(
        (0..20)
            .map(|i| (format!("key{i}"), OpackValue::Int(i)))
            .collect(),
    );
    round_trip(big_dict);
}

#[test]
fn repeated_values_become_pointers() {
    let repeated = OpackValue::Array(vec![
        OpackValue::Str("same".to_string()),
        OpackValue::Str("same".to_string()),
        OpackValue::Str("same".to_string()),
    ]);
    let encoded = encode(&repeated);
    // First occurrence is spelled out, later ones are one-byte refs
    let spelled = encode(&OpackValue::Str("same".to_string()));
    assert!(encoded.len() < 1 + 3 * spelled.len());
    assert_eq!(decode(&encoded).unwrap(), repeated);
}

#[test]
fn pointer_to_unknown_index_fails() {
    assert!(matches!(
        decode(&[0xA5]),
        Err(OpackError::BadPointer(5))
    ));
}

#[test]
fn truncated_input_fails() {
    // String of declared length 5 with 2 bytes present
    assert!(matches!(
        decode(&[0x45, b'a', b'b']),
        Err(OpackError::Truncated(_))
    ));
}

#[test]
fn non_string_dict_key_fails() {
    // Dict with one entry whose key is an int
    let data = [0xE1, 0x09, 0x09];
    assert!(matches!(decode(&data), Err(OpackError::NonStringKey)));
}

#[test]
fn frame_header_layout() {
    let header = frame_header_for_tests(FrameType::EOpack, 0x01_0203);
    assert_eq!(header, [0x08, 0x01, 0x02, 0x03]);
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn leaf() -> impl Strategy<Value = OpackValue> {
        prop_oneof![
            any::<bool>().prop_map(OpackValue::Bool),
            Just(OpackValue::Null),
            any::<i64>().prop_map(OpackValue::Int),
            any::<f64>()
                .prop_filter("finite", |f| f.is_finite())
                .prop_map(OpackValue::Float),
            "[a-z]{0,40}".prop_map(OpackValue::Str),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(OpackValue::Bytes),
        ]
    }

    fn value() -> impl Strategy<Value = OpackValue> {
        leaf().prop_recursive(3, 32, 8, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..8).prop_map(OpackValue::Array),
                proptest::collection::vec(("[a-z]{1,8}", inner), 0..8).prop_map(|entries| {
                    // Duplicate keys would not survive lookup semantics
                    let mut seen = std::collections::HashSet::new();
                    OpackValue::Dict(
                        entries
                            .into_iter()
                            .filter(|(k, _)| seen.insert(k.clone()))
                            .collect(),
                    )
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn opack_round_trip(value in value()) {
            let encoded = encode(&value);
            prop_assert_eq!(decode(&encoded).unwrap(), value);
        }
    }
}
