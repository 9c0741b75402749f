//! Order-preserving byte encodings for indexed field values.
//!
//! The encodings define index sort order: for two values of the same
//! type, domain order matches byte-lexicographic order of the encoding.

use serde_json::Value;

const SIGN_BIT: u64 = 1 << 63;

/// Encodes a JSON value for use in an index key.
///
/// Rules, by type:
/// - null (or an absent field) encodes to the empty byte sequence
/// - booleans encode as their string form
/// - strings encode as their raw UTF-8 bytes
/// - numbers encode as a fixed-width 8-byte big-endian transform of
///   their `f64` representation, ordered like the numbers themselves
/// - arrays and objects encode as their canonical JSON string
#[must_use]
pub fn encode_value(value: &Value) -> Vec<u8> {
    match value {
        Value::Null => Vec::new(),
        Value::Bool(b) => encode_value(&Value::String(b.to_string())),
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Number(n) => encode_f64(n.as_f64().unwrap_or(0.0)).to_vec(),
        composite => serde_json::to_string(composite)
            .unwrap_or_default()
            .into_bytes(),
    }
}

/// Encodes an `f64` so that byte order matches numeric order.
///
/// Positive values get the sign bit set; negative values have all bits
/// inverted. The result is big-endian so lexicographic comparison of
/// the bytes equals numeric comparison of the inputs.
#[must_use]
pub fn encode_f64(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    let ordered = if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits | SIGN_BIT
    };
    ordered.to_be_bytes()
}

/// Encodes a signed 64-bit integer so that byte order matches numeric
/// order. Used for time instants expressed as nanoseconds since the
/// Unix epoch.
#[must_use]
pub fn encode_i64(value: i64) -> [u8; 8] {
    ((value as u64) ^ SIGN_BIT).to_be_bytes()
}

/// Encodes a time instant given as nanoseconds since the Unix epoch.
#[must_use]
pub fn encode_instant(nanos: i64) -> [u8; 8] {
    encode_i64(nanos)
}

/// Encodes a duration given as its integer magnitude.
#[must_use]
pub fn encode_duration(magnitude: u64) -> [u8; 8] {
    magnitude.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn null_is_empty() {
        assert!(encode_value(&Value::Null).is_empty());
    }

    #[test]
    fn booleans_encode_as_strings() {
        assert_eq!(encode_value(&json!(false)), b"false");
        assert_eq!(encode_value(&json!(true)), b"true");
        assert!(encode_value(&json!(false)) < encode_value(&json!(true)));
    }

    #[test]
    fn strings_are_raw_utf8() {
        assert_eq!(encode_value(&json!("abc")), b"abc");
    }

    #[test]
    fn composites_encode_as_json() {
        assert_eq!(encode_value(&json!([1, 2])), b"[1,2]");
        assert_eq!(encode_value(&json!({"a": 1})), br#"{"a":1}"#);
    }

    #[test]
    fn numbers_order_across_sign() {
        let values = [-1e9, -1.5, -0.0, 0.0, 0.25, 2.0, 1e9];
        for window in values.windows(2) {
            assert!(
                encode_f64(window[0]) <= encode_f64(window[1]),
                "{} should encode <= {}",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn integers_and_floats_share_ordering() {
        assert!(encode_value(&json!(2)) < encode_value(&json!(10)));
        assert!(encode_value(&json!(-3)) < encode_value(&json!(2.5)));
    }

    #[test]
    fn instants_order() {
        assert!(encode_instant(-1_000) < encode_instant(0));
        assert!(encode_instant(0) < encode_instant(1_000_000_000));
    }

    #[test]
    fn durations_order() {
        assert!(encode_duration(0) < encode_duration(1));
        assert!(encode_duration(1) < encode_duration(u64::MAX));
    }

    proptest! {
        #[test]
        fn f64_order_preserved(a in prop::num::f64::NORMAL, b in prop::num::f64::NORMAL) {
            prop_assert_eq!(a < b, encode_f64(a) < encode_f64(b));
        }

        #[test]
        fn i64_order_preserved(a: i64, b: i64) {
            prop_assert_eq!(a < b, encode_i64(a) < encode_i64(b));
        }

        #[test]
        fn u64_order_preserved(a: u64, b: u64) {
            prop_assert_eq!(a < b, encode_duration(a) < encode_duration(b));
        }

        #[test]
        fn string_order_preserved(a in "[a-z]{0,12}", b in "[a-z]{0,12}") {
            let (ea, eb) = (encode_value(&json!(a)), encode_value(&json!(b)));
            prop_assert_eq!(a < b, ea < eb);
        }
    }
}
