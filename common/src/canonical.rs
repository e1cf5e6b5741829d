// Canonical JSON serialization used as the pre-image for every content hash
//
// Format: UTF-8 JSON, object keys sorted ascending, no whitespace, integers
// as bare numbers, byte arrays as lower-case hex strings. serde_json maps are
// BTreeMap-backed so converting through `Value` sorts keys at every level.

use serde::Serialize;
use serde_json::Value;

use crate::crypto::{hash, Hash};

// Canonical JSON value of any serializable type
pub fn to_canonical_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(value)
}

// Canonical JSON string of any serializable type
pub fn to_canonical_string<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let value = to_canonical_value(value)?;
    serde_json::to_string(&value)
}

// Canonical JSON bytes, the exact wire format for batch payloads
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    Ok(to_canonical_string(value)?.into_bytes())
}

// SHA-256 over the canonical JSON serialization
pub fn canonical_hash<T: Serialize + ?Sized>(value: &T) -> Result<Hash, serde_json::Error> {
    Ok(hash(to_canonical_string(value)?.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        zulu: u64,
        alpha: String,
        nested: Nested,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Nested {
        beta: Option<String>,
        omega: bool,
    }

    #[test]
    fn test_keys_sorted_no_whitespace() {
        let sample = Sample {
            zulu: 42,
            alpha: "a".into(),
            nested: Nested {
                beta: None,
                omega: true,
            },
        };
        let s = to_canonical_string(&sample).unwrap();
        assert_eq!(
            s,
            r#"{"alpha":"a","nested":{"beta":null,"omega":true},"zulu":42}"#
        );
    }

    #[test]
    fn test_roundtrip_preserves_hash() {
        let sample = Sample {
            zulu: u64::MAX,
            alpha: "payload".into(),
            nested: Nested {
                beta: Some("b".into()),
                omega: false,
            },
        };
        let first = canonical_hash(&sample).unwrap();
        let parsed: Sample =
            serde_json::from_str(&to_canonical_string(&sample).unwrap()).unwrap();
        assert_eq!(sample, parsed);
        assert_eq!(first, canonical_hash(&parsed).unwrap());
    }
}
