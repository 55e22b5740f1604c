//! Flat `key=value,key=value` state stored in node annotations
//!
//! Decoding is lenient because annotations may be edited by hand or by other
//! controllers. Encoding is strict and deterministic: entries are emitted in
//! key order so re-encoding unchanged state yields the same bytes.

use std::collections::BTreeMap;

/// Reserved key holding a node's allocated router ID
pub const ROUTER_ID_KEY: &str = "router-id";

/// Default annotation prefix; the ASN identifier is appended to it.
pub const DEFAULT_ANNOTATION_PREFIX: &str = "cilium.io/bgp-virtual-router.";

const ENTRY_SEPARATOR: char = ',';
const KEY_VALUE_SEPARATOR: char = '=';

/// Decoded annotation contents, ordered by key
pub type AnnotationState = BTreeMap<String, String>;

/// Annotation key used for one ASN
pub fn annotation_key(prefix: &str, asn: &str) -> String {
    format!("{}{}", prefix, asn)
}

/// Decode an annotation value.
///
/// Pieces that do not contain exactly one `=` are dropped. Keys and values are
/// trimmed. An empty string decodes to an empty state.
pub fn decode(raw: &str) -> AnnotationState {
    let mut state = AnnotationState::new();
    for piece in raw.split(ENTRY_SEPARATOR) {
        let mut parts = piece.split(KEY_VALUE_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(value), None) => {
                state.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => continue,
        }
    }
    state
}

/// Encode state as `key=value` pairs joined by `,`, sorted by key.
pub fn encode(state: &AnnotationState) -> String {
    state
        .iter()
        .map(|(key, value)| format!("{}{}{}", key, KEY_VALUE_SEPARATOR, value))
        .collect::<Vec<_>>()
        .join(&ENTRY_SEPARATOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(pairs: &[(&str, &str)]) -> AnnotationState {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_decode_basic() {
        let decoded = decode("router-id=2001:db8::1,local-port=179");
        assert_eq!(decoded, state(&[("router-id", "2001:db8::1"), ("local-port", "179")]));
    }

    #[test]
    fn test_decode_trims_whitespace() {
        let decoded = decode(" router-id = 2001:db8::1 ,  local-port=179 ");
        assert_eq!(decoded, state(&[("router-id", "2001:db8::1"), ("local-port", "179")]));
    }

    #[test]
    fn test_decode_drops_malformed_pieces() {
        let decoded = decode("garbage,a=b=c,,router-id=2001:db8::2");
        assert_eq!(decoded, state(&[("router-id", "2001:db8::2")]));
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode("").is_empty());
    }

    #[test]
    fn test_encode_sorts_by_key() {
        let encoded = encode(&state(&[("router-id", "2001:db8::1"), ("local-port", "179")]));
        assert_eq!(encoded, "local-port=179,router-id=2001:db8::1");
    }

    #[test]
    fn test_encode_empty() {
        assert_eq!(encode(&AnnotationState::new()), "");
    }

    #[test]
    fn test_decode_encode_roundtrip() {
        let original = state(&[("router-id", "2001:db8::3"), ("local-port", "179"), ("x", "")]);
        assert_eq!(decode(&encode(&original)), original);
    }

    #[test]
    fn test_reencode_of_sorted_value_is_identical() {
        let stored = "local-port=179,router-id=2001:db8::3";
        assert_eq!(encode(&decode(stored)), stored);
    }

    #[test]
    fn test_annotation_key() {
        assert_eq!(
            annotation_key(DEFAULT_ANNOTATION_PREFIX, "65001"),
            "cilium.io/bgp-virtual-router.65001"
        );
    }
}
