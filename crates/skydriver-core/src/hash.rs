//! Canonical hashing of event payloads for de-duplication.

use md5::{Digest, Md5};
use serde_json::Value;

/// MD5 of the payload's canonical form: object keys sorted, non-ASCII
/// characters escaped, matching the hash used for `event_i3live_json_dict_hash`.
pub fn canonical_event_hash(payload: &Value) -> String {
    let canonical = canonicalize(payload);
    let mut hasher = Md5::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", encode_str(k), canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        Value::String(s) => encode_str(s),
        other => other.to_string(),
    }
}

/// Escapes non-ASCII characters the way `json.dumps(ensure_ascii=True)` does,
/// so the hash is stable across locales and input encodings.
fn encode_str(s: &str) -> String {
    let mut out = String::from("\"");
    for c in s.chars() {
        if c.is_ascii() && c != '"' && c != '\\' {
            out.push(c);
        } else if c == '"' || c == '\\' {
            out.push('\\');
            out.push(c);
        } else {
            for unit in c.encode_utf16(&mut [0u16; 2]) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_event_hash(&a), canonical_event_hash(&b));
    }

    #[test]
    fn differing_payloads_hash_differently() {
        let a = json!({"a": 1});
        let b = json!({"a": 2});
        assert_ne!(canonical_event_hash(&a), canonical_event_hash(&b));
    }

    #[test]
    fn non_ascii_is_escaped_consistently() {
        let a = json!({"name": "caf\u{e9}"});
        let hash1 = canonical_event_hash(&a);
        let hash2 = canonical_event_hash(&a);
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 32);
    }
}
