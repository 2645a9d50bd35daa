//! Cache fingerprints.
//!
//! A key has the form `<family>:<sha256hex>:<version>`. The hash covers the
//! canonical serialization of the inputs map: object keys sorted
//! lexicographically at every level, values rendered in compact JSON. Two
//! logically-equal input maps therefore hash identically regardless of
//! insertion order, and a model swap changes every key through the version
//! suffix.

use crate::models::ModelFamily;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Deterministic cache key for one prediction request.
pub fn fingerprint(family: ModelFamily, inputs: &Value, version: &str) -> String {
    let mut canonical = String::new();
    render_canonical(inputs, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    format!("{}:{}:{}", family.as_str(), hash, version)
}

/// SHA-256 hex of raw bytes. Used for the geometry portion of STL keys so a
/// cache hit never pays for a mesh parse.
pub fn bytes_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Invalidation pattern covering every entry of a family.
pub fn family_pattern(family: ModelFamily) -> String {
    format!("{}:*", family.as_str())
}

/// Invalidation pattern covering one model version of a family.
pub fn version_pattern(family: ModelFamily, version: &str) -> String {
    format!("{}:*:{}", family.as_str(), version)
}

/// Stable JSON rendering: object keys sorted, no whitespace.
fn render_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*k).clone()).to_string());
                out.push(':');
                render_canonical(&map[*k], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                render_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_shape() {
        let key = fingerprint(ModelFamily::PrintTime, &json!({"a": 1}), "1.0.0");
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "print_time");
        assert_eq!(parts[1].len(), 64);
        assert_eq!(parts[2], "1.0.0");
    }

    #[test]
    fn test_key_order_independent() {
        let a = json!({"speed": 60.0, "infill": 20, "material": "PLA"});
        let b = json!({"material": "PLA", "infill": 20, "speed": 60.0});
        assert_eq!(
            fingerprint(ModelFamily::PrintTime, &a, "1.0.0"),
            fingerprint(ModelFamily::PrintTime, &b, "1.0.0")
        );
    }

    #[test]
    fn test_key_nested_order_independent() {
        let a = json!({"outer": {"x": 1, "y": 2}});
        let b = json!({"outer": {"y": 2, "x": 1}});
        assert_eq!(
            fingerprint(ModelFamily::DemandForecast, &a, "1.0.0"),
            fingerprint(ModelFamily::DemandForecast, &b, "1.0.0")
        );
    }

    #[test]
    fn test_key_sensitive_to_value_and_version() {
        let base = json!({"infill": 20});
        let key = fingerprint(ModelFamily::PrintTime, &base, "1.0.0");

        let changed = json!({"infill": 25});
        assert_ne!(key, fingerprint(ModelFamily::PrintTime, &changed, "1.0.0"));
        assert_ne!(key, fingerprint(ModelFamily::PrintTime, &base, "1.1.0"));
    }

    #[test]
    fn test_patterns() {
        assert_eq!(family_pattern(ModelFamily::PrintTime), "print_time:*");
        assert_eq!(
            version_pattern(ModelFamily::PrintTime, "1.0.0"),
            "print_time:*:1.0.0"
        );
    }
}
