//! Credential redaction for audit echoes and error surfaces.
//!
//! Applied whenever a structure is about to be shown back to a caller
//! (sent headers/params, run summaries, stored-record reads) — never
//! when deciding request behavior. Redaction is a fixed point: masking
//! an already-masked value yields the same value.

use serde_json::Value;

const SENSITIVE_KEYS: [&str; 5] = ["api_key", "authorization", "password", "token", "secret"];

/// Does this key name a credential-bearing field?
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|s| lower.contains(s))
}

/// Mask one credential value. Bearer-style values keep the scheme prefix
/// and the last 4 characters; other values keep the last 4 when long
/// enough to stay unrecoverable.
pub fn mask_credential(value: &str) -> String {
    if let Some(token) = value.strip_prefix("Bearer ") {
        if token.len() > 4 {
            format!("Bearer ***{}", &token[token.len() - 4..])
        } else {
            "Bearer ***".to_string()
        }
    } else if value.len() > 4 {
        format!("***{}", &value[value.len() - 4..])
    } else {
        "***".to_string()
    }
}

/// Recursively redact every sensitive-keyed value in a JSON structure.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if is_sensitive_key(key) {
                    let masked = match val {
                        Value::String(s) => Value::String(mask_credential(s)),
                        Value::Object(_) | Value::Array(_) => redact_value(val),
                        _ => Value::String("***".to_string()),
                    };
                    out.insert(key.clone(), masked);
                } else {
                    out.insert(key.clone(), redact_value(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}
