use serde_json::Value;

use crate::error::{Error, Result};

/// Schema-free metadata attached to services, heartbeats, tasks and errors.
pub type Metadata = serde_json::Map<String, Value>;

pub const KEY_ERROR: &str = "error";
pub const KEY_DURATION_MS: &str = "duration_ms";
pub const KEY_SOURCE: &str = "source";

const REDACTED: &str = "***";
const SENSITIVE_KEYS: [&str; 4] = ["password", "token", "secret", "key"];

/// Reserved keys are written by the registry itself and must keep their type.
pub fn validate(metadata: &Metadata) -> Result<()> {
    for (key, value) in metadata {
        if key.trim().is_empty() {
            return Err(Error::Validation("metadata keys must not be empty".to_string()));
        }
        let ok = match key.as_str() {
            KEY_ERROR | KEY_SOURCE => value.is_string(),
            KEY_DURATION_MS => value.is_u64(),
            _ => true,
        };
        if !ok {
            return Err(Error::Validation(format!("reserved metadata key {} has unexpected value {}", key, value)));
        }
    }
    Ok(())
}

/// Key-wise last write wins, keys absent from `update` are kept.
pub fn merge(target: &mut Metadata, update: &Metadata) {
    for (key, value) in update {
        target.insert(key.clone(), value.clone());
    }
}

pub fn redact(metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .map(|(key, value)| {
            if is_sensitive(key) {
                (key.clone(), Value::String(REDACTED.to_string()))
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}

fn is_sensitive(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|k| lower == *k)
}
