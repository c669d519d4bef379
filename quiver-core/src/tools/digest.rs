//! Content digests for call inputs and outputs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Which digests to compute for a tool's calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestOptions {
    /// Digest the validated input
    #[serde(default = "default_true")]
    pub input: bool,

    /// Digest the handler output
    #[serde(default)]
    pub output: bool,

    /// Truncate hex digests to this many characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl Default for DigestOptions {
    fn default() -> Self {
        Self {
            input: true,
            output: false,
            length: None,
        }
    }
}

impl DigestOptions {
    /// Disable all digests
    pub fn none() -> Self {
        Self {
            input: false,
            output: false,
            length: None,
        }
    }

    /// Digest both input and output
    pub fn all() -> Self {
        Self {
            input: true,
            output: true,
            length: None,
        }
    }

    /// Truncate digests
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }
}

/// Render a value as JSON with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Lowercase hex SHA-256 of the canonical JSON rendering
pub fn digest_value(value: &Value, length: Option<usize>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    if let Some(length) = length {
        hex.truncate(length);
    }
    hex
}
