//! Canonical JSON serialization.
//!
//! Every signature and request fingerprint in the protocol is computed over
//! this form. Objects are rendered with their keys in sorted order (the
//! default `serde_json::Map` is backed by a BTreeMap), byte fields serialize
//! as base64 strings and 64-bit counters as decimal strings, so two
//! participants serializing the same value always produce identical bytes.
//! Any divergence here breaks every signature in the system.

use serde::Serialize;
use serde_json::Value;

/// Convert a value into its canonical `serde_json::Value` representation.
pub fn canonical_value<T: Serialize>(value: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(value)
}

/// Render a value as canonical JSON text.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = canonical_value(value)?;
    serde_json::to_string(&value)
}
