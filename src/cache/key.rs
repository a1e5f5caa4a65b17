//! Cache key and content hash generation using SHA-256

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Generate a deterministic cache key from a table name and query parameters.
///
/// Parameters are sorted so the key does not depend on their order.
pub fn cache_key(table: &str, params: &[(&str, &str)]) -> String {
    let mut hasher = Sha256::new();

    hasher.update(table.as_bytes());
    hasher.update(b"|");

    let mut sorted_params: Vec<_> = params.iter().collect();
    sorted_params.sort_by_key(|(k, _)| *k);

    for (k, v) in sorted_params {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b"&");
    }

    format!("{:x}", hasher.finalize())
}

/// Hash a value by its structure rather than its field order.
///
/// The value is converted to a `serde_json::Value` first, whose object maps
/// are key-sorted, so two structurally equal values always hash the same.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let canonical = serde_json::to_value(value)?;
    let bytes = serde_json::to_vec(&canonical)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
