//! Inline image decoding: `data:image/...;base64,<payload>` → raw bytes.
//!
//! Everything up to the first comma is the media-type header and is not
//! interpreted; the remainder is standard base64. Line breaks that some
//! clients insert every 76 characters are stripped before decoding.

use crate::error::WorkerError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// Prefix that marks an inline image reference.
pub const DATA_URI_PREFIX: &str = "data:image";

/// Decode the base64 payload of an inline image reference.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, WorkerError> {
    let (_header, payload) = uri
        .split_once(',')
        .ok_or_else(|| WorkerError::Decode("data URI has no ',' before the payload".into()))?;

    let cleaned: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Err(WorkerError::Decode("data URI payload is empty".into()));
    }

    let bytes = STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| WorkerError::Decode(e.to_string()))?;
    debug!("Decoded inline image → {} bytes", bytes.len());
    Ok(bytes)
}
