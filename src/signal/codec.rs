//! Envelope encode/decode with validation
//!
//! Decoding is two-phase: the routing fields and the `type` tag are
//! checked first so an unknown or malformed envelope is rejected with a
//! precise error before any payload parsing happens. Callers log decode
//! failures and drop the frame; a bad envelope never mutates share state.

use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

use super::envelope::SignalEnvelope;

/// Every `type` tag the protocol defines
pub const SIGNAL_TYPES: [&str; 5] = [
    "offer",
    "answer",
    "ice-candidate",
    "screen-share-start",
    "screen-share-stop",
];

/// Reasons an envelope failed to encode or decode
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame is not valid JSON, or a payload did not match its tag's shape
    #[error("invalid signal json: {0}")]
    Json(#[from] serde_json::Error),

    /// `type` tag is not one of [`SIGNAL_TYPES`]
    #[error("unknown signal type `{0}`")]
    UnknownType(String),

    /// A required routing field is missing or empty
    #[error("empty required field `{0}`")]
    EmptyField(&'static str),
}

/// Routing fields only; payload is ignored at this phase
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    share_id: String,
}

/// Serialize an envelope to a wire frame
pub fn encode(envelope: &SignalEnvelope) -> Result<Bytes, DecodeError> {
    let frame = serde_json::to_vec(envelope)?;
    Ok(Bytes::from(frame))
}

/// Parse and validate a wire frame
///
/// Validates that `type` is a known tag and that `from`, `session_id` and
/// `share_id` are non-empty before the payload itself is parsed.
pub fn decode(frame: &[u8]) -> Result<SignalEnvelope, DecodeError> {
    let raw: RawEnvelope = serde_json::from_slice(frame)?;

    if !SIGNAL_TYPES.contains(&raw.kind.as_str()) {
        return Err(DecodeError::UnknownType(raw.kind));
    }
    if raw.from.is_empty() {
        return Err(DecodeError::EmptyField("from"));
    }
    if raw.session_id.is_empty() {
        return Err(DecodeError::EmptyField("session_id"));
    }
    if raw.share_id.is_empty() {
        return Err(DecodeError::EmptyField("share_id"));
    }

    let envelope: SignalEnvelope = serde_json::from_slice(frame)?;
    Ok(envelope)
}
