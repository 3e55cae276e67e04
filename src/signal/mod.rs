//! Signaling wire format
//!
//! Defines the envelope exchanged over the transport and the codec that
//! validates it. One envelope corresponds to exactly one protocol step in
//! one share negotiation:
//!
//! ```text
//! { "type":       "offer" | "answer" | "ice-candidate"
//!                 | "screen-share-start" | "screen-share-stop",
//!   "data":       <SDP description | ICE candidate | announcement>,
//!   "from":       <participant id>,
//!   "to":         "broadcast",
//!   "session_id": <tutoring session id>,
//!   "share_id":   <share instance id> }
//! ```
//!
//! `to` is always `"broadcast"`: the transport fans every envelope out to
//! all participants of `session_id`, and receivers discard their own
//! echoes by comparing `from` against their local identity.

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, DecodeError};
pub use envelope::{
    IceCandidate, SdpType, SessionDescription, ShareStart, ShareStop, SignalEnvelope,
    SignalPayload, BROADCAST_TO,
};
