//! Signal envelope and payload types
//!
//! These types serialize to the exact JSON the browser peers exchange:
//! SDP descriptions as `{"type": "offer", "sdp": "..."}` and ICE
//! candidates with their `sdpMid`/`sdpMLineIndex` casing preserved.

use serde::{Deserialize, Serialize};

/// The only recipient the protocol uses; fan-out is the transport's job.
pub const BROADCAST_TO: &str = "broadcast";

/// SDP description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
        }
    }
}

/// An SDP session description carried by an offer or answer envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Whether this description is an offer or an answer
    #[serde(rename = "type")]
    pub kind: SdpType,
    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate
///
/// Field names on the wire follow the browser's `RTCIceCandidateInit`
/// casing so either end can hand the object straight to its runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate-attribute line, e.g. `candidate:1 1 udp ...`
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description this candidate belongs to
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Create a candidate for the first (and only) media section
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }
}

/// Announcement that a participant started publishing a share
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareStart {
    /// Optional human-readable title for share pickers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Announcement that a share ended
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareStop {}

/// Typed payload of one signal envelope, tagged by the wire `type` field
///
/// The negotiation state machine only ever consumes the first three
/// variants; the announcements are handled by the dispatcher before
/// routing and never reach per-share state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    ScreenShareStart(ShareStart),
    ScreenShareStop(ShareStop),
}

impl SignalPayload {
    /// The wire name of this payload's `type` tag
    pub fn type_name(&self) -> &'static str {
        match self {
            SignalPayload::Offer(_) => "offer",
            SignalPayload::Answer(_) => "answer",
            SignalPayload::IceCandidate(_) => "ice-candidate",
            SignalPayload::ScreenShareStart(_) => "screen-share-start",
            SignalPayload::ScreenShareStop(_) => "screen-share-stop",
        }
    }
}

/// One relayed protocol message: a payload plus routing metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// `type` + `data` fields
    #[serde(flatten)]
    pub payload: SignalPayload,
    /// Sending participant id; used for self-origin suppression
    pub from: String,
    /// Always [`BROADCAST_TO`] in envelopes this crate emits
    pub to: String,
    /// Tutoring session the envelope is scoped to
    pub session_id: String,
    /// Share negotiation the envelope belongs to
    pub share_id: String,
}

impl SignalEnvelope {
    /// Build a broadcast envelope for one protocol step
    pub fn broadcast(
        payload: SignalPayload,
        from: impl Into<String>,
        session_id: impl Into<String>,
        share_id: impl Into<String>,
    ) -> Self {
        Self {
            payload,
            from: from.into(),
            to: BROADCAST_TO.to_string(),
            session_id: session_id.into(),
            share_id: share_id.into(),
        }
    }
}
