//! Events emitted by a peer connection
//!
//! Engines never call back into share state directly. Every event is a
//! channel send into the per-share pump task, which applies it through
//! the same serialized entry point that transport messages and local
//! actions use.

use crate::signal::IceCandidate;

use super::media::RemoteTrack;

/// Connection lifecycle states, mirroring the underlying RTC peer
/// connection's own reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    /// ICE/DTLS established; the only source of truth for a share
    /// reaching `Connected`
    Connected,
    /// Transient loss; may recover, never terminal on its own
    Disconnected,
    /// Terminal failure; triggers teardown
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// One asynchronous notification from the connection layer
#[derive(Debug)]
pub enum EngineEvent {
    /// A locally gathered ICE candidate ready to trickle to the peer
    IceCandidate(IceCandidate),
    /// The connection's own state changed
    ConnectionState(ConnectionState),
    /// A remote track arrived
    Track(RemoteTrack),
}
