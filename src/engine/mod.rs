//! Media engine seam
//!
//! The negotiation core drives peer connections through the traits here
//! instead of a concrete RTC stack:
//!
//! ```text
//!   ShareCore ──► MediaEngine::create_connection ──► dyn PeerConnection
//!                                   │                     │
//!                                   └── mpsc::Receiver<EngineEvent>
//!                                       (candidates, state, tracks)
//! ```
//!
//! Two implementations ship with the crate: [`LoopbackEngine`] pairs
//! endpoints in-process and backs the test suite and demos, and, behind
//! the `webrtc` feature, [`rtc::RtcEngine`] maps the seam onto the
//! `webrtc` crate for real deployments.

pub mod capture;
pub mod events;
pub mod loopback;
pub mod media;
#[cfg(feature = "webrtc")]
pub mod rtc;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::IceServer;
use crate::signal::{IceCandidate, SessionDescription};

pub use capture::{CaptureError, DisplayCapture, StaticCapture};
pub use events::{ConnectionState, EngineEvent};
pub use loopback::LoopbackEngine;
pub use media::{
    CaptureStream, EndedTrigger, LocalTrack, MediaKind, RemoteStream, RemoteTrack,
};

/// Errors from the underlying connection layer
#[derive(Debug, Error)]
pub enum EngineError {
    /// A session description could not be parsed or applied
    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    /// An ICE candidate could not be parsed or applied
    #[error("invalid ice candidate: {0}")]
    InvalidCandidate(String),

    /// The connection has already been closed
    #[error("peer connection closed")]
    ConnectionClosed,

    /// Backend-specific failure
    #[error("engine backend error: {0}")]
    Backend(String),
}

/// Events delivered per connection before the pump applies backpressure
pub const ENGINE_EVENT_CAPACITY: usize = 64;

/// One peer connection, exclusively owned by its share session
///
/// The handle is opaque to callers outside the crate; all mutation goes
/// through the owning session's serialized entry point.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    /// Bind a local track so its frames flow to the remote peer
    async fn add_track(&self, track: &LocalTrack) -> Result<(), EngineError>;

    /// Release ICE/DTLS resources; idempotent
    async fn close(&self) -> Result<(), EngineError>;
}

/// Factory for peer connections
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a connection configured with the given ICE servers
    ///
    /// The returned receiver carries every asynchronous event the
    /// connection produces; it closes when the connection does.
    async fn create_connection(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::Receiver<EngineEvent>), EngineError>;
}
