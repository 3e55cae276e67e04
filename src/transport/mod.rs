//! Transport seam
//!
//! The core never owns a socket. The surrounding application supplies an
//! authenticated, session-scoped message channel through the
//! [`SignalTransport`] trait; the core takes a single subscription and
//! performs its own per-share demultiplexing on the frames it receives.
//!
//! Frames are opaque [`Bytes`]; the signal codec in [`crate::signal`]
//! owns their JSON shape.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::MemoryTransport;

/// Errors surfaced by a transport send
///
/// The core logs these and moves on; resending a stale offer or answer
/// blindly could desynchronize the remote state machine, so retry policy
/// belongs to the transport itself.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying channel is not connected
    #[error("transport disconnected")]
    Disconnected,

    /// The send failed for a transport-specific reason
    #[error("transport send failed: {0}")]
    Send(String),
}

/// Bidirectional broadcast channel shared by all participants of one
/// tutoring session
#[async_trait]
pub trait SignalTransport: Send + Sync {
    /// Fan one wire frame out to every participant of the session,
    /// including the sender
    async fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Open this participant's inbound frame stream
    ///
    /// The core calls this exactly once and routes everything itself.
    async fn subscribe(&self) -> mpsc::Receiver<Bytes>;

    /// Whether the channel is currently usable
    fn is_connected(&self) -> bool;
}
