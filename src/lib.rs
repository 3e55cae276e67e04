//! Real-time screen-share signaling for tutoring sessions
//!
//! This crate is the negotiation core behind a multi-party screen
//! share: it speaks an offer/answer/candidate protocol over a shared
//! broadcast transport, multiplexes any number of concurrent shares by
//! share id, and guarantees every share's resources are torn down
//! exactly once no matter how it ends.
//!
//! It deliberately owns no socket and no codec pipeline. The
//! surrounding application plugs in a [`SignalTransport`] (how frames
//! reach the other participants), a [`MediaEngine`] (how peer
//! connections are made), and a [`DisplayCapture`] (where local media
//! comes from); deterministic in-process implementations of all three
//! ship with the crate, and a WebRTC-backed engine is available behind
//! the `webrtc` feature.
//!
//! # Architecture
//!
//! ```text
//!   application            ShareCore                   seams
//!  ───────────────   ┌──────────────────────┐   ──────────────────
//!   start_publish ──►│ signal dispatch loop │◄── SignalTransport
//!   join / leave  ──►│ ShareRegistry        │
//!   stop_publish  ──►│   └─ ShareSession    │◄── MediaEngine
//!   announcements ◄──│ engine event pumps   │
//!   ShareHandle   ◄──│ reaper / timeouts    │◄── DisplayCapture
//!                    └──────────────────────┘
//! ```
//!
//! # Quick start
//!
//! Publish a capture and watch its lifecycle events:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use peershare::{
//!     CoreConfig, LoopbackEngine, MemoryTransport, ShareCore, ShareEvent, StaticCapture,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let core = ShareCore::new(
//!         CoreConfig::new("alice", "session-1"),
//!         Arc::new(MemoryTransport::default()),
//!         Arc::new(LoopbackEngine::new()),
//!         Arc::new(StaticCapture::new()),
//!     )
//!     .await;
//!
//!     let mut share = core
//!         .start_publish(Some("algebra review".into()))
//!         .await
//!         .expect("capture granted");
//!
//!     while let Some(event) = share.recv().await {
//!         println!("share event: {event:?}");
//!         if matches!(event, ShareEvent::Stopped(_)) {
//!             break;
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod registry;
pub mod session;
pub mod signal;
pub mod transport;

pub use config::{CoreConfig, IceServer};
pub use core::{ShareAnnouncement, ShareCore, ShareEvent, ShareHandle, StopReason};
pub use engine::{
    CaptureError, CaptureStream, ConnectionState, DisplayCapture, EngineError, EngineEvent,
    LocalTrack, LoopbackEngine, MediaEngine, MediaKind, PeerConnection, RemoteStream, RemoteTrack,
    StaticCapture,
};
pub use error::{Error, Result};
pub use registry::{RegistryError, ShareRegistry};
pub use session::{NegotiationState, ShareRole, ShareStats, StreamSink};
pub use signal::{
    DecodeError, IceCandidate, SdpType, SessionDescription, SignalEnvelope, SignalPayload,
};
pub use transport::{MemoryTransport, SignalTransport, TransportError};

#[cfg(feature = "webrtc")]
pub use engine::rtc::RtcEngine;
