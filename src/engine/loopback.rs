//! In-process peer connection engine
//!
//! Endpoints created by one [`LoopbackEngine`] (or by clones of it) pair
//! through a shared hub. The SDP an endpoint produces names its hub id;
//! applying that SDP on another endpoint links the two. Once both sides
//! hold a local and a remote description and have applied at least one
//! trickled candidate, the hub reports `Connected` on both and starts
//! forwarding the publisher's track frames to the subscriber.
//!
//! ```text
//!   conn A ── offer "endpoint=1" ──────────────► conn B
//!   conn A ◄────────────── answer "endpoint=2" ── conn B
//!   conn A ◄─ candidates ─► conn B
//!        └────── hub links 1 ↔ 2, Connected on both ──────┘
//! ```
//!
//! Closing an endpoint unregisters it and reports `Disconnected` to its
//! linked peer; terminal failure detection is left to the layers above,
//! as it is with real ICE.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::config::IceServer;
use crate::signal::{IceCandidate, SdpType, SessionDescription};

use super::events::{ConnectionState, EngineEvent};
use super::media::{LocalTrack, MediaKind, RemoteTrack, FRAME_CHANNEL_CAPACITY};
use super::{EngineError, MediaEngine, PeerConnection, ENGINE_EVENT_CAPACITY};

type EventBatch = Vec<(mpsc::Sender<EngineEvent>, EngineEvent)>;

/// Outbound track registered on an endpoint
struct TrackBinding {
    id: String,
    kind: MediaKind,
    frames: broadcast::Sender<Bytes>,
}

struct Endpoint {
    events_tx: mpsc::Sender<EngineEvent>,
    local_desc: Option<SessionDescription>,
    remote_desc: Option<SessionDescription>,
    peer: Option<u64>,
    candidates_received: u32,
    candidate_seq: u32,
    tracks: Vec<TrackBinding>,
    connected: bool,
}

impl Endpoint {
    fn new(events_tx: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            events_tx,
            local_desc: None,
            remote_desc: None,
            peer: None,
            candidates_received: 0,
            candidate_seq: 0,
            tracks: Vec::new(),
            connected: false,
        }
    }

    fn ready(&self, expected_peer: u64) -> bool {
        self.local_desc.is_some()
            && self.remote_desc.is_some()
            && self.peer == Some(expected_peer)
            && self.candidates_received > 0
    }
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<u64, Endpoint>,
    next_id: u64,
}

struct Hub {
    state: Mutex<HubState>,
}

/// Deterministic in-process [`MediaEngine`]
///
/// Clones share the hub, so connections created by any clone can pair
/// with each other. Tests and demos run every participant against one
/// engine value.
#[derive(Clone)]
pub struct LoopbackEngine {
    hub: Arc<Hub>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Hub {
                state: Mutex::new(HubState::default()),
            }),
        }
    }

    /// Number of live endpoints registered with the hub
    pub async fn endpoint_count(&self) -> usize {
        self.hub.state.lock().await.endpoints.len()
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MediaEngine for LoopbackEngine {
    async fn create_connection(
        &self,
        _ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::Receiver<EngineEvent>), EngineError> {
        let (events_tx, events_rx) = mpsc::channel(ENGINE_EVENT_CAPACITY);

        let id = {
            let mut state = self.hub.state.lock().await;
            state.next_id += 1;
            let id = state.next_id;
            state.endpoints.insert(id, Endpoint::new(events_tx));
            id
        };
        tracing::debug!(endpoint = id, "loopback endpoint created");

        let conn = LoopbackConnection {
            hub: Arc::clone(&self.hub),
            id,
        };
        Ok((Arc::new(conn), events_rx))
    }
}

/// One endpoint of the loopback hub
pub struct LoopbackConnection {
    hub: Arc<Hub>,
    id: u64,
}

impl LoopbackConnection {
    fn sdp(&self, kind: SdpType) -> String {
        format!(
            "v=0\r\no=loopback endpoint={} 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=kind:{kind}\r\n",
            self.id
        )
    }
}

/// Extract the producing endpoint id from loopback SDP
fn parse_endpoint(sdp: &str) -> Option<u64> {
    let rest = sdp.split("endpoint=").nth(1)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

async fn deliver(events: EventBatch) {
    for (tx, event) in events {
        let _ = tx.send(event).await;
    }
}

fn spawn_track_forwarder(mut src: broadcast::Receiver<Bytes>, dst: mpsc::Sender<Bytes>) {
    tokio::spawn(async move {
        loop {
            match src.recv().await {
                Ok(frame) => {
                    if dst.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::trace!(skipped, "remote track forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Build the `Track` events one side receives for the other side's
/// bindings and spawn the frame forwarders behind them.
fn track_events(
    to: &mpsc::Sender<EngineEvent>,
    from_tracks: &[TrackBinding],
    events: &mut EventBatch,
) {
    for binding in from_tracks {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        spawn_track_forwarder(binding.frames.subscribe(), tx);
        events.push((
            to.clone(),
            EngineEvent::Track(RemoteTrack {
                id: binding.id.clone(),
                kind: binding.kind,
                frames: rx,
            }),
        ));
    }
}

/// If both linked endpoints are ready and not yet connected, mark them
/// connected and emit the `Connected` and `Track` events for each side.
fn try_establish(state: &mut HubState, a: u64, b: u64) -> EventBatch {
    let mut events = EventBatch::new();
    match (state.endpoints.get(&a), state.endpoints.get(&b)) {
        (Some(ea), Some(eb)) if ea.ready(b) && eb.ready(a) && !ea.connected && !eb.connected => {
            events.push((
                ea.events_tx.clone(),
                EngineEvent::ConnectionState(ConnectionState::Connected),
            ));
            events.push((
                eb.events_tx.clone(),
                EngineEvent::ConnectionState(ConnectionState::Connected),
            ));
            track_events(&ea.events_tx, &eb.tracks, &mut events);
            track_events(&eb.events_tx, &ea.tracks, &mut events);
        }
        _ => return Vec::new(),
    }
    if let Some(ea) = state.endpoints.get_mut(&a) {
        ea.connected = true;
    }
    if let Some(eb) = state.endpoints.get_mut(&b) {
        eb.connected = true;
    }
    tracing::debug!(a, b, "loopback endpoints connected");
    events
}

#[async_trait::async_trait]
impl PeerConnection for LoopbackConnection {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let state = self.hub.state.lock().await;
        if !state.endpoints.contains_key(&self.id) {
            return Err(EngineError::ConnectionClosed);
        }
        Ok(SessionDescription::offer(self.sdp(SdpType::Offer)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let state = self.hub.state.lock().await;
        let endpoint = state
            .endpoints
            .get(&self.id)
            .ok_or(EngineError::ConnectionClosed)?;
        if endpoint.remote_desc.is_none() {
            return Err(EngineError::InvalidDescription(
                "cannot answer without a remote offer".into(),
            ));
        }
        Ok(SessionDescription::answer(self.sdp(SdpType::Answer)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let events = {
            let mut state = self.hub.state.lock().await;
            let endpoint = state
                .endpoints
                .get_mut(&self.id)
                .ok_or(EngineError::ConnectionClosed)?;
            endpoint.local_desc = Some(desc);

            // Setting a local description starts candidate gathering.
            endpoint.candidate_seq += 1;
            let candidate = IceCandidate::new(format!(
                "candidate:{}{} 1 udp 2122260223 127.0.0.1 {} typ host",
                self.id,
                endpoint.candidate_seq,
                50_000 + endpoint.candidate_seq,
            ));
            vec![(
                endpoint.events_tx.clone(),
                EngineEvent::IceCandidate(candidate),
            )]
        };
        deliver(events).await;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let peer_id = parse_endpoint(&desc.sdp).ok_or_else(|| {
            EngineError::InvalidDescription(format!(
                "no endpoint marker in sdp ({} bytes)",
                desc.sdp.len()
            ))
        })?;

        let mut state = self.hub.state.lock().await;
        if !state.endpoints.contains_key(&peer_id) {
            return Err(EngineError::InvalidDescription(format!(
                "unknown endpoint {peer_id}"
            )));
        }
        let endpoint = state
            .endpoints
            .get_mut(&self.id)
            .ok_or(EngineError::ConnectionClosed)?;
        endpoint.remote_desc = Some(desc);
        endpoint.peer = Some(peer_id);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        if !candidate.candidate.starts_with("candidate:") {
            return Err(EngineError::InvalidCandidate(candidate.candidate));
        }

        let events = {
            let mut state = self.hub.state.lock().await;
            let endpoint = state
                .endpoints
                .get_mut(&self.id)
                .ok_or(EngineError::ConnectionClosed)?;
            if endpoint.remote_desc.is_none() {
                return Err(EngineError::InvalidCandidate(
                    "no remote description to apply candidate against".into(),
                ));
            }
            endpoint.candidates_received += 1;
            let peer = endpoint.peer;
            match peer {
                Some(peer) => try_establish(&mut state, self.id, peer),
                None => Vec::new(),
            }
        };
        deliver(events).await;
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), EngineError> {
        let mut state = self.hub.state.lock().await;
        let endpoint = state
            .endpoints
            .get_mut(&self.id)
            .ok_or(EngineError::ConnectionClosed)?;
        endpoint.tracks.push(TrackBinding {
            id: track.id().to_string(),
            kind: track.kind(),
            frames: track.frame_sender(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        let events = {
            let mut state = self.hub.state.lock().await;
            let Some(endpoint) = state.endpoints.remove(&self.id) else {
                return Ok(());
            };
            match endpoint.peer.and_then(|p| state.endpoints.get(&p)) {
                Some(peer) if endpoint.connected => vec![(
                    peer.events_tx.clone(),
                    EngineEvent::ConnectionState(ConnectionState::Disconnected),
                )],
                _ => Vec::new(),
            }
        };
        tracing::debug!(endpoint = self.id, "loopback endpoint closed");
        deliver(events).await;
        Ok(())
    }
}
