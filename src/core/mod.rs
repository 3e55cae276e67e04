//! Share core
//!
//! Ties the crate together: one [`ShareCore`] owns the signaling
//! dispatch loop over the transport, the registry of per-share
//! sessions, the media engine seam, and teardown.
//!
//! # Architecture
//!
//! ```text
//!                transport frames (broadcast, with echo)
//!                               │
//!                               ▼
//!                      ┌─────────────────┐
//!                      │  dispatch loop  │  decode, drop own echo,
//!                      │                 │  check session id
//!                      └────────┬────────┘
//!            offer / answer / candidate / start / stop
//!                               │
//!                               ▼
//!              ShareRegistry ── share_id ──► ShareSession
//!                               │                 │
//!                               │           PeerConnection
//!                               ▼                 │
//!                      engine event pump ◄────────┘
//!                  candidates out, connection state,
//!                  remote tracks ──► stream sink
//! ```
//!
//! Every signaling path runs through the session's lock; stream sinks
//! are invoked only after the lock is released.

pub mod events;
mod publish;
mod reaper;
mod subscribe;

pub use events::{ShareAnnouncement, ShareEvent, ShareHandle, StopReason};

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::CoreConfig;
use crate::engine::{ConnectionState, DisplayCapture, EngineEvent, LocalTrack, MediaEngine};
use crate::registry::ShareRegistry;
use crate::session::{NegotiationState, ShareRole, ShareSession, ShareStats};
use crate::signal::{
    decode, encode, IceCandidate, SessionDescription, ShareStart, SignalEnvelope, SignalPayload,
};
use crate::transport::SignalTransport;

/// Multiplexes any number of screen shares over one signaling
/// transport
///
/// Cloning is cheap; clones drive the same core.
#[derive(Clone)]
pub struct ShareCore {
    inner: Arc<CoreInner>,
}

pub(crate) struct CoreInner {
    config: CoreConfig,
    registry: ShareRegistry,
    transport: Arc<dyn SignalTransport>,
    engine: Arc<dyn MediaEngine>,
    capture: Arc<dyn DisplayCapture>,
    announce_tx: broadcast::Sender<ShareAnnouncement>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShareCore {
    /// Build a core and start its dispatch and sweep loops
    pub async fn new(
        config: CoreConfig,
        transport: Arc<dyn SignalTransport>,
        engine: Arc<dyn MediaEngine>,
        capture: Arc<dyn DisplayCapture>,
    ) -> Self {
        let (announce_tx, _) = broadcast::channel(config.announce_capacity);
        let inner = Arc::new(CoreInner {
            config,
            registry: ShareRegistry::new(),
            transport,
            engine,
            capture,
            announce_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let frames = inner.transport.subscribe().await;
        let dispatcher = tokio::spawn(dispatch_loop(Arc::clone(&inner), frames));
        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&inner)));
        inner.tasks.lock().await.extend([dispatcher, sweeper]);

        tracing::info!(
            participant_id = %inner.config.participant_id,
            session_id = %inner.config.session_id,
            "share core started"
        );
        Self { inner }
    }

    /// Subscribe to share start/stop announcements from the session
    pub fn announcements(&self) -> broadcast::Receiver<ShareAnnouncement> {
        self.inner.announce_tx.subscribe()
    }

    /// Ids of every share this core currently tracks
    pub async fn share_ids(&self) -> Vec<String> {
        self.inner.registry.share_ids().await
    }

    /// Stats snapshot for one share
    pub async fn stats(&self, share_id: &str) -> Option<ShareStats> {
        self.inner.registry.stats(share_id).await
    }

    pub fn is_transport_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    pub fn participant_id(&self) -> &str {
        &self.inner.config.participant_id
    }

    pub fn session_id(&self) -> &str {
        &self.inner.config.session_id
    }

    /// Tear down every share and stop the background loops
    ///
    /// Sends no stop announcements; peers observe the connections
    /// closing instead.
    pub async fn shutdown(&self) {
        tracing::info!("share core shutting down");
        for share_id in self.inner.registry.share_ids().await {
            self.inner.teardown(&share_id, StopReason::Local).await;
        }
        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

/// Read frames off the transport until it closes
async fn dispatch_loop(inner: Arc<CoreInner>, mut frames: mpsc::Receiver<Bytes>) {
    while let Some(frame) = frames.recv().await {
        let envelope = match decode(&frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(%err, len = frame.len(), "dropping undecodable signal");
                continue;
            }
        };
        dispatch(&inner, envelope).await;
    }
    tracing::debug!("signal dispatch loop ended");
}

async fn dispatch(inner: &Arc<CoreInner>, envelope: SignalEnvelope) {
    // The broadcast transport echoes our own sends back to us.
    if envelope.from == inner.config.participant_id {
        return;
    }
    if envelope.session_id != inner.config.session_id {
        tracing::debug!(
            session_id = %envelope.session_id,
            kind = envelope.payload.type_name(),
            "signal for another session dropped"
        );
        return;
    }

    let share_id = envelope.share_id;
    let from = envelope.from;
    tracing::trace!(share_id = %share_id, from = %from, kind = envelope.payload.type_name(), "signal received");

    match envelope.payload {
        SignalPayload::Offer(offer) => handle_offer(inner, &from, &share_id, offer).await,
        SignalPayload::Answer(answer) => handle_answer(inner, &share_id, answer).await,
        SignalPayload::IceCandidate(candidate) => {
            handle_candidate(inner, &share_id, candidate).await
        }
        SignalPayload::ScreenShareStart(start) => {
            handle_share_start(inner, &from, &share_id, start).await
        }
        SignalPayload::ScreenShareStop(_) => handle_share_stop(inner, &from, &share_id).await,
    }
}

/// Route a remote offer to its session, creating an answering
/// subscriber session when the share is unseen.
async fn handle_offer(
    inner: &Arc<CoreInner>,
    from: &str,
    share_id: &str,
    offer: SessionDescription,
) {
    let entry = match inner.registry.get(share_id).await {
        Some(entry) => entry,
        None => {
            // Unseen share: answer it so a publisher's offer never
            // goes unanswered, even before anyone joins locally.
            let (conn, events) =
                match inner.engine.create_connection(&inner.config.ice_servers).await {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(share_id, %err, "connection for incoming offer failed");
                        return;
                    }
                };
            let (mut session, events_rx) =
                ShareSession::new(share_id, ShareRole::Subscriber, inner.config.event_capacity);
            session.set_events_rx(events_rx);
            session.attach_connection(Arc::clone(&conn));

            let (entry, created) = inner.registry.get_or_create(session).await;
            if created {
                spawn_engine_pump(Arc::clone(inner), share_id.to_string(), events);
            } else {
                // Lost a race with local setup for the same share.
                let _ = conn.close().await;
            }
            entry
        }
    };

    let failure = {
        let mut session = entry.lock().await;
        match session.state() {
            NegotiationState::Idle => apply_offer_and_answer(inner, &mut session, offer).await,
            NegotiationState::Offering => {
                // Both sides offered at once. The lexicographically
                // smaller participant id yields and answers; the other
                // keeps its offer and ignores this one.
                if inner.config.participant_id.as_str() < from {
                    tracing::info!(share_id, from, "offer collision, yielding");
                    yield_to_remote_offer(inner, &mut session, share_id, offer).await
                } else {
                    tracing::debug!(share_id, from, "offer collision, keeping local offer");
                    None
                }
            }
            state => {
                tracing::debug!(share_id, %state, "offer ignored in state");
                None
            }
        }
    };
    if let Some(message) = failure {
        fail_share(inner, share_id, &entry, message).await;
    }
}

/// Rebuild the connection and answer the remote offer instead of
/// waiting for an answer to ours. Buffered candidates are kept; they
/// drain once the remote description is applied.
async fn yield_to_remote_offer(
    inner: &Arc<CoreInner>,
    session: &mut ShareSession,
    share_id: &str,
    offer: SessionDescription,
) -> Option<String> {
    if let Some(old) = session.take_connection() {
        let _ = old.close().await;
    }
    session.clear_remote_description();

    let (conn, events) = match inner.engine.create_connection(&inner.config.ice_servers).await {
        Ok(pair) => pair,
        Err(err) => return Some(format!("connection rebuild failed: {err}")),
    };

    // A yielding publisher carries its capture tracks over to the
    // replacement connection.
    let tracks: Vec<LocalTrack> = session
        .local_stream()
        .map(|stream| stream.tracks().to_vec())
        .unwrap_or_default();
    for track in &tracks {
        if let Err(err) = conn.add_track(track).await {
            return Some(format!("track re-attach failed: {err}"));
        }
    }

    session.attach_connection(Arc::clone(&conn));
    spawn_engine_pump(Arc::clone(inner), share_id.to_string(), events);
    apply_offer_and_answer(inner, session, offer).await
}

/// Apply a remote offer and send back an answer. The caller holds the
/// session lock; the session has a connection attached. Returns a
/// failure message if any engine step rejects.
async fn apply_offer_and_answer(
    inner: &Arc<CoreInner>,
    session: &mut ShareSession,
    offer: SessionDescription,
) -> Option<String> {
    let Some(conn) = session.connection() else {
        return Some("offer with no connection".to_string());
    };

    if let Err(err) = conn.set_remote_description(offer).await {
        return Some(format!("remote offer rejected: {err}"));
    }
    session.mark_remote_description();

    let answer = match conn.create_answer().await {
        Ok(answer) => answer,
        Err(err) => return Some(format!("answer creation failed: {err}")),
    };
    session.set_state(NegotiationState::Answering);

    // The answer goes out before the local description is applied so
    // our trickled candidates can never beat it onto the wire.
    send_signal(inner, session.share_id(), SignalPayload::Answer(answer.clone())).await;
    if let Err(err) = conn.set_local_description(answer).await {
        return Some(format!("local answer rejected: {err}"));
    }

    for candidate in session.take_pending_candidates() {
        if let Err(err) = conn.add_ice_candidate(candidate).await {
            return Some(format!("queued candidate rejected: {err}"));
        }
    }
    None
}

async fn handle_answer(inner: &Arc<CoreInner>, share_id: &str, answer: SessionDescription) {
    let Some(entry) = inner.registry.get(share_id).await else {
        tracing::debug!(share_id, "answer for unknown share dropped");
        return;
    };

    let failure = {
        let mut session = entry.lock().await;
        if !session.state().accepts_answer() {
            tracing::debug!(share_id, state = %session.state(), "answer ignored in state");
            return;
        }
        let Some(conn) = session.connection() else {
            tracing::debug!(share_id, "answer with no connection dropped");
            return;
        };

        match conn.set_remote_description(answer).await {
            Ok(()) => {
                session.mark_remote_description();
                let mut failure = None;
                for candidate in session.take_pending_candidates() {
                    if let Err(err) = conn.add_ice_candidate(candidate).await {
                        failure = Some(format!("queued candidate rejected: {err}"));
                        break;
                    }
                }
                failure
            }
            Err(err) => Some(format!("remote answer rejected: {err}")),
        }
    };
    if let Some(message) = failure {
        fail_share(inner, share_id, &entry, message).await;
    }
}

async fn handle_candidate(inner: &Arc<CoreInner>, share_id: &str, candidate: IceCandidate) {
    let Some(entry) = inner.registry.get(share_id).await else {
        tracing::debug!(share_id, "candidate for unknown share dropped");
        return;
    };

    let failure = {
        let mut session = entry.lock().await;
        if session.state().is_terminal() {
            return;
        }
        if !session.has_remote_description() {
            session.buffer_candidate(candidate);
            return;
        }
        let Some(conn) = session.connection() else {
            session.buffer_candidate(candidate);
            return;
        };
        match conn.add_ice_candidate(candidate).await {
            Ok(()) => None,
            Err(err) => Some(format!("candidate rejected: {err}")),
        }
    };
    if let Some(message) = failure {
        fail_share(inner, share_id, &entry, message).await;
    }
}

async fn handle_share_start(inner: &Arc<CoreInner>, from: &str, share_id: &str, start: ShareStart) {
    tracing::info!(share_id, from, title = ?start.title, "screen share announced");
    let _ = inner.announce_tx.send(ShareAnnouncement::Started {
        share_id: share_id.to_string(),
        from: from.to_string(),
        title: start.title,
    });
}

async fn handle_share_stop(inner: &Arc<CoreInner>, from: &str, share_id: &str) {
    tracing::info!(share_id, from, "screen share stop announced");
    let _ = inner.announce_tx.send(ShareAnnouncement::Stopped {
        share_id: share_id.to_string(),
        from: from.to_string(),
    });

    if let Some(entry) = inner.registry.get(share_id).await {
        let role = entry.lock().await.role();
        if role == ShareRole::Subscriber {
            inner.teardown(share_id, StopReason::Remote).await;
        } else {
            tracing::warn!(share_id, from, "remote stop for a share this side publishes");
        }
    }
}

/// Encode and broadcast one protocol step. Send problems are logged,
/// not retried; the negotiation timeout catches anything lost.
pub(crate) async fn send_signal(inner: &CoreInner, share_id: &str, payload: SignalPayload) {
    let kind = payload.type_name();
    let envelope = SignalEnvelope::broadcast(
        payload,
        inner.config.participant_id.clone(),
        inner.config.session_id.clone(),
        share_id,
    );
    let frame = match encode(&envelope) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(share_id, kind, %err, "signal encode failed");
            return;
        }
    };
    if let Err(err) = inner.transport.send(frame).await {
        tracing::warn!(share_id, kind, %err, "signal send failed");
    }
}

/// Mark the share failed, notify its handle, then tear it down
pub(crate) async fn fail_share(
    inner: &Arc<CoreInner>,
    share_id: &str,
    entry: &Arc<Mutex<ShareSession>>,
    message: String,
) {
    tracing::warn!(share_id, %message, "share failed");
    {
        let mut session = entry.lock().await;
        if session.state().is_terminal() {
            return;
        }
        session.set_state(NegotiationState::Failed);
        session.emit(ShareEvent::Failed(message));
    }
    inner.teardown(share_id, StopReason::Failed).await;
}

/// Forward engine events for one share until its connection goes away
pub(crate) fn spawn_engine_pump(
    inner: Arc<CoreInner>,
    share_id: String,
    mut events: mpsc::Receiver<EngineEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::IceCandidate(candidate) => {
                    if !inner.registry.contains(&share_id).await {
                        continue;
                    }
                    send_signal(&inner, &share_id, SignalPayload::IceCandidate(candidate)).await;
                }
                EngineEvent::ConnectionState(state) => {
                    handle_connection_state(&inner, &share_id, state).await;
                }
                EngineEvent::Track(track) => {
                    let Some(entry) = inner.registry.get(&share_id).await else {
                        continue;
                    };
                    let delivery = entry.lock().await.accept_remote_track(track);
                    if let Some((sink, stream)) = delivery {
                        sink(stream);
                    }
                }
            }
        }
        tracing::trace!(share_id = %share_id, "engine event pump ended");
    });
}

async fn handle_connection_state(inner: &Arc<CoreInner>, share_id: &str, state: ConnectionState) {
    match state {
        ConnectionState::Connected => {
            let Some(entry) = inner.registry.get(share_id).await else {
                return;
            };
            let mut session = entry.lock().await;
            if session.state().is_negotiating() {
                session.set_state(NegotiationState::Connected);
                session.clear_pending_candidates();
                session.emit(ShareEvent::Connected);
                tracing::info!(share_id, "share connected");
            }
        }
        ConnectionState::Failed => {
            let Some(entry) = inner.registry.get(share_id).await else {
                return;
            };
            fail_share(inner, share_id, &entry, "connection failed".to_string()).await;
        }
        ConnectionState::Disconnected => {
            tracing::warn!(share_id, "connection disconnected");
        }
        other => {
            tracing::debug!(share_id, state = %other, "connection state change");
        }
    }
}

/// Fail and reap negotiations that outlive the configured timeout
async fn sweep_loop(inner: Arc<CoreInner>) {
    let mut ticker = tokio::time::interval(inner.config.sweep_interval);
    loop {
        ticker.tick().await;
        for share_id in inner.registry.expired(inner.config.negotiation_timeout).await {
            let Some(entry) = inner.registry.get(&share_id).await else {
                continue;
            };
            {
                let mut session = entry.lock().await;
                // The sweep snapshot may be stale by the time the lock
                // is held.
                if !session.state().is_negotiating() {
                    continue;
                }
                tracing::warn!(share_id = %share_id, state = %session.state(), "negotiation timed out");
                session.set_state(NegotiationState::Failed);
                session.emit(ShareEvent::Failed("negotiation timed out".to_string()));
            }
            inner.teardown(&share_id, StopReason::TimedOut).await;
        }
    }
}
