//! Per-share session record
//!
//! One [`ShareSession`] exists for every share this participant takes
//! part in, whether it publishes the capture or subscribes to someone
//! else's. The record owns the peer connection handle, the negotiation
//! state, candidates that arrived before the remote description, and
//! the sink waiting for the remote stream.
//!
//! Sessions are shared behind `Arc<Mutex<_>>` by the registry. Stream
//! sinks are never invoked while the session lock is held; the accept
//! methods hand the `(sink, stream)` pair back to the caller, which
//! runs it after unlocking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::core::ShareEvent;
use crate::engine::{CaptureStream, PeerConnection, RemoteStream, RemoteTrack};
use crate::signal::IceCandidate;

use super::state::NegotiationState;

/// Callback handed the remote stream once media arrives
pub type StreamSink = Arc<dyn Fn(RemoteStream) + Send + Sync>;

/// Which side of the share this participant is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareRole {
    /// Captures a display and offers it to the session
    Publisher,
    /// Receives someone else's capture
    Subscriber,
}

impl std::fmt::Display for ShareRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShareRole::Publisher => write!(f, "publisher"),
            ShareRole::Subscriber => write!(f, "subscriber"),
        }
    }
}

/// Point-in-time snapshot of a share's signaling state
#[derive(Debug, Clone)]
pub struct ShareStats {
    pub share_id: String,
    pub role: ShareRole,
    pub state: NegotiationState,
    pub pending_candidates: usize,
    pub has_remote_stream: bool,
    pub age: Duration,
}

/// Mutable state of one share
pub struct ShareSession {
    share_id: String,
    role: ShareRole,
    state: NegotiationState,
    connection: Option<Arc<dyn PeerConnection>>,
    local_stream: Option<CaptureStream>,
    remote_stream: Option<RemoteStream>,
    remote_delivered: bool,
    has_remote_description: bool,
    pending_candidates: Vec<IceCandidate>,
    sink: Option<StreamSink>,
    events_tx: mpsc::Sender<ShareEvent>,
    events_rx: Option<mpsc::Receiver<ShareEvent>>,
    created_at: Instant,
    state_changed_at: Instant,
}

impl ShareSession {
    /// Create a fresh session in `Idle`, returning the receiver its
    /// lifecycle events arrive on
    pub fn new(
        share_id: impl Into<String>,
        role: ShareRole,
        event_capacity: usize,
    ) -> (Self, mpsc::Receiver<ShareEvent>) {
        let (events_tx, events_rx) = mpsc::channel(event_capacity);
        let now = Instant::now();
        let session = Self {
            share_id: share_id.into(),
            role,
            state: NegotiationState::Idle,
            connection: None,
            local_stream: None,
            remote_stream: None,
            remote_delivered: false,
            has_remote_description: false,
            pending_candidates: Vec::new(),
            sink: None,
            events_tx,
            events_rx: None,
            created_at: now,
            state_changed_at: now,
        };
        (session, events_rx)
    }

    pub fn share_id(&self) -> &str {
        &self.share_id
    }

    pub fn role(&self) -> ShareRole {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Transition to `next`, remembering when the change happened
    pub fn set_state(&mut self, next: NegotiationState) {
        if self.state == next {
            return;
        }
        tracing::debug!(
            share_id = %self.share_id,
            from = %self.state,
            to = %next,
            "share state change"
        );
        self.state = next;
        self.state_changed_at = Instant::now();
    }

    /// Time spent in the current state
    pub fn elapsed_in_state(&self) -> Duration {
        self.state_changed_at.elapsed()
    }

    pub fn attach_connection(&mut self, connection: Arc<dyn PeerConnection>) {
        self.connection = Some(connection);
    }

    /// Clone of the live connection handle, if any
    pub fn connection(&self) -> Option<Arc<dyn PeerConnection>> {
        self.connection.clone()
    }

    pub fn take_connection(&mut self) -> Option<Arc<dyn PeerConnection>> {
        self.connection.take()
    }

    pub fn attach_local_stream(&mut self, stream: CaptureStream) {
        self.local_stream = Some(stream);
    }

    pub fn local_stream(&self) -> Option<&CaptureStream> {
        self.local_stream.as_ref()
    }

    pub fn take_local_stream(&mut self) -> Option<CaptureStream> {
        self.local_stream.take()
    }

    /// Remote description applied; queued candidates may flush now
    pub fn mark_remote_description(&mut self) {
        self.has_remote_description = true;
    }

    /// Forget the remote description, e.g. when the connection is
    /// rebuilt after an offer collision
    pub fn clear_remote_description(&mut self) {
        self.has_remote_description = false;
    }

    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    /// Queue a candidate that arrived ahead of the remote description
    pub fn buffer_candidate(&mut self, candidate: IceCandidate) {
        self.pending_candidates.push(candidate);
    }

    /// Drain every queued candidate in arrival order
    pub fn take_pending_candidates(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.pending_candidates)
    }

    pub fn clear_pending_candidates(&mut self) {
        self.pending_candidates.clear();
    }

    pub fn set_sink(&mut self, sink: StreamSink) {
        self.sink = Some(sink);
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn clear_sink(&mut self) {
        self.sink = None;
    }

    /// Park the event receiver with the session until a handle claims
    /// it. Used when a session is created by the receive path and no
    /// caller is waiting yet.
    pub fn set_events_rx(&mut self, events_rx: mpsc::Receiver<ShareEvent>) {
        self.events_rx = Some(events_rx);
    }

    /// Claim the parked event receiver. Returns `None` once claimed.
    pub fn take_events_rx(&mut self) -> Option<mpsc::Receiver<ShareEvent>> {
        self.events_rx.take()
    }

    /// Push a lifecycle event to the handle without blocking
    pub fn emit(&self, event: ShareEvent) {
        if self.events_tx.try_send(event).is_err() {
            tracing::trace!(share_id = %self.share_id, "share event dropped");
        }
    }

    /// Fold an incoming track into the remote stream. The first track
    /// creates the stream; later tracks join it. Returns the sink to
    /// invoke (after unlocking) the single time the stream becomes
    /// deliverable.
    pub fn accept_remote_track(&mut self, track: RemoteTrack) -> Option<(StreamSink, RemoteStream)> {
        let stream = match &self.remote_stream {
            Some(stream) => stream.clone(),
            None => {
                let stream = RemoteStream::new(format!("remote-{}", self.share_id));
                self.remote_stream = Some(stream.clone());
                stream
            }
        };
        stream.push_track(track);

        if self.remote_delivered {
            return None;
        }
        let sink = self.sink.as_ref()?.clone();
        self.remote_delivered = true;
        Some((sink, stream))
    }

    /// Deliverable `(sink, stream)` pair for a sink attached after
    /// tracks already arrived. Returns `None` once delivered.
    pub fn pending_stream_delivery(&mut self) -> Option<(StreamSink, RemoteStream)> {
        if self.remote_delivered {
            return None;
        }
        let stream = self.remote_stream.as_ref()?.clone();
        let sink = self.sink.as_ref()?.clone();
        self.remote_delivered = true;
        Some((sink, stream))
    }

    pub fn stats(&self) -> ShareStats {
        ShareStats {
            share_id: self.share_id.clone(),
            role: self.role,
            state: self.state,
            pending_candidates: self.pending_candidates.len(),
            has_remote_stream: self.remote_stream.is_some(),
            age: self.created_at.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MediaKind;
    use bytes::Bytes;

    fn remote_track(id: &str, kind: MediaKind) -> RemoteTrack {
        let (_tx, rx) = mpsc::channel::<Bytes>(4);
        RemoteTrack {
            id: id.to_string(),
            kind,
            frames: rx,
        }
    }

    #[test]
    fn test_new_session_starts_idle() {
        let (session, _events) = ShareSession::new("s1", ShareRole::Publisher, 8);
        assert_eq!(session.share_id(), "s1");
        assert_eq!(session.role(), ShareRole::Publisher);
        assert_eq!(session.state(), NegotiationState::Idle);
        assert!(!session.has_remote_description());
    }

    #[test]
    fn test_candidates_buffer_until_drained() {
        let (mut session, _events) = ShareSession::new("s1", ShareRole::Publisher, 8);
        session.buffer_candidate(IceCandidate::new("candidate:a"));
        session.buffer_candidate(IceCandidate::new("candidate:b"));
        assert_eq!(session.stats().pending_candidates, 2);

        let drained = session.take_pending_candidates();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].candidate, "candidate:a");
        assert_eq!(session.stats().pending_candidates, 0);
    }

    #[test]
    fn test_remote_tracks_coalesce_into_one_stream() {
        let (mut session, _events) = ShareSession::new("s1", ShareRole::Subscriber, 8);
        session.set_sink(Arc::new(|_stream| {}));

        let first = session.accept_remote_track(remote_track("t1", MediaKind::Video));
        let (_, stream) = first.expect("first track should deliver the stream");
        assert_eq!(stream.track_count(), 1);

        // Later tracks join the same stream without re-delivering it.
        assert!(session
            .accept_remote_track(remote_track("t2", MediaKind::Audio))
            .is_none());
        assert_eq!(stream.track_count(), 2);
    }

    #[test]
    fn test_stream_delivery_waits_for_sink() {
        let (mut session, _events) = ShareSession::new("s1", ShareRole::Subscriber, 8);

        assert!(session
            .accept_remote_track(remote_track("t1", MediaKind::Video))
            .is_none());
        assert!(session.pending_stream_delivery().is_none());

        session.set_sink(Arc::new(|_stream| {}));
        assert!(session.pending_stream_delivery().is_some());
        // Exactly once.
        assert!(session.pending_stream_delivery().is_none());
    }

    #[test]
    fn test_events_reach_receiver() {
        let (session, mut events) = ShareSession::new("s1", ShareRole::Publisher, 8);
        session.emit(ShareEvent::Connected);
        assert!(matches!(events.try_recv(), Ok(ShareEvent::Connected)));
    }

    #[test]
    fn test_parked_receiver_claimed_once() {
        let (mut session, events) = ShareSession::new("s1", ShareRole::Subscriber, 8);
        session.set_events_rx(events);

        let mut claimed = session.take_events_rx().expect("first claim");
        assert!(session.take_events_rx().is_none());

        session.emit(ShareEvent::Connected);
        assert!(matches!(claimed.try_recv(), Ok(ShareEvent::Connected)));
    }

    #[test]
    fn test_state_change_resets_timer() {
        let (mut session, _events) = ShareSession::new("s1", ShareRole::Publisher, 8);
        session.set_state(NegotiationState::Offering);
        assert_eq!(session.state(), NegotiationState::Offering);
        assert!(session.elapsed_in_state() < Duration::from_secs(1));
    }

    #[test]
    fn test_stats_snapshot() {
        let (mut session, _events) = ShareSession::new("s1", ShareRole::Publisher, 8);
        session.set_state(NegotiationState::Offering);
        session.buffer_candidate(IceCandidate::new("candidate:a"));

        let stats = session.stats();
        assert_eq!(stats.share_id, "s1");
        assert_eq!(stats.role, ShareRole::Publisher);
        assert_eq!(stats.state, NegotiationState::Offering);
        assert_eq!(stats.pending_candidates, 1);
        assert!(!stats.has_remote_stream);
    }
}
