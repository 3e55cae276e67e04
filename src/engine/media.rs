//! Local and remote media stream handles
//!
//! The signaling core never inspects media payloads; frames are opaque
//! `Bytes` moved between engine endpoints. Local tracks are owned by the
//! publishing session through its [`CaptureStream`]; remote tracks are
//! observed, coalesced into a [`RemoteStream`], and handed to the
//! subscriber's sink exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

/// Frames buffered per track before slow consumers start skipping
pub const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Kind of media a track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// A locally captured track bound to outbound negotiations
///
/// The capture side pushes frames with [`write`](Self::write); engines
/// subscribe and forward them to the remote peer. Frames fan out through
/// a broadcast channel, so `Bytes` payloads are reference-counted rather
/// than copied per consumer.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    id: String,
    kind: MediaKind,
    frames: broadcast::Sender<Bytes>,
    stopped: Arc<AtomicBool>,
}

impl LocalTrack {
    /// Create a track with an explicit id
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Self {
            id: id.into(),
            kind,
            frames,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a video track with a generated id
    pub fn video() -> Self {
        Self::new(format!("video-{}", Uuid::new_v4()), MediaKind::Video)
    }

    /// Create an audio track with a generated id
    pub fn audio() -> Self {
        Self::new(format!("audio-{}", Uuid::new_v4()), MediaKind::Audio)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Push one frame to every subscribed engine
    ///
    /// Returns the number of consumers that received it; 0 after the
    /// track is stopped or when nothing is subscribed.
    pub fn write(&self, frame: Bytes) -> usize {
        if self.is_stopped() {
            return 0;
        }
        self.frames.send(frame).unwrap_or(0)
    }

    /// Subscribe to this track's frame feed
    pub fn subscribe_frames(&self) -> broadcast::Receiver<Bytes> {
        self.frames.subscribe()
    }

    pub(crate) fn frame_sender(&self) -> broadcast::Sender<Bytes> {
        self.frames.clone()
    }

    /// Stop producing; idempotent
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Fires the end-of-stream signal on a [`CaptureStream`] from outside the
/// owning session, the way the platform does when the user stops sharing
/// through the OS or browser chrome rather than the application UI.
///
/// Holds the sender weakly: once the stream itself has been torn down the
/// trigger goes inert instead of resurrecting a stop that already happened.
#[derive(Debug, Clone)]
pub struct EndedTrigger(Weak<watch::Sender<bool>>);

impl EndedTrigger {
    /// Mark the stream ended; idempotent, no-op after the stream is dropped
    pub fn end(&self) {
        if let Some(tx) = self.0.upgrade() {
            let _ = tx.send(true);
        }
    }
}

/// An owned screen-capture stream and its constituent tracks
#[derive(Debug)]
pub struct CaptureStream {
    id: String,
    tracks: Vec<LocalTrack>,
    ended_tx: Arc<watch::Sender<bool>>,
    ended_rx: watch::Receiver<bool>,
}

impl CaptureStream {
    /// Create a stream owning the given tracks
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        let (ended_tx, ended_rx) = watch::channel(false);
        Self {
            id: id.into(),
            tracks,
            ended_tx: Arc::new(ended_tx),
            ended_rx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Watch for the end-of-stream signal
    ///
    /// Flips to `true` when the platform ends the capture; the channel
    /// closes without firing when the stream is dropped by local teardown.
    pub fn ended(&self) -> watch::Receiver<bool> {
        self.ended_rx.clone()
    }

    /// Handle the platform side holds to end the stream later
    pub fn ended_trigger(&self) -> EndedTrigger {
        EndedTrigger(Arc::downgrade(&self.ended_tx))
    }

    /// Stop every track without touching the end-of-stream signal
    pub fn stop_tracks(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// One remote track received from a peer
#[derive(Debug)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: MediaKind,
    /// Inbound frame feed; closes when the remote side stops the track
    pub frames: mpsc::Receiver<Bytes>,
}

/// Externally-owned remote stream handed to the subscriber sink
///
/// Tracks received for the same share are coalesced here; the stream
/// handle is delivered once, and later track arrivals append without
/// re-invoking the sink. Cloned handles observe the same track set.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    inner: Arc<RemoteStreamInner>,
}

#[derive(Debug)]
struct RemoteStreamInner {
    id: String,
    tracks: StdMutex<Vec<RemoteTrack>>,
}

impl RemoteStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RemoteStreamInner {
                id: id.into(),
                tracks: StdMutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn track_count(&self) -> usize {
        self.lock_tracks().len()
    }

    /// Append a received track
    pub fn push_track(&self, track: RemoteTrack) {
        self.lock_tracks().push(track);
    }

    /// Take the next track out of the stream, if any
    pub fn take_track(&self) -> Option<RemoteTrack> {
        let mut tracks = self.lock_tracks();
        if tracks.is_empty() {
            None
        } else {
            Some(tracks.remove(0))
        }
    }

    /// Kinds of the tracks currently held
    pub fn track_kinds(&self) -> Vec<MediaKind> {
        self.lock_tracks().iter().map(|t| t.kind).collect()
    }

    fn lock_tracks(&self) -> MutexGuard<'_, Vec<RemoteTrack>> {
        self.inner.tracks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
