//! Share lifecycle events, announcements, and handles

use std::fmt;

use tokio::sync::mpsc;

/// Why a share was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stopped by a call on this side
    Local,
    /// The remote publisher announced a stop
    Remote,
    /// The capture source ended, e.g. the platform's own stop control
    CaptureEnded,
    /// Negotiation or the media connection failed
    Failed,
    /// Negotiation sat in flight past the configured timeout
    TimedOut,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Local => "local",
            StopReason::Remote => "remote",
            StopReason::CaptureEnded => "capture-ended",
            StopReason::Failed => "failed",
            StopReason::TimedOut => "timed-out",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle event for one share, delivered through its handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareEvent {
    /// The media connection came up
    Connected,
    /// Something went wrong; a `Stopped` event follows
    Failed(String),
    /// The share was torn down
    Stopped(StopReason),
}

/// A share someone in the session started or stopped
///
/// Republished from the signaling channel so applications can keep a
/// roster of active shares without parsing envelopes themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareAnnouncement {
    Started {
        share_id: String,
        from: String,
        title: Option<String>,
    },
    Stopped {
        share_id: String,
        from: String,
    },
}

/// Caller-side handle to a share
///
/// Dropping the handle does not stop the share; it only drops the
/// event stream.
#[derive(Debug)]
pub struct ShareHandle {
    share_id: String,
    events: mpsc::Receiver<ShareEvent>,
}

impl ShareHandle {
    pub(crate) fn new(share_id: String, events: mpsc::Receiver<ShareEvent>) -> Self {
        Self { share_id, events }
    }

    pub fn share_id(&self) -> &str {
        &self.share_id
    }

    /// Next lifecycle event, `None` once the share is gone and the
    /// event stream is drained
    pub async fn recv(&mut self) -> Option<ShareEvent> {
        self.events.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<ShareEvent> {
        self.events.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(StopReason::CaptureEnded.to_string(), "capture-ended");
        assert_eq!(StopReason::TimedOut.to_string(), "timed-out");
    }

    #[tokio::test]
    async fn test_handle_drains_events() {
        let (tx, rx) = mpsc::channel(4);
        let mut handle = ShareHandle::new("s1".to_string(), rx);
        assert_eq!(handle.share_id(), "s1");

        tx.send(ShareEvent::Connected).await.unwrap();
        tx.send(ShareEvent::Stopped(StopReason::Local)).await.unwrap();
        drop(tx);

        assert_eq!(handle.recv().await, Some(ShareEvent::Connected));
        assert_eq!(
            handle.recv().await,
            Some(ShareEvent::Stopped(StopReason::Local))
        );
        assert_eq!(handle.recv().await, None);
    }

    #[test]
    fn test_handle_debug_shows_share_id() {
        let (_tx, rx) = mpsc::channel(4);
        let handle = ShareHandle::new("s1".to_string(), rx);
        assert!(format!("{handle:?}").contains("s1"));
    }

    #[test]
    fn test_recv_pending_until_event_arrives() {
        let (tx, rx) = mpsc::channel(4);
        let mut handle = ShareHandle::new("s1".to_string(), rx);

        let mut recv = task::spawn(handle.recv());
        assert_pending!(recv.poll());

        tx.try_send(ShareEvent::Connected).unwrap();
        assert!(recv.is_woken());
        assert_eq!(assert_ready!(recv.poll()), Some(ShareEvent::Connected));
    }
}
