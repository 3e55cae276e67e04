//! Display capture seam
//!
//! Acquiring a capture surface is the one operation that blocks on user
//! interaction (the system picker). Implementations must stay cancellable:
//! a dismissed picker yields [`CaptureError::Denied`] and nothing else
//! happens; no session is created, nothing needs tearing down.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::media::{CaptureStream, EndedTrigger, LocalTrack};

/// Reasons a capture request produced no stream
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The user dismissed the picker or the platform refused
    #[error("screen capture denied")]
    Denied,

    /// No capturable display or window exists
    #[error("no capture source available")]
    NoSource,

    /// Platform backend failure
    #[error("capture backend error: {0}")]
    Backend(String),
}

/// Source of screen-capture streams
#[async_trait]
pub trait DisplayCapture: Send + Sync {
    /// Request a screen/window capture surface from the platform
    async fn capture_display(&self) -> Result<CaptureStream, CaptureError>;
}

/// Deterministic capture source for tests and demos
///
/// Grants every request with a single synthetic video track, or denies
/// every request when built with [`denying`](Self::denying). Issued
/// streams can be ended from the outside to exercise the platform-stop
/// path.
pub struct StaticCapture {
    deny: bool,
    issued: Mutex<Vec<(String, EndedTrigger)>>,
}

impl StaticCapture {
    /// A source that grants every capture request
    pub fn new() -> Self {
        Self {
            deny: false,
            issued: Mutex::new(Vec::new()),
        }
    }

    /// A source that denies every capture request
    pub fn denying() -> Self {
        Self {
            deny: true,
            issued: Mutex::new(Vec::new()),
        }
    }

    /// End one issued stream at the platform level
    pub async fn end_stream(&self, stream_id: &str) {
        let issued = self.issued.lock().await;
        for (id, trigger) in issued.iter() {
            if id == stream_id {
                trigger.end();
            }
        }
    }

    /// End every stream this source has issued
    pub async fn end_all(&self) {
        let issued = self.issued.lock().await;
        for (_, trigger) in issued.iter() {
            trigger.end();
        }
    }

    /// Number of streams issued so far
    pub async fn issued_count(&self) -> usize {
        self.issued.lock().await.len()
    }
}

impl Default for StaticCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DisplayCapture for StaticCapture {
    async fn capture_display(&self) -> Result<CaptureStream, CaptureError> {
        if self.deny {
            return Err(CaptureError::Denied);
        }

        let id = format!("display-{}", Uuid::new_v4());
        let stream = CaptureStream::new(id.clone(), vec![LocalTrack::video()]);
        self.issued
            .lock()
            .await
            .push((id, stream.ended_trigger()));
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_granting_source_issues_video_stream() {
        let capture = StaticCapture::new();
        let stream = capture.capture_display().await.unwrap();

        assert_eq!(stream.tracks().len(), 1);
        assert_eq!(capture.issued_count().await, 1);
    }

    #[tokio::test]
    async fn test_denying_source_returns_denied() {
        let capture = StaticCapture::denying();
        assert!(matches!(
            capture.capture_display().await,
            Err(CaptureError::Denied)
        ));
        assert_eq!(capture.issued_count().await, 0);
    }

    #[tokio::test]
    async fn test_end_all_fires_issued_streams() {
        let capture = StaticCapture::new();
        let stream = capture.capture_display().await.unwrap();
        let mut ended = stream.ended();

        capture.end_all().await;
        ended.changed().await.unwrap();
        assert!(*ended.borrow());
    }
}
