//! Two share cores negotiating over an in-process bus
//!
//! Run with: cargo run --example two_peer
//!
//! A tutor core publishes a screen share and a student core joins it:
//!
//! - both cores share one `MemoryTransport`, which echoes every frame to
//!   every participant the way the production socket room does
//! - the `LoopbackEngine` pairs their endpoints in-process, so the
//!   offer/answer/candidate exchange completes without any network
//! - frames written to the tutor's capture track arrive on the student's
//!   remote track
//!
//! Set `RUST_LOG=peershare=debug` to watch the negotiation itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use peershare::{
    CaptureError, CaptureStream, CoreConfig, DisplayCapture, LocalTrack, LoopbackEngine,
    MediaEngine, MediaKind, MemoryTransport, RemoteStream, ShareCore, ShareEvent, SignalTransport,
    StaticCapture,
};

/// Capture source that keeps a writable clone of every track it issues,
/// standing in for a real screen grabber.
struct DemoCapture {
    issued: Mutex<Vec<LocalTrack>>,
}

impl DemoCapture {
    fn new() -> Self {
        Self {
            issued: Mutex::new(Vec::new()),
        }
    }

    async fn latest_track(&self) -> Option<LocalTrack> {
        self.issued.lock().await.last().cloned()
    }
}

#[async_trait]
impl DisplayCapture for DemoCapture {
    async fn capture_display(&self) -> Result<CaptureStream, CaptureError> {
        let track = LocalTrack::new("demo-video", MediaKind::Video);
        self.issued.lock().await.push(track.clone());
        Ok(CaptureStream::new("demo-display", vec![track]))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());

    let capture = Arc::new(DemoCapture::new());
    let tutor = ShareCore::new(
        CoreConfig::new("tutor", "session-demo"),
        Arc::clone(&transport) as Arc<dyn SignalTransport>,
        Arc::clone(&engine) as Arc<dyn MediaEngine>,
        Arc::clone(&capture) as Arc<dyn DisplayCapture>,
    )
    .await;
    let student = ShareCore::new(
        CoreConfig::new("student", "session-demo"),
        Arc::clone(&transport) as Arc<dyn SignalTransport>,
        Arc::clone(&engine) as Arc<dyn MediaEngine>,
        Arc::new(StaticCapture::new()) as Arc<dyn DisplayCapture>,
    )
    .await;

    // The student's sink hands remote streams to this channel.
    let (stream_tx, mut stream_rx) = mpsc::channel::<RemoteStream>(1);

    let mut published = tutor
        .start_publish(Some("factoring quadratics".into()))
        .await?;
    println!("tutor publishing share {}", published.share_id());

    let mut joined = student
        .join(published.share_id(), move |stream: RemoteStream| {
            let _ = stream_tx.try_send(stream);
        })
        .await?;

    while let Some(event) = published.recv().await {
        println!("tutor:   {event:?}");
        if event == ShareEvent::Connected {
            break;
        }
    }
    while let Some(event) = joined.recv().await {
        println!("student: {event:?}");
        if event == ShareEvent::Connected {
            break;
        }
    }

    let remote = stream_rx.recv().await.ok_or("remote stream never arrived")?;
    println!(
        "student received stream {} ({} track(s))",
        remote.id(),
        remote.track_count()
    );
    let mut track = remote.take_track().ok_or("remote stream had no track")?;

    // Push a few captured frames through and watch them arrive.
    let local = capture.latest_track().await.ok_or("no issued track")?;
    let reader = tokio::spawn(async move {
        for _ in 0..5 {
            match track.frames.recv().await {
                Some(frame) => println!("student: received a {}-byte frame", frame.len()),
                None => break,
            }
        }
    });
    for i in 0u8..5 {
        local.write(Bytes::from(vec![i; 1200]));
        tokio::time::sleep(Duration::from_millis(33)).await;
    }
    reader.await?;

    // The tutor ends the share; the student observes a remote stop.
    tutor.stop_publish(&published).await;
    while let Some(event) = joined.recv().await {
        println!("student: {event:?}");
        if matches!(event, ShareEvent::Stopped(_)) {
            break;
        }
    }

    tutor.shutdown().await;
    student.shutdown().await;
    Ok(())
}
