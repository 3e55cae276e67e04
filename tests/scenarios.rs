//! End-to-end negotiation scenarios
//!
//! Two share cores on a shared in-process bus and loopback engine, driven
//! through the public API only:
//!
//! - publish → join → connected, with the remote stream reaching the sink
//! - teardown fan-out: local stop, capture end, remote stop, shutdown
//! - signal hygiene: echo suppression, unknown-share drops, candidate
//!   buffering, offer collisions, malformed remote descriptions
//!
//! The loopback engine completes ICE after one candidate per side, so
//! every wait below is bounded; `WAIT` is headroom, not a tuning knob.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use peershare::signal::{decode, encode, ShareStart};
use peershare::{
    CaptureError, ConnectionState, CoreConfig, DisplayCapture, EngineEvent, Error, IceCandidate,
    LoopbackEngine, MediaEngine, MediaKind, MemoryTransport, NegotiationState, RegistryError,
    RemoteStream, SessionDescription, ShareAnnouncement, ShareCore, ShareEvent, ShareHandle,
    ShareRole, SignalEnvelope, SignalPayload, SignalTransport, StaticCapture, StopReason,
};

const SESSION: &str = "session-1";
const WAIT: Duration = Duration::from_secs(5);

// ── Shared helpers ───────────────────────────────────────────────────

async fn build_core(
    config: CoreConfig,
    capture: &Arc<StaticCapture>,
    transport: &Arc<MemoryTransport>,
    engine: &Arc<LoopbackEngine>,
) -> ShareCore {
    ShareCore::new(
        config,
        Arc::clone(transport) as Arc<dyn SignalTransport>,
        Arc::clone(engine) as Arc<dyn MediaEngine>,
        Arc::clone(capture) as Arc<dyn DisplayCapture>,
    )
    .await
}

async fn peer(
    name: &str,
    transport: &Arc<MemoryTransport>,
    engine: &Arc<LoopbackEngine>,
) -> (ShareCore, Arc<StaticCapture>) {
    let capture = Arc::new(StaticCapture::new());
    let core = build_core(CoreConfig::new(name, SESSION), &capture, transport, engine).await;
    (core, capture)
}

async fn next_event(handle: &mut ShareHandle) -> ShareEvent {
    timeout(WAIT, handle.recv())
        .await
        .expect("timed out waiting for a share event")
        .expect("share event channel closed")
}

/// Broadcast a forged envelope as if another participant had sent it.
async fn inject(transport: &MemoryTransport, payload: SignalPayload, from: &str, share_id: &str) {
    let envelope = SignalEnvelope::broadcast(payload, from, SESSION, share_id);
    let frame = encode(&envelope).expect("encode forged envelope");
    transport.send(frame).await.expect("send forged envelope");
}

/// Broadcast a marker announcement and wait until `core` republishes it.
///
/// The dispatcher consumes frames in order, so once the marker comes back
/// every frame sent before it has been fully processed.
async fn settle(core: &ShareCore, transport: &MemoryTransport) {
    let mut announcements = core.announcements();
    inject(
        transport,
        SignalPayload::ScreenShareStart(ShareStart { title: None }),
        "zz-marker",
        "marker",
    )
    .await;
    loop {
        let announcement = timeout(WAIT, announcements.recv())
            .await
            .expect("timed out waiting for the marker announcement")
            .expect("announcement channel closed");
        if matches!(&announcement, ShareAnnouncement::Started { share_id, .. } if share_id == "marker")
        {
            return;
        }
    }
}

/// Scan the raw wire for the next envelope of `kind` sent by `from`.
async fn next_payload_from(
    wire: &mut mpsc::Receiver<Bytes>,
    from: &str,
    kind: &str,
) -> SignalPayload {
    loop {
        let frame = timeout(WAIT, wire.recv())
            .await
            .expect("timed out scanning the wire")
            .expect("wire subscription closed");
        let envelope = decode(&frame).expect("undecodable frame on the wire");
        if envelope.from == from && envelope.payload.type_name() == kind {
            return envelope.payload;
        }
    }
}

async fn next_engine_candidate(events: &mut mpsc::Receiver<EngineEvent>) -> IceCandidate {
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for an engine event")
            .expect("engine event channel closed");
        if let EngineEvent::IceCandidate(candidate) = event {
            return candidate;
        }
    }
}

// ── Publish and join ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn publish_and_join_converge() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (alice, _) = peer("alice", &transport, &engine).await;
    let (bob, _) = peer("bob", &transport, &engine).await;

    let mut published = alice
        .start_publish_as("s1", Some("algebra review".into()))
        .await
        .expect("publish failed");

    let (stream_tx, mut stream_rx) = mpsc::channel::<RemoteStream>(4);
    let mut joined = bob
        .join("s1", move |stream: RemoteStream| {
            let _ = stream_tx.try_send(stream);
        })
        .await
        .expect("join failed");

    assert_eq!(next_event(&mut published).await, ShareEvent::Connected);
    assert_eq!(next_event(&mut joined).await, ShareEvent::Connected);

    let stream = timeout(WAIT, stream_rx.recv())
        .await
        .expect("sink was never invoked")
        .expect("sink channel closed");
    assert!(stream.track_count() >= 1);
    // One delivery per share, no matter how many tracks arrive.
    assert!(timeout(Duration::from_millis(100), stream_rx.recv())
        .await
        .is_err());

    let stats = alice.stats("s1").await.expect("publisher stats missing");
    assert_eq!(stats.role, ShareRole::Publisher);
    assert_eq!(stats.state, NegotiationState::Connected);
    assert_eq!(stats.pending_candidates, 0);

    let stats = bob.stats("s1").await.expect("subscriber stats missing");
    assert_eq!(stats.role, ShareRole::Subscriber);
    assert_eq!(stats.state, NegotiationState::Connected);
    assert!(stats.has_remote_stream);
}

#[tokio::test(flavor = "multi_thread")]
async fn denied_capture_leaves_no_state() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let capture = Arc::new(StaticCapture::denying());
    let core = build_core(CoreConfig::new("alice", SESSION), &capture, &transport, &engine).await;

    let err = core
        .start_publish(None)
        .await
        .expect_err("publish should fail");
    assert!(matches!(err, Error::Capture(CaptureError::Denied)));
    assert!(core.share_ids().await.is_empty());
    assert_eq!(engine.endpoint_count().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_share_id_rejected() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (alice, capture) = peer("alice", &transport, &engine).await;

    let _published = alice
        .start_publish_as("s1", None)
        .await
        .expect("first publish failed");
    let err = alice
        .start_publish_as("s1", None)
        .await
        .expect_err("second publish should fail");
    assert!(matches!(
        err,
        Error::Registry(RegistryError::DuplicateShare { .. })
    ));
    // The id check fires before the capture prompt would.
    assert_eq!(capture.issued_count().await, 1);
    assert_eq!(alice.share_ids().await, vec!["s1".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn join_own_share_rejected() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (alice, _) = peer("alice", &transport, &engine).await;

    let _published = alice
        .start_publish_as("s1", None)
        .await
        .expect("publish failed");
    let err = alice
        .join("s1", |_stream: RemoteStream| {})
        .await
        .expect_err("joining an own share should fail");
    assert!(matches!(
        err,
        Error::Registry(RegistryError::DuplicateShare { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn double_join_rejected() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (bob, _) = peer("bob", &transport, &engine).await;

    let _joined = bob
        .join("s9", |_stream: RemoteStream| {})
        .await
        .expect("first join failed");
    let err = bob
        .join("s9", |_stream: RemoteStream| {})
        .await
        .expect_err("second join should fail");
    assert!(matches!(
        err,
        Error::Registry(RegistryError::DuplicateShare { .. })
    ));

    let stats = bob.stats("s9").await.expect("stats missing");
    assert_eq!(stats.state, NegotiationState::Offering);
}

#[tokio::test(flavor = "multi_thread")]
async fn join_without_publisher_offers_then_leave() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (bob, _) = peer("bob", &transport, &engine).await;

    let mut joined = bob
        .join("lonely", |_stream: RemoteStream| {})
        .await
        .expect("join failed");

    let stats = bob.stats("lonely").await.expect("stats missing");
    assert_eq!(stats.role, ShareRole::Subscriber);
    assert_eq!(stats.state, NegotiationState::Offering);

    bob.leave("lonely").await;
    assert_eq!(
        next_event(&mut joined).await,
        ShareEvent::Stopped(StopReason::Local)
    );
    assert!(bob.share_ids().await.is_empty());
}

// ── Teardown fan-out ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn capture_end_stops_publisher_and_subscriber() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (alice, alice_capture) = peer("alice", &transport, &engine).await;
    let (bob, _) = peer("bob", &transport, &engine).await;

    let mut published = alice
        .start_publish_as("s1", None)
        .await
        .expect("publish failed");
    let mut joined = bob
        .join("s1", |_stream: RemoteStream| {})
        .await
        .expect("join failed");
    assert_eq!(next_event(&mut published).await, ShareEvent::Connected);
    assert_eq!(next_event(&mut joined).await, ShareEvent::Connected);

    // The platform side kills the capture, as if the user hit the
    // browser's own stop-sharing button.
    alice_capture.end_all().await;

    assert_eq!(
        next_event(&mut published).await,
        ShareEvent::Stopped(StopReason::CaptureEnded)
    );
    assert_eq!(
        next_event(&mut joined).await,
        ShareEvent::Stopped(StopReason::Remote)
    );
    assert!(alice.share_ids().await.is_empty());
    assert!(bob.share_ids().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn publisher_stop_reaches_subscriber() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (alice, _) = peer("alice", &transport, &engine).await;
    let (bob, _) = peer("bob", &transport, &engine).await;

    let mut published = alice
        .start_publish_as("s1", None)
        .await
        .expect("publish failed");
    let mut joined = bob
        .join("s1", |_stream: RemoteStream| {})
        .await
        .expect("join failed");
    assert_eq!(next_event(&mut published).await, ShareEvent::Connected);
    assert_eq!(next_event(&mut joined).await, ShareEvent::Connected);

    alice.stop_publish(&published).await;

    assert_eq!(
        next_event(&mut published).await,
        ShareEvent::Stopped(StopReason::Local)
    );
    assert_eq!(
        next_event(&mut joined).await,
        ShareEvent::Stopped(StopReason::Remote)
    );
    assert!(alice.share_ids().await.is_empty());
    assert!(bob.share_ids().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn second_stop_and_leave_are_noops() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (alice, _) = peer("alice", &transport, &engine).await;

    let mut published = alice
        .start_publish_as("s1", None)
        .await
        .expect("publish failed");

    alice.stop_publish(&published).await;
    assert_eq!(
        next_event(&mut published).await,
        ShareEvent::Stopped(StopReason::Local)
    );
    assert!(alice.stats("s1").await.is_none());

    // The share is gone; stopping it again or leaving it, or leaving a
    // share that never existed, does nothing.
    alice.stop_publish(&published).await;
    alice.leave("s1").await;
    alice.leave("never-started").await;

    assert!(published.try_recv().is_none());
    assert!(alice.stats("s1").await.is_none());
    assert!(alice.share_ids().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_tears_down_every_share() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (alice, _) = peer("alice", &transport, &engine).await;

    let mut first = alice
        .start_publish_as("s1", None)
        .await
        .expect("publish failed");
    let mut second = alice
        .start_publish_as("s2", None)
        .await
        .expect("publish failed");

    alice.shutdown().await;

    assert_eq!(
        next_event(&mut first).await,
        ShareEvent::Stopped(StopReason::Local)
    );
    assert_eq!(
        next_event(&mut second).await,
        ShareEvent::Stopped(StopReason::Local)
    );
    assert!(alice.share_ids().await.is_empty());
    // Nothing left for a second shutdown to do.
    alice.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn negotiation_timeout_fails_the_share() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let capture = Arc::new(StaticCapture::new());
    let config = CoreConfig::new("alice", SESSION)
        .negotiation_timeout(Duration::from_millis(150))
        .sweep_interval(Duration::from_millis(50));
    let alice = build_core(config, &capture, &transport, &engine).await;

    // Nobody answers, so the sweeper reaps the share.
    let mut published = alice
        .start_publish_as("s1", None)
        .await
        .expect("publish failed");

    match next_event(&mut published).await {
        ShareEvent::Failed(message) => {
            assert!(message.contains("timed out"), "unexpected message: {message}")
        }
        other => panic!("expected a timeout failure, got {other:?}"),
    }
    assert_eq!(
        next_event(&mut published).await,
        ShareEvent::Stopped(StopReason::TimedOut)
    );
    assert!(alice.share_ids().await.is_empty());
}

// ── Signal hygiene ───────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn unknown_share_signals_create_no_state() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (alice, _) = peer("alice", &transport, &engine).await;

    inject(
        &transport,
        SignalPayload::Answer(SessionDescription::answer("v=0 bogus")),
        "bob",
        "phantom",
    )
    .await;
    inject(
        &transport,
        SignalPayload::IceCandidate(IceCandidate::new(
            "candidate:bogus 1 udp 1 127.0.0.1 9 typ host",
        )),
        "bob",
        "phantom",
    )
    .await;
    settle(&alice, &transport).await;

    assert!(alice.share_ids().await.is_empty());
    assert_eq!(engine.endpoint_count().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn own_frames_are_suppressed() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (alice, _) = peer("alice", &transport, &engine).await;

    let mut published = alice
        .start_publish_as("s1", None)
        .await
        .expect("publish failed");

    // The bus echoes our own frames back. This forged answer carries
    // garbage SDP and would fail the share if it were processed.
    inject(
        &transport,
        SignalPayload::Answer(SessionDescription::answer("not sdp")),
        "alice",
        "s1",
    )
    .await;
    settle(&alice, &transport).await;

    let stats = alice.stats("s1").await.expect("stats missing");
    assert_eq!(stats.state, NegotiationState::Offering);
    assert!(published.try_recv().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn candidates_buffer_until_the_answer() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let mut wire = transport.subscribe().await;
    let (alice, _) = peer("alice", &transport, &engine).await;

    let mut published = alice
        .start_publish_as("s1", None)
        .await
        .expect("publish failed");

    // An answering peer, driven by hand on the shared engine.
    let (bob_conn, mut bob_events) = engine
        .create_connection(&[])
        .await
        .expect("manual connection failed");
    let SignalPayload::Offer(offer) = next_payload_from(&mut wire, "alice", "offer").await else {
        unreachable!()
    };
    bob_conn
        .set_remote_description(offer)
        .await
        .expect("offer rejected");
    let answer = bob_conn.create_answer().await.expect("manual answer failed");
    bob_conn
        .set_local_description(answer.clone())
        .await
        .expect("manual local description failed");
    let bob_candidate = next_engine_candidate(&mut bob_events).await;
    let SignalPayload::IceCandidate(alice_candidate) =
        next_payload_from(&mut wire, "alice", "ice-candidate").await
    else {
        unreachable!()
    };
    bob_conn
        .add_ice_candidate(alice_candidate)
        .await
        .expect("candidate rejected");

    // Bob's candidate trickles in before his answer; with no remote
    // description yet it sits buffered.
    inject(&transport, SignalPayload::IceCandidate(bob_candidate), "bob", "s1").await;
    settle(&alice, &transport).await;

    let stats = alice.stats("s1").await.expect("stats missing");
    assert_eq!(stats.state, NegotiationState::Offering);
    assert_eq!(stats.pending_candidates, 1);

    // The answer lands and the buffer drains; that candidate is the only
    // one alice ever receives for this share.
    inject(&transport, SignalPayload::Answer(answer), "bob", "s1").await;
    assert_eq!(next_event(&mut published).await, ShareEvent::Connected);

    let stats = alice.stats("s1").await.expect("stats missing");
    assert_eq!(stats.state, NegotiationState::Connected);
    assert_eq!(stats.pending_candidates, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_answer_fails_the_share() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (alice, _) = peer("alice", &transport, &engine).await;

    let mut joined = alice
        .join("ghost", |_stream: RemoteStream| {})
        .await
        .expect("join failed");

    inject(
        &transport,
        SignalPayload::Answer(SessionDescription::answer("not sdp at all")),
        "mallory",
        "ghost",
    )
    .await;

    match next_event(&mut joined).await {
        ShareEvent::Failed(message) => {
            assert!(message.contains("rejected"), "unexpected message: {message}")
        }
        other => panic!("expected a failure event, got {other:?}"),
    }
    assert_eq!(
        next_event(&mut joined).await,
        ShareEvent::Stopped(StopReason::Failed)
    );
    assert!(alice.share_ids().await.is_empty());
}

// ── Offer collisions ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn offer_collision_smaller_id_yields() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let mut wire = transport.subscribe().await;
    let (alice, _) = peer("alice", &transport, &engine).await;

    let mut published = alice
        .start_publish_as("s1", None)
        .await
        .expect("publish failed");

    // A competing offer from "bob", driven by hand on the shared engine.
    let (bob_conn, mut bob_events) = engine
        .create_connection(&[])
        .await
        .expect("manual connection failed");
    let bob_offer = bob_conn.create_offer().await.expect("manual offer failed");
    inject(&transport, SignalPayload::Offer(bob_offer.clone()), "bob", "s1").await;
    bob_conn
        .set_local_description(bob_offer)
        .await
        .expect("manual local description failed");
    let bob_candidate = next_engine_candidate(&mut bob_events).await;
    inject(&transport, SignalPayload::IceCandidate(bob_candidate), "bob", "s1").await;

    // "alice" < "bob": alice drops her own offer and answers instead.
    let SignalPayload::Answer(answer) = next_payload_from(&mut wire, "alice", "answer").await
    else {
        unreachable!()
    };
    bob_conn
        .set_remote_description(answer)
        .await
        .expect("answer rejected");
    let SignalPayload::IceCandidate(alice_candidate) =
        next_payload_from(&mut wire, "alice", "ice-candidate").await
    else {
        unreachable!()
    };
    bob_conn
        .add_ice_candidate(alice_candidate)
        .await
        .expect("candidate rejected");

    assert_eq!(next_event(&mut published).await, ShareEvent::Connected);

    // Bob's endpoint connects and receives alice's re-attached track.
    let mut saw_connected = false;
    let mut saw_video = false;
    while !(saw_connected && saw_video) {
        match timeout(WAIT, bob_events.recv())
            .await
            .expect("timed out waiting for manual endpoint events")
            .expect("manual endpoint events closed")
        {
            EngineEvent::ConnectionState(ConnectionState::Connected) => saw_connected = true,
            EngineEvent::Track(track) => {
                assert_eq!(track.kind, MediaKind::Video);
                saw_video = true;
            }
            _ => {}
        }
    }

    let stats = alice.stats("s1").await.expect("stats missing");
    assert_eq!(stats.role, ShareRole::Publisher);
    assert_eq!(stats.state, NegotiationState::Connected);
}

#[tokio::test(flavor = "multi_thread")]
async fn offer_collision_larger_id_stands() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (alice, _) = peer("alice", &transport, &engine).await;

    let mut published = alice
        .start_publish_as("s1", None)
        .await
        .expect("publish failed");

    // "aa" < "alice", so alice keeps her own offer standing. The forged
    // offer carries garbage SDP and would fail the share if applied.
    inject(
        &transport,
        SignalPayload::Offer(SessionDescription::offer("not sdp")),
        "aa",
        "s1",
    )
    .await;
    settle(&alice, &transport).await;

    let stats = alice.stats("s1").await.expect("stats missing");
    assert_eq!(stats.state, NegotiationState::Offering);
    assert!(published.try_recv().is_none());
}

// ── Announcements ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn announcements_reach_other_participants() {
    let transport = Arc::new(MemoryTransport::default());
    let engine = Arc::new(LoopbackEngine::new());
    let (alice, _) = peer("alice", &transport, &engine).await;
    let (bob, _) = peer("bob", &transport, &engine).await;
    let mut announcements = bob.announcements();

    let published = alice
        .start_publish_as("s1", Some("quadratics".into()))
        .await
        .expect("publish failed");

    let started = timeout(WAIT, announcements.recv())
        .await
        .expect("timed out waiting for the start announcement")
        .expect("announcement channel closed");
    assert_eq!(
        started,
        ShareAnnouncement::Started {
            share_id: "s1".into(),
            from: "alice".into(),
            title: Some("quadratics".into()),
        }
    );

    alice.stop_publish(&published).await;

    let stopped = timeout(WAIT, announcements.recv())
        .await
        .expect("timed out waiting for the stop announcement")
        .expect("announcement channel closed");
    assert_eq!(
        stopped,
        ShareAnnouncement::Stopped {
            share_id: "s1".into(),
            from: "alice".into(),
        }
    );
}
