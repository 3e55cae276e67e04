//! `webrtc` crate backing for the engine seam
//!
//! Maps [`MediaEngine`]/[`PeerConnection`] onto a real
//! `RTCPeerConnection`. Local tracks are bridged into
//! `TrackLocalStaticSample` writers; inbound RTP is unwrapped and
//! forwarded as the same opaque frame payloads the loopback engine
//! delivers, so the negotiation core cannot tell the two apart.
//!
//! Compiled only with the `webrtc` feature.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as RtcMediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::config::IceServer;
use crate::signal::{IceCandidate, SdpType, SessionDescription};

use super::media::{LocalTrack, MediaKind, RemoteTrack, FRAME_CHANNEL_CAPACITY};
use super::{
    ConnectionState, EngineError, EngineEvent, MediaEngine, PeerConnection, ENGINE_EVENT_CAPACITY,
};

/// Nominal frame spacing for bridged sample tracks
const SAMPLE_DURATION: Duration = Duration::from_millis(33);

/// Engine producing real ICE/DTLS peer connections
#[derive(Debug, Clone, Copy, Default)]
pub struct RtcEngine;

impl RtcEngine {
    pub fn new() -> Self {
        Self
    }
}

fn backend(err: webrtc::Error) -> EngineError {
    EngineError::Backend(err.to_string())
}

fn rtc_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let result = match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    result.map_err(|err| EngineError::InvalidDescription(err.to_string()))
}

#[async_trait]
impl MediaEngine for RtcEngine {
    async fn create_connection(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::Receiver<EngineEvent>), EngineError> {
        let mut media = RtcMediaEngine::default();
        media.register_default_codecs().map_err(backend)?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media).map_err(backend)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: rtc_ice_servers(ice_servers),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await.map_err(backend)?);

        let (events_tx, events_rx) = mpsc::channel(ENGINE_EVENT_CAPACITY);

        let tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx
                            .send(EngineEvent::IceCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            }))
                            .await;
                    }
                    Err(err) => tracing::warn!(%err, "candidate serialization failed"),
                }
            })
        }));

        let tx = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                let mapped = match state {
                    RTCPeerConnectionState::New => ConnectionState::New,
                    RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                    RTCPeerConnectionState::Connected => ConnectionState::Connected,
                    RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                    RTCPeerConnectionState::Failed => ConnectionState::Failed,
                    RTCPeerConnectionState::Closed => ConnectionState::Closed,
                    RTCPeerConnectionState::Unspecified => return,
                };
                let _ = tx.send(EngineEvent::ConnectionState(mapped)).await;
            })
        }));

        let tx = events_tx;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    _ => MediaKind::Video,
                };
                let id = track.id();
                let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

                // Unwrap RTP into opaque payload frames until the track
                // ends or the consumer goes away.
                tokio::spawn(async move {
                    loop {
                        match track.read_rtp().await {
                            Ok((packet, _)) => {
                                if frames_tx.send(packet.payload).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::debug!(%err, "remote track read ended");
                                break;
                            }
                        }
                    }
                });

                let _ = tx
                    .send(EngineEvent::Track(RemoteTrack {
                        id,
                        kind,
                        frames: frames_rx,
                    }))
                    .await;
            })
        }));

        Ok((Arc::new(RtcConnection { pc }), events_rx))
    }
}

/// One `RTCPeerConnection` behind the [`PeerConnection`] seam
struct RtcConnection {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for RtcConnection {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self.pc.create_offer(None).await.map_err(backend)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self.pc.create_answer(None).await.map_err(backend)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = rtc_description(desc)?;
        self.pc.set_local_description(desc).await.map_err(backend)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = rtc_description(desc)?;
        self.pc.set_remote_description(desc).await.map_err(backend)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|err| EngineError::InvalidCandidate(err.to_string()))
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), EngineError> {
        let mime_type = match track.kind() {
            MediaKind::Video => MIME_TYPE_VP8,
            MediaKind::Audio => MIME_TYPE_OPUS,
        };
        let sample_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id().to_string(),
            "peershare".to_string(),
        ));
        self.pc
            .add_track(Arc::clone(&sample_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(backend)?;

        // Feed the capture's frame fan-out into the sample writer.
        let mut frames = track.subscribe_frames();
        tokio::spawn(async move {
            loop {
                match frames.recv().await {
                    Ok(frame) => {
                        let sample = Sample {
                            data: frame,
                            duration: SAMPLE_DURATION,
                            ..Default::default()
                        };
                        if sample_track.write_sample(&sample).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::trace!(skipped, "sample writer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc.close().await.map_err(backend)
    }
}
