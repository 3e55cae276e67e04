//! Publish side: capture this display and offer it to the session

use std::sync::Arc;

use tokio::sync::watch;

use crate::engine::EngineError;
use crate::error::Result;
use crate::registry::RegistryError;
use crate::session::{NegotiationState, ShareRole, ShareSession};
use crate::signal::{ShareStart, ShareStop, SignalPayload};

use super::events::{ShareHandle, StopReason};
use super::{fail_share, send_signal, spawn_engine_pump, CoreInner, ShareCore};

impl ShareCore {
    /// Capture this display and start sharing it under a fresh id
    pub async fn start_publish(&self, title: Option<String>) -> Result<ShareHandle> {
        let share_id = uuid::Uuid::new_v4().to_string();
        self.start_publish_as(share_id, title).await
    }

    /// Capture this display and share it under a caller-chosen id
    ///
    /// Fails with [`RegistryError::DuplicateShare`] when this side
    /// already has a session for `share_id`, and with a capture error
    /// when the user denies the capture prompt. Neither leaves any
    /// state behind.
    pub async fn start_publish_as(
        &self,
        share_id: impl Into<String>,
        title: Option<String>,
    ) -> Result<ShareHandle> {
        let share_id = share_id.into();
        let inner = &self.inner;

        // Fail before touching the capture backend when the id is
        // obviously taken; the registry insert below re-checks.
        if inner.registry.contains(&share_id).await {
            return Err(RegistryError::duplicate(&share_id).into());
        }

        let stream = inner.capture.capture_display().await?;
        let (conn, events) = inner.engine.create_connection(&inner.config.ice_servers).await?;

        for track in stream.tracks() {
            if let Err(err) = conn.add_track(track).await {
                let _ = conn.close().await;
                return Err(err.into());
            }
        }
        let ended = stream.ended();

        let (mut session, events_rx) =
            ShareSession::new(&share_id, ShareRole::Publisher, inner.config.event_capacity);
        session.attach_connection(Arc::clone(&conn));
        session.attach_local_stream(stream);

        let entry = match inner.registry.create(session).await {
            Ok(entry) => entry,
            Err(err) => {
                let _ = conn.close().await;
                return Err(err.into());
            }
        };
        spawn_engine_pump(Arc::clone(inner), share_id.clone(), events);
        spawn_capture_watcher(Arc::clone(inner), share_id.clone(), ended);

        let offered: std::result::Result<(), EngineError> = {
            let mut session = entry.lock().await;
            if !session.state().can_offer() {
                // A remote offer beat us here; the answer path owns the
                // session now.
                tracing::debug!(share_id = %share_id, state = %session.state(), "offer skipped");
                Ok(())
            } else {
                match conn.create_offer().await {
                    Ok(offer) => {
                        // Offer first, then set the local description, so
                        // trickled candidates follow the offer on the wire.
                        send_signal(inner, &share_id, SignalPayload::Offer(offer.clone())).await;
                        match conn.set_local_description(offer).await {
                            Ok(()) => {
                                session.set_state(NegotiationState::Offering);
                                Ok(())
                            }
                            Err(err) => Err(err),
                        }
                    }
                    Err(err) => Err(err),
                }
            }
        };
        if let Err(err) = offered {
            fail_share(inner, &share_id, &entry, format!("offer failed: {err}")).await;
            return Err(err.into());
        }

        send_signal(
            inner,
            &share_id,
            SignalPayload::ScreenShareStart(ShareStart { title }),
        )
        .await;
        tracing::info!(share_id = %share_id, "publish started");
        Ok(ShareHandle::new(share_id, events_rx))
    }

    /// Stop a share this side publishes
    pub async fn stop_publish(&self, handle: &ShareHandle) {
        end_publish(&self.inner, handle.share_id(), StopReason::Local).await;
    }

    /// Stop a published share by id
    pub async fn stop_publish_id(&self, share_id: &str) {
        end_publish(&self.inner, share_id, StopReason::Local).await;
    }
}

/// Announce the stop and tear the share down. Safe to call for shares
/// that are already gone.
pub(crate) async fn end_publish(inner: &Arc<CoreInner>, share_id: &str, reason: StopReason) {
    if !inner.registry.contains(share_id).await {
        tracing::debug!(share_id, "stop for unknown share ignored");
        return;
    }
    send_signal(
        inner,
        share_id,
        SignalPayload::ScreenShareStop(ShareStop::default()),
    )
    .await;
    inner.teardown(share_id, reason).await;
}

/// End the publish when the capture backend reports the stream over,
/// e.g. the user hit the platform's own stop control.
fn spawn_capture_watcher(inner: Arc<CoreInner>, share_id: String, mut ended: watch::Receiver<bool>) {
    tokio::spawn(async move {
        while ended.changed().await.is_ok() {
            if *ended.borrow() {
                tracing::info!(share_id = %share_id, "capture ended by source");
                end_publish(&inner, &share_id, StopReason::CaptureEnded).await;
                break;
            }
        }
    });
}
