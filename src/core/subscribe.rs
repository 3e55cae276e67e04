//! Subscribe side: watch a share someone else publishes

use std::sync::Arc;

use crate::engine::{EngineError, RemoteStream};
use crate::error::Result;
use crate::registry::RegistryError;
use crate::session::{NegotiationState, ShareRole, ShareSession, StreamSink};
use crate::signal::SignalPayload;

use super::events::{ShareHandle, StopReason};
use super::{fail_share, send_signal, spawn_engine_pump, ShareCore};

impl ShareCore {
    /// Watch a share; `sink` gets the remote stream exactly once when
    /// media arrives
    ///
    /// When the publisher's offer already auto-created a session for
    /// this share, the sink attaches to it; otherwise a subscriber
    /// session is created and offered to the publisher. Joining a
    /// share this side publishes, or joining twice, is a
    /// [`RegistryError::DuplicateShare`].
    pub async fn join<F>(&self, share_id: &str, sink: F) -> Result<ShareHandle>
    where
        F: Fn(RemoteStream) + Send + Sync + 'static,
    {
        let inner = &self.inner;
        let sink: StreamSink = Arc::new(sink);

        loop {
            if let Some(entry) = inner.registry.get(share_id).await {
                let mut session = entry.lock().await;
                if session.state().is_terminal() {
                    // Raced with teardown; the entry is on its way out
                    // of the map.
                    drop(session);
                    continue;
                }
                if session.role() == ShareRole::Publisher || session.has_sink() {
                    return Err(RegistryError::duplicate(share_id).into());
                }
                let Some(events_rx) = session.take_events_rx() else {
                    return Err(RegistryError::duplicate(share_id).into());
                };
                session.set_sink(Arc::clone(&sink));
                let delivery = session.pending_stream_delivery();
                drop(session);

                // A stream that arrived before the sink still gets
                // delivered, outside the lock.
                if let Some((deliver, stream)) = delivery {
                    deliver(stream);
                }
                tracing::info!(share_id, "joined existing share");
                return Ok(ShareHandle::new(share_id.to_string(), events_rx));
            }

            // No session yet: offer to the publisher-to-be.
            let (conn, events) = inner.engine.create_connection(&inner.config.ice_servers).await?;
            let (mut session, events_rx) =
                ShareSession::new(share_id, ShareRole::Subscriber, inner.config.event_capacity);
            session.attach_connection(Arc::clone(&conn));
            session.set_sink(Arc::clone(&sink));

            let (entry, created) = inner.registry.get_or_create(session).await;
            if !created {
                // An offer for this share arrived first; attach to the
                // session it created instead.
                let _ = conn.close().await;
                continue;
            }
            spawn_engine_pump(Arc::clone(inner), share_id.to_string(), events);

            let offered: std::result::Result<(), EngineError> = {
                let mut session = entry.lock().await;
                if !session.state().can_offer() {
                    tracing::debug!(share_id, state = %session.state(), "offer skipped");
                    Ok(())
                } else {
                    match conn.create_offer().await {
                        Ok(offer) => {
                            send_signal(inner, share_id, SignalPayload::Offer(offer.clone())).await;
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
                fail_share(inner, share_id, &entry, format!("offer failed: {err}")).await;
                return Err(err.into());
            }
            tracing::info!(share_id, "join offer sent");
            return Ok(ShareHandle::new(share_id.to_string(), events_rx));
        }
    }

    /// Stop watching a share. Does nothing when the share is unknown.
    pub async fn leave(&self, share_id: &str) {
        self.inner.teardown(share_id, StopReason::Local).await;
    }
}
