//! Exactly-once share teardown
//!
//! Every way a share ends funnels into [`CoreInner::teardown`]: local
//! stop, remote stop, capture end, negotiation failure, timeout, and
//! core shutdown. The routine is idempotent and each step runs even
//! when an earlier one fails, so a half-torn share can never hold a
//! connection or capture open.

use crate::session::NegotiationState;

use super::events::{ShareEvent, StopReason};
use super::CoreInner;

impl CoreInner {
    /// Stop capture tracks, close the peer connection, drop the
    /// registry entry, clear the sink, and notify the handle. Calling
    /// it again, or for an unknown share, does nothing.
    pub(crate) async fn teardown(&self, share_id: &str, reason: StopReason) {
        let Some(entry) = self.registry.get(share_id).await else {
            tracing::trace!(share_id, "teardown for unknown share");
            return;
        };

        let mut session = entry.lock().await;
        if session.state() == NegotiationState::Closed {
            return;
        }
        tracing::info!(
            share_id,
            reason = %reason,
            role = %session.role(),
            "tearing down share"
        );

        if let Some(stream) = session.take_local_stream() {
            stream.stop_tracks();
        }

        if let Some(conn) = session.take_connection() {
            if let Err(err) = conn.close().await {
                tracing::warn!(share_id, %err, "peer connection close failed");
            }
        }

        // Removing while the session lock is held means nobody can
        // look the entry up and observe it half torn down.
        self.registry.remove(share_id).await;

        session.clear_sink();
        session.clear_pending_candidates();
        session.set_state(NegotiationState::Closed);
        session.emit(ShareEvent::Stopped(reason));
    }
}
