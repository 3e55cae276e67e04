//! Share registry implementation
//!
//! The central map of live share sessions, keyed by share id. All
//! lookups on the signaling and media paths go through here.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::session::{ShareSession, ShareStats};

use super::error::RegistryError;

/// Central registry for all live shares
///
/// The map itself sits behind an `RwLock` for concurrent lookups;
/// each session gets its own `Mutex` so work on one share never
/// blocks signaling for another. The map lock is never held while a
/// session lock is taken.
pub struct ShareRegistry {
    shares: RwLock<HashMap<String, Arc<Mutex<ShareSession>>>>,
}

impl ShareRegistry {
    pub fn new() -> Self {
        Self {
            shares: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a session for a share id that must not exist yet
    ///
    /// On conflict the offered session is dropped and the existing one
    /// stays untouched.
    pub async fn create(
        &self,
        session: ShareSession,
    ) -> Result<Arc<Mutex<ShareSession>>, RegistryError> {
        let share_id = session.share_id().to_string();
        let mut shares = self.shares.write().await;

        match shares.entry(share_id.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(share_id = %share_id, "share already registered");
                Err(RegistryError::duplicate(share_id))
            }
            Entry::Vacant(slot) => {
                let entry = Arc::new(Mutex::new(session));
                slot.insert(Arc::clone(&entry));
                tracing::debug!(share_id = %share_id, "share registered");
                Ok(entry)
            }
        }
    }

    /// Insert a session unless the share id is already tracked
    ///
    /// Returns the tracked session and whether this call created it.
    /// Used on the receive path, where an offer may race local setup
    /// for the same share.
    pub async fn get_or_create(
        &self,
        session: ShareSession,
    ) -> (Arc<Mutex<ShareSession>>, bool) {
        let share_id = session.share_id().to_string();
        let mut shares = self.shares.write().await;

        match shares.entry(share_id.clone()) {
            Entry::Occupied(slot) => (Arc::clone(slot.get()), false),
            Entry::Vacant(slot) => {
                let entry = Arc::new(Mutex::new(session));
                slot.insert(Arc::clone(&entry));
                tracing::debug!(share_id = %share_id, "share registered on receive");
                (entry, true)
            }
        }
    }

    /// Look up a share by id
    pub async fn get(&self, share_id: &str) -> Option<Arc<Mutex<ShareSession>>> {
        self.shares.read().await.get(share_id).cloned()
    }

    /// Remove a share from the map
    ///
    /// Only the teardown path calls this; everything else leaves
    /// removal to it so cleanup happens exactly once.
    pub(crate) async fn remove(&self, share_id: &str) -> Option<Arc<Mutex<ShareSession>>> {
        let removed = self.shares.write().await.remove(share_id);
        if removed.is_some() {
            tracing::debug!(share_id = %share_id, "share removed");
        }
        removed
    }

    pub async fn contains(&self, share_id: &str) -> bool {
        self.shares.read().await.contains_key(share_id)
    }

    pub async fn len(&self) -> usize {
        self.shares.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shares.read().await.is_empty()
    }

    /// Ids of every tracked share
    pub async fn share_ids(&self) -> Vec<String> {
        self.shares.read().await.keys().cloned().collect()
    }

    /// Current stats snapshot for one share
    pub async fn stats(&self, share_id: &str) -> Option<ShareStats> {
        let entry = self.get(share_id).await?;
        let session = entry.lock().await;
        Some(session.stats())
    }

    /// Ids of shares that have been negotiating longer than `timeout`
    pub async fn expired(&self, timeout: Duration) -> Vec<String> {
        let entries: Vec<Arc<Mutex<ShareSession>>> =
            self.shares.read().await.values().cloned().collect();

        let mut expired = Vec::new();
        for entry in entries {
            let session = entry.lock().await;
            if session.state().is_negotiating() && session.elapsed_in_state() > timeout {
                expired.push(session.share_id().to_string());
            }
        }
        expired
    }
}

impl Default for ShareRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{NegotiationState, ShareRole};

    fn session(share_id: &str, role: ShareRole) -> ShareSession {
        ShareSession::new(share_id, role, 8).0
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_share() {
        let registry = ShareRegistry::new();

        registry
            .create(session("s1", ShareRole::Publisher))
            .await
            .unwrap();
        assert!(registry.contains("s1").await);

        let result = registry.create(session("s1", ShareRole::Publisher)).await;
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateShare { .. })
        ));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_or_create_returns_existing() {
        let registry = ShareRegistry::new();

        let (entry, created) = registry
            .get_or_create(session("s1", ShareRole::Subscriber))
            .await;
        assert!(created);
        entry.lock().await.set_state(NegotiationState::Answering);

        let (again, created) = registry
            .get_or_create(session("s1", ShareRole::Subscriber))
            .await;
        assert!(!created);
        assert_eq!(again.lock().await.state(), NegotiationState::Answering);
    }

    #[tokio::test]
    async fn test_remove_forgets_share() {
        let registry = ShareRegistry::new();
        registry
            .create(session("s1", ShareRole::Publisher))
            .await
            .unwrap();

        assert!(registry.remove("s1").await.is_some());
        assert!(!registry.contains("s1").await);
        assert!(registry.remove("s1").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_stats_reads_through_to_session() {
        let registry = ShareRegistry::new();
        let entry = registry
            .create(session("s1", ShareRole::Subscriber))
            .await
            .unwrap();
        entry.lock().await.set_state(NegotiationState::Offering);

        let stats = registry.stats("s1").await.unwrap();
        assert_eq!(stats.state, NegotiationState::Offering);
        assert_eq!(stats.role, ShareRole::Subscriber);
        assert!(registry.stats("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_reports_stale_negotiations() {
        let registry = ShareRegistry::new();

        let offering = registry
            .create(session("s1", ShareRole::Publisher))
            .await
            .unwrap();
        offering.lock().await.set_state(NegotiationState::Offering);

        let connected = registry
            .create(session("s2", ShareRole::Subscriber))
            .await
            .unwrap();
        connected.lock().await.set_state(NegotiationState::Connected);

        // Zero timeout expires anything still negotiating.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let expired = registry.expired(Duration::ZERO).await;
        assert_eq!(expired, vec!["s1".to_string()]);

        // A generous timeout expires nothing.
        assert!(registry.expired(Duration::from_secs(60)).await.is_empty());
    }
}
