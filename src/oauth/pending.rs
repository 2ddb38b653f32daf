use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::RwLock;
use tracing::debug;

use super::{utils, Result};

/// Server-side half of a login that has been started but not yet called back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuth {
    pub code_verifier: String,
    pub csrf_state: String,
    pub expires_at: u64,
}

/// Short-lived, read-once storage for in-flight logins. Keys are base64url encoded random bytes
/// that the browser carries in the pending-login cookie.
#[derive(Debug, Clone)]
pub struct PendingAuthStore {
    entries: Arc<RwLock<HashMap<String, PendingAuth>>>,
    ttl: Duration,
}

impl PendingAuthStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Record a new pending login and return the id the browser should hold on to.
    pub async fn insert(&self, code_verifier: String, csrf_state: String) -> Result<String> {
        let id = utils::base64url_encode(utils::generate_random_key()?);
        let now = utils::current_epoch();
        let entry = PendingAuth {
            code_verifier,
            csrf_state,
            expires_at: now.saturating_add(self.ttl.as_secs()),
        };

        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(id.clone(), entry);
        debug!(pending = entries.len(), "Stored pending login");

        Ok(id)
    }

    /// Remove and return the pending login. A second call for the same id, or a call after the
    /// entry expired, yields `None`.
    pub async fn take(&self, id: &str) -> Option<PendingAuth> {
        let entry = self.entries.write().await.remove(id)?;
        if utils::current_epoch() >= entry.expires_at {
            debug!("Pending login expired");
            return None;
        }
        Some(entry)
    }

    pub async fn discard(&self, id: &str) {
        self.entries.write().await.remove(id);
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_is_read_once() {
        let store = PendingAuthStore::new(Duration::from_secs(60));
        let id = store
            .insert("verifier".to_string(), "state".to_string())
            .await
            .unwrap();

        let entry = store.take(&id).await.unwrap();
        assert_eq!(entry.code_verifier, "verifier");
        assert_eq!(entry.csrf_state, "state");

        assert!(store.take(&id).await.is_none());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let store = PendingAuthStore::new(Duration::ZERO);
        let id = store
            .insert("verifier".to_string(), "state".to_string())
            .await
            .unwrap();
        assert!(store.take(&id).await.is_none());
    }

    #[tokio::test]
    async fn insert_prunes_expired_entries() {
        let store = PendingAuthStore::new(Duration::ZERO);
        store.insert("a".to_string(), "a".to_string()).await.unwrap();
        store.insert("b".to_string(), "b".to_string()).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn huge_ttl_does_not_overflow() {
        let store = PendingAuthStore::new(Duration::from_secs(u64::MAX));
        let id = store
            .insert("verifier".to_string(), "state".to_string())
            .await
            .unwrap();
        let entry = store.take(&id).await.unwrap();
        assert_eq!(entry.expires_at, u64::MAX);
    }

    #[tokio::test]
    async fn unknown_id() {
        let store = PendingAuthStore::new(Duration::from_secs(60));
        assert!(store.take("nope").await.is_none());
    }
}
