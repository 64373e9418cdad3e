//! Session manager for versioned updates, participants and observers.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use livecode_core::{
    Language, RemoteError, SessionFeed, SessionFilter, SessionId, SessionPatch, SessionRemote,
    SessionState, SessionStorage, StorageError,
};
use tokio::sync::RwLock;

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Revision conflict, session is at revision {}", current.revision)]
    Conflict { current: Box<SessionState> },
    #[error("Session not found: {0}")]
    NotFound(SessionId),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for ManagerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { current, .. } => Self::Conflict { current },
            StorageError::NotFound(id) => Self::NotFound(id),
            StorageError::Internal(message) => Self::Storage(message),
        }
    }
}

impl From<ManagerError> for RemoteError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::Conflict { current } => Self::Conflict { current },
            ManagerError::NotFound(id) => Self::Status {
                code: 404,
                message: format!("Session not found: {id}"),
            },
            ManagerError::Storage(message) => Self::Status { code: 500, message },
        }
    }
}

/// Front door to the authoritative session store.
///
/// Every successful mutation is published to the session's feed before
/// the call returns, so local observers see updates in commit order.
pub struct SessionManager<S>
where
    S: SessionStorage,
{
    storage: S,
    feeds: RwLock<HashMap<SessionId, Arc<SessionFeed>>>,
}

impl<S> SessionManager<S>
where
    S: SessionStorage,
{
    /// Create a new session manager.
    #[must_use]
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            feeds: RwLock::new(HashMap::new()),
        }
    }

    /// Get a session, creating it with defaults on first access.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn get(&self, id: &str) -> Result<SessionState, ManagerError> {
        Ok(self.storage.load_or_create(id).await?)
    }

    /// Apply a partial update.
    ///
    /// # Errors
    /// Returns `ManagerError::Conflict` when the patch's base revision is
    /// stale, or a storage error.
    pub async fn update(&self, id: &str, patch: &SessionPatch) -> Result<SessionState, ManagerError> {
        match self.storage.apply(id, patch).await {
            Ok(state) => {
                tracing::debug!(session_id = %id, revision = state.revision, op_id = ?patch.op_id, "Session updated");
                self.publish(&state).await;
                Ok(state)
            }
            Err(e) => {
                if let StorageError::Conflict { expected, ref current } = e {
                    tracing::warn!(
                        session_id = %id,
                        expected,
                        actual = current.revision,
                        "Rejected stale session update"
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Replace the code.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn set_code(&self, id: &str, code: impl Into<String>) -> Result<SessionState, ManagerError> {
        self.update(id, &SessionPatch::code(code)).await
    }

    /// Switch language, resetting the code to the language template.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn set_language(&self, id: &str, language: Language) -> Result<SessionState, ManagerError> {
        self.update(id, &SessionPatch::language(language)).await
    }

    /// Register a participant.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn join(&self, id: &str) -> Result<SessionState, ManagerError> {
        let state = self.storage.adjust_participants(id, 1).await?;
        tracing::info!(session_id = %id, participants = state.connected_users, "Participant joined");
        self.publish(&state).await;
        Ok(state)
    }

    /// Release a participant slot. The counter never drops below zero.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn leave(&self, id: &str) -> Result<SessionState, ManagerError> {
        let state = self.storage.adjust_participants(id, -1).await?;
        tracing::info!(session_id = %id, participants = state.connected_users, "Participant left");
        self.publish(&state).await;
        Ok(state)
    }

    /// List sessions.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn list(&self, filter: SessionFilter) -> Result<Vec<SessionState>, ManagerError> {
        Ok(self.storage.list(filter).await?)
    }

    /// Delete a session and drop its feed.
    ///
    /// # Errors
    /// Returns `ManagerError::NotFound` if the session does not exist.
    pub async fn delete(&self, id: &str) -> Result<(), ManagerError> {
        if !self.storage.delete(id).await? {
            return Err(ManagerError::NotFound(id.to_string()));
        }
        self.feeds.write().await.remove(id);
        tracing::info!(session_id = %id, "Session deleted");
        Ok(())
    }

    /// Feed of snapshots for a session, seeded with its current state.
    ///
    /// Feeds nobody observes or holds any more are dropped here and on
    /// the next mutation of their session.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn subscribe(&self, id: &str) -> Result<Arc<SessionFeed>, ManagerError> {
        let state = self.get(id).await?;
        let feed = {
            let mut feeds = self.feeds.write().await;
            feeds.retain(|key, feed| key == id || is_live(feed));
            Arc::clone(feeds.entry(id.to_string()).or_default())
        };
        feed.publish(state);
        Ok(feed)
    }

    async fn publish(&self, state: &SessionState) {
        let idle = {
            let feeds = self.feeds.read().await;
            let Some(feed) = feeds.get(&state.id) else {
                return;
            };
            feed.publish(state.clone());
            !is_live(feed)
        };
        if idle {
            let mut feeds = self.feeds.write().await;
            if feeds.get(&state.id).is_some_and(|feed| !is_live(feed)) {
                feeds.remove(&state.id);
                tracing::debug!(session_id = %state.id, "Dropped idle session feed");
            }
        }
    }
}

/// Observed, or still held by a caller that may subscribe.
fn is_live(feed: &Arc<SessionFeed>) -> bool {
    feed.observer_count() > 0 || Arc::strong_count(feed) > 1
}

#[async_trait]
impl<S> SessionRemote for SessionManager<S>
where
    S: SessionStorage,
{
    async fn fetch(&self, id: &str) -> Result<SessionState, RemoteError> {
        Ok(self.get(id).await?)
    }

    async fn update(&self, id: &str, patch: &SessionPatch) -> Result<SessionState, RemoteError> {
        Ok(Self::update(self, id, patch).await?)
    }

    async fn join(&self, id: &str) -> Result<SessionState, RemoteError> {
        Ok(Self::join(self, id).await?)
    }

    async fn leave(&self, id: &str) -> Result<SessionState, RemoteError> {
        Ok(Self::leave(self, id).await?)
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn manager() -> SessionManager<MemoryStorage> {
        SessionManager::new(MemoryStorage::new())
    }

    #[tokio::test]
    async fn test_join_then_leave_restores_count() {
        let manager = manager();
        let before = manager.get("room").await.unwrap().connected_users;

        manager.join("room").await.unwrap();
        let after = manager.leave("room").await.unwrap();
        assert_eq!(after.connected_users, before);

        // extra leave never goes negative
        let floored = manager.leave("room").await.unwrap();
        assert_eq!(floored.connected_users, 0);
    }

    #[tokio::test]
    async fn test_language_switch_is_atomic() {
        let manager = manager();
        manager.set_code("room", "custom").await.unwrap();

        let state = manager.set_language("room", Language::TypeScript).await.unwrap();
        assert_eq!(state.language, Language::TypeScript);
        assert_eq!(state.code, Language::TypeScript.default_code());
    }

    #[tokio::test]
    async fn test_observers_see_every_update_in_order() {
        let manager = manager();
        let feed = manager.subscribe("room").await.unwrap();
        let mut rx = feed.subscribe();

        manager.set_code("room", "a").await.unwrap();
        manager.join("room").await.unwrap();
        manager.set_code("room", "b").await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let third = rx.recv().await.unwrap();
        assert_eq!(first.code, "a");
        assert_eq!(second.connected_users, 1);
        assert_eq!(third.code, "b");
        assert!(first.revision < second.revision && second.revision < third.revision);
        assert_eq!(feed.latest().unwrap(), third);
    }

    #[tokio::test]
    async fn test_observers_are_per_session() {
        let manager = manager();
        let feed = manager.subscribe("one").await.unwrap();
        let mut rx = feed.subscribe();

        manager.set_code("two", "elsewhere").await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unobserved_feeds_are_dropped() {
        let manager = manager();

        let feed = manager.subscribe("watched").await.unwrap();
        let rx = feed.subscribe();
        drop(feed);
        manager.set_code("watched", "a").await.unwrap();
        assert_eq!(manager.feeds.read().await.len(), 1);

        drop(rx);
        manager.set_code("watched", "b").await.unwrap();
        assert!(manager.feeds.read().await.is_empty());

        drop(manager.subscribe("one").await.unwrap());
        let _held = manager.subscribe("two").await.unwrap();
        let feeds = manager.feeds.read().await;
        assert_eq!(feeds.len(), 1);
        assert!(feeds.contains_key("two"));
    }

    #[tokio::test]
    async fn test_conflict_surfaces_current_state() {
        let manager = manager();
        let initial = manager.get("room").await.unwrap();
        manager.set_code("room", "theirs").await.unwrap();

        let err = manager
            .update("room", &SessionPatch::code("mine").with_base_revision(initial.revision))
            .await
            .unwrap_err();
        match err {
            ManagerError::Conflict { current } => assert_eq!(current.code, "theirs"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_delete_missing_session() {
        let manager = manager();
        manager.get("gone").await.unwrap();
        manager.delete("gone").await.unwrap();
        assert!(matches!(
            manager.delete("gone").await,
            Err(ManagerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_view_of_manager() {
        let manager = Arc::new(manager());
        let remote: Arc<dyn SessionRemote> = manager.clone();

        let joined = remote.join("room").await.unwrap();
        assert_eq!(joined.connected_users, 1);
        let updated = remote
            .update("room", &SessionPatch::code("x").with_base_revision(joined.revision))
            .await
            .unwrap();
        assert_eq!(remote.fetch("room").await.unwrap(), updated);

        let err = remote
            .update("room", &SessionPatch::code("y").with_base_revision(joined.revision))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Conflict { .. }));
    }
}
