//! In-memory session storage.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use livecode_core::{
    SessionFilter, SessionPatch, SessionState, SessionStorage, StorageError, unix_now,
};

/// In-memory storage implementation.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
pub struct MemoryStorage {
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn with_session<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut SessionState) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| SessionState::new(id, unix_now()));

        f(session)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn load_or_create(&self, id: &str) -> Result<SessionState, StorageError> {
        if let Some(session) = self.get(id).await? {
            return Ok(session);
        }
        self.with_session(id, |session| Ok(session.clone()))
    }

    async fn get(&self, id: &str) -> Result<Option<SessionState>, StorageError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(id)
            .cloned())
    }

    async fn apply(&self, id: &str, patch: &SessionPatch) -> Result<SessionState, StorageError> {
        self.with_session(id, |session| {
            session.apply_patch(patch, unix_now())?;
            Ok(session.clone())
        })
    }

    async fn adjust_participants(&self, id: &str, delta: i32) -> Result<SessionState, StorageError> {
        self.with_session(id, |session| {
            session.adjust_participants(delta, unix_now());
            Ok(session.clone())
        })
    }

    async fn list(&self, filter: SessionFilter) -> Result<Vec<SessionState>, StorageError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let mut result: Vec<SessionState> = sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();

        // Most recently updated first, id as tie-breaker for stable output
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));

        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }

        Ok(result)
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self
            .sessions
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .remove(id)
            .is_some())
    }
}
