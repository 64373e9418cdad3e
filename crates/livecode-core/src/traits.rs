//! Core traits for storage, execution and remote session access.

use async_trait::async_trait;
use thiserror::Error;

use crate::{ExecutionResult, Language, PatchError, SessionId, SessionPatch, SessionState};

/// Session filter for queries.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Filter by language.
    pub language: Option<Language>,
    /// Limit results.
    pub limit: Option<usize>,
}

impl SessionFilter {
    /// Whether a session passes the filter (ignoring `limit`).
    #[must_use]
    pub fn matches(&self, session: &SessionState) -> bool {
        self.language.is_none_or(|lang| session.language == lang)
    }
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),
    #[error("Revision conflict: expected {expected}, found {}", current.revision)]
    Conflict {
        expected: u64,
        current: Box<SessionState>,
    },
    #[error("Storage error: {0}")]
    Internal(String),
}

impl From<PatchError> for StorageError {
    fn from(err: PatchError) -> Self {
        match err {
            PatchError::Conflict { expected, current } => Self::Conflict { expected, current },
        }
    }
}

/// Trait for session storage backends.
///
/// Implementations must keep at most one record per id, including when
/// two callers create the same session concurrently.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Get a session, creating it with defaults if absent.
    async fn load_or_create(&self, id: &str) -> Result<SessionState, StorageError>;

    /// Get a session without creating it.
    async fn get(&self, id: &str) -> Result<Option<SessionState>, StorageError>;

    /// Apply a patch, creating the session first if absent.
    ///
    /// Returns the stored state after the patch.
    async fn apply(&self, id: &str, patch: &SessionPatch) -> Result<SessionState, StorageError>;

    /// Adjust the participant counter, floored at zero.
    async fn adjust_participants(&self, id: &str, delta: i32) -> Result<SessionState, StorageError>;

    /// List sessions, most recently updated first.
    async fn list(&self, filter: SessionFilter) -> Result<Vec<SessionState>, StorageError>;

    /// Delete a session. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, StorageError>;
}

#[async_trait]
impl<T: SessionStorage + ?Sized> SessionStorage for Box<T> {
    async fn load_or_create(&self, id: &str) -> Result<SessionState, StorageError> {
        (**self).load_or_create(id).await
    }

    async fn get(&self, id: &str) -> Result<Option<SessionState>, StorageError> {
        (**self).get(id).await
    }

    async fn apply(&self, id: &str, patch: &SessionPatch) -> Result<SessionState, StorageError> {
        (**self).apply(id, patch).await
    }

    async fn adjust_participants(&self, id: &str, delta: i32) -> Result<SessionState, StorageError> {
        (**self).adjust_participants(id, delta).await
    }

    async fn list(&self, filter: SessionFilter) -> Result<Vec<SessionState>, StorageError> {
        (**self).list(filter).await
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        (**self).delete(id).await
    }
}

/// Trait for code execution backends.
///
/// Execution never fails at the type level: every failure path is an
/// `ExecutionResult` with `success: false`.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Run `code` as `language`.
    async fn execute(&self, code: &str, language: Language) -> ExecutionResult;

    /// Run `code` for a raw language tag.
    async fn execute_tag(&self, code: &str, tag: &str) -> ExecutionResult {
        match tag.parse::<Language>() {
            Ok(language) => self.execute(code, language).await,
            Err(_) => ExecutionResult::unsupported(tag),
        }
    }
}

/// Remote session access error.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Revision conflict, session is at revision {}", current.revision)]
    Conflict { current: Box<SessionState> },
    #[error("Request failed with status {code}: {message}")]
    Status { code: u16, message: String },
}

impl From<StorageError> for RemoteError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { current, .. } => Self::Conflict { current },
            StorageError::NotFound(id) => Self::Status {
                code: 404,
                message: format!("Session not found: {id}"),
            },
            StorageError::Internal(message) => Self::Status { code: 500, message },
        }
    }
}

/// Client view of the authoritative session store.
///
/// Implemented over HTTP for networked clients and directly by the
/// session manager for clients in the same process.
#[async_trait]
pub trait SessionRemote: Send + Sync {
    /// Fetch the current record (created lazily).
    async fn fetch(&self, id: &str) -> Result<SessionState, RemoteError>;

    /// Apply a patch.
    async fn update(&self, id: &str, patch: &SessionPatch) -> Result<SessionState, RemoteError>;

    /// Take a participant slot.
    async fn join(&self, id: &str) -> Result<SessionState, RemoteError>;

    /// Release a participant slot.
    async fn leave(&self, id: &str) -> Result<SessionState, RemoteError>;
}

#[async_trait]
impl<T: SessionRemote + ?Sized> SessionRemote for std::sync::Arc<T> {
    async fn fetch(&self, id: &str) -> Result<SessionState, RemoteError> {
        (**self).fetch(id).await
    }

    async fn update(&self, id: &str, patch: &SessionPatch) -> Result<SessionState, RemoteError> {
        (**self).update(id, patch).await
    }

    async fn join(&self, id: &str) -> Result<SessionState, RemoteError> {
        (**self).join(id).await
    }

    async fn leave(&self, id: &str) -> Result<SessionState, RemoteError> {
        (**self).leave(id).await
    }
}

#[async_trait]
impl<T: CodeExecutor + ?Sized> CodeExecutor for std::sync::Arc<T> {
    async fn execute(&self, code: &str, language: Language) -> ExecutionResult {
        (**self).execute(code, language).await
    }
}
