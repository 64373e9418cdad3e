//! The versioned session record and patch semantics.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::Language;

/// Session identifier. Any string is a valid key.
pub type SessionId = String;

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Authoritative state of one interview room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Session identifier.
    pub id: SessionId,
    /// Current source text.
    pub code: String,
    /// Selected language.
    pub language: Language,
    /// Number of clients currently joined.
    pub connected_users: u32,
    /// Monotonic counter, bumped on every mutation.
    pub revision: u64,
    /// Operation id of the last applied patch.
    pub last_op_id: Option<Uuid>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Partial update sent by a participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPatch {
    /// Replacement source text.
    pub code: Option<String>,
    /// Language switch. Resets code to the language template.
    pub language: Option<Language>,
    /// Revision the patch was composed against.
    pub base_revision: Option<u64>,
    /// Client-generated operation id, used to deduplicate retries.
    pub op_id: Option<Uuid>,
}

impl SessionPatch {
    /// Patch replacing the code.
    #[must_use]
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::default()
        }
    }

    /// Patch switching the language.
    #[must_use]
    pub fn language(language: Language) -> Self {
        Self {
            language: Some(language),
            ..Self::default()
        }
    }

    /// Attach the revision this patch expects to replace.
    #[must_use]
    pub const fn with_base_revision(mut self, revision: u64) -> Self {
        self.base_revision = Some(revision);
        self
    }

    /// Attach an operation id.
    #[must_use]
    pub const fn with_op_id(mut self, op_id: Uuid) -> Self {
        self.op_id = Some(op_id);
        self
    }

    /// Whether the patch carries no field changes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.code.is_none() && self.language.is_none()
    }
}

/// Patch rejection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("Stale revision {expected}, session is at revision {}", current.revision)]
    Conflict {
        expected: u64,
        current: Box<SessionState>,
    },
}

impl SessionState {
    /// Fresh session with the JavaScript template and nobody joined.
    #[must_use]
    pub fn new(id: impl Into<SessionId>, now: i64) -> Self {
        let language = Language::default();
        Self {
            id: id.into(),
            code: language.default_code().to_string(),
            language,
            connected_users: 0,
            revision: 0,
            last_op_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a patch in place.
    ///
    /// A language switch resets the code to that language's template; an
    /// explicit `code` in the same patch replaces the template. Returns
    /// `Ok(false)` when nothing was applied (empty patch or a replayed
    /// operation id).
    ///
    /// # Errors
    /// Returns `PatchError::Conflict` when `base_revision` is stale.
    pub fn apply_patch(&mut self, patch: &SessionPatch, now: i64) -> Result<bool, PatchError> {
        if patch.op_id.is_some() && patch.op_id == self.last_op_id {
            return Ok(false);
        }
        if let Some(expected) = patch.base_revision {
            if expected != self.revision {
                return Err(PatchError::Conflict {
                    expected,
                    current: Box::new(self.clone()),
                });
            }
        }
        if patch.is_empty() {
            return Ok(false);
        }

        if let Some(language) = patch.language {
            self.language = language;
            self.code = language.default_code().to_string();
        }
        if let Some(ref code) = patch.code {
            self.code.clone_from(code);
        }

        self.touch(now);
        self.last_op_id = patch.op_id;
        Ok(true)
    }

    /// Change the participant count by `delta`, floored at zero.
    pub fn adjust_participants(&mut self, delta: i32, now: i64) {
        self.connected_users = self.connected_users.saturating_add_signed(delta);
        self.touch(now);
    }

    fn touch(&mut self, now: i64) {
        self.revision += 1;
        self.updated_at = now;
    }
}
