//! Wire protocol for client-server communication.

use livecode_core::{Language, SessionPatch, SessionState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health check message.
pub const HEALTH_MESSAGE: &str = "Live Code Studio Backend Running";

/// Session record as sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub code: String,
    pub language: Language,
    pub connected_users: u32,
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_op_id: Option<Uuid>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl From<SessionState> for SessionRecord {
    fn from(s: SessionState) -> Self {
        Self {
            id: s.id,
            code: s.code,
            language: s.language,
            connected_users: s.connected_users,
            revision: s.revision,
            last_op_id: s.last_op_id,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

impl From<SessionRecord> for SessionState {
    fn from(r: SessionRecord) -> Self {
        Self {
            id: r.id,
            code: r.code,
            language: r.language,
            connected_users: r.connected_users,
            revision: r.revision,
            last_op_id: r.last_op_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Partial session update body for `POST /sessions/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_revision: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<Uuid>,
}

impl From<UpdateSessionRequest> for SessionPatch {
    fn from(r: UpdateSessionRequest) -> Self {
        Self {
            code: r.code,
            language: r.language,
            base_revision: r.base_revision,
            op_id: r.op_id,
        }
    }
}

impl From<&SessionPatch> for UpdateSessionRequest {
    fn from(p: &SessionPatch) -> Self {
        Self {
            code: p.code.clone(),
            language: p.language,
            base_revision: p.base_revision,
            op_id: p.op_id,
        }
    }
}

/// Body for `POST /execute`.
///
/// The language stays a raw tag so unknown languages get a structured
/// failure instead of a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    pub language: String,
}

/// Generic error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Body of a `409 Conflict` answer to a stale update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictBody {
    pub message: String,
    pub current: SessionRecord,
}

/// Health check body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            message: HEALTH_MESSAGE.to_string(),
        }
    }
}

/// Body for `POST /auth/signup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub full_name: String,
    pub password: String,
}

/// Body for `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Answer to a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl TokenResponse {
    /// Bearer token response.
    #[must_use]
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
        }
    }
}

/// User profile returned by `/auth/signup` and `/auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: u64,
    pub email: String,
    pub full_name: String,
}
