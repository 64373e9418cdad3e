//! Wire protocol and HTTP API for interview sessions.
//!
//! Provides:
//! - Wire protocol (camelCase JSON records)
//! - Axum router for sessions, execution and accounts (feature: server)

pub mod protocol;

#[cfg(feature = "server")]
pub mod http;

pub use protocol::{
    ConflictBody, ErrorBody, ExecuteRequest, HealthResponse, LoginRequest, SessionRecord,
    SignupRequest, TokenResponse, UpdateSessionRequest, UserRecord,
};

#[cfg(feature = "server")]
pub use http::{ApiError, AppState, DynSessionManager, HttpConfig, router};
