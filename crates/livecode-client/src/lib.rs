//! Headless client for interview sessions.
//!
//! Provides:
//! - `ApiClient` - HTTP access to sessions, execution and accounts
//! - `SessionSync` / `SyncHandle` - Polling sync with optimistic echo
//! - `Room` - Sync plus execution for one room
//! - `CredentialStore` - Persisted access token

pub mod api;
pub mod credentials;
pub mod room;
pub mod sync;

pub use api::ApiClient;
pub use credentials::{CredentialError, CredentialStore};
pub use room::Room;
pub use sync::{SessionSync, SyncClosed, SyncConfig, SyncHandle, SyncSnapshot, SyncState};
