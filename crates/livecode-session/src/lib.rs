//! Authoritative session storage and orchestration.
//!
//! Provides:
//! - `SessionManager` - Versioned updates, participants and observers
//! - `AccountStore` - Token-based user profiles
//! - Storage implementations (memory, SQLite)

pub mod accounts;
pub mod manager;
pub mod storage;

pub use accounts::{AccountStore, AuthError, UserProfile};
pub use manager::{ManagerError, SessionManager};
