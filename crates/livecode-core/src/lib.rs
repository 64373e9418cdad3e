//! Core types and traits for collaborative interview sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Language` - Supported languages and their starter templates
//! - `SessionState` / `SessionPatch` - The versioned session record
//! - `ExecutionResult` - Normalized outcome of running code
//! - `SessionFeed` - Latest snapshot + broadcast for observers
//! - Storage, executor and remote traits

pub mod execution;
pub mod feed;
pub mod language;
pub mod session;
pub mod traits;

pub use execution::ExecutionResult;
pub use feed::SessionFeed;
pub use language::{Language, UnsupportedLanguage};
pub use session::{PatchError, SessionId, SessionPatch, SessionState, unix_now};
pub use traits::{CodeExecutor, RemoteError, SessionFilter, SessionRemote, SessionStorage, StorageError};
