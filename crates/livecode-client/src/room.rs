//! Room controller: one client's view of an interview room.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use livecode_core::{CodeExecutor, ExecutionResult, Language, RemoteError, SessionRemote, SessionState};
use tokio::sync::watch;

use crate::sync::{SyncClosed, SyncConfig, SyncHandle, SyncSnapshot};

/// Holds the executing flag; clears it on drop, including when a run is
/// cancelled mid-flight.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::AcqRel)).then_some(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Binds a synced session to an executor.
pub struct Room<E> {
    sync: SyncHandle,
    executor: E,
    executing: AtomicBool,
    last_result: Mutex<Option<ExecutionResult>>,
}

impl<E: CodeExecutor> Room<E> {
    /// Join `session_id` through `remote` and start syncing.
    #[must_use]
    pub fn open<R>(remote: R, executor: E, session_id: impl Into<String>, config: SyncConfig) -> Self
    where
        R: SessionRemote + 'static,
    {
        Self::with_sync(SyncHandle::spawn(remote, session_id, config), executor)
    }

    /// Wrap an already running sync task.
    #[must_use]
    pub fn with_sync(sync: SyncHandle, executor: E) -> Self {
        Self {
            sync,
            executor,
            executing: AtomicBool::new(false),
            last_result: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        self.sync.session_id()
    }

    /// Local view of the session, `None` until first loaded.
    #[must_use]
    pub fn view(&self) -> Option<SessionState> {
        self.sync.snapshot().session
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.sync.snapshot().is_connected()
    }

    /// Receiver notified whenever the view changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.sync.subscribe()
    }

    /// Replace the code.
    ///
    /// # Errors
    /// Returns `SyncClosed` after the room was left.
    pub async fn edit(&self, code: impl Into<String>) -> Result<(), SyncClosed> {
        self.sync.edit(code).await
    }

    /// Switch language, resetting the code to its template.
    ///
    /// # Errors
    /// Returns `SyncClosed` after the room was left.
    pub async fn switch_language(&self, language: Language) -> Result<(), SyncClosed> {
        self.sync.switch_language(language).await
    }

    /// Whether a run is in progress.
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Result of the most recent run.
    #[must_use]
    pub fn last_result(&self) -> Option<ExecutionResult> {
        match self.last_result.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Run the code currently in view.
    ///
    /// Only one run at a time; a second call while one is in progress
    /// fails without executing anything.
    pub async fn run(&self) -> ExecutionResult {
        let Some(view) = self.view() else {
            return ExecutionResult::failed("", "Session is not loaded yet", Duration::ZERO);
        };
        let Some(_running) = RunGuard::acquire(&self.executing) else {
            return ExecutionResult::failed("", "Execution already in progress", Duration::ZERO);
        };

        let result = self.executor.execute(&view.code, view.language).await;
        tracing::debug!(
            session_id = %view.id,
            language = %view.language,
            success = result.success,
            "Run finished"
        );

        match self.last_result.lock() {
            Ok(mut guard) => *guard = Some(result.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(result.clone()),
        }
        result
    }

    /// Stop syncing and release the participant slot.
    ///
    /// # Errors
    /// Returns error if the leave request fails.
    pub async fn leave(self) -> Result<(), RemoteError> {
        self.sync.shutdown().await
    }
}
