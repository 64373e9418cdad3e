//! Polling synchronization with optimistic local echo.
//!
//! The local view is always the last acknowledged server snapshot with
//! the client's pending operations replayed on top, in order. Pending
//! operations leave the queue once the server acknowledges them, either
//! by answering the update or by reporting their operation id as the
//! last one applied.

use std::{collections::VecDeque, time::Duration};

use livecode_core::{Language, RemoteError, SessionId, SessionPatch, SessionRemote, SessionState};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use uuid::Uuid;

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Conflicts tolerated in one flush before giving up until the next poll.
const MAX_REBASES: usize = 3;

/// Connection state of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Disconnected,
    Syncing,
    Synced,
}

/// Sync loop configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    /// Buffer for commands sent to the background task.
    pub command_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            command_buffer: 64,
        }
    }
}

/// A local edit not yet acknowledged by the server.
#[derive(Debug, Clone)]
struct PendingOp {
    op_id: Uuid,
    patch: SessionPatch,
    /// Language of the local view when the edit was made.
    composed_under: Language,
}

/// Client-side reconciliation engine for one session.
pub struct SessionSync<R> {
    remote: R,
    session_id: SessionId,
    state: SyncState,
    acked: Option<SessionState>,
    pending: VecDeque<PendingOp>,
    joined: bool,
}

impl<R: SessionRemote> SessionSync<R> {
    #[must_use]
    pub fn new(remote: R, session_id: impl Into<SessionId>) -> Self {
        Self {
            remote,
            session_id: session_id.into(),
            state: SyncState::Disconnected,
            acked: None,
            pending: VecDeque::new(),
            joined: false,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub const fn state(&self) -> SyncState {
        self.state
    }

    /// Whether the last exchange with the server succeeded.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SyncState::Synced
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Last snapshot the server acknowledged.
    #[must_use]
    pub const fn acknowledged(&self) -> Option<&SessionState> {
        self.acked.as_ref()
    }

    /// Acknowledged snapshot with pending operations replayed on top.
    ///
    /// `None` until the first successful exchange.
    #[must_use]
    pub fn view(&self) -> Option<SessionState> {
        let mut view = self.acked.clone()?;
        for op in &self.pending {
            let now = view.updated_at;
            // queued patches carry no base revision, so this cannot conflict
            if view.apply_patch(&op.patch, now).is_err() {
                break;
            }
        }
        Some(view)
    }

    /// Join the session and load the first snapshot.
    ///
    /// # Errors
    /// Returns error if the server is unreachable; the engine stays
    /// disconnected and `mount` can be retried.
    pub async fn mount(&mut self) -> Result<(), RemoteError> {
        self.state = SyncState::Syncing;
        match self.remote.join(&self.session_id).await {
            Ok(snapshot) => {
                self.joined = true;
                self.accept(snapshot);
                self.state = SyncState::Synced;
                tracing::info!(session_id = %self.session_id, "Joined session");
                Ok(())
            }
            Err(e) => {
                self.state = SyncState::Disconnected;
                tracing::warn!(session_id = %self.session_id, "Failed to join session: {e}");
                Err(e)
            }
        }
    }

    #[must_use]
    pub const fn is_mounted(&self) -> bool {
        self.joined
    }

    /// Send pending operations, then fetch the current snapshot.
    ///
    /// # Errors
    /// Returns error if either exchange fails. Pending operations are kept.
    pub async fn poll(&mut self) -> Result<(), RemoteError> {
        self.flush().await?;
        match self.remote.fetch(&self.session_id).await {
            Ok(snapshot) => {
                self.accept(snapshot);
                self.state = SyncState::Synced;
                Ok(())
            }
            Err(e) => {
                self.state = SyncState::Disconnected;
                tracing::debug!(session_id = %self.session_id, "Poll failed: {e}");
                Err(e)
            }
        }
    }

    /// Queue a code edit without contacting the server.
    pub fn push_code(&mut self, code: impl Into<String>) {
        self.push(SessionPatch::code(code));
    }

    /// Queue a language switch without contacting the server.
    pub fn push_language(&mut self, language: Language) {
        self.push(SessionPatch::language(language));
    }

    /// Edit the code and send it.
    ///
    /// The edit shows in `view` immediately, whether or not the send
    /// succeeds.
    ///
    /// # Errors
    /// Returns error if the send fails; the edit stays queued.
    pub async fn update_code(&mut self, code: impl Into<String>) -> Result<(), RemoteError> {
        self.push_code(code);
        self.flush().await
    }

    /// Switch language (resetting the code to its template) and send it.
    ///
    /// # Errors
    /// Returns error if the send fails; the switch stays queued.
    pub async fn set_language(&mut self, language: Language) -> Result<(), RemoteError> {
        self.push_language(language);
        self.flush().await
    }

    /// Send queued operations in order, rebasing on conflicts.
    ///
    /// # Errors
    /// Returns error on network failure or repeated conflicts.
    pub async fn flush(&mut self) -> Result<(), RemoteError> {
        let mut rebases = 0;
        while let Some(op) = self.pending.front() {
            let Some(base) = self.acked.as_ref().map(|s| s.revision) else {
                // nothing to compose against until the first fetch
                return Ok(());
            };
            let patch = op.patch.clone().with_base_revision(base);

            match self.remote.update(&self.session_id, &patch).await {
                Ok(snapshot) => {
                    self.pending.pop_front();
                    self.accept(snapshot);
                    self.state = SyncState::Synced;
                }
                Err(RemoteError::Conflict { current }) => {
                    rebases += 1;
                    tracing::debug!(
                        session_id = %self.session_id,
                        revision = current.revision,
                        "Rebasing pending operations"
                    );
                    self.rebase((*current).clone());
                    if rebases >= MAX_REBASES {
                        return Err(RemoteError::Conflict { current });
                    }
                }
                Err(e) => {
                    self.state = SyncState::Disconnected;
                    tracing::warn!(session_id = %self.session_id, "Failed to send update: {e}");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Release the participant slot.
    ///
    /// Pending operations are dropped.
    ///
    /// # Errors
    /// Returns error if the leave request fails.
    pub async fn unmount(&mut self) -> Result<(), RemoteError> {
        self.pending.clear();
        self.state = SyncState::Disconnected;
        if !std::mem::take(&mut self.joined) {
            return Ok(());
        }
        let snapshot = self.remote.leave(&self.session_id).await?;
        self.accept(snapshot);
        tracing::info!(session_id = %self.session_id, "Left session");
        Ok(())
    }

    fn push(&mut self, patch: SessionPatch) {
        let composed_under = self
            .view()
            .map_or_else(Language::default, |view| view.language);
        let op_id = Uuid::new_v4();
        self.pending.push_back(PendingOp {
            op_id,
            patch: patch.with_op_id(op_id),
            composed_under,
        });
    }

    /// Adopt a server snapshot unless it predates the acknowledged one.
    ///
    /// Returns whether it was adopted.
    fn accept(&mut self, snapshot: SessionState) -> bool {
        if let Some(acked) = &self.acked {
            if snapshot.revision < acked.revision {
                tracing::debug!(
                    session_id = %self.session_id,
                    stale = snapshot.revision,
                    acked = acked.revision,
                    "Discarding stale snapshot"
                );
                return false;
            }
        }

        // an applied op whose answer was lost shows up as last_op_id
        if let Some(applied) = snapshot.last_op_id {
            if let Some(pos) = self.pending.iter().position(|op| op.op_id == applied) {
                self.pending.drain(..=pos);
            }
        }
        self.acked = Some(snapshot);
        true
    }

    /// Adopt `current` and drop pending code edits made under another language.
    fn rebase(&mut self, current: SessionState) {
        let mut language = current.language;
        self.acked = Some(current);
        self.pending.retain(|op| {
            if let Some(switched) = op.patch.language {
                language = switched;
                return true;
            }
            op.composed_under == language
        });
    }
}

/// Published view of a background sync task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub state: SyncState,
    /// Local view (acknowledged + pending).
    pub session: Option<SessionState>,
    pub pending: usize,
}

impl SyncSnapshot {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SyncState::Synced
    }

    fn of<R: SessionRemote>(sync: &SessionSync<R>) -> Self {
        Self {
            state: sync.state(),
            session: sync.view(),
            pending: sync.pending_len(),
        }
    }
}

/// Background sync task is no longer running.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("Sync task has stopped")]
pub struct SyncClosed;

enum Command {
    Edit(String),
    SwitchLanguage(Language),
    Shutdown(oneshot::Sender<Result<(), RemoteError>>),
}

/// Handle to a background task that keeps one session in sync.
pub struct SyncHandle {
    session_id: SessionId,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SyncSnapshot>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Mount `session_id` on `remote` and poll it in the background.
    #[must_use]
    pub fn spawn<R>(remote: R, session_id: impl Into<SessionId>, config: SyncConfig) -> Self
    where
        R: SessionRemote + 'static,
    {
        let session_id = session_id.into();
        let (commands, rx) = mpsc::channel(config.command_buffer.max(1));
        let (publisher, snapshots) = watch::channel(SyncSnapshot::default());
        let sync = SessionSync::new(remote, session_id.clone());
        let task = tokio::spawn(run(sync, config, rx, publisher));
        Self {
            session_id,
            commands,
            snapshots,
            task,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshots.clone()
    }

    /// Replace the code.
    ///
    /// # Errors
    /// Returns `SyncClosed` if the task has stopped.
    pub async fn edit(&self, code: impl Into<String>) -> Result<(), SyncClosed> {
        self.send(Command::Edit(code.into())).await
    }

    /// Switch language.
    ///
    /// # Errors
    /// Returns `SyncClosed` if the task has stopped.
    pub async fn switch_language(&self, language: Language) -> Result<(), SyncClosed> {
        self.send(Command::SwitchLanguage(language)).await
    }

    async fn send(&self, command: Command) -> Result<(), SyncClosed> {
        self.commands.send(command).await.map_err(|_| SyncClosed)
    }

    /// Stop polling and release the participant slot.
    ///
    /// # Errors
    /// Returns error if the leave request fails.
    pub async fn shutdown(self) -> Result<(), RemoteError> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).await.is_err() {
            return Ok(());
        }
        let result = rx.await.unwrap_or(Ok(()));
        if let Err(e) = self.task.await {
            tracing::warn!(session_id = %self.session_id, "Sync task panicked: {e}");
        }
        result
    }
}

async fn run<R: SessionRemote>(
    mut sync: SessionSync<R>,
    config: SyncConfig,
    mut commands: mpsc::Receiver<Command>,
    publisher: watch::Sender<SyncSnapshot>,
) {
    let publish = |sync: &SessionSync<R>| {
        publisher.send_replace(SyncSnapshot::of(sync));
    };

    publish(&sync);
    let _ = sync.mount().await; // logged; retried on the next tick
    publish(&sync);

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = if sync.is_mounted() {
                    sync.poll().await
                } else {
                    sync.mount().await
                };
                publish(&sync);
            }
            command = commands.recv() => {
                match command {
                    Some(Command::Edit(code)) => {
                        sync.push_code(code);
                        publish(&sync);
                        let _ = sync.flush().await;
                        publish(&sync);
                    }
                    Some(Command::SwitchLanguage(language)) => {
                        sync.push_language(language);
                        publish(&sync);
                        let _ = sync.flush().await;
                        publish(&sync);
                    }
                    Some(Command::Shutdown(reply)) => {
                        let result = sync.unmount().await;
                        publish(&sync);
                        let _ = reply.send(result);
                        return;
                    }
                    None => {
                        if let Err(e) = sync.unmount().await {
                            tracing::warn!(session_id = %sync.session_id(), "Failed to leave session: {e}");
                        }
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };

    use async_trait::async_trait;

    use super::*;

    /// In-memory authoritative record with switchable connectivity.
    #[derive(Default)]
    struct FakeRemote {
        record: Mutex<Option<SessionState>>,
        offline: AtomicBool,
        /// Snapshot served by the next fetch instead of the live record.
        stale_fetch: Mutex<Option<SessionState>>,
    }

    impl FakeRemote {
        fn with<T>(&self, id: &str, f: impl FnOnce(&mut SessionState) -> T) -> Result<T, RemoteError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(RemoteError::Network("offline".into()));
            }
            let mut guard = self.record.lock().unwrap();
            let record = guard.get_or_insert_with(|| SessionState::new(id, 0));
            Ok(f(record))
        }

        fn current(&self) -> SessionState {
            self.record.lock().unwrap().clone().unwrap()
        }
    }

    #[async_trait]
    impl SessionRemote for FakeRemote {
        async fn fetch(&self, id: &str) -> Result<SessionState, RemoteError> {
            if let Some(stale) = self.stale_fetch.lock().unwrap().take() {
                return Ok(stale);
            }
            self.with(id, |s| s.clone())
        }

        async fn update(&self, id: &str, patch: &SessionPatch) -> Result<SessionState, RemoteError> {
            self.with(id, |s| -> Result<SessionState, RemoteError> {
                s.apply_patch(patch, 1).map_err(|e| match e {
                    livecode_core::PatchError::Conflict { current, .. } => RemoteError::Conflict { current },
                })?;
                Ok(s.clone())
            })?
        }

        async fn join(&self, id: &str) -> Result<SessionState, RemoteError> {
            self.with(id, |s| {
                s.adjust_participants(1, 1);
                s.clone()
            })
        }

        async fn leave(&self, id: &str) -> Result<SessionState, RemoteError> {
            self.with(id, |s| {
                s.adjust_participants(-1, 1);
                s.clone()
            })
        }
    }

    #[tokio::test]
    async fn test_mount_transitions_to_synced() {
        let mut sync = SessionSync::new(FakeRemote::default(), "room");
        assert_eq!(sync.state(), SyncState::Disconnected);
        assert!(sync.view().is_none());

        sync.mount().await.unwrap();
        assert!(sync.is_connected());
        assert_eq!(sync.view().unwrap().connected_users, 1);
    }

    #[tokio::test]
    async fn test_failed_mount_stays_disconnected() {
        let remote = FakeRemote::default();
        remote.offline.store(true, Ordering::SeqCst);
        let mut sync = SessionSync::new(remote, "room");

        tokio_test::assert_err!(sync.mount().await);
        assert_eq!(sync.state(), SyncState::Disconnected);
        assert!(!sync.is_mounted());
    }

    #[tokio::test]
    async fn test_offline_edit_stays_visible_and_is_sent_later() {
        let mut sync = SessionSync::new(FakeRemote::default(), "room");
        sync.mount().await.unwrap();

        sync.remote.offline.store(true, Ordering::SeqCst);
        tokio_test::assert_err!(sync.update_code("draft").await);
        assert!(!sync.is_connected());
        assert_eq!(sync.view().unwrap().code, "draft");
        assert_eq!(sync.pending_len(), 1);

        sync.remote.offline.store(false, Ordering::SeqCst);
        sync.poll().await.unwrap();
        assert_eq!(sync.pending_len(), 0);
        assert_eq!(sync.remote.current().code, "draft");
        assert_eq!(sync.view().unwrap().code, "draft");
    }

    #[tokio::test]
    async fn test_stale_poll_does_not_revert_acknowledged_edit() {
        let mut sync = SessionSync::new(FakeRemote::default(), "room");
        sync.mount().await.unwrap();
        let before_edit = sync.remote.current();

        sync.update_code("typed").await.unwrap();
        *sync.remote.stale_fetch.lock().unwrap() = Some(before_edit);
        sync.poll().await.unwrap();

        assert_eq!(sync.view().unwrap().code, "typed");
    }

    #[tokio::test]
    async fn test_conflict_rebases_code_edit_under_same_language() {
        let mut sync = SessionSync::new(FakeRemote::default(), "room");
        sync.mount().await.unwrap();

        // someone else edits first
        sync.remote
            .with("room", |s| s.apply_patch(&SessionPatch::code("theirs"), 1).unwrap())
            .unwrap();

        sync.update_code("mine").await.unwrap();
        assert_eq!(sync.remote.current().code, "mine");
        assert_eq!(sync.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_conflict_drops_code_edit_after_remote_language_switch() {
        let mut sync = SessionSync::new(FakeRemote::default(), "room");
        sync.mount().await.unwrap();

        sync.remote.offline.store(true, Ordering::SeqCst);
        tokio_test::assert_err!(sync.update_code("console.log('mine')").await);
        sync.remote.offline.store(false, Ordering::SeqCst);

        sync.remote
            .with("room", |s| {
                s.apply_patch(&SessionPatch::language(Language::Python), 1).unwrap()
            })
            .unwrap();

        sync.flush().await.unwrap();
        assert_eq!(sync.pending_len(), 0);
        let current = sync.remote.current();
        assert_eq!(current.language, Language::Python);
        assert_eq!(current.code, Language::Python.default_code());
        assert_eq!(sync.view().unwrap(), current);
    }

    #[tokio::test]
    async fn test_local_language_switch_resets_view() {
        let mut sync = SessionSync::new(FakeRemote::default(), "room");
        sync.mount().await.unwrap();
        sync.remote.offline.store(true, Ordering::SeqCst);

        sync.push_code("edited");
        sync.push_language(Language::TypeScript);
        let view = sync.view().unwrap();
        assert_eq!(view.language, Language::TypeScript);
        assert_eq!(view.code, Language::TypeScript.default_code());
    }

    #[tokio::test]
    async fn test_lost_answer_is_acknowledged_by_op_id() {
        let mut sync = SessionSync::new(FakeRemote::default(), "room");
        sync.mount().await.unwrap();
        sync.push_code("applied");

        // server applied the op but the client never saw the answer
        let op = sync.pending.front().unwrap().patch.clone();
        sync.remote.with("room", |s| s.apply_patch(&op, 1).unwrap()).unwrap();

        let snapshot = sync.remote.current();
        assert!(sync.accept(snapshot));
        assert_eq!(sync.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_unmount_releases_slot_once() {
        let mut sync = SessionSync::new(FakeRemote::default(), "room");
        sync.mount().await.unwrap();
        sync.unmount().await.unwrap();
        sync.unmount().await.unwrap();
        assert_eq!(sync.remote.current().connected_users, 0);
        assert!(!sync.is_connected());
    }
}
