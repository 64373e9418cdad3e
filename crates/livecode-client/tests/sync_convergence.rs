//! Sync engine against an in-process session manager.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use livecode_client::{Room, SyncConfig, SyncHandle, SyncSnapshot, sync::DEFAULT_POLL_INTERVAL};
use livecode_core::{CodeExecutor, ExecutionResult, Language};
use livecode_session::{SessionManager, storage::MemoryStorage};

struct EchoExecutor;

#[async_trait]
impl CodeExecutor for EchoExecutor {
    async fn execute(&self, code: &str, _language: Language) -> ExecutionResult {
        ExecutionResult::succeeded(code, Duration::from_millis(1))
    }
}

async fn wait_until(handle: &SyncHandle, pred: impl Fn(&SyncSnapshot) -> bool) -> SyncSnapshot {
    let mut rx = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if pred(&snapshot) {
                return snapshot;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("condition not reached")
}

fn code_of(snapshot: &SyncSnapshot) -> Option<&str> {
    snapshot.session.as_ref().map(|s| s.code.as_str())
}

#[tokio::test(start_paused = true)]
async fn test_two_clients_converge_within_one_interval() {
    let manager = Arc::new(SessionManager::new(MemoryStorage::new()));
    let alice = SyncHandle::spawn(Arc::clone(&manager), "room", SyncConfig::default());
    let bob = SyncHandle::spawn(Arc::clone(&manager), "room", SyncConfig::default());

    wait_until(&alice, SyncSnapshot::is_connected).await;
    wait_until(&bob, SyncSnapshot::is_connected).await;
    assert_eq!(manager.get("room").await.unwrap().connected_users, 2);

    alice.edit("console.log('from alice');").await.unwrap();
    wait_until(&alice, |s| s.pending == 0 && code_of(s) == Some("console.log('from alice');")).await;

    tokio::time::sleep(DEFAULT_POLL_INTERVAL + Duration::from_millis(100)).await;
    let seen = wait_until(&bob, |s| code_of(s) == Some("console.log('from alice');")).await;
    assert!(seen.is_connected());

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
    assert_eq!(manager.get("room").await.unwrap().connected_users, 0);
}

#[tokio::test(start_paused = true)]
async fn test_language_switch_propagates_with_template() {
    let manager = Arc::new(SessionManager::new(MemoryStorage::new()));
    let alice = SyncHandle::spawn(Arc::clone(&manager), "room", SyncConfig::default());
    let bob = SyncHandle::spawn(Arc::clone(&manager), "room", SyncConfig::default());
    wait_until(&alice, SyncSnapshot::is_connected).await;
    wait_until(&bob, SyncSnapshot::is_connected).await;

    alice.edit("let x = 1;").await.unwrap();
    alice.switch_language(Language::Python).await.unwrap();

    let local = wait_until(&alice, |s| {
        s.pending == 0 && s.session.as_ref().is_some_and(|v| v.language == Language::Python)
    })
    .await;
    let session = local.session.unwrap();
    assert_eq!(session.language, Language::Python);
    assert_eq!(session.code, Language::Python.default_code());

    let remote = wait_until(&bob, |s| {
        s.session.as_ref().is_some_and(|v| v.language == Language::Python)
    })
    .await;
    assert_eq!(code_of(&remote), Some(Language::Python.default_code()));

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_releases_slot() {
    let manager = Arc::new(SessionManager::new(MemoryStorage::new()));
    let handle = SyncHandle::spawn(Arc::clone(&manager), "room", SyncConfig::default());
    wait_until(&handle, SyncSnapshot::is_connected).await;
    drop(handle);

    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.get("room").await.unwrap().connected_users != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_room_runs_current_view() {
    let manager = Arc::new(SessionManager::new(MemoryStorage::new()));
    let room = Room::open(Arc::clone(&manager), EchoExecutor, "room", SyncConfig::default());
    let mut rx = room.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(SyncSnapshot::is_connected))
        .await
        .unwrap()
        .unwrap();

    assert!(room.last_result().is_none());
    room.edit("print('hi')").await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| s.pending == 0 && code_of(s) == Some("print('hi')")),
    )
    .await
    .unwrap()
    .unwrap();

    let result = room.run().await;
    assert!(result.success);
    assert_eq!(result.output, "print('hi')");
    assert_eq!(room.last_result(), Some(result));
    assert!(!room.is_executing());

    room.leave().await.unwrap();
    assert_eq!(manager.get("room").await.unwrap().connected_users, 0);
}

struct SlowExecutor;

#[async_trait]
impl CodeExecutor for SlowExecutor {
    async fn execute(&self, code: &str, _language: Language) -> ExecutionResult {
        tokio::time::sleep(Duration::from_secs(10)).await;
        ExecutionResult::succeeded(code, Duration::from_secs(10))
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_run_releases_executing_flag() {
    let manager = Arc::new(SessionManager::new(MemoryStorage::new()));
    let room = Room::open(Arc::clone(&manager), SlowExecutor, "room", SyncConfig::default());
    let mut rx = room.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(SyncSnapshot::is_connected))
        .await
        .unwrap()
        .unwrap();

    let cancelled = tokio::time::timeout(Duration::from_millis(50), room.run()).await;
    assert!(cancelled.is_err());
    assert!(!room.is_executing());
    assert!(room.last_result().is_none());

    let result = room.run().await;
    assert!(result.success, "{result:?}");
    assert!(!room.is_executing());

    room.leave().await.unwrap();
}
