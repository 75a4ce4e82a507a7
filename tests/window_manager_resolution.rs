/// Tests for how the starting sync window is resolved: explicit start time
/// takes priority over a persisted checkpoint, which takes priority over
/// aligning to the current time.
mod common;

use std::sync::Arc;

use common::FakeRelayClient;
use deepfry_forwarder::checkpoint::CheckpointStore;
use deepfry_forwarder::clock::FakeClock;
use deepfry_forwarder::signing::Secp256k1Signer;
use deepfry_forwarder::window::Window;
use deepfry_forwarder::window_manager::WindowManager;

fn test_signer() -> Arc<Secp256k1Signer> {
    Arc::new(Secp256k1Signer::from_config_value(&"22".repeat(32)).expect("valid test key"))
}

fn manager(
    downstream: Arc<FakeRelayClient>,
    clock: Arc<FakeClock>,
    d: i64,
    explicit_start: Option<i64>,
) -> WindowManager {
    let store = CheckpointStore::new(
        downstream,
        test_signer(),
        "wss://source.example".to_string(),
        clock.clone(),
    );
    WindowManager::new(store, clock, d, explicit_start)
}

/// Test: an explicit configured start time wins even when a checkpoint
/// exists.
#[tokio::test]
async fn explicit_start_overrides_checkpoint() {
    let downstream = Arc::new(FakeRelayClient::new());
    let clock = Arc::new(FakeClock::new(1_700_001_000));
    let store = CheckpointStore::new(
        downstream,
        test_signer(),
        "wss://source.example".to_string(),
        clock.clone(),
    );
    // A checkpoint exists, but the explicit start must win anyway.
    store
        .update_window(Window::from_start(1_700_000_000, 5).unwrap())
        .await
        .unwrap();
    let wm = WindowManager::new(store, clock, 5, Some(1_700_000_500));

    let resolved = wm.get_or_create().await.unwrap();
    assert_eq!(resolved, Window::from_start(1_700_000_500, 5).unwrap());
}

/// Test: with no explicit start, the window resumes right after the last
/// checkpoint.
#[tokio::test]
async fn resumes_after_last_checkpoint_when_present() {
    let downstream = Arc::new(FakeRelayClient::new());
    let clock = Arc::new(FakeClock::new(1_700_001_000));
    let store = CheckpointStore::new(
        downstream.clone(),
        test_signer(),
        "wss://source.example".to_string(),
        clock.clone(),
    );
    let last = Window::from_start(1_700_000_000, 5).unwrap();
    store.update_window(last).await.unwrap();

    let wm = WindowManager::new(store, clock, 5, None);
    let resolved = wm.get_or_create().await.unwrap();
    assert_eq!(resolved, last.next(5).unwrap());
}

/// Test: with no explicit start and no checkpoint, the window aligns to the
/// current time.
#[tokio::test]
async fn aligns_to_now_when_nothing_else_available() {
    let downstream = Arc::new(FakeRelayClient::new());
    let clock = Arc::new(FakeClock::new(1_700_000_007));
    let wm = manager(downstream, clock, 5, None);

    let resolved = wm.get_or_create().await.unwrap();
    assert_eq!(resolved, Window::aligned(1_700_000_007, 5).unwrap());
}
