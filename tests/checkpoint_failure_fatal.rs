/// S4 — checkpoint publish fails and the forced reconnect it triggers
/// itself exhausts its retries: the process-fatal path (spec.md §7,
/// `CheckpointPublishFailed` escalating to `ConnectExhausted`).
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeRelayClient;
use deepfry_forwarder::checkpoint::CheckpointStore;
use deepfry_forwarder::clock::FakeClock;
use deepfry_forwarder::connection::{ConnectionManager, RelayConnector};
use deepfry_forwarder::error::ForwarderError;
use deepfry_forwarder::relay::RelayClient;
use deepfry_forwarder::signing::Secp256k1Signer;
use deepfry_forwarder::strategy::{self, StrategyOutcome};
use deepfry_forwarder::telemetry::sink;
use deepfry_forwarder::window::Window;
use deepfry_forwarder::window_manager::WindowManager;
use tokio_util::sync::CancellationToken;

fn test_signer() -> Arc<Secp256k1Signer> {
    Arc::new(Secp256k1Signer::from_config_value(&"55".repeat(32)).expect("valid test key"))
}

/// A connector that never succeeds, modeling a downstream relay that has
/// gone away entirely (so the forced reconnect after a checkpoint-publish
/// failure exhausts its own retry budget).
struct AlwaysFailsConnector;

#[async_trait::async_trait]
impl RelayConnector for AlwaysFailsConnector {
    async fn connect(
        &self,
        _url: &str,
        _publish_timeout: Duration,
        _subscribe_timeout: Duration,
    ) -> Result<Arc<dyn RelayClient>, ForwarderError> {
        Err(ForwarderError::QueryFailure("connection refused".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn s4_checkpoint_publish_failure_escalates_to_connect_exhausted() {
    let source = Arc::new(FakeRelayClient::new());
    let downstream = Arc::new(FakeRelayClient::new());
    downstream.queue_publish_failure(ForwarderError::CheckpointPublishFailed(
        "downstream rejected checkpoint".into(),
    ));

    let clock = Arc::new(FakeClock::new(1_700_000_006));
    let (sink, _rx) = sink::channel(64);
    let checkpoint_store = CheckpointStore::new(
        downstream.clone(),
        test_signer(),
        "wss://source.example".to_string(),
        clock.clone(),
    );
    let window_manager = WindowManager::new(checkpoint_store, clock.clone(), 5, None);
    let connection_manager = ConnectionManager::with_connector(
        "wss://source.example".into(),
        "wss://deepfry.example".into(),
        sink.clone(),
        clock.clone(),
        Duration::from_secs(1),
        Duration::from_secs(1),
        Arc::new(AlwaysFailsConnector),
    );
    let cancel = CancellationToken::new();

    let w = Window::from_start(1_700_000_000, 5).unwrap();
    let outcome = strategy::windowed::run(
        w,
        source,
        downstream,
        &window_manager,
        &connection_manager,
        &sink,
        &clock,
        &cancel,
        1000,
        0,
        0,
    )
    .await;

    match outcome {
        StrategyOutcome::Fatal(ForwarderError::ConnectExhausted { attempts, .. }) => {
            assert_eq!(attempts, 3);
        }
        other => panic!("expected a fatal ConnectExhausted outcome, got a different outcome ({})",
            match other {
                StrategyOutcome::Canceled => "Canceled",
                StrategyOutcome::SwitchToRealtime => "SwitchToRealtime",
                StrategyOutcome::FallbackToWindowed { .. } => "FallbackToWindowed",
                StrategyOutcome::Fatal(_) => "Fatal(other)",
            }),
    }
}
