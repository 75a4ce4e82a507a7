use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointStore;
use crate::clock::Clock;
use crate::config::ForwarderConfig;
use crate::connection::ConnectionManager;
use crate::error::ForwarderError;
use crate::signing::Signer;
use crate::strategy::{self, StrategyOutcome};
use crate::telemetry::{Aggregator, SyncMode, TelemetryEvent, TelemetrySink};
use crate::window_manager::WindowManager;

/// Wires the connection manager, window manager, and the two sync
/// strategies together, and owns the shutdown sequence.
pub struct Forwarder {
    config: ForwarderConfig,
    signer: Arc<dyn Signer>,
    clock: Arc<dyn Clock>,
    sink: TelemetrySink,
    aggregator: Aggregator,
    connection_manager: ConnectionManager,
    cancel: CancellationToken,
}

impl Forwarder {
    pub fn new(
        config: ForwarderConfig,
        signer: Arc<dyn Signer>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        let (aggregator, sink) = Aggregator::start(clock.clone());
        let connection_manager = ConnectionManager::new(
            config.source_relay_url.clone(),
            config.deepfry_relay_url.clone(),
            sink.clone(),
            clock.clone(),
            std::time::Duration::from_secs(config.timeout_publish_seconds),
            std::time::Duration::from_secs(config.timeout_subscribe_seconds),
        );
        Self {
            config,
            signer,
            clock,
            sink,
            aggregator,
            connection_manager,
            cancel,
        }
    }

    pub fn telemetry_sink(&self) -> TelemetrySink {
        self.sink.clone()
    }

    /// Flips to true once both relay connections have completed their
    /// initial connect, for the ambient status server's `/readyz`.
    pub fn readiness_flag(&self) -> Arc<std::sync::atomic::AtomicBool> {
        self.connection_manager.readiness_flag()
    }

    pub async fn snapshot(&self) -> crate::telemetry::Snapshot {
        self.aggregator.snapshot().await
    }

    pub async fn start(&self) -> Result<(), ForwarderError> {
        let result = run_inner(
            &self.config,
            &self.signer,
            &self.clock,
            &self.sink,
            &self.connection_manager,
            &self.cancel,
        )
        .await;

        self.connection_manager.close().await;
        self.aggregator.stop().await;

        result
    }
}

async fn run_inner(
    config: &ForwarderConfig,
    signer: &Arc<dyn Signer>,
    clock: &Arc<dyn Clock>,
    sink: &TelemetrySink,
    connection_manager: &ConnectionManager,
    cancel: &CancellationToken,
) -> Result<(), ForwarderError> {
    connection_manager.connect().await?;

    let downstream = connection_manager.deepfry().await?;
    let checkpoint_store = CheckpointStore::new(
        downstream.clone(),
        signer.clone(),
        config.source_relay_url.clone(),
        clock.clone(),
    );
    let window_manager = WindowManager::new(
        checkpoint_store,
        clock.clone(),
        config.sync_window_seconds,
        config.sync_start_time,
    );

    let mut w = window_manager.get_or_create().await?;

    sink.emit(TelemetryEvent::SyncModeChanged {
        mode: SyncMode::Windowed,
        reason: "initial_mode".to_string(),
        t: clock.now_unix(),
    });

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let source = connection_manager.source().await?;
        let downstream = connection_manager.deepfry().await?;

        let outcome = strategy::windowed::run(
            w,
            source,
            downstream,
            &window_manager,
            connection_manager,
            sink,
            clock,
            cancel,
            config.sync_max_batch,
            config.sync_max_catchup_lag_seconds,
            config.realtime_tolerance_seconds,
        )
        .await;

        match outcome {
            StrategyOutcome::Canceled => return Ok(()),
            StrategyOutcome::Fatal(err) => return Err(err),
            StrategyOutcome::FallbackToWindowed { resume_from } => {
                w = resume_from;
                continue;
            }
            StrategyOutcome::SwitchToRealtime => {
                let source = connection_manager.source().await?;
                let downstream = connection_manager.deepfry().await?;
                let outcome = strategy::realtime::run(
                    source,
                    downstream,
                    &window_manager,
                    connection_manager,
                    sink,
                    clock,
                    cancel,
                    config.sync_max_batch,
                    config.sync_window_seconds,
                )
                .await;

                match outcome {
                    StrategyOutcome::Canceled => return Ok(()),
                    StrategyOutcome::Fatal(err) => return Err(err),
                    StrategyOutcome::FallbackToWindowed { resume_from } => {
                        w = resume_from;
                        continue;
                    }
                    StrategyOutcome::SwitchToRealtime => {
                        unreachable!("realtime strategy never itself requests a transition to realtime")
                    }
                }
            }
        }
    }
}
