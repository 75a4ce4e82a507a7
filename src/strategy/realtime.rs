use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use super::StrategyOutcome;
use crate::clock::Clock;
use crate::connection::ConnectionManager;
use crate::event::Filter;
use crate::relay::{RelayClient, SubscriptionEvent};
use crate::telemetry::{Severity, SyncMode, TelemetryEvent, TelemetrySink};
use crate::window::Window;
use crate::window_manager::WindowManager;

/// Refresh the checkpoint after this many forwarded events.
const EVENTS_PER_WINDOW_UPDATE: u64 = 250;

/// Live subscription loop. Forwards each event as it arrives, refreshing
/// the checkpoint every `EVENTS_PER_WINDOW_UPDATE` events, reconnecting on
/// stream break, and falling back to windowed mode if the subscription
/// cannot be (re-)established.
///
/// The spec's source recurses into itself on every reconnect; this is
/// converted to a loop since Rust has no guaranteed tail-call elimination
/// (see DESIGN.md open question 2).
#[allow(clippy::too_many_arguments)]
pub async fn run(
    source: Arc<dyn RelayClient>,
    downstream: Arc<dyn RelayClient>,
    window_manager: &WindowManager,
    connection_manager: &ConnectionManager,
    sink: &TelemetrySink,
    clock: &Arc<dyn Clock>,
    cancel: &CancellationToken,
    max_batch: u32,
    window_seconds: i64,
) -> StrategyOutcome {
    let mut source = source;
    let mut downstream = downstream;
    'reconnect: loop {
        let mut stream = match source.subscribe(vec![Filter::realtime(max_batch)]).await {
            Ok(stream) => stream,
            Err(err) => {
                sink.emit(TelemetryEvent::ForwarderError {
                    err: err.to_string(),
                    context: "realtime_subscribe",
                    severity: Severity::Error,
                    t: clock.now_unix(),
                });
                sink.emit(TelemetryEvent::SyncModeChanged {
                    mode: SyncMode::Windowed,
                    reason: "realtime_subscribe_failed".to_string(),
                    t: clock.now_unix(),
                });
                return fallback_to_windowed(window_manager).await;
            }
        };

        let mut events_since_update: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return StrategyOutcome::Canceled;
            }

            let item = tokio::select! {
                _ = cancel.cancelled() => return StrategyOutcome::Canceled,
                item = stream.next() => item,
            };

            match item {
                None => {
                    match handle_disconnect(
                        "subscription channel closed".to_string(),
                        connection_manager,
                        sink,
                        clock,
                    )
                    .await
                    {
                        Ok((reconnected_source, reconnected_downstream)) => {
                            source = reconnected_source;
                            downstream = reconnected_downstream;
                            continue 'reconnect;
                        }
                        Err(outcome) => return outcome,
                    }
                }
                Some(SubscriptionEvent::Closed(reason)) => {
                    match handle_disconnect(reason, connection_manager, sink, clock).await {
                        Ok((reconnected_source, reconnected_downstream)) => {
                            source = reconnected_source;
                            downstream = reconnected_downstream;
                            continue 'reconnect;
                        }
                        Err(outcome) => return outcome,
                    }
                }
                Some(SubscriptionEvent::EndOfStoredEvents) => continue,
                Some(SubscriptionEvent::Event(event)) => {
                    sink.emit(TelemetryEvent::EventReceived {
                        relay_url: String::new(),
                        kind: event.kind,
                        id: event.id.clone(),
                        t: clock.now_unix(),
                    });

                    let publish_started = std::time::Instant::now();
                    match downstream.publish(&event).await {
                        Ok(()) => {
                            let latency_ms = publish_started.elapsed().as_millis() as u64;
                            sink.emit(TelemetryEvent::EventForwarded {
                                relay_url: String::new(),
                                kind: event.kind,
                                latency_ms,
                                t: clock.now_unix(),
                            });
                        }
                        Err(err) => {
                            sink.emit(TelemetryEvent::ForwarderError {
                                err: err.to_string(),
                                context: "relay_publish",
                                severity: Severity::Warning,
                                t: clock.now_unix(),
                            });
                        }
                    }

                    events_since_update += 1;
                    sink.emit(TelemetryEvent::RealtimeProgressUpdated {
                        events_since_update,
                        t: clock.now_unix(),
                    });

                    if events_since_update >= EVENTS_PER_WINDOW_UPDATE {
                        let now = clock.now_unix();
                        let fresh = Window {
                            from: now - window_seconds,
                            to: now,
                        };
                        if let Err(err) = window_manager.update(fresh).await {
                            sink.emit(TelemetryEvent::ForwarderError {
                                err: err.to_string(),
                                context: "realtime_window_update",
                                severity: Severity::Warning,
                                t: clock.now_unix(),
                            });
                        }
                        events_since_update = 0;
                        sink.emit(TelemetryEvent::RealtimeProgressUpdated {
                            events_since_update: 0,
                            t: clock.now_unix(),
                        });
                    }
                }
            }
        }
    }
}

/// Reconnects both relay sessions after a disconnect and returns the fresh
/// source and downstream handles. `ConnectionManager::reconnect` closes and
/// reopens *both* sessions, so both must be re-fetched — holding onto the
/// old `downstream` handle would publish into a closed session for the
/// remainder of the live session.
async fn handle_disconnect(
    reason: String,
    connection_manager: &ConnectionManager,
    sink: &TelemetrySink,
    clock: &Arc<dyn Clock>,
) -> Result<(Arc<dyn RelayClient>, Arc<dyn RelayClient>), StrategyOutcome> {
    sink.emit(TelemetryEvent::ForwarderError {
        err: reason,
        context: "realtime_disconnect",
        severity: Severity::Warning,
        t: clock.now_unix(),
    });
    connection_manager
        .reconnect()
        .await
        .map_err(StrategyOutcome::Fatal)?;
    let source = connection_manager
        .source()
        .await
        .map_err(StrategyOutcome::Fatal)?;
    let downstream = connection_manager
        .deepfry()
        .await
        .map_err(StrategyOutcome::Fatal)?;
    Ok((source, downstream))
}

async fn fallback_to_windowed(window_manager: &WindowManager) -> StrategyOutcome {
    match window_manager.get_or_create().await {
        Ok(resume_from) => StrategyOutcome::FallbackToWindowed { resume_from },
        Err(err) => StrategyOutcome::Fatal(err),
    }
}
