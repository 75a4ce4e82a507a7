use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use super::StrategyOutcome;
use crate::clock::Clock;
use crate::connection::ConnectionManager;
use crate::error::ForwarderError;
use crate::event::Filter;
use crate::relay::RelayClient;
use crate::telemetry::{Severity, SyncMode, TelemetryEvent, TelemetrySink};
use crate::window::Window;
use crate::window_manager::WindowManager;

/// Returns true once the trailing edge of `w` has reached "almost now" —
/// past that point historical queries cannot make progress faster than
/// wall-clock, so switching to streaming is strictly preferable.
pub fn should_switch_to_realtime(w: Window, now: i64, tolerance_seconds: i64) -> bool {
    w.to > now - tolerance_seconds
}

/// Replays historical events window-by-window, advancing and persisting the
/// checkpoint after each successful window, until the trailing window edge
/// catches up to "almost now".
#[allow(clippy::too_many_arguments)]
pub async fn run(
    mut w: Window,
    source: Arc<dyn RelayClient>,
    downstream: Arc<dyn RelayClient>,
    window_manager: &WindowManager,
    connection_manager: &ConnectionManager,
    sink: &TelemetrySink,
    clock: &Arc<dyn Clock>,
    cancel: &CancellationToken,
    max_batch: u32,
    max_catchup_lag_seconds: i64,
    realtime_tolerance_seconds: i64,
) -> StrategyOutcome {
    loop {
        if cancel.is_cancelled() {
            return StrategyOutcome::Canceled;
        }

        if should_switch_to_realtime(w, clock.now_unix(), realtime_tolerance_seconds) {
            sink.emit(TelemetryEvent::SyncModeChanged {
                mode: SyncMode::Realtime,
                reason: "caught_up_to_current_time".to_string(),
                t: clock.now_unix(),
            });
            return StrategyOutcome::SwitchToRealtime;
        }

        if clock.now_unix() > w.to + max_catchup_lag_seconds {
            match sync_window(
                w,
                &source,
                &downstream,
                window_manager,
                connection_manager,
                sink,
                clock,
                cancel,
                max_batch,
            )
            .await
            {
                Ok(()) => match window_manager.advance(w) {
                    Ok(next) => w = next,
                    Err(err) => return StrategyOutcome::Fatal(err),
                },
                Err(SyncWindowError::Canceled) => return StrategyOutcome::Canceled,
                Err(SyncWindowError::Retry) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(SyncWindowError::ReconnectExhausted(err)) => {
                    return StrategyOutcome::Fatal(err);
                }
            }
        } else {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

enum SyncWindowError {
    Canceled,
    /// Query failed, or the checkpoint update failed but a reconnect
    /// recovered the connection; per spec.md §4.5 step 3 this window is
    /// retried after a 1-second pause rather than abandoned (see DESIGN.md
    /// open question 1 for the unbounded-retry decision on query failures).
    Retry,
    /// Checkpoint update failed and the forced reconnect itself exhausted
    /// its retries: fatal per spec.md §7 (CheckpointPublishFailed → fatal
    /// when the reconnect it forces is itself a ConnectExhausted).
    ReconnectExhausted(ForwarderError),
}

#[allow(clippy::too_many_arguments)]
async fn sync_window(
    w: Window,
    source: &Arc<dyn RelayClient>,
    downstream: &Arc<dyn RelayClient>,
    window_manager: &WindowManager,
    connection_manager: &ConnectionManager,
    sink: &TelemetrySink,
    clock: &Arc<dyn Clock>,
    cancel: &CancellationToken,
    max_batch: u32,
) -> Result<(), SyncWindowError> {
    sink.emit(TelemetryEvent::SyncProgressUpdated {
        from: w.from,
        to: w.to,
        t: clock.now_unix(),
    });

    let filter = Filter::window(w.from, w.to, max_batch);
    let mut stream = match source.query_events(filter).await {
        Ok(stream) => stream,
        Err(err) => {
            sink.emit(TelemetryEvent::ForwarderError {
                err: err.to_string(),
                context: "query_failure",
                severity: Severity::Warning,
                t: clock.now_unix(),
            });
            return Err(SyncWindowError::Retry);
        }
    };

    let mut event_count: u64 = 0;
    while let Some(item) = stream.next().await {
        if cancel.is_cancelled() {
            return Err(SyncWindowError::Canceled);
        }
        let event = match item {
            Ok(event) => event,
            Err(err) => {
                sink.emit(TelemetryEvent::ForwarderError {
                    err: err.to_string(),
                    context: "event_validation",
                    severity: Severity::Info,
                    t: clock.now_unix(),
                });
                continue;
            }
        };

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
                event_count += 1;
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
    }

    match window_manager.update(w).await {
        Ok(()) => {
            tracing::info!(from = w.from, to = w.to, event_count, "window synced");
            Ok(())
        }
        Err(err) => {
            sink.emit(TelemetryEvent::ForwarderError {
                err: err.to_string(),
                context: "sync_update",
                severity: Severity::Warning,
                t: clock.now_unix(),
            });
            // A checkpoint persistence failure forces a reconnect. If the
            // reconnect itself exhausts retries that is fatal; otherwise the
            // window is simply retried like any other SyncWindow failure.
            if let Err(reconnect_err) = connection_manager.reconnect().await {
                return Err(SyncWindowError::ReconnectExhausted(reconnect_err));
            }
            Err(SyncWindowError::Retry)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_switch_triggers_once_window_reaches_tolerance_of_now() {
        let w = Window { from: 95, to: 100 };
        assert!(should_switch_to_realtime(w, 103, 5));
        assert!(!should_switch_to_realtime(w, 90, 5));
    }
}
