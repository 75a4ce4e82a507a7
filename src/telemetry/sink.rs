use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::events::TelemetryEvent;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// The non-blocking fan-in half of the telemetry channel. Cloned freely by
/// every task that needs to emit telemetry; the hot forwarding path must
/// never suspend on this.
///
/// If the channel is full the event is dropped — the one place in the
/// system where loss is tolerated, per design.
#[derive(Clone)]
pub struct TelemetrySink {
    tx: mpsc::Sender<TelemetryEvent>,
    dropped: Arc<AtomicU64>,
}

impl TelemetrySink {
    pub fn new(tx: mpsc::Sender<TelemetryEvent>, dropped: Arc<AtomicU64>) -> Self {
        Self { tx, dropped }
    }

    /// Attempts to enqueue `event`; drops it silently if the channel is
    /// full rather than ever blocking the caller.
    pub fn emit(&self, event: TelemetryEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn channel_utilization_percent(&self) -> f64 {
        let max = self.tx.max_capacity();
        if max == 0 {
            return 0.0;
        }
        let in_flight = max.saturating_sub(self.tx.capacity());
        100.0 * (in_flight as f64) / (max as f64)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Builds a connected sink/receiver pair with the given bounded capacity.
pub fn channel(capacity: usize) -> (TelemetrySink, mpsc::Receiver<TelemetryEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (TelemetrySink::new(tx, dropped), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::events::{RelayRole, TelemetryEvent};

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = channel(1);
        sink.emit(TelemetryEvent::ConnectionStatusChanged {
            relay: RelayRole::Source,
            connected: true,
            t: 0,
        });
        // Channel now full; this one must be dropped, not block.
        sink.emit(TelemetryEvent::ConnectionStatusChanged {
            relay: RelayRole::Source,
            connected: false,
            t: 1,
        });
        assert_eq!(sink.dropped_count(), 1);
        let first = rx.recv().await.unwrap();
        match first {
            TelemetryEvent::ConnectionStatusChanged { connected, .. } => assert!(connected),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
