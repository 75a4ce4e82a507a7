use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::{RelayRole, Severity, SyncMode, TelemetryEvent};
use super::sink::{self, TelemetrySink, DEFAULT_CHANNEL_CAPACITY};
use crate::clock::Clock;

const RATE_WINDOW_SECONDS: i64 = 10;
const LATENCY_RING_CAPACITY: usize = 100;
const MAX_RECENT_ERRORS: usize = 50;

/// An internally consistent, immutable view of aggregator state, returned
/// by `Aggregator::snapshot`.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub events_received: u64,
    pub events_forwarded: u64,
    pub errors_total: u64,
    pub events_forwarded_by_kind: HashMap<u32, u64>,
    pub errors_by_type: HashMap<String, u64>,
    pub errors_by_severity: HashMap<Severity, u64>,
    /// Newest first.
    pub recent_errors: Vec<String>,
    pub events_per_second: f64,
    pub forwards_per_second: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub source_connected: bool,
    pub deepfry_connected: bool,
    pub sync_window_from: i64,
    pub sync_window_to: i64,
    pub sync_lag_seconds: i64,
    pub mode: Option<SyncMode>,
    pub uptime_seconds: i64,
    pub channel_utilization_percent: f64,
}

struct State {
    events_received: u64,
    events_forwarded: u64,
    errors_total: u64,
    events_forwarded_by_kind: HashMap<u32, u64>,
    errors_by_type: HashMap<String, u64>,
    errors_by_severity: HashMap<Severity, u64>,
    recent_errors: [Option<String>; MAX_RECENT_ERRORS],
    error_index: usize,
    receive_rate_ring: VecDeque<i64>,
    forward_rate_ring: VecDeque<i64>,
    latency_ring: [u64; LATENCY_RING_CAPACITY],
    latency_index: usize,
    latency_filled: usize,
    source_connected: bool,
    deepfry_connected: bool,
    sync_window_from: i64,
    sync_window_to: i64,
    mode: Option<SyncMode>,
    start_time: i64,
}

impl State {
    fn new(start_time: i64) -> Self {
        Self {
            events_received: 0,
            events_forwarded: 0,
            errors_total: 0,
            events_forwarded_by_kind: HashMap::new(),
            errors_by_type: HashMap::new(),
            errors_by_severity: HashMap::new(),
            recent_errors: std::array::from_fn(|_| None),
            error_index: 0,
            receive_rate_ring: VecDeque::new(),
            forward_rate_ring: VecDeque::new(),
            latency_ring: [0; LATENCY_RING_CAPACITY],
            latency_index: 0,
            latency_filled: 0,
            source_connected: false,
            deepfry_connected: false,
            sync_window_from: 0,
            sync_window_to: 0,
            mode: None,
            start_time,
        }
    }

    fn fold(&mut self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::EventReceived { t, .. } => {
                self.events_received += 1;
                push_rate_ring(&mut self.receive_rate_ring, t);
            }
            TelemetryEvent::EventForwarded {
                kind, latency_ms, t, ..
            } => {
                self.events_forwarded += 1;
                *self.events_forwarded_by_kind.entry(kind).or_insert(0) += 1;
                push_rate_ring(&mut self.forward_rate_ring, t);
                self.latency_ring[self.latency_index] = latency_ms;
                self.latency_index = (self.latency_index + 1) % LATENCY_RING_CAPACITY;
                self.latency_filled = (self.latency_filled + 1).min(LATENCY_RING_CAPACITY);
            }
            TelemetryEvent::ConnectionStatusChanged { relay, connected, .. } => match relay {
                RelayRole::Source => self.source_connected = connected,
                RelayRole::Deepfry => self.deepfry_connected = connected,
            },
            TelemetryEvent::SyncProgressUpdated { from, to, .. } => {
                self.sync_window_from = from;
                self.sync_window_to = to;
            }
            TelemetryEvent::SyncModeChanged { mode, .. } => {
                self.mode = Some(mode);
            }
            TelemetryEvent::ForwarderError {
                err,
                context,
                severity,
                ..
            } => {
                self.errors_total += 1;
                *self.errors_by_type.entry(context.to_string()).or_insert(0) += 1;
                *self.errors_by_severity.entry(severity).or_insert(0) += 1;
                self.recent_errors[self.error_index] = Some(err);
                self.error_index = (self.error_index + 1) % MAX_RECENT_ERRORS;
            }
            TelemetryEvent::RealtimeProgressUpdated { .. } => {}
        }
    }

    fn snapshot(&self, now: i64, channel_utilization_percent: f64) -> Snapshot {
        let events_per_second =
            count_in_window(&self.receive_rate_ring, now) as f64 / RATE_WINDOW_SECONDS as f64;
        let forwards_per_second =
            count_in_window(&self.forward_rate_ring, now) as f64 / RATE_WINDOW_SECONDS as f64;

        let mut nonzero: Vec<u64> = self.latency_ring[..self.latency_filled]
            .iter()
            .copied()
            .filter(|l| *l > 0)
            .collect();
        let avg_latency_ms = if nonzero.is_empty() {
            0.0
        } else {
            nonzero.iter().sum::<u64>() as f64 / nonzero.len() as f64
        };
        let p95_latency_ms = if nonzero.is_empty() {
            0.0
        } else {
            nonzero.sort_unstable();
            let idx = ((0.95 * nonzero.len() as f64) as usize).min(nonzero.len() - 1);
            nonzero[idx] as f64
        };

        let sync_lag_seconds = if self.sync_window_to > 0 {
            (now - self.sync_window_to).max(0)
        } else {
            0
        };

        let mut recent_errors: Vec<String> = Vec::new();
        for i in 0..MAX_RECENT_ERRORS {
            let idx = (self.error_index + MAX_RECENT_ERRORS - 1 - i) % MAX_RECENT_ERRORS;
            if let Some(e) = &self.recent_errors[idx] {
                recent_errors.push(e.clone());
            }
        }

        Snapshot {
            events_received: self.events_received,
            events_forwarded: self.events_forwarded,
            errors_total: self.errors_total,
            events_forwarded_by_kind: self.events_forwarded_by_kind.clone(),
            errors_by_type: self.errors_by_type.clone(),
            errors_by_severity: self.errors_by_severity.clone(),
            recent_errors,
            events_per_second,
            forwards_per_second,
            avg_latency_ms,
            p95_latency_ms,
            source_connected: self.source_connected,
            deepfry_connected: self.deepfry_connected,
            sync_window_from: self.sync_window_from,
            sync_window_to: self.sync_window_to,
            sync_lag_seconds,
            mode: self.mode,
            uptime_seconds: (now - self.start_time).max(0),
            channel_utilization_percent,
        }
    }
}

fn push_rate_ring(ring: &mut VecDeque<i64>, t: i64) {
    ring.push_back(t);
    while let Some(front) = ring.front() {
        if *front < t - RATE_WINDOW_SECONDS {
            ring.pop_front();
        } else {
            break;
        }
    }
}

fn count_in_window(ring: &VecDeque<i64>, now: i64) -> usize {
    ring.iter()
        .filter(|t| **t >= now - RATE_WINDOW_SECONDS && **t <= now)
        .count()
}

/// The single-writer telemetry worker. Owns all counters; readers only ever
/// see copies via `snapshot()`.
pub struct Aggregator {
    state: Arc<RwLock<State>>,
    sink: TelemetrySink,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Aggregator {
    /// Starts the worker task and returns the aggregator handle plus the
    /// sink every emitting task should clone.
    pub fn start(clock: Arc<dyn Clock>) -> (Self, TelemetrySink) {
        Self::start_with_capacity(clock, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn start_with_capacity(clock: Arc<dyn Clock>, capacity: usize) -> (Self, TelemetrySink) {
        let (tx, rx) = sink::channel(capacity);
        let state = Arc::new(RwLock::new(State::new(clock.now_unix())));
        let cancel = CancellationToken::new();

        let worker_state = state.clone();
        let worker_cancel = cancel.clone();
        let worker = tokio::spawn(run_worker(worker_state, rx, worker_cancel));

        let sink_for_utilization = tx.clone();
        (
            Self {
                state,
                sink: sink_for_utilization,
                clock,
                cancel,
                worker: tokio::sync::Mutex::new(Some(worker)),
            },
            tx,
        )
    }

    pub async fn snapshot(&self) -> Snapshot {
        let now = self.clock.now_unix();
        let utilization = self.sink.channel_utilization_percent();
        self.state.read().await.snapshot(now, utilization)
    }

    /// Signals the worker to stop and waits for it to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    state: Arc<RwLock<State>>,
    mut rx: mpsc::Receiver<TelemetryEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        let mut guard = state.write().await;
                        guard.fold(event);
                    }
                    None => break,
                }
            }
        }
    }
}
