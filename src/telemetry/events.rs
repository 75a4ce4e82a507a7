use serde::{Deserialize, Serialize};

/// Severity of a `ForwarderError` telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Typed events carried over the telemetry sink, one per the aggregator's
/// folding rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    EventReceived {
        relay_url: String,
        kind: u32,
        id: String,
        t: i64,
    },
    EventForwarded {
        relay_url: String,
        kind: u32,
        latency_ms: u64,
        t: i64,
    },
    ConnectionStatusChanged {
        relay: RelayRole,
        connected: bool,
        t: i64,
    },
    SyncProgressUpdated {
        from: i64,
        to: i64,
        t: i64,
    },
    SyncModeChanged {
        mode: SyncMode,
        reason: String,
        t: i64,
    },
    ForwarderError {
        err: String,
        context: &'static str,
        severity: Severity,
        t: i64,
    },
    RealtimeProgressUpdated {
        events_since_update: u64,
        t: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayRole {
    Source,
    Deepfry,
}

/// Current sync mode, mirrored into telemetry snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Windowed,
    Realtime,
}
