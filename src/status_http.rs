use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::telemetry::Snapshot;

/// Ambient read-only status surface. Does not affect forwarding; readiness
/// here tracks relay connection establishment, not ongoing uplink health.
pub struct StatusServer {
    ready: Arc<AtomicBool>,
}

impl StatusServer {
    /// Owns its own readiness flag, never externally set. Useful for tests.
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Tracks an externally owned readiness flag, e.g. a `ConnectionManager`'s,
    /// so `/readyz` reflects actual relay connection state.
    pub fn with_readiness_flag(ready: Arc<AtomicBool>) -> Self {
        Self { ready }
    }

    /// Starts the server on `bind`, serving snapshots produced by
    /// `snapshot_fn` for as long as the returned task runs.
    pub fn start<F, Fut>(&self, bind: String, snapshot_fn: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Snapshot> + Send,
    {
        let ready = self.ready.clone();
        tokio::spawn(async move {
            let listener = match TcpListener::bind(&bind).await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!(bind, error = %err, "status http failed to bind");
                    return;
                }
            };
            tracing::info!(bind, "status http listening");
            loop {
                let (stream, _addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => continue,
                };
                let ready = ready.clone();
                let snapshot = snapshot_fn().await;
                tokio::spawn(serve_one(stream, ready, snapshot));
            }
        })
    }
}

impl Default for StatusServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn serve_one(mut stream: tokio::net::TcpStream, ready: Arc<AtomicBool>, snapshot: Snapshot) {
    let mut buf = [0u8; 1024];
    let n = match stream.read(&mut buf).await {
        Ok(n) => n,
        Err(_) => return,
    };
    let request = String::from_utf8_lossy(&buf[..n]);
    let request_line = request.lines().next().unwrap_or_default();

    let response = if request_line.starts_with("GET /healthz") {
        text_response(200, "ok", "text/plain")
    } else if request_line.starts_with("GET /readyz") {
        if ready.load(Ordering::SeqCst) {
            text_response(200, "ready", "text/plain")
        } else {
            text_response(503, "not ready", "text/plain")
        }
    } else if request_line.starts_with("GET /snapshot") {
        match serde_json::to_string(&SnapshotJson::from(&snapshot)) {
            Ok(body) => text_response(200, &body, "application/json"),
            Err(_) => text_response(500, "encode error", "text/plain"),
        }
    } else {
        text_response(404, "not found", "text/plain")
    };

    let _ = stream.write_all(response.as_bytes()).await;
}

fn text_response(status: u16, body: &str, content_type: &str) -> String {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    };
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// JSON-friendly mirror of `Snapshot`; kept separate so the aggregator's
/// internal type doesn't have to carry `Serialize` for this one consumer.
#[derive(serde::Serialize)]
struct SnapshotJson {
    events_received: u64,
    events_forwarded: u64,
    errors_total: u64,
    events_per_second: f64,
    forwards_per_second: f64,
    avg_latency_ms: f64,
    p95_latency_ms: f64,
    source_connected: bool,
    deepfry_connected: bool,
    sync_window_from: i64,
    sync_window_to: i64,
    sync_lag_seconds: i64,
    uptime_seconds: i64,
    channel_utilization_percent: f64,
}

impl From<&Snapshot> for SnapshotJson {
    fn from(s: &Snapshot) -> Self {
        Self {
            events_received: s.events_received,
            events_forwarded: s.events_forwarded,
            errors_total: s.errors_total,
            events_per_second: s.events_per_second,
            forwards_per_second: s.forwards_per_second,
            avg_latency_ms: s.avg_latency_ms,
            p95_latency_ms: s.p95_latency_ms,
            source_connected: s.source_connected,
            deepfry_connected: s.deepfry_connected,
            sync_window_from: s.sync_window_from,
            sync_window_to: s.sync_window_to,
            sync_lag_seconds: s.sync_lag_seconds,
            uptime_seconds: s.uptime_seconds,
            channel_utilization_percent: s.channel_utilization_percent,
        }
    }
}
