use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::ForwarderError;
use crate::relay::ws_client::TungsteniteRelayClient;
use crate::relay::RelayClient;
use crate::telemetry::{RelayRole, Severity, TelemetryEvent, TelemetrySink};

const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// How `ConnectionManager` opens a single relay session. The production
/// path goes over `tokio-tungstenite`; tests substitute a double so retry
/// and reconnect behavior can be exercised without a real socket, the same
/// way `Clock` and `Signer` are injected elsewhere in this core.
#[async_trait::async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        publish_timeout: Duration,
        subscribe_timeout: Duration,
    ) -> Result<Arc<dyn RelayClient>, ForwarderError>;
}

/// Production connector: opens a `TungsteniteRelayClient` over the wire.
pub struct TungsteniteConnector;

#[async_trait::async_trait]
impl RelayConnector for TungsteniteConnector {
    async fn connect(
        &self,
        url: &str,
        publish_timeout: Duration,
        subscribe_timeout: Duration,
    ) -> Result<Arc<dyn RelayClient>, ForwarderError> {
        let client =
            TungsteniteRelayClient::connect_with_timeouts(url, publish_timeout, subscribe_timeout)
                .await?;
        Ok(Arc::new(client))
    }
}

/// Establishes and re-establishes the source and downstream relay sessions,
/// with bounded retry: up to 3 attempts per relay, sleeping `attempt * 2s`
/// between attempts.
pub struct ConnectionManager {
    source_url: String,
    deepfry_url: String,
    sink: TelemetrySink,
    clock: Arc<dyn Clock>,
    publish_timeout: Duration,
    subscribe_timeout: Duration,
    connector: Arc<dyn RelayConnector>,
    source: RwLock<Option<Arc<dyn RelayClient>>>,
    deepfry: RwLock<Option<Arc<dyn RelayClient>>>,
    ready: Arc<AtomicBool>,
}

impl ConnectionManager {
    pub fn new(
        source_url: String,
        deepfry_url: String,
        sink: TelemetrySink,
        clock: Arc<dyn Clock>,
        publish_timeout: Duration,
        subscribe_timeout: Duration,
    ) -> Self {
        Self::with_connector(
            source_url,
            deepfry_url,
            sink,
            clock,
            publish_timeout,
            subscribe_timeout,
            Arc::new(TungsteniteConnector),
        )
    }

    pub fn with_connector(
        source_url: String,
        deepfry_url: String,
        sink: TelemetrySink,
        clock: Arc<dyn Clock>,
        publish_timeout: Duration,
        subscribe_timeout: Duration,
        connector: Arc<dyn RelayConnector>,
    ) -> Self {
        Self {
            source_url,
            deepfry_url,
            sink,
            clock,
            publish_timeout,
            subscribe_timeout,
            connector,
            source: RwLock::new(None),
            deepfry: RwLock::new(None),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A flag that flips to true once both relays have completed their
    /// initial `connect()`, for the ambient status server's `/readyz`.
    pub fn readiness_flag(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    pub async fn connect(&self) -> Result<(), ForwarderError> {
        let source = self
            .connect_one(&self.source_url, RelayRole::Source, "source")
            .await?;
        *self.source.write().await = Some(source);

        let deepfry = self
            .connect_one(&self.deepfry_url, RelayRole::Deepfry, "deepfry")
            .await?;
        *self.deepfry.write().await = Some(deepfry);

        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn reconnect(&self) -> Result<(), ForwarderError> {
        self.close().await;
        self.connect().await
    }

    pub async fn close(&self) {
        if let Some(source) = self.source.write().await.take() {
            let _ = source.close().await;
            self.emit_status(RelayRole::Source, false);
        }
        if let Some(deepfry) = self.deepfry.write().await.take() {
            let _ = deepfry.close().await;
            self.emit_status(RelayRole::Deepfry, false);
        }
    }

    pub async fn source(&self) -> Result<Arc<dyn RelayClient>, ForwarderError> {
        self.source
            .read()
            .await
            .clone()
            .ok_or_else(|| ForwarderError::QueryFailure("source relay not connected".into()))
    }

    pub async fn deepfry(&self) -> Result<Arc<dyn RelayClient>, ForwarderError> {
        self.deepfry
            .read()
            .await
            .clone()
            .ok_or_else(|| ForwarderError::QueryFailure("deepfry relay not connected".into()))
    }

    async fn connect_one(
        &self,
        url: &str,
        role: RelayRole,
        label: &'static str,
    ) -> Result<Arc<dyn RelayClient>, ForwarderError> {
        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            match self
                .connector
                .connect(url, self.publish_timeout, self.subscribe_timeout)
                .await
            {
                Ok(client) => {
                    self.emit_status(role, true);
                    return Ok(client);
                }
                Err(err) => {
                    self.sink.emit(TelemetryEvent::ForwarderError {
                        err: format!(
                            "attempt {attempt}/{MAX_CONNECT_ATTEMPTS} connecting to {label}: {err}"
                        ),
                        context: "connect_attempt",
                        severity: Severity::Error,
                        t: self.clock.now_unix(),
                    });
                    tracing::warn!(relay = label, attempt, max = MAX_CONNECT_ATTEMPTS, error = %err, "connection attempt failed");
                    self.emit_status(role, false);
                    if attempt < MAX_CONNECT_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(attempt as u64 * 2)).await;
                    }
                }
            }
        }
        Err(ForwarderError::ConnectExhausted {
            relay: label,
            attempts: MAX_CONNECT_ATTEMPTS,
        })
    }

    fn emit_status(&self, relay: RelayRole, connected: bool) {
        self.sink.emit(TelemetryEvent::ConnectionStatusChanged {
            relay,
            connected,
            t: self.clock.now_unix(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::telemetry::sink;
    use std::sync::atomic::AtomicU32;

    struct AlwaysFailsConnector {
        attempts: AtomicU32,
    }

    #[async_trait::async_trait]
    impl RelayConnector for AlwaysFailsConnector {
        async fn connect(
            &self,
            _url: &str,
            _publish_timeout: Duration,
            _subscribe_timeout: Duration,
        ) -> Result<Arc<dyn RelayClient>, ForwarderError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ForwarderError::QueryFailure("refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_retries_is_fatal_after_three_attempts() {
        let connector = Arc::new(AlwaysFailsConnector {
            attempts: AtomicU32::new(0),
        });
        let (sink, _rx) = sink::channel(16);
        let manager = ConnectionManager::with_connector(
            "wss://source.example".into(),
            "wss://deepfry.example".into(),
            sink,
            Arc::new(FakeClock::new(1_700_000_000)),
            Duration::from_secs(1),
            Duration::from_secs(1),
            connector.clone(),
        );

        let result = manager.connect().await;
        assert!(matches!(
            result,
            Err(ForwarderError::ConnectExhausted { attempts: 3, .. })
        ));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    }

    struct SucceedsAfterNFailures {
        remaining_failures: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl RelayConnector for SucceedsAfterNFailures {
        async fn connect(
            &self,
            _url: &str,
            _publish_timeout: Duration,
            _subscribe_timeout: Duration,
        ) -> Result<Arc<dyn RelayClient>, ForwarderError> {
            if self.remaining_failures.load(Ordering::SeqCst) > 0 {
                self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ForwarderError::QueryFailure("refused".into()));
            }
            Ok(Arc::new(NoopRelayClient))
        }
    }

    struct NoopRelayClient;

    #[async_trait::async_trait]
    impl RelayClient for NoopRelayClient {
        async fn query_events(
            &self,
            _filter: crate::event::Filter,
        ) -> Result<crate::relay::EventStream, ForwarderError> {
            Ok(Box::pin(futures_util::stream::empty()))
        }

        async fn subscribe(
            &self,
            _filters: Vec<crate::event::Filter>,
        ) -> Result<crate::relay::SubscriptionStream, ForwarderError> {
            Ok(Box::pin(futures_util::stream::empty()))
        }

        async fn publish(&self, _event: &crate::event::Event) -> Result<(), ForwarderError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), ForwarderError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_the_three_attempt_budget() {
        let connector = Arc::new(SucceedsAfterNFailures {
            remaining_failures: std::sync::atomic::AtomicU32::new(2),
        });
        let (sink, _rx) = sink::channel(16);
        let manager = ConnectionManager::with_connector(
            "wss://source.example".into(),
            "wss://deepfry.example".into(),
            sink,
            Arc::new(FakeClock::new(1_700_000_000)),
            Duration::from_secs(1),
            Duration::from_secs(1),
            connector,
        );

        manager.connect().await.expect("connects within budget");
        assert!(manager.source().await.is_ok());
        assert!(manager.deepfry().await.is_ok());
    }
}
