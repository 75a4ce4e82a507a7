/// Shared in-memory `RelayClient` double for integration tests. Lets each
/// test script exactly which historical results, publish outcomes, and live
/// subscription events a relay produces, without a real network.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::stream;
use deepfry_forwarder::connection::RelayConnector;
use deepfry_forwarder::error::ForwarderError;
use deepfry_forwarder::event::{Event, Filter, CHECKPOINT_KIND};
use deepfry_forwarder::relay::{EventStream, RelayClient, SubscriptionEvent, SubscriptionStream};
use tokio::sync::mpsc;

pub struct FakeRelayClient {
    /// Queued historical result batches, consumed one per `query_events` call.
    query_queue: Mutex<VecDeque<Result<Vec<Event>, ForwarderError>>>,
    /// The most recently published replaceable checkpoint event, served back
    /// to checkpoint-filtered queries once the queue above is drained.
    last_checkpoint: Mutex<Option<Event>>,
    /// Queued publish outcomes, consumed one per `publish` call; defaults to
    /// `Ok(())` once exhausted.
    publish_queue: Mutex<VecDeque<Result<(), ForwarderError>>>,
    /// When set, every publish of a non-checkpoint event fails with this
    /// error while checkpoint (kind 30078) publishes still succeed — models
    /// S3 (downstream rejects events but accepts the replaceable record).
    reject_non_checkpoint: Mutex<Option<String>>,
    pub published: Mutex<Vec<Event>>,
    /// One entry consumed per `subscribe` call, in order; lets a test script
    /// a fresh live-subscription stream for each reconnect (S6).
    subscription_queue: Mutex<VecDeque<mpsc::UnboundedReceiver<SubscriptionEvent>>>,
    /// One outcome consumed per `subscribe` call; `Ok` falls through to the
    /// subscription queue above.
    subscribe_results: Mutex<VecDeque<Result<(), ForwarderError>>>,
}

impl FakeRelayClient {
    pub fn new() -> Self {
        Self {
            query_queue: Mutex::new(VecDeque::new()),
            last_checkpoint: Mutex::new(None),
            publish_queue: Mutex::new(VecDeque::new()),
            reject_non_checkpoint: Mutex::new(None),
            published: Mutex::new(Vec::new()),
            subscription_queue: Mutex::new(VecDeque::new()),
            subscribe_results: Mutex::new(VecDeque::new()),
        }
    }

    pub fn queue_query_result(&self, events: Vec<Event>) {
        self.query_queue.lock().unwrap().push_back(Ok(events));
    }

    pub fn queue_query_failure(&self, err: ForwarderError) {
        self.query_queue.lock().unwrap().push_back(Err(err));
    }

    pub fn queue_publish_failure(&self, err: ForwarderError) {
        self.publish_queue.lock().unwrap().push_back(Err(err));
    }

    /// Every non-checkpoint publish fails from now on; checkpoint
    /// (kind 30078) publishes are unaffected.
    pub fn reject_non_checkpoint_publishes(&self, reason: &str) {
        *self.reject_non_checkpoint.lock().unwrap() = Some(reason.to_string());
    }

    pub fn seed_checkpoint(&self, event: Event) {
        *self.last_checkpoint.lock().unwrap() = Some(event);
    }

    /// Queues a live-subscription stream fed by `rx`'s paired sender, to be
    /// handed out on the next `subscribe` call.
    pub fn queue_subscription(&self, rx: mpsc::UnboundedReceiver<SubscriptionEvent>) {
        self.subscription_queue.lock().unwrap().push_back(rx);
    }

    pub fn queue_subscribe_failure(&self, err: ForwarderError) {
        self.subscribe_results.lock().unwrap().push_back(Err(err));
    }
}

impl Default for FakeRelayClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RelayClient for FakeRelayClient {
    async fn query_events(&self, filter: Filter) -> Result<EventStream, ForwarderError> {
        if let Some(result) = self.query_queue.lock().unwrap().pop_front() {
            let events = result?;
            return Ok(Box::pin(stream! {
                for event in events {
                    yield Ok(event);
                }
            }));
        }

        let wants_checkpoint = filter
            .kinds
            .as_ref()
            .is_some_and(|kinds| kinds.contains(&CHECKPOINT_KIND));
        if wants_checkpoint {
            if let Some(checkpoint) = self.last_checkpoint.lock().unwrap().clone() {
                return Ok(Box::pin(stream! { yield Ok(checkpoint); }));
            }
        }

        Ok(Box::pin(stream! {}))
    }

    async fn subscribe(&self, _filters: Vec<Filter>) -> Result<SubscriptionStream, ForwarderError> {
        if let Some(result) = self.subscribe_results.lock().unwrap().pop_front() {
            result?;
        }
        let rx = self.subscription_queue.lock().unwrap().pop_front();
        let Some(mut rx) = rx else {
            return Ok(Box::pin(stream! {}));
        };
        Ok(Box::pin(stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        }))
    }

    async fn publish(&self, event: &Event) -> Result<(), ForwarderError> {
        if event.kind != CHECKPOINT_KIND {
            if let Some(reason) = self.reject_non_checkpoint.lock().unwrap().clone() {
                return Err(ForwarderError::PublishFailure(reason));
            }
        }
        if let Some(result) = self.publish_queue.lock().unwrap().pop_front() {
            result?;
        }
        if event.kind == CHECKPOINT_KIND {
            *self.last_checkpoint.lock().unwrap() = Some(event.clone());
        }
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), ForwarderError> {
        Ok(())
    }
}

pub fn sample_event(id: &str, kind: u32, created_at: i64) -> Event {
    Event {
        id: id.to_string(),
        pubkey: "a".repeat(64),
        created_at,
        kind,
        tags: vec![],
        content: String::new(),
        sig: "b".repeat(128),
    }
}

/// A `RelayConnector` that hands out pre-built `FakeRelayClient`s (or a
/// connect failure) in sequence, letting tests drive `ConnectionManager`
/// through retry/reconnect scenarios without a real socket.
pub struct FakeConnector {
    source_clients: Mutex<VecDeque<Arc<FakeRelayClient>>>,
    deepfry_clients: Mutex<VecDeque<Arc<FakeRelayClient>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            source_clients: Mutex::new(VecDeque::new()),
            deepfry_clients: Mutex::new(VecDeque::new()),
        }
    }

    /// Queues the client returned for the next `connect()`/`reconnect()`
    /// round. Both relay URLs are resolved through the same queues; push in
    /// the order source-then-deepfry per round.
    pub fn queue_source(&self, client: Arc<FakeRelayClient>) {
        self.source_clients.lock().unwrap().push_back(client);
    }

    pub fn queue_deepfry(&self, client: Arc<FakeRelayClient>) {
        self.deepfry_clients.lock().unwrap().push_back(client);
    }
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RelayConnector for FakeConnector {
    async fn connect(
        &self,
        url: &str,
        _publish_timeout: Duration,
        _subscribe_timeout: Duration,
    ) -> Result<Arc<dyn RelayClient>, ForwarderError> {
        let queue = if url.contains("source") {
            &self.source_clients
        } else {
            &self.deepfry_clients
        };
        let client = queue.lock().unwrap().pop_front();
        match client {
            Some(client) => Ok(client as Arc<dyn RelayClient>),
            None => Err(ForwarderError::QueryFailure(format!(
                "no fake client queued for {url}"
            ))),
        }
    }
}
