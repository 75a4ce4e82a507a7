use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use super::{EventStream, RelayClient, SubscriptionEvent, SubscriptionStream};
use crate::error::ForwarderError;
use crate::event::{Event, Filter};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One relay session over `tokio-tungstenite`, speaking the NIP-01
/// `REQ`/`EVENT`/`EOSE`/`CLOSE`/`OK` array framing.
///
/// A single background task owns the socket; callers talk to it through
/// bounded channels so publishes, subscriptions, and historical queries can
/// all be in flight concurrently without contending on the socket directly.
pub struct TungsteniteRelayClient {
    url: String,
    outgoing: mpsc::UnboundedSender<WsMessage>,
    state: std::sync::Arc<SharedState>,
    publish_timeout: Duration,
    subscribe_timeout: Duration,
}

struct SharedState {
    pending_oks: Mutex<HashMap<String, oneshot::Sender<Result<(), String>>>>,
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<SubscriptionEvent>>>,
}

impl TungsteniteRelayClient {
    pub async fn connect(url: &str) -> Result<Self, ForwarderError> {
        Self::connect_with_timeouts(url, Duration::from_secs(10), Duration::from_secs(10)).await
    }

    /// Connects with the per-operation RPC timeouts from `TimeoutConfig`
    /// (spec.md §6/§5): `publish_timeout` bounds waiting for the relay's
    /// `OK` acknowledgement, `subscribe_timeout` bounds waiting for the
    /// first response after a `REQ` (the relay establishing the
    /// subscription at all), not the lifetime of an established live
    /// stream.
    pub async fn connect_with_timeouts(
        url: &str,
        publish_timeout: Duration,
        subscribe_timeout: Duration,
    ) -> Result<Self, ForwarderError> {
        let request = url.into_client_request().map_err(|e| {
            ForwarderError::QueryFailure(format!("invalid relay url {url}: {e}"))
        })?;
        let (ws_stream, _resp) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ForwarderError::QueryFailure(format!("connect to {url} failed: {e}")))?;

        let state = std::sync::Arc::new(SharedState {
            pending_oks: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
        });
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        spawn_io_task(ws_stream, outgoing_rx, state.clone());

        Ok(Self {
            url: url.to_string(),
            outgoing: outgoing_tx,
            state,
            publish_timeout,
            subscribe_timeout,
        })
    }

    fn send_json(&self, value: serde_json::Value) -> Result<(), ForwarderError> {
        let text = serde_json::to_string(&value)
            .map_err(|e| ForwarderError::PublishFailure(format!("encode failed: {e}")))?;
        self.outgoing
            .send(WsMessage::Text(text.into()))
            .map_err(|_| ForwarderError::PublishFailure("relay connection closed".into()))
    }
}

fn spawn_io_task(
    ws_stream: WsStream,
    mut outgoing_rx: mpsc::UnboundedReceiver<WsMessage>,
    state: std::sync::Arc<SharedState>,
) {
    tokio::spawn(async move {
        let (mut sink, mut stream) = ws_stream.split();
        loop {
            tokio::select! {
                outgoing = outgoing_rx.recv() => {
                    match outgoing {
                        Some(msg) => {
                            if sink.send(msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => handle_incoming(&text, &state),
                        Some(Ok(WsMessage::Ping(payload))) => {
                            let _ = sink.send(WsMessage::Pong(payload)).await;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(_)) => break,
                    }
                }
            }
        }
        close_all_subscriptions(&state, "relay connection closed");
    });
}

fn close_all_subscriptions(state: &SharedState, reason: &str) {
    let subs = std::mem::take(&mut *state.subscriptions.lock().expect("subscriptions lock"));
    for (_, tx) in subs {
        let _ = tx.send(SubscriptionEvent::Closed(reason.to_string()));
    }
}

fn handle_incoming(text: &str, state: &SharedState) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return,
    };
    let arr = match value.as_array() {
        Some(a) if !a.is_empty() => a,
        _ => return,
    };
    let Some(label) = arr[0].as_str() else {
        return;
    };
    match label {
        "EVENT" => {
            if arr.len() < 3 {
                return;
            }
            let Some(sub_id) = arr[1].as_str() else {
                return;
            };
            if let Ok(event) = serde_json::from_value::<Event>(arr[2].clone()) {
                if let Some(tx) = state.subscriptions.lock().expect("lock").get(sub_id) {
                    let _ = tx.send(SubscriptionEvent::Event(event));
                }
            }
        }
        "EOSE" => {
            if let Some(sub_id) = arr.get(1).and_then(|v| v.as_str()) {
                if let Some(tx) = state.subscriptions.lock().expect("lock").get(sub_id) {
                    let _ = tx.send(SubscriptionEvent::EndOfStoredEvents);
                }
            }
        }
        "CLOSED" => {
            if let Some(sub_id) = arr.get(1).and_then(|v| v.as_str()) {
                let reason = arr
                    .get(2)
                    .and_then(|v| v.as_str())
                    .unwrap_or("closed")
                    .to_string();
                if let Some(tx) = state
                    .subscriptions
                    .lock()
                    .expect("lock")
                    .remove(sub_id)
                {
                    let _ = tx.send(SubscriptionEvent::Closed(reason));
                }
            }
        }
        "OK" => {
            if arr.len() < 3 {
                return;
            }
            let Some(event_id) = arr[1].as_str() else {
                return;
            };
            let accepted = arr[2].as_bool().unwrap_or(false);
            let message = arr
                .get(3)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if let Some(tx) = state
                .pending_oks
                .lock()
                .expect("lock")
                .remove(event_id)
            {
                let result = if accepted { Ok(()) } else { Err(message) };
                let _ = tx.send(result);
            }
        }
        "NOTICE" => {}
        _ => {}
    }
}

#[async_trait::async_trait]
impl RelayClient for TungsteniteRelayClient {
    async fn query_events(&self, filter: Filter) -> Result<EventStream, ForwarderError> {
        let sub_id = Uuid::new_v4().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.state
            .subscriptions
            .lock()
            .expect("lock")
            .insert(sub_id.clone(), tx);

        self.send_json(serde_json::json!(["REQ", sub_id, filter]))?;

        let state = self.state.clone();
        let close_sub_id = sub_id.clone();
        let outgoing = self.outgoing.clone();
        let subscribe_timeout = self.subscribe_timeout;
        let stream = async_stream::stream! {
            loop {
                match tokio::time::timeout(subscribe_timeout, rx.recv()).await {
                    Ok(Some(SubscriptionEvent::Event(event))) => yield Ok(event),
                    Ok(Some(SubscriptionEvent::EndOfStoredEvents)) => break,
                    Ok(Some(SubscriptionEvent::Closed(reason))) => {
                        yield Err(ForwarderError::QueryFailure(reason));
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        yield Err(ForwarderError::QueryFailure(
                            "historical query timed out waiting for relay".into(),
                        ));
                        break;
                    }
                }
            }
            state.subscriptions.lock().expect("lock").remove(&close_sub_id);
            let _ = outgoing.send(WsMessage::Text(
                serde_json::to_string(&serde_json::json!(["CLOSE", close_sub_id])).unwrap().into(),
            ));
        };
        Ok(Box::pin(stream))
    }

    async fn subscribe(&self, filters: Vec<Filter>) -> Result<SubscriptionStream, ForwarderError> {
        let sub_id = Uuid::new_v4().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.state
            .subscriptions
            .lock()
            .expect("lock")
            .insert(sub_id.clone(), tx);

        let mut req = vec![serde_json::json!("REQ"), serde_json::json!(sub_id)];
        for f in filters {
            req.push(serde_json::to_value(f).expect("filter serializes"));
        }
        self.send_json(serde_json::Value::Array(req))?;

        // The subscribe RPC timeout guards only establishment (the relay's
        // first reply to our REQ); once a live subscription is up it has no
        // per-event deadline, since idle periods between events are normal.
        match tokio::time::timeout(self.subscribe_timeout, rx.recv()).await {
            Ok(Some(first)) => {
                let is_closed = matches!(first, SubscriptionEvent::Closed(_));
                let stream = async_stream::stream! {
                    yield first;
                    if !is_closed {
                        while let Some(item) = rx.recv().await {
                            let is_closed = matches!(item, SubscriptionEvent::Closed(_));
                            yield item;
                            if is_closed {
                                break;
                            }
                        }
                    }
                };
                Ok(Box::pin(stream))
            }
            Ok(None) => Err(ForwarderError::SubscribeFailed(
                "relay closed connection before subscribing".into(),
            )),
            Err(_) => {
                self.state.subscriptions.lock().expect("lock").remove(&sub_id);
                Err(ForwarderError::SubscribeFailed(
                    "timed out waiting for relay to acknowledge subscription".into(),
                ))
            }
        }
    }

    async fn publish(&self, event: &Event) -> Result<(), ForwarderError> {
        let (tx, rx) = oneshot::channel();
        self.state
            .pending_oks
            .lock()
            .expect("lock")
            .insert(event.id.clone(), tx);
        self.send_json(serde_json::json!(["EVENT", event]))?;
        match tokio::time::timeout(self.publish_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(msg))) => Err(ForwarderError::PublishFailure(msg)),
            Ok(Err(_)) => Err(ForwarderError::PublishFailure(format!(
                "relay {} closed before acking {}",
                self.url, event.id
            ))),
            Err(_) => {
                self.state.pending_oks.lock().expect("lock").remove(&event.id);
                Err(ForwarderError::PublishFailure(format!(
                    "relay {} timed out acking {}",
                    self.url, event.id
                )))
            }
        }
    }

    async fn close(&self) -> Result<(), ForwarderError> {
        let _ = self.outgoing.send(WsMessage::Close(None));
        Ok(())
    }
}
