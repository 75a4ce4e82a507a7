pub mod ws_client;

use std::pin::Pin;

use futures_util::Stream;

use crate::error::ForwarderError;
use crate::event::{Event, Filter};

/// One item yielded by a live subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Event(Event),
    /// The relay signaled end-of-stored-events; realtime subscriptions
    /// continue listening past this point.
    EndOfStoredEvents,
    /// The relay closed the subscription. Carries the relay-reported reason
    /// where available.
    Closed(String),
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, ForwarderError>> + Send>>;
pub type SubscriptionStream = Pin<Box<dyn Stream<Item = SubscriptionEvent> + Send>>;

/// The shape of relay session this core depends on: a bounded historical
/// query, a live subscription, a publish call, and a close.
///
/// Implemented externally to the core; `ws_client::TungsteniteRelayClient`
/// is the one concrete implementation shipped alongside it.
#[async_trait::async_trait]
pub trait RelayClient: Send + Sync {
    /// A lazy, bounded stream of historical events matching `filter`,
    /// terminating once the relay has delivered all stored matches.
    async fn query_events(&self, filter: Filter) -> Result<EventStream, ForwarderError>;

    /// Opens a live subscription over the given filters.
    async fn subscribe(&self, filters: Vec<Filter>) -> Result<SubscriptionStream, ForwarderError>;

    /// Publishes a single event, waiting for relay acknowledgement.
    async fn publish(&self, event: &Event) -> Result<(), ForwarderError>;

    /// Best-effort close of the underlying session.
    async fn close(&self) -> Result<(), ForwarderError>;
}
