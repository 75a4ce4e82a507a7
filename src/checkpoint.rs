use std::sync::Arc;

use futures_util::StreamExt;

use crate::clock::Clock;
use crate::error::ForwarderError;
use crate::event::{Filter, UnsignedEvent, CHECKPOINT_KIND};
use crate::relay::RelayClient;
use crate::signing::Signer;
use crate::window::Window;

/// Reads and writes the single replaceable checkpoint event on the
/// downstream relay, keyed by `(signer pubkey, source relay URL)`.
pub struct CheckpointStore {
    downstream: Arc<dyn RelayClient>,
    signer: Arc<dyn Signer>,
    source_url: String,
    clock: Arc<dyn Clock>,
}

impl CheckpointStore {
    pub fn new(
        downstream: Arc<dyn RelayClient>,
        signer: Arc<dyn Signer>,
        source_url: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            downstream,
            signer,
            source_url,
            clock,
        }
    }

    /// Returns the last persisted window for this `(pubkey, source_url)`
    /// pair, or `None` if no checkpoint exists yet.
    pub async fn get_last_window(&self) -> Result<Option<Window>, ForwarderError> {
        let filter = Filter::checkpoint(self.signer.pubkey(), &self.source_url);
        let mut stream = self.downstream.query_events(filter).await?;
        let Some(result) = stream.next().await else {
            return Ok(None);
        };
        let event = result?;

        let from_str = event.tag_value("from").ok_or_else(|| {
            ForwarderError::MalformedCheckpoint("missing 'from' tag".into())
        })?;
        let to_str = event
            .tag_value("to")
            .ok_or_else(|| ForwarderError::MalformedCheckpoint("missing 'to' tag".into()))?;
        let from: i64 = from_str.parse().map_err(|_| {
            ForwarderError::MalformedCheckpoint(format!("'from' tag not an integer: {from_str}"))
        })?;
        let to: i64 = to_str.parse().map_err(|_| {
            ForwarderError::MalformedCheckpoint(format!("'to' tag not an integer: {to_str}"))
        })?;

        let window = Window { from, to };
        window.validate()?;
        Ok(Some(window))
    }

    /// Publishes a replaceable checkpoint event for `w`. Because the
    /// downstream relay treats `(kind=30078, pubkey, d)` as replaceable by
    /// `created_at`, repeated or superseding writes are safe.
    pub async fn update_window(&self, w: Window) -> Result<(), ForwarderError> {
        let unsigned = UnsignedEvent {
            pubkey: self.signer.pubkey().to_string(),
            created_at: self.clock.now_unix(),
            kind: CHECKPOINT_KIND,
            tags: vec![
                vec!["d".to_string(), self.source_url.clone()],
                vec!["from".to_string(), w.from.to_string()],
                vec!["to".to_string(), w.to.to_string()],
            ],
            content: String::new(),
        };
        let event = self.signer.sign(unsigned)?;
        self.downstream
            .publish(&event)
            .await
            .map_err(|e| ForwarderError::CheckpointPublishFailed(e.to_string()))
    }
}
