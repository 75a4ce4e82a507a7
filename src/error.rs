use std::fmt;

use crate::telemetry::Severity;

/// Semantic error kinds produced anywhere in the forwarding core.
///
/// Variants carry enough context to become a telemetry `ForwarderError`
/// event without any further lookup.
#[derive(Debug)]
pub enum ForwarderError {
    ConfigInvalid(String),
    KeyInvalid(String),
    ConnectExhausted { relay: &'static str, attempts: u32 },
    QueryFailure(String),
    PublishFailure(String),
    CheckpointPublishFailed(String),
    MalformedCheckpoint(String),
    SubscribeFailed(String),
    SubscriptionClosed(String),
    NilEvent,
    Canceled,
}

impl ForwarderError {
    /// Telemetry severity this error maps to, per the error taxonomy.
    pub fn severity(&self) -> Severity {
        match self {
            ForwarderError::NilEvent => Severity::Info,
            ForwarderError::QueryFailure(_)
            | ForwarderError::PublishFailure(_)
            | ForwarderError::CheckpointPublishFailed(_)
            | ForwarderError::SubscriptionClosed(_) => Severity::Warning,
            ForwarderError::ConfigInvalid(_)
            | ForwarderError::KeyInvalid(_)
            | ForwarderError::MalformedCheckpoint(_) => Severity::Critical,
            ForwarderError::ConnectExhausted { .. } => Severity::Error,
            ForwarderError::SubscribeFailed(_) => Severity::Error,
            ForwarderError::Canceled => Severity::Info,
        }
    }

    /// Short context tag used as the telemetry `ForwarderError.context` field
    /// and as the `ErrorsByType` key in the aggregator.
    pub fn context(&self) -> &'static str {
        match self {
            ForwarderError::ConfigInvalid(_) => "config_invalid",
            ForwarderError::KeyInvalid(_) => "key_invalid",
            ForwarderError::ConnectExhausted { .. } => "connect_exhausted",
            ForwarderError::QueryFailure(_) => "query_failure",
            ForwarderError::PublishFailure(_) => "relay_publish",
            ForwarderError::CheckpointPublishFailed(_) => "sync_update",
            ForwarderError::MalformedCheckpoint(_) => "malformed_checkpoint",
            ForwarderError::SubscribeFailed(_) => "realtime_subscribe",
            ForwarderError::SubscriptionClosed(_) => "realtime_disconnect",
            ForwarderError::NilEvent => "event_validation",
            ForwarderError::Canceled => "canceled",
        }
    }

    /// True for the one variant that must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ForwarderError::ConfigInvalid(_)
                | ForwarderError::KeyInvalid(_)
                | ForwarderError::ConnectExhausted { .. }
                | ForwarderError::MalformedCheckpoint(_)
        )
    }
}

impl fmt::Display for ForwarderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwarderError::ConfigInvalid(msg) => write!(f, "invalid configuration: {msg}"),
            ForwarderError::KeyInvalid(msg) => write!(f, "invalid signer key: {msg}"),
            ForwarderError::ConnectExhausted { relay, attempts } => {
                write!(f, "{relay}: exhausted {attempts} connection attempts")
            }
            ForwarderError::QueryFailure(msg) => write!(f, "historical query failed: {msg}"),
            ForwarderError::PublishFailure(msg) => write!(f, "event publish failed: {msg}"),
            ForwarderError::CheckpointPublishFailed(msg) => {
                write!(f, "checkpoint publish failed: {msg}")
            }
            ForwarderError::MalformedCheckpoint(msg) => {
                write!(f, "existing checkpoint is malformed: {msg}")
            }
            ForwarderError::SubscribeFailed(msg) => write!(f, "realtime subscribe failed: {msg}"),
            ForwarderError::SubscriptionClosed(msg) => {
                write!(f, "realtime subscription closed: {msg}")
            }
            ForwarderError::NilEvent => write!(f, "relay yielded a nil event"),
            ForwarderError::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::error::Error for ForwarderError {}
