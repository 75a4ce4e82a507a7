pub mod aggregator;
pub mod events;
pub mod sink;

pub use aggregator::{Aggregator, Snapshot};
pub use events::{RelayRole, Severity, SyncMode, TelemetryEvent};
pub use sink::TelemetrySink;
