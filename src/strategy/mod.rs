pub mod realtime;
pub mod windowed;

use crate::error::ForwarderError;
use crate::window::Window;

/// How a strategy's run loop ended.
pub enum StrategyOutcome {
    /// The root cancellation token fired; clean shutdown.
    Canceled,
    /// Caught up to realtime; the orchestrator should run the realtime
    /// strategy next.
    SwitchToRealtime,
    /// Realtime failed and the orchestrator should re-resolve the
    /// checkpoint and re-enter windowed mode starting at `resume_from`.
    FallbackToWindowed { resume_from: Window },
    /// Unrecoverable; propagate and exit the process.
    Fatal(ForwarderError),
}
