use std::sync::Arc;

use crate::checkpoint::CheckpointStore;
use crate::clock::Clock;
use crate::error::ForwarderError;
use crate::window::Window;

/// Resolves the starting window from config or the last checkpoint, and
/// advances/persists windows thereafter. `d` is fixed for the process
/// lifetime.
pub struct WindowManager {
    checkpoint_store: CheckpointStore,
    clock: Arc<dyn Clock>,
    d: i64,
    explicit_start: Option<i64>,
}

impl WindowManager {
    pub fn new(
        checkpoint_store: CheckpointStore,
        clock: Arc<dyn Clock>,
        d: i64,
        explicit_start: Option<i64>,
    ) -> Self {
        Self {
            checkpoint_store,
            clock,
            d,
            explicit_start,
        }
    }

    pub async fn get_or_create(&self) -> Result<Window, ForwarderError> {
        if let Some(start) = self.explicit_start {
            return Window::from_start(start, self.d);
        }
        match self.checkpoint_store.get_last_window().await? {
            Some(last) => last.next(self.d),
            None => Window::aligned(self.clock.now_unix(), self.d),
        }
    }

    pub fn advance(&self, w: Window) -> Result<Window, ForwarderError> {
        w.next(self.d)
    }

    pub async fn update(&self, w: Window) -> Result<(), ForwarderError> {
        w.validate()?;
        self.checkpoint_store.update_window(w).await
    }

    pub fn window_duration(&self) -> i64 {
        self.d
    }
}
