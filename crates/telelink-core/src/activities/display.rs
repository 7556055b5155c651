use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::state::SharedState;
use crate::traits::DisplaySink;

/// Redraws the display whenever the change signal is raised.
pub struct DisplayRefresher {
    sink: Arc<dyn DisplaySink>,
    state: Arc<SharedState>,
}

impl DisplayRefresher {
    /// Create a refresher.
    pub fn new(sink: Arc<dyn DisplaySink>, state: Arc<SharedState>) -> Self {
        Self { sink, state }
    }

    /// Draw once, then once per signal until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        self.refresh().await;
        while self.state.display.wait_or_cancel(&token).await {
            self.refresh().await;
        }
    }

    async fn refresh(&self) {
        let frame = self.state.frame().await;
        if let Err(e) = self.sink.render(&frame).await {
            warn!("Display refresh failed: {}", e);
        }
    }
}
