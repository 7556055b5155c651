//! Display sink that writes frames to the log.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use telelink_core::{DisplayFrame, DisplaySink, Result};

/// Logs each frame that differs from the previous one.
#[derive(Debug, Default)]
pub struct LogDisplay {
    last: Mutex<Option<DisplayFrame>>,
}

impl LogDisplay {
    /// Create a display with nothing shown yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The frame most recently rendered.
    pub fn last_frame(&self) -> Option<DisplayFrame> {
        self.last.lock().ok().and_then(|last| *last)
    }
}

#[async_trait]
impl DisplaySink for LogDisplay {
    async fn render(&self, frame: &DisplayFrame) -> Result<()> {
        let unchanged = match self.last.lock() {
            Ok(mut last) => {
                let unchanged = last.as_ref() == Some(frame);
                *last = Some(*frame);
                unchanged
            }
            Err(_) => false,
        };
        if !unchanged {
            info!(
                temperature = frame.temperature,
                setpoint = frame.setpoint,
                mode = frame.mode.as_str(),
                connected = frame.connected,
                "{}°F  set {}°F  {}  {}",
                frame.temperature,
                frame.setpoint,
                frame.mode.as_str(),
                if frame.connected { "online" } else { "offline" }
            );
        }
        Ok(())
    }
}
