use std::sync::Arc;

use chrono::Utc;
use frame_uplink_common::buffer::SharedBuffer;
use frame_uplink_common::frame::Frame;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::source::{CaptureError, CaptureSource, MediaStore};

/// Notifications for whoever presents capture results to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Captured { frame_id: u64 },
    Failed { message: String },
}

/// One capture end to end: camera → frame buffer → media library.
pub struct CapturePipeline {
    source: Arc<dyn CaptureSource>,
    store: Arc<dyn MediaStore>,
    buffer: SharedBuffer,
    events: broadcast::Sender<CaptureEvent>,
}

impl CapturePipeline {
    pub fn new(
        source: Arc<dyn CaptureSource>,
        store: Arc<dyn MediaStore>,
        buffer: SharedBuffer,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            source,
            store,
            buffer,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events.subscribe()
    }

    /// Take one picture. Failures are logged and broadcast before being returned,
    /// so timer-driven callers can drop the result.
    pub async fn capture(&self) -> Result<u64, CaptureError> {
        match self.try_capture().await {
            Ok(frame_id) => {
                let _ = self.events.send(CaptureEvent::Captured { frame_id });
                Ok(frame_id)
            }
            Err(e) => {
                warn!(error = %e, source = self.source.name(), "failed to capture frame");
                let _ = self.events.send(CaptureEvent::Failed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn try_capture(&self) -> Result<u64, CaptureError> {
        let image = self.source.capture().await?;
        let captured_at = Utc::now();
        let path = image.path.clone();

        let orientation = image
            .exif
            .as_ref()
            .and_then(|e| e.get("Orientation"))
            .and_then(|v| v.as_u64());
        info!(
            path = %path.display(),
            width = ?image.width,
            height = ?image.height,
            orientation = ?orientation,
            "captured frame"
        );

        let frame_id = self
            .buffer
            .lock()
            .await
            .add(Frame::from_capture(image, captured_at));

        self.store.persist(&path).await?;
        debug!(frame_id, "frame saved to library");
        Ok(frame_id)
    }
}
