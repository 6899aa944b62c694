use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use frame_uplink_capture::CaptureEvent;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

const MAX_ALERTS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub message: String,
    pub at: String,
}

/// Most recent capture failures, newest first, for the status view.
#[derive(Default)]
pub struct Alerts {
    recent: Mutex<VecDeque<Alert>>,
}

impl Alerts {
    pub async fn push(&self, message: String) {
        let mut recent = self.recent.lock().await;
        recent.push_front(Alert {
            message,
            at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        recent.truncate(MAX_ALERTS);
    }

    pub async fn recent(&self) -> Vec<Alert> {
        self.recent.lock().await.iter().cloned().collect()
    }
}

/// Drain capture events into `alerts` until the pipeline goes away.
pub fn collect(mut events: broadcast::Receiver<CaptureEvent>, alerts: Arc<Alerts>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CaptureEvent::Failed { message }) => alerts.push(message).await,
                Ok(CaptureEvent::Captured { frame_id }) => {
                    debug!(frame_id, "capture event");
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "alert collector fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
