use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::pipeline::CapturePipeline;
use crate::schedule::PeriodicTask;
use crate::source::CaptureError;

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

enum RecordingState {
    Idle,
    Recording {
        _capture: PeriodicTask,
        _countdown: PeriodicTask,
    },
}

/// Periodic capture driver with two states, Idle and Recording.
///
/// Starting takes one picture right away and then one every `period`. A
/// separate one-second countdown (for display only) wraps back to the full
/// period. Stopping cancels both timers; captures already in flight finish.
pub struct CaptureTrigger {
    pipeline: Arc<CapturePipeline>,
    period: Duration,
    state: Mutex<RecordingState>,
    countdown: Arc<watch::Sender<u64>>,
}

impl CaptureTrigger {
    pub fn new(pipeline: Arc<CapturePipeline>, period: Duration) -> Self {
        let (countdown, _) = watch::channel(period_secs(period));
        Self {
            pipeline,
            period,
            state: Mutex::new(RecordingState::Idle),
            countdown: Arc::new(countdown),
        }
    }

    /// Idle → Recording. Returns `None` if already recording, otherwise the
    /// result of the immediate capture. A failed first capture still leaves
    /// the trigger recording.
    pub async fn start(&self) -> Option<Result<u64, CaptureError>> {
        let full = period_secs(self.period);
        {
            let mut state = self.state.lock().await;
            if matches!(*state, RecordingState::Recording { .. }) {
                debug!("start ignored, already recording");
                return None;
            }

            self.countdown.send_replace(full);

            let pipeline = Arc::clone(&self.pipeline);
            let capture = PeriodicTask::spawn(self.period, move || {
                let pipeline = Arc::clone(&pipeline);
                async move {
                    // Failures are already logged and broadcast; keep ticking.
                    let _ = pipeline.capture().await;
                }
            });

            let countdown = Arc::clone(&self.countdown);
            let display = PeriodicTask::spawn(COUNTDOWN_TICK, move || {
                countdown.send_modify(|secs| *secs = if *secs <= 1 { full } else { *secs - 1 });
                std::future::ready(())
            });

            *state = RecordingState::Recording {
                _capture: capture,
                _countdown: display,
            };
        }

        info!(period_secs = full, "recording started");
        Some(self.pipeline.capture().await)
    }

    /// Recording → Idle. Returns false if not recording.
    pub async fn stop(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state.lock().await, RecordingState::Idle);
        match previous {
            RecordingState::Recording { .. } => {
                drop(previous);
                self.countdown.send_replace(period_secs(self.period));
                info!("recording stopped");
                true
            }
            RecordingState::Idle => {
                debug!("stop ignored, not recording");
                false
            }
        }
    }

    /// Out-of-band capture; timers are left alone.
    pub async fn capture_now(&self) -> Result<u64, CaptureError> {
        self.pipeline.capture().await
    }

    pub async fn is_recording(&self) -> bool {
        matches!(*self.state.lock().await, RecordingState::Recording { .. })
    }

    /// Seconds until the next scheduled capture, as shown to the user.
    pub fn countdown(&self) -> u64 {
        *self.countdown.borrow()
    }

    pub fn subscribe_countdown(&self) -> watch::Receiver<u64> {
        self.countdown.subscribe()
    }

    pub fn pipeline(&self) -> &Arc<CapturePipeline> {
        &self.pipeline
    }
}

fn period_secs(period: Duration) -> u64 {
    period.as_secs().max(1)
}
