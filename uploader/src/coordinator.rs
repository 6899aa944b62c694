use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use frame_uplink_common::buffer::{FrameBuffer, SharedBuffer};
use frame_uplink_common::credentials::CredentialStore;
use frame_uplink_common::frame::{FramePatch, FrameStatus};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::transport::{FrameTransport, UploadRequest, UploadResult};

/// Frames processed so far in the running batch. `{0, 0}` when idle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub current: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub uploaded: usize,
    pub failed: usize,
    /// Snapshotted as eligible but no longer eligible (or gone) by their turn.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    AlreadyRunning,
    NotConfigured,
    NothingToUpload,
    Completed(BatchStats),
    Aborted { stats: BatchStats, error: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("no frame at index {index} (buffer holds {len})")]
    InvalidIndex { index: usize, len: usize },
    #[error("frame is already uploading")]
    AlreadyUploading,
    #[error("another upload is in progress")]
    Busy,
    #[error("upload task was cancelled")]
    Cancelled,
}

/// Drives uploads of buffered frames, one at a time.
///
/// Every upload, single or batched, holds `lane` from claiming the frame
/// until its result is recorded, so at most one frame is ever `uploading`.
/// Frames are claimed by index but tracked by id from then on, so captures
/// that prepend to the buffer mid-upload never receive another frame's result.
pub struct UploadCoordinator {
    buffer: SharedBuffer,
    credentials: CredentialStore,
    transport: Arc<dyn FrameTransport>,
    lane: Mutex<()>,
    uploading: AtomicBool,
    progress: watch::Sender<UploadProgress>,
    item_delay: Duration,
}

impl UploadCoordinator {
    pub fn new(
        buffer: SharedBuffer,
        credentials: CredentialStore,
        transport: Arc<dyn FrameTransport>,
        item_delay: Duration,
    ) -> Self {
        let (progress, _) = watch::channel(UploadProgress::default());
        Self {
            buffer,
            credentials,
            transport,
            lane: Mutex::new(()),
            uploading: AtomicBool::new(false),
            progress,
            item_delay,
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> UploadProgress {
        *self.progress.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress.subscribe()
    }

    /// Upload the frame at `index`.
    ///
    /// Refused without side effects if the index is out of range, the frame
    /// is already uploading, or a batch or another single upload is running.
    pub async fn upload_single(&self, index: usize) -> Result<UploadResult, CoordinatorError> {
        if self.is_uploading() {
            warn!(index, "cannot upload frame: a batch is running");
            return Err(CoordinatorError::Busy);
        }
        let Ok(_lane) = self.lane.try_lock() else {
            warn!(index, "cannot upload frame: another upload is in progress");
            return Err(CoordinatorError::Busy);
        };

        let (id, request) = claim(&mut *self.buffer.lock().await, index)
            .inspect_err(|e| warn!(index, error = %e, "frame not uploaded"))?;

        self.run(id, request).await.inspect_err(|e| {
            error!(error = %e, frame_id = id, "upload did not complete");
        })
    }

    /// Upload every idle or failed frame, oldest index first, pausing
    /// `item_delay` between requests.
    ///
    /// The eligible set is taken once, as frame ids. Each frame's live status
    /// is checked again on its turn; anything uploaded elsewhere in the
    /// meantime, or evicted, is skipped but still counts towards progress.
    pub async fn upload_all(&self) -> BatchOutcome {
        let Some(_guard) = BatchGuard::acquire(&self.uploading, &self.progress) else {
            warn!("cannot upload: a batch is already running");
            return BatchOutcome::AlreadyRunning;
        };
        if !self.credentials.is_configured() {
            warn!("cannot upload: credentials not configured");
            return BatchOutcome::NotConfigured;
        }

        let ids = self.buffer.lock().await.eligible_ids();
        if ids.is_empty() {
            info!("no frames to upload");
            return BatchOutcome::NothingToUpload;
        }

        let total = ids.len();
        self.progress.send_replace(UploadProgress { current: 0, total });
        info!(total, "batch upload started");

        let mut stats = BatchStats::default();
        for (n, id) in ids.into_iter().enumerate() {
            // Waits out a single upload that started before this batch.
            let lane = self.lane.lock().await;
            let claimed = {
                let mut buffer = self.buffer.lock().await;
                eligible_position(&buffer, id).and_then(|index| claim(&mut buffer, index).ok())
            };

            let attempted = match claimed {
                Some((id, request)) => match self.run(id, request).await {
                    Ok(result) if result.is_success() => {
                        stats.uploaded += 1;
                        true
                    }
                    Ok(_) => {
                        stats.failed += 1;
                        true
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            frame_id = id,
                            remaining = total - n - 1,
                            "batch upload aborted"
                        );
                        return BatchOutcome::Aborted {
                            stats,
                            error: e.to_string(),
                        };
                    }
                },
                None => {
                    debug!(frame_id = id, "frame no longer eligible, skipping");
                    stats.skipped += 1;
                    false
                }
            };

            drop(lane);
            self.progress.send_modify(|p| p.current += 1);

            if attempted && n + 1 < total {
                tokio::time::sleep(self.item_delay).await;
            }
        }

        info!(
            uploaded = stats.uploaded,
            failed = stats.failed,
            skipped = stats.skipped,
            "batch upload finished"
        );
        BatchOutcome::Completed(stats)
    }

    /// Run the transport for a claimed frame and record the result on it.
    ///
    /// The transport call and the buffer write happen in their own task, so a
    /// caller that stops waiting cannot strand the frame in `uploading`.
    async fn run(&self, id: u64, request: UploadRequest) -> Result<UploadResult, CoordinatorError> {
        let credentials = self.credentials.snapshot();
        let transport = Arc::clone(&self.transport);
        let buffer = Arc::clone(&self.buffer);

        let task = tokio::spawn(async move {
            let result = transport.upload(&credentials, &request).await;
            if !buffer.lock().await.update_by_id(id, result.to_patch()) {
                debug!(frame_id = id, "frame left the buffer before its upload finished");
            }
            result
        });

        let (result, outcome) = match task.await {
            Ok(result) => (result, Ok(())),
            Err(e) => {
                // The task died before recording anything on the frame.
                let (result, outcome) = if e.is_panic() {
                    (UploadResult::failed("upload task panicked"), Ok(()))
                } else {
                    (
                        UploadResult::failed(CoordinatorError::Cancelled.to_string()),
                        Err(CoordinatorError::Cancelled),
                    )
                };
                self.buffer
                    .lock()
                    .await
                    .update_by_id(id, result.to_patch());
                (result, outcome)
            }
        };

        match &result {
            UploadResult::Uploaded { url, media_id } => {
                info!(frame_id = id, url = ?url, media_id = ?media_id, "frame uploaded");
            }
            UploadResult::Failed { error } => {
                warn!(frame_id = id, error = %error, "frame upload failed");
            }
        }

        outcome.map(|()| result)
    }
}

/// Mark the frame at `index` as uploading and detach what the transport needs.
fn claim(buffer: &mut FrameBuffer, index: usize) -> Result<(u64, UploadRequest), CoordinatorError> {
    let len = buffer.len();
    let frame = buffer
        .get(index)
        .ok_or(CoordinatorError::InvalidIndex { index, len })?;
    if frame.status == FrameStatus::Uploading {
        return Err(CoordinatorError::AlreadyUploading);
    }
    let claimed = (frame.id, UploadRequest::from(frame));
    buffer.update(index, FramePatch::uploading());
    Ok(claimed)
}

fn eligible_position(buffer: &FrameBuffer, id: u64) -> Option<usize> {
    let index = buffer.position(id)?;
    buffer
        .get(index)
        .filter(|f| f.status.is_eligible())
        .map(|_| index)
}

/// Holds the single-batch flag; resets it and the progress on drop.
struct BatchGuard<'a> {
    flag: &'a AtomicBool,
    progress: &'a watch::Sender<UploadProgress>,
}

impl<'a> BatchGuard<'a> {
    fn acquire(flag: &'a AtomicBool, progress: &'a watch::Sender<UploadProgress>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self { flag, progress })
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.progress.send_replace(UploadProgress::default());
        self.flag.store(false, Ordering::Release);
    }
}
