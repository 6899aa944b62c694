use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Camera-provided EXIF/orientation fields, passed through to the upload as-is.
pub type ExifData = Map<String, Value>;

/// Upload lifecycle of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    Idle,
    Uploading,
    Uploaded,
    Failed,
}

impl FrameStatus {
    /// Idle and failed frames are candidates for the next batch upload.
    pub fn is_eligible(self) -> bool {
        matches!(self, FrameStatus::Idle | FrameStatus::Failed)
    }
}

/// What the camera hands back for a single capture.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub path: PathBuf,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub exif: Option<ExifData>,
}

/// One captured image plus its upload state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Assigned by the buffer on insertion; unique for the process lifetime.
    pub id: u64,
    pub path: PathBuf,
    /// Local wall-clock time for display, e.g. `14:03:27`.
    pub timestamp: String,
    pub captured_at: DateTime<Utc>,
    #[serde(rename = "uploadStatus")]
    pub status: FrameStatus,
    pub upload_url: Option<String>,
    pub upload_error: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_size: Option<u64>,
    pub exif: Option<ExifData>,
}

impl Frame {
    /// Build a fresh frame from a capture taken at `captured_at`.
    pub fn from_capture(image: CapturedImage, captured_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            path: image.path,
            timestamp: captured_at
                .with_timezone(&Local)
                .format("%H:%M:%S")
                .to_string(),
            captured_at,
            status: FrameStatus::Idle,
            upload_url: None,
            upload_error: None,
            width: image.width,
            height: image.height,
            file_size: None,
            exif: image.exif,
        }
    }

    pub fn apply(&mut self, patch: FramePatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(url) = patch.upload_url {
            self.upload_url = url;
        }
        if let Some(error) = patch.upload_error {
            self.upload_error = error;
        }
    }

    /// Filename the upload endpoint receives for this frame.
    pub fn upload_filename(&self) -> String {
        upload_filename(&self.captured_at)
    }
}

/// Partial update of a frame's upload state. `None` leaves a field untouched;
/// `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FramePatch {
    pub status: Option<FrameStatus>,
    pub upload_url: Option<Option<String>>,
    pub upload_error: Option<Option<String>>,
}

impl FramePatch {
    pub fn uploading() -> Self {
        Self {
            status: Some(FrameStatus::Uploading),
            ..Self::default()
        }
    }

    pub fn uploaded(url: Option<String>) -> Self {
        Self {
            status: Some(FrameStatus::Uploaded),
            upload_url: Some(url),
            upload_error: Some(None),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(FrameStatus::Failed),
            upload_url: Some(None),
            upload_error: Some(Some(error.into())),
        }
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix, e.g. `2025-03-01T09:30:00.000Z`.
pub fn iso_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `glasses-frame-<iso timestamp with ':' and '.' replaced by '-'>.jpg`
pub fn upload_filename(captured_at: &DateTime<Utc>) -> String {
    let stamp = iso_timestamp(captured_at).replace(|c: char| c == ':' || c == '.', "-");
    format!("glasses-frame-{stamp}.jpg")
}
