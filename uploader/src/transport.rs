use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use frame_uplink_common::config::UploadConfig;
use frame_uplink_common::credentials::Credentials;
use frame_uplink_common::frame::{iso_timestamp, upload_filename, ExifData, Frame, FramePatch};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, info, warn};

const JPEG_MIME: &str = "image/jpeg";
const SOURCE_TAG: &str = "wearable-glasses";
const DEVICE_TYPE: &str = "mobile-camera";

/// Outcome of one upload attempt. The transport never fails outright; every
/// error ends up as `Failed` with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    Uploaded {
        url: Option<String>,
        media_id: Option<String>,
    },
    Failed {
        error: String,
    },
}

impl UploadResult {
    pub fn failed(error: impl Into<String>) -> Self {
        UploadResult::Failed {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UploadResult::Uploaded { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            UploadResult::Failed { error } => Some(error),
            UploadResult::Uploaded { .. } => None,
        }
    }

    /// Frame state after this attempt.
    pub fn to_patch(&self) -> FramePatch {
        match self {
            UploadResult::Uploaded { url, .. } => FramePatch::uploaded(url.clone()),
            UploadResult::Failed { error } => FramePatch::failed(error.clone()),
        }
    }
}

/// Everything the transport needs to submit one frame, detached from the buffer.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub exif: Option<ExifData>,
}

impl From<&Frame> for UploadRequest {
    fn from(frame: &Frame) -> Self {
        Self {
            path: frame.path.clone(),
            captured_at: frame.captured_at,
            width: frame.width,
            height: frame.height,
            exif: frame.exif.clone(),
        }
    }
}

#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Submit one frame. Must always resolve with a definite result.
    async fn upload(&self, credentials: &Credentials, request: &UploadRequest) -> UploadResult;
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("API key or Entity ID not configured")]
    NotConfigured,
    #[error("File does not exist")]
    FileMissing,
    #[error("failed to stat file: {0}")]
    FileInfo(std::io::Error),
    #[error("failed to read file: {0}")]
    ReadFile(std::io::Error),
    #[error("file is {size} bytes, upload limit is {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("{0}")]
    Http(reqwest::Error),
}

/// Multipart POST to the media ingestion endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    max_file_size: u64,
}

impl HttpTransport {
    pub fn new(config: &UploadConfig) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(config.timeout())
            .build()
            .map_err(UploadError::Client)?;
        Ok(Self {
            client,
            url: config.upload_url(),
            max_file_size: config.max_file_size,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn try_upload(
        &self,
        credentials: &Credentials,
        request: &UploadRequest,
    ) -> Result<UploadResult, UploadError> {
        if !credentials.is_configured() {
            return Err(UploadError::NotConfigured);
        }

        info!(path = %request.path.display(), "starting multipart upload");

        let size = file_size(&request.path).await?;
        if size > self.max_file_size {
            return Err(UploadError::TooLarge {
                size,
                max: self.max_file_size,
            });
        }
        debug!(
            size,
            mime = JPEG_MIME,
            width = ?request.width,
            height = ?request.height,
            "file info for upload"
        );

        let data = tokio::fs::read(&request.path)
            .await
            .map_err(UploadError::ReadFile)?;

        let filename = upload_filename(&request.captured_at);
        let file = Part::bytes(data)
            .file_name(filename)
            .mime_str(JPEG_MIME)
            .map_err(UploadError::Http)?;

        let mut form = Form::new()
            .part("file", file)
            .text("entityId", credentials.entity_id.clone())
            .text("authToken", credentials.api_key.clone());

        if let Some(width) = request.width.filter(|w| *w > 0) {
            form = form.text("width", width.to_string());
        }
        if let Some(height) = request.height.filter(|h| *h > 0) {
            form = form.text("height", height.to_string());
        }

        let exif = exif_blob(request, size);
        debug!(
            orientation = ?exif.get("Orientation"),
            captured_at = ?exif.get("capturedAt"),
            "including exif metadata"
        );
        form = form.text("exif", Value::Object(exif).to_string());

        let resp = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::Http)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(UploadError::Http)?;
        debug!(status, body = %body, "upload response");

        Ok(interpret_response(status, &body))
    }
}

#[async_trait]
impl FrameTransport for HttpTransport {
    async fn upload(&self, credentials: &Credentials, request: &UploadRequest) -> UploadResult {
        match self.try_upload(credentials, request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, path = %request.path.display(), "upload error");
                UploadResult::failed(e.to_string())
            }
        }
    }
}

async fn file_size(path: &Path) -> Result<u64, UploadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        Ok(_) => Err(UploadError::FileMissing),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(UploadError::FileMissing),
        Err(e) => Err(UploadError::FileInfo(e)),
    }
}

/// Camera EXIF fields merged with the capture timestamp and fixed source tags.
/// Generated keys win over camera-provided ones.
pub fn exif_blob(request: &UploadRequest, file_size: u64) -> ExifData {
    let mut exif = request.exif.clone().unwrap_or_default();
    exif.insert(
        "capturedAt".into(),
        iso_timestamp(&request.captured_at).into(),
    );
    exif.insert("source".into(), SOURCE_TAG.into());
    exif.insert("deviceType".into(), DEVICE_TYPE.into());
    exif.insert("fileSize".into(), file_size.into());
    exif
}

/// Map an HTTP status and raw body to an upload result.
///
/// Any JSON document is accepted. `success` is judged by truthiness, so
/// `"true"`, `1` or a non-empty object count; `false`, `0`, `""`, `null`
/// and a missing field do not.
pub fn interpret_response(status: u16, body: &str) -> UploadResult {
    if !(200..300).contains(&status) {
        warn!(status, body, "upload rejected");
        return UploadResult::failed(format!("Upload failed: {status} {body}"));
    }

    let parsed: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to parse upload response");
            return UploadResult::failed("Invalid response format");
        }
    };

    if parsed.get("success").is_some_and(truthy) {
        UploadResult::Uploaded {
            url: text_field(&parsed, "url"),
            media_id: text_field(&parsed, "mediaId"),
        }
    } else {
        UploadResult::failed(
            text_field(&parsed, "message")
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Upload failed".into()),
        )
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String fields as-is; numbers and booleans by their JSON text.
fn text_field(body: &Value, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other @ (Value::Number(_) | Value::Bool(_)) => Some(other.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}
