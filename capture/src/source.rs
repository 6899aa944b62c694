use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use frame_uplink_common::frame::{CapturedImage, ExifData};
use image::{ImageDecoder, ImageReader};
use tracing::debug;

/// Camera primitive: take one picture and return a handle to it.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn capture(&self) -> Result<CapturedImage, CaptureError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Long-term media storage, invoked once per successful capture.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn persist(&self, image: &Path) -> Result<(), CaptureError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),
    #[error("camera request failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("camera returned HTTP status {0}")]
    HttpStatus(u16),
    #[error("failed to read camera response: {0}")]
    HttpBody(reqwest::Error),
    #[error("camera returned an empty frame")]
    EmptyFrame,
    #[error("camera unavailable: {0}")]
    Device(String),
    #[error("failed to write frame to {0}: {1}")]
    Write(String, std::io::Error),
    #[error("failed to save frame to library: {0}")]
    Persist(String),
}

/// Pulls single JPEG snapshots from a camera's HTTP frame endpoint and keeps
/// them on local disk until they are uploaded.
pub struct HttpSnapshotCamera {
    client: reqwest::Client,
    url: String,
    output_dir: PathBuf,
    seq: AtomicU64,
}

impl HttpSnapshotCamera {
    pub fn new(url: &str, output_dir: &Path, timeout: Duration) -> Result<Self, CaptureError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(CaptureError::HttpClient)?;
        Ok(Self {
            client,
            url: url.to_string(),
            output_dir: output_dir.to_path_buf(),
            seq: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl CaptureSource for HttpSnapshotCamera {
    async fn capture(&self) -> Result<CapturedImage, CaptureError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(CaptureError::HttpConnect)?;

        if !resp.status().is_success() {
            return Err(CaptureError::HttpStatus(resp.status().as_u16()));
        }

        let jpeg_data = resp.bytes().await.map_err(CaptureError::HttpBody)?;
        if jpeg_data.is_empty() {
            return Err(CaptureError::EmptyFrame);
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = self.output_dir.join(format!(
            "frame-{}_{seq:06}.jpg",
            Utc::now().format("%Y%m%dT%H%M%S%3fZ")
        ));

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| CaptureError::Write(self.output_dir.display().to_string(), e))?;
        tokio::fs::write(&path, &jpeg_data)
            .await
            .map_err(|e| CaptureError::Write(path.display().to_string(), e))?;

        let info = inspect_jpeg(&jpeg_data);
        debug!(
            path = %path.display(),
            bytes = jpeg_data.len(),
            width = ?info.as_ref().map(|p| p.width),
            height = ?info.as_ref().map(|p| p.height),
            "snapshot written"
        );

        Ok(CapturedImage {
            path,
            width: info.as_ref().map(|p| p.width),
            height: info.as_ref().map(|p| p.height),
            exif: info.map(|p| p.exif),
        })
    }

    fn name(&self) -> &str {
        "http-snapshot"
    }
}

/// Header-level facts about an encoded image. Pixels are never decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct JpegInfo {
    pub width: u32,
    pub height: u32,
    pub exif: ExifData,
}

/// Read dimensions and the EXIF orientation tag from encoded image bytes.
pub fn inspect_jpeg(data: &[u8]) -> Option<JpegInfo> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?;
    let mut decoder = match reader.into_decoder() {
        Ok(d) => d,
        Err(e) => {
            debug!(error = %e, "could not read image header");
            return None;
        }
    };

    let (width, height) = decoder.dimensions();
    let orientation = decoder.orientation().map(|o| o.to_exif()).unwrap_or(1);

    let mut exif = ExifData::new();
    exif.insert("Orientation".into(), orientation.into());
    exif.insert("ImageWidth".into(), width.into());
    exif.insert("ImageLength".into(), height.into());

    Some(JpegInfo {
        width,
        height,
        exif,
    })
}

/// Copies every capture into a local library directory.
pub struct LibraryStore {
    dir: PathBuf,
}

impl LibraryStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl MediaStore for LibraryStore {
    async fn persist(&self, image: &Path) -> Result<(), CaptureError> {
        let name = image
            .file_name()
            .ok_or_else(|| CaptureError::Persist(format!("{} has no file name", image.display())))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CaptureError::Persist(e.to_string()))?;
        let dest = self.dir.join(name);
        tokio::fs::copy(image, &dest)
            .await
            .map_err(|e| CaptureError::Persist(e.to_string()))?;

        debug!(src = %image.display(), dest = %dest.display(), "saved to library");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};

    fn tiny_jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    /// A fresh directory under the temp dir, removed when dropped.
    struct ScratchDir(PathBuf);

    impl ScratchDir {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("frame-uplink-{name}-{}", std::process::id()));
            let _ = std::fs::remove_dir_all(&dir);
            Self(dir)
        }
    }

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn reads_dimensions_and_default_orientation() {
        let info = inspect_jpeg(&tiny_jpeg(8, 6)).unwrap();
        assert_eq!((info.width, info.height), (8, 6));
        assert_eq!(info.exif["Orientation"], 1);
    }

    #[test]
    fn rejects_garbage() {
        assert!(inspect_jpeg(b"definitely not an image").is_none());
    }

    #[tokio::test]
    async fn library_store_copies_file() {
        let src_dir = ScratchDir::new("lib-src");
        std::fs::create_dir_all(&src_dir.0).unwrap();
        let src = src_dir.0.join("frame-1.jpg");
        std::fs::write(&src, b"jpeg").unwrap();

        let lib_dir = ScratchDir::new("lib-dst");
        let store = LibraryStore::new(&lib_dir.0);
        store.persist(&src).await.unwrap();

        assert_eq!(std::fs::read(lib_dir.0.join("frame-1.jpg")).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn library_store_reports_missing_source() {
        let lib_dir = ScratchDir::new("lib-missing");
        let store = LibraryStore::new(&lib_dir.0);
        let err = store
            .persist(Path::new("/nonexistent/frame.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Persist(_)));
    }
}
