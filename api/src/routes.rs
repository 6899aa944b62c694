use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{Local, TimeZone};
use frame_uplink_capture::CaptureTrigger;
use frame_uplink_common::buffer::SharedBuffer;
use frame_uplink_common::credentials::{CredentialStore, Credentials};
use frame_uplink_common::frame::Frame;
use frame_uplink_uploader::{
    BatchOutcome, CoordinatorError, UploadCoordinator, UploadProgress, UploadResult,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::alerts::{Alert, Alerts};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub buffer: SharedBuffer,
    pub trigger: Arc<CaptureTrigger>,
    pub coordinator: Arc<UploadCoordinator>,
    pub credentials: CredentialStore,
    pub alerts: Arc<Alerts>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/frames", get(list_frames).delete(clear_frames))
        .route("/frames/capture", post(capture_now))
        .route("/frames/upload", post(upload_all))
        .route("/frames/:index/upload", post(upload_single))
        .route("/timeline", get(timeline))
        .route("/recording/start", post(start_recording))
        .route("/recording/stop", post(stop_recording))
        .route("/credentials", put(save_credentials))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusView {
    recording: bool,
    countdown: u64,
    configured: bool,
    uploading: bool,
    progress: UploadProgress,
    frame_count: usize,
    alerts: Vec<Alert>,
}

#[derive(Debug, Serialize)]
pub struct TimelineDay {
    pub date: String,
    pub frames: Vec<Frame>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsBody {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub entity_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadView {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<UploadResult> for UploadView {
    fn from(result: UploadResult) -> Self {
        match result {
            UploadResult::Uploaded { url, media_id } => Self {
                success: true,
                url,
                media_id,
                error: None,
            },
            UploadResult::Failed { error } => Self {
                success: false,
                url: None,
                media_id: None,
                error: Some(error),
            },
        }
    }
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /status
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let frame_count = state.buffer.lock().await.len();
    Json(StatusView {
        recording: state.trigger.is_recording().await,
        countdown: state.trigger.countdown(),
        configured: state.credentials.is_configured(),
        uploading: state.coordinator.is_uploading(),
        progress: state.coordinator.progress(),
        frame_count,
        alerts: state.alerts.recent().await,
    })
}

/// GET /frames (newest first)
async fn list_frames(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.buffer.lock().await.snapshot())
}

/// GET /timeline, frames grouped by local calendar day
async fn timeline(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let frames = state.buffer.lock().await.snapshot();
    Json(group_by_day(frames, &Local))
}

/// DELETE /frames
async fn clear_frames(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.buffer.lock().await.clear();
    info!("frame buffer cleared");
    StatusCode::NO_CONTENT
}

/// POST /frames/capture
async fn capture_now(State(state): State<Arc<AppState>>) -> Response {
    match state.trigger.capture_now().await {
        Ok(frame_id) => (StatusCode::CREATED, Json(json!({ "id": frame_id }))).into_response(),
        Err(e) => message(StatusCode::BAD_GATEWAY, &e.to_string()),
    }
}

/// POST /frames/:index/upload
async fn upload_single(State(state): State<Arc<AppState>>, Path(index): Path<usize>) -> Response {
    match state.coordinator.upload_single(index).await {
        Ok(result) => Json(UploadView::from(result)).into_response(),
        Err(e @ CoordinatorError::InvalidIndex { .. }) => {
            message(StatusCode::NOT_FOUND, &e.to_string())
        }
        Err(e @ (CoordinatorError::AlreadyUploading | CoordinatorError::Busy)) => {
            message(StatusCode::CONFLICT, &e.to_string())
        }
        Err(e @ CoordinatorError::Cancelled) => {
            message(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// POST /frames/upload, starts a batch in the background
async fn upload_all(State(state): State<Arc<AppState>>) -> Response {
    if state.coordinator.is_uploading() {
        return message(StatusCode::CONFLICT, "an upload is already in progress");
    }
    if !state.credentials.is_configured() {
        return message(
            StatusCode::BAD_REQUEST,
            "configure an API key and entity id before uploading",
        );
    }

    let coordinator = Arc::clone(&state.coordinator);
    tokio::spawn(async move {
        match coordinator.upload_all().await {
            BatchOutcome::Aborted { stats, error } => {
                error!(error = %error, uploaded = stats.uploaded, failed = stats.failed, "batch aborted");
            }
            outcome => info!(?outcome, "batch done"),
        }
    });
    StatusCode::ACCEPTED.into_response()
}

/// POST /recording/start, reports the immediate capture when it starts
async fn start_recording(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.trigger.start().await {
        None => Json(json!({ "recording": true, "changed": false })),
        Some(Ok(frame_id)) => Json(json!({
            "recording": true,
            "changed": true,
            "frameId": frame_id,
        })),
        Some(Err(e)) => Json(json!({
            "recording": true,
            "changed": true,
            "captureError": e.to_string(),
        })),
    }
}

/// POST /recording/stop
async fn stop_recording(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let changed = state.trigger.stop().await;
    Json(json!({ "recording": false, "changed": changed }))
}

/// PUT /credentials
/// Body: { "apiKey": "...", "entityId": "..." }
async fn save_credentials(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialsBody>,
) -> Response {
    match validate_credentials(body) {
        Ok(credentials) => {
            state.credentials.set(credentials);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(reason) => {
            warn!(reason, "rejected credentials");
            message(StatusCode::BAD_REQUEST, reason)
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn validate_credentials(body: CredentialsBody) -> Result<Credentials, &'static str> {
    let api_key = body.api_key.trim();
    let entity_id = body.entity_id.trim();
    if api_key.is_empty() {
        return Err("API key must not be empty");
    }
    if entity_id.is_empty() {
        return Err("entity id must not be empty");
    }
    Ok(Credentials::new(api_key, entity_id))
}

/// Group newest-first frames by calendar day in `tz`. Days come out newest
/// first and each keeps the buffer order of its frames.
pub fn group_by_day<Tz: TimeZone>(frames: Vec<Frame>, tz: &Tz) -> Vec<TimelineDay> {
    let mut days: Vec<TimelineDay> = Vec::new();
    for frame in frames {
        let date = frame
            .captured_at
            .with_timezone(tz)
            .date_naive()
            .format("%Y-%m-%d")
            .to_string();
        match days.iter_mut().find(|d| d.date == date) {
            Some(day) => day.frames.push(frame),
            None => days.push(TimelineDay {
                date,
                frames: vec![frame],
            }),
        }
    }
    days.sort_by(|a, b| b.date.cmp(&a.date));
    days
}


#[cfg(test)]
mod control_tests {
    use super::*;
    use crate::alerts;
    use async_trait::async_trait;
    use frame_uplink_capture::{CaptureError, CapturePipeline, CaptureSource, MediaStore};
    use frame_uplink_common::buffer::FrameBuffer;
    use frame_uplink_common::frame::CapturedImage;
    use frame_uplink_uploader::{FrameTransport, UploadRequest};
    use serde_json::Value;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    #[derive(Default)]
    struct FakeCamera {
        shots: AtomicUsize,
        broken: AtomicBool,
    }

    #[async_trait]
    impl CaptureSource for FakeCamera {
        async fn capture(&self) -> Result<CapturedImage, CaptureError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(CaptureError::Device("lens cap on".into()));
            }
            let n = self.shots.fetch_add(1, Ordering::SeqCst);
            Ok(CapturedImage {
                path: PathBuf::from(format!("/frames/shot-{n}.jpg")),
                width: Some(640),
                height: Some(480),
                exif: None,
            })
        }
    }

    struct NullStore;

    #[async_trait]
    impl MediaStore for NullStore {
        async fn persist(&self, _image: &std::path::Path) -> Result<(), CaptureError> {
            Ok(())
        }
    }

    /// Every upload waits for a permit on `gate`, then succeeds.
    struct GatedTransport {
        gate: Semaphore,
        entered: Notify,
    }

    #[async_trait]
    impl FrameTransport for GatedTransport {
        async fn upload(&self, _credentials: &Credentials, request: &UploadRequest) -> UploadResult {
            self.entered.notify_one();
            self.gate.acquire().await.unwrap().forget();
            UploadResult::Uploaded {
                url: Some(format!("https://cdn.test{}", request.path.display())),
                media_id: None,
            }
        }
    }

    struct Harness {
        base: String,
        client: reqwest::Client,
        camera: Arc<FakeCamera>,
        transport: Arc<GatedTransport>,
        state: Arc<AppState>,
    }

    impl Harness {
        async fn start(credentials: Credentials) -> Self {
            let buffer = FrameBuffer::shared(50);
            let camera = Arc::new(FakeCamera::default());
            let pipeline = Arc::new(CapturePipeline::new(
                camera.clone(),
                Arc::new(NullStore),
                buffer.clone(),
            ));
            let alerts = Arc::new(Alerts::default());
            alerts::collect(pipeline.subscribe(), alerts.clone());

            let store = CredentialStore::new(credentials);
            let transport = Arc::new(GatedTransport {
                gate: Semaphore::new(0),
                entered: Notify::new(),
            });
            let coordinator = Arc::new(UploadCoordinator::new(
                buffer.clone(),
                store.clone(),
                transport.clone(),
                Duration::ZERO,
            ));
            let state = Arc::new(AppState {
                buffer,
                trigger: Arc::new(CaptureTrigger::new(pipeline, Duration::from_secs(3600))),
                coordinator,
                credentials: store,
                alerts,
            });

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let app = router(state.clone());
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                base: format!("http://{addr}"),
                client: reqwest::Client::new(),
                camera,
                transport,
                state,
            }
        }

        async fn post(&self, path: &str) -> reqwest::Response {
            self.client
                .post(format!("{}{path}", self.base))
                .send()
                .await
                .unwrap()
        }

        async fn get_json(&self, path: &str) -> Value {
            let resp = self
                .client
                .get(format!("{}{path}", self.base))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status().as_u16(), 200);
            resp.json().await.unwrap()
        }

        async fn capture(&self, count: usize) {
            for _ in 0..count {
                assert_eq!(self.post("/frames/capture").await.status().as_u16(), 201);
            }
        }

        async fn wait_for_batch(&self) {
            for _ in 0..500 {
                if !self.state.coordinator.is_uploading() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("batch never finished");
        }
    }

    fn configured() -> Credentials {
        Credentials::new("key", "entity")
    }

    #[tokio::test]
    async fn capture_list_timeline_and_clear() {
        let h = Harness::start(configured()).await;

        let resp = h.post("/frames/capture").await;
        assert_eq!(resp.status().as_u16(), 201);
        let body: Value = resp.json().await.unwrap();
        assert!(body["id"].is_u64());

        let frames = h.get_json("/frames").await;
        assert_eq!(frames.as_array().unwrap().len(), 1);
        assert_eq!(frames[0]["uploadStatus"], "idle");

        let days = h.get_json("/timeline").await;
        assert_eq!(days.as_array().unwrap().len(), 1);
        assert_eq!(days[0]["frames"].as_array().unwrap().len(), 1);

        let resp = h
            .client
            .delete(format!("{}/frames", h.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 204);
        assert!(h.get_json("/frames").await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_capture_is_bad_gateway() {
        let h = Harness::start(configured()).await;
        h.camera.broken.store(true, Ordering::SeqCst);

        let resp = h.post("/frames/capture").await;
        assert_eq!(resp.status().as_u16(), 502);
        let body: Value = resp.json().await.unwrap();
        assert!(body["message"].as_str().unwrap().contains("lens cap on"));
    }

    #[tokio::test]
    async fn single_upload_status_codes() {
        let h = Harness::start(configured()).await;

        assert_eq!(h.post("/frames/0/upload").await.status().as_u16(), 404);

        h.capture(1).await;
        h.transport.gate.add_permits(1);
        let resp = h.post("/frames/0/upload").await;
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["url"], "https://cdn.test/frames/shot-0.jpg");

        assert_eq!(h.post("/frames/1/upload").await.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn uploads_are_refused_while_a_batch_runs() {
        let h = Harness::start(configured()).await;
        h.capture(3).await;

        assert_eq!(h.post("/frames/upload").await.status().as_u16(), 202);
        h.transport.entered.notified().await;

        assert_eq!(h.post("/frames/2/upload").await.status().as_u16(), 409);
        assert_eq!(h.post("/frames/upload").await.status().as_u16(), 409);

        let status = h.get_json("/status").await;
        assert_eq!(status["uploading"], true);
        assert_eq!(status["progress"]["total"], 3);
        let frames = h.get_json("/frames").await;
        let uploading = frames
            .as_array()
            .unwrap()
            .iter()
            .filter(|f| f["uploadStatus"] == "uploading")
            .count();
        assert_eq!(uploading, 1);

        h.transport.gate.add_permits(3);
        h.wait_for_batch().await;
        let frames = h.get_json("/frames").await;
        assert!(frames
            .as_array()
            .unwrap()
            .iter()
            .all(|f| f["uploadStatus"] == "uploaded"));
        let status = h.get_json("/status").await;
        assert_eq!(status["progress"]["total"], 0);
    }

    #[tokio::test]
    async fn batch_needs_credentials() {
        let h = Harness::start(Credentials::new("", "")).await;
        h.capture(1).await;

        assert_eq!(h.post("/frames/upload").await.status().as_u16(), 400);
        assert_eq!(h.get_json("/status").await["configured"], false);

        let resp = h
            .client
            .put(format!("{}/credentials", h.base))
            .json(&serde_json::json!({ "apiKey": "   ", "entityId": "entity" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);

        let resp = h
            .client
            .put(format!("{}/credentials", h.base))
            .json(&serde_json::json!({ "apiKey": " key ", "entityId": "entity" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 204);
        assert_eq!(h.state.credentials.snapshot().api_key, "key");
        assert_eq!(h.get_json("/status").await["configured"], true);

        h.transport.gate.add_permits(1);
        assert_eq!(h.post("/frames/upload").await.status().as_u16(), 202);
        h.wait_for_batch().await;
        assert_eq!(h.get_json("/frames").await[0]["uploadStatus"], "uploaded");
    }

    #[tokio::test]
    async fn recording_start_reports_first_capture() {
        let h = Harness::start(configured()).await;

        let body: Value = h.post("/recording/start").await.json().await.unwrap();
        assert_eq!(body["changed"], true);
        assert!(body["frameId"].is_u64());
        assert!(body.get("captureError").is_none());

        let body: Value = h.post("/recording/start").await.json().await.unwrap();
        assert_eq!(body["changed"], false);
        assert_eq!(h.get_json("/status").await["recording"], true);

        let body: Value = h.post("/recording/stop").await.json().await.unwrap();
        assert_eq!(body["changed"], true);
        let body: Value = h.post("/recording/stop").await.json().await.unwrap();
        assert_eq!(body["changed"], false);

        h.camera.broken.store(true, Ordering::SeqCst);
        let body: Value = h.post("/recording/start").await.json().await.unwrap();
        assert_eq!(body["changed"], true);
        assert!(body["captureError"].as_str().unwrap().contains("lens cap on"));
        assert_eq!(h.get_json("/status").await["recording"], true);
        h.post("/recording/stop").await;
    }
}
