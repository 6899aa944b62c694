mod alerts;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use frame_uplink_capture::{
    CaptureError, CapturePipeline, CaptureTrigger, HttpSnapshotCamera, LibraryStore,
};
use frame_uplink_common::buffer::FrameBuffer;
use frame_uplink_common::config::Config;
use frame_uplink_common::credentials::{CredentialStore, Credentials};
use frame_uplink_uploader::{HttpTransport, UploadCoordinator, UploadError};
use tracing::{error, info};

use crate::alerts::Alerts;
use crate::routes::AppState;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("camera setup failed: {0}")]
    Camera(#[from] CaptureError),
    #[error("upload client setup failed: {0}")]
    Transport(#[from] UploadError),
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    if let Err(e) = run(config).await {
        error!(error = %e, "frame-uplink exiting");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    let buffer = FrameBuffer::shared(config.buffer.capacity);
    let credentials = CredentialStore::new(Credentials::new(
        config.upload.api_key.trim(),
        config.upload.entity_id.trim(),
    ));

    // A snapshot slower than the capture period is not worth waiting for.
    let camera = HttpSnapshotCamera::new(
        &config.capture.snapshot_url,
        &config.capture.output_dir,
        config.capture.interval(),
    )?;
    let library = LibraryStore::new(&config.capture.library_dir);
    let pipeline = Arc::new(CapturePipeline::new(
        Arc::new(camera),
        Arc::new(library),
        buffer.clone(),
    ));

    let alerts = Arc::new(Alerts::default());
    alerts::collect(pipeline.subscribe(), alerts.clone());

    let trigger = Arc::new(CaptureTrigger::new(pipeline, config.capture.interval()));

    let transport = HttpTransport::new(&config.upload)?;
    info!(url = transport.url(), "upload endpoint");
    let coordinator = Arc::new(UploadCoordinator::new(
        buffer.clone(),
        credentials.clone(),
        Arc::new(transport),
        config.upload.item_delay(),
    ));

    let state = Arc::new(AppState {
        buffer,
        trigger,
        coordinator,
        credentials: credentials.clone(),
        alerts,
    });
    let app = routes::router(state);

    let addr = format!("0.0.0.0:{}", config.api.port);
    info!(
        addr = %addr,
        snapshot_url = %config.capture.snapshot_url,
        interval_secs = config.capture.interval().as_secs(),
        capacity = config.buffer.capacity,
        configured = credentials.is_configured(),
        "frame-uplink control surface starting"
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| StartupError::Bind(addr.clone(), e))?;
    axum::serve(listener, app)
        .await
        .map_err(StartupError::Serve)
}
