//! Upload side: the multipart HTTP transport and the coordinator that feeds
//! buffered frames through it.

pub mod coordinator;
pub mod transport;

pub use coordinator::{
    BatchOutcome, BatchStats, CoordinatorError, UploadCoordinator, UploadProgress,
};
pub use transport::{FrameTransport, HttpTransport, UploadError, UploadRequest, UploadResult};
