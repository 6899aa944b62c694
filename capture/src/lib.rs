//! Camera side of the pipeline: capture sources, the capture pipeline and the
//! periodic trigger that drives it while recording.

pub mod pipeline;
pub mod schedule;
pub mod source;
pub mod trigger;

pub use pipeline::{CaptureEvent, CapturePipeline};
pub use source::{CaptureError, CaptureSource, HttpSnapshotCamera, LibraryStore, MediaStore};
pub use trigger::CaptureTrigger;
